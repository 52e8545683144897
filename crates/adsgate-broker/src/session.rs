// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-client session task.
//!
//! Each accepted socket gets one task that decodes inbound packets and
//! drains the client's outbound queue in a single select loop. The
//! session registers itself in the broker state after a valid CONNECT
//! and removes itself on any exit path.

use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::broker::{BrokerState, ClientHandle};
use crate::codec::{self, Packet};

/// Runs one client session to completion.
pub(crate) async fn run(mut socket: TcpStream, state: Arc<BrokerState>) {
    socket.set_nodelay(true).ok();

    let mut read_buf = BytesMut::with_capacity(4096);
    let mut write_buf = BytesMut::with_capacity(4096);

    // The CONNECT must arrive first.
    let client_id = match await_connect(&mut socket, &mut read_buf, &mut write_buf).await {
        Some(client_id) => client_id,
        None => return,
    };

    let (tx, mut rx) = mpsc::channel::<Packet>(state.client_queue);
    let subscriptions: Arc<DashMap<String, u8>> = Arc::new(DashMap::new());

    state.clients.insert(
        client_id.clone(),
        ClientHandle {
            sender: tx,
            subscriptions: subscriptions.clone(),
        },
    );
    debug!(client = %client_id, "MQTT session established");

    let mut next_packet_id: u16 = 1;
    let mut chunk = [0u8; 4096];

    loop {
        tokio::select! {
            read = socket.read(&mut chunk) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        read_buf.extend_from_slice(&chunk[..n]);
                        if !drain_inbound(
                            &mut socket,
                            &mut read_buf,
                            &mut write_buf,
                            &state,
                            &subscriptions,
                            &client_id,
                        )
                        .await
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        trace!(client = %client_id, error = %e, "MQTT read failed");
                        break;
                    }
                }
            }
            outbound = rx.recv() => {
                let Some(mut packet) = outbound else { break };

                if let Packet::Publish { qos, packet_id, .. } = &mut packet {
                    if *qos > 0 {
                        *packet_id = Some(next_packet_id);
                        next_packet_id = next_packet_id.wrapping_add(1).max(1);
                    }
                }
                let disconnect = matches!(packet, Packet::Disconnect);

                write_buf.clear();
                codec::encode(&packet, &mut write_buf);
                if socket.write_all(&write_buf).await.is_err() || disconnect {
                    break;
                }
            }
        }
    }

    state.clients.remove(&client_id);
    debug!(client = %client_id, "MQTT session closed");
}

/// Reads until a CONNECT arrives, answers CONNACK, and returns the
/// effective client id.
async fn await_connect(
    socket: &mut TcpStream,
    read_buf: &mut BytesMut,
    write_buf: &mut BytesMut,
) -> Option<String> {
    let mut chunk = [0u8; 1024];

    loop {
        match codec::decode(read_buf) {
            Ok(Some(Packet::Connect { client_id, .. })) => {
                write_buf.clear();
                codec::encode(
                    &Packet::ConnAck {
                        session_present: false,
                        return_code: 0,
                    },
                    write_buf,
                );
                socket.write_all(write_buf).await.ok()?;

                let effective = if client_id.is_empty() {
                    format!("anon-{}", uuid::Uuid::now_v7().simple())
                } else {
                    client_id
                };
                return Some(effective);
            }
            Ok(Some(other)) => {
                warn!(packet = ?other, "packet before CONNECT, closing");
                return None;
            }
            Ok(None) => {
                let n = socket.read(&mut chunk).await.ok()?;
                if n == 0 {
                    return None;
                }
                read_buf.extend_from_slice(&chunk[..n]);
            }
            Err(e) => {
                warn!(error = %e, "malformed CONNECT, closing");
                return None;
            }
        }
    }
}

/// Processes every complete inbound packet in the buffer. Returns
/// `false` when the session must close.
async fn drain_inbound(
    socket: &mut TcpStream,
    read_buf: &mut BytesMut,
    write_buf: &mut BytesMut,
    state: &Arc<BrokerState>,
    subscriptions: &Arc<DashMap<String, u8>>,
    client_id: &str,
) -> bool {
    loop {
        let packet = match codec::decode(read_buf) {
            Ok(Some(packet)) => packet,
            Ok(None) => return true,
            Err(e) => {
                warn!(client = %client_id, error = %e, "protocol violation, closing");
                return false;
            }
        };

        let mut reply = |packet: Packet, write_buf: &mut BytesMut| {
            write_buf.clear();
            codec::encode(&packet, write_buf);
        };

        match packet {
            Packet::Publish {
                topic,
                payload,
                qos,
                retain,
                packet_id,
                ..
            } => {
                state.route_publish(&topic, &payload, qos, retain);
                if qos > 0 {
                    reply(
                        Packet::PubAck {
                            packet_id: packet_id.unwrap_or(0),
                        },
                        write_buf,
                    );
                    if socket.write_all(write_buf).await.is_err() {
                        return false;
                    }
                }
            }

            Packet::Subscribe { packet_id, filters } => {
                let mut return_codes = Vec::with_capacity(filters.len());
                for (filter, requested_qos) in &filters {
                    let granted = (*requested_qos).min(1);
                    subscriptions.insert(filter.clone(), granted);
                    return_codes.push(granted);
                }

                reply(Packet::SubAck { packet_id, return_codes }, write_buf);
                if socket.write_all(write_buf).await.is_err() {
                    return false;
                }

                // Retained catch-up after the SUBACK: new subscribers
                // get the last known good immediately.
                if let Some(handle) = state.clients.get(client_id) {
                    for (filter, _) in &filters {
                        state.deliver_retained(handle.value(), filter);
                    }
                }
            }

            Packet::Unsubscribe { packet_id, filters } => {
                for filter in &filters {
                    subscriptions.remove(filter);
                }
                reply(Packet::UnsubAck { packet_id }, write_buf);
                if socket.write_all(write_buf).await.is_err() {
                    return false;
                }
            }

            Packet::PingReq => {
                reply(Packet::PingResp, write_buf);
                if socket.write_all(write_buf).await.is_err() {
                    return false;
                }
            }

            // QoS 1 deliveries are fire-and-forget from the broker side;
            // the ack is consumed without redelivery tracking.
            Packet::PubAck { .. } => {}

            Packet::Disconnect => return false,

            other => {
                trace!(client = %client_id, packet = ?other, "ignored packet");
            }
        }
    }
}
