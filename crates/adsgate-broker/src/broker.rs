// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The broker core: listener, client registry, routing, retained store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use adsgate_core::{BrokerError, BrokerResult};

use crate::codec::{topic_matches, Packet};
use crate::session;

// =============================================================================
// Configuration
// =============================================================================

/// Broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Outbound queue depth per client.
    #[serde(default = "default_client_queue")]
    pub client_queue: usize,
}

fn default_client_queue() -> usize {
    256
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1883,
            client_queue: default_client_queue(),
        }
    }
}

/// Publish options for the engine-facing API.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOpts {
    /// Quality of service (0 or 1).
    pub qos: u8,
    /// Store as the retained message for the topic.
    pub retain: bool,
}

impl PublishOpts {
    /// QoS 0, retained.
    pub fn retained() -> Self {
        Self { qos: 0, retain: true }
    }
}

/// Observable broker counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerStats {
    /// Connected clients.
    pub clients: u64,
    /// Active subscriptions across clients.
    pub subscriptions: u64,
    /// Messages published through the broker since startup.
    pub messages_published: u64,
    /// Retained topics.
    pub retained: u64,
}

// =============================================================================
// Shared State
// =============================================================================

pub(crate) struct ClientHandle {
    pub sender: mpsc::Sender<Packet>,
    pub subscriptions: Arc<DashMap<String, u8>>,
}

pub(crate) struct BrokerState {
    pub clients: DashMap<String, ClientHandle>,
    pub retained: DashMap<String, Bytes>,
    pub messages_published: AtomicU64,
    pub dropped: AtomicU64,
    pub client_queue: usize,
}

impl BrokerState {
    /// Routes a publish to every matching subscriber and updates the
    /// retained store. Never blocks; slow clients drop.
    pub fn route_publish(&self, topic: &str, payload: &Bytes, qos: u8, retain: bool) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        if retain {
            if payload.is_empty() {
                // An empty retained publish clears the slot.
                self.retained.remove(topic);
            } else {
                self.retained.insert(topic.to_string(), payload.clone());
            }
        }

        for entry in self.clients.iter() {
            let handle = entry.value();
            let granted = handle
                .subscriptions
                .iter()
                .filter(|sub| topic_matches(sub.key(), topic))
                .map(|sub| *sub.value())
                .max();

            if let Some(granted_qos) = granted {
                let effective_qos = qos.min(granted_qos);
                let packet = Packet::Publish {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                    qos: effective_qos,
                    retain: false,
                    dup: false,
                    // Outbound QoS 1 ids are assigned by the session task.
                    packet_id: if effective_qos > 0 { Some(0) } else { None },
                };

                if handle.sender.try_send(packet).is_err() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(client = %entry.key(), topic, "slow MQTT client, message dropped");
                }
            }
        }
    }

    /// Delivers retained messages matching a new subscription. Retained
    /// catch-up is always QoS 0.
    pub fn deliver_retained(&self, handle: &ClientHandle, filter: &str) {
        for entry in self.retained.iter() {
            if topic_matches(filter, entry.key()) {
                let packet = Packet::Publish {
                    topic: entry.key().clone(),
                    payload: entry.value().clone(),
                    qos: 0,
                    retain: true,
                    dup: false,
                    packet_id: None,
                };
                let _ = handle.sender.try_send(packet);
            }
        }
    }

    pub fn subscription_count(&self) -> u64 {
        self.clients
            .iter()
            .map(|entry| entry.value().subscriptions.len() as u64)
            .sum()
    }
}

// =============================================================================
// MqttBroker
// =============================================================================

/// The embedded broker.
pub struct MqttBroker {
    config: BrokerConfig,
    state: Arc<BrokerState>,
    shutdown_tx: watch::Sender<bool>,
}

impl MqttBroker {
    /// Creates a broker; call [`start`](Self::start) to begin accepting.
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let state = Arc::new(BrokerState {
            clients: DashMap::new(),
            retained: DashMap::new(),
            messages_published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            client_queue: config.client_queue,
        });

        Arc::new(Self {
            config,
            state,
            shutdown_tx,
        })
    }

    /// Binds the listener and spawns the accept loop.
    ///
    /// Returns the actually bound port (useful with port 0 in tests).
    pub async fn start(&self) -> BrokerResult<u16> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| BrokerError::bind(&address, e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| BrokerError::bind(&address, e.to_string()))?
            .port();

        info!(address = %format!("{}:{}", self.config.host, port), "MQTT broker listening");

        let state = self.state.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((socket, peer)) => {
                                debug!(peer = %peer, "MQTT client connected");
                                let state = state.clone();
                                tokio::spawn(session::run(socket, state));
                            }
                            Err(e) => {
                                warn!(error = %e, "MQTT accept failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("MQTT broker accept loop stopped");
                        return;
                    }
                }
            }
        });

        Ok(port)
    }

    /// Publishes a message from the engine.
    pub fn publish(&self, topic: &str, payload: &[u8], opts: PublishOpts) {
        self.state
            .route_publish(topic, &Bytes::copy_from_slice(payload), opts.qos, opts.retain);
    }

    /// Returns the connected client count.
    pub fn client_count(&self) -> usize {
        self.state.clients.len()
    }

    /// Returns the active subscription count.
    pub fn subscription_count(&self) -> u64 {
        self.state.subscription_count()
    }

    /// Returns broker counters.
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            clients: self.state.clients.len() as u64,
            subscriptions: self.state.subscription_count(),
            messages_published: self.state.messages_published.load(Ordering::Relaxed),
            retained: self.state.retained.len() as u64,
        }
    }

    /// Stops the accept loop and disconnects every client.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        for entry in self.state.clients.iter() {
            let _ = entry.value().sender.try_send(Packet::Disconnect);
        }
        self.state.clients.clear();
    }
}

impl std::fmt::Debug for MqttBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBroker")
            .field("port", &self.config.port)
            .field("clients", &self.client_count())
            .finish()
    }
}
