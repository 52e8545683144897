// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! AMS transport: one TCP connection to an ADS router.
//!
//! A single reader task owns the socket's read half. Responses are
//! correlated to requests by invoke id through a pending-request map;
//! server-pushed DeviceNotification frames are routed to per-handle
//! channels without touching the request path.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{AdsError, AdsResult};
use crate::proto::{
    self, AmsHeader, NotificationSample, AMS_HEADER_LEN, TCP_HEADER_LEN,
};
use crate::types::{state_flags, AdsCommand, AmsAddr, AmsNetId, SessionConfig};

/// Upper bound on a single frame body; anything larger is a protocol
/// violation rather than a legitimate symbol upload.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

type PendingMap = DashMap<u32, oneshot::Sender<(AmsHeader, Bytes)>>;
type NotificationMap = DashMap<u32, mpsc::Sender<NotificationSample>>;

// =============================================================================
// AmsTransport
// =============================================================================

/// A connected AMS transport.
pub struct AmsTransport {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    local: AmsAddr,
    target: AmsAddr,
    next_invoke: AtomicU32,
    pending: Arc<PendingMap>,
    notifications: Arc<NotificationMap>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    request_timeout: Duration,
}

impl AmsTransport {
    /// Opens a TCP connection to the router and registers the local AMS
    /// address derived from the socket's local IP and the configured
    /// source port.
    pub async fn connect(config: &SessionConfig) -> AdsResult<Self> {
        let address = config.socket_addr();

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| AdsError::timeout(config.connect_timeout))?
            .map_err(|e| AdsError::connect(&address, e.to_string()))?;

        stream.set_nodelay(true).ok();

        let local_ip = match stream.local_addr() {
            Ok(std::net::SocketAddr::V4(v4)) => *v4.ip(),
            _ => std::net::Ipv4Addr::LOCALHOST,
        };
        let local = AmsAddr::new(AmsNetId::from_ipv4(local_ip), config.source_port);

        let (read_half, write_half) = stream.into_split();

        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let notifications: Arc<NotificationMap> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(reader_loop(
            read_half,
            pending.clone(),
            notifications.clone(),
            closed.clone(),
        ));

        debug!(router = %address, local = %local, target = %config.target, "AMS transport connected");

        Ok(Self {
            writer: tokio::sync::Mutex::new(write_half),
            local,
            target: config.target,
            next_invoke: AtomicU32::new(1),
            pending,
            notifications,
            closed,
            reader,
            request_timeout: config.request_timeout,
        })
    }

    /// Returns the registered local AMS address.
    pub fn local_addr(&self) -> AmsAddr {
        self.local
    }

    /// Returns `true` while the socket is usable.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Sends a request and awaits the correlated response payload.
    ///
    /// `operation` names the caller for error context.
    pub async fn request(
        &self,
        command: AdsCommand,
        payload: Bytes,
        operation: &str,
    ) -> AdsResult<Bytes> {
        if !self.is_open() {
            return Err(AdsError::NotConnected);
        }

        let invoke_id = self.next_invoke.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(invoke_id, tx);

        let header = AmsHeader {
            target: self.target,
            source: self.local,
            command: command as u16,
            state_flags: state_flags::REQUEST,
            length: payload.len() as u32,
            error_code: 0,
            invoke_id,
        };
        let frame = proto::write_frame(&header, &payload);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.write_all(&frame).await {
                self.pending.remove(&invoke_id);
                self.closed.store(true, Ordering::SeqCst);
                return Err(AdsError::Io(e));
            }
        }

        trace!(invoke_id, command = ?command, operation, "ads request sent");

        let (response, data) = match timeout(self.request_timeout, rx).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => return Err(AdsError::TransportClosed),
            Err(_) => {
                self.pending.remove(&invoke_id);
                return Err(AdsError::timeout(self.request_timeout));
            }
        };

        if response.error_code != 0 {
            return Err(AdsError::device(response.error_code, operation));
        }

        Ok(data)
    }

    /// Registers a notification sample channel for a handle.
    pub fn register_notification(&self, handle: u32, sender: mpsc::Sender<NotificationSample>) {
        self.notifications.insert(handle, sender);
    }

    /// Removes the notification channel for a handle.
    pub fn unregister_notification(&self, handle: u32) {
        self.notifications.remove(&handle);
    }

    /// Closes the transport. In-flight requests fail with
    /// [`AdsError::TransportClosed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.reader.abort();
            self.pending.clear();
            self.notifications.clear();
        }
    }
}

impl Drop for AmsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for AmsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmsTransport")
            .field("local", &self.local)
            .field("target", &self.target)
            .field("open", &self.is_open())
            .finish()
    }
}

// =============================================================================
// Reader Loop
// =============================================================================

async fn reader_loop(
    mut read_half: OwnedReadHalf,
    pending: Arc<PendingMap>,
    notifications: Arc<NotificationMap>,
    closed: Arc<AtomicBool>,
) {
    loop {
        match read_one_frame(&mut read_half).await {
            Ok((header, payload)) => {
                dispatch_frame(header, payload, &pending, &notifications);
            }
            Err(e) => {
                if !closed.swap(true, Ordering::SeqCst) {
                    debug!(error = %e, "AMS transport reader stopped");
                }
                // Dropping the senders wakes every waiter with an error.
                pending.clear();
                notifications.clear();
                return;
            }
        }
    }
}

async fn read_one_frame(read_half: &mut OwnedReadHalf) -> AdsResult<(AmsHeader, Bytes)> {
    let mut tcp_header = [0u8; TCP_HEADER_LEN];
    read_half.read_exact(&mut tcp_header).await?;

    let body_len = u32::from_le_bytes(tcp_header[2..6].try_into().unwrap_or_default()) as usize;
    if body_len < AMS_HEADER_LEN || body_len > MAX_FRAME_LEN {
        return Err(AdsError::frame(format!("implausible frame length {}", body_len)));
    }

    let mut body = vec![0u8; body_len];
    read_half.read_exact(&mut body).await?;

    proto::parse_frame(Bytes::from(body))
}

fn dispatch_frame(
    header: AmsHeader,
    payload: Bytes,
    pending: &PendingMap,
    notifications: &NotificationMap,
) {
    if header.command() == Some(AdsCommand::DeviceNotification) && !header.is_response() {
        match proto::parse_notification_stream(payload) {
            Ok(samples) => {
                for sample in samples {
                    if let Some(sender) = notifications.get(&sample.handle) {
                        if sender.try_send(sample.clone()).is_err() {
                            warn!(handle = sample.handle, "notification channel full, sample dropped");
                        }
                    } else {
                        trace!(handle = sample.handle, "notification for unknown handle");
                    }
                }
            }
            Err(e) => warn!(error = %e, "malformed notification stream"),
        }
        return;
    }

    if header.is_response() {
        if let Some((_, tx)) = pending.remove(&header.invoke_id) {
            let _ = tx.send((header, payload));
        } else {
            trace!(invoke_id = header.invoke_id, "response for unknown invoke id");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn test_config(port: u16) -> SessionConfig {
        SessionConfig {
            host: "127.0.0.1".to_string(),
            port,
            target: AmsAddr::new(AmsNetId::new([127, 0, 0, 1, 1, 1]), 801),
            source_port: 32750,
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_millis(200),
        }
    }

    /// A one-shot echo router: answers every request with an empty
    /// success response for the same invoke id.
    async fn spawn_echo_router() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            loop {
                let mut tcp_header = [0u8; TCP_HEADER_LEN];
                if socket.read_exact(&mut tcp_header).await.is_err() {
                    return;
                }
                let len = u32::from_le_bytes(tcp_header[2..6].try_into().unwrap()) as usize;
                let mut body = vec![0u8; len];
                if socket.read_exact(&mut body).await.is_err() {
                    return;
                }
                let (header, _) = proto::parse_frame(Bytes::from(body)).unwrap();

                let response = AmsHeader {
                    target: header.source,
                    source: header.target,
                    command: header.command,
                    state_flags: state_flags::RESPONSE,
                    length: 4,
                    error_code: 0,
                    invoke_id: header.invoke_id,
                };
                let frame = proto::write_frame(&response, &proto::write_response(0));
                if socket.write_all(&frame).await.is_err() {
                    return;
                }
            }
        });

        port
    }

    #[tokio::test]
    async fn test_connect_and_request() {
        let port = spawn_echo_router().await;
        let transport = AmsTransport::connect(&test_config(port)).await.unwrap();

        assert!(transport.is_open());
        assert_eq!(transport.local_addr().port, 32750);

        let payload = transport
            .request(AdsCommand::Write, proto::write_request(0xF006, 0, &[0; 4]), "release")
            .await
            .unwrap();
        proto::parse_write_response(payload, "release").unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_requests_correlate() {
        let port = spawn_echo_router().await;
        let transport = Arc::new(AmsTransport::connect(&test_config(port)).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let transport = transport.clone();
            handles.push(tokio::spawn(async move {
                transport
                    .request(AdsCommand::Read, proto::read_request(0xF005, 0, 4), "read")
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind-then-drop gives a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = AmsTransport::connect(&test_config(port)).await;
        assert!(matches!(result, Err(AdsError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        // A listener that accepts but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let transport = AmsTransport::connect(&test_config(port)).await.unwrap();
        let result = transport
            .request(AdsCommand::Read, proto::read_request(0xF005, 0, 4), "read")
            .await;
        assert!(matches!(result, Err(AdsError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_requests() {
        let port = spawn_echo_router().await;
        let transport = AmsTransport::connect(&test_config(port)).await.unwrap();

        transport.close();
        let result = transport
            .request(AdsCommand::Read, proto::read_request(0xF005, 0, 4), "read")
            .await;
        assert!(matches!(result, Err(AdsError::NotConnected)));
    }
}
