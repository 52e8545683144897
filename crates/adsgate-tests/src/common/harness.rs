// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The engine test harness.
//!
//! Starts a full engine against ephemeral ports, a temp-dir store, the
//! in-memory queue backend, and an unreachable cache (exercising the
//! degraded path). External services are never required.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use adsgate_api::{ApiConfig, ApiServer, AppState};
use adsgate_broker::codec::{self, Packet};
use adsgate_broker::BrokerConfig;
use adsgate_cache::CacheConfig;
use adsgate_core::RetryConfig;
use adsgate_engine::{Engine, EngineConfig, Gateway, QueueBackendKind};
use adsgate_queue::QueueConfig;
use adsgate_store::StoreConfig;

/// A running engine with everything a scenario test needs.
pub struct EngineHarness {
    engine: Option<Engine>,
    /// The facade.
    pub gateway: Arc<Gateway>,
    /// The bound MQTT port.
    pub mqtt_port: u16,
    _dir: tempfile::TempDir,
}

impl EngineHarness {
    /// Starts an engine on ephemeral ports.
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");

        let config = EngineConfig {
            mqtt: BrokerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                ..Default::default()
            },
            cache: CacheConfig {
                host: "127.0.0.1".to_string(),
                port: 1, // nothing listens: degraded mode
                op_timeout: Duration::from_millis(50),
            },
            store: StoreConfig {
                path: dir.path().join("db"),
                compression: false,
            },
            queue: QueueConfig {
                worker_count: 2,
                poll_idle: Duration::from_millis(5),
                backoff: RetryConfig {
                    initial_delay: Duration::from_millis(20),
                    max_delay: Duration::from_millis(100),
                    ..Default::default()
                },
                ..Default::default()
            },
            queue_backend: QueueBackendKind::Memory,
            metrics_interval: Duration::from_secs(3600),
            ..Default::default()
        };

        let engine = Engine::start(config).await.expect("engine start");
        let gateway = engine.gateway();
        let mqtt_port = engine.mqtt_port;

        Self {
            engine: Some(engine),
            gateway,
            mqtt_port,
            _dir: dir,
        }
    }

    /// Serves the admin API on an ephemeral port; returns its address.
    pub async fn serve_api(&self) -> (SocketAddr, JoinHandle<()>) {
        let state = AppState::new(self.gateway.clone());
        let router = ApiServer::new(state, ApiConfig::default()).router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind api");
        let addr = listener.local_addr().expect("api addr");

        let task = tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });

        (addr, task)
    }

    /// Shuts the engine down gracefully.
    pub async fn shutdown(mut self) {
        if let Some(engine) = self.engine.take() {
            engine.shutdown().await;
        }
    }
}

/// Polls a condition until it holds or the timeout expires.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// MQTT Test Client
// =============================================================================

/// A minimal MQTT 3.1.1 client for observing the embedded broker.
pub struct MqttTestClient {
    socket: TcpStream,
    buf: BytesMut,
}

impl MqttTestClient {
    /// Connects and completes the CONNECT/CONNACK handshake.
    pub async fn connect(port: u16, client_id: &str) -> Self {
        let socket = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("mqtt connect");
        let mut client = Self {
            socket,
            buf: BytesMut::new(),
        };

        client
            .send(Packet::Connect {
                client_id: client_id.to_string(),
                clean_session: true,
                keep_alive: 30,
            })
            .await;

        match client.recv().await {
            Packet::ConnAck { return_code: 0, .. } => client,
            other => panic!("expected CONNACK, got {:?}", other),
        }
    }

    /// Sends one packet.
    pub async fn send(&mut self, packet: Packet) {
        let mut out = BytesMut::new();
        codec::encode(&packet, &mut out);
        self.socket.write_all(&out).await.expect("mqtt send");
    }

    /// Receives the next packet (2 s timeout).
    pub async fn recv(&mut self) -> Packet {
        loop {
            if let Some(packet) = codec::decode(&mut self.buf).expect("mqtt decode") {
                return packet;
            }
            let mut chunk = [0u8; 1024];
            let n = tokio::time::timeout(Duration::from_secs(2), self.socket.read(&mut chunk))
                .await
                .expect("mqtt recv timeout")
                .expect("mqtt read");
            assert!(n > 0, "broker closed the connection");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Subscribes to one filter and awaits the SUBACK.
    pub async fn subscribe(&mut self, filter: &str) {
        self.send(Packet::Subscribe {
            packet_id: 1,
            filters: vec![(filter.to_string(), 0)],
        })
        .await;
        match self.recv().await {
            Packet::SubAck { .. } => {}
            other => panic!("expected SUBACK, got {:?}", other),
        }
    }

    /// Receives until a PUBLISH arrives; returns topic and JSON payload.
    pub async fn recv_publish(&mut self) -> (String, serde_json::Value) {
        loop {
            if let Packet::Publish { topic, payload, .. } = self.recv().await {
                let json = serde_json::from_slice(&payload).expect("json payload");
                return (topic, json);
            }
        }
    }
}
