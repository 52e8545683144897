// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # adsgate-broker
//!
//! Embedded MQTT 3.1.1 broker for the ADSGATE gateway.
//!
//! External subscribers connect anonymously over TCP (default 1883);
//! the engine publishes variable values and errors through
//! [`MqttBroker::publish`]. Minimum wire profile: CONNECT, SUBSCRIBE
//! with `+`/`#` wildcards, PUBLISH at QoS 0 and 1, retained messages,
//! PINGREQ, DISCONNECT. No client-side connection is kept; this is the
//! broker.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;

mod broker;
mod session;

pub use broker::{BrokerConfig, BrokerStats, MqttBroker, PublishOpts};
pub use codec::{topic_matches, Packet};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// A tiny in-test client speaking just enough MQTT.
    struct TestClient {
        socket: TcpStream,
        buf: BytesMut,
    }

    impl TestClient {
        async fn connect(port: u16, client_id: &str) -> Self {
            let socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
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
                Packet::ConnAck { return_code: 0, .. } => {}
                other => panic!("expected CONNACK, got {:?}", other),
            }
            client
        }

        async fn send(&mut self, packet: Packet) {
            let mut out = BytesMut::new();
            codec::encode(&packet, &mut out);
            self.socket.write_all(&out).await.unwrap();
        }

        async fn recv(&mut self) -> Packet {
            loop {
                if let Some(packet) = codec::decode(&mut self.buf).unwrap() {
                    return packet;
                }
                let mut chunk = [0u8; 1024];
                let n = tokio::time::timeout(
                    Duration::from_secs(2),
                    self.socket.read(&mut chunk),
                )
                .await
                .expect("recv timeout")
                .unwrap();
                assert!(n > 0, "connection closed");
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }

        async fn subscribe(&mut self, filter: &str, qos: u8) {
            self.send(Packet::Subscribe {
                packet_id: 1,
                filters: vec![(filter.to_string(), qos)],
            })
            .await;
            match self.recv().await {
                Packet::SubAck { .. } => {}
                other => panic!("expected SUBACK, got {:?}", other),
            }
        }
    }

    async fn start_broker() -> (std::sync::Arc<MqttBroker>, u16) {
        let broker = MqttBroker::new(BrokerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            client_queue: 64,
        });
        let port = broker.start().await.unwrap();
        (broker, port)
    }

    #[tokio::test]
    async fn test_connect_and_ping() {
        let (broker, port) = start_broker().await;
        let mut client = TestClient::connect(port, "c1").await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.client_count(), 1);

        client.send(Packet::PingReq).await;
        assert_eq!(client.recv().await, Packet::PingResp);
    }

    #[tokio::test]
    async fn test_engine_publish_reaches_subscriber() {
        let (broker, port) = start_broker().await;
        let mut client = TestClient::connect(port, "sub-1").await;
        client.subscribe("variables/v1/value", 0).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish("variables/v1/value", b"{\"value\":23.5}", PublishOpts::default());

        match client.recv().await {
            Packet::Publish { topic, payload, .. } => {
                assert_eq!(topic, "variables/v1/value");
                assert_eq!(&payload[..], b"{\"value\":23.5}");
            }
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wildcard_subscription() {
        let (broker, port) = start_broker().await;
        let mut client = TestClient::connect(port, "sub-wild").await;
        client.subscribe("variables/+/value", 0).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish("variables/v7/value", b"x", PublishOpts::default());
        broker.publish("variables/v7/error", b"y", PublishOpts::default());

        match client.recv().await {
            Packet::Publish { topic, .. } => assert_eq!(topic, "variables/v7/value"),
            other => panic!("expected PUBLISH, got {:?}", other),
        }
        // The error topic must not arrive.
        client.send(Packet::PingReq).await;
        assert_eq!(client.recv().await, Packet::PingResp);
    }

    #[tokio::test]
    async fn test_retained_delivery_on_subscribe() {
        let (broker, port) = start_broker().await;

        broker.publish("variables/v1/value", b"last-good", PublishOpts::retained());

        let mut client = TestClient::connect(port, "late-sub").await;
        client.subscribe("variables/v1/value", 0).await;

        match client.recv().await {
            Packet::Publish { topic, payload, retain, .. } => {
                assert_eq!(topic, "variables/v1/value");
                assert_eq!(&payload[..], b"last-good");
                assert!(retain);
            }
            other => panic!("expected retained PUBLISH, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_publish_routes_to_other_client() {
        let (_broker, port) = start_broker().await;
        let mut sub = TestClient::connect(port, "sub").await;
        sub.subscribe("commands/#", 0).await;

        let mut publisher = TestClient::connect(port, "pub").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        publisher
            .send(Packet::Publish {
                topic: "commands/reset".to_string(),
                payload: bytes::Bytes::from_static(b"go"),
                qos: 1,
                retain: false,
                dup: false,
                packet_id: Some(11),
            })
            .await;

        // Publisher gets the QoS 1 ack.
        match publisher.recv().await {
            Packet::PubAck { packet_id } => assert_eq!(packet_id, 11),
            other => panic!("expected PUBACK, got {:?}", other),
        }

        // Subscriber receives the message.
        match sub.recv().await {
            Packet::Publish { topic, .. } => assert_eq!(topic, "commands/reset"),
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_qos1_downgraded_to_subscription() {
        let (broker, port) = start_broker().await;
        let mut client = TestClient::connect(port, "q1").await;
        client.subscribe("t", 1).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish("t", b"p", PublishOpts { qos: 1, retain: false });

        match client.recv().await {
            Packet::Publish { qos, packet_id, .. } => {
                assert_eq!(qos, 1);
                assert!(packet_id.is_some());
            }
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (broker, port) = start_broker().await;
        let mut client = TestClient::connect(port, "unsub").await;
        client.subscribe("t", 0).await;

        client
            .send(Packet::Unsubscribe {
                packet_id: 2,
                filters: vec!["t".to_string()],
            })
            .await;
        match client.recv().await {
            Packet::UnsubAck { packet_id } => assert_eq!(packet_id, 2),
            other => panic!("expected UNSUBACK, got {:?}", other),
        }

        broker.publish("t", b"p", PublishOpts::default());

        client.send(Packet::PingReq).await;
        assert_eq!(client.recv().await, Packet::PingResp);
    }

    #[tokio::test]
    async fn test_stats() {
        let (broker, port) = start_broker().await;
        let mut client = TestClient::connect(port, "stats").await;
        client.subscribe("a/#", 0).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        broker.publish("a/b", b"1", PublishOpts::retained());

        let stats = broker.stats();
        assert_eq!(stats.clients, 1);
        assert_eq!(stats.subscriptions, 1);
        assert_eq!(stats.retained, 1);
        assert!(stats.messages_published >= 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_client() {
        let (broker, port) = start_broker().await;
        let mut client = TestClient::connect(port, "bye").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.client_count(), 1);

        client.send(Packet::Disconnect).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.client_count(), 0);
    }
}
