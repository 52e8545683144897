// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Fan-out from the event bus to MQTT topics and WebSocket rooms.
//!
//! Every `variable.changed` becomes a retained MQTT publish on the
//! variable's topic and a typed message to the rooms
//! `connection:<id>`, `variable:<id>`, and `topic:<topic>`.
//!
//! Backpressure: each WebSocket client has a bounded outbound deque;
//! when it fills, the oldest undelivered message is dropped and a
//! counter incremented. The bus is never blocked by a slow client.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use adsgate_broker::{MqttBroker, PublishOpts};
use adsgate_core::{EventBus, GatewayEvent, Quality, Sample};

use crate::manager::ConnectionManager;

// =============================================================================
// Wire Messages
// =============================================================================

/// Client-to-server WebSocket messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Join a connection room.
    #[serde(rename = "subscribe:connection")]
    SubscribeConnection {
        /// Connection id.
        id: String,
    },
    /// Join a variable room.
    #[serde(rename = "subscribe:variable")]
    SubscribeVariable {
        /// Variable id.
        id: String,
    },
    /// Join a topic room.
    #[serde(rename = "subscribe:topic")]
    SubscribeTopic {
        /// MQTT topic.
        topic: String,
    },
    /// Leave a connection room.
    #[serde(rename = "unsubscribe:connection")]
    UnsubscribeConnection {
        /// Connection id.
        id: String,
    },
    /// Leave a variable room.
    #[serde(rename = "unsubscribe:variable")]
    UnsubscribeVariable {
        /// Variable id.
        id: String,
    },
    /// Leave a topic room.
    #[serde(rename = "unsubscribe:topic")]
    UnsubscribeTopic {
        /// MQTT topic.
        topic: String,
    },
    /// Request a variable write (queued; acked by job id).
    #[serde(rename = "variable:write")]
    VariableWrite {
        /// Variable id.
        id: String,
        /// New value as JSON.
        value: serde_json::Value,
    },
    /// Request recent history for a variable.
    #[serde(rename = "variable:history")]
    VariableHistory {
        /// Variable id.
        id: String,
        /// Maximum samples (default 100).
        #[serde(default)]
        limit: Option<usize>,
        /// Inclusive range start (unix ms).
        #[serde(default)]
        start_ms: Option<i64>,
        /// Inclusive range end (unix ms).
        #[serde(default)]
        end_ms: Option<i64>,
    },
}

/// Server-to-client WebSocket messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// A variable produced a new sample.
    #[serde(rename = "variable:changed")]
    VariableChanged {
        /// Variable id.
        id: String,
        /// Sample value as JSON.
        value: serde_json::Value,
        /// Unix ms timestamp.
        timestamp: i64,
        /// Sample quality.
        quality: Quality,
    },
    /// A connection came up.
    #[serde(rename = "connection:established")]
    ConnectionEstablished {
        /// Connection id.
        id: String,
    },
    /// A connection went away.
    #[serde(rename = "connection:lost")]
    ConnectionLost {
        /// Connection id.
        id: String,
        /// Reason text.
        reason: String,
    },
    /// A connection failed.
    #[serde(rename = "connection:error")]
    ConnectionError {
        /// Connection id.
        id: String,
        /// Error text.
        error: String,
    },
    /// Discovery enumerated symbols.
    #[serde(rename = "symbols:discovered")]
    SymbolsDiscovered {
        /// Connection id.
        connection_id: String,
        /// Number of symbols (parents plus children).
        count: usize,
    },
    /// The PLC's schema version moved.
    #[serde(rename = "online-change")]
    OnlineChange {
        /// Connection id.
        connection_id: String,
        /// New counter value.
        counter: u32,
    },
    /// A non-fatal engine error.
    #[serde(rename = "system:error")]
    SystemError {
        /// Producing subsystem.
        source: String,
        /// Error text.
        message: String,
    },
    /// A per-variable warning (read or decode failure).
    #[serde(rename = "system:warning")]
    SystemWarning {
        /// Producing subsystem.
        source: String,
        /// Warning text.
        message: String,
    },
    /// A queued write succeeded.
    #[serde(rename = "variable:write:ack")]
    WriteAck {
        /// Correlation id of the write job.
        #[serde(rename = "jobId")]
        job_id: String,
    },
    /// A queued write failed.
    #[serde(rename = "variable:write:error")]
    WriteError {
        /// Correlation id of the write job.
        #[serde(rename = "jobId")]
        job_id: String,
        /// Terminal error text.
        error: String,
    },
    /// History query result.
    #[serde(rename = "variable:history:result")]
    HistoryResult {
        /// Variable id.
        id: String,
        /// Samples, chronological.
        samples: Vec<serde_json::Value>,
    },
}

/// Renders the MQTT value payload: `{"value","timestamp","quality"}`.
pub fn value_payload(sample: &Sample) -> serde_json::Value {
    serde_json::json!({
        "value": sample.value.to_json(),
        "timestamp": sample.timestamp_ms,
        "quality": sample.quality.as_str(),
    })
}

// =============================================================================
// Rooms
// =============================================================================

/// Builds the room key for a connection.
pub fn connection_room(id: &str) -> String {
    format!("connection:{}", id)
}

/// Builds the room key for a variable.
pub fn variable_room(id: &str) -> String {
    format!("variable:{}", id)
}

/// Builds the room key for a topic.
pub fn topic_room(topic: &str) -> String {
    format!("topic:{}", topic)
}

// =============================================================================
// Clients
// =============================================================================

struct HubClient {
    queue: Mutex<VecDeque<ServerMessage>>,
    notify: Notify,
    rooms: Mutex<HashSet<String>>,
    dropped: AtomicU64,
}

impl HubClient {
    fn push(&self, message: ServerMessage, capacity: usize) -> bool {
        let mut queue = self.queue.lock();
        let mut dropped = false;
        if queue.len() == capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            dropped = true;
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
        dropped
    }
}

/// The handle a WebSocket task drives one client with.
pub struct ClientHandle {
    id: String,
    client: Arc<HubClient>,
    hub: Arc<FanoutHub>,
}

impl ClientHandle {
    /// Returns the hub-assigned client id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Awaits the next outbound message.
    pub async fn next_message(&self) -> ServerMessage {
        loop {
            if let Some(message) = self.client.queue.lock().pop_front() {
                return message;
            }
            self.client.notify.notified().await;
        }
    }

    /// Pushes a message directly to this client (acks, query results).
    pub fn push(&self, message: ServerMessage) {
        self.client.push(message, self.hub.client_queue);
    }

    /// Returns a detachable sender for pushing from spawned tasks
    /// (write acks). The sender does not keep the registration alive.
    pub fn sender(&self) -> ClientSender {
        ClientSender {
            client: Arc::downgrade(&self.client),
            capacity: self.hub.client_queue,
        }
    }

    /// Joins a room.
    pub fn join(&self, room: String) {
        self.client.rooms.lock().insert(room);
    }

    /// Leaves a room.
    pub fn leave(&self, room: &str) {
        self.client.rooms.lock().remove(room);
    }

    /// Messages dropped for this client due to backpressure.
    pub fn dropped(&self) -> u64 {
        self.client.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.hub.unregister(&self.id);
    }
}

/// A weak push-only handle to one client's outbound queue.
#[derive(Clone)]
pub struct ClientSender {
    client: std::sync::Weak<HubClient>,
    capacity: usize,
}

impl ClientSender {
    /// Pushes a message if the client is still connected.
    pub fn push(&self, message: ServerMessage) {
        if let Some(client) = self.client.upgrade() {
            client.push(message, self.capacity);
        }
    }
}

// =============================================================================
// FanoutHub
// =============================================================================

/// Hub counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubStats {
    /// Connected WebSocket clients.
    pub clients: usize,
    /// Total messages dropped across clients.
    pub dropped: u64,
}

/// The fan-out hub.
pub struct FanoutHub {
    clients: DashMap<String, Arc<HubClient>>,
    broker: Arc<MqttBroker>,
    bus: Arc<EventBus>,
    dropped_total: AtomicU64,
    client_queue: usize,
}

impl FanoutHub {
    /// Default per-client outbound queue depth.
    pub const DEFAULT_CLIENT_QUEUE: usize = 256;

    /// Creates the hub.
    pub fn new(bus: Arc<EventBus>, broker: Arc<MqttBroker>) -> Arc<Self> {
        Arc::new(Self {
            clients: DashMap::new(),
            broker,
            bus,
            dropped_total: AtomicU64::new(0),
            client_queue: Self::DEFAULT_CLIENT_QUEUE,
        })
    }

    /// Registers a WebSocket client and returns its handle.
    pub fn register(self: &Arc<Self>) -> ClientHandle {
        let id = format!("ws-{}", uuid::Uuid::now_v7().simple());
        let client = Arc::new(HubClient {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            rooms: Mutex::new(HashSet::new()),
            dropped: AtomicU64::new(0),
        });
        self.clients.insert(id.clone(), client.clone());

        self.bus.emit(GatewayEvent::WsClientConnected { client_id: id.clone() });
        debug!(client_id = %id, "websocket client registered");

        ClientHandle {
            id,
            client,
            hub: self.clone(),
        }
    }

    fn unregister(&self, id: &str) {
        if self.clients.remove(id).is_some() {
            self.bus.emit(GatewayEvent::WsClientDisconnected {
                client_id: id.to_string(),
            });
            debug!(client_id = %id, "websocket client unregistered");
        }
    }

    /// Returns hub counters.
    pub fn stats(&self) -> HubStats {
        HubStats {
            clients: self.clients.len(),
            dropped: self.dropped_total.load(Ordering::Relaxed),
        }
    }

    /// Broadcasts to every client in a room.
    fn broadcast(&self, room: &str, message: &ServerMessage) {
        for entry in self.clients.iter() {
            if entry.value().rooms.lock().contains(room) {
                if entry.value().push(message.clone(), self.client_queue) {
                    self.dropped_total.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Broadcasts to every client regardless of rooms.
    fn broadcast_all(&self, message: &ServerMessage) {
        for entry in self.clients.iter() {
            if entry.value().push(message.clone(), self.client_queue) {
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Spawns the bridge task translating bus events to MQTT and rooms.
    pub fn start(self: &Arc<Self>, manager: Arc<ConnectionManager>) -> JoinHandle<()> {
        let hub = self.clone();
        let mut stream = self.bus.subscribe("*");

        tokio::spawn(async move {
            while let Ok(event) = stream.recv().await {
                hub.dispatch(&manager, event);
            }
        })
    }

    fn dispatch(&self, manager: &Arc<ConnectionManager>, event: GatewayEvent) {
        match event {
            GatewayEvent::VariableChanged {
                connection_id,
                variable_id,
                sample,
            } => {
                let topic = manager
                    .variable(&variable_id)
                    .map(|v| v.config.value_topic())
                    .unwrap_or_else(|| format!("variables/{}/value", variable_id));

                // Value topics are retained: new subscribers get the
                // last known good immediately.
                let payload = value_payload(&sample);
                self.broker.publish(
                    &topic,
                    payload.to_string().as_bytes(),
                    PublishOpts::retained(),
                );

                let message = ServerMessage::VariableChanged {
                    id: variable_id.to_string(),
                    value: sample.value.to_json(),
                    timestamp: sample.timestamp_ms,
                    quality: sample.quality,
                };
                self.broadcast(&variable_room(variable_id.as_str()), &message);
                self.broadcast(&connection_room(connection_id.as_str()), &message);
                self.broadcast(&topic_room(&topic), &message);
            }

            GatewayEvent::VariableError {
                connection_id,
                variable_id,
                error,
                timestamp_ms,
            } => {
                let topic = format!("variables/{}/error", variable_id);
                let payload = serde_json::json!({ "error": error, "timestamp": timestamp_ms });
                self.broker.publish(
                    &topic,
                    payload.to_string().as_bytes(),
                    PublishOpts::default(),
                );

                let message = ServerMessage::SystemWarning {
                    source: format!("variable:{}", variable_id),
                    message: error,
                };
                self.broadcast(&variable_room(variable_id.as_str()), &message);
                self.broadcast(&connection_room(connection_id.as_str()), &message);
            }

            GatewayEvent::ConnectionEstablished { connection_id } => {
                self.broadcast(
                    &connection_room(connection_id.as_str()),
                    &ServerMessage::ConnectionEstablished {
                        id: connection_id.to_string(),
                    },
                );
            }

            GatewayEvent::ConnectionLost { connection_id, reason } => {
                self.broadcast(
                    &connection_room(connection_id.as_str()),
                    &ServerMessage::ConnectionLost {
                        id: connection_id.to_string(),
                        reason,
                    },
                );
            }

            GatewayEvent::ConnectionError { connection_id, error } => {
                self.broadcast(
                    &connection_room(connection_id.as_str()),
                    &ServerMessage::ConnectionError {
                        id: connection_id.to_string(),
                        error,
                    },
                );
            }

            GatewayEvent::DiscoverySymbols { connection_id, symbols } => {
                self.broadcast(
                    &connection_room(connection_id.as_str()),
                    &ServerMessage::SymbolsDiscovered {
                        connection_id: connection_id.to_string(),
                        count: symbols.len(),
                    },
                );
            }

            GatewayEvent::OnlineChange { connection_id, counter } => {
                self.broadcast(
                    &connection_room(connection_id.as_str()),
                    &ServerMessage::OnlineChange {
                        connection_id: connection_id.to_string(),
                        counter,
                    },
                );
            }

            GatewayEvent::SystemError { source, message } => {
                self.broadcast_all(&ServerMessage::SystemError { source, message });
            }

            // Cache, performance, queue, and ws lifecycle events stay
            // internal.
            _ => {}
        }
    }
}

impl std::fmt::Debug for FanoutHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutHub")
            .field("clients", &self.clients.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use adsgate_broker::BrokerConfig;
    use adsgate_core::Value;

    fn hub() -> Arc<FanoutHub> {
        let bus = EventBus::new(64);
        let broker = MqttBroker::new(BrokerConfig::default());
        FanoutHub::new(bus, broker)
    }

    #[tokio::test]
    async fn test_room_membership_filtering() {
        let hub = hub();
        let handle = hub.register();
        handle.join(variable_room("v1"));

        let message = ServerMessage::VariableChanged {
            id: "v1".to_string(),
            value: serde_json::json!(1.0),
            timestamp: 1,
            quality: Quality::Good,
        };
        hub.broadcast(&variable_room("v1"), &message);
        hub.broadcast(&variable_room("v2"), &message);

        // Exactly one copy arrives (the v2 room broadcast is filtered).
        let received = handle.next_message().await;
        assert!(matches!(received, ServerMessage::VariableChanged { .. }));
        assert!(hub.clients.get(handle.id()).unwrap().queue.lock().is_empty());
    }

    #[tokio::test]
    async fn test_drop_oldest_backpressure() {
        let hub = hub();
        let handle = hub.register();
        handle.join(topic_room("t"));

        for i in 0..(FanoutHub::DEFAULT_CLIENT_QUEUE + 10) {
            hub.broadcast(
                &topic_room("t"),
                &ServerMessage::VariableChanged {
                    id: format!("v{}", i),
                    value: serde_json::json!(i),
                    timestamp: i as i64,
                    quality: Quality::Good,
                },
            );
        }

        assert_eq!(handle.dropped(), 10);
        assert_eq!(hub.stats().dropped, 10);

        // The oldest messages were dropped: the head is message 10.
        match handle.next_message().await {
            ServerMessage::VariableChanged { id, .. } => assert_eq!(id, "v10"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unregister_on_drop() {
        let hub = hub();
        {
            let _handle = hub.register();
            assert_eq!(hub.stats().clients, 1);
        }
        assert_eq!(hub.stats().clients, 0);
    }

    #[test]
    fn test_value_payload_shape() {
        let sample = Sample::at(1_700_000_000_000, Value::Float(23.5), Quality::Good);
        let payload = value_payload(&sample);

        assert_eq!(payload["value"], serde_json::json!(23.5));
        assert_eq!(payload["timestamp"], serde_json::json!(1_700_000_000_000i64));
        assert_eq!(payload["quality"], serde_json::json!("good"));
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe:variable","id":"v1"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SubscribeVariable { .. }));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"variable:write","id":"v1","value":42.0}"#).unwrap();
        match msg {
            ClientMessage::VariableWrite { id, value } => {
                assert_eq!(id, "v1");
                assert_eq!(value, serde_json::json!(42.0));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_server_message_rendering() {
        let message = ServerMessage::WriteAck {
            job_id: "0190-abc".to_string(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "variable:write:ack");
        assert_eq!(json["jobId"], "0190-abc");
    }
}
