// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-process typed event bus.
//!
//! Events carry disjoint payloads and are addressed by hierarchical
//! dot-separated topics (`variable.changed`, `connection.lost`,
//! `cache.hit`, ...). Subscribers register with an exact topic, a
//! `prefix.*` wildcard, or `*` for everything.
//!
//! # Ordering
//!
//! Emission from a single task reaches any single subscriber in emission
//! order; relative ordering between different emitters is unspecified.
//! Slow subscribers drop events (counted) rather than blocking emitters.
//!
//! # Example
//!
//! ```rust,ignore
//! use adsgate_core::event::{EventBus, GatewayEvent};
//!
//! let bus = EventBus::new(1024);
//! let mut stream = bus.subscribe("variable.*");
//! bus.emit(GatewayEvent::variable_changed(conn_id, var_id, sample));
//! let event = stream.recv().await.unwrap();
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::types::{
    ConnectionId, OperationMetric, Sample, SymbolInfo, VariableConfig, VariableId,
};

// =============================================================================
// Events
// =============================================================================

/// Cache event kinds, one per cache operation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEventKind {
    /// A read was served from the cache.
    Hit,
    /// A read missed (or the backend was degraded).
    Miss,
    /// A value was written.
    Set,
    /// A key was deleted.
    Delete,
    /// A pattern invalidation removed keys.
    Invalidate,
}

/// All events carried on the bus, with their topic hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GatewayEvent {
    /// A variable produced a new sample. Topic: `variable.changed`.
    VariableChanged {
        /// Owning connection, annotated by the connection manager.
        connection_id: ConnectionId,
        /// The variable.
        variable_id: VariableId,
        /// The new sample.
        sample: Sample,
    },

    /// A variable operation failed. Topic: `variable.error`.
    VariableError {
        /// Owning connection.
        connection_id: ConnectionId,
        /// The variable.
        variable_id: VariableId,
        /// Error text.
        error: String,
        /// Unix timestamp in milliseconds.
        timestamp_ms: i64,
    },

    /// A session connected. Topic: `connection.established`.
    ConnectionEstablished {
        /// The connection.
        connection_id: ConnectionId,
    },

    /// A session was closed intentionally. Topic: `connection.lost`.
    ConnectionLost {
        /// The connection.
        connection_id: ConnectionId,
        /// Reason text.
        reason: String,
    },

    /// A session failed. Topic: `connection.error`.
    ConnectionError {
        /// The connection.
        connection_id: ConnectionId,
        /// Error text.
        error: String,
    },

    /// Discovery enumerated the symbol table. Topic: `discovery.symbols`.
    DiscoverySymbols {
        /// The connection.
        connection_id: ConnectionId,
        /// Surviving symbols (parents plus expanded children).
        symbols: Vec<SymbolInfo>,
    },

    /// Discovery derived new variables. Topic: `discovery.variables_added`.
    DiscoveryVariablesAdded {
        /// The connection.
        connection_id: ConnectionId,
        /// Derived variable configurations.
        variables: Vec<VariableConfig>,
    },

    /// The PLC's OnlineChange counter moved. Topic: `discovery.online_change`.
    OnlineChange {
        /// The connection.
        connection_id: ConnectionId,
        /// The new counter value.
        counter: u32,
    },

    /// A cache operation completed. Topic: `cache.<kind>`.
    Cache {
        /// Operation outcome.
        kind: CacheEventKind,
        /// Affected key or pattern.
        key: String,
    },

    /// A timed operation sample. Topic: `performance.metric`.
    PerformanceMetric(OperationMetric),

    /// A queue job exhausted its retries. Topic: `queue.job_failed`.
    QueueJobFailed {
        /// Queue name.
        queue: String,
        /// Job id.
        job_id: String,
        /// Last error text.
        error: String,
    },

    /// A WebSocket client connected. Topic: `ws.client.connected`.
    WsClientConnected {
        /// Hub-assigned client id.
        client_id: String,
    },

    /// A WebSocket client disconnected. Topic: `ws.client.disconnected`.
    WsClientDisconnected {
        /// Hub-assigned client id.
        client_id: String,
    },

    /// A non-fatal engine error. Topic: `system.error`.
    SystemError {
        /// Subsystem that produced the error.
        source: String,
        /// Error text.
        message: String,
    },
}

impl GatewayEvent {
    /// Returns the hierarchical topic of this event.
    pub fn topic(&self) -> &'static str {
        match self {
            GatewayEvent::VariableChanged { .. } => "variable.changed",
            GatewayEvent::VariableError { .. } => "variable.error",
            GatewayEvent::ConnectionEstablished { .. } => "connection.established",
            GatewayEvent::ConnectionLost { .. } => "connection.lost",
            GatewayEvent::ConnectionError { .. } => "connection.error",
            GatewayEvent::DiscoverySymbols { .. } => "discovery.symbols",
            GatewayEvent::DiscoveryVariablesAdded { .. } => "discovery.variables_added",
            GatewayEvent::OnlineChange { .. } => "discovery.online_change",
            GatewayEvent::Cache { kind, .. } => match kind {
                CacheEventKind::Hit => "cache.hit",
                CacheEventKind::Miss => "cache.miss",
                CacheEventKind::Set => "cache.set",
                CacheEventKind::Delete => "cache.delete",
                CacheEventKind::Invalidate => "cache.invalidate",
            },
            GatewayEvent::PerformanceMetric(_) => "performance.metric",
            GatewayEvent::QueueJobFailed { .. } => "queue.job_failed",
            GatewayEvent::WsClientConnected { .. } => "ws.client.connected",
            GatewayEvent::WsClientDisconnected { .. } => "ws.client.disconnected",
            GatewayEvent::SystemError { .. } => "system.error",
        }
    }

    /// Creates a `variable.changed` event.
    pub fn variable_changed(
        connection_id: ConnectionId,
        variable_id: VariableId,
        sample: Sample,
    ) -> Self {
        Self::VariableChanged {
            connection_id,
            variable_id,
            sample,
        }
    }

    /// Creates a `variable.error` event stamped with the current clock.
    pub fn variable_error(
        connection_id: ConnectionId,
        variable_id: VariableId,
        error: impl Into<String>,
    ) -> Self {
        Self::VariableError {
            connection_id,
            variable_id,
            error: error.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Creates a `system.error` event.
    pub fn system_error(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SystemError {
            source: source.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Topic Patterns
// =============================================================================

/// A subscription pattern: exact topic, `prefix.*`, or `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    All,
    Prefix(String),
    Exact(String),
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            Pattern::All
        } else if let Some(prefix) = pattern.strip_suffix(".*") {
            Pattern::Prefix(format!("{}.", prefix))
        } else {
            Pattern::Exact(pattern.to_string())
        }
    }

    fn matches(&self, topic: &str) -> bool {
        match self {
            Pattern::All => true,
            Pattern::Prefix(prefix) => topic.starts_with(prefix.as_str()),
            Pattern::Exact(exact) => topic == exact,
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Statistics for the event bus.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BusStats {
    /// Total events emitted.
    pub emitted: u64,
    /// Total deliveries to subscriber channels.
    pub delivered: u64,
    /// Deliveries dropped because a subscriber lagged.
    pub dropped: u64,
    /// Current number of subscribers.
    pub subscriber_count: u64,
}

struct Subscriber {
    pattern: Pattern,
    tx: mpsc::Sender<GatewayEvent>,
}

/// The in-process event bus.
///
/// Cheap to clone via `Arc`; emission never blocks and never suspends.
pub struct EventBus {
    subscribers: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
    capacity: usize,
    emitted: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    debug: AtomicBool,
    /// Ring of recent performance samples for cheap percentile queries.
    recent_metrics: RwLock<VecDeque<OperationMetric>>,
    recent_capacity: usize,
}

impl EventBus {
    /// Default number of retained performance samples.
    pub const DEFAULT_RECENT_CAPACITY: usize = 1024;

    /// Creates a bus whose subscriber channels hold `capacity` events.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity,
            emitted: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            debug: AtomicBool::new(false),
            recent_metrics: RwLock::new(VecDeque::with_capacity(Self::DEFAULT_RECENT_CAPACITY)),
            recent_capacity: Self::DEFAULT_RECENT_CAPACITY,
        })
    }

    /// Enables or disables verbose per-event logging (`DEBUG_EVENTS`).
    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    /// Subscribes to a topic pattern.
    ///
    /// Accepts an exact topic (`variable.changed`), a trailing wildcard
    /// (`variable.*`), or `*`.
    pub fn subscribe(&self, pattern: &str) -> EventStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers.insert(
            id,
            Subscriber {
                pattern: Pattern::parse(pattern),
                tx,
            },
        );

        EventStream { rx }
    }

    /// Emits an event to all matching subscribers.
    ///
    /// Returns the number of subscribers the event was delivered to.
    pub fn emit(&self, event: GatewayEvent) -> usize {
        let topic = event.topic();
        self.emitted.fetch_add(1, Ordering::Relaxed);

        if self.debug.load(Ordering::Relaxed) {
            tracing::debug!(topic, event = ?event, "bus emit");
        }

        if let GatewayEvent::PerformanceMetric(metric) = &event {
            let mut recent = self.recent_metrics.write();
            if recent.len() == self.recent_capacity {
                recent.pop_front();
            }
            recent.push_back(metric.clone());
        }

        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            if !entry.value().pattern.matches(topic) {
                continue;
            }
            match entry.value().tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(topic, "event bus subscriber lagged, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(*entry.key());
                }
            }
        }

        for id in closed {
            self.subscribers.remove(&id);
        }

        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered as usize
    }

    /// Returns the current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns current statistics.
    pub fn stats(&self) -> BusStats {
        BusStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            subscriber_count: self.subscribers.len() as u64,
        }
    }

    /// Average duration of recent samples for one operation, if any.
    pub fn recent_average(&self, operation: &str) -> Option<f64> {
        let recent = self.recent_metrics.read();
        let durations: Vec<u64> = recent
            .iter()
            .filter(|m| m.operation == operation)
            .map(|m| m.duration_ns)
            .collect();
        if durations.is_empty() {
            return None;
        }
        Some(durations.iter().sum::<u64>() as f64 / durations.len() as f64)
    }

    /// Percentile (0.0..=1.0) of recent sample durations for one operation.
    pub fn recent_percentile(&self, operation: &str, percentile: f64) -> Option<u64> {
        let recent = self.recent_metrics.read();
        let mut durations: Vec<u64> = recent
            .iter()
            .filter(|m| m.operation == operation)
            .map(|m| m.duration_ns)
            .collect();
        if durations.is_empty() {
            return None;
        }
        durations.sort_unstable();
        let rank = ((durations.len() - 1) as f64 * percentile.clamp(0.0, 1.0)).round() as usize;
        Some(durations[rank])
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscribers.len())
            .field("emitted", &self.emitted.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Event Stream
// =============================================================================

/// A subscriber's receiving end.
pub struct EventStream {
    rx: mpsc::Receiver<GatewayEvent>,
}

impl EventStream {
    /// Receives the next event.
    ///
    /// Returns `Err(BusError::Closed)` once the bus is dropped.
    pub async fn recv(&mut self) -> Result<GatewayEvent, BusError> {
        self.rx.recv().await.ok_or(BusError::Closed)
    }

    /// Tries to receive an event without waiting.
    pub fn try_recv(&mut self) -> Option<GatewayEvent> {
        self.rx.try_recv().ok()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Quality, Value};

    fn sample(v: f64) -> Sample {
        Sample::at(1_000, Value::Float(v), Quality::Good)
    }

    #[tokio::test]
    async fn test_exact_subscription() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe("variable.changed");

        let delivered = bus.emit(GatewayEvent::variable_changed(
            ConnectionId::new("c1"),
            VariableId::new("v1"),
            sample(1.0),
        ));
        assert_eq!(delivered, 1);

        let event = stream.recv().await.unwrap();
        assert_eq!(event.topic(), "variable.changed");
    }

    #[tokio::test]
    async fn test_wildcard_subscription() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe("variable.*");

        bus.emit(GatewayEvent::variable_error(
            ConnectionId::new("c1"),
            VariableId::new("v1"),
            "decode failed",
        ));
        bus.emit(GatewayEvent::ConnectionEstablished {
            connection_id: ConnectionId::new("c1"),
        });

        let event = stream.recv().await.unwrap();
        assert_eq!(event.topic(), "variable.error");
        // connection.established must not reach a variable.* subscriber
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_star_matches_everything() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe("*");

        bus.emit(GatewayEvent::system_error("engine", "boom"));
        let event = stream.recv().await.unwrap();
        assert_eq!(event.topic(), "system.error");
    }

    #[tokio::test]
    async fn test_per_emitter_ordering() {
        let bus = EventBus::new(64);
        let mut stream = bus.subscribe("variable.changed");

        for i in 0..10 {
            bus.emit(GatewayEvent::variable_changed(
                ConnectionId::new("c1"),
                VariableId::new("v1"),
                sample(i as f64),
            ));
        }

        for i in 0..10 {
            match stream.recv().await.unwrap() {
                GatewayEvent::VariableChanged { sample, .. } => {
                    assert_eq!(sample.value.as_f64(), Some(i as f64));
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_drops() {
        let bus = EventBus::new(2);
        let _stream = bus.subscribe("variable.changed");

        for i in 0..5 {
            bus.emit(GatewayEvent::variable_changed(
                ConnectionId::new("c1"),
                VariableId::new("v1"),
                sample(i as f64),
            ));
        }

        let stats = bus.stats();
        assert_eq!(stats.emitted, 5);
        assert_eq!(stats.dropped, 3);
    }

    #[tokio::test]
    async fn test_closed_subscriber_removed() {
        let bus = EventBus::new(16);
        {
            let _stream = bus.subscribe("*");
            assert_eq!(bus.subscriber_count(), 1);
        }
        // dropped receiver is pruned on the next emit
        bus.emit(GatewayEvent::system_error("engine", "x"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_recent_metrics_window() {
        let bus = EventBus::new(16);

        for i in 1..=4u64 {
            bus.emit(GatewayEvent::PerformanceMetric(OperationMetric::new(
                "session.read",
                i * 1_000,
            )));
        }
        bus.emit(GatewayEvent::PerformanceMetric(OperationMetric::new(
            "other.op", 999,
        )));

        assert_eq!(bus.recent_average("session.read"), Some(2_500.0));
        assert_eq!(bus.recent_percentile("session.read", 0.0), Some(1_000));
        assert_eq!(bus.recent_percentile("session.read", 1.0), Some(4_000));
        assert_eq!(bus.recent_average("missing.op"), None);
    }

    #[test]
    fn test_pattern_parsing() {
        assert!(Pattern::parse("*").matches("anything.at.all"));
        assert!(Pattern::parse("cache.*").matches("cache.hit"));
        assert!(!Pattern::parse("cache.*").matches("cachet.hit"));
        assert!(Pattern::parse("system.error").matches("system.error"));
        assert!(!Pattern::parse("system.error").matches("system.warning"));
    }
}
