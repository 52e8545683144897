// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # adsgate-cache
//!
//! Redis-backed cache for the gateway's hot read paths.
//!
//! The cache is an optimization, never an authoritative source: when the
//! backend is unreachable every read is a miss, writes are logged and
//! dropped, and a lazy reconnect restores service. The data plane never
//! blocks on the cache.
//!
//! Values are stored as compact binary (bincode). Three logical clients
//! share the backend: one multiplexed connection for imperative commands,
//! one for publishing invalidations, and dedicated pub/sub connections
//! for subscriptions.
//!
//! The work queue's durable backend is built on the list primitives
//! exposed here (`push_back` / `pop_front` / `list_len`).

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use adsgate_core::{CacheError, CacheEventKind, CacheResult, EventBus, GatewayEvent};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Configuration
// =============================================================================

/// Cache backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Backend host.
    pub host: String,
    /// Backend port.
    pub port: u16,
    /// Per-operation timeout.
    #[serde(default = "default_op_timeout")]
    #[serde(with = "adsgate_core::types::duration_millis")]
    pub op_timeout: Duration,
}

fn default_op_timeout() -> Duration {
    Duration::from_secs(3)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            op_timeout: default_op_timeout(),
        }
    }
}

impl CacheConfig {
    /// Returns the redis connection URL.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct CacheStatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    invalidations: AtomicU64,
    dropped_writes: AtomicU64,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that missed (including degraded-mode reads).
    pub misses: u64,
    /// Successful writes.
    pub sets: u64,
    /// Deletes.
    pub deletes: u64,
    /// Keys removed by pattern invalidation.
    pub invalidations: u64,
    /// Writes dropped while degraded.
    pub dropped_writes: u64,
    /// hits / (hits + misses), 0.0 when idle.
    pub hit_rate: f64,
    /// `true` while the backend is unreachable.
    pub degraded: bool,
}

// =============================================================================
// CacheClient
// =============================================================================

/// The cache client.
///
/// Cheap to clone via `Arc`. Every operation emits a cache event on the
/// bus when one is attached.
pub struct CacheClient {
    client: redis::Client,
    commands: tokio::sync::Mutex<Option<MultiplexedConnection>>,
    publisher: tokio::sync::Mutex<Option<MultiplexedConnection>>,
    bus: Option<Arc<EventBus>>,
    stats: CacheStatsInner,
    degraded: AtomicBool,
    /// Unix ms of the last failed connect; gates the reconnect cooldown.
    last_connect_attempt_ms: AtomicI64,
    op_timeout: Duration,
}

/// While degraded, at most one reconnect attempt per this window; other
/// operations fail fast so the data plane never pays the connect
/// timeout per sample.
const RECONNECT_COOLDOWN: Duration = Duration::from_secs(5);

impl CacheClient {
    /// Creates a client. No connection is attempted until first use.
    pub fn new(config: CacheConfig, bus: Option<Arc<EventBus>>) -> CacheResult<Arc<Self>> {
        let client = redis::Client::open(config.url())
            .map_err(|e| CacheError::unavailable(e.to_string()))?;

        Ok(Arc::new(Self {
            client,
            commands: tokio::sync::Mutex::new(None),
            publisher: tokio::sync::Mutex::new(None),
            bus,
            stats: CacheStatsInner::default(),
            degraded: AtomicBool::new(false),
            last_connect_attempt_ms: AtomicI64::new(0),
            op_timeout: config.op_timeout,
        }))
    }

    /// Returns `true` while the backend is considered unreachable.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Returns a counter snapshot.
    pub fn stats(&self) -> CacheStats {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            sets: self.stats.sets.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            dropped_writes: self.stats.dropped_writes.load(Ordering::Relaxed),
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
            degraded: self.is_degraded(),
        }
    }

    // =========================================================================
    // Key/Value Operations
    // =========================================================================

    /// Reads a value. Returns `None` on a miss or while degraded; a
    /// failure never surfaces to the data plane.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw: Option<Vec<u8>> = match self
            .with_commands(|mut conn| async move { conn.get(key.to_string()).await })
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                debug!(key, error = %e, "cache get failed, treating as miss");
                self.record_miss(key);
                return None;
            }
        };

        match raw {
            Some(bytes) => match bincode::deserialize(&bytes) {
                Ok(value) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    self.emit(CacheEventKind::Hit, key);
                    Some(value)
                }
                Err(e) => {
                    warn!(key, error = %e, "cache value corrupt, treating as miss");
                    self.record_miss(key);
                    None
                }
            },
            None => {
                self.record_miss(key);
                None
            }
        }
    }

    /// Writes a value with an optional TTL. Degraded writes are dropped.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let bytes = match bincode::serialize(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "cache value failed to encode, write dropped");
                return;
            }
        };

        let result = self
            .with_commands(|mut conn| async move {
                match ttl {
                    Some(ttl) => conn.set_ex(key.to_string(), bytes, ttl.as_secs().max(1)).await,
                    None => conn.set(key.to_string(), bytes).await,
                }
            })
            .await;

        match result {
            Ok(()) => {
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
                self.emit(CacheEventKind::Set, key);
            }
            Err(e) => {
                self.stats.dropped_writes.fetch_add(1, Ordering::Relaxed);
                debug!(key, error = %e, "cache set dropped");
            }
        }
    }

    /// Deletes a key. Returns `true` if it existed.
    pub async fn delete(&self, key: &str) -> bool {
        let removed: u64 = self
            .with_commands(|mut conn| async move { conn.del(key.to_string()).await })
            .await
            .unwrap_or(0);

        if removed > 0 {
            self.stats.deletes.fetch_add(1, Ordering::Relaxed);
            self.emit(CacheEventKind::Delete, key);
        }
        removed > 0
    }

    /// Returns `true` if the key exists. Degraded reads answer `false`.
    pub async fn exists(&self, key: &str) -> bool {
        self.with_commands(|mut conn| async move { conn.exists(key.to_string()).await })
            .await
            .unwrap_or(false)
    }

    /// Pipelined multi-get. Atomicity across keys is not guaranteed;
    /// missing or degraded entries come back as `None`.
    pub async fn mget<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        if keys.is_empty() {
            return Vec::new();
        }

        let raw: Vec<Option<Vec<u8>>> = match self
            .with_commands(|mut conn| {
                let keys = keys.to_vec();
                async move {
                    let mut cmd = redis::cmd("MGET");
                    for key in &keys {
                        cmd.arg(key);
                    }
                    cmd.query_async(&mut conn).await
                }
            })
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "cache mget failed, all misses");
                for key in keys {
                    self.record_miss(key);
                }
                return keys.iter().map(|_| None).collect();
            }
        };

        raw.into_iter()
            .zip(keys)
            .map(|(bytes, key)| match bytes {
                Some(bytes) => match bincode::deserialize(&bytes) {
                    Ok(value) => {
                        self.stats.hits.fetch_add(1, Ordering::Relaxed);
                        self.emit(CacheEventKind::Hit, key);
                        Some(value)
                    }
                    Err(_) => {
                        self.record_miss(key);
                        None
                    }
                },
                None => {
                    self.record_miss(key);
                    None
                }
            })
            .collect()
    }

    /// Pipelined multi-set with a shared TTL.
    pub async fn mset<T: Serialize>(&self, entries: &[(String, T)], ttl: Option<Duration>) {
        if entries.is_empty() {
            return;
        }

        let mut encoded: Vec<(String, Vec<u8>)> = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match bincode::serialize(value) {
                Ok(bytes) => encoded.push((key.clone(), bytes)),
                Err(e) => warn!(key, error = %e, "cache value failed to encode, entry skipped"),
            }
        }

        let count = encoded.len();
        let result = self
            .with_commands(|mut conn| async move {
                let mut pipe = redis::pipe();
                for (key, bytes) in &encoded {
                    match ttl {
                        Some(ttl) => {
                            pipe.cmd("SET").arg(key).arg(bytes).arg("EX").arg(ttl.as_secs().max(1));
                        }
                        None => {
                            pipe.cmd("SET").arg(key).arg(bytes);
                        }
                    }
                }
                pipe.query_async::<()>(&mut conn).await
            })
            .await;

        match result {
            Ok(()) => {
                self.stats.sets.fetch_add(count as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.dropped_writes.fetch_add(count as u64, Ordering::Relaxed);
                debug!(error = %e, "cache mset dropped");
            }
        }
    }

    /// Deletes every key matching a glob pattern. Returns the count
    /// removed (0 while degraded).
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let result = self
            .with_commands(|mut conn| {
                let pattern = pattern.to_string();
                async move {
                    let keys: Vec<String> = {
                        let mut iter = conn.scan_match::<_, String>(&pattern).await?;
                        let mut keys = Vec::new();
                        while let Some(key) = iter.next_item().await {
                            keys.push(key);
                        }
                        keys
                    };

                    if keys.is_empty() {
                        return Ok(0u64);
                    }
                    let mut cmd = redis::cmd("DEL");
                    for key in &keys {
                        cmd.arg(key);
                    }
                    cmd.query_async(&mut conn).await
                }
            })
            .await;

        match result {
            Ok(removed) => {
                self.stats.invalidations.fetch_add(removed, Ordering::Relaxed);
                self.emit(CacheEventKind::Invalidate, pattern);
                // Cross-process notice so sibling gateways drop their
                // own hot copies too. Best effort.
                let _ = self
                    .publish(INVALIDATION_CHANNEL, pattern.as_bytes())
                    .await;
                removed
            }
            Err(e) => {
                debug!(pattern, error = %e, "cache invalidation skipped");
                0
            }
        }
    }

    // =========================================================================
    // Durable List Primitives (work queue backend)
    // =========================================================================

    /// Appends raw bytes to the tail of a list. Unlike the KV path this
    /// surfaces the error: the queue must know a durable push failed.
    pub async fn push_back(&self, key: &str, data: Vec<u8>) -> CacheResult<()> {
        self.with_commands(|mut conn| async move {
            conn.rpush::<_, _, ()>(key.to_string(), data).await
        })
        .await
    }

    /// Pops raw bytes from the head of a list.
    pub async fn pop_front(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.with_commands(|mut conn| async move { conn.lpop(key.to_string(), None).await })
            .await
    }

    /// Returns the list length.
    pub async fn list_len(&self, key: &str) -> CacheResult<u64> {
        self.with_commands(|mut conn| async move { conn.llen(key.to_string()).await })
            .await
    }

    /// Trims a list to its last `keep` elements.
    pub async fn trim_back(&self, key: &str, keep: usize) -> CacheResult<()> {
        self.with_commands(|mut conn| async move {
            conn.ltrim::<_, ()>(key.to_string(), -(keep as isize), -1).await
        })
        .await
    }

    // =========================================================================
    // Pub/Sub
    // =========================================================================

    /// Publishes a raw message on a channel through the dedicated
    /// publisher connection.
    pub async fn publish(&self, channel: &str, message: &[u8]) -> CacheResult<()> {
        let mut guard = self.publisher.lock().await;
        if guard.is_none() {
            *guard = Some(self.open_connection().await?);
        }
        let conn = guard.as_mut().ok_or_else(|| CacheError::unavailable("no connection"))?;

        match timeout(
            self.op_timeout,
            conn.publish::<_, _, ()>(channel.to_string(), message.to_vec()),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                *guard = None;
                Err(CacheError::unavailable(e.to_string()))
            }
            Err(_) => {
                *guard = None;
                Err(CacheError::timeout(self.op_timeout))
            }
        }
    }

    /// Subscribes to a channel on a dedicated connection; each message
    /// invokes the handler. The task runs until the connection drops.
    pub async fn subscribe<F>(&self, channel: &str, mut handler: F) -> CacheResult<JoinHandle<()>>
    where
        F: FnMut(Vec<u8>) + Send + 'static,
    {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;

        let channel = channel.to_string();
        Ok(tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let payload: Vec<u8> = message.get_payload().unwrap_or_default();
                handler(payload);
            }
            debug!(channel, "cache subscription ended");
        }))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn open_connection(&self) -> CacheResult<MultiplexedConnection> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        if self.degraded.load(Ordering::Relaxed) {
            let last = self.last_connect_attempt_ms.load(Ordering::Relaxed);
            if now_ms - last < RECONNECT_COOLDOWN.as_millis() as i64 {
                return Err(CacheError::unavailable("backend degraded, reconnect cooling down"));
            }
        }
        self.last_connect_attempt_ms.store(now_ms, Ordering::Relaxed);

        match timeout(self.op_timeout, self.client.get_multiplexed_async_connection()).await {
            Ok(Ok(conn)) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    debug!("cache backend recovered");
                }
                Ok(conn)
            }
            Ok(Err(e)) => {
                self.degraded.store(true, Ordering::Relaxed);
                Err(CacheError::unavailable(e.to_string()))
            }
            Err(_) => {
                self.degraded.store(true, Ordering::Relaxed);
                Err(CacheError::timeout(self.op_timeout))
            }
        }
    }

    /// Runs one command against the shared command connection, opening it
    /// lazily and discarding it on failure so the next call reconnects.
    async fn with_commands<F, Fut, T>(&self, f: F) -> CacheResult<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let mut guard = self.commands.lock().await;
        if guard.is_none() {
            *guard = Some(self.open_connection().await?);
        }
        // MultiplexedConnection is a cheap handle; clone so the closure
        // owns its copy while we keep the slot for reuse.
        let conn = guard.as_ref().cloned().ok_or_else(|| CacheError::unavailable("no connection"))?;

        match timeout(self.op_timeout, f(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                *guard = None;
                self.degraded.store(true, Ordering::Relaxed);
                Err(CacheError::unavailable(e.to_string()))
            }
            Err(_) => {
                *guard = None;
                self.degraded.store(true, Ordering::Relaxed);
                Err(CacheError::timeout(self.op_timeout))
            }
        }
    }

    fn record_miss(&self, key: &str) {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        self.emit(CacheEventKind::Miss, key);
    }

    fn emit(&self, kind: CacheEventKind, key: &str) {
        if let Some(bus) = &self.bus {
            bus.emit(GatewayEvent::Cache {
                kind,
                key: key.to_string(),
            });
        }
    }
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

// =============================================================================
// Key Builders
// =============================================================================

/// Cache key for a variable's last value.
pub fn variable_key(variable_id: &adsgate_core::VariableId) -> String {
    format!("variable:{}:last", variable_id)
}

/// Invalidation pattern covering every variable key.
pub const VARIABLE_PATTERN: &str = "variable:*";

/// Channel used for cross-process invalidation notices.
pub const INVALIDATION_CHANNEL: &str = "adsgate:invalidate";

// =============================================================================
// Tests
// =============================================================================
