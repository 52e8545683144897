// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The gateway facade: the one surface the REST/WebSocket collaborators
//! call into.
//!
//! Every operation is thread-safe; mutating operations return only after
//! the change is visible to subsequent reads. Writes never touch a
//! session directly; they take the variable-write queue to preserve
//! ordering, and the returned job id doubles as the correlation id.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use adsgate_broker::{BrokerStats, MqttBroker};
use adsgate_cache::{variable_key, CacheClient, CacheStats, VARIABLE_PATTERN};
use adsgate_core::{
    AdsType, ApiError, AuditRecord, BufferSummary, BusStats, ConnectionConfig, ConnectionId,
    DiscoveryConfig, EventBus, GatewayError, GatewayResult, MetricType, OperationSnapshot,
    PerformanceMonitor, Sample, StorableSample, SymbolInfo, Value, Variable, VariableBuffers,
    VariableConfig, VariableId,
};
use adsgate_queue::{Job, JobOutcome, JobPayload, JobRecord, QueueHealth, QueueStats, WorkQueue};
use adsgate_store::{
    AuditStatistics, HistoryEntry, MetricEntry, StoreStatistics, TimeSeriesStore,
};

use crate::hub::{FanoutHub, HubStats};
use crate::manager::{ConnectionInfo, ConnectionManager, ConnectionStatus};

// =============================================================================
// Summary Types
// =============================================================================

/// The monitoring summary served by the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSummary {
    /// Seconds since the engine started.
    pub uptime_seconds: u64,
    /// Per-connection status.
    pub connections: Vec<ConnectionInfo>,
    /// Number of live variables.
    pub variable_count: usize,
    /// Per-queue counters.
    pub queues: Vec<QueueStats>,
    /// Ring buffer occupancy.
    pub buffers: BufferSummary,
    /// Cache counters.
    pub cache: CacheStats,
    /// Broker counters.
    pub broker: BrokerStats,
    /// Event bus counters.
    pub bus: BusStats,
    /// WebSocket hub counters.
    pub hub: HubStats,
    /// Busiest operations with latency percentiles.
    pub top_operations: Vec<OperationSnapshot>,
}

/// Coarse health verdict.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    /// Overall verdict.
    pub healthy: bool,
    /// Connections currently connected.
    pub connected_connections: usize,
    /// Connections configured.
    pub total_connections: usize,
    /// Whether the work queue accepts jobs.
    pub queue_accepting: bool,
    /// Whether the cache backend is degraded.
    pub cache_degraded: bool,
    /// Total queued backlog.
    pub queue_depth: u64,
}

/// Defaults applied to connection create requests that omit fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdsDefaults {
    /// Default router host.
    pub host: String,
    /// Default router port.
    pub port: u16,
    /// Default target address root.
    pub target_ip: String,
    /// Default runtime port.
    pub target_port: u16,
    /// Local ADS source port.
    pub source_port: u16,
}

impl Default for AdsDefaults {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 48898,
            target_ip: "127.0.0.1".to_string(),
            target_port: 801,
            source_port: 32750,
        }
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// The assembled engine, handed to the administrative collaborators.
pub struct Gateway {
    pub(crate) manager: Arc<ConnectionManager>,
    pub(crate) queue: Arc<WorkQueue>,
    pub(crate) store: Arc<TimeSeriesStore>,
    pub(crate) cache: Arc<CacheClient>,
    pub(crate) buffers: Arc<VariableBuffers>,
    pub(crate) broker: Arc<MqttBroker>,
    pub(crate) hub: Arc<FanoutHub>,
    pub(crate) monitor: Arc<PerformanceMonitor>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) ads_defaults: AdsDefaults,
    started_at: Instant,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        manager: Arc<ConnectionManager>,
        queue: Arc<WorkQueue>,
        store: Arc<TimeSeriesStore>,
        cache: Arc<CacheClient>,
        buffers: Arc<VariableBuffers>,
        broker: Arc<MqttBroker>,
        hub: Arc<FanoutHub>,
        monitor: Arc<PerformanceMonitor>,
        bus: Arc<EventBus>,
        ads_defaults: AdsDefaults,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            queue,
            store,
            cache,
            buffers,
            broker,
            hub,
            monitor,
            bus,
            ads_defaults,
            started_at: Instant::now(),
        })
    }

    /// Returns the WebSocket hub for client registration.
    pub fn hub(&self) -> &Arc<FanoutHub> {
        &self.hub
    }

    /// Returns the event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Lists every connection with its status.
    pub fn list_connections(&self) -> Vec<ConnectionInfo> {
        self.manager.statuses()
    }

    /// Returns one connection.
    pub fn get_connection(&self, id: &ConnectionId) -> GatewayResult<ConnectionInfo> {
        self.manager.connection(id)
    }

    /// Creates a connection, applying the configured ADS defaults to
    /// omitted fields.
    pub async fn create_connection(
        &self,
        mut config: ConnectionConfig,
        actor: &str,
    ) -> GatewayResult<ConnectionInfo> {
        if config.host.is_empty() {
            config.host = self.ads_defaults.host.clone();
        }
        if config.target_address.is_empty() {
            config.target_address = format!("{}.1.1", self.ads_defaults.target_ip);
        }

        self.manager.add_connection(config.clone()).await?;
        self.audit(
            AuditRecord::success("connection.create", actor)
                .with_details(format!("connection={}", config.id)),
        )
        .await;
        self.manager.connection(&config.id)
    }

    /// Updates a connection (disconnect, reconfigure, reconnect).
    pub async fn update_connection(
        &self,
        id: &ConnectionId,
        config: ConnectionConfig,
        actor: &str,
    ) -> GatewayResult<ConnectionInfo> {
        self.manager.update_connection(id, config).await?;
        self.audit(
            AuditRecord::success("connection.update", actor)
                .with_details(format!("connection={}", id)),
        )
        .await;
        self.manager.connection(id)
    }

    /// Deletes a connection and its variables.
    pub async fn delete_connection(&self, id: &ConnectionId, actor: &str) -> GatewayResult<()> {
        self.manager.remove_connection(id).await?;
        self.audit(
            AuditRecord::success("connection.delete", actor)
                .with_details(format!("connection={}", id)),
        )
        .await;
        Ok(())
    }

    /// Starts the session for a connection.
    pub fn connect(&self, id: &ConnectionId) -> GatewayResult<()> {
        self.manager.connect(id)
    }

    /// Stops the session for a connection.
    pub async fn disconnect(&self, id: &ConnectionId) -> GatewayResult<()> {
        self.manager.disconnect(id).await
    }

    /// Returns one connection's status.
    pub fn connection_status(&self, id: &ConnectionId) -> GatewayResult<ConnectionStatus> {
        self.manager.status(id)
    }

    /// Uploads the live symbol table of a connection.
    pub async fn list_symbols(&self, id: &ConnectionId) -> GatewayResult<Vec<SymbolInfo>> {
        self.manager.symbols(id).await
    }

    /// Enqueues an on-demand discovery pass; returns the job id.
    pub async fn trigger_discovery(&self, id: &ConnectionId) -> GatewayResult<Uuid> {
        // Validate first so unknown connections fail synchronously.
        self.manager.status(id)?;
        let job = Job::new(JobPayload::Discovery {
            connection_id: id.clone(),
        });
        Ok(self.queue.enqueue(job).await?)
    }

    /// Replaces a connection's discovery configuration.
    pub async fn set_discovery_config(
        &self,
        id: &ConnectionId,
        discovery: DiscoveryConfig,
        actor: &str,
    ) -> GatewayResult<()> {
        self.manager.set_discovery_config(id, discovery).await?;
        self.audit(
            AuditRecord::success("connection.discovery_config", actor)
                .with_details(format!("connection={}", id)),
        )
        .await;
        Ok(())
    }

    // =========================================================================
    // Variables
    // =========================================================================

    /// Lists every variable with its live state.
    pub fn list_variables(&self) -> Vec<Arc<Variable>> {
        self.manager.variables()
    }

    /// Lists the variables of one connection.
    pub fn list_variables_for(&self, id: &ConnectionId) -> Vec<Arc<Variable>> {
        self.manager.variables_for(id)
    }

    /// Returns one variable.
    pub fn get_variable(&self, id: &VariableId) -> GatewayResult<Arc<Variable>> {
        self.manager
            .variable(id)
            .ok_or_else(|| ApiError::not_found(format!("variable {}", id)).into())
    }

    /// Creates a variable subscription.
    pub async fn create_variable(
        &self,
        config: VariableConfig,
        actor: &str,
    ) -> GatewayResult<Arc<Variable>> {
        self.manager.add_variable(config.clone()).await?;
        self.audit(
            AuditRecord::success("variable.create", actor)
                .with_variable(config.id.clone(), config.name.clone()),
        )
        .await;
        self.get_variable(&config.id)
    }

    /// Deletes a variable.
    pub async fn delete_variable(&self, id: &VariableId, actor: &str) -> GatewayResult<()> {
        let variable = self.get_variable(id)?;
        self.manager.remove_variable(id).await?;
        self.audit(
            AuditRecord::success("variable.delete", actor)
                .with_variable(id.clone(), variable.config.name.clone()),
        )
        .await;
        Ok(())
    }

    /// Enqueues a write and returns its correlation id.
    pub async fn write_variable(
        &self,
        id: &VariableId,
        value: serde_json::Value,
        source: &str,
        actor: &str,
    ) -> GatewayResult<Uuid> {
        let (job_id, _) = self.enqueue_write(id, value, source, actor).await?;
        Ok(job_id)
    }

    /// Enqueues a write and returns the correlation id plus a receiver
    /// resolved at the job's terminal state (the WebSocket ack path).
    pub async fn write_variable_with_ack(
        &self,
        id: &VariableId,
        value: serde_json::Value,
        source: &str,
        actor: &str,
    ) -> GatewayResult<(Uuid, oneshot::Receiver<JobOutcome>)> {
        self.enqueue_write(id, value, source, actor).await
    }

    async fn enqueue_write(
        &self,
        id: &VariableId,
        value: serde_json::Value,
        source: &str,
        actor: &str,
    ) -> GatewayResult<(Uuid, oneshot::Receiver<JobOutcome>)> {
        let variable = self.get_variable(id)?;
        let coerced = coerce_value(&value, variable.config.ads_type)?;

        let job = Job::new(JobPayload::VariableWrite {
            variable_id: id.clone(),
            value: coerced,
            source: source.to_string(),
            actor: actor.to_string(),
        });
        Ok(self.queue.enqueue_with_ack(job).await?)
    }

    /// Reads history, ring buffer first, store as fallback. Newest
    /// first, inclusive bounds.
    pub async fn read_history(
        &self,
        id: &VariableId,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: usize,
    ) -> GatewayResult<Vec<HistoryEntry>> {
        self.get_variable(id)?;

        let from_ring = match (start_ms, end_ms) {
            (None, None) => self.buffers.last_n(id, limit),
            (start, end) => self
                .buffers
                .range(id, start.unwrap_or(i64::MIN), end.unwrap_or(i64::MAX)),
        };

        if !from_ring.is_empty() {
            let variable = self.get_variable(id)?;
            let mut entries: Vec<HistoryEntry> = from_ring
                .into_iter()
                .map(|sample| HistoryEntry {
                    variable_id: id.clone(),
                    variable_name: variable.config.name.clone(),
                    sample,
                })
                .collect();
            entries.reverse(); // chronological -> newest first
            entries.truncate(limit);
            return Ok(entries);
        }

        Ok(self.store.query_history(id, start_ms, end_ms, limit).await?)
    }

    /// Returns statistics for one variable: the in-memory ring when hot,
    /// the store otherwise. A cold start where the store has nothing yet
    /// still answers with the cached last value, delivered as
    /// `uncertain`.
    pub async fn read_statistics(&self, id: &VariableId) -> GatewayResult<StoreStatistics> {
        self.get_variable(id)?;

        if let Some(stats) = self.buffers.stats(id) {
            if stats.count > 0 {
                return Ok(StoreStatistics {
                    count: stats.count as u64,
                    min: stats.min,
                    max: stats.max,
                    average: stats.average,
                    latest: stats.latest,
                });
            }
        }

        let mut stats = self.store.statistics(id).await?;
        if stats.latest.is_none() {
            stats.latest = self.cached_sample(id).await;
        }
        Ok(stats)
    }

    /// Returns the freshest known sample for a variable.
    ///
    /// The ring serves hot reads; when it is cold (fresh start, cleared
    /// buffers) the cache answers, downgraded to `uncertain` because the
    /// value may lag the device by up to its TTL. The store is the final
    /// fallback. A cache miss never invents a value: whatever comes back
    /// is persistence truth or newer.
    pub async fn read_current(&self, id: &VariableId) -> GatewayResult<Option<Sample>> {
        self.get_variable(id)?;

        if let Some(sample) = self.buffers.latest(id) {
            return Ok(Some(sample));
        }

        if let Some(cached) = self.cached_sample(id).await {
            return Ok(Some(cached));
        }

        let mut entries = self.store.query_history(id, None, None, 1).await?;
        Ok(entries.pop().map(|entry| entry.sample))
    }

    /// Cache lookup for a variable's last value. Hits come back as
    /// `uncertain`; misses and degraded backends come back as `None`.
    async fn cached_sample(&self, id: &VariableId) -> Option<Sample> {
        let cached: Option<StorableSample> = self.cache.get(&variable_key(id)).await;
        cached.map(|sample| Sample::from(sample).into_uncertain())
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    /// The full monitoring summary.
    pub async fn summary(&self) -> SystemSummary {
        SystemSummary {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            connections: self.manager.statuses(),
            variable_count: self.manager.variables().len(),
            queues: self.queue.stats().await,
            buffers: self.buffers.summary(),
            cache: self.cache.stats(),
            broker: self.broker.stats(),
            bus: self.bus.stats(),
            hub: self.hub.stats(),
            top_operations: self.monitor.report(10),
        }
    }

    /// A coarse health verdict.
    pub async fn health(&self) -> SystemHealth {
        let connections = self.manager.statuses();
        let connected = connections
            .iter()
            .filter(|c| c.status.is_connected())
            .count();
        let queue_health: QueueHealth = self.queue.health().await;

        SystemHealth {
            healthy: queue_health.accepting,
            connected_connections: connected,
            total_connections: connections.len(),
            queue_accepting: queue_health.accepting,
            cache_degraded: self.cache.is_degraded(),
            queue_depth: queue_health.total_depth,
        }
    }

    /// Stored system metrics, newest first.
    pub async fn metric_history(
        &self,
        metric_type: Option<MetricType>,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: usize,
    ) -> GatewayResult<Vec<MetricEntry>> {
        Ok(self
            .store
            .query_metrics(metric_type, start_ms, end_ms, limit)
            .await?)
    }

    // =========================================================================
    // Audit
    // =========================================================================

    /// Lists audit records, newest first.
    pub async fn list_audit(&self, limit: usize) -> GatewayResult<Vec<AuditRecord>> {
        Ok(self.store.query_audit(limit).await?)
    }

    /// Lists audit records for one variable.
    pub async fn audit_by_variable(
        &self,
        id: &VariableId,
        limit: usize,
    ) -> GatewayResult<Vec<AuditRecord>> {
        Ok(self.store.audit_by_variable(id, limit).await?)
    }

    /// Lists audit records for one actor.
    pub async fn audit_by_actor(&self, actor: &str, limit: usize) -> GatewayResult<Vec<AuditRecord>> {
        Ok(self.store.audit_by_actor(actor, limit).await?)
    }

    /// Audit aggregates.
    pub async fn audit_stats(&self) -> GatewayResult<AuditStatistics> {
        Ok(self.store.audit_statistics().await?)
    }

    /// Enqueues an audit record through the persistence queue.
    pub async fn audit(&self, record: AuditRecord) {
        let job = Job::new(JobPayload::PersistAudit { record });
        let _ = self.queue.enqueue(job).await;
    }

    // =========================================================================
    // Cache / Queue / Buffer
    // =========================================================================

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Invalidates every cached variable value; returns the count.
    pub async fn cache_clear(&self) -> u64 {
        self.cache.invalidate_pattern(VARIABLE_PATTERN).await
    }

    /// Per-queue counters.
    pub async fn queue_stats(&self) -> Vec<QueueStats> {
        self.queue.stats().await
    }

    /// Queue pool health.
    pub async fn queue_health(&self) -> QueueHealth {
        self.queue.health().await
    }

    /// Retained failed jobs, newest first.
    pub fn failed_jobs(&self) -> Vec<JobRecord> {
        self.queue.failed_jobs()
    }

    /// Re-enqueues one retained failed job.
    pub async fn retry_failed_job(&self, job_id: Uuid) -> GatewayResult<bool> {
        Ok(self.queue.retry_failed(job_id).await?)
    }

    /// Ring buffer occupancy.
    pub fn buffer_summary(&self) -> BufferSummary {
        self.buffers.summary()
    }

    /// Clears every ring buffer.
    pub fn buffer_clear(&self) {
        self.buffers.clear_all();
    }

    /// Latest buffered sample for one variable (WebSocket history path).
    pub fn buffer_latest(&self, id: &VariableId) -> Option<Sample> {
        self.buffers.latest(id)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("connections", &self.manager.statuses().len())
            .field("variables", &self.manager.variables().len())
            .finish()
    }
}

// =============================================================================
// Value Coercion
// =============================================================================

/// Coerces a JSON value from the external boundary into the typed value
/// a variable's declared type expects. Rejected coercions are
/// configuration-class errors surfaced synchronously.
pub fn coerce_value(json: &serde_json::Value, ads_type: AdsType) -> Result<Value, GatewayError> {
    let err = || {
        GatewayError::Api(ApiError::validation(format!(
            "value {} is not assignable to {}",
            json, ads_type
        )))
    };

    let value = match ads_type {
        AdsType::Bool => Value::Bool(json.as_bool().ok_or_else(err)?),
        AdsType::Byte | AdsType::Word | AdsType::Dword | AdsType::Int | AdsType::Dint => {
            Value::Int(json.as_i64().ok_or_else(err)?)
        }
        AdsType::Real | AdsType::Lreal => Value::Float(json.as_f64().ok_or_else(err)?),
        AdsType::String => Value::Text(json.as_str().ok_or_else(err)?.to_string()),
    };
    Ok(value)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_value() {
        assert_eq!(
            coerce_value(&serde_json::json!(true), AdsType::Bool).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            coerce_value(&serde_json::json!(42), AdsType::Dint).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            coerce_value(&serde_json::json!(23.5), AdsType::Real).unwrap(),
            Value::Float(23.5)
        );
        assert_eq!(
            coerce_value(&serde_json::json!("run"), AdsType::String).unwrap(),
            Value::Text("run".into())
        );

        assert!(coerce_value(&serde_json::json!("x"), AdsType::Real).is_err());
        assert!(coerce_value(&serde_json::json!(1.5), AdsType::Dint).is_err());
        assert!(coerce_value(&serde_json::json!(null), AdsType::Bool).is_err());
    }

    #[test]
    fn test_ads_defaults() {
        let defaults = AdsDefaults::default();
        assert_eq!(defaults.port, 48898);
        assert_eq!(defaults.target_port, 801);
        assert_eq!(defaults.source_port, 32750);
    }
}
