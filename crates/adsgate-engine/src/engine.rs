// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Engine assembly and lifecycle.
//!
//! Components come up leaves-first: bus and monitor, cache, store,
//! buffers, queue, broker, manager, handlers, hub, background tasks.
//! Persisted connections are restored before the first caller arrives.
//! Shutdown walks the same order in reverse, draining the queue inside
//! its grace window.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use adsgate_broker::{BrokerConfig, MqttBroker};
use adsgate_cache::{CacheClient, CacheConfig, INVALIDATION_CHANNEL};
use adsgate_core::{
    AuditRecord, CacheEventKind, EventBus, GatewayEvent, GatewayResult, MetricType,
    PerformanceMonitor, VariableBuffers,
};
use adsgate_queue::{
    Job, JobPayload, MemoryQueue, QueueBackend, QueueConfig, QueueKind, RedisQueue, WorkQueue,
};
use adsgate_store::{StoreConfig, TimeSeriesStore};

use crate::facade::{AdsDefaults, Gateway};
use crate::handlers::{
    DiscoveryJobHandler, NotificationJobHandler, PersistJobHandler, WriteJobHandler,
};
use crate::hub::FanoutHub;
use crate::manager::{ConnectionManager, ManagerConfig};

// =============================================================================
// Configuration
// =============================================================================

/// Which backend the work queue persists into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendKind {
    /// Durable lists in the cache backend (default).
    #[default]
    Redis,
    /// In-process only; lost on restart. Used by tests and cache-less
    /// deployments.
    Memory,
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Embedded MQTT broker.
    #[serde(default)]
    pub mqtt: BrokerConfig,
    /// Cache backend.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Time-series store.
    #[serde(default)]
    pub store: StoreConfig,
    /// Work queue pool.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Queue durability backend.
    #[serde(default)]
    pub queue_backend: QueueBackendKind,
    /// Per-variable ring capacity.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Verbose event bus logging.
    #[serde(default)]
    pub debug_events: bool,
    /// Days of history/metrics/audit retained.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// System metrics sampling interval.
    #[serde(default = "default_metrics_interval")]
    #[serde(with = "adsgate_core::types::duration_millis")]
    pub metrics_interval: Duration,
    /// Defaults for connection create requests.
    #[serde(default)]
    pub ads: AdsDefaults,
}

fn default_buffer_size() -> usize {
    10_000
}

fn default_retention_days() -> u32 {
    30
}

fn default_metrics_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mqtt: BrokerConfig::default(),
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
            queue: QueueConfig::default(),
            queue_backend: QueueBackendKind::default(),
            buffer_size: default_buffer_size(),
            debug_events: false,
            retention_days: default_retention_days(),
            metrics_interval: default_metrics_interval(),
            ads: AdsDefaults::default(),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The running engine.
pub struct Engine {
    gateway: Arc<Gateway>,
    queue: Arc<WorkQueue>,
    broker: Arc<MqttBroker>,
    manager: Arc<ConnectionManager>,
    tasks: Vec<JoinHandle<()>>,
    /// The broker port actually bound (differs from config with port 0).
    pub mqtt_port: u16,
}

impl Engine {
    /// Assembles and starts every component.
    pub async fn start(config: EngineConfig) -> GatewayResult<Self> {
        info!("starting gateway engine");

        // Substrate: bus, monitor, cache, store, buffers.
        let bus = EventBus::new(4096);
        bus.set_debug(config.debug_events);

        let monitor = PerformanceMonitor::new();
        let mut tasks = vec![
            monitor.attach_bus(&bus),
            monitor.spawn_cleanup(
                adsgate_core::monitor::DEFAULT_CLEANUP_INTERVAL,
                adsgate_core::monitor::DEFAULT_MAX_IDLE,
            ),
        ];

        let cache = CacheClient::new(config.cache.clone(), Some(bus.clone()))?;
        let store = TimeSeriesStore::open(config.store.clone()).await?;
        let buffers = Arc::new(VariableBuffers::new(config.buffer_size));

        // Work queue over the chosen backend.
        let backend: Arc<dyn QueueBackend> = match config.queue_backend {
            QueueBackendKind::Redis => Arc::new(RedisQueue::new(cache.clone())),
            QueueBackendKind::Memory => Arc::new(MemoryQueue::new()),
        };
        let queue = WorkQueue::new(backend, config.queue.clone(), Some(bus.clone()));

        // Broker before the manager so fan-out is live when sessions
        // produce their first samples.
        let broker = MqttBroker::new(config.mqtt.clone());
        let mqtt_port = broker.start().await?;

        let manager = ConnectionManager::new(
            buffers.clone(),
            cache.clone(),
            queue.clone(),
            bus.clone(),
            monitor.clone(),
            store.clone(),
            ManagerConfig::default(),
        );

        // Handlers, then workers.
        queue.register_handler(
            QueueKind::VariableWrite,
            WriteJobHandler::new(manager.clone(), queue.clone()),
        );
        queue.register_handler(QueueKind::Persistence, PersistJobHandler::new(store.clone()));
        queue.register_handler(QueueKind::Discovery, DiscoveryJobHandler::new(manager.clone()));
        queue.register_handler(
            QueueKind::Notification,
            NotificationJobHandler::new(broker.clone(), store.clone()),
        );
        queue.start();

        let hub = FanoutHub::new(bus.clone(), broker.clone());
        tasks.push(hub.start(manager.clone()));

        // Cross-process invalidation: a sibling gateway dropping shared
        // cache keys also invalidates our handle caches, which re-resolve
        // lazily. Our own notices arrive here too; the drop is
        // idempotent. Best effort: the cache backend may be absent.
        {
            let manager = manager.clone();
            let bus = bus.clone();
            match cache
                .subscribe(INVALIDATION_CHANNEL, move |payload| {
                    let pattern = String::from_utf8_lossy(&payload).to_string();
                    manager.invalidate_handle_caches();
                    bus.emit(GatewayEvent::Cache {
                        kind: CacheEventKind::Invalidate,
                        key: pattern,
                    });
                })
                .await
            {
                Ok(task) => tasks.push(task),
                Err(e) => debug!(error = %e, "invalidation subscription unavailable"),
            }
        }

        // Restarts reconstruct the configured connections.
        let restored = store.load_connections().await?;
        let restored_count = restored.len();
        for connection in restored {
            if let Err(e) = manager.attach_connection(connection) {
                warn!(error = %e, "persisted connection failed to restore");
            }
        }
        if restored_count > 0 {
            info!(count = restored_count, "connections restored from store");
        }

        let gateway = Gateway::new(
            manager.clone(),
            queue.clone(),
            store.clone(),
            cache,
            buffers,
            broker.clone(),
            hub,
            monitor,
            bus,
            config.ads.clone(),
        );

        tasks.push(spawn_metrics_sampler(
            gateway.clone(),
            config.metrics_interval,
        ));
        tasks.push(spawn_retention(store, config.retention_days));

        gateway
            .audit(AuditRecord::success("system.start", "system"))
            .await;

        info!(mqtt_port, "gateway engine running");

        Ok(Self {
            gateway,
            queue,
            broker,
            manager,
            tasks,
            mqtt_port,
        })
    }

    /// Returns the facade.
    pub fn gateway(&self) -> Arc<Gateway> {
        self.gateway.clone()
    }

    /// Graceful shutdown: stop intake, disconnect sessions, drain the
    /// queue inside its grace window, stop the broker.
    pub async fn shutdown(mut self) {
        info!("gateway engine shutting down");

        self.gateway
            .audit(AuditRecord::success("system.shutdown", "system"))
            .await;

        // Stop producing: disconnect every session first.
        let connections: Vec<_> = self
            .manager
            .statuses()
            .into_iter()
            .map(|c| c.config.id)
            .collect();
        for id in connections {
            let _ = self.manager.disconnect(&id).await;
        }

        // Drain pending work by priority within the grace deadline.
        self.queue.shutdown().await;

        self.broker.shutdown();

        for task in self.tasks.drain(..) {
            task.abort();
        }

        info!("gateway engine stopped");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("mqtt_port", &self.mqtt_port)
            .finish()
    }
}

// =============================================================================
// Background Tasks
// =============================================================================

/// Periodically records gateway-level metrics into the store.
fn spawn_metrics_sampler(gateway: Arc<Gateway>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;

            let broker = gateway.broker.stats();
            let samples = [
                (MetricType::MqttClients, broker.clients as f64),
                (MetricType::MqttMessages, broker.messages_published as f64),
                (MetricType::ApiRequests, gateway.bus.stats().emitted as f64),
            ];

            for (metric_type, value) in samples {
                let job = Job::new(JobPayload::PersistMetric {
                    metric_type,
                    value,
                    metadata: None,
                });
                if gateway.queue.enqueue(job).await.is_err() {
                    return; // queue is shutting down
                }
            }
        }
    })
}

/// Runs retention cleanup once a day.
fn spawn_retention(store: Arc<TimeSeriesStore>, retention_days: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup stays fast.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.cleanup(retention_days).await {
                Ok(report) => info!(
                    history = report.history_removed,
                    metrics = report.metrics_removed,
                    audit = report.audit_removed,
                    "retention cleanup finished"
                ),
                Err(e) => warn!(error = %e, "retention cleanup failed"),
            }
        }
    })
}

// =============================================================================
// Tests
// =============================================================================
