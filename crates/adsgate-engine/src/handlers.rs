// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Queue job handlers.
//!
//! Handlers are pure functions of the job payload; every side effect
//! goes through the engine's collaborators. The write handler is the
//! only path that touches a PLC: REST and WebSocket writes both arrive
//! here through the variable-write queue, preserving per-variable
//! ordering.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use adsgate_broker::{MqttBroker, PublishOpts};
use adsgate_core::{
    AuditRecord, MetricType, Quality, QueueError, QueueResult, Sample, SessionError,
};
use adsgate_queue::{Job, JobHandler, JobPayload, WorkQueue};
use adsgate_store::{HistoryEntry, TimeSeriesStore};

use crate::manager::ConnectionManager;

// =============================================================================
// Variable Write Handler
// =============================================================================

/// Applies queued writes to PLC symbols.
///
/// The job acks only after the session reports success; on success the
/// written value is ingested as a fresh sample so subscribers see the
/// change without waiting for the next poll.
pub struct WriteJobHandler {
    manager: Arc<ConnectionManager>,
    queue: Arc<WorkQueue>,
}

impl WriteJobHandler {
    /// Creates the handler.
    pub fn new(manager: Arc<ConnectionManager>, queue: Arc<WorkQueue>) -> Arc<Self> {
        Arc::new(Self { manager, queue })
    }

    async fn enqueue_audit(&self, record: AuditRecord) {
        let job = Job::new(JobPayload::PersistAudit { record });
        if let Err(e) = self.queue.enqueue(job).await {
            warn!(error = %e, "write audit enqueue failed");
        }
    }
}

#[async_trait]
impl JobHandler for WriteJobHandler {
    async fn handle(&self, payload: &JobPayload) -> QueueResult<()> {
        let JobPayload::VariableWrite {
            variable_id,
            value,
            source,
            actor,
        } = payload
        else {
            return Err(QueueError::terminal("write handler got non-write payload"));
        };

        let Some((session, variable)) = self.manager.session_for(variable_id) else {
            return Err(QueueError::terminal(format!("unknown variable {}", variable_id)));
        };
        if !session.is_connected() {
            return Err(QueueError::retryable("session not connected"));
        }

        let config = variable.config.clone();
        let old_value = variable.state.last_value.clone();

        match session.write(&config.path, value, config.ads_type).await {
            Ok(()) => {
                debug!(variable_id = %variable_id, source, "write applied");

                // Surface the new value immediately rather than waiting
                // for the next acquisition cycle.
                self.manager
                    .ingest(
                        &config.connection_id,
                        &config,
                        Sample::now(value.clone(), Quality::Good),
                        None,
                    )
                    .await;

                self.enqueue_audit(
                    AuditRecord::success("variable.write", actor.clone())
                        .with_variable(config.id.clone(), config.name.clone())
                        .with_values(old_value, Some(value.clone()))
                        .with_details(format!("source={}", source)),
                )
                .await;
                Ok(())
            }
            Err(e) => {
                let session_error = SessionError::from(e);
                self.manager
                    .record_variable_error(&config.connection_id, &config, &session_error);

                self.enqueue_audit(
                    AuditRecord::failed("variable.write", actor.clone())
                        .with_variable(config.id.clone(), config.name.clone())
                        .with_values(old_value, Some(value.clone()))
                        .with_details(format!("source={} error={}", source, session_error)),
                )
                .await;

                if session_error.is_retryable() {
                    Err(QueueError::retryable(session_error.to_string()))
                } else {
                    Err(QueueError::terminal(session_error.to_string()))
                }
            }
        }
    }
}

// =============================================================================
// Persistence Handler
// =============================================================================

/// Appends samples, audit records, and metrics to the store.
pub struct PersistJobHandler {
    store: Arc<TimeSeriesStore>,
}

impl PersistJobHandler {
    /// Creates the handler.
    pub fn new(store: Arc<TimeSeriesStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }
}

#[async_trait]
impl JobHandler for PersistJobHandler {
    async fn handle(&self, payload: &JobPayload) -> QueueResult<()> {
        match payload {
            JobPayload::PersistSamples {
                variable_id,
                variable_name,
                samples,
            } => {
                let entries: Vec<HistoryEntry> = samples
                    .iter()
                    .map(|sample| HistoryEntry {
                        variable_id: variable_id.clone(),
                        variable_name: variable_name.clone(),
                        sample: sample.clone(),
                    })
                    .collect();
                self.store
                    .append_history_batch(entries)
                    .await
                    .map_err(|e| QueueError::retryable(e.to_string()))
            }
            JobPayload::PersistAudit { record } => self
                .store
                .append_audit(record)
                .await
                .map_err(|e| QueueError::retryable(e.to_string())),
            JobPayload::PersistMetric {
                metric_type,
                value,
                metadata,
            } => self
                .store
                .append_metric(*metric_type, *value, metadata.clone())
                .await
                .map_err(|e| QueueError::retryable(e.to_string())),
            other => Err(QueueError::terminal(format!(
                "persistence handler got {:?} payload",
                other.queue()
            ))),
        }
    }
}

// =============================================================================
// Discovery Handler
// =============================================================================

/// Runs queued discovery passes.
pub struct DiscoveryJobHandler {
    manager: Arc<ConnectionManager>,
}

impl DiscoveryJobHandler {
    /// Creates the handler.
    pub fn new(manager: Arc<ConnectionManager>) -> Arc<Self> {
        Arc::new(Self { manager })
    }
}

#[async_trait]
impl JobHandler for DiscoveryJobHandler {
    async fn handle(&self, payload: &JobPayload) -> QueueResult<()> {
        let JobPayload::Discovery { connection_id } = payload else {
            return Err(QueueError::terminal("discovery handler got non-discovery payload"));
        };

        self.manager
            .trigger_discovery(connection_id)
            .await
            .map_err(|e| {
                if e.is_retryable() {
                    QueueError::retryable(e.to_string())
                } else {
                    QueueError::terminal(e.to_string())
                }
            })
    }
}

// =============================================================================
// Notification Handler
// =============================================================================

/// Publishes out-of-band notifications to external sinks via MQTT.
pub struct NotificationJobHandler {
    broker: Arc<MqttBroker>,
    store: Arc<TimeSeriesStore>,
}

impl NotificationJobHandler {
    /// Creates the handler.
    pub fn new(broker: Arc<MqttBroker>, store: Arc<TimeSeriesStore>) -> Arc<Self> {
        Arc::new(Self { broker, store })
    }
}

#[async_trait]
impl JobHandler for NotificationJobHandler {
    async fn handle(&self, payload: &JobPayload) -> QueueResult<()> {
        let JobPayload::Notification { topic, body } = payload else {
            return Err(QueueError::terminal(
                "notification handler got non-notification payload",
            ));
        };

        self.broker
            .publish(topic, body.as_bytes(), PublishOpts::default());
        self.store
            .append_metric(MetricType::MqttMessages, 1.0, None)
            .await
            .ok();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use adsgate_core::{Value, VariableId};
    use adsgate_queue::MemoryQueue;
    use adsgate_store::StoreConfig;

    async fn test_store() -> (Arc<TimeSeriesStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(StoreConfig {
            path: dir.path().join("db"),
            compression: false,
        })
        .await
        .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_persist_handler_samples() {
        let (store, _dir) = test_store().await;
        let handler = PersistJobHandler::new(store.clone());

        let payload = JobPayload::PersistSamples {
            variable_id: VariableId::new("v1"),
            variable_name: "temp".to_string(),
            samples: vec![
                Sample::at(1, Value::Float(1.0), Quality::Good),
                Sample::at(2, Value::Float(2.0), Quality::Good),
            ],
        };

        handler.handle(&payload).await.unwrap();

        let entries = store
            .query_history(&VariableId::new("v1"), None, None, 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_persist_handler_audit() {
        let (store, _dir) = test_store().await;
        let handler = PersistJobHandler::new(store.clone());

        handler
            .handle(&JobPayload::PersistAudit {
                record: AuditRecord::success("connection.create", "op"),
            })
            .await
            .unwrap();

        assert_eq!(store.query_audit(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persist_handler_rejects_write_payload() {
        let (store, _dir) = test_store().await;
        let handler = PersistJobHandler::new(store);

        let result = handler
            .handle(&JobPayload::VariableWrite {
                variable_id: VariableId::new("v1"),
                value: Value::Float(1.0),
                source: "rest".to_string(),
                actor: "op".to_string(),
            })
            .await;
        assert!(matches!(result, Err(QueueError::Terminal { .. })));
    }

    #[tokio::test]
    async fn test_notification_handler_publishes() {
        let (store, _dir) = test_store().await;
        let broker = MqttBroker::new(adsgate_broker::BrokerConfig::default());
        let handler = NotificationJobHandler::new(broker.clone(), store);

        handler
            .handle(&JobPayload::Notification {
                topic: "alerts/x".to_string(),
                body: "{}".to_string(),
            })
            .await
            .unwrap();

        assert!(broker.stats().messages_published >= 1);
    }

    #[tokio::test]
    async fn test_write_handler_unknown_variable_terminal() {
        let (store, _dir) = test_store().await;
        let bus = adsgate_core::EventBus::new(64);
        let cache = adsgate_cache::CacheClient::new(
            adsgate_cache::CacheConfig {
                host: "127.0.0.1".to_string(),
                port: 1,
                op_timeout: std::time::Duration::from_millis(50),
            },
            None,
        )
        .unwrap();
        let queue = WorkQueue::new(
            Arc::new(MemoryQueue::new()),
            adsgate_queue::QueueConfig::default(),
            None,
        );
        let manager = ConnectionManager::new(
            Arc::new(adsgate_core::VariableBuffers::new(16)),
            cache,
            queue.clone(),
            bus,
            adsgate_core::PerformanceMonitor::new(),
            store,
            crate::manager::ManagerConfig::default(),
        );

        let handler = WriteJobHandler::new(manager, queue);
        let result = handler
            .handle(&JobPayload::VariableWrite {
                variable_id: VariableId::new("missing"),
                value: Value::Float(1.0),
                source: "rest".to_string(),
                actor: "op".to_string(),
            })
            .await;

        assert!(matches!(result, Err(QueueError::Terminal { .. })));
    }
}
