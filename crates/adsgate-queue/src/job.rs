// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Job and queue definitions.
//!
//! Four logically separate queues, processed strictly by priority:
//! variable writes first, then persistence, discovery, and out-of-band
//! notifications. Jobs are plain data; handlers side-effect only through
//! the engine's collaborators.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use adsgate_core::{AuditRecord, ConnectionId, MetricType, Sample, Value, VariableId};

// =============================================================================
// Queue Kinds
// =============================================================================

/// The four queues, in priority order (1 = highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueKind {
    /// Apply a write to a PLC symbol.
    VariableWrite,
    /// Append a sample, audit record, or metric.
    Persistence,
    /// Enumerate the schema for a connection.
    Discovery,
    /// Out-of-band notification to an external sink.
    Notification,
}

impl QueueKind {
    /// Every queue, highest priority first.
    pub const ALL: [QueueKind; 4] = [
        QueueKind::VariableWrite,
        QueueKind::Persistence,
        QueueKind::Discovery,
        QueueKind::Notification,
    ];

    /// Numeric priority, 1 = highest.
    pub fn priority(&self) -> u8 {
        match self {
            QueueKind::VariableWrite => 1,
            QueueKind::Persistence => 2,
            QueueKind::Discovery => 3,
            QueueKind::Notification => 4,
        }
    }

    /// Returns the queue name used in keys and stats.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::VariableWrite => "variable-write",
            QueueKind::Persistence => "persistence",
            QueueKind::Discovery => "discovery",
            QueueKind::Notification => "notification",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Job Payloads
// =============================================================================

/// The work a job carries. Serialized as JSON into the durable backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Write a value to a PLC symbol.
    VariableWrite {
        /// Target variable.
        variable_id: VariableId,
        /// Value to write.
        value: Value,
        /// Origin of the write (`rest`, `websocket`).
        source: String,
        /// Caller identity for the audit trail.
        actor: String,
    },

    /// Append one or more samples of a single variable to the store.
    /// Contiguous jobs for the same variable coalesce into one batch
    /// under backlog.
    PersistSamples {
        /// The variable.
        variable_id: VariableId,
        /// The variable's name at enqueue time.
        variable_name: String,
        /// Samples in production order.
        samples: Vec<Sample>,
    },

    /// Append an audit record to the store.
    PersistAudit {
        /// The record.
        record: AuditRecord,
    },

    /// Append a system metric to the store.
    PersistMetric {
        /// Metric category.
        metric_type: MetricType,
        /// Metric value.
        value: f64,
        /// Optional JSON metadata, pre-rendered.
        metadata: Option<String>,
    },

    /// Run a discovery pass for a connection.
    Discovery {
        /// The connection.
        connection_id: ConnectionId,
    },

    /// Deliver an out-of-band notification to an external sink.
    Notification {
        /// Logical topic of the notification.
        topic: String,
        /// Pre-rendered JSON body.
        body: String,
    },
}

impl JobPayload {
    /// Returns the queue this payload belongs to.
    pub fn queue(&self) -> QueueKind {
        match self {
            JobPayload::VariableWrite { .. } => QueueKind::VariableWrite,
            JobPayload::PersistSamples { .. }
            | JobPayload::PersistAudit { .. }
            | JobPayload::PersistMetric { .. } => QueueKind::Persistence,
            JobPayload::Discovery { .. } => QueueKind::Discovery,
            JobPayload::Notification { .. } => QueueKind::Notification,
        }
    }
}

// =============================================================================
// Job
// =============================================================================

/// Default attempt cap for every job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// One unit of queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id, used as the write correlation id.
    pub id: Uuid,
    /// The work to perform.
    pub payload: JobPayload,
    /// Attempts made so far.
    pub attempts: u32,
    /// Attempt cap.
    pub max_attempts: u32,
    /// Unix ms of first enqueue.
    pub enqueued_at_ms: i64,
    /// Error of the most recent failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Job {
    /// Creates a job with the default attempt cap.
    pub fn new(payload: JobPayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            payload,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enqueued_at_ms: Utc::now().timestamp_millis(),
            last_error: None,
        }
    }

    /// Overrides the attempt cap.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Returns the queue this job belongs to.
    pub fn queue(&self) -> QueueKind {
        self.payload.queue()
    }
}

// =============================================================================
// Job Records
// =============================================================================

/// Terminal state of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// The handler succeeded.
    Completed,
    /// The job exhausted its attempts or failed terminally.
    Failed,
}

/// Retained record of a finished job, kept for debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// The finished job.
    pub job: Job,
    /// Terminal state.
    pub state: JobState,
    /// Unix ms of completion.
    pub finished_at_ms: i64,
    /// Terminal error, for failed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    /// Records a completed job.
    pub fn completed(job: Job) -> Self {
        Self {
            job,
            state: JobState::Completed,
            finished_at_ms: Utc::now().timestamp_millis(),
            error: None,
        }
    }

    /// Records a failed job with its terminal error.
    pub fn failed(job: Job, error: impl Into<String>) -> Self {
        Self {
            job,
            state: JobState::Failed,
            finished_at_ms: Utc::now().timestamp_millis(),
            error: Some(error.into()),
        }
    }
}

/// Outcome delivered to an enqueue-time waiter.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// The job id.
    pub job_id: Uuid,
    /// Whether the handler ultimately succeeded.
    pub success: bool,
    /// Terminal error, if any.
    pub error: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use adsgate_core::Quality;

    #[test]
    fn test_priority_order() {
        assert_eq!(QueueKind::VariableWrite.priority(), 1);
        assert_eq!(QueueKind::Persistence.priority(), 2);
        assert_eq!(QueueKind::Discovery.priority(), 3);
        assert_eq!(QueueKind::Notification.priority(), 4);

        let priorities: Vec<u8> = QueueKind::ALL.iter().map(|k| k.priority()).collect();
        assert_eq!(priorities, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_payload_routing() {
        let write = JobPayload::VariableWrite {
            variable_id: VariableId::new("v1"),
            value: Value::Float(1.0),
            source: "rest".to_string(),
            actor: "op".to_string(),
        };
        assert_eq!(write.queue(), QueueKind::VariableWrite);

        let persist = JobPayload::PersistSamples {
            variable_id: VariableId::new("v1"),
            variable_name: "temp".to_string(),
            samples: vec![Sample::at(1, Value::Float(1.0), Quality::Good)],
        };
        assert_eq!(persist.queue(), QueueKind::Persistence);

        let audit = JobPayload::PersistAudit {
            record: AuditRecord::success("variable.write", "op"),
        };
        assert_eq!(audit.queue(), QueueKind::Persistence);
    }

    #[test]
    fn test_job_defaults() {
        let job = Job::new(JobPayload::Discovery {
            connection_id: ConnectionId::new("c1"),
        });
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(job.queue(), QueueKind::Discovery);
    }

    #[test]
    fn test_job_json_roundtrip() {
        let job = Job::new(JobPayload::VariableWrite {
            variable_id: VariableId::new("v1"),
            value: Value::Float(42.0),
            source: "websocket".to_string(),
            actor: "op".to_string(),
        });

        let json = serde_json::to_vec(&job).unwrap();
        let decoded: Job = serde_json::from_slice(&json).unwrap();

        assert_eq!(decoded.id, job.id);
        match decoded.payload {
            JobPayload::VariableWrite { value, source, .. } => {
                assert_eq!(value, Value::Float(42.0));
                assert_eq!(source, "websocket");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_job_record() {
        let job = Job::new(JobPayload::Discovery {
            connection_id: ConnectionId::new("c1"),
        });

        let record = JobRecord::failed(job.clone(), "router unreachable");
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.error.as_deref(), Some("router unreachable"));

        let record = JobRecord::completed(job);
        assert_eq!(record.state, JobState::Completed);
        assert!(record.error.is_none());
    }
}
