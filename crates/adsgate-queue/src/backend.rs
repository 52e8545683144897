// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Queue storage backends.
//!
//! [`MemoryQueue`] keeps jobs in process memory and is used by tests and
//! cache-less deployments. [`RedisQueue`] stores jobs in the cache
//! backend's lists so enqueued work survives a gateway restart. Both are
//! FIFO within each queue.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use adsgate_cache::CacheClient;
use adsgate_core::{QueueError, QueueResult};

use crate::job::{Job, QueueKind};

// =============================================================================
// Backend Trait
// =============================================================================

/// Storage for pending jobs, FIFO per queue.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Appends a job to the tail of its queue.
    async fn push(&self, job: &Job) -> QueueResult<()>;

    /// Pops the head of one queue.
    async fn pop(&self, kind: QueueKind) -> QueueResult<Option<Job>>;

    /// Returns the queue depth.
    async fn len(&self, kind: QueueKind) -> QueueResult<u64>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

// =============================================================================
// Memory Backend
// =============================================================================

/// In-process queue storage.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<QueueKind, VecDeque<Job>>>,
}

impl MemoryQueue {
    /// Creates empty queues.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn push(&self, job: &Job) -> QueueResult<()> {
        self.queues
            .lock()
            .entry(job.queue())
            .or_default()
            .push_back(job.clone());
        Ok(())
    }

    async fn pop(&self, kind: QueueKind) -> QueueResult<Option<Job>> {
        Ok(self
            .queues
            .lock()
            .get_mut(&kind)
            .and_then(|queue| queue.pop_front()))
    }

    async fn len(&self, kind: QueueKind) -> QueueResult<u64> {
        Ok(self
            .queues
            .lock()
            .get(&kind)
            .map(|queue| queue.len() as u64)
            .unwrap_or(0))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// Redis Backend
// =============================================================================

/// Durable queue storage over the cache backend's list primitives.
pub struct RedisQueue {
    cache: Arc<CacheClient>,
}

impl RedisQueue {
    /// Creates a backend over the given cache client.
    pub fn new(cache: Arc<CacheClient>) -> Self {
        Self { cache }
    }

    fn key(kind: QueueKind) -> String {
        format!("queue:{}", kind.as_str())
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn push(&self, job: &Job) -> QueueResult<()> {
        let data = serde_json::to_vec(job)
            .map_err(|e| QueueError::enqueue_failed(format!("encode: {}", e)))?;
        self.cache
            .push_back(&Self::key(job.queue()), data)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))
    }

    async fn pop(&self, kind: QueueKind) -> QueueResult<Option<Job>> {
        let raw = self
            .cache
            .pop_front(&Self::key(kind))
            .await
            .map_err(|e| QueueError::retryable(e.to_string()))?;

        match raw {
            Some(bytes) => {
                let job = serde_json::from_slice(&bytes)
                    .map_err(|e| QueueError::terminal(format!("corrupt job: {}", e)))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn len(&self, kind: QueueKind) -> QueueResult<u64> {
        self.cache
            .list_len(&Self::key(kind))
            .await
            .map_err(|e| QueueError::retryable(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue").finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobPayload;
    use adsgate_core::ConnectionId;

    fn discovery_job(id: &str) -> Job {
        Job::new(JobPayload::Discovery {
            connection_id: ConnectionId::new(id),
        })
    }

    #[tokio::test]
    async fn test_memory_fifo() {
        let backend = MemoryQueue::new();

        let a = discovery_job("a");
        let b = discovery_job("b");
        backend.push(&a).await.unwrap();
        backend.push(&b).await.unwrap();

        assert_eq!(backend.len(QueueKind::Discovery).await.unwrap(), 2);
        assert_eq!(backend.pop(QueueKind::Discovery).await.unwrap().unwrap().id, a.id);
        assert_eq!(backend.pop(QueueKind::Discovery).await.unwrap().unwrap().id, b.id);
        assert!(backend.pop(QueueKind::Discovery).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_queues_isolated() {
        let backend = MemoryQueue::new();
        backend.push(&discovery_job("a")).await.unwrap();

        assert_eq!(backend.len(QueueKind::Discovery).await.unwrap(), 1);
        assert_eq!(backend.len(QueueKind::VariableWrite).await.unwrap(), 0);
        assert!(backend.pop(QueueKind::VariableWrite).await.unwrap().is_none());
    }

    #[test]
    fn test_redis_keys() {
        assert_eq!(RedisQueue::key(QueueKind::VariableWrite), "queue:variable-write");
        assert_eq!(RedisQueue::key(QueueKind::Persistence), "queue:persistence");
    }
}
