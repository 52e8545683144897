// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The worker pool draining the four queues.
//!
//! Workers always pop the highest-priority non-empty queue, FIFO within
//! a queue. Retryable failures are re-enqueued after an exponential
//! delay (1 s doubling to 60 s, three attempts total); terminal failures
//! increment the failure counter exactly once and are retained for
//! inspection. Under persistence backlog, contiguous sample jobs for the
//! same variable coalesce into a single batch.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use adsgate_core::{
    EventBus, ExponentialBackoff, GatewayEvent, QueueError, QueueResult, RetryConfig,
};

use crate::backend::QueueBackend;
use crate::job::{Job, JobOutcome, JobPayload, JobRecord, QueueKind};

// =============================================================================
// Handler Trait
// =============================================================================

/// Executes one job payload.
///
/// Handlers are pure functions of the payload, side-effecting only
/// through the engine's collaborators. Return
/// [`QueueError::Retryable`](adsgate_core::QueueError) to request
/// another attempt; any other error is terminal.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Processes the payload.
    async fn handle(&self, payload: &JobPayload) -> QueueResult<()>;
}

// =============================================================================
// Configuration
// =============================================================================

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of worker tasks.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Retry schedule for failed jobs.
    #[serde(default)]
    pub backoff: RetryConfig,
    /// Completed jobs retained for inspection.
    #[serde(default = "default_completed_retention")]
    pub completed_retention: usize,
    /// Failed jobs retained for debugging.
    #[serde(default = "default_failed_retention")]
    pub failed_retention: usize,
    /// Persistence backlog above which sample jobs coalesce.
    #[serde(default = "default_coalesce_threshold")]
    pub coalesce_threshold: u64,
    /// Maximum jobs absorbed into one batch.
    #[serde(default = "default_coalesce_batch_max")]
    pub coalesce_batch_max: usize,
    /// Idle sleep between empty polls.
    #[serde(default = "default_poll_idle")]
    #[serde(with = "adsgate_core::types::duration_millis")]
    pub poll_idle: Duration,
    /// Grace period for draining on shutdown.
    #[serde(default = "default_drain_grace")]
    #[serde(with = "adsgate_core::types::duration_millis")]
    pub drain_grace: Duration,
}

fn default_worker_count() -> usize {
    4
}

fn default_completed_retention() -> usize {
    100
}

fn default_failed_retention() -> usize {
    500
}

fn default_coalesce_threshold() -> u64 {
    64
}

fn default_coalesce_batch_max() -> usize {
    100
}

fn default_poll_idle() -> Duration {
    Duration::from_millis(20)
}

fn default_drain_grace() -> Duration {
    Duration::from_secs(10)
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            backoff: RetryConfig::default(),
            completed_retention: default_completed_retention(),
            failed_retention: default_failed_retention(),
            coalesce_threshold: default_coalesce_threshold(),
            coalesce_batch_max: default_coalesce_batch_max(),
            poll_idle: default_poll_idle(),
            drain_grace: default_drain_grace(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// Per-queue counter snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// Queue name.
    pub queue: String,
    /// Numeric priority.
    pub priority: u8,
    /// Jobs accepted.
    pub enqueued: u64,
    /// Jobs completed.
    pub completed: u64,
    /// Terminal failures.
    pub failed: u64,
    /// Retry re-enqueues.
    pub retried: u64,
    /// Current backend depth.
    pub depth: u64,
}

/// Pool health summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueHealth {
    /// Whether new jobs are accepted.
    pub accepting: bool,
    /// Running worker tasks.
    pub worker_count: usize,
    /// Total backlog across queues.
    pub total_depth: u64,
    /// Retained failed jobs.
    pub failed_retained: usize,
}

// =============================================================================
// WorkQueue
// =============================================================================

/// The queue service: backend, handlers, workers, retention, and acks.
pub struct WorkQueue {
    backend: Arc<dyn QueueBackend>,
    config: QueueConfig,
    handlers: DashMap<QueueKind, Arc<dyn JobHandler>>,
    counters: HashMap<QueueKind, QueueCounters>,
    completed: Mutex<VecDeque<JobRecord>>,
    failed: Mutex<VecDeque<JobRecord>>,
    acks: DashMap<Uuid, oneshot::Sender<JobOutcome>>,
    backoff: ExponentialBackoff,
    bus: Option<Arc<EventBus>>,
    accepting: AtomicBool,
    halted: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkQueue {
    /// Creates the service. Call [`start`](Self::start) to spawn workers.
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        config: QueueConfig,
        bus: Option<Arc<EventBus>>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let backoff = ExponentialBackoff::new(config.backoff.clone());

        let counters = QueueKind::ALL
            .iter()
            .map(|kind| (*kind, QueueCounters::default()))
            .collect();

        Arc::new(Self {
            backend,
            config,
            handlers: DashMap::new(),
            counters,
            completed: Mutex::new(VecDeque::new()),
            failed: Mutex::new(VecDeque::new()),
            acks: DashMap::new(),
            backoff,
            bus,
            accepting: AtomicBool::new(true),
            halted: AtomicBool::new(false),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Registers the handler for one queue.
    pub fn register_handler(&self, kind: QueueKind, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Spawns the worker tasks.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }

        for index in 0..self.config.worker_count.max(1) {
            let queue = self.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            workers.push(tokio::spawn(worker_loop(queue, shutdown_rx, index)));
        }

        info!(
            workers = self.config.worker_count,
            backend = self.backend.name(),
            "work queue started"
        );
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Enqueues a job, returning its id (the correlation id for writes).
    pub async fn enqueue(&self, job: Job) -> QueueResult<Uuid> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }

        let id = job.id;
        let kind = job.queue();
        self.backend.push(&job).await?;
        self.counters[&kind].enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Enqueues a job and returns a receiver resolved at its terminal
    /// state. Used by the write path: the ack fires only after the
    /// handler (and thus the PLC session) reported success.
    pub async fn enqueue_with_ack(
        &self,
        job: Job,
    ) -> QueueResult<(Uuid, oneshot::Receiver<JobOutcome>)> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }

        let id = job.id;
        let (tx, rx) = oneshot::channel();
        self.acks.insert(id, tx);

        match self.enqueue(job).await {
            Ok(id) => Ok((id, rx)),
            Err(e) => {
                self.acks.remove(&id);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Per-queue statistics, priority order.
    pub async fn stats(&self) -> Vec<QueueStats> {
        let mut stats = Vec::with_capacity(QueueKind::ALL.len());
        for kind in QueueKind::ALL {
            let counters = &self.counters[&kind];
            stats.push(QueueStats {
                queue: kind.as_str().to_string(),
                priority: kind.priority(),
                enqueued: counters.enqueued.load(Ordering::Relaxed),
                completed: counters.completed.load(Ordering::Relaxed),
                failed: counters.failed.load(Ordering::Relaxed),
                retried: counters.retried.load(Ordering::Relaxed),
                depth: self.backend.len(kind).await.unwrap_or(0),
            });
        }
        stats
    }

    /// Pool health summary.
    pub async fn health(&self) -> QueueHealth {
        let mut total_depth = 0;
        for kind in QueueKind::ALL {
            total_depth += self.backend.len(kind).await.unwrap_or(0);
        }
        QueueHealth {
            accepting: self.accepting.load(Ordering::SeqCst),
            worker_count: self.workers.lock().len(),
            total_depth,
            failed_retained: self.failed.lock().len(),
        }
    }

    /// Retained failed jobs, newest first.
    pub fn failed_jobs(&self) -> Vec<JobRecord> {
        self.failed.lock().iter().rev().cloned().collect()
    }

    /// Retained completed jobs, newest first.
    pub fn completed_jobs(&self) -> Vec<JobRecord> {
        self.completed.lock().iter().rev().cloned().collect()
    }

    /// Re-enqueues a retained failed job with its attempts reset.
    pub async fn retry_failed(&self, job_id: Uuid) -> QueueResult<bool> {
        let record = {
            let mut failed = self.failed.lock();
            let index = failed.iter().position(|r| r.job.id == job_id);
            index.and_then(|i| failed.remove(i))
        };

        match record {
            Some(mut record) => {
                record.job.attempts = 0;
                record.job.last_error = None;
                self.enqueue(record.job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stops intake, drains queues in priority order up to the grace
    /// deadline, then halts remaining work.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + self.config.drain_grace;

        loop {
            let mut remaining = 0u64;
            for kind in QueueKind::ALL {
                remaining += self.backend.len(kind).await.unwrap_or(0);
            }
            if remaining == 0 || tokio::time::Instant::now() >= deadline {
                if remaining > 0 {
                    warn!(remaining, "queue drain deadline reached, aborting remaining work");
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        self.halted.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }

        info!("work queue stopped");
    }

    // =========================================================================
    // Internals (worker side)
    // =========================================================================

    async fn pop_next(&self) -> Option<Job> {
        if self.halted.load(Ordering::SeqCst) {
            return None;
        }
        for kind in QueueKind::ALL {
            match self.backend.pop(kind).await {
                Ok(Some(job)) => return Some(job),
                Ok(None) => continue,
                Err(e) => {
                    debug!(queue = %kind, error = %e, "queue pop failed");
                    continue;
                }
            }
        }
        None
    }

    async fn process(&self, job: Job) {
        if job.queue() == QueueKind::Persistence {
            let units = self.coalesce(job).await;
            for unit in units {
                self.run_one(unit).await;
            }
        } else {
            self.run_one(job).await;
        }
    }

    /// Folds contiguous sample jobs for the same variable into the first
    /// job of the run once the persistence backlog passes the threshold.
    /// Absorbed jobs complete immediately; their samples travel on in
    /// the surviving batch job.
    async fn coalesce(&self, first: Job) -> Vec<Job> {
        let backlog = self
            .backend
            .len(QueueKind::Persistence)
            .await
            .unwrap_or(0);
        if backlog < self.config.coalesce_threshold {
            return vec![first];
        }

        let mut popped = vec![first];
        while popped.len() < self.config.coalesce_batch_max {
            match self.backend.pop(QueueKind::Persistence).await {
                Ok(Some(job)) => popped.push(job),
                _ => break,
            }
        }

        let mut units: Vec<Job> = Vec::new();
        for job in popped {
            let merged = match (units.last_mut(), &job.payload) {
                (
                    Some(Job {
                        payload:
                            JobPayload::PersistSamples {
                                variable_id: last_id,
                                samples: last_samples,
                                ..
                            },
                        ..
                    }),
                    JobPayload::PersistSamples {
                        variable_id,
                        samples,
                        ..
                    },
                ) if *last_id == *variable_id => {
                    last_samples.extend(samples.iter().cloned());
                    true
                }
                _ => false,
            };

            if merged {
                self.complete(job);
            } else {
                units.push(job);
            }
        }

        debug!(units = units.len(), "persistence backlog coalesced");
        units
    }

    async fn run_one(&self, mut job: Job) {
        let kind = job.queue();

        let handler = match self.handlers.get(&kind).map(|h| h.value().clone()) {
            Some(handler) => handler,
            None => {
                self.fail(job, QueueError::NoHandler { queue: kind.as_str().to_string() });
                return;
            }
        };

        match handler.handle(&job.payload).await {
            Ok(()) => self.complete(job),
            Err(e) => {
                let attempt = job.attempts + 1;
                if e.is_retryable() && attempt < job.max_attempts {
                    job.attempts = attempt;
                    job.last_error = Some(e.to_string());
                    self.counters[&kind].retried.fetch_add(1, Ordering::Relaxed);
                    self.schedule_retry(job, attempt);
                } else {
                    job.attempts = attempt;
                    self.fail(job, e);
                }
            }
        }
    }

    fn schedule_retry(&self, job: Job, attempt: u32) {
        let delay = self.backoff.delay_for(attempt);
        let backend = self.backend.clone();

        debug!(
            job_id = %job.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "job retry scheduled"
        );

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = backend.push(&job).await {
                warn!(job_id = %job.id, error = %e, "retry re-enqueue failed, job lost");
            }
        });
    }

    fn complete(&self, job: Job) {
        let kind = job.queue();
        self.counters[&kind].completed.fetch_add(1, Ordering::Relaxed);
        self.resolve_ack(job.id, true, None);

        let mut completed = self.completed.lock();
        if completed.len() == self.config.completed_retention {
            completed.pop_front();
        }
        completed.push_back(JobRecord::completed(job));
    }

    /// Terminal failure: the failure counter increments exactly once.
    fn fail(&self, job: Job, error: QueueError) {
        let kind = job.queue();
        let message = error.to_string();
        self.counters[&kind].failed.fetch_add(1, Ordering::Relaxed);
        self.resolve_ack(job.id, false, Some(message.clone()));

        warn!(job_id = %job.id, queue = %kind, attempts = job.attempts, error = %message, "job failed");

        if let Some(bus) = &self.bus {
            bus.emit(GatewayEvent::QueueJobFailed {
                queue: kind.as_str().to_string(),
                job_id: job.id.to_string(),
                error: message.clone(),
            });
        }

        let mut failed = self.failed.lock();
        if failed.len() == self.config.failed_retention {
            failed.pop_front();
        }
        failed.push_back(JobRecord::failed(job, message));
    }

    fn resolve_ack(&self, job_id: Uuid, success: bool, error: Option<String>) {
        if let Some((_, tx)) = self.acks.remove(&job_id) {
            let _ = tx.send(JobOutcome {
                job_id,
                success,
                error,
            });
        }
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("backend", &self.backend.name())
            .field("accepting", &self.accepting.load(Ordering::SeqCst))
            .finish()
    }
}

async fn worker_loop(queue: Arc<WorkQueue>, mut shutdown_rx: watch::Receiver<bool>, index: usize) {
    debug!(worker = index, "queue worker started");

    loop {
        match queue.pop_next().await {
            Some(job) => queue.process(job).await,
            None => {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(queue.config.poll_idle) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }

    debug!(worker = index, "queue worker stopped");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryQueue;
    use adsgate_core::{ConnectionId, Quality, Sample, Value, VariableId};
    use std::sync::atomic::AtomicU32;

    struct RecordingHandler {
        log: Arc<Mutex<Vec<String>>>,
        delay: Duration,
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, payload: &JobPayload) -> QueueResult<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let tag = match payload {
                JobPayload::VariableWrite { variable_id, .. } => format!("write:{}", variable_id),
                JobPayload::PersistSamples { variable_id, samples, .. } => {
                    format!("persist:{}:{}", variable_id, samples.len())
                }
                JobPayload::Discovery { connection_id } => format!("discovery:{}", connection_id),
                other => format!("other:{:?}", other.queue()),
            };
            self.log.lock().push(tag);
            Ok(())
        }
    }

    struct FailingHandler {
        calls: Arc<AtomicU32>,
        retryable: bool,
    }

    #[async_trait]
    impl JobHandler for FailingHandler {
        async fn handle(&self, _payload: &JobPayload) -> QueueResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.retryable {
                Err(QueueError::retryable("flaky"))
            } else {
                Err(QueueError::terminal("broken"))
            }
        }
    }

    fn write_job(id: &str) -> Job {
        Job::new(JobPayload::VariableWrite {
            variable_id: VariableId::new(id),
            value: Value::Float(1.0),
            source: "rest".to_string(),
            actor: "test".to_string(),
        })
    }

    fn persist_job(id: &str, n: usize) -> Job {
        Job::new(JobPayload::PersistSamples {
            variable_id: VariableId::new(id),
            variable_name: id.to_string(),
            samples: (0..n)
                .map(|i| Sample::at(i as i64, Value::Float(i as f64), Quality::Good))
                .collect(),
        })
    }

    fn single_worker_config() -> QueueConfig {
        QueueConfig {
            worker_count: 1,
            poll_idle: Duration::from_millis(5),
            backoff: RetryConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_priority_write_before_persistence() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = WorkQueue::new(Arc::new(MemoryQueue::new()), single_worker_config(), None);

        let handler = Arc::new(RecordingHandler {
            log: log.clone(),
            delay: Duration::ZERO,
        });
        queue.register_handler(QueueKind::VariableWrite, handler.clone());
        queue.register_handler(QueueKind::Persistence, handler);

        // Enqueue in inverted priority order, then start the worker.
        queue.enqueue(persist_job("v1", 1)).await.unwrap();
        queue.enqueue(write_job("v1")).await.unwrap();
        queue.start();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let log = log.lock();
        assert_eq!(log[0], "write:v1");
        assert_eq!(log[1], "persist:v1:1");
    }

    #[tokio::test]
    async fn test_completed_counts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = WorkQueue::new(Arc::new(MemoryQueue::new()), single_worker_config(), None);
        queue.register_handler(
            QueueKind::Discovery,
            Arc::new(RecordingHandler { log, delay: Duration::ZERO }),
        );
        queue.start();

        queue
            .enqueue(Job::new(JobPayload::Discovery {
                connection_id: ConnectionId::new("c1"),
            }))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        let stats = queue.stats().await;
        let discovery = stats.iter().find(|s| s.queue == "discovery").unwrap();
        assert_eq!(discovery.enqueued, 1);
        assert_eq!(discovery.completed, 1);
        assert_eq!(discovery.failed, 0);
        assert_eq!(queue.completed_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_bound_and_single_failure_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let queue = WorkQueue::new(Arc::new(MemoryQueue::new()), single_worker_config(), None);
        queue.register_handler(
            QueueKind::VariableWrite,
            Arc::new(FailingHandler { calls: calls.clone(), retryable: true }),
        );
        queue.start();

        queue.enqueue(write_job("v1")).await.unwrap();

        // 3 attempts with 10ms/20ms delays between them.
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stats = queue.stats().await;
        let writes = stats.iter().find(|s| s.queue == "variable-write").unwrap();
        assert_eq!(writes.failed, 1);
        assert_eq!(writes.retried, 2);

        let failed = queue.failed_jobs();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job.attempts, 3);
    }

    #[tokio::test]
    async fn test_terminal_failure_no_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let queue = WorkQueue::new(Arc::new(MemoryQueue::new()), single_worker_config(), None);
        queue.register_handler(
            QueueKind::VariableWrite,
            Arc::new(FailingHandler { calls: calls.clone(), retryable: false }),
        );
        queue.start();

        queue.enqueue(write_job("v1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.failed_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_write_ack_resolves_after_success() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = WorkQueue::new(Arc::new(MemoryQueue::new()), single_worker_config(), None);
        queue.register_handler(
            QueueKind::VariableWrite,
            Arc::new(RecordingHandler { log, delay: Duration::from_millis(30) }),
        );
        queue.start();

        let (id, rx) = queue.enqueue_with_ack(write_job("v1")).await.unwrap();
        let outcome = rx.await.unwrap();

        assert_eq!(outcome.job_id, id);
        assert!(outcome.success);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_write_ack_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let queue = WorkQueue::new(Arc::new(MemoryQueue::new()), single_worker_config(), None);
        queue.register_handler(
            QueueKind::VariableWrite,
            Arc::new(FailingHandler { calls, retryable: false }),
        );
        queue.start();

        let (_, rx) = queue.enqueue_with_ack(write_job("v1")).await.unwrap();
        let outcome = rx.await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_coalescing_under_backlog() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let config = QueueConfig {
            coalesce_threshold: 2,
            ..single_worker_config()
        };
        let queue = WorkQueue::new(Arc::new(MemoryQueue::new()), config, None);
        queue.register_handler(
            QueueKind::Persistence,
            Arc::new(RecordingHandler { log: log.clone(), delay: Duration::ZERO }),
        );

        for _ in 0..5 {
            queue.enqueue(persist_job("v1", 1)).await.unwrap();
        }
        queue.start();

        tokio::time::sleep(Duration::from_millis(120)).await;

        // All five jobs accounted for, samples folded into one batch.
        let stats = queue.stats().await;
        let persistence = stats.iter().find(|s| s.queue == "persistence").unwrap();
        assert_eq!(persistence.completed, 5);

        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], "persist:v1:5");
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let queue = WorkQueue::new(Arc::new(MemoryQueue::new()), single_worker_config(), None);
        queue.start();
        queue.shutdown().await;

        let result = queue.enqueue(write_job("v1")).await;
        assert!(matches!(result, Err(QueueError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_shutdown_drains_writes_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = WorkQueue::new(Arc::new(MemoryQueue::new()), single_worker_config(), None);
        let handler = Arc::new(RecordingHandler {
            log: log.clone(),
            delay: Duration::from_millis(10),
        });
        queue.register_handler(QueueKind::VariableWrite, handler.clone());
        queue.register_handler(QueueKind::Persistence, handler.clone());
        queue.register_handler(QueueKind::Discovery, handler);

        queue.enqueue(persist_job("v1", 1)).await.unwrap();
        queue
            .enqueue(Job::new(JobPayload::Discovery {
                connection_id: ConnectionId::new("c1"),
            }))
            .await
            .unwrap();
        queue.enqueue(write_job("v1")).await.unwrap();

        queue.start();
        queue.shutdown().await;

        let log = log.lock();
        assert_eq!(log.first().map(String::as_str), Some("write:v1"));
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn test_retry_failed_job() {
        let calls = Arc::new(AtomicU32::new(0));
        let queue = WorkQueue::new(Arc::new(MemoryQueue::new()), single_worker_config(), None);
        queue.register_handler(
            QueueKind::VariableWrite,
            Arc::new(FailingHandler { calls, retryable: false }),
        );
        queue.start();

        queue.enqueue(write_job("v1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let failed = queue.failed_jobs();
        assert_eq!(failed.len(), 1);
        let job_id = failed[0].job.id;

        assert!(queue.retry_failed(job_id).await.unwrap());
        assert!(!queue.retry_failed(Uuid::now_v7()).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_handler_is_terminal() {
        let queue = WorkQueue::new(Arc::new(MemoryQueue::new()), single_worker_config(), None);
        queue.start();

        queue.enqueue(write_job("v1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let failed = queue.failed_jobs();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.as_deref().unwrap_or("").contains("No handler"));
    }
}
