// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-operation latency monitoring.
//!
//! The monitor keeps a bounded window of nanosecond-resolution samples per
//! named operation (10 000 most recent) and serves percentile snapshots
//! and a top-N report. A cleanup pass removes operations that have been
//! idle for longer than one hour.
//!
//! One monitor exists per engine; its lifecycle matches the engine's.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::event::{EventBus, GatewayEvent};
use crate::types::OperationMetric;

// =============================================================================
// Operation Window
// =============================================================================

/// Maximum retained samples per operation.
pub const MAX_SAMPLES: usize = 10_000;

/// Default idle duration after which an operation is evicted.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(3600);

/// Default cleanup interval.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct OpWindow {
    samples: VecDeque<u64>,
    total_count: u64,
    last_update_ms: i64,
}

impl OpWindow {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            total_count: 0,
            last_update_ms: Utc::now().timestamp_millis(),
        }
    }

    fn record(&mut self, duration_ns: u64) {
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(duration_ns);
        self.total_count += 1;
        self.last_update_ms = Utc::now().timestamp_millis();
    }

    fn snapshot(&self, operation: &str) -> OperationSnapshot {
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let percentile = |p: f64| -> u64 {
            if sorted.is_empty() {
                return 0;
            }
            let rank = ((sorted.len() - 1) as f64 * p).round() as usize;
            sorted[rank]
        };

        let sum: u64 = sorted.iter().sum();

        OperationSnapshot {
            operation: operation.to_string(),
            count: self.total_count,
            window_len: sorted.len(),
            average_ns: if sorted.is_empty() {
                0.0
            } else {
                sum as f64 / sorted.len() as f64
            },
            p50_ns: percentile(0.50),
            p95_ns: percentile(0.95),
            p99_ns: percentile(0.99),
            min_ns: sorted.first().copied().unwrap_or(0),
            max_ns: sorted.last().copied().unwrap_or(0),
            last_update_ms: self.last_update_ms,
        }
    }
}

/// A point-in-time view of one operation's latency distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSnapshot {
    /// Operation name.
    pub operation: String,
    /// Cumulative recorded count.
    pub count: u64,
    /// Samples currently in the window.
    pub window_len: usize,
    /// Average over the window, nanoseconds.
    pub average_ns: f64,
    /// Median.
    pub p50_ns: u64,
    /// 95th percentile.
    pub p95_ns: u64,
    /// 99th percentile.
    pub p99_ns: u64,
    /// Window minimum.
    pub min_ns: u64,
    /// Window maximum.
    pub max_ns: u64,
    /// Unix ms of the last recording.
    pub last_update_ms: i64,
}

// =============================================================================
// Performance Monitor
// =============================================================================

/// Per-operation latency histograms with bounded memory.
pub struct PerformanceMonitor {
    operations: DashMap<String, OpWindow>,
}

impl PerformanceMonitor {
    /// Creates an empty monitor.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            operations: DashMap::new(),
        })
    }

    /// Records one sample for an operation.
    pub fn record(&self, operation: &str, duration_ns: u64) {
        self.operations
            .entry(operation.to_string())
            .or_insert_with(OpWindow::new)
            .record(duration_ns);
    }

    /// Records a metric as carried on the event bus.
    pub fn record_metric(&self, metric: &OperationMetric) {
        self.record(&metric.operation, metric.duration_ns);
    }

    /// Returns a snapshot for one operation, if it has been recorded.
    pub fn snapshot(&self, operation: &str) -> Option<OperationSnapshot> {
        self.operations
            .get(operation)
            .map(|w| w.snapshot(operation))
    }

    /// Returns the `n` most frequently recorded operations, busiest first.
    pub fn report(&self, n: usize) -> Vec<OperationSnapshot> {
        let mut snapshots: Vec<OperationSnapshot> = self
            .operations
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        snapshots.sort_by(|a, b| b.count.cmp(&a.count));
        snapshots.truncate(n);
        snapshots
    }

    /// Returns the number of tracked operations.
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Removes operations whose last update is older than `max_idle`.
    ///
    /// Returns the number of removed operations.
    pub fn cleanup(&self, max_idle: Duration) -> usize {
        let cutoff_ms = Utc::now().timestamp_millis() - max_idle.as_millis() as i64;
        let stale: Vec<String> = self
            .operations
            .iter()
            .filter(|entry| entry.value().last_update_ms < cutoff_ms)
            .map(|entry| entry.key().clone())
            .collect();

        for key in &stale {
            self.operations.remove(key);
        }

        if !stale.is_empty() {
            tracing::debug!(removed = stale.len(), "evicted idle operations from monitor");
        }
        stale.len()
    }

    /// Times a future, recording success latency under `operation` and
    /// failure latency under `operation:error`. The error is re-raised.
    pub async fn measure<F, T, E>(&self, operation: &str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let result = fut.await;
        let elapsed_ns = start.elapsed().as_nanos() as u64;

        match &result {
            Ok(_) => self.record(operation, elapsed_ns),
            Err(_) => self.record(&format!("{}:error", operation), elapsed_ns),
        }

        result
    }

    /// Spawns the periodic cleanup task.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration, max_idle: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                monitor.cleanup(max_idle);
            }
        })
    }

    /// Spawns a task feeding `performance.metric` bus events into the
    /// monitor.
    pub fn attach_bus(self: &Arc<Self>, bus: &Arc<EventBus>) -> JoinHandle<()> {
        let monitor = self.clone();
        let mut stream = bus.subscribe("performance.metric");
        tokio::spawn(async move {
            while let Ok(event) = stream.recv().await {
                if let GatewayEvent::PerformanceMetric(metric) = event {
                    monitor.record_metric(&metric);
                }
            }
        })
    }
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("operation_count", &self.operations.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
