// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Fixed-capacity per-variable sample history.
//!
//! The ring buffer is the in-memory hot path for history queries: one
//! fixed-size ring per variable, created lazily on first push. A full
//! ring overwrites its oldest entry; by design no sample is ever rejected.
//!
//! # Concurrency
//!
//! Each ring has a single producer (the session task that owns the
//! variable) and any number of consumers. All read operations return
//! snapshot copies; internal slots are never exposed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{Sample, VariableId};

// =============================================================================
// Ring Buffer
// =============================================================================

/// A fixed-capacity ring of samples.
#[derive(Debug)]
pub struct RingBuffer {
    entries: VecDeque<Sample>,
    capacity: usize,
}

impl RingBuffer {
    /// Creates a ring with the given capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes a sample, overwriting the oldest entry once full. O(1).
    pub fn push(&mut self, sample: Sample) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(sample);
    }

    /// Returns a copy of the newest entry. O(1).
    pub fn latest(&self) -> Option<Sample> {
        self.entries.back().cloned()
    }

    /// Returns a copy of the oldest entry. O(1).
    pub fn oldest(&self) -> Option<Sample> {
        self.entries.front().cloned()
    }

    /// Returns a copy of the i-th entry in chronological order. O(1).
    pub fn at(&self, index: usize) -> Option<Sample> {
        self.entries.get(index).cloned()
    }

    /// Returns entries with `start_ms <= t <= end_ms` in chronological
    /// order. O(n).
    pub fn range(&self, start_ms: i64, end_ms: i64) -> Vec<Sample> {
        self.entries
            .iter()
            .filter(|s| s.timestamp_ms >= start_ms && s.timestamp_ms <= end_ms)
            .cloned()
            .collect()
    }

    /// Returns the last `n` entries in chronological order. O(n).
    pub fn last_n(&self, n: usize) -> Vec<Sample> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Computes statistics over the current entries. O(n).
    ///
    /// min/max/average cover numeric-valued entries only; the latest
    /// value is returned regardless of type.
    pub fn stats(&self) -> RingStats {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut numeric_count = 0usize;

        for sample in &self.entries {
            if let Some(v) = sample.value.as_f64() {
                if sample.value.is_numeric() {
                    min = min.min(v);
                    max = max.max(v);
                    sum += v;
                    numeric_count += 1;
                }
            }
        }

        RingStats {
            count: self.entries.len(),
            min: (numeric_count > 0).then_some(min),
            max: (numeric_count > 0).then_some(max),
            average: (numeric_count > 0).then(|| sum / numeric_count as f64),
            latest: self.latest(),
        }
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if the ring is at capacity.
    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// Returns the fixed capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Statistics over the current ring contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingStats {
    /// Number of stored entries.
    pub count: usize,
    /// Minimum over numeric entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Maximum over numeric entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Average over numeric entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    /// The newest entry regardless of type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<Sample>,
}

// =============================================================================
// Variable Buffers
// =============================================================================

/// Per-variable rings, created lazily on first push.
pub struct VariableBuffers {
    buffers: DashMap<VariableId, Arc<RwLock<RingBuffer>>>,
    default_capacity: usize,
    total_pushes: AtomicU64,
}

impl VariableBuffers {
    /// Creates the map with the engine's default per-variable capacity.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            default_capacity: default_capacity.max(1),
            total_pushes: AtomicU64::new(0),
        }
    }

    /// Pushes a sample into the variable's ring, creating it if needed.
    pub fn push(&self, variable_id: &VariableId, sample: Sample) {
        let buffer = self
            .buffers
            .entry(variable_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(RingBuffer::new(self.default_capacity))))
            .clone();

        buffer.write().push(sample);
        self.total_pushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the ring for one variable, if it exists.
    pub fn get(&self, variable_id: &VariableId) -> Option<Arc<RwLock<RingBuffer>>> {
        self.buffers.get(variable_id).map(|r| r.value().clone())
    }

    /// Returns the newest sample for one variable.
    pub fn latest(&self, variable_id: &VariableId) -> Option<Sample> {
        self.get(variable_id).and_then(|b| b.read().latest())
    }

    /// Returns the last `n` samples for one variable, chronological.
    pub fn last_n(&self, variable_id: &VariableId, n: usize) -> Vec<Sample> {
        self.get(variable_id)
            .map(|b| b.read().last_n(n))
            .unwrap_or_default()
    }

    /// Returns samples in `[start_ms, end_ms]` for one variable.
    pub fn range(&self, variable_id: &VariableId, start_ms: i64, end_ms: i64) -> Vec<Sample> {
        self.get(variable_id)
            .map(|b| b.read().range(start_ms, end_ms))
            .unwrap_or_default()
    }

    /// Returns stats for one variable's ring.
    pub fn stats(&self, variable_id: &VariableId) -> Option<RingStats> {
        self.get(variable_id).map(|b| b.read().stats())
    }

    /// Drops the ring for one variable.
    pub fn remove(&self, variable_id: &VariableId) {
        self.buffers.remove(variable_id);
    }

    /// Clears one variable's ring without dropping it.
    pub fn clear(&self, variable_id: &VariableId) {
        if let Some(buffer) = self.get(variable_id) {
            buffer.write().clear();
        }
    }

    /// Clears every ring.
    pub fn clear_all(&self) {
        for entry in self.buffers.iter() {
            entry.value().write().clear();
        }
    }

    /// Returns a memory and occupancy summary across all rings.
    pub fn summary(&self) -> BufferSummary {
        let mut total_entries = 0usize;
        let mut estimated_bytes = 0u64;

        for entry in self.buffers.iter() {
            let ring = entry.value().read();
            total_entries += ring.len();
            // Rough per-entry estimate: Sample struct plus small payloads.
            estimated_bytes += (ring.len() * 64) as u64;
        }

        BufferSummary {
            variable_count: self.buffers.len(),
            total_entries,
            estimated_bytes,
            default_capacity: self.default_capacity,
            total_pushes: self.total_pushes.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for VariableBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableBuffers")
            .field("variable_count", &self.buffers.len())
            .field("default_capacity", &self.default_capacity)
            .finish()
    }
}

/// Occupancy summary across all variable rings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSummary {
    /// Number of variables with a ring.
    pub variable_count: usize,
    /// Total entries across all rings.
    pub total_entries: usize,
    /// Estimated memory footprint in bytes.
    pub estimated_bytes: u64,
    /// Capacity assigned to new rings.
    pub default_capacity: usize,
    /// Cumulative pushes since startup.
    pub total_pushes: u64,
}

// =============================================================================
// Tests
// =============================================================================
