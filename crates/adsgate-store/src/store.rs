// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The RocksDB-backed time-series store.
//!
//! One database directory, column families as logical tables. RocksDB
//! serializes writes internally and tolerates concurrent readers; batch
//! appends through `WriteBatch` carry the sustained sample load. Every
//! database call runs under `spawn_blocking` so the async runtime never
//! stalls on disk.
//!
//! Schema versioning is by additive column family only: new families may
//! appear in later releases, existing layouts never change shape.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rocksdb::{
    BlockBasedOptions, ColumnFamilyDescriptor, DBCompressionType, Direction, IteratorMode,
    Options, WriteBatch, DB,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use adsgate_core::{
    AuditRecord, ConnectionConfig, ConnectionId, MetricType, Sample, StoreError, StoreResult,
    VariableId,
};

use crate::rows::{
    key_prefix, prefixed_key, time_key, timestamp_of_prefixed, timestamp_of_time_key, AuditRow,
    HistoryRow, MetricRow,
};

// =============================================================================
// Column Families
// =============================================================================

const CF_HISTORY: &str = "history";
const CF_HISTORY_BY_TIME: &str = "history_by_time";
const CF_METRICS: &str = "metrics";
const CF_AUDIT: &str = "audit";
const CF_AUDIT_BY_VARIABLE: &str = "audit_by_variable";
const CF_AUDIT_BY_ACTOR: &str = "audit_by_actor";
const CF_CONNECTIONS: &str = "connections";

const ALL_CFS: [&str; 7] = [
    CF_HISTORY,
    CF_HISTORY_BY_TIME,
    CF_METRICS,
    CF_AUDIT,
    CF_AUDIT_BY_VARIABLE,
    CF_AUDIT_BY_ACTOR,
    CF_CONNECTIONS,
];

// =============================================================================
// Configuration
// =============================================================================

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database directory.
    pub path: PathBuf,
    /// Enable LZ4 compression.
    #[serde(default = "default_compression")]
    pub compression: bool,
}

fn default_compression() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/adsgate.db"),
            compression: default_compression(),
        }
    }
}

// =============================================================================
// Public Row Shapes
// =============================================================================

/// One history entry as exposed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The variable.
    pub variable_id: VariableId,
    /// The variable's name at append time.
    pub variable_name: String,
    /// The sample.
    pub sample: Sample,
}

/// One system metric as exposed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    /// Metric category name.
    pub metric_type: String,
    /// Metric value.
    pub value: f64,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// Optional pre-rendered JSON metadata.
    pub metadata: Option<String>,
}

/// Aggregates over one variable's stored history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatistics {
    /// Stored sample count.
    pub count: u64,
    /// Minimum over numeric samples.
    pub min: Option<f64>,
    /// Maximum over numeric samples.
    pub max: Option<f64>,
    /// Average over numeric samples.
    pub average: Option<f64>,
    /// Newest sample regardless of type.
    pub latest: Option<Sample>,
}

/// Audit aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStatistics {
    /// Total records.
    pub total: u64,
    /// Successful actions.
    pub success: u64,
    /// Failed actions.
    pub failed: u64,
    /// Record counts per action name.
    pub by_action: HashMap<String, u64>,
}

/// What a retention pass removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    /// History rows removed.
    pub history_removed: u64,
    /// Metric rows removed.
    pub metrics_removed: u64,
    /// Audit rows removed.
    pub audit_removed: u64,
}

// =============================================================================
// TimeSeriesStore
// =============================================================================

/// The durable store. Cheap to clone via `Arc`.
pub struct TimeSeriesStore {
    db: Arc<DB>,
    seq: AtomicU32,
    path: PathBuf,
}

impl TimeSeriesStore {
    /// Opens or creates the database.
    pub async fn open(config: StoreConfig) -> StoreResult<Arc<Self>> {
        let path = config.path.clone();
        let db = tokio::task::spawn_blocking(move || Self::open_db(&config))
            .await
            .map_err(|e| StoreError::open(path.display().to_string(), e.to_string()))??;

        info!(path = %path.display(), "time-series store opened");

        Ok(Arc::new(Self {
            db: Arc::new(db),
            seq: AtomicU32::new(rand::random()),
            path,
        }))
    }

    fn open_db(config: &StoreConfig) -> StoreResult<DB> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::open(config.path.display().to_string(), e.to_string()))?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_background_jobs(4);
        opts.increase_parallelism(4);
        opts.set_level_compaction_dynamic_level_bytes(true);

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_cache_index_and_filter_blocks(true);

        let compression = if config.compression {
            DBCompressionType::Lz4
        } else {
            DBCompressionType::None
        };

        let descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(compression);
                cf_opts.set_block_based_table_factory(&block_opts);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        DB::open_cf_descriptors(&opts, &config.path, descriptors)
            .map_err(|e| StoreError::open(config.path.display().to_string(), e.to_string()))
    }

    /// Returns the database directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    async fn run_blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<DB>) -> StoreResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(|e| StoreError::write(format!("blocking task failed: {}", e)))?
    }

    // =========================================================================
    // Variable History
    // =========================================================================

    /// Appends one history entry.
    pub async fn append_history(&self, entry: HistoryEntry) -> StoreResult<()> {
        self.append_history_batch(vec![entry]).await
    }

    /// Appends a batch of history entries in one write.
    pub async fn append_history_batch(&self, entries: Vec<HistoryEntry>) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let keyed: Vec<(Vec<u8>, [u8; 12], Vec<u8>)> = entries
            .iter()
            .map(|entry| {
                let seq = self.next_seq();
                let row = HistoryRow::new(&entry.variable_id, &entry.variable_name, &entry.sample);
                let value = bincode::serialize(&row)
                    .map_err(|e| StoreError::write(format!("encode history row: {}", e)))?;
                Ok((
                    prefixed_key(entry.variable_id.as_str(), entry.sample.timestamp_ms, seq),
                    time_key(entry.sample.timestamp_ms, seq),
                    value,
                ))
            })
            .collect::<StoreResult<_>>()?;

        self.run_blocking(move |db| {
            let history = cf(&db, CF_HISTORY)?;
            let by_time = cf(&db, CF_HISTORY_BY_TIME)?;

            let mut batch = WriteBatch::default();
            for (primary, secondary, value) in &keyed {
                batch.put_cf(history, primary, value);
                batch.put_cf(by_time, secondary, value);
            }
            db.write(batch).map_err(|e| StoreError::write(e.to_string()))
        })
        .await
    }

    /// Queries one variable's history, newest first, inclusive bounds.
    pub async fn query_history(
        &self,
        variable_id: &VariableId,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<HistoryEntry>> {
        let id = variable_id.as_str().to_string();
        let start = start_ms.unwrap_or(i64::MIN);
        let end = end_ms.unwrap_or(i64::MAX);

        self.run_blocking(move |db| {
            let history = cf(&db, CF_HISTORY)?;
            let prefix = key_prefix(&id);
            let upper = prefixed_key(&id, end, u32::MAX);

            let mut entries = Vec::new();
            for item in db.iterator_cf(history, IteratorMode::From(&upper, Direction::Reverse)) {
                let (key, value) = item.map_err(|e| StoreError::read(e.to_string()))?;
                if !key.starts_with(&prefix) {
                    break;
                }
                let ts = timestamp_of_prefixed(&key, id.len()).unwrap_or(i64::MIN);
                if ts < start {
                    break;
                }
                if ts > end {
                    continue;
                }

                let row: HistoryRow = bincode::deserialize(&value)
                    .map_err(|e| StoreError::corrupted(e.to_string()))?;
                entries.push(HistoryEntry {
                    variable_id: VariableId::new(row.variable_id.clone()),
                    variable_name: row.variable_name.clone(),
                    sample: row.sample(),
                });
                if entries.len() == limit {
                    break;
                }
            }
            Ok(entries)
        })
        .await
    }

    /// The newest samples across all variables, newest first.
    pub async fn recent_history(&self, limit: usize) -> StoreResult<Vec<HistoryEntry>> {
        self.run_blocking(move |db| {
            let by_time = cf(&db, CF_HISTORY_BY_TIME)?;

            let mut entries = Vec::new();
            for item in db.iterator_cf(by_time, IteratorMode::End) {
                let (_, value) = item.map_err(|e| StoreError::read(e.to_string()))?;
                let row: HistoryRow = bincode::deserialize(&value)
                    .map_err(|e| StoreError::corrupted(e.to_string()))?;
                entries.push(HistoryEntry {
                    variable_id: VariableId::new(row.variable_id.clone()),
                    variable_name: row.variable_name.clone(),
                    sample: row.sample(),
                });
                if entries.len() == limit {
                    break;
                }
            }
            Ok(entries)
        })
        .await
    }

    /// Aggregates over one variable's full stored history.
    pub async fn statistics(&self, variable_id: &VariableId) -> StoreResult<StoreStatistics> {
        let id = variable_id.as_str().to_string();

        self.run_blocking(move |db| {
            let history = cf(&db, CF_HISTORY)?;
            let prefix = key_prefix(&id);

            let mut count = 0u64;
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            let mut sum = 0.0;
            let mut numeric = 0u64;
            let mut latest: Option<(i64, Sample)> = None;

            for item in db.iterator_cf(history, IteratorMode::From(&prefix, Direction::Forward)) {
                let (key, value) = item.map_err(|e| StoreError::read(e.to_string()))?;
                if !key.starts_with(&prefix) {
                    break;
                }
                let row: HistoryRow = bincode::deserialize(&value)
                    .map_err(|e| StoreError::corrupted(e.to_string()))?;
                let sample = row.sample();

                count += 1;
                if sample.value.is_numeric() {
                    if let Some(v) = sample.value.as_f64() {
                        min = min.min(v);
                        max = max.max(v);
                        sum += v;
                        numeric += 1;
                    }
                }
                if latest.as_ref().map(|(ts, _)| sample.timestamp_ms >= *ts).unwrap_or(true) {
                    latest = Some((sample.timestamp_ms, sample));
                }
            }

            Ok(StoreStatistics {
                count,
                min: (numeric > 0).then_some(min),
                max: (numeric > 0).then_some(max),
                average: (numeric > 0).then(|| sum / numeric as f64),
                latest: latest.map(|(_, sample)| sample),
            })
        })
        .await
    }

    // =========================================================================
    // System Metrics
    // =========================================================================

    /// Appends one system metric.
    pub async fn append_metric(
        &self,
        metric_type: MetricType,
        value: f64,
        metadata: Option<String>,
    ) -> StoreResult<()> {
        let timestamp_ms = Utc::now().timestamp_millis();
        let key = time_key(timestamp_ms, self.next_seq());
        let row = MetricRow {
            metric_type: metric_type.as_str().to_string(),
            value,
            timestamp_ms,
            metadata,
        };
        let encoded =
            bincode::serialize(&row).map_err(|e| StoreError::write(e.to_string()))?;

        self.run_blocking(move |db| {
            let metrics = cf(&db, CF_METRICS)?;
            db.put_cf(metrics, key, encoded)
                .map_err(|e| StoreError::write(e.to_string()))
        })
        .await
    }

    /// Queries metrics, newest first, optionally filtered by type.
    pub async fn query_metrics(
        &self,
        metric_type: Option<MetricType>,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<MetricEntry>> {
        let filter = metric_type.map(|t| t.as_str().to_string());
        let start = start_ms.unwrap_or(i64::MIN);
        let end = end_ms.unwrap_or(i64::MAX);

        self.run_blocking(move |db| {
            let metrics = cf(&db, CF_METRICS)?;
            let upper = time_key(end, u32::MAX);

            let mut entries = Vec::new();
            for item in db.iterator_cf(metrics, IteratorMode::From(&upper, Direction::Reverse)) {
                let (key, value) = item.map_err(|e| StoreError::read(e.to_string()))?;
                let ts = timestamp_of_time_key(&key).unwrap_or(i64::MIN);
                if ts < start {
                    break;
                }

                let row: MetricRow = bincode::deserialize(&value)
                    .map_err(|e| StoreError::corrupted(e.to_string()))?;
                if let Some(filter) = &filter {
                    if row.metric_type != *filter {
                        continue;
                    }
                }
                entries.push(MetricEntry {
                    metric_type: row.metric_type,
                    value: row.value,
                    timestamp_ms: row.timestamp_ms,
                    metadata: row.metadata,
                });
                if entries.len() == limit {
                    break;
                }
            }
            Ok(entries)
        })
        .await
    }

    // =========================================================================
    // Audit
    // =========================================================================

    /// Appends an audit record to the primary table and both indexes.
    pub async fn append_audit(&self, record: &AuditRecord) -> StoreResult<()> {
        let seq = self.next_seq();
        let row = AuditRow::from(record);
        let encoded = bincode::serialize(&row).map_err(|e| StoreError::write(e.to_string()))?;

        let primary = time_key(record.timestamp_ms, seq);
        let by_variable = record
            .variable_id
            .as_ref()
            .map(|id| prefixed_key(id.as_str(), record.timestamp_ms, seq));
        let by_actor = prefixed_key(&record.actor, record.timestamp_ms, seq);

        self.run_blocking(move |db| {
            let audit = cf(&db, CF_AUDIT)?;
            let audit_by_variable = cf(&db, CF_AUDIT_BY_VARIABLE)?;
            let audit_by_actor = cf(&db, CF_AUDIT_BY_ACTOR)?;

            let mut batch = WriteBatch::default();
            batch.put_cf(audit, primary, &encoded);
            if let Some(key) = &by_variable {
                batch.put_cf(audit_by_variable, key, &encoded);
            }
            batch.put_cf(audit_by_actor, &by_actor, &encoded);
            db.write(batch).map_err(|e| StoreError::write(e.to_string()))
        })
        .await
    }

    /// Lists audit records, newest first.
    pub async fn query_audit(&self, limit: usize) -> StoreResult<Vec<AuditRecord>> {
        self.run_blocking(move |db| {
            let audit = cf(&db, CF_AUDIT)?;
            collect_audit(db.iterator_cf(audit, IteratorMode::End), None, limit)
        })
        .await
    }

    /// Lists audit records for one variable, newest first.
    pub async fn audit_by_variable(
        &self,
        variable_id: &VariableId,
        limit: usize,
    ) -> StoreResult<Vec<AuditRecord>> {
        let id = variable_id.as_str().to_string();
        self.run_blocking(move |db| {
            let index = cf(&db, CF_AUDIT_BY_VARIABLE)?;
            let prefix = key_prefix(&id);
            let upper = prefixed_key(&id, i64::MAX, u32::MAX);
            collect_audit(
                db.iterator_cf(index, IteratorMode::From(&upper, Direction::Reverse)),
                Some(prefix),
                limit,
            )
        })
        .await
    }

    /// Lists audit records for one actor, newest first.
    pub async fn audit_by_actor(&self, actor: &str, limit: usize) -> StoreResult<Vec<AuditRecord>> {
        let actor = actor.to_string();
        self.run_blocking(move |db| {
            let index = cf(&db, CF_AUDIT_BY_ACTOR)?;
            let prefix = key_prefix(&actor);
            let upper = prefixed_key(&actor, i64::MAX, u32::MAX);
            collect_audit(
                db.iterator_cf(index, IteratorMode::From(&upper, Direction::Reverse)),
                Some(prefix),
                limit,
            )
        })
        .await
    }

    /// Aggregates over the whole audit table.
    pub async fn audit_statistics(&self) -> StoreResult<AuditStatistics> {
        self.run_blocking(move |db| {
            let audit = cf(&db, CF_AUDIT)?;

            let mut stats = AuditStatistics {
                total: 0,
                success: 0,
                failed: 0,
                by_action: HashMap::new(),
            };

            for item in db.iterator_cf(audit, IteratorMode::Start) {
                let (_, value) = item.map_err(|e| StoreError::read(e.to_string()))?;
                let row: AuditRow = bincode::deserialize(&value)
                    .map_err(|e| StoreError::corrupted(e.to_string()))?;

                stats.total += 1;
                if row.success {
                    stats.success += 1;
                } else {
                    stats.failed += 1;
                }
                *stats.by_action.entry(row.action).or_insert(0) += 1;
            }
            Ok(stats)
        })
        .await
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Persists a connection configuration.
    pub async fn upsert_connection(&self, config: &ConnectionConfig) -> StoreResult<()> {
        let key = config.id.as_str().as_bytes().to_vec();
        let encoded = bincode::serialize(config).map_err(|e| StoreError::write(e.to_string()))?;

        self.run_blocking(move |db| {
            let connections = cf(&db, CF_CONNECTIONS)?;
            db.put_cf(connections, key, encoded)
                .map_err(|e| StoreError::write(e.to_string()))
        })
        .await
    }

    /// Deletes a persisted connection.
    pub async fn delete_connection(&self, id: &ConnectionId) -> StoreResult<()> {
        let key = id.as_str().as_bytes().to_vec();
        self.run_blocking(move |db| {
            let connections = cf(&db, CF_CONNECTIONS)?;
            db.delete_cf(connections, key)
                .map_err(|e| StoreError::write(e.to_string()))
        })
        .await
    }

    /// Loads every persisted connection, used at startup.
    pub async fn load_connections(&self) -> StoreResult<Vec<ConnectionConfig>> {
        self.run_blocking(move |db| {
            let connections = cf(&db, CF_CONNECTIONS)?;

            let mut configs = Vec::new();
            for item in db.iterator_cf(connections, IteratorMode::Start) {
                let (_, value) = item.map_err(|e| StoreError::read(e.to_string()))?;
                let config: ConnectionConfig = bincode::deserialize(&value)
                    .map_err(|e| StoreError::corrupted(e.to_string()))?;
                configs.push(config);
            }
            Ok(configs)
        })
        .await
    }

    // =========================================================================
    // Retention
    // =========================================================================

    /// Deletes rows strictly older than the cutoff from history, metrics,
    /// and audit, then compacts.
    pub async fn cleanup(&self, retention_days: u32) -> StoreResult<CleanupReport> {
        let cutoff_ms =
            Utc::now().timestamp_millis() - (retention_days as i64) * 24 * 60 * 60 * 1000;

        let report = self
            .run_blocking(move |db| {
                let mut report = CleanupReport::default();

                // Time-keyed tables: count then range-delete (end exclusive).
                for (name, counter) in [
                    (CF_HISTORY_BY_TIME, None),
                    (CF_METRICS, Some(&mut report.metrics_removed)),
                    (CF_AUDIT, Some(&mut report.audit_removed)),
                ] {
                    let handle = cf(&db, name)?;
                    let mut removed = 0u64;
                    for item in db.iterator_cf(handle, IteratorMode::Start) {
                        let (key, _) = item.map_err(|e| StoreError::read(e.to_string()))?;
                        match timestamp_of_time_key(&key) {
                            Some(ts) if ts < cutoff_ms => removed += 1,
                            _ => break,
                        }
                    }
                    if let Some(counter) = counter {
                        *counter = removed;
                    }

                    let mut batch = WriteBatch::default();
                    batch.delete_range_cf(handle, [0u8; 12], time_key(cutoff_ms, 0));
                    db.write(batch).map_err(|e| StoreError::write(e.to_string()))?;
                }

                // Prefix-keyed tables: scan for embedded timestamps.
                for (name, count_into_history) in [
                    (CF_HISTORY, true),
                    (CF_AUDIT_BY_VARIABLE, false),
                    (CF_AUDIT_BY_ACTOR, false),
                ] {
                    let handle = cf(&db, name)?;
                    let mut stale: Vec<Box<[u8]>> = Vec::new();
                    for item in db.iterator_cf(handle, IteratorMode::Start) {
                        let (key, _) = item.map_err(|e| StoreError::read(e.to_string()))?;
                        let prefix_len = key.iter().position(|&b| b == 0);
                        if let Some(prefix_len) = prefix_len {
                            if let Some(ts) = timestamp_of_prefixed(&key, prefix_len) {
                                if ts < cutoff_ms {
                                    stale.push(key);
                                }
                            }
                        }
                    }
                    if count_into_history {
                        report.history_removed = stale.len() as u64;
                    }

                    let mut batch = WriteBatch::default();
                    for key in &stale {
                        batch.delete_cf(handle, key);
                    }
                    db.write(batch).map_err(|e| StoreError::write(e.to_string()))?;
                }

                // Reclaim space.
                for name in ALL_CFS {
                    let handle = cf(&db, name)?;
                    db.compact_range_cf(handle, None::<&[u8]>, None::<&[u8]>);
                }

                Ok(report)
            })
            .await?;

        debug!(
            history = report.history_removed,
            metrics = report.metrics_removed,
            audit = report.audit_removed,
            retention_days,
            "store cleanup complete"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for TimeSeriesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesStore")
            .field("path", &self.path)
            .finish()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn cf<'a>(db: &'a DB, name: &str) -> StoreResult<&'a rocksdb::ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| StoreError::read(format!("missing column family '{}'", name)))
}

fn collect_audit<I>(iter: I, prefix: Option<Vec<u8>>, limit: usize) -> StoreResult<Vec<AuditRecord>>
where
    I: Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
{
    let mut records = Vec::new();
    for item in iter {
        let (key, value) = item.map_err(|e| StoreError::read(e.to_string()))?;
        if let Some(prefix) = &prefix {
            if !key.starts_with(prefix) {
                break;
            }
        }
        let row: AuditRow =
            bincode::deserialize(&value).map_err(|e| StoreError::corrupted(e.to_string()))?;
        records.push(row.into_record());
        if records.len() == limit {
            break;
        }
    }
    Ok(records)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use adsgate_core::{Quality, Value};

    async fn open_temp() -> (Arc<TimeSeriesStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(StoreConfig {
            path: dir.path().join("db"),
            compression: false,
        })
        .await
        .unwrap();
        (store, dir)
    }

    fn entry(id: &str, ts: i64, v: f64) -> HistoryEntry {
        HistoryEntry {
            variable_id: VariableId::new(id),
            variable_name: id.to_string(),
            sample: Sample::at(ts, Value::Float(v), Quality::Good),
        }
    }

    #[tokio::test]
    async fn test_history_roundtrip_newest_first() {
        let (store, _dir) = open_temp().await;

        for i in 1..=5 {
            store.append_history(entry("v1", i * 100, i as f64)).await.unwrap();
        }

        let entries = store.query_history(&VariableId::new("v1"), None, None, 10).await.unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].sample.timestamp_ms, 500);
        assert_eq!(entries[4].sample.timestamp_ms, 100);
    }

    #[tokio::test]
    async fn test_history_range_and_limit() {
        let (store, _dir) = open_temp().await;

        let batch: Vec<HistoryEntry> = (1..=10).map(|i| entry("v1", i * 100, i as f64)).collect();
        store.append_history_batch(batch).await.unwrap();

        let entries = store
            .query_history(&VariableId::new("v1"), Some(200), Some(700), 100)
            .await
            .unwrap();
        assert_eq!(entries.len(), 6);
        assert_eq!(entries.first().unwrap().sample.timestamp_ms, 700);
        assert_eq!(entries.last().unwrap().sample.timestamp_ms, 200);

        let limited = store
            .query_history(&VariableId::new("v1"), None, None, 3)
            .await
            .unwrap();
        assert_eq!(limited.len(), 3);
        assert_eq!(limited[0].sample.timestamp_ms, 1000);
    }

    #[tokio::test]
    async fn test_history_isolated_per_variable() {
        let (store, _dir) = open_temp().await;

        store.append_history(entry("v1", 100, 1.0)).await.unwrap();
        store.append_history(entry("v10", 100, 10.0)).await.unwrap();

        let entries = store.query_history(&VariableId::new("v1"), None, None, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sample.value.as_f64(), Some(1.0));
    }

    #[tokio::test]
    async fn test_statistics() {
        let (store, _dir) = open_temp().await;

        for (ts, v) in [(100, 1.0), (200, 5.0), (300, 3.0)] {
            store.append_history(entry("v1", ts, v)).await.unwrap();
        }

        let stats = store.statistics(&VariableId::new("v1")).await.unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(5.0));
        assert_eq!(stats.average, Some(3.0));
        assert_eq!(stats.latest.unwrap().timestamp_ms, 300);
    }

    #[tokio::test]
    async fn test_statistics_empty() {
        let (store, _dir) = open_temp().await;
        let stats = store.statistics(&VariableId::new("missing")).await.unwrap();
        assert_eq!(stats.count, 0);
        assert!(stats.latest.is_none());
    }

    #[tokio::test]
    async fn test_metrics_roundtrip() {
        let (store, _dir) = open_temp().await;

        store.append_metric(MetricType::MqttClients, 3.0, None).await.unwrap();
        store
            .append_metric(MetricType::AdsErrors, 1.0, Some("{\"c\":\"c1\"}".into()))
            .await
            .unwrap();

        let all = store.query_metrics(None, None, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = store
            .query_metrics(Some(MetricType::AdsErrors), None, None, 10)
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].metric_type, "ads_errors");
        assert!(filtered[0].metadata.is_some());
    }

    #[tokio::test]
    async fn test_audit_roundtrip_and_indexes() {
        let (store, _dir) = open_temp().await;

        let a = AuditRecord::success("variable.write", "alice")
            .with_variable(VariableId::new("v1"), "temp");
        let b = AuditRecord::failed("variable.write", "bob")
            .with_variable(VariableId::new("v2"), "pressure");
        let c = AuditRecord::success("connection.create", "alice");

        store.append_audit(&a).await.unwrap();
        store.append_audit(&b).await.unwrap();
        store.append_audit(&c).await.unwrap();

        assert_eq!(store.query_audit(10).await.unwrap().len(), 3);

        let by_variable = store.audit_by_variable(&VariableId::new("v1"), 10).await.unwrap();
        assert_eq!(by_variable.len(), 1);
        assert_eq!(by_variable[0].id, a.id);

        let by_actor = store.audit_by_actor("alice", 10).await.unwrap();
        assert_eq!(by_actor.len(), 2);

        let stats = store.audit_statistics().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.by_action["variable.write"], 2);
    }

    #[tokio::test]
    async fn test_connections_roundtrip() {
        let (store, _dir) = open_temp().await;

        let config: ConnectionConfig = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "name": "line 1",
            "host": "127.0.0.1",
            "target_address": "127.0.0.1.1.1"
        }))
        .unwrap();

        store.upsert_connection(&config).await.unwrap();
        let loaded = store.load_connections().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], config);

        store.delete_connection(&config.id).await.unwrap();
        assert!(store.load_connections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_rows() {
        let (store, _dir) = open_temp().await;

        let now = Utc::now().timestamp_millis();
        let old = now - 10 * 24 * 60 * 60 * 1000;

        store.append_history(entry("v1", old, 1.0)).await.unwrap();
        store.append_history(entry("v1", now, 2.0)).await.unwrap();

        let report = store.cleanup(7).await.unwrap();
        assert_eq!(report.history_removed, 1);

        let entries = store.query_history(&VariableId::new("v1"), None, None, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sample.value.as_f64(), Some(2.0));
    }

    #[tokio::test]
    async fn test_sustained_batch_appends() {
        let (store, _dir) = open_temp().await;

        // 5k samples in batches, the shape the coalescing queue produces.
        for batch_index in 0..10 {
            let batch: Vec<HistoryEntry> = (0..500)
                .map(|i| entry("v1", (batch_index * 500 + i) as i64, i as f64))
                .collect();
            store.append_history_batch(batch).await.unwrap();
        }

        let stats = store.statistics(&VariableId::new("v1")).await.unwrap();
        assert_eq!(stats.count, 5_000);
    }
}
