// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Store Integration Tests
//!
//! The persistence path end to end: queue handlers feeding the store,
//! newest-first queries, and the cache-is-hintful property (a degraded
//! cache never contradicts the persisted truth).

use std::sync::Arc;
use std::time::Duration;

use adsgate_cache::{variable_key, CacheClient, CacheConfig};
use adsgate_core::{Quality, Sample, StorableSample, Value, VariableId};
use adsgate_engine::PersistJobHandler;
use adsgate_queue::{Job, JobPayload, MemoryQueue, QueueConfig, QueueKind, WorkQueue};
use adsgate_store::{HistoryEntry, StoreConfig, TimeSeriesStore};
use adsgate_tests::common::fixtures::SampleFixtures;

async fn temp_store() -> (Arc<TimeSeriesStore>, tempfile::TempDir) {
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
async fn test_queue_to_store_pipeline() {
    let (store, _dir) = temp_store().await;

    let queue = WorkQueue::new(
        Arc::new(MemoryQueue::new()),
        QueueConfig {
            worker_count: 1,
            poll_idle: Duration::from_millis(5),
            ..Default::default()
        },
        None,
    );
    queue.register_handler(QueueKind::Persistence, PersistJobHandler::new(store.clone()));
    queue.start();

    for sample in SampleFixtures::ramp(5) {
        queue
            .enqueue(Job::new(JobPayload::PersistSamples {
                variable_id: VariableId::new("v1"),
                variable_name: "temp".to_string(),
                samples: vec![sample],
            }))
            .await
            .unwrap();
    }

    // Drain, then check the store saw everything newest-first.
    queue.shutdown().await;

    let entries = store
        .query_history(&VariableId::new("v1"), None, None, 100)
        .await
        .unwrap();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0].sample.value.as_f64(), Some(5.0));
    assert_eq!(entries[4].sample.value.as_f64(), Some(1.0));

    let stats = store.statistics(&VariableId::new("v1")).await.unwrap();
    assert_eq!(stats.count, 5);
    assert_eq!(stats.average, Some(3.0));
}

#[tokio::test]
async fn test_cache_miss_never_contradicts_store() {
    // A cache pointing nowhere serves misses; the store remains the
    // single source of truth for the same timestamp.
    let (store, _dir) = temp_store().await;
    let cache = CacheClient::new(
        CacheConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            op_timeout: Duration::from_millis(50),
        },
        None,
    )
    .unwrap();

    let id = VariableId::new("v1");
    let sample = Sample::at(1_000, Value::Float(23.5), Quality::Good);

    store
        .append_history(HistoryEntry {
            variable_id: id.clone(),
            variable_name: "temp".to_string(),
            sample: sample.clone(),
        })
        .await
        .unwrap();
    // The cache write silently drops in degraded mode.
    cache
        .set(&variable_key(&id), &StorableSample::from(&sample), None)
        .await;

    let cached: Option<StorableSample> = cache.get(&variable_key(&id)).await;
    assert!(cached.is_none(), "degraded cache must answer miss");

    // The miss forces the caller to the store, which has the truth.
    let entries = store.query_history(&id, None, None, 1).await.unwrap();
    assert_eq!(entries[0].sample, sample);
}

#[tokio::test]
async fn test_audit_pipeline_with_indexes() {
    let (store, _dir) = temp_store().await;

    for i in 0..3 {
        let record = adsgate_core::AuditRecord::success("variable.write", "alice")
            .with_variable(VariableId::new("v1"), "temp")
            .with_values(Some(Value::Int(i)), Some(Value::Int(i + 1)));
        store.append_audit(&record).await.unwrap();
    }
    store
        .append_audit(&adsgate_core::AuditRecord::failed("variable.write", "bob"))
        .await
        .unwrap();

    assert_eq!(store.audit_by_actor("alice", 10).await.unwrap().len(), 3);
    assert_eq!(
        store
            .audit_by_variable(&VariableId::new("v1"), 10)
            .await
            .unwrap()
            .len(),
        3
    );

    let stats = store.audit_statistics().await.unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.by_action["variable.write"], 4);
}

#[tokio::test]
async fn test_coalesced_batches_survive_roundtrip() {
    let (store, _dir) = temp_store().await;

    let queue = WorkQueue::new(
        Arc::new(MemoryQueue::new()),
        QueueConfig {
            worker_count: 1,
            poll_idle: Duration::from_millis(5),
            coalesce_threshold: 2,
            ..Default::default()
        },
        None,
    );
    queue.register_handler(QueueKind::Persistence, PersistJobHandler::new(store.clone()));

    // Backlog before the worker starts so coalescing kicks in.
    for sample in SampleFixtures::ramp(20) {
        queue
            .enqueue(Job::new(JobPayload::PersistSamples {
                variable_id: VariableId::new("v1"),
                variable_name: "temp".to_string(),
                samples: vec![sample],
            }))
            .await
            .unwrap();
    }
    queue.start();
    // Shutdown drains the backlog inside its grace window.
    queue.shutdown().await;

    let stats = store.statistics(&VariableId::new("v1")).await.unwrap();
    assert_eq!(stats.count, 20);

    // Far fewer handler executions than jobs is the point of
    // coalescing; the samples themselves must all survive.
    let entries = store
        .query_history(&VariableId::new("v1"), None, None, 100)
        .await
        .unwrap();
    assert_eq!(entries.len(), 20);
}
