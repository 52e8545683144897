// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # adsgate-store
//!
//! Append-mostly time-series persistence for the ADSGATE gateway,
//! backed by RocksDB.
//!
//! Four logical tables as column families: variable history (indexed by
//! `(variable, timestamp)` and by `timestamp` alone), system metrics,
//! audit records (with variable and actor indexes), and the configured
//! connections so restarts reconstruct state. Retention cleanup deletes
//! rows strictly older than the cutoff and compacts.

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod rows;
mod store;

pub use store::{
    AuditStatistics, CleanupReport, HistoryEntry, MetricEntry, StoreConfig, StoreStatistics,
    TimeSeriesStore,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
