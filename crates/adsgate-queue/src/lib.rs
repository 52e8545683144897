// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # adsgate-queue
//!
//! Durable priority work queues for the ADSGATE gateway.
//!
//! Four logically separate queues (variable-write, persistence,
//! discovery, notification) drained by a worker pool in strict priority
//! order. Storage is pluggable: in-process memory, or the cache
//! backend's durable lists so enqueued work survives restarts.
//!
//! ## Guarantees
//!
//! - FIFO within a queue; writes to the same variable apply in enqueue
//!   order
//! - At most `max_attempts` handler invocations per job, with
//!   exponential backoff between them (1 s doubling to 60 s)
//! - The failure counter increments exactly once per terminal failure
//! - A write job's ack resolves only after its handler succeeded
//! - Shutdown drains by priority inside a grace window, then halts

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod backend;
mod job;
mod worker;

pub use backend::{MemoryQueue, QueueBackend, RedisQueue};
pub use job::{
    Job, JobOutcome, JobPayload, JobRecord, JobState, QueueKind, DEFAULT_MAX_ATTEMPTS,
};
pub use worker::{JobHandler, QueueConfig, QueueHealth, QueueStats, WorkQueue};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
