// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # adsgate-api
//!
//! The REST and WebSocket management surface over the gateway facade.
//!
//! Error bodies are `{"error": "<text>"}` with conventional status
//! codes; queued operations answer `{"jobId": "<uuid>"}`. The caller's
//! identity travels in the `x-actor` header and is echoed into audit
//! records and carries no further authority.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod handlers;
pub mod response;
pub mod server;
pub mod state;

pub use response::{ApiFailure, ErrorBody, HandlerResult, JobAccepted};
pub use server::{ApiConfig, ApiServer};
pub use state::{actor_from, AppState, ACTOR_HEADER};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
