// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Application state shared across handlers.

use std::sync::Arc;

use axum::http::HeaderMap;

use adsgate_engine::Gateway;

/// Header carrying the opaque caller identity echoed into audit records.
pub const ACTOR_HEADER: &str = "x-actor";

/// Application state: the gateway facade is the only dependency the
/// handlers have.
#[derive(Clone)]
pub struct AppState {
    /// The engine facade.
    pub gateway: Arc<Gateway>,
}

impl AppState {
    /// Creates the state.
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

/// Extracts the caller identity from the request headers.
///
/// The identity is an opaque string; absent or unreadable headers fall
/// back to `anonymous`.
pub fn actor_from(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}
