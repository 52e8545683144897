// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Audit trail endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use adsgate_core::{AuditRecord, VariableId};
use adsgate_store::AuditStatistics;

use crate::response::HandlerResult;
use crate::state::AppState;

/// Audit listing parameters.
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    /// Maximum records (default 100, capped at 1 000).
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(100).min(1_000)
    }
}

/// `GET /api/v1/audit`
pub async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> HandlerResult<Json<Vec<AuditRecord>>> {
    Ok(Json(state.gateway.list_audit(query.limit()).await?))
}

/// `GET /api/v1/audit/variable/{id}`
pub async fn audit_by_variable(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> HandlerResult<Json<Vec<AuditRecord>>> {
    Ok(Json(
        state
            .gateway
            .audit_by_variable(&VariableId::new(id), query.limit())
            .await?,
    ))
}

/// `GET /api/v1/audit/actor/{actor}`
pub async fn audit_by_actor(
    State(state): State<AppState>,
    Path(actor): Path<String>,
    Query(query): Query<AuditQuery>,
) -> HandlerResult<Json<Vec<AuditRecord>>> {
    Ok(Json(
        state.gateway.audit_by_actor(&actor, query.limit()).await?,
    ))
}

/// `GET /api/v1/audit/stats`
pub async fn audit_stats(State(state): State<AppState>) -> HandlerResult<Json<AuditStatistics>> {
    Ok(Json(state.gateway.audit_stats().await?))
}
