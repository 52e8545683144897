// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Variable endpoints.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use adsgate_core::{Sample, Variable, VariableConfig, VariableId};
use adsgate_store::{HistoryEntry, StoreStatistics};

use crate::response::{HandlerResult, JobAccepted};
use crate::state::{actor_from, AppState};

/// `GET /api/v1/variables`
pub async fn list_variables(State(state): State<AppState>) -> Json<Vec<Variable>> {
    Json(
        state
            .gateway
            .list_variables()
            .iter()
            .map(|v| (**v).clone())
            .collect(),
    )
}

/// `GET /api/v1/variables/{id}`
pub async fn get_variable(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<Json<Variable>> {
    let variable = state.gateway.get_variable(&VariableId::new(id))?;
    Ok(Json((*variable).clone()))
}

/// `POST /api/v1/variables`
pub async fn create_variable(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(config): Json<VariableConfig>,
) -> HandlerResult<(StatusCode, Json<Variable>)> {
    let actor = actor_from(&headers);
    let variable = state.gateway.create_variable(config, &actor).await?;
    Ok((StatusCode::CREATED, Json((*variable).clone())))
}

/// `DELETE /api/v1/variables/{id}`
pub async fn delete_variable(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> HandlerResult<StatusCode> {
    let actor = actor_from(&headers);
    state
        .gateway
        .delete_variable(&VariableId::new(id), &actor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Write request body.
#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    /// The value to write, coerced to the variable's declared type.
    pub value: serde_json::Value,
}

/// `POST /api/v1/variables/{id}/write`
pub async fn write_variable(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<WriteRequest>,
) -> HandlerResult<(StatusCode, Json<JobAccepted>)> {
    let actor = actor_from(&headers);
    let job_id = state
        .gateway
        .write_variable(&VariableId::new(id), request.value, "rest", &actor)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted::new(job_id))))
}

/// History query parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Inclusive range start, unix ms.
    pub start: Option<i64>,
    /// Inclusive range end, unix ms.
    pub end: Option<i64>,
    /// Maximum entries (default 100, capped at 10 000).
    pub limit: Option<usize>,
}

/// `GET /api/v1/variables/{id}/history`
pub async fn read_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> HandlerResult<Json<Vec<HistoryEntry>>> {
    let limit = query.limit.unwrap_or(100).min(10_000);
    let entries = state
        .gateway
        .read_history(&VariableId::new(id), query.start, query.end, limit)
        .await?;
    Ok(Json(entries))
}

/// `GET /api/v1/variables/{id}/value`
///
/// The freshest known sample: ring buffer, then cache (served as
/// `uncertain`), then store. `null` when nothing has been sampled yet.
pub async fn read_value(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<Json<Option<Sample>>> {
    Ok(Json(
        state.gateway.read_current(&VariableId::new(id)).await?,
    ))
}

/// `GET /api/v1/variables/{id}/statistics`
pub async fn read_statistics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<Json<StoreStatistics>> {
    Ok(Json(
        state.gateway.read_statistics(&VariableId::new(id)).await?,
    ))
}
