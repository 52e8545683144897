// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection endpoints.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use adsgate_core::{ConnectionConfig, ConnectionId, DiscoveryConfig, SymbolInfo, Variable};
use adsgate_engine::{ConnectionInfo, ConnectionStatus};

use crate::response::{ApiFailure, HandlerResult, JobAccepted};
use crate::state::{actor_from, AppState};

/// `GET /api/v1/connections`
pub async fn list_connections(State(state): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    Json(state.gateway.list_connections())
}

/// `GET /api/v1/connections/{id}`
pub async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<Json<ConnectionInfo>> {
    Ok(Json(state.gateway.get_connection(&ConnectionId::new(id))?))
}

/// `POST /api/v1/connections`
pub async fn create_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(config): Json<ConnectionConfig>,
) -> HandlerResult<(StatusCode, Json<ConnectionInfo>)> {
    let actor = actor_from(&headers);
    let info = state.gateway.create_connection(config, &actor).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

/// `PUT /api/v1/connections/{id}`
pub async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(config): Json<ConnectionConfig>,
) -> HandlerResult<Json<ConnectionInfo>> {
    let actor = actor_from(&headers);
    let info = state
        .gateway
        .update_connection(&ConnectionId::new(id), config, &actor)
        .await?;
    Ok(Json(info))
}

/// `DELETE /api/v1/connections/{id}`
pub async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> HandlerResult<StatusCode> {
    let actor = actor_from(&headers);
    state
        .gateway
        .delete_connection(&ConnectionId::new(id), &actor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/connections/{id}/connect`
pub async fn connect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<Json<ConnectionStatus>> {
    let id = ConnectionId::new(id);
    state.gateway.connect(&id)?;
    Ok(Json(state.gateway.connection_status(&id)?))
}

/// `POST /api/v1/connections/{id}/disconnect`
pub async fn disconnect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<Json<ConnectionStatus>> {
    let id = ConnectionId::new(id);
    state.gateway.disconnect(&id).await?;
    Ok(Json(state.gateway.connection_status(&id)?))
}

/// `GET /api/v1/connections/{id}/variables`
pub async fn list_connection_variables(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<Json<Vec<Variable>>> {
    let id = ConnectionId::new(id);
    state.gateway.get_connection(&id)?;
    let variables = state
        .gateway
        .list_variables_for(&id)
        .iter()
        .map(|v| (**v).clone())
        .collect();
    Ok(Json(variables))
}

/// `GET /api/v1/connections/{id}/symbols`
pub async fn list_symbols(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<Json<Vec<SymbolInfo>>> {
    Ok(Json(
        state.gateway.list_symbols(&ConnectionId::new(id)).await?,
    ))
}

/// `POST /api/v1/connections/{id}/discovery`
pub async fn trigger_discovery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<(StatusCode, Json<JobAccepted>)> {
    let job_id = state
        .gateway
        .trigger_discovery(&ConnectionId::new(id))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted::new(job_id))))
}

/// `PUT /api/v1/connections/{id}/discovery`
pub async fn set_discovery_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(config): Json<DiscoveryConfig>,
) -> Result<StatusCode, ApiFailure> {
    let actor = actor_from(&headers);
    state
        .gateway
        .set_discovery_config(&ConnectionId::new(id), config, &actor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
