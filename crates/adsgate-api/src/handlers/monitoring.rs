// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Monitoring and system endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use adsgate_cache::CacheStats;
use adsgate_core::{ApiError, BufferSummary, MetricType};
use adsgate_engine::{SystemHealth, SystemSummary};
use adsgate_queue::{JobRecord, QueueHealth, QueueStats};
use adsgate_store::MetricEntry;

use crate::response::{ApiFailure, HandlerResult};
use crate::state::AppState;

/// `GET /health`: cheap liveness probe.
pub async fn health(State(state): State<AppState>) -> Json<SystemHealth> {
    Json(state.gateway.health().await)
}

/// `GET /api/v1/monitoring/summary`
pub async fn summary(State(state): State<AppState>) -> Json<SystemSummary> {
    Json(state.gateway.summary().await)
}

/// Metric history query parameters.
#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    /// Filter by metric type name.
    #[serde(rename = "type")]
    pub metric_type: Option<String>,
    /// Inclusive range start, unix ms.
    pub start: Option<i64>,
    /// Inclusive range end, unix ms.
    pub end: Option<i64>,
    /// Maximum entries (default 100).
    pub limit: Option<usize>,
}

/// `GET /api/v1/monitoring/metrics`
pub async fn metric_history(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> HandlerResult<Json<Vec<MetricEntry>>> {
    let metric_type = match query.metric_type.as_deref() {
        None => None,
        Some(name) => Some(parse_metric_type(name)?),
    };
    let entries = state
        .gateway
        .metric_history(metric_type, query.start, query.end, query.limit.unwrap_or(100))
        .await?;
    Ok(Json(entries))
}

fn parse_metric_type(name: &str) -> Result<MetricType, ApiFailure> {
    let metric_type = match name {
        "cpu" => MetricType::Cpu,
        "memory" => MetricType::Memory,
        "mqtt_clients" => MetricType::MqttClients,
        "mqtt_messages" => MetricType::MqttMessages,
        "ads_errors" => MetricType::AdsErrors,
        "api_requests" => MetricType::ApiRequests,
        other => {
            return Err(ApiError::bad_request(format!("unknown metric type '{}'", other)).into())
        }
    };
    Ok(metric_type)
}

// =============================================================================
// Cache / Queue / Buffer
// =============================================================================

/// `GET /api/v1/system/cache`
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.gateway.cache_stats())
}

/// `DELETE /api/v1/system/cache`
pub async fn cache_clear(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.gateway.cache_clear().await;
    Json(serde_json::json!({ "removed": removed }))
}

/// `GET /api/v1/system/queue`
pub async fn queue_stats(State(state): State<AppState>) -> Json<Vec<QueueStats>> {
    Json(state.gateway.queue_stats().await)
}

/// `GET /api/v1/system/queue/health`
pub async fn queue_health(State(state): State<AppState>) -> Json<QueueHealth> {
    Json(state.gateway.queue_health().await)
}

/// `GET /api/v1/system/queue/failed`
pub async fn failed_jobs(State(state): State<AppState>) -> Json<Vec<JobRecord>> {
    Json(state.gateway.failed_jobs())
}

/// `POST /api/v1/system/queue/failed/{job_id}/retry`
pub async fn retry_failed_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> HandlerResult<StatusCode> {
    if state.gateway.retry_failed_job(job_id).await? {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::not_found(format!("failed job {}", job_id)).into())
    }
}

/// `GET /api/v1/system/buffer`
pub async fn buffer_summary(State(state): State<AppState>) -> Json<BufferSummary> {
    Json(state.gateway.buffer_summary())
}

/// `DELETE /api/v1/system/buffer`
pub async fn buffer_clear(State(state): State<AppState>) -> StatusCode {
    state.gateway.buffer_clear();
    StatusCode::NO_CONTENT
}
