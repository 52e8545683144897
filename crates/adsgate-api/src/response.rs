// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Response conventions.
//!
//! Success responses are plain JSON bodies with conventional status
//! codes; every error renders as `{"error": "<text>"}` with the status
//! the error hierarchy maps to. Queued operations answer
//! `{"jobId": "<uuid>"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use adsgate_core::{ApiError, GatewayError};

/// The correlation-id body for queued operations.
#[derive(Debug, Clone, Serialize)]
pub struct JobAccepted {
    /// The job id.
    #[serde(rename = "jobId")]
    pub job_id: Uuid,
}

impl JobAccepted {
    /// Wraps a job id.
    pub fn new(job_id: Uuid) -> Self {
        Self { job_id }
    }
}

/// The error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Human-readable error text.
    pub error: String,
}

/// The handler-facing failure type; renders the error contract.
#[derive(Debug)]
pub struct ApiFailure(pub ApiError);

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ApiError> for ApiFailure {
    fn from(error: ApiError) -> Self {
        Self(error)
    }
}

impl From<GatewayError> for ApiFailure {
    fn from(error: GatewayError) -> Self {
        Self(ApiError::from(error))
    }
}

/// Handler result alias.
pub type HandlerResult<T> = Result<T, ApiFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_shape() {
        let failure = ApiFailure(ApiError::not_found("variable v9"));
        let response = failure.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_gateway_error_mapping() {
        let failure: ApiFailure =
            GatewayError::Config(adsgate_core::ConfigError::missing_field("host")).into();
        assert_eq!(failure.0.status_code(), 422);
    }

    #[test]
    fn test_job_accepted_shape() {
        let body = serde_json::to_value(JobAccepted::new(Uuid::nil())).unwrap();
        assert!(body.get("jobId").is_some());
    }
}
