// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! API server implementation.

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use adsgate_core::{ApiError, ApiResult};

use crate::handlers;
use crate::state::AppState;

// =============================================================================
// Configuration
// =============================================================================

/// API listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    #[serde(with = "adsgate_core::types::duration_millis")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: default_request_timeout(),
        }
    }
}

// =============================================================================
// ApiServer
// =============================================================================

/// The HTTP/WebSocket server over the gateway facade.
pub struct ApiServer {
    state: AppState,
    config: ApiConfig,
}

impl ApiServer {
    /// Creates a server.
    pub fn new(state: AppState, config: ApiConfig) -> Self {
        Self { state, config }
    }

    /// Builds the router with every route and middleware layer.
    pub fn router(&self) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(self.config.request_timeout))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );

        Router::new()
            // Liveness (public, cheap)
            .route("/health", get(handlers::health))
            // Connections
            .route(
                "/api/v1/connections",
                get(handlers::list_connections).post(handlers::create_connection),
            )
            .route(
                "/api/v1/connections/{id}",
                get(handlers::get_connection)
                    .put(handlers::update_connection)
                    .delete(handlers::delete_connection),
            )
            .route("/api/v1/connections/{id}/connect", post(handlers::connect))
            .route("/api/v1/connections/{id}/disconnect", post(handlers::disconnect))
            .route(
                "/api/v1/connections/{id}/variables",
                get(handlers::list_connection_variables),
            )
            .route("/api/v1/connections/{id}/symbols", get(handlers::list_symbols))
            .route(
                "/api/v1/connections/{id}/discovery",
                post(handlers::trigger_discovery).put(handlers::set_discovery_config),
            )
            // Variables
            .route(
                "/api/v1/variables",
                get(handlers::list_variables).post(handlers::create_variable),
            )
            .route(
                "/api/v1/variables/{id}",
                get(handlers::get_variable).delete(handlers::delete_variable),
            )
            .route("/api/v1/variables/{id}/write", post(handlers::write_variable))
            .route("/api/v1/variables/{id}/value", get(handlers::read_value))
            .route("/api/v1/variables/{id}/history", get(handlers::read_history))
            .route(
                "/api/v1/variables/{id}/statistics",
                get(handlers::read_statistics),
            )
            // Monitoring
            .route("/api/v1/monitoring/summary", get(handlers::summary))
            .route("/api/v1/monitoring/health", get(handlers::health))
            .route("/api/v1/monitoring/metrics", get(handlers::metric_history))
            // Audit
            .route("/api/v1/audit", get(handlers::list_audit))
            .route("/api/v1/audit/variable/{id}", get(handlers::audit_by_variable))
            .route("/api/v1/audit/actor/{actor}", get(handlers::audit_by_actor))
            .route("/api/v1/audit/stats", get(handlers::audit_stats))
            // Cache / queue / buffer
            .route(
                "/api/v1/system/cache",
                get(handlers::cache_stats).delete(handlers::cache_clear),
            )
            .route("/api/v1/system/queue", get(handlers::queue_stats))
            .route("/api/v1/system/queue/health", get(handlers::queue_health))
            .route("/api/v1/system/queue/failed", get(handlers::failed_jobs))
            .route(
                "/api/v1/system/queue/failed/{job_id}/retry",
                post(handlers::retry_failed_job),
            )
            .route(
                "/api/v1/system/buffer",
                get(handlers::buffer_summary).delete(handlers::buffer_clear),
            )
            // WebSocket
            .route("/ws", get(handlers::websocket))
            .layer(middleware)
            .with_state(self.state.clone())
    }

    /// Runs the server with graceful shutdown.
    pub async fn run_with_shutdown(
        self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> ApiResult<()> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| ApiError::internal(format!("failed to bind {}: {}", address, e)))?;

        info!(address = %address, "API server listening");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| ApiError::internal(format!("server error: {}", e)))?;

        info!("API server stopped");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
