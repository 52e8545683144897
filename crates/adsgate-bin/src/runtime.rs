// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Gateway runtime orchestration.
//!
//! Brings the engine up, serves the admin API over it, waits for a
//! shutdown signal, and tears down in order: API first (stops new
//! callers), then the engine (drains queues inside its grace window).

use tracing::{error, info};

use adsgate_api::{ApiServer, AppState};
use adsgate_engine::Engine;

use crate::config::GatewayConfig;
use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

/// The assembled gateway runtime.
pub struct GatewayRuntime {
    config: GatewayConfig,
    shutdown: ShutdownCoordinator,
}

impl GatewayRuntime {
    /// Creates a runtime over a validated configuration.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            shutdown: ShutdownCoordinator::new(),
        }
    }

    /// Runs the gateway until a shutdown signal arrives.
    pub async fn run(self) -> BinResult<()> {
        info!(version = adsgate_core::VERSION, "starting ADSGATE gateway");

        self.config.validate()?;

        let engine = Engine::start(self.config.engine.clone())
            .await
            .map_err(|e| BinError::Initialization(e.to_string()))?;

        let state = AppState::new(engine.gateway());
        let api = ApiServer::new(state, self.config.api.clone());

        // The API serves until the coordinator fires; a server error
        // also brings the whole gateway down.
        let api_shutdown = self.shutdown.signal();
        let mut api_task = tokio::spawn(async move { api.run_with_shutdown(api_shutdown).await });

        info!(
            api = %format!("{}:{}", self.config.api.host, self.config.api.port),
            mqtt_port = engine.mqtt_port,
            "gateway is ready"
        );

        tokio::select! {
            _ = self.shutdown.wait_for_signal() => {
                let _ = (&mut api_task).await;
            }
            result = &mut api_task => {
                match result {
                    Ok(Err(e)) => error!(error = %e, "API server failed"),
                    Err(e) => error!(error = %e, "API server task panicked"),
                    Ok(Ok(())) => {}
                }
                self.shutdown.initiate();
            }
        }

        engine.shutdown().await;
        info!("ADSGATE gateway shutdown complete");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_construction() {
        let runtime = GatewayRuntime::new(GatewayConfig::default());
        assert!(!runtime.shutdown.is_initiated());
    }
}
