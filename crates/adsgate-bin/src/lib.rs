// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # adsgate-bin
//!
//! The gateway binary: CLI parsing, environment configuration, logging
//! initialization, shutdown coordination, and runtime assembly.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

pub use cli::{Cli, Command, LogFormat};
pub use config::GatewayConfig;
pub use error::{BinError, BinResult};
pub use runtime::GatewayRuntime;
pub use shutdown::ShutdownCoordinator;

/// Runs the parsed CLI command.
pub async fn run(cli: Cli) -> BinResult<()> {
    match cli.command {
        Command::Run => {
            let config = GatewayConfig::from_env()?;
            GatewayRuntime::new(config).run().await
        }
        Command::Validate => {
            let config = GatewayConfig::from_env()?;
            config.validate()?;
            println!("configuration OK");
            println!("{}", serde_json::to_string_pretty(&config).unwrap_or_default());
            Ok(())
        }
        Command::Version => {
            println!("adsgate {}", adsgate_core::VERSION);
            Ok(())
        }
    }
}
