// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! ADSGATE gateway entry point.

use clap::Parser;

use adsgate_bin::{cli::Cli, logging, run};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level, cli.log_format);

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "gateway failed");
        std::process::exit(1);
    }
}
