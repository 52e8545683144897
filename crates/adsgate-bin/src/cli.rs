// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Command-line interface.

use clap::{Parser, Subcommand, ValueEnum};

/// The ADSGATE industrial gateway.
#[derive(Debug, Parser)]
#[command(name = "adsgate", version, about = "ADS to MQTT industrial gateway")]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// The command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text (default).
    #[default]
    Text,
    /// Structured JSON for log aggregation.
    Json,
    /// Minimal single-line output.
    Compact,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway until interrupted.
    Run,
    /// Assemble and validate the configuration, then exit.
    Validate,
    /// Print version information.
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from(["adsgate", "run"]);
        assert!(matches!(cli.command, Command::Run));
        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from([
            "adsgate",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "validate",
        ]);
        assert!(matches!(cli.command, Command::Validate));
        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
