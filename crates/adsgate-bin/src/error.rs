// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Binary-level errors.

use thiserror::Error;

/// Errors surfaced by the gateway binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// Configuration could not be assembled or validated.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A component failed to initialize.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// The runtime failed while serving.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// A Result type with BinError.
pub type BinResult<T> = Result<T, BinError>;

impl From<adsgate_core::GatewayError> for BinError {
    fn from(error: adsgate_core::GatewayError) -> Self {
        BinError::Initialization(error.to_string())
    }
}

impl From<adsgate_core::ApiError> for BinError {
    fn from(error: adsgate_core::ApiError) -> Self {
        BinError::Runtime(error.to_string())
    }
}
