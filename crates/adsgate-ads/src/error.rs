// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! ADS protocol errors.
//!
//! `AdsError` carries the wire-level detail; the connection manager only
//! sees the coarser [`SessionError`] classification obtained via `From`.

use std::time::Duration;

use thiserror::Error;

use adsgate_core::SessionError;

// =============================================================================
// ADS Error Codes
// =============================================================================

/// Well-known ADS error codes the gateway reacts to.
pub mod ads_code {
    /// Target port not found; the route is wrong.
    pub const TARGET_PORT_NOT_FOUND: u32 = 0x06;
    /// Target machine not found; the route is missing.
    pub const TARGET_MACHINE_NOT_FOUND: u32 = 0x07;
    /// The router denied the request.
    pub const PORT_DISABLED: u32 = 0x12;
    /// Device is busy; the operation may be retried.
    pub const DEVICE_BUSY: u32 = 0x708;
    /// Symbol not found on the device.
    pub const SYMBOL_NOT_FOUND: u32 = 0x710;
    /// Symbol version changed; handles are invalid.
    pub const SYMBOL_VERSION_INVALID: u32 = 0x711;
    /// Device-side timeout.
    pub const DEVICE_TIMEOUT: u32 = 0x745;
}

/// Renders a short description for an ADS error code.
pub fn describe_code(code: u32) -> &'static str {
    match code {
        ads_code::TARGET_PORT_NOT_FOUND => "target port not found",
        ads_code::TARGET_MACHINE_NOT_FOUND => "target machine not found",
        ads_code::PORT_DISABLED => "port disabled",
        ads_code::DEVICE_BUSY => "device busy",
        ads_code::SYMBOL_NOT_FOUND => "symbol not found",
        ads_code::SYMBOL_VERSION_INVALID => "symbol version invalid",
        ads_code::DEVICE_TIMEOUT => "device timeout",
        _ => "ads error",
    }
}

// =============================================================================
// AdsError
// =============================================================================

/// Errors produced by the ADS client.
#[derive(Debug, Error)]
pub enum AdsError {
    /// TCP-level connect failure.
    #[error("Connect to {address} failed: {message}")]
    Connect {
        /// Router address.
        address: String,
        /// Error message.
        message: String,
    },

    /// Socket I/O failure after connect.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session is not connected.
    #[error("Not connected")]
    NotConnected,

    /// Request timed out.
    #[error("Request timed out after {duration:?}")]
    Timeout {
        /// Timeout duration.
        duration: Duration,
    },

    /// The device returned a non-zero ADS error code.
    #[error("ADS error 0x{code:08x} ({description}) during {operation}")]
    Device {
        /// The ADS error code.
        code: u32,
        /// Short description.
        description: &'static str,
        /// The operation that failed.
        operation: String,
    },

    /// A frame could not be parsed.
    #[error("Malformed frame: {message}")]
    Frame {
        /// Error message.
        message: String,
    },

    /// A routing address string could not be parsed.
    #[error("Invalid AMS address '{address}': {message}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// Error message.
        message: String,
    },

    /// The transport was closed while a request was in flight.
    #[error("Transport closed")]
    TransportClosed,
}

impl AdsError {
    /// Creates a connect error.
    pub fn connect(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates a device error from an ADS error code.
    pub fn device(code: u32, operation: impl Into<String>) -> Self {
        Self::Device {
            code,
            description: describe_code(code),
            operation: operation.into(),
        }
    }

    /// Creates a malformed frame error.
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Creates an invalid address error.
    pub fn invalid_address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Returns the embedded ADS error code, if any.
    pub fn code(&self) -> Option<u32> {
        match self {
            AdsError::Device { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` when the route itself is wrong: a fatal condition
    /// the reconnect loop must not retry.
    pub fn is_route_error(&self) -> bool {
        matches!(
            self,
            AdsError::Device {
                code: ads_code::TARGET_PORT_NOT_FOUND
                    | ads_code::TARGET_MACHINE_NOT_FOUND
                    | ads_code::PORT_DISABLED,
                ..
            }
        )
    }

    /// Returns `true` for transient conditions worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdsError::Connect { .. }
            | AdsError::Io(_)
            | AdsError::NotConnected
            | AdsError::Timeout { .. }
            | AdsError::TransportClosed => true,
            AdsError::Device { code, .. } => {
                matches!(*code, ads_code::DEVICE_BUSY | ads_code::DEVICE_TIMEOUT)
            }
            _ => false,
        }
    }
}

impl From<AdsError> for SessionError {
    fn from(err: AdsError) -> Self {
        match err {
            AdsError::Connect { address, message } => {
                SessionError::connection_failed(format!("{}: {}", address, message))
            }
            AdsError::Io(e) => SessionError::connection_failed(e.to_string()),
            AdsError::NotConnected => SessionError::NotConnected,
            AdsError::Timeout { duration } => SessionError::timeout(duration),
            AdsError::TransportClosed => SessionError::connection_failed("transport closed"),
            AdsError::Device { code, description, operation } => {
                if matches!(
                    code,
                    ads_code::TARGET_PORT_NOT_FOUND
                        | ads_code::TARGET_MACHINE_NOT_FOUND
                        | ads_code::PORT_DISABLED
                ) {
                    SessionError::route_rejected(format!("{} during {}", description, operation))
                } else if code == ads_code::SYMBOL_NOT_FOUND {
                    SessionError::symbol_not_found(operation)
                } else {
                    SessionError::device(code, format!("{} during {}", description, operation))
                }
            }
            AdsError::Frame { message } => {
                SessionError::device(0, format!("malformed frame: {}", message))
            }
            AdsError::InvalidAddress { address, message } => {
                SessionError::connection_failed(format!("invalid address {}: {}", address, message))
            }
        }
    }
}

/// A Result type with AdsError.
pub type AdsResult<T> = Result<T, AdsError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_error_classification() {
        assert!(AdsError::device(ads_code::TARGET_MACHINE_NOT_FOUND, "connect").is_route_error());
        assert!(AdsError::device(ads_code::PORT_DISABLED, "connect").is_route_error());
        assert!(!AdsError::device(ads_code::SYMBOL_NOT_FOUND, "read").is_route_error());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AdsError::NotConnected.is_retryable());
        assert!(AdsError::timeout(Duration::from_secs(2)).is_retryable());
        assert!(AdsError::device(ads_code::DEVICE_BUSY, "read").is_retryable());
        assert!(!AdsError::device(ads_code::SYMBOL_NOT_FOUND, "read").is_retryable());
    }

    #[test]
    fn test_conversion_to_session_error() {
        let err: SessionError = AdsError::device(ads_code::TARGET_MACHINE_NOT_FOUND, "connect").into();
        assert!(err.is_fatal());

        let err: SessionError = AdsError::device(ads_code::SYMBOL_NOT_FOUND, "MAIN.gone").into();
        assert!(matches!(err, SessionError::SymbolNotFound { .. }));

        let err: SessionError = AdsError::timeout(Duration::from_secs(2)).into();
        assert!(err.is_retryable());
    }
}
