// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for ADSGATE.
//!
//! This module defines the error type system used across the gateway:
//!
//! - Distinguishes retryable (connectivity) from terminal (configuration,
//!   protocol) failures, which drives the reconnect policy
//! - Maps errors to HTTP status codes at the API boundary
//! - Supports structured logging via `error_type()`
//!
//! # Error Hierarchy
//!
//! ```text
//! GatewayError (root)
//! ├── ConfigError    - Configuration validation
//! ├── SessionError   - ADS session operations
//! ├── CacheError     - Cache backend operations
//! ├── StoreError     - Time-series store operations
//! ├── QueueError     - Work queue operations
//! ├── BusError       - Event bus operations
//! ├── BrokerError    - Embedded MQTT broker
//! └── ApiError       - REST/WebSocket surface
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;

// =============================================================================
// GatewayError - Root Error Type
// =============================================================================

/// The root error type for ADSGATE.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// ADS session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Cache error.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Work queue error.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Event bus error.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// MQTT broker error.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// API error.
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

impl GatewayError {
    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Session(e) => e.is_retryable(),
            GatewayError::Cache(e) => e.is_retryable(),
            GatewayError::Queue(e) => e.is_retryable(),
            GatewayError::Bus(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns the error type as a string for logging/metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "config",
            GatewayError::Session(_) => "session",
            GatewayError::Cache(_) => "cache",
            GatewayError::Store(_) => "store",
            GatewayError::Queue(_) => "queue",
            GatewayError::Bus(_) => "bus",
            GatewayError::Broker(_) => "broker",
            GatewayError::Api(_) => "api",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Config(_) => 400,
            GatewayError::Session(e) => e.status_code(),
            GatewayError::Cache(_) => 503,
            GatewayError::Store(_) => 500,
            GatewayError::Queue(_) => 503,
            GatewayError::Bus(_) => 503,
            GatewayError::Broker(_) => 503,
            GatewayError::Api(e) => e.status_code(),
        }
    }
}

// =============================================================================
// ConfigError
// =============================================================================

/// Configuration validation errors. Never retried; surfaced to callers
/// synchronously.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Required field is missing.
    #[error("Missing required field: {field}")]
    MissingField {
        /// The missing field name.
        field: String,
    },

    /// Duplicate connection ID.
    #[error("Duplicate connection ID: {connection_id}")]
    DuplicateConnection {
        /// The duplicated connection ID.
        connection_id: String,
    },

    /// Duplicate variable ID or topic.
    #[error("Duplicate variable {what}: {value}")]
    DuplicateVariable {
        /// Which uniqueness constraint was violated (`id` or `topic`).
        what: String,
        /// The duplicated value.
        value: String,
    },

    /// A variable references a connection that does not exist.
    #[error("Unknown connection: {connection_id}")]
    UnknownConnection {
        /// The missing connection ID.
        connection_id: String,
    },

    /// Invalid AMS routing address.
    #[error("Invalid target address '{address}': {message}")]
    InvalidAddress {
        /// The invalid address string.
        address: String,
        /// Error message.
        message: String,
    },

    /// Unknown variable type name.
    #[error("Unknown variable type: {type_name}")]
    UnknownType {
        /// The unrecognized type name.
        type_name: String,
    },
}

impl ConfigError {
    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField { field: field.into() }
    }

    /// Creates an invalid address error.
    pub fn invalid_address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates an unknown type error.
    pub fn unknown_type(type_name: impl Into<String>) -> Self {
        Self::UnknownType {
            type_name: type_name.into(),
        }
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// ADS session errors, as classified by the connection manager.
///
/// Connectivity-class errors trigger reconnect with backoff; protocol-class
/// errors mark the offending variable and never reconnect.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Connection to the router failed.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The session is not connected.
    #[error("Session is not connected")]
    NotConnected,

    /// Operation timed out.
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// The timeout duration.
        duration: Duration,
    },

    /// The route to the target is missing or was refused. Fatal.
    #[error("Route rejected: {message}")]
    RouteRejected {
        /// Error message.
        message: String,
    },

    /// Read operation failed.
    #[error("Read failed for '{path}': {message}")]
    ReadFailed {
        /// Symbol path.
        path: String,
        /// Error message.
        message: String,
    },

    /// Write operation failed.
    #[error("Write failed for '{path}': {message}")]
    WriteFailed {
        /// Symbol path.
        path: String,
        /// Error message.
        message: String,
    },

    /// Symbol name could not be resolved to a handle.
    #[error("Symbol not found: {path}")]
    SymbolNotFound {
        /// Symbol path.
        path: String,
    },

    /// Decoded bytes did not match the declared type.
    #[error("Decode failed for '{path}': {message}")]
    DecodeFailed {
        /// Symbol path.
        path: String,
        /// Error message.
        message: String,
    },

    /// Device notification error.
    #[error("Notification error: {message}")]
    Notification {
        /// Error message.
        message: String,
    },

    /// Protocol-level error from the device.
    #[error("ADS error 0x{code:08x}: {message}")]
    Device {
        /// ADS error code.
        code: u32,
        /// Error message.
        message: String,
    },
}

impl SessionError {
    /// Creates a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a connection failed error with a source.
    pub fn connection_failed_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Creates a route rejected error.
    pub fn route_rejected(message: impl Into<String>) -> Self {
        Self::RouteRejected {
            message: message.into(),
        }
    }

    /// Creates a read failed error.
    pub fn read_failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ReadFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a write failed error.
    pub fn write_failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WriteFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a symbol not found error.
    pub fn symbol_not_found(path: impl Into<String>) -> Self {
        Self::SymbolNotFound { path: path.into() }
    }

    /// Creates a decode failed error.
    pub fn decode_failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DecodeFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a notification error.
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
        }
    }

    /// Creates a device error from an ADS error code.
    pub fn device(code: u32, message: impl Into<String>) -> Self {
        Self::Device {
            code,
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable (connectivity class).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::ConnectionFailed { .. }
                | SessionError::NotConnected
                | SessionError::Timeout { .. }
        )
    }

    /// Returns `true` if this error kills the session outright.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::RouteRejected { .. })
    }

    /// Returns `true` if this error stays scoped to one variable
    /// (protocol class: bad symbol, decode mismatch).
    pub fn is_variable_scoped(&self) -> bool {
        matches!(
            self,
            SessionError::ReadFailed { .. }
                | SessionError::WriteFailed { .. }
                | SessionError::SymbolNotFound { .. }
                | SessionError::DecodeFailed { .. }
                | SessionError::Device { .. }
        )
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            SessionError::NotConnected | SessionError::ConnectionFailed { .. } => 503,
            SessionError::Timeout { .. } => 504,
            SessionError::SymbolNotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Returns the error type for logging/metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            SessionError::ConnectionFailed { .. } => "connection_failed",
            SessionError::NotConnected => "not_connected",
            SessionError::Timeout { .. } => "timeout",
            SessionError::RouteRejected { .. } => "route_rejected",
            SessionError::ReadFailed { .. } => "read_failed",
            SessionError::WriteFailed { .. } => "write_failed",
            SessionError::SymbolNotFound { .. } => "symbol_not_found",
            SessionError::DecodeFailed { .. } => "decode_failed",
            SessionError::Notification { .. } => "notification",
            SessionError::Device { .. } => "device",
        }
    }
}

impl Clone for SessionError {
    fn clone(&self) -> Self {
        match self {
            SessionError::ConnectionFailed { message, .. } => SessionError::ConnectionFailed {
                message: message.clone(),
                source: None,
            },
            SessionError::NotConnected => SessionError::NotConnected,
            SessionError::Timeout { duration } => SessionError::Timeout { duration: *duration },
            SessionError::RouteRejected { message } => {
                SessionError::RouteRejected { message: message.clone() }
            }
            SessionError::ReadFailed { path, message } => SessionError::ReadFailed {
                path: path.clone(),
                message: message.clone(),
            },
            SessionError::WriteFailed { path, message } => SessionError::WriteFailed {
                path: path.clone(),
                message: message.clone(),
            },
            SessionError::SymbolNotFound { path } => {
                SessionError::SymbolNotFound { path: path.clone() }
            }
            SessionError::DecodeFailed { path, message } => SessionError::DecodeFailed {
                path: path.clone(),
                message: message.clone(),
            },
            SessionError::Notification { message } => {
                SessionError::Notification { message: message.clone() }
            }
            SessionError::Device { code, message } => SessionError::Device {
                code: *code,
                message: message.clone(),
            },
        }
    }
}

// =============================================================================
// CacheError
// =============================================================================

/// Cache backend errors. The cache is an optimization: callers treat every
/// failure as a miss and never block the data plane on it.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend unreachable.
    #[error("Cache backend unavailable: {message}")]
    Unavailable {
        /// Error message.
        message: String,
    },

    /// Operation timed out.
    #[error("Cache operation timed out after {duration:?}")]
    Timeout {
        /// The timeout duration.
        duration: Duration,
    },

    /// Value could not be encoded or decoded.
    #[error("Cache codec error: {message}")]
    Codec {
        /// Error message.
        message: String,
    },
}

impl CacheError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Unavailable { .. } | CacheError::Timeout { .. })
    }
}

// =============================================================================
// StoreError
// =============================================================================

/// Time-series store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open the database.
    #[error("Failed to open store at '{path}': {message}")]
    Open {
        /// Database path.
        path: String,
        /// Error message.
        message: String,
    },

    /// Write failed.
    #[error("Store write failed: {message}")]
    Write {
        /// Error message.
        message: String,
    },

    /// Read failed.
    #[error("Store read failed: {message}")]
    Read {
        /// Error message.
        message: String,
    },

    /// Stored bytes could not be decoded.
    #[error("Corrupted row: {message}")]
    Corrupted {
        /// Error message.
        message: String,
    },
}

impl StoreError {
    /// Creates an open error.
    pub fn open(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Open {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a write error.
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write {
            message: message.into(),
        }
    }

    /// Creates a read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// Creates a corrupted row error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

// =============================================================================
// QueueError
// =============================================================================

/// Work queue errors.
#[derive(Debug, Error, Clone)]
pub enum QueueError {
    /// The queue backend rejected the job.
    #[error("Enqueue failed: {message}")]
    EnqueueFailed {
        /// Error message.
        message: String,
    },

    /// A job exhausted its retry attempts.
    #[error("Job {job_id} failed after {attempts} attempts: {message}")]
    Exhausted {
        /// The job id.
        job_id: String,
        /// Attempts made.
        attempts: u32,
        /// Last error message.
        message: String,
    },

    /// No handler registered for the job kind.
    #[error("No handler for queue '{queue}'")]
    NoHandler {
        /// Queue name.
        queue: String,
    },

    /// The queue is shutting down.
    #[error("Queue is shutting down")]
    ShuttingDown,

    /// A handler reported a retryable failure.
    #[error("Job failed (retryable): {message}")]
    Retryable {
        /// Error message.
        message: String,
    },

    /// A handler reported a terminal failure.
    #[error("Job failed (terminal): {message}")]
    Terminal {
        /// Error message.
        message: String,
    },
}

impl QueueError {
    /// Creates an enqueue failed error.
    pub fn enqueue_failed(message: impl Into<String>) -> Self {
        Self::EnqueueFailed {
            message: message.into(),
        }
    }

    /// Creates a retryable handler failure.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    /// Creates a terminal handler failure.
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Retryable { .. } | QueueError::EnqueueFailed { .. })
    }
}

// =============================================================================
// BusError
// =============================================================================

/// Event bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// Subscriber channel is closed.
    #[error("Subscriber channel closed")]
    Closed,

    /// Subscriber lagged behind and dropped messages.
    #[error("Subscriber lagged by {count} events")]
    Lagged {
        /// Number of dropped events.
        count: u64,
    },
}

impl BusError {
    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Lagged { .. })
    }
}

// =============================================================================
// BrokerError
// =============================================================================

/// Embedded MQTT broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Failed to bind the listener.
    #[error("Failed to bind {address}: {message}")]
    Bind {
        /// Listen address.
        address: String,
        /// Error message.
        message: String,
    },

    /// Malformed packet from a client.
    #[error("Protocol violation: {message}")]
    Protocol {
        /// Error message.
        message: String,
    },

    /// Client connection I/O error.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },
}

impl BrokerError {
    /// Creates a bind error.
    pub fn bind(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bind {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol violation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

// =============================================================================
// ApiError
// =============================================================================

/// REST/WebSocket surface errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("Resource not found: {resource}")]
    NotFound {
        /// The resource that was not found.
        resource: String,
    },

    /// Bad request.
    #[error("Bad request: {message}")]
    BadRequest {
        /// Error message.
        message: String,
    },

    /// Validation error.
    #[error("Validation error: {message}")]
    Validation {
        /// Error message.
        message: String,
    },

    /// Conflict with existing state.
    #[error("Conflict: {message}")]
    Conflict {
        /// Error message.
        message: String,
    },

    /// Internal server error.
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl ApiError {
    /// Creates a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound { .. } => 404,
            ApiError::BadRequest { .. } => 400,
            ApiError::Validation { .. } => 422,
            ApiError::Conflict { .. } => 409,
            ApiError::Internal { .. } => 500,
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Config(e) => ApiError::validation(e.to_string()),
            GatewayError::Api(e) => e,
            other => ApiError::internal(other.to_string()),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// A Result type with GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// A Result type with ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A Result type with SessionError.
pub type SessionResult<T> = Result<T, SessionError>;

/// A Result type with CacheError.
pub type CacheResult<T> = Result<T, CacheError>;

/// A Result type with StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// A Result type with QueueError.
pub type QueueResult<T> = Result<T, QueueError>;

/// A Result type with BrokerError.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// A Result type with ApiError.
pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Display helpers
// =============================================================================

/// Wrapper rendering an error chain with its sources, for audit details.
pub struct ErrorChain<'a>(pub &'a (dyn std::error::Error + 'static));

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {}", err)?;
            source = err.source();
        }
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
    fn test_session_error_classification() {
        assert!(SessionError::timeout(Duration::from_secs(2)).is_retryable());
        assert!(SessionError::connection_failed("refused").is_retryable());
        assert!(SessionError::NotConnected.is_retryable());

        assert!(SessionError::route_rejected("no route").is_fatal());
        assert!(!SessionError::route_rejected("no route").is_retryable());

        assert!(SessionError::symbol_not_found("MAIN.x").is_variable_scoped());
        assert!(SessionError::decode_failed("MAIN.x", "short read").is_variable_scoped());
        assert!(!SessionError::NotConnected.is_variable_scoped());
    }

    #[test]
    fn test_session_error_status_codes() {
        assert_eq!(SessionError::NotConnected.status_code(), 503);
        assert_eq!(SessionError::timeout(Duration::from_secs(1)).status_code(), 504);
        assert_eq!(SessionError::symbol_not_found("x").status_code(), 404);
    }

    #[test]
    fn test_gateway_error_conversion() {
        let session_error = SessionError::timeout(Duration::from_secs(2));
        let gateway_error: GatewayError = session_error.into();

        assert!(gateway_error.is_retryable());
        assert_eq!(gateway_error.error_type(), "session");
    }

    #[test]
    fn test_config_error_never_retryable() {
        let error: GatewayError = ConfigError::missing_field("host").into();
        assert!(!error.is_retryable());
        assert_eq!(error.status_code(), 400);
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(ApiError::not_found("variable").status_code(), 404);
        assert_eq!(ApiError::bad_request("nope").status_code(), 400);
        assert_eq!(ApiError::validation("bad type").status_code(), 422);
        assert_eq!(ApiError::conflict("topic in use").status_code(), 409);
    }

    #[test]
    fn test_api_error_from_gateway() {
        let api: ApiError = GatewayError::from(ConfigError::unknown_type("WSTRING")).into();
        assert_eq!(api.status_code(), 422);

        let api: ApiError = GatewayError::from(StoreError::write("disk full")).into();
        assert_eq!(api.status_code(), 500);
    }

    #[test]
    fn test_queue_error_retryable() {
        assert!(QueueError::retryable("busy").is_retryable());
        assert!(!QueueError::terminal("bad payload").is_retryable());
    }

    #[test]
    fn test_error_chain_display() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let outer = SessionError::connection_failed_with("router unreachable", inner);
        let rendered = ErrorChain(&outer).to_string();
        assert!(rendered.contains("router unreachable"));
        assert!(rendered.contains("refused"));
    }

    #[test]
    fn test_session_error_clone_drops_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "io");
        let error = SessionError::connection_failed_with("failed", inner);
        let cloned = error.clone();
        assert!(matches!(cloned, SessionError::ConnectionFailed { source: None, .. }));
    }
}
