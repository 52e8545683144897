// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # adsgate-core
//!
//! Core abstractions and shared types for the ADSGATE industrial gateway.
//!
//! This crate provides the foundational pieces used across all gateway
//! components:
//!
//! - **Types**: `ConnectionId`, `VariableId`, `Value`, `Sample`, symbol and
//!   configuration records
//! - **Error**: Unified error hierarchy with retryable/fatal classification
//! - **Event**: In-process typed pub/sub with wildcard subscriptions
//! - **Ring**: Fixed-capacity per-variable sample history
//! - **Monitor**: Per-operation nanosecond latency histograms
//! - **Retry**: The exponential backoff schedule shared by reconnect and
//!   queue retry paths
//!
//! ## Example
//!
//! ```rust,ignore
//! use adsgate_core::types::{ConnectionId, Quality, Sample, Value, VariableId};
//! use adsgate_core::event::{EventBus, GatewayEvent};
//!
//! let bus = EventBus::new(1024);
//! let mut changes = bus.subscribe("variable.*");
//!
//! bus.emit(GatewayEvent::variable_changed(
//!     ConnectionId::new("plc-1"),
//!     VariableId::new("v1"),
//!     Sample::now(Value::Float(23.5), Quality::Good),
//! ));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod event;
pub mod monitor;
pub mod retry;
pub mod ring;
pub mod storable;
pub mod types;

pub use error::{
    ApiError, ApiResult, BrokerError, BrokerResult, BusError, CacheError, CacheResult,
    ConfigError, ConfigResult, GatewayError, GatewayResult, QueueError, QueueResult,
    SessionError, SessionResult, StoreError, StoreResult,
};
pub use event::{BusStats, CacheEventKind, EventBus, EventStream, GatewayEvent};
pub use monitor::{OperationSnapshot, PerformanceMonitor};
pub use retry::{ExponentialBackoff, RetryConfig, RetryDecision};
pub use ring::{BufferSummary, RingBuffer, RingStats, VariableBuffers};
pub use storable::{StorableSample, StorableValue};
pub use types::{
    AdsType, AuditRecord, AuditStatus, ConnectionConfig, ConnectionId, DiscoveryConfig,
    MetricType, OperationMetric, Quality, Sample, SymbolInfo, Value, Variable, VariableConfig,
    VariableId, VariableState,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
