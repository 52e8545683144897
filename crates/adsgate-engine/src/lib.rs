// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # adsgate-engine
//!
//! The data-plane engine of the ADSGATE gateway.
//!
//! - **Manager**: session lifecycle, reconnect backoff, the variable
//!   table, and the ingest pipeline (ring, cache, persistence, bus)
//! - **Discovery**: per-session OnlineChange watcher with symbol
//!   enumeration, struct expansion, and variable reconciliation
//! - **Hub**: fan-out from the event bus to MQTT topics and WebSocket
//!   rooms with drop-oldest backpressure
//! - **Facade**: the single thread-safe surface the REST/WebSocket
//!   collaborators call
//! - **Engine**: assembly, background tasks, graceful shutdown

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod discovery;
mod engine;
mod facade;
mod handlers;
mod hub;
mod manager;

pub use discovery::{DiscoveryPhase, DiscoveryState};
pub use engine::{Engine, EngineConfig, QueueBackendKind};
pub use facade::{coerce_value, AdsDefaults, Gateway, SystemHealth, SystemSummary};
pub use handlers::{
    DiscoveryJobHandler, NotificationJobHandler, PersistJobHandler, WriteJobHandler,
};
pub use hub::{
    connection_room, topic_room, value_payload, variable_room, ClientHandle, ClientMessage,
    ClientSender, FanoutHub, HubStats, ServerMessage,
};
pub use manager::{ConnectionInfo, ConnectionManager, ConnectionStatus, ManagerConfig};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
