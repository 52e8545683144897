// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Request handlers.

mod audit;
mod connections;
mod monitoring;
mod variables;
mod ws;

pub use audit::{audit_by_actor, audit_by_variable, audit_stats, list_audit};
pub use connections::{
    connect, create_connection, delete_connection, disconnect, get_connection,
    list_connection_variables, list_connections, list_symbols, set_discovery_config,
    trigger_discovery, update_connection,
};
pub use monitoring::{
    buffer_clear, buffer_summary, cache_clear, cache_stats, failed_jobs, health, metric_history,
    queue_health, queue_stats, retry_failed_job, summary,
};
pub use variables::{
    create_variable, delete_variable, get_variable, list_variables, read_history,
    read_statistics, read_value, write_variable,
};
pub use ws::websocket;
