// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The per-session OnlineChange watcher.
//!
//! Every `poll_period` the loop reads the PLC's OnlineChange counter
//! from the info block. An unchanged counter does nothing; a changed one
//! triggers enumeration, name filtering, struct expansion, variable
//! reconciliation, and the `discovery.*` events.
//!
//! A tick that lands while the previous iteration is still running is
//! skipped rather than cancelled; the next tick re-reads the counter, so
//! nothing is lost.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use adsgate_ads::expand_structs;
use adsgate_cache::VARIABLE_PATTERN;
use adsgate_core::{
    AdsType, ConnectionId, GatewayError, GatewayEvent, SessionError, SymbolInfo, VariableConfig,
    VariableId,
};

use crate::manager::{ConnectionManager, ConnectionRuntime};

// =============================================================================
// Phase
// =============================================================================

/// Where one discovery iteration currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPhase {
    /// Waiting for the next tick.
    #[default]
    Idle,
    /// Reading the OnlineChange counter.
    Checking,
    /// Uploading the symbol table.
    Enumerating,
    /// Expanding struct symbols.
    Expanding,
    /// Emitting events and reconciling variables.
    Emitting,
}

/// Per-connection discovery bookkeeping.
pub struct DiscoveryState {
    /// Current phase, for observability.
    pub phase: RwLock<DiscoveryPhase>,
    /// Tick guard: a running iteration makes later ticks no-ops.
    running: AtomicBool,
    /// Last observed OnlineChange counter.
    last_counter: Mutex<Option<u32>>,
}

impl DiscoveryState {
    /// Creates idle state.
    pub fn new() -> Self {
        Self {
            phase: RwLock::new(DiscoveryPhase::Idle),
            running: AtomicBool::new(false),
            last_counter: Mutex::new(None),
        }
    }

    /// Returns the last observed counter value.
    pub fn last_counter(&self) -> Option<u32> {
        *self.last_counter.lock()
    }
}

impl Default for DiscoveryState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Loop
// =============================================================================

/// Runs discovery ticks for the lifetime of the connection.
pub(crate) async fn run_loop(
    manager: Arc<ConnectionManager>,
    id: ConnectionId,
    runtime: Arc<ConnectionRuntime>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let poll_period = runtime.config.read().discovery.poll_period;
    let mut ticker = tokio::time::interval(poll_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    debug!(connection_id = %id, period_ms = poll_period.as_millis() as u64, "discovery loop started");

    loop {
        tokio::select! {
            _ = cancel_rx.changed() => {
                debug!(connection_id = %id, "discovery loop stopped");
                return;
            }
            _ = ticker.tick() => {}
        }
        if *cancel_rx.borrow() {
            return;
        }
        if !runtime.session.is_connected() {
            continue;
        }

        if let Err(e) = run_once(&manager, &id, &runtime).await {
            warn!(connection_id = %id, error = %e, "discovery iteration failed");
        }
    }
}

/// One discovery iteration. Also the entry point for on-demand triggers.
pub(crate) async fn run_once(
    manager: &Arc<ConnectionManager>,
    id: &ConnectionId,
    runtime: &Arc<ConnectionRuntime>,
) -> Result<(), GatewayError> {
    let state = &runtime.discovery;

    // Skip-if-running: never cancel and restart an in-flight iteration.
    if state.running.swap(true, Ordering::SeqCst) {
        debug!(connection_id = %id, "discovery tick skipped, iteration in flight");
        return Ok(());
    }
    let result = run_guarded(manager, id, runtime).await;
    *state.phase.write() = DiscoveryPhase::Idle;
    state.running.store(false, Ordering::SeqCst);
    result
}

async fn run_guarded(
    manager: &Arc<ConnectionManager>,
    id: &ConnectionId,
    runtime: &Arc<ConnectionRuntime>,
) -> Result<(), GatewayError> {
    let state = &runtime.discovery;
    let discovery_config = runtime.config.read().discovery.clone();

    *state.phase.write() = DiscoveryPhase::Checking;
    let counter = runtime
        .session
        .online_change_counter()
        .await
        .map_err(SessionError::from)?;

    let previous = state.last_counter();
    if previous == Some(counter) {
        // Same schema version: no discovery.* events at all.
        return Ok(());
    }
    *state.last_counter.lock() = Some(counter);

    if previous.is_some() {
        info!(connection_id = %id, counter, "OnlineChange detected");
        manager.bus.emit(GatewayEvent::OnlineChange {
            connection_id: id.clone(),
            counter,
        });

        // Handles and cached values are stale the moment the schema
        // moved; they re-resolve lazily.
        runtime.session.invalidate_handles();
        manager.cache.invalidate_pattern(VARIABLE_PATTERN).await;
    }

    *state.phase.write() = DiscoveryPhase::Enumerating;
    let table = runtime
        .session
        .upload_symbols()
        .await
        .map_err(SessionError::from)?;

    let selected: Vec<SymbolInfo> = table
        .iter()
        .filter(|symbol| discovery_config.matches(&symbol.path))
        .cloned()
        .collect();

    *state.phase.write() = DiscoveryPhase::Expanding;
    let expanded = expand_structs(&table, &selected);

    *state.phase.write() = DiscoveryPhase::Emitting;
    manager.bus.emit(GatewayEvent::DiscoverySymbols {
        connection_id: id.clone(),
        symbols: expanded.clone(),
    });

    if discovery_config.auto_register {
        reconcile_variables(manager, id, &expanded, &discovery_config).await;
    }

    Ok(())
}

/// Brings the variable set in line with the discovered symbols:
/// unchanged variables keep their buffers and tasks, vanished ones are
/// deleted, new primitives are registered.
async fn reconcile_variables(
    manager: &Arc<ConnectionManager>,
    id: &ConnectionId,
    symbols: &[SymbolInfo],
    discovery_config: &adsgate_core::DiscoveryConfig,
) {
    let live_paths: HashSet<&str> = symbols.iter().map(|s| s.path.as_str()).collect();

    // Delete variables whose symbol disappeared; no further reads may
    // target them.
    let existing = manager.variables_for(id);
    for variable in &existing {
        if !live_paths.contains(variable.config.path.as_str()) {
            if let Err(e) = manager.remove_variable(&variable.config.id).await {
                warn!(variable_id = %variable.config.id, error = %e, "stale variable removal failed");
            } else {
                info!(variable_id = %variable.config.id, "variable removed after OnlineChange");
            }
        }
    }

    // Register primitives that are not yet covered.
    let covered: HashSet<String> = manager
        .variables_for(id)
        .iter()
        .map(|v| v.config.path.clone())
        .collect();

    let mut added = Vec::new();
    for symbol in symbols {
        if covered.contains(&symbol.path) {
            continue;
        }
        let Some(ads_type) = AdsType::parse(&symbol.type_name) else {
            continue; // structs stay parents; their children register
        };

        let config = VariableConfig {
            id: VariableId::new(format!("{}:{}", id, symbol.path)),
            connection_id: id.clone(),
            name: symbol.path.clone(),
            path: symbol.path.clone(),
            ads_type,
            sample_period: discovery_config.default_sample_period,
            use_notification: true,
            topic: String::new(),
        };

        match manager.add_variable(config.clone()).await {
            Ok(()) => added.push(config),
            Err(e) => warn!(path = %symbol.path, error = %e, "auto-registration failed"),
        }
    }

    if !added.is_empty() {
        info!(connection_id = %id, count = added.len(), "variables auto-registered");
        manager.bus.emit(GatewayEvent::DiscoveryVariablesAdded {
            connection_id: id.clone(),
            variables: added,
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_defaults() {
        let state = DiscoveryState::new();
        assert_eq!(*state.phase.read(), DiscoveryPhase::Idle);
        assert_eq!(state.last_counter(), None);
        assert!(!state.running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_running_guard() {
        let state = DiscoveryState::new();
        assert!(!state.running.swap(true, Ordering::SeqCst));
        // a second entry observes the guard
        assert!(state.running.swap(true, Ordering::SeqCst));
        state.running.store(false, Ordering::SeqCst);
        assert!(!state.running.swap(true, Ordering::SeqCst));
    }
}
