// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection lifecycle and the variable table.
//!
//! The manager owns every live session and the `variable -> connection`
//! map. One supervisor task per connection drives connect, reconnect
//! with exponential backoff, and the per-variable acquisition tasks
//! (poll timers or device notifications, never both for one variable).
//!
//! The variable table is an immutable snapshot swapped on update, so the
//! hot ingest path and API readers never take a lock for lookups. The
//! connection table sits behind a `DashMap`; writers (config changes)
//! are rare.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use adsgate_ads::{PlcSession, SessionConfig};
use adsgate_cache::{variable_key, CacheClient};
use adsgate_core::{
    ConfigError, ConnectionConfig, ConnectionId, EventBus, GatewayError, GatewayEvent,
    OperationMetric, PerformanceMonitor, Quality, RetryConfig, Sample, SessionError,
    StorableSample, SymbolInfo, Variable, VariableBuffers, VariableConfig, VariableId,
};
use adsgate_queue::{Job, JobPayload, WorkQueue};
use adsgate_store::TimeSeriesStore;

use crate::discovery;

// =============================================================================
// Status
// =============================================================================

/// The lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No session is wanted or the session was shut down.
    #[default]
    Disconnected,
    /// First connect in progress.
    Connecting,
    /// Session live.
    Connected,
    /// Lost the session, backoff retry in progress.
    Reconnecting,
    /// Fatal error (route rejected); no retry until reconfigured.
    Failed,
}

impl ConnectionStatus {
    /// Returns `true` while the session is usable.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// A point-in-time connection summary for callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Static configuration.
    pub config: ConnectionConfig,
    /// Current status.
    pub status: ConnectionStatus,
    /// Number of variables bound to this connection.
    pub variable_count: usize,
}

// =============================================================================
// Manager Configuration
// =============================================================================

/// Manager tuning knobs.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// TTL for cached last values.
    pub cache_ttl: Duration,
    /// Reconnect backoff schedule (1 s doubling to 60 s, unbounded).
    pub reconnect: RetryConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            reconnect: RetryConfig::reconnect(),
        }
    }
}

// =============================================================================
// Connection Runtime
// =============================================================================

pub(crate) struct ConnectionRuntime {
    pub config: RwLock<ConnectionConfig>,
    pub session: Arc<PlcSession>,
    pub status: RwLock<ConnectionStatus>,
    /// Cancels the supervisor and everything under it.
    cancel_tx: watch::Sender<bool>,
    /// Cancels the acquisition tasks of the current session epoch.
    session_cancel: Mutex<Option<watch::Sender<bool>>>,
    /// Acquisition failure signal back to the supervisor.
    failure_tx: Mutex<Option<mpsc::Sender<()>>>,
    /// Receiver side, parked here between epoch start and supervisor
    /// pickup.
    failure_rx: Mutex<Option<mpsc::Receiver<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    pub discovery: discovery::DiscoveryState,
}

impl ConnectionRuntime {
    fn new(config: ConnectionConfig) -> Result<Arc<Self>, GatewayError> {
        let session_config = SessionConfig::from_connection(&config).map_err(|e| {
            GatewayError::Config(ConfigError::invalid_address(
                config.target_address.clone(),
                e.to_string(),
            ))
        })?;
        let (cancel_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            config: RwLock::new(config),
            session: Arc::new(PlcSession::new(session_config)),
            status: RwLock::new(ConnectionStatus::Disconnected),
            cancel_tx,
            session_cancel: Mutex::new(None),
            failure_tx: Mutex::new(None),
            failure_rx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            discovery: discovery::DiscoveryState::new(),
        }))
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.write() = status;
    }

    /// Stops the current session epoch's acquisition tasks.
    fn cancel_session_epoch(&self) {
        if let Some(tx) = self.session_cancel.lock().take() {
            let _ = tx.send(true);
        }
        self.failure_tx.lock().take();
    }

    fn cancel_all(&self) {
        let _ = self.cancel_tx.send(true);
        self.cancel_session_epoch();
        let mut tasks = self.tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Owns sessions, the variable table, and the ingest pipeline.
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, Arc<ConnectionRuntime>>,
    /// Copy-on-write variable snapshot: readers clone the `Arc`, writers
    /// build a new map and swap.
    variables: RwLock<Arc<HashMap<VariableId, Arc<Variable>>>>,
    variable_tasks: DashMap<VariableId, JoinHandle<()>>,
    pub(crate) buffers: Arc<VariableBuffers>,
    pub(crate) cache: Arc<CacheClient>,
    pub(crate) queue: Arc<WorkQueue>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) monitor: Arc<PerformanceMonitor>,
    pub(crate) store: Arc<TimeSeriesStore>,
    config: ManagerConfig,
}

impl ConnectionManager {
    /// Creates the manager.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buffers: Arc<VariableBuffers>,
        cache: Arc<CacheClient>,
        queue: Arc<WorkQueue>,
        bus: Arc<EventBus>,
        monitor: Arc<PerformanceMonitor>,
        store: Arc<TimeSeriesStore>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            connections: DashMap::new(),
            variables: RwLock::new(Arc::new(HashMap::new())),
            variable_tasks: DashMap::new(),
            buffers,
            cache,
            queue,
            bus,
            monitor,
            store,
            config,
        })
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Adds a connection: persist, spawn a session when enabled, attach
    /// discovery when configured.
    pub async fn add_connection(
        self: &Arc<Self>,
        config: ConnectionConfig,
    ) -> Result<(), GatewayError> {
        if self.connections.contains_key(&config.id) {
            return Err(ConfigError::DuplicateConnection {
                connection_id: config.id.to_string(),
            }
            .into());
        }

        self.store.upsert_connection(&config).await?;
        self.attach_connection(config)
    }

    /// Registers a connection without re-persisting (startup restore).
    pub fn attach_connection(self: &Arc<Self>, config: ConnectionConfig) -> Result<(), GatewayError> {
        let id = config.id.clone();
        let enabled = config.enabled;
        let auto_discover = config.discovery.auto_discover;

        let runtime = ConnectionRuntime::new(config)?;
        self.connections.insert(id.clone(), runtime.clone());

        info!(connection_id = %id, "connection added");

        if enabled {
            self.spawn_supervisor(&id, &runtime);
        }
        if auto_discover {
            self.spawn_discovery(&id, &runtime);
        }
        Ok(())
    }

    /// Removes a connection and cascades its variables.
    pub async fn remove_connection(&self, id: &ConnectionId) -> Result<(), GatewayError> {
        let (_, runtime) = self
            .connections
            .remove(id)
            .ok_or_else(|| unknown_connection(id))?;

        runtime.cancel_all();
        runtime.session.disconnect().await;
        runtime.set_status(ConnectionStatus::Disconnected);

        // Cascade: drop every variable bound to this connection.
        let victims: Vec<VariableId> = self
            .snapshot()
            .values()
            .filter(|v| v.config.connection_id == *id)
            .map(|v| v.config.id.clone())
            .collect();
        for victim in victims {
            self.remove_variable(&victim).await.ok();
        }

        self.store.delete_connection(id).await?;
        self.bus.emit(GatewayEvent::ConnectionLost {
            connection_id: id.clone(),
            reason: "removed".to_string(),
        });

        info!(connection_id = %id, "connection removed");
        Ok(())
    }

    /// Updates a connection: disconnect, reconfigure, reconnect.
    /// Simple correctness over uptime.
    pub async fn update_connection(
        self: &Arc<Self>,
        id: &ConnectionId,
        config: ConnectionConfig,
    ) -> Result<(), GatewayError> {
        if config.id != *id {
            return Err(ConfigError::validation("id", "connection id is immutable").into());
        }

        let (_, runtime) = self
            .connections
            .remove(id)
            .ok_or_else(|| unknown_connection(id))?;
        runtime.cancel_all();
        runtime.session.disconnect().await;

        self.store.upsert_connection(&config).await?;
        self.attach_connection(config)
    }

    /// Starts (or restarts) the session for a connection.
    pub fn connect(self: &Arc<Self>, id: &ConnectionId) -> Result<(), GatewayError> {
        let runtime = self.runtime(id)?;
        match runtime.status() {
            ConnectionStatus::Connected | ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {
                Ok(())
            }
            _ => {
                self.spawn_supervisor(id, &runtime);
                // A manual disconnect cancelled the discovery loop with
                // everything else; bring it back alongside the session.
                if runtime.config.read().discovery.auto_discover {
                    self.spawn_discovery(id, &runtime);
                }
                Ok(())
            }
        }
    }

    /// Stops the session for a connection, keeping its configuration.
    pub async fn disconnect(&self, id: &ConnectionId) -> Result<(), GatewayError> {
        let runtime = self.runtime(id)?;
        runtime.cancel_all();
        runtime.session.disconnect().await;
        runtime.set_status(ConnectionStatus::Disconnected);
        self.bus.emit(GatewayEvent::ConnectionLost {
            connection_id: id.clone(),
            reason: "disconnected".to_string(),
        });
        Ok(())
    }

    /// Returns one connection's status.
    pub fn status(&self, id: &ConnectionId) -> Result<ConnectionStatus, GatewayError> {
        Ok(self.runtime(id)?.status())
    }

    /// Returns a summary of every connection.
    pub fn statuses(&self) -> Vec<ConnectionInfo> {
        let snapshot = self.snapshot();
        self.connections
            .iter()
            .map(|entry| {
                let runtime = entry.value();
                let id = entry.key();
                ConnectionInfo {
                    config: runtime.config.read().clone(),
                    status: runtime.status(),
                    variable_count: snapshot
                        .values()
                        .filter(|v| v.config.connection_id == *id)
                        .count(),
                }
            })
            .collect()
    }

    /// Returns one connection's info.
    pub fn connection(&self, id: &ConnectionId) -> Result<ConnectionInfo, GatewayError> {
        let runtime = self.runtime(id)?;
        Ok(ConnectionInfo {
            config: runtime.config.read().clone(),
            status: runtime.status(),
            variable_count: self
                .snapshot()
                .values()
                .filter(|v| v.config.connection_id == *id)
                .count(),
        })
    }

    /// Uploads the symbol table of a connected session.
    pub async fn symbols(&self, id: &ConnectionId) -> Result<Vec<SymbolInfo>, GatewayError> {
        let runtime = self.runtime(id)?;
        if !runtime.session.is_connected() {
            return Err(GatewayError::Session(SessionError::NotConnected));
        }
        let symbols = runtime
            .session
            .upload_symbols()
            .await
            .map_err(SessionError::from)?;
        Ok(symbols)
    }

    /// Replaces a connection's discovery configuration in place.
    pub async fn set_discovery_config(
        self: &Arc<Self>,
        id: &ConnectionId,
        discovery: adsgate_core::DiscoveryConfig,
    ) -> Result<(), GatewayError> {
        let mut config = self.runtime(id)?.config.read().clone();
        config.discovery = discovery;
        self.update_connection(id, config).await
    }

    /// Triggers an on-demand discovery pass.
    pub async fn trigger_discovery(self: &Arc<Self>, id: &ConnectionId) -> Result<(), GatewayError> {
        let runtime = self.runtime(id)?;
        discovery::run_once(self, id, &runtime).await
    }

    // =========================================================================
    // Variables
    // =========================================================================

    /// Adds a variable subscription.
    pub async fn add_variable(self: &Arc<Self>, config: VariableConfig) -> Result<(), GatewayError> {
        let runtime = self.runtime(&config.connection_id)?;

        {
            let snapshot = self.snapshot();
            if snapshot.contains_key(&config.id) {
                return Err(ConfigError::DuplicateVariable {
                    what: "id".to_string(),
                    value: config.id.to_string(),
                }
                .into());
            }
            let topic = config.value_topic();
            if snapshot.values().any(|v| v.config.value_topic() == topic) {
                return Err(ConfigError::DuplicateVariable {
                    what: "topic".to_string(),
                    value: topic,
                }
                .into());
            }
        }

        let variable = Arc::new(Variable::new(config.clone()));
        self.swap_variables(|map| {
            map.insert(config.id.clone(), variable.clone());
        });

        if runtime.status().is_connected() {
            self.spawn_variable_task(&runtime, &config);
        }

        debug!(variable_id = %config.id, path = %config.path, "variable added");
        Ok(())
    }

    /// Removes a variable, its acquisition task, ring, and cache entry.
    pub async fn remove_variable(&self, id: &VariableId) -> Result<(), GatewayError> {
        let existed = {
            let mut removed = false;
            self.swap_variables(|map| {
                removed = map.remove(id).is_some();
            });
            removed
        };
        if !existed {
            return Err(GatewayError::Api(adsgate_core::ApiError::not_found(format!(
                "variable {}",
                id
            ))));
        }

        if let Some((_, task)) = self.variable_tasks.remove(id) {
            task.abort();
        }
        self.buffers.remove(id);
        self.cache.delete(&variable_key(id)).await;

        debug!(variable_id = %id, "variable removed");
        Ok(())
    }

    /// Returns one variable with its live state.
    pub fn variable(&self, id: &VariableId) -> Option<Arc<Variable>> {
        self.snapshot().get(id).cloned()
    }

    /// Returns every variable.
    pub fn variables(&self) -> Vec<Arc<Variable>> {
        self.snapshot().values().cloned().collect()
    }

    /// Returns the variables of one connection.
    pub fn variables_for(&self, connection_id: &ConnectionId) -> Vec<Arc<Variable>> {
        self.snapshot()
            .values()
            .filter(|v| v.config.connection_id == *connection_id)
            .cloned()
            .collect()
    }

    /// Lock-free read of the current variable snapshot.
    pub(crate) fn snapshot(&self) -> Arc<HashMap<VariableId, Arc<Variable>>> {
        self.variables.read().clone()
    }

    fn swap_variables<F>(&self, mutate: F)
    where
        F: FnOnce(&mut HashMap<VariableId, Arc<Variable>>),
    {
        let mut guard = self.variables.write();
        let mut next = (**guard).clone();
        mutate(&mut next);
        *guard = Arc::new(next);
    }

    // =========================================================================
    // Ingest Pipeline
    // =========================================================================

    /// The `variable.changed` path: swap state, ring push, cache write,
    /// persistence job, bus publish.
    pub async fn ingest(
        &self,
        connection_id: &ConnectionId,
        config: &VariableConfig,
        sample: Sample,
        read_duration: Option<Duration>,
    ) {
        // 1. Copy-on-write state swap keeps readers lock-free.
        self.swap_variables(|map| {
            if let Some(existing) = map.get(&config.id) {
                let mut updated = (**existing).clone();
                updated.state.last_value = Some(sample.value.clone());
                updated.state.last_timestamp_ms = Some(sample.timestamp_ms);
                updated.state.last_read_duration_us =
                    read_duration.map(|d| d.as_micros() as u64).or(updated.state.last_read_duration_us);
                updated.state.last_error = None;
                map.insert(config.id.clone(), Arc::new(updated));
            }
        });

        // 2. Ring buffer records unconditionally (overwrites when full).
        self.buffers.push(&config.id, sample.clone());

        // 3. Cache write, TTL-bounded; drops silently when degraded.
        self.cache
            .set(
                &variable_key(&config.id),
                &StorableSample::from(&sample),
                Some(self.config.cache_ttl),
            )
            .await;

        // 4. Persistence through the queue to preserve ordering.
        let job = Job::new(JobPayload::PersistSamples {
            variable_id: config.id.clone(),
            variable_name: config.name.clone(),
            samples: vec![sample.clone()],
        });
        if let Err(e) = self.queue.enqueue(job).await {
            warn!(variable_id = %config.id, error = %e, "persistence enqueue failed");
        }

        // 5. Fan-out.
        self.bus.emit(GatewayEvent::variable_changed(
            connection_id.clone(),
            config.id.clone(),
            sample,
        ));
    }

    /// The `variable.error` path: keep the last-good value, bump the
    /// error counter, surface the event.
    pub fn record_variable_error(
        &self,
        connection_id: &ConnectionId,
        config: &VariableConfig,
        error: &SessionError,
    ) {
        self.swap_variables(|map| {
            if let Some(existing) = map.get(&config.id) {
                let mut updated = (**existing).clone();
                updated.state.last_error = Some(error.to_string());
                updated.state.error_count += 1;
                map.insert(config.id.clone(), Arc::new(updated));
            }
        });

        self.bus.emit(GatewayEvent::variable_error(
            connection_id.clone(),
            config.id.clone(),
            error.to_string(),
        ));
    }

    /// Drops every session's cached symbol handles; they re-resolve
    /// lazily on the next operation. Invoked when an invalidation notice
    /// arrives from a sibling gateway sharing the cache backend.
    pub fn invalidate_handle_caches(&self) {
        for entry in self.connections.iter() {
            entry.value().session.invalidate_handles();
        }
    }

    /// Returns the live session for a variable's connection, used by the
    /// write job handler.
    pub fn session_for(&self, variable_id: &VariableId) -> Option<(Arc<PlcSession>, Arc<Variable>)> {
        let variable = self.variable(variable_id)?;
        let runtime = self.connections.get(&variable.config.connection_id)?;
        Some((runtime.session.clone(), variable))
    }

    pub(crate) fn runtime(&self, id: &ConnectionId) -> Result<Arc<ConnectionRuntime>, GatewayError> {
        self.connections
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| unknown_connection(id))
    }

    // =========================================================================
    // Supervisor
    // =========================================================================

    fn spawn_supervisor(self: &Arc<Self>, id: &ConnectionId, runtime: &Arc<ConnectionRuntime>) {
        // Fresh cancel channel per supervisor generation.
        let _ = runtime.cancel_tx.send(false);
        let cancel_rx = runtime.cancel_tx.subscribe();

        let manager = self.clone();
        let id = id.clone();
        let runtime_for_task = runtime.clone();
        let handle = tokio::spawn(async move {
            supervise(manager, id, runtime_for_task, cancel_rx).await;
        });

        // Keep the handle so cancel_all can abort a stuck supervisor.
        runtime.tasks.lock().push(handle);
    }

    fn spawn_discovery(self: &Arc<Self>, id: &ConnectionId, runtime: &Arc<ConnectionRuntime>) {
        let manager = self.clone();
        let id = id.clone();
        let runtime_task = runtime.clone();
        let cancel_rx = runtime.cancel_tx.subscribe();
        let handle = tokio::spawn(async move {
            discovery::run_loop(manager, id, runtime_task, cancel_rx).await;
        });
        runtime.tasks.lock().push(handle);
    }

    fn spawn_variable_task(self: &Arc<Self>, runtime: &Arc<ConnectionRuntime>, config: &VariableConfig) {
        let Some(session_cancel) = runtime.session_cancel.lock().as_ref().map(|tx| tx.subscribe())
        else {
            return;
        };
        let Some(failure_tx) = runtime.failure_tx.lock().clone() else {
            return;
        };

        let manager = self.clone();
        let runtime = runtime.clone();
        let config = config.clone();
        let id = config.id.clone();

        let handle = tokio::spawn(async move {
            if config.use_notification {
                notification_task(manager, runtime, config, session_cancel, failure_tx).await;
            } else {
                poll_task(manager, runtime, config, session_cancel, failure_tx).await;
            }
        });

        if let Some(previous) = self.variable_tasks.insert(id, handle) {
            previous.abort();
        }
    }

    /// Starts acquisition tasks for every variable of a connection.
    /// Called by the supervisor after each successful connect, so
    /// unchanged variables keep their buffers across reconnects.
    fn start_session_epoch(self: &Arc<Self>, id: &ConnectionId, runtime: &Arc<ConnectionRuntime>) {
        let (session_cancel_tx, _) = watch::channel(false);
        let (failure_tx, failure_rx) = mpsc::channel(8);

        *runtime.session_cancel.lock() = Some(session_cancel_tx);
        *runtime.failure_tx.lock() = Some(failure_tx);

        for variable in self.variables_for(id) {
            self.spawn_variable_task(runtime, &variable.config);
        }

        // Hand the failure receiver to the supervisor through the runtime.
        *runtime.failure_rx.lock() = Some(failure_rx);
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connections.len())
            .field("variables", &self.snapshot().len())
            .finish()
    }
}

fn unknown_connection(id: &ConnectionId) -> GatewayError {
    GatewayError::Config(ConfigError::UnknownConnection {
        connection_id: id.to_string(),
    })
}

// =============================================================================
// Supervisor Loop
// =============================================================================

async fn supervise(
    manager: Arc<ConnectionManager>,
    id: ConnectionId,
    runtime: Arc<ConnectionRuntime>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let backoff = adsgate_core::ExponentialBackoff::new(manager.config.reconnect.clone());
    let mut attempt: u32 = 0;
    let mut first = true;

    loop {
        if *cancel_rx.borrow() {
            return;
        }

        runtime.set_status(if first {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Reconnecting
        });

        match runtime.session.connect().await {
            Ok(()) => {
                attempt = 0;
                first = false;

                // Epoch before status: a variable added the instant the
                // status reads Connected must find a live epoch to hook
                // its acquisition task into.
                manager.start_session_epoch(&id, &runtime);
                runtime.set_status(ConnectionStatus::Connected);
                manager.bus.emit(GatewayEvent::ConnectionEstablished {
                    connection_id: id.clone(),
                });
                info!(connection_id = %id, "connection established");

                let mut failure_rx = runtime.failure_rx.lock().take();

                let failed = async {
                    match failure_rx.as_mut() {
                        Some(rx) => {
                            rx.recv().await;
                        }
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    _ = cancel_rx.changed() => {
                        runtime.cancel_session_epoch();
                        runtime.session.disconnect().await;
                        runtime.set_status(ConnectionStatus::Disconnected);
                        return;
                    }
                    _ = failed => {
                        runtime.cancel_session_epoch();
                        runtime.session.disconnect().await;
                        runtime.set_status(ConnectionStatus::Reconnecting);
                        manager.bus.emit(GatewayEvent::ConnectionError {
                            connection_id: id.clone(),
                            error: "session lost".to_string(),
                        });
                        warn!(connection_id = %id, "session lost, scheduling reconnect");
                    }
                }
            }
            Err(e) => {
                let session_error = SessionError::from(e);
                manager.bus.emit(GatewayEvent::ConnectionError {
                    connection_id: id.clone(),
                    error: session_error.to_string(),
                });

                if session_error.is_fatal() {
                    runtime.set_status(ConnectionStatus::Failed);
                    warn!(connection_id = %id, error = %session_error, "fatal connection error, giving up");
                    return;
                }

                runtime.set_status(ConnectionStatus::Reconnecting);
                first = false;
            }
        }

        attempt += 1;
        let delay = backoff.delay_for(attempt);
        debug!(connection_id = %id, attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel_rx.changed() => return,
        }
    }
}

// =============================================================================
// Acquisition Tasks
// =============================================================================

/// Polls one variable at its sample period.
///
/// The variable's fields are captured as a snapshot before any await;
/// no manager lock is held across a suspension point.
async fn poll_task(
    manager: Arc<ConnectionManager>,
    runtime: Arc<ConnectionRuntime>,
    config: VariableConfig,
    mut cancel: watch::Receiver<bool>,
    failure_tx: mpsc::Sender<()>,
) {
    let mut ticker = tokio::time::interval(config.sample_period.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.changed() => return,
            _ = ticker.tick() => {}
        }
        if *cancel.borrow() {
            return;
        }

        let start = Instant::now();
        match runtime.session.read(&config.path, config.ads_type).await {
            Ok(value) => {
                let elapsed = start.elapsed();
                manager.bus.emit(GatewayEvent::PerformanceMetric(OperationMetric::new(
                    "session.read",
                    elapsed.as_nanos() as u64,
                )));
                manager
                    .ingest(
                        &config.connection_id,
                        &config,
                        Sample::now(value, Quality::Good),
                        Some(elapsed),
                    )
                    .await;
            }
            Err(e) => {
                let session_error = SessionError::from(e);
                let retryable = session_error.is_retryable();
                manager.record_variable_error(&config.connection_id, &config, &session_error);

                if retryable {
                    // Connectivity class: hand off to the supervisor.
                    let _ = failure_tx.try_send(());
                    return;
                }
                // Protocol class stays scoped to this variable; keep
                // polling, other variables continue untouched.
            }
        }
    }
}

/// Pumps device notifications for one variable.
async fn notification_task(
    manager: Arc<ConnectionManager>,
    runtime: Arc<ConnectionRuntime>,
    config: VariableConfig,
    mut cancel: watch::Receiver<bool>,
    failure_tx: mpsc::Sender<()>,
) {
    let mut subscription = match runtime
        .session
        .subscribe(&config.path, config.ads_type, config.sample_period)
        .await
    {
        Ok(subscription) => subscription,
        Err(e) => {
            let session_error = SessionError::from(e);
            let retryable = session_error.is_retryable();
            manager.record_variable_error(&config.connection_id, &config, &session_error);
            if retryable {
                let _ = failure_tx.try_send(());
            }
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                let _ = runtime.session.unsubscribe(&subscription).await;
                return;
            }
            sample = subscription.recv() => {
                match sample {
                    Some(sample) => {
                        manager
                            .ingest(&config.connection_id, &config, sample, None)
                            .await;
                    }
                    None => {
                        // Channel gone: the transport died underneath us.
                        let _ = failure_tx.try_send(());
                        return;
                    }
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use adsgate_cache::CacheConfig;
    use adsgate_core::Value;
    use adsgate_queue::{MemoryQueue, QueueConfig};
    use adsgate_store::StoreConfig;

    async fn test_manager() -> (Arc<ConnectionManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(256);
        let cache = CacheClient::new(
            CacheConfig {
                host: "127.0.0.1".to_string(),
                port: 1,
                op_timeout: Duration::from_millis(50),
            },
            None,
        )
        .unwrap();
        let store = TimeSeriesStore::open(StoreConfig {
            path: dir.path().join("db"),
            compression: false,
        })
        .await
        .unwrap();
        let queue = WorkQueue::new(Arc::new(MemoryQueue::new()), QueueConfig::default(), None);

        let manager = ConnectionManager::new(
            Arc::new(VariableBuffers::new(64)),
            cache,
            queue,
            bus,
            PerformanceMonitor::new(),
            store,
            ManagerConfig::default(),
        );
        (manager, dir)
    }

    fn connection(id: &str) -> ConnectionConfig {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": id,
            "host": "127.0.0.1",
            "target_address": "127.0.0.1.1.1",
            "enabled": false
        }))
        .unwrap()
    }

    fn variable(id: &str, connection: &str) -> VariableConfig {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "connection_id": connection,
            "name": id,
            "path": format!("MAIN.{}", id),
            "type": "real"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_connection_persists_and_lists() {
        let (manager, _dir) = test_manager().await;

        manager.add_connection(connection("c1")).await.unwrap();
        assert_eq!(manager.statuses().len(), 1);
        assert_eq!(
            manager.status(&ConnectionId::new("c1")).unwrap(),
            ConnectionStatus::Disconnected
        );

        // Persisted for restart reconstruction.
        assert_eq!(manager.store.load_connections().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_connection_rejected() {
        let (manager, _dir) = test_manager().await;
        manager.add_connection(connection("c1")).await.unwrap();

        let result = manager.add_connection(connection("c1")).await;
        assert!(matches!(
            result,
            Err(GatewayError::Config(ConfigError::DuplicateConnection { .. }))
        ));
    }

    #[tokio::test]
    async fn test_invalid_target_address_rejected() {
        let (manager, _dir) = test_manager().await;
        let mut config = connection("c1");
        config.target_address = "not-an-ams-id".to_string();

        let result = manager.add_connection(config).await;
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[tokio::test]
    async fn test_variable_requires_connection() {
        let (manager, _dir) = test_manager().await;
        let result = manager.add_variable(variable("v1", "missing")).await;
        assert!(matches!(
            result,
            Err(GatewayError::Config(ConfigError::UnknownConnection { .. }))
        ));
    }

    #[tokio::test]
    async fn test_variable_unique_id_and_topic() {
        let (manager, _dir) = test_manager().await;
        manager.add_connection(connection("c1")).await.unwrap();
        manager.add_variable(variable("v1", "c1")).await.unwrap();

        let result = manager.add_variable(variable("v1", "c1")).await;
        assert!(matches!(
            result,
            Err(GatewayError::Config(ConfigError::DuplicateVariable { .. }))
        ));

        // Same topic under a different id is rejected too.
        let mut clashing = variable("v2", "c1");
        clashing.topic = "variables/v1/value".to_string();
        let result = manager.add_variable(clashing).await;
        assert!(matches!(
            result,
            Err(GatewayError::Config(ConfigError::DuplicateVariable { .. }))
        ));
    }

    #[tokio::test]
    async fn test_remove_connection_cascades_variables() {
        let (manager, _dir) = test_manager().await;
        manager.add_connection(connection("c1")).await.unwrap();
        manager.add_variable(variable("v1", "c1")).await.unwrap();
        manager.add_variable(variable("v2", "c1")).await.unwrap();

        manager.remove_connection(&ConnectionId::new("c1")).await.unwrap();
        assert!(manager.variables().is_empty());
        assert!(manager.variable(&VariableId::new("v1")).is_none());
    }

    #[tokio::test]
    async fn test_ingest_updates_state_ring_and_bus() {
        let (manager, _dir) = test_manager().await;
        manager.add_connection(connection("c1")).await.unwrap();
        manager.add_variable(variable("v1", "c1")).await.unwrap();

        let mut stream = manager.bus.subscribe("variable.changed");
        let config = manager.variable(&VariableId::new("v1")).unwrap().config.clone();

        manager
            .ingest(
                &ConnectionId::new("c1"),
                &config,
                Sample::at(100, Value::Float(23.5), Quality::Good),
                Some(Duration::from_micros(150)),
            )
            .await;

        let variable = manager.variable(&VariableId::new("v1")).unwrap();
        assert_eq!(variable.state.last_value, Some(Value::Float(23.5)));
        assert_eq!(variable.state.last_timestamp_ms, Some(100));
        assert_eq!(variable.state.last_read_duration_us, Some(150));

        let latest = manager.buffers.latest(&VariableId::new("v1")).unwrap();
        assert_eq!(latest.value.as_f64(), Some(23.5));

        let event = stream.recv().await.unwrap();
        assert_eq!(event.topic(), "variable.changed");
    }

    #[tokio::test]
    async fn test_variable_error_preserves_last_good() {
        let (manager, _dir) = test_manager().await;
        manager.add_connection(connection("c1")).await.unwrap();
        manager.add_variable(variable("v1", "c1")).await.unwrap();
        let config = manager.variable(&VariableId::new("v1")).unwrap().config.clone();

        manager
            .ingest(
                &ConnectionId::new("c1"),
                &config,
                Sample::at(100, Value::Float(1.0), Quality::Good),
                None,
            )
            .await;
        manager.record_variable_error(
            &ConnectionId::new("c1"),
            &config,
            &SessionError::symbol_not_found("MAIN.v1"),
        );

        let variable = manager.variable(&VariableId::new("v1")).unwrap();
        assert_eq!(variable.state.last_value, Some(Value::Float(1.0)));
        assert!(variable.state.last_error.is_some());
        assert_eq!(variable.state.error_count, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_stable_across_updates() {
        let (manager, _dir) = test_manager().await;
        manager.add_connection(connection("c1")).await.unwrap();
        manager.add_variable(variable("v1", "c1")).await.unwrap();

        let before = manager.snapshot();
        manager.add_variable(variable("v2", "c1")).await.unwrap();

        // The old snapshot is untouched by the swap.
        assert_eq!(before.len(), 1);
        assert_eq!(manager.snapshot().len(), 2);
    }
}
