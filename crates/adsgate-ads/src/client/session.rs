// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One ADS session against a PLC runtime.
//!
//! The session resolves symbol paths to handles (cached per session),
//! reads and writes typed values, installs device notifications, and
//! uploads the symbol table. `connected` is true only between a
//! successful connect and the first transport failure.
//!
//! OnlineChange invalidates every cached handle; the cache is simply
//! dropped and handles re-resolve lazily on the next operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use adsgate_core::{AdsType, Quality, Sample, SymbolInfo, Value};

use crate::codec;
use crate::error::{ads_code, AdsError, AdsResult};
use crate::proto::{self, NotificationSample};
use crate::symbols::{self, InfoBlock};
use crate::types::{index_group, AdsCommand, SessionConfig, TransmissionMode, INFO_BLOCK_LEN};

use super::transport::AmsTransport;

/// Depth of the raw per-subscription notification channel.
const NOTIFICATION_CHANNEL_DEPTH: usize = 256;

// =============================================================================
// PlcSession
// =============================================================================

/// A session to one PLC runtime.
///
/// All operations take `&self`; the session is shared behind an `Arc` by
/// the poll and notification tasks that drive it.
pub struct PlcSession {
    config: SessionConfig,
    transport: RwLock<Option<Arc<AmsTransport>>>,
    handles: DashMap<String, u32>,
    notification_paths: DashMap<u32, String>,
    connected: AtomicBool,
}

impl PlcSession {
    /// Creates a disconnected session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            transport: RwLock::new(None),
            handles: DashMap::new(),
            notification_paths: DashMap::new(),
            connected: AtomicBool::new(false),
        }
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns `true` between a successful connect and the first failure.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connects to the router and validates the route with a ReadState.
    pub async fn connect(&self) -> AdsResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let transport = Arc::new(AmsTransport::connect(&self.config).await?);

        // Route validation: a ReadState answered by the target proves the
        // router accepts our source address for this target.
        let payload = transport
            .request(AdsCommand::ReadState, Bytes::new(), "connect")
            .await?;
        proto::parse_read_state_response(payload, "connect")?;

        *self.transport.write() = Some(transport);
        self.connected.store(true, Ordering::SeqCst);

        info!(target = %self.config.target, "ADS session connected");
        Ok(())
    }

    /// Tears down all notifications and handles, then closes the socket.
    pub async fn disconnect(&self) {
        let transport = self.transport.write().take();
        self.connected.store(false, Ordering::SeqCst);

        if let Some(transport) = transport {
            // Best effort: the device forgets per-session state anyway
            // once the TCP connection drops.
            for entry in self.notification_paths.iter() {
                let _ = transport
                    .request(
                        AdsCommand::DeleteDeviceNotification,
                        proto::delete_notification_request(*entry.key()),
                        "disconnect",
                    )
                    .await;
            }
            for entry in self.handles.iter() {
                let _ = transport
                    .request(
                        AdsCommand::Write,
                        proto::write_request(
                            index_group::SYM_RELEASE_HANDLE,
                            0,
                            &entry.value().to_le_bytes(),
                        ),
                        "disconnect",
                    )
                    .await;
            }
            transport.close();
        }

        self.handles.clear();
        self.notification_paths.clear();
        debug!(target = %self.config.target, "ADS session disconnected");
    }

    /// Drops every cached symbol handle. Called on OnlineChange.
    pub fn invalidate_handles(&self) {
        let dropped = self.handles.len();
        self.handles.clear();
        if dropped > 0 {
            debug!(dropped, "symbol handles invalidated");
        }
    }

    /// Returns the number of cached handles.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    // =========================================================================
    // Typed Operations
    // =========================================================================

    /// Reads a symbol by path and decodes it to the declared type.
    pub async fn read(&self, path: &str, ads_type: AdsType) -> AdsResult<Value> {
        let handle = self.resolve_handle(path).await?;

        let result = self
            .request(
                AdsCommand::Read,
                proto::read_request(
                    index_group::SYM_VALUE_BY_HANDLE,
                    handle,
                    ads_type.size() as u32,
                ),
                path,
            )
            .await
            .and_then(|payload| proto::parse_read_response(payload, path));

        let data = match result {
            Ok(data) => data,
            Err(e) if e.code() == Some(ads_code::SYMBOL_VERSION_INVALID) => {
                // OnlineChange raced us: re-resolve once and retry.
                self.handles.remove(path);
                let handle = self.resolve_handle(path).await?;
                let payload = self
                    .request(
                        AdsCommand::Read,
                        proto::read_request(
                            index_group::SYM_VALUE_BY_HANDLE,
                            handle,
                            ads_type.size() as u32,
                        ),
                        path,
                    )
                    .await?;
                proto::parse_read_response(payload, path)?
            }
            Err(e) => return Err(e),
        };

        codec::decode(&data, ads_type)
    }

    /// Encodes a value per the declared type and writes it by path.
    pub async fn write(&self, path: &str, value: &Value, ads_type: AdsType) -> AdsResult<()> {
        let data = codec::encode(value, ads_type)?;
        let handle = self.resolve_handle(path).await?;

        let payload = self
            .request(
                AdsCommand::Write,
                proto::write_request(index_group::SYM_VALUE_BY_HANDLE, handle, &data),
                path,
            )
            .await?;
        proto::parse_write_response(payload, path)
    }

    /// Reads `length` raw bytes at an index group/offset.
    pub async fn read_raw(&self, group: u32, offset: u32, length: u32) -> AdsResult<Bytes> {
        let payload = self
            .request(
                AdsCommand::Read,
                proto::read_request(group, offset, length),
                "read_raw",
            )
            .await?;
        proto::parse_read_response(payload, "read_raw")
    }

    // =========================================================================
    // Symbol Table
    // =========================================================================

    /// Reads the PLC info block.
    pub async fn read_info_block(&self) -> AdsResult<InfoBlock> {
        let data = self
            .read_raw(index_group::SYM_INFO, 0, INFO_BLOCK_LEN)
            .await?;
        symbols::parse_info_block(&data)
    }

    /// Reads the OnlineChange counter from the info block.
    pub async fn online_change_counter(&self) -> AdsResult<u32> {
        Ok(self.read_info_block().await?.online_change_counter)
    }

    /// Uploads the full symbol table in one call.
    pub async fn upload_symbols(&self) -> AdsResult<Vec<SymbolInfo>> {
        let info = self.read_info_block().await?;
        if info.upload_size == 0 {
            return Ok(Vec::new());
        }
        let data = self
            .read_raw(index_group::SYM_UPLOAD, 0, info.upload_size)
            .await?;
        symbols::parse_symbol_upload(data)
    }

    // =========================================================================
    // Device Notifications
    // =========================================================================

    /// Installs a device notification for a symbol.
    ///
    /// Samples arrive on the returned subscription with device-supplied
    /// timestamps, decoded per `ads_type`.
    pub async fn subscribe(
        &self,
        path: &str,
        ads_type: AdsType,
        cycle_time: Duration,
    ) -> AdsResult<SymbolSubscription> {
        let handle = self.resolve_handle(path).await?;
        let cycle_100ns = (cycle_time.as_nanos() / 100).min(u32::MAX as u128) as u32;

        let payload = self
            .request(
                AdsCommand::AddDeviceNotification,
                proto::add_notification_request(
                    index_group::SYM_VALUE_BY_HANDLE,
                    handle,
                    ads_type.size() as u32,
                    TransmissionMode::OnChange as u32,
                    0,
                    cycle_100ns,
                ),
                path,
            )
            .await?;
        let notification_handle = proto::parse_add_notification_response(payload, path)?;

        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_DEPTH);
        if let Some(transport) = self.current_transport() {
            transport.register_notification(notification_handle, tx);
        }
        self.notification_paths
            .insert(notification_handle, path.to_string());

        debug!(path, notification_handle, "device notification installed");

        Ok(SymbolSubscription {
            notification_handle,
            path: path.to_string(),
            ads_type,
            rx,
        })
    }

    /// Removes a device notification.
    pub async fn unsubscribe(&self, subscription: &SymbolSubscription) -> AdsResult<()> {
        let handle = subscription.notification_handle;
        self.notification_paths.remove(&handle);
        if let Some(transport) = self.current_transport() {
            transport.unregister_notification(handle);
        }

        let payload = self
            .request(
                AdsCommand::DeleteDeviceNotification,
                proto::delete_notification_request(handle),
                &subscription.path,
            )
            .await?;
        proto::parse_write_response(payload, &subscription.path)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn current_transport(&self) -> Option<Arc<AmsTransport>> {
        self.transport.read().clone()
    }

    async fn request(
        &self,
        command: AdsCommand,
        payload: Bytes,
        operation: &str,
    ) -> AdsResult<Bytes> {
        let transport = self.current_transport().ok_or(AdsError::NotConnected)?;

        match transport.request(command, payload, operation).await {
            Ok(data) => Ok(data),
            Err(e) => {
                // Transport-level failures end the connected state; device
                // errors are scoped to the operation.
                if matches!(
                    e,
                    AdsError::Io(_) | AdsError::TransportClosed | AdsError::NotConnected
                ) {
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(e)
            }
        }
    }

    async fn resolve_handle(&self, path: &str) -> AdsResult<u32> {
        if let Some(handle) = self.handles.get(path) {
            return Ok(*handle);
        }

        // Handle by name: ReadWrite against 0xF003 with the
        // null-terminated symbol name as write data.
        let mut name = path.as_bytes().to_vec();
        name.push(0);

        let payload = self
            .request(
                AdsCommand::ReadWrite,
                proto::read_write_request(index_group::SYM_HANDLE_BY_NAME, 0, 4, &name),
                path,
            )
            .await?;
        let data = proto::parse_read_response(payload, path)?;
        if data.len() < 4 {
            return Err(AdsError::frame("handle response shorter than 4 bytes"));
        }
        let handle = u32::from_le_bytes(data[..4].try_into().unwrap_or_default());

        self.handles.insert(path.to_string(), handle);
        Ok(handle)
    }
}

impl std::fmt::Debug for PlcSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlcSession")
            .field("target", &self.config.target)
            .field("connected", &self.is_connected())
            .field("handles", &self.handles.len())
            .finish()
    }
}

// =============================================================================
// SymbolSubscription
// =============================================================================

/// The receiving end of one device notification.
pub struct SymbolSubscription {
    /// Device-assigned notification handle.
    pub notification_handle: u32,
    path: String,
    ads_type: AdsType,
    rx: mpsc::Receiver<NotificationSample>,
}

impl SymbolSubscription {
    /// Returns the subscribed symbol path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Receives the next sample, decoded per the declared type.
    ///
    /// A sample whose bytes cannot be decoded is delivered with the raw
    /// bytes and `Quality::Bad` rather than dropped.
    pub async fn recv(&mut self) -> Option<Sample> {
        let raw = self.rx.recv().await?;
        Some(match codec::decode(&raw.data, self.ads_type) {
            Ok(value) => Sample::at(raw.timestamp_ms, value, Quality::Good),
            Err(e) => {
                warn!(path = %self.path, error = %e, "notification decode failed");
                Sample::at(raw.timestamp_ms, Value::Bytes(raw.data.to_vec()), Quality::Bad)
            }
        })
    }
}

impl std::fmt::Debug for SymbolSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolSubscription")
            .field("path", &self.path)
            .field("notification_handle", &self.notification_handle)
            .finish()
    }
}
