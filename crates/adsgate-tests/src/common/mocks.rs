// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! An in-process mock PLC speaking the AMS/ADS framing over loopback
//! TCP.
//!
//! The mock serves symbol handles, typed reads and writes, the info
//! block (OnlineChange counter), bulk symbol upload, and device
//! notifications, which tests push explicitly. Connections can be
//! dropped on demand to exercise the reconnect path.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use adsgate_ads::proto::{self, AmsHeader};
use adsgate_ads::{codec, index_group, state_flags, symbols, AdsCommand, AmsAddr};
use adsgate_core::{AdsType, SymbolInfo, Value};

/// ADS error code the mock answers for unknown symbols/handles.
const ERR_SYMBOL_NOT_FOUND: u32 = 0x710;
/// Generic device error used for rejected writes.
const ERR_DEVICE: u32 = 0x701;

struct NotificationReg {
    path: String,
    client: AmsAddr,
    server: AmsAddr,
    outbound: mpsc::Sender<Bytes>,
}

struct MockPlcState {
    symbols: RwLock<Vec<SymbolInfo>>,
    values: DashMap<String, Vec<u8>>,
    handles: DashMap<u32, String>,
    next_handle: AtomicU32,
    next_notification: AtomicU32,
    online_change: AtomicU32,
    fail_writes: AtomicBool,
    notifications: DashMap<u32, NotificationReg>,
    connections: DashMap<u64, JoinHandle<()>>,
    next_connection: AtomicU64,
    writes: DashMap<String, Vec<Vec<u8>>>,
}

/// The mock PLC server.
pub struct MockPlc {
    port: u16,
    state: Arc<MockPlcState>,
    accept_task: JoinHandle<()>,
}

impl MockPlc {
    /// Binds a loopback listener and starts accepting sessions.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock plc");
        let port = listener.local_addr().expect("local addr").port();

        let state = Arc::new(MockPlcState {
            symbols: RwLock::new(Vec::new()),
            values: DashMap::new(),
            handles: DashMap::new(),
            next_handle: AtomicU32::new(1),
            next_notification: AtomicU32::new(1),
            online_change: AtomicU32::new(1),
            fail_writes: AtomicBool::new(false),
            notifications: DashMap::new(),
            connections: DashMap::new(),
            next_connection: AtomicU64::new(1),
            writes: DashMap::new(),
        });

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let id = accept_state.next_connection.fetch_add(1, Ordering::Relaxed);
                let conn_state = accept_state.clone();
                let handle = tokio::spawn(async move {
                    connection_loop(socket, conn_state).await;
                });
                accept_state.connections.insert(id, handle);
            }
        });

        Self {
            port,
            state,
            accept_task,
        }
    }

    /// The router port to connect against.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Replaces the symbol table, zero-filling values for new primitives.
    pub fn set_symbols(&self, table: Vec<SymbolInfo>) {
        for symbol in &table {
            if let Some(ads_type) = AdsType::parse(&symbol.type_name) {
                self.state
                    .values
                    .entry(symbol.path.clone())
                    .or_insert_with(|| vec![0u8; ads_type.size()]);
            }
        }
        *self.state.symbols.write() = table;
    }

    /// Sets a symbol's value.
    pub fn set_value(&self, path: &str, ads_type: AdsType, value: &Value) {
        let bytes = codec::encode(value, ads_type).expect("encodable fixture value");
        self.state.values.insert(path.to_string(), bytes);
    }

    /// Reads a symbol's current raw value back, decoded.
    pub fn value(&self, path: &str, ads_type: AdsType) -> Option<Value> {
        let bytes = self.state.values.get(path)?;
        codec::decode(&bytes, ads_type).ok()
    }

    /// Returns how many writes a symbol received.
    pub fn write_count(&self, path: &str) -> usize {
        self.state.writes.get(path).map(|w| w.len()).unwrap_or(0)
    }

    /// Advances the OnlineChange counter.
    pub fn bump_online_change(&self) {
        self.state.online_change.fetch_add(1, Ordering::SeqCst);
    }

    /// Makes subsequent symbol writes fail with a device error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Pushes a device notification sample to every subscriber of the
    /// path, stamped with the current clock.
    pub fn push_notification(&self, path: &str, ads_type: AdsType, value: &Value) {
        let data = codec::encode(value, ads_type).expect("encodable notification value");
        let timestamp_ms = Utc::now().timestamp_millis();

        for entry in self.state.notifications.iter() {
            let reg = entry.value();
            if reg.path != path {
                continue;
            }
            let stream = proto::build_notification_stream(timestamp_ms, &[(*entry.key(), &data)]);
            let header = AmsHeader {
                target: reg.client,
                source: reg.server,
                command: AdsCommand::DeviceNotification as u16,
                state_flags: state_flags::REQUEST,
                length: stream.len() as u32,
                error_code: 0,
                invoke_id: 0,
            };
            let frame = proto::write_frame(&header, &stream);
            let _ = reg.outbound.try_send(frame);
        }
    }

    /// Returns the number of live notification registrations.
    pub fn notification_count(&self) -> usize {
        self.state.notifications.len()
    }

    /// Drops every established session, simulating a TCP failure. The
    /// listener keeps accepting, so reconnects succeed.
    pub fn drop_connections(&self) {
        for entry in self.state.connections.iter() {
            entry.value().abort();
        }
        self.state.connections.clear();
        self.state.notifications.clear();
        self.state.handles.clear();
    }
}

impl Drop for MockPlc {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}

// =============================================================================
// Connection Loop
// =============================================================================

async fn connection_loop(socket: TcpStream, state: Arc<MockPlcState>) {
    socket.set_nodelay(true).ok();
    let (mut read_half, mut write_half) = socket.into_split();

    // One writer task serializes responses and pushed notifications.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(256);
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                return;
            }
        }
    });

    loop {
        let mut tcp_header = [0u8; proto::TCP_HEADER_LEN];
        if read_half.read_exact(&mut tcp_header).await.is_err() {
            break;
        }
        let len = u32::from_le_bytes(tcp_header[2..6].try_into().unwrap_or_default()) as usize;
        let mut body = vec![0u8; len];
        if read_half.read_exact(&mut body).await.is_err() {
            break;
        }

        let Ok((header, payload)) = proto::parse_frame(Bytes::from(body)) else {
            break;
        };

        let response = handle_request(&state, &header, payload, &outbound_tx);
        let response_header = AmsHeader {
            target: header.source,
            source: header.target,
            command: header.command,
            state_flags: state_flags::RESPONSE,
            length: response.len() as u32,
            error_code: 0,
            invoke_id: header.invoke_id,
        };
        if outbound_tx
            .send(proto::write_frame(&response_header, &response))
            .await
            .is_err()
        {
            break;
        }
    }

    writer.abort();
}

fn handle_request(
    state: &Arc<MockPlcState>,
    header: &AmsHeader,
    mut payload: Bytes,
    outbound: &mpsc::Sender<Bytes>,
) -> Bytes {
    match header.command() {
        Some(AdsCommand::ReadState) => proto::read_state_response(0, 5, 0),

        Some(AdsCommand::ReadWrite) => {
            let _group = payload.get_u32_le();
            let _offset = payload.get_u32_le();
            let _read_len = payload.get_u32_le();
            let write_len = payload.get_u32_le() as usize;
            let name_bytes = payload.split_to(write_len.min(payload.len()));

            // Handle-by-name: null-terminated symbol path.
            let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
            let path = String::from_utf8_lossy(&name_bytes[..end]).to_string();

            if state.values.contains_key(&path) {
                let handle = state.next_handle.fetch_add(1, Ordering::Relaxed);
                state.handles.insert(handle, path);
                proto::read_response(0, &handle.to_le_bytes())
            } else {
                proto::read_response(ERR_SYMBOL_NOT_FOUND, &[])
            }
        }

        Some(AdsCommand::Read) => {
            let group = payload.get_u32_le();
            let offset = payload.get_u32_le();
            let length = payload.get_u32_le() as usize;

            match group {
                index_group::SYM_VALUE_BY_HANDLE => match state.handles.get(&offset) {
                    Some(path) => match state.values.get(path.value()) {
                        Some(bytes) => {
                            let mut data = bytes.clone();
                            data.resize(length.max(data.len()), 0);
                            data.truncate(length);
                            proto::read_response(0, &data)
                        }
                        None => proto::read_response(ERR_SYMBOL_NOT_FOUND, &[]),
                    },
                    None => proto::read_response(ERR_SYMBOL_NOT_FOUND, &[]),
                },
                index_group::SYM_INFO => {
                    let upload = symbols::build_symbol_upload(&state.symbols.read());
                    let info = symbols::InfoBlock {
                        online_change_counter: state.online_change.load(Ordering::SeqCst),
                        symbol_count: state.symbols.read().len() as u32,
                        upload_size: upload.len() as u32,
                    };
                    proto::read_response(0, &symbols::build_info_block(&info))
                }
                index_group::SYM_UPLOAD => {
                    let upload = symbols::build_symbol_upload(&state.symbols.read());
                    proto::read_response(0, &upload)
                }
                _ => proto::read_response(ERR_SYMBOL_NOT_FOUND, &[]),
            }
        }

        Some(AdsCommand::Write) => {
            let group = payload.get_u32_le();
            let offset = payload.get_u32_le();
            let length = payload.get_u32_le() as usize;
            let data = payload.split_to(length.min(payload.len()));

            match group {
                index_group::SYM_VALUE_BY_HANDLE => {
                    if state.fail_writes.load(Ordering::SeqCst) {
                        return proto::write_response(ERR_DEVICE);
                    }
                    match state.handles.get(&offset) {
                        Some(path) => {
                            let path = path.value().clone();
                            state
                                .writes
                                .entry(path.clone())
                                .or_default()
                                .push(data.to_vec());
                            state.values.insert(path, data.to_vec());
                            proto::write_response(0)
                        }
                        None => proto::write_response(ERR_SYMBOL_NOT_FOUND),
                    }
                }
                index_group::SYM_RELEASE_HANDLE => {
                    if data.len() >= 4 {
                        let handle = u32::from_le_bytes(data[..4].try_into().unwrap_or_default());
                        state.handles.remove(&handle);
                    }
                    proto::write_response(0)
                }
                _ => proto::write_response(ERR_DEVICE),
            }
        }

        Some(AdsCommand::AddDeviceNotification) => {
            let group = payload.get_u32_le();
            let offset = payload.get_u32_le();

            if group != index_group::SYM_VALUE_BY_HANDLE {
                return proto::add_notification_response(ERR_DEVICE, 0);
            }
            match state.handles.get(&offset) {
                Some(path) => {
                    let notification = state.next_notification.fetch_add(1, Ordering::Relaxed);
                    state.notifications.insert(
                        notification,
                        NotificationReg {
                            path: path.value().clone(),
                            client: header.source,
                            server: header.target,
                            outbound: outbound.clone(),
                        },
                    );
                    trace!(notification, "mock notification installed");
                    proto::add_notification_response(0, notification)
                }
                None => proto::add_notification_response(ERR_SYMBOL_NOT_FOUND, 0),
            }
        }

        Some(AdsCommand::DeleteDeviceNotification) => {
            if payload.len() >= 4 {
                let handle = payload.get_u32_le();
                state.notifications.remove(&handle);
            }
            proto::write_response(0)
        }

        _ => proto::write_response(ERR_DEVICE),
    }
}
