// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types for ADSGATE.
//!
//! This module provides the protocol-facing data types that flow through
//! the whole gateway: identifiers, the dynamic [`Value`] union, sample
//! quality, PLC symbol metadata, and the connection/variable configuration
//! records.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// A unique identifier for a configured PLC connection.
///
/// Connection IDs are stable across restarts and unique within a gateway
/// instance.
///
/// # Examples
///
/// ```
/// use adsgate_core::types::ConnectionId;
///
/// let id = ConnectionId::new("plc-line-1");
/// assert_eq!(id.as_str(), "plc-line-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a new connection ID.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the ID and returns the inner string.
    #[inline]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A unique identifier for a subscribed PLC variable.
///
/// Variable IDs are unique across the whole gateway, not just within one
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableId(String);

impl VariableId {
    /// Creates a new variable ID.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the ID and returns the inner string.
    #[inline]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VariableId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VariableId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for VariableId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Value
// =============================================================================

/// A dynamically typed value read from or written to a PLC symbol.
///
/// Integers are widened to `i64` and floats to `f64` at the decode
/// boundary; the declared [`AdsType`] of the variable carries the wire
/// width. JSON conversion happens only at the external boundary.
///
/// # Examples
///
/// ```
/// use adsgate_core::types::Value;
///
/// let temp = Value::Float(23.5);
/// assert_eq!(temp.as_f64(), Some(23.5));
/// assert!(temp.is_numeric());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer (widened from any integral PLC type).
    Int(i64),
    /// 64-bit floating point (widened from `real`).
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes for symbols the codec cannot interpret.
    Bytes(Vec<u8>),
    /// Key-value structure for expanded struct symbols.
    Struct(Vec<(String, Value)>),
    /// Null/undefined value.
    Null,
}

impl Value {
    /// Returns the type name of this value.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Struct(_) => "struct",
            Value::Null => "null",
        }
    }

    /// Returns `true` if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `true` if this is a numeric value.
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Attempts to convert this value to a boolean.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(v) => Some(if *v { 1 } else { 0 }),
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Attempts to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to get this value as a string reference.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Attempts to get this value as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Converts this value to a JSON value for the external boundary.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Int(v) => serde_json::json!(*v),
            Value::Float(v) => serde_json::json!(*v),
            Value::Text(v) => serde_json::Value::String(v.clone()),
            Value::Bytes(v) => serde_json::json!(v),
            Value::Struct(fields) => {
                let map: serde_json::Map<String, serde_json::Value> =
                    fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                serde_json::Value::Object(map)
            }
            Value::Null => serde_json::Value::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Struct(v) => write!(f, "{{{} fields}}", v.len()),
            Value::Null => write!(f, "null"),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

macro_rules! impl_from_for_value {
    ($variant:ident, $type:ty) => {
        impl From<$type> for Value {
            fn from(v: $type) -> Self {
                Value::$variant(v.into())
            }
        }
    };
}

impl_from_for_value!(Bool, bool);
impl_from_for_value!(Int, i8);
impl_from_for_value!(Int, i16);
impl_from_for_value!(Int, i32);
impl_from_for_value!(Int, i64);
impl_from_for_value!(Int, u8);
impl_from_for_value!(Int, u16);
impl_from_for_value!(Int, u32);
impl_from_for_value!(Float, f32);
impl_from_for_value!(Float, f64);
impl_from_for_value!(Text, String);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

// =============================================================================
// Quality
// =============================================================================

/// The quality of a sample.
///
/// The gateway emits `Bad` when decoding fails, `Uncertain` when serving a
/// stale cache read, and `Good` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// The value is good and reliable.
    #[default]
    Good,
    /// The value should not be used.
    Bad,
    /// The value may be stale but is probably usable.
    Uncertain,
}

impl Quality {
    /// Returns `true` if the quality is good.
    #[inline]
    pub fn is_good(&self) -> bool {
        matches!(self, Quality::Good)
    }

    /// Returns `true` if the quality is usable (good or uncertain).
    #[inline]
    pub fn is_usable(&self) -> bool {
        matches!(self, Quality::Good | Quality::Uncertain)
    }

    /// Returns the lowercase wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Good => "good",
            Quality::Bad => "bad",
            Quality::Uncertain => "uncertain",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Sample
// =============================================================================

/// A single timestamped sample of a variable.
///
/// Timestamps are unix milliseconds; device notifications carry the
/// device-supplied timestamp, polled reads carry the gateway clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// The sampled value.
    pub value: Value,
    /// Sample quality.
    pub quality: Quality,
}

impl Sample {
    /// Creates a sample stamped with the current wall clock.
    pub fn now(value: Value, quality: Quality) -> Self {
        Self {
            timestamp_ms: Utc::now().timestamp_millis(),
            value,
            quality,
        }
    }

    /// Creates a sample with an explicit timestamp.
    pub fn at(timestamp_ms: i64, value: Value, quality: Quality) -> Self {
        Self {
            timestamp_ms,
            value,
            quality,
        }
    }

    /// Returns `true` if the quality is good.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.quality.is_good()
    }

    /// Downgrades the sample to `uncertain`. Used when a value is served
    /// from the cache, where it may lag the device by up to its TTL.
    pub fn into_uncertain(mut self) -> Self {
        self.quality = Quality::Uncertain;
        self
    }
}

// =============================================================================
// ADS Symbol Types
// =============================================================================

/// The primitive PLC types the gateway can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdsType {
    /// 1 byte, nonzero is true.
    Bool,
    /// 1 byte unsigned.
    Byte,
    /// 2 bytes, little-endian unsigned.
    Word,
    /// 4 bytes, little-endian unsigned.
    Dword,
    /// 2 bytes, little-endian signed.
    Int,
    /// 4 bytes, little-endian signed.
    Dint,
    /// IEEE-754 binary32, little-endian.
    Real,
    /// IEEE-754 binary64, little-endian.
    Lreal,
    /// 81 bytes, null-terminated.
    String,
}

impl AdsType {
    /// Returns the wire size in bytes.
    pub fn size(&self) -> usize {
        match self {
            AdsType::Bool | AdsType::Byte => 1,
            AdsType::Word | AdsType::Int => 2,
            AdsType::Dword | AdsType::Dint | AdsType::Real => 4,
            AdsType::Lreal => 8,
            AdsType::String => 81,
        }
    }

    /// Parses a PLC type name (e.g. `BOOL`, `LREAL`) into the primitive
    /// set, returning `None` for struct and array types.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "BOOL" => Some(AdsType::Bool),
            "BYTE" | "USINT" | "SINT" => Some(AdsType::Byte),
            "WORD" | "UINT" => Some(AdsType::Word),
            "DWORD" | "UDINT" => Some(AdsType::Dword),
            "INT" => Some(AdsType::Int),
            "DINT" => Some(AdsType::Dint),
            "REAL" => Some(AdsType::Real),
            "LREAL" => Some(AdsType::Lreal),
            s if s.starts_with("STRING") => Some(AdsType::String),
            _ => None,
        }
    }

    /// Returns the lowercase name used in configuration payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdsType::Bool => "bool",
            AdsType::Byte => "byte",
            AdsType::Word => "word",
            AdsType::Dword => "dword",
            AdsType::Int => "int",
            AdsType::Dint => "dint",
            AdsType::Real => "real",
            AdsType::Lreal => "lreal",
            AdsType::String => "string",
        }
    }
}

impl fmt::Display for AdsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AdsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown ADS type: {}", s))
    }
}

/// One entry of a PLC symbol table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// Dotted symbol path, e.g. `MAIN.temperature`.
    pub path: String,
    /// ADS index group.
    pub index_group: u32,
    /// ADS index offset.
    pub index_offset: u32,
    /// Size in bytes.
    pub size: u32,
    /// Declared PLC type name.
    pub type_name: String,
    /// Symbol comment from the PLC program.
    pub comment: String,
    /// Raw symbol flags.
    pub flags: u32,
}

impl SymbolInfo {
    /// Returns `true` if the declared type is one of the decodable
    /// primitives.
    pub fn is_primitive(&self) -> bool {
        AdsType::parse(&self.type_name).is_some()
    }

    /// Returns `true` if `other` is a direct child of this symbol
    /// (`parent.field` with no further dots inside `field`).
    pub fn is_direct_child(&self, other: &str) -> bool {
        other
            .strip_prefix(&self.path)
            .and_then(|rest| rest.strip_prefix('.'))
            .map(|field| !field.is_empty() && !field.contains('.'))
            .unwrap_or(false)
    }
}

// =============================================================================
// Connection Configuration
// =============================================================================

/// A configured PLC endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Stable unique identifier.
    pub id: ConnectionId,
    /// Human-readable name.
    pub name: String,
    /// ADS router host.
    pub host: String,
    /// ADS router port.
    #[serde(default = "default_router_port")]
    pub port: u16,
    /// PLC routing address, e.g. `192.168.1.10.1.1`.
    pub target_address: String,
    /// PLC runtime port, conventionally 801 or 851.
    #[serde(default = "default_target_port")]
    pub target_port: u16,
    /// Local ADS source port.
    #[serde(default = "default_source_port")]
    pub source_port: u16,
    /// Whether a session should be kept alive for this connection.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Symbol discovery behaviour.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

fn default_router_port() -> u16 {
    48898
}

fn default_target_port() -> u16 {
    801
}

fn default_source_port() -> u16 {
    32750
}

fn default_true() -> bool {
    true
}

/// How symbol discovery behaves for one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Whether the discovery loop runs at all.
    #[serde(default)]
    pub auto_discover: bool,
    /// How often the OnlineChange counter is re-read.
    #[serde(default = "default_poll_period")]
    #[serde(with = "duration_millis")]
    pub poll_period: Duration,
    /// Whether discovered symbols become variables automatically.
    #[serde(default)]
    pub auto_register: bool,
    /// Sample period assigned to auto-registered variables.
    #[serde(default = "default_sample_period")]
    #[serde(with = "duration_millis")]
    pub default_sample_period: Duration,
    /// Substring filter applied to symbol paths; empty matches all.
    #[serde(default)]
    pub name_filter: String,
}

fn default_poll_period() -> Duration {
    Duration::from_secs(5)
}

fn default_sample_period() -> Duration {
    Duration::from_millis(1000)
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            auto_discover: false,
            poll_period: default_poll_period(),
            auto_register: false,
            default_sample_period: default_sample_period(),
            name_filter: String::new(),
        }
    }
}

impl DiscoveryConfig {
    /// Returns `true` if the filter matches the given symbol path.
    pub fn matches(&self, path: &str) -> bool {
        self.name_filter.is_empty() || path.contains(&self.name_filter)
    }
}

/// Serialization helper for Duration as milliseconds.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// =============================================================================
// Variable Configuration
// =============================================================================

/// A subscription to one PLC symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableConfig {
    /// Globally unique identifier.
    pub id: VariableId,
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Human-readable name.
    pub name: String,
    /// Dotted symbol path.
    pub path: String,
    /// Declared primitive type.
    #[serde(rename = "type")]
    pub ads_type: AdsType,
    /// Polling interval when notifications are not used.
    #[serde(default = "default_sample_period")]
    #[serde(with = "duration_millis")]
    pub sample_period: Duration,
    /// Acquire via device notification instead of polling.
    #[serde(default)]
    pub use_notification: bool,
    /// MQTT topic; defaults to `variables/<id>/value`.
    #[serde(default)]
    pub topic: String,
}

impl VariableConfig {
    /// Returns the effective MQTT topic for value publishes.
    pub fn value_topic(&self) -> String {
        if self.topic.is_empty() {
            format!("variables/{}/value", self.id)
        } else {
            self.topic.clone()
        }
    }

    /// Returns the MQTT topic for error publishes.
    pub fn error_topic(&self) -> String {
        format!("variables/{}/error", self.id)
    }
}

/// Observable last-known state of a variable.
///
/// Swapped wholesale behind an `Arc` so readers never see a torn update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableState {
    /// Most recent value.
    pub last_value: Option<Value>,
    /// Timestamp of the most recent sample (unix ms).
    pub last_timestamp_ms: Option<i64>,
    /// Duration of the most recent successful read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_duration_us: Option<u64>,
    /// Most recent per-variable error, cleared on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Cumulative error count.
    #[serde(default)]
    pub error_count: u64,
}

/// A variable together with its live state, as exposed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    /// Static configuration.
    #[serde(flatten)]
    pub config: VariableConfig,
    /// Last-known observable state.
    #[serde(flatten)]
    pub state: VariableState,
}

impl Variable {
    /// Wraps a configuration with empty state.
    pub fn new(config: VariableConfig) -> Self {
        Self {
            config,
            state: VariableState::default(),
        }
    }
}

// =============================================================================
// Audit Records
// =============================================================================

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    /// The action succeeded.
    Success,
    /// The action failed.
    Failed,
}

/// An audit trail entry.
///
/// `actor` is the opaque caller identifier echoed from the API surface;
/// the gateway attaches no further meaning to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record id.
    pub id: uuid::Uuid,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// Action name, e.g. `variable.write`.
    pub action: String,
    /// Affected variable, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_id: Option<VariableId>,
    /// Affected variable name, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<String>,
    /// Caller-supplied identity.
    pub actor: String,
    /// Caller network address, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_address: Option<String>,
    /// Value before the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Value after the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    /// Free-form details.
    #[serde(default)]
    pub details: String,
    /// Outcome.
    pub status: AuditStatus,
}

impl AuditRecord {
    /// Creates a successful audit record for the given action and actor.
    pub fn success(action: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            timestamp_ms: Utc::now().timestamp_millis(),
            action: action.into(),
            variable_id: None,
            variable_name: None,
            actor: actor.into(),
            actor_address: None,
            old_value: None,
            new_value: None,
            details: String::new(),
            status: AuditStatus::Success,
        }
    }

    /// Creates a failed audit record for the given action and actor.
    pub fn failed(action: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            status: AuditStatus::Failed,
            ..Self::success(action, actor)
        }
    }

    /// Attaches the variable this record concerns.
    pub fn with_variable(mut self, id: VariableId, name: impl Into<String>) -> Self {
        self.variable_id = Some(id);
        self.variable_name = Some(name.into());
        self
    }

    /// Attaches the old and new values of a write.
    pub fn with_values(mut self, old: Option<Value>, new: Option<Value>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    /// Attaches the caller network address.
    pub fn with_actor_address(mut self, address: impl Into<String>) -> Self {
        self.actor_address = Some(address.into());
        self
    }

    /// Attaches free-form details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

// =============================================================================
// Operation Metrics
// =============================================================================

/// A single timed operation, as carried on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetric {
    /// Operation name, e.g. `session.read`.
    pub operation: String,
    /// Duration in nanoseconds.
    pub duration_ns: u64,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// Optional structured metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl OperationMetric {
    /// Creates a metric stamped with the current wall clock.
    pub fn new(operation: impl Into<String>, duration_ns: u64) -> Self {
        Self {
            operation: operation.into(),
            duration_ns,
            timestamp_ms: Utc::now().timestamp_millis(),
            metadata: None,
        }
    }
}

/// System metric categories recorded by the persistence store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// CPU usage.
    Cpu,
    /// Memory usage.
    Memory,
    /// Connected MQTT clients.
    MqttClients,
    /// MQTT messages published.
    MqttMessages,
    /// ADS-level errors.
    AdsErrors,
    /// Admin API requests.
    ApiRequests,
}

impl MetricType {
    /// Returns the snake_case name used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Cpu => "cpu",
            MetricType::Memory => "memory",
            MetricType::MqttClients => "mqtt_clients",
            MetricType::MqttMessages => "mqtt_messages",
            MetricType::AdsErrors => "ads_errors",
            MetricType::ApiRequests => "api_requests",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
