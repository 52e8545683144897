// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Row encodings and key layouts.
//!
//! Rows are bincode; dynamic values go through the flat storable mirrors
//! (bincode rejects the untagged serde representation used at the API
//! boundary).
//!
//! # Key layouts
//!
//! Timestamps are big-endian so lexicographic key order is time order; a
//! sequence suffix disambiguates same-millisecond rows.
//!
//! ```text
//! history:            {variable_id} 0x00 {ts_ms:be8} {seq:be4}
//! history_by_time:    {ts_ms:be8} {seq:be4}
//! metrics:            {ts_ms:be8} {seq:be4}
//! audit:              {ts_ms:be8} {seq:be4}
//! audit_by_variable:  {variable_id} 0x00 {ts_ms:be8} {seq:be4}
//! audit_by_actor:     {actor} 0x00 {ts_ms:be8} {seq:be4}
//! connections:        {connection_id}
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use adsgate_core::{
    AuditRecord, AuditStatus, Quality, Sample, StorableValue, Value, VariableId,
};

// =============================================================================
// Rows
// =============================================================================

/// One stored history sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRow {
    /// The variable.
    pub variable_id: String,
    /// The variable's name at append time.
    pub variable_name: String,
    /// The sampled value.
    pub value: StorableValue,
    /// Sample quality.
    pub quality: Quality,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
}

impl HistoryRow {
    /// Builds a row from a sample.
    pub fn new(variable_id: &VariableId, variable_name: &str, sample: &Sample) -> Self {
        Self {
            variable_id: variable_id.as_str().to_string(),
            variable_name: variable_name.to_string(),
            value: StorableValue::from(&sample.value),
            quality: sample.quality,
            timestamp_ms: sample.timestamp_ms,
        }
    }

    /// Converts the row back to a sample.
    pub fn sample(&self) -> Sample {
        Sample {
            timestamp_ms: self.timestamp_ms,
            value: Value::from(self.value.clone()),
            quality: self.quality,
        }
    }
}

/// One stored system metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRow {
    /// Metric category name (snake_case).
    pub metric_type: String,
    /// Metric value.
    pub value: f64,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// Optional pre-rendered JSON metadata.
    pub metadata: Option<String>,
}

/// One stored audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    /// Record id.
    pub id: Uuid,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// Action name.
    pub action: String,
    /// Affected variable.
    pub variable_id: Option<String>,
    /// Affected variable name.
    pub variable_name: Option<String>,
    /// Caller identity.
    pub actor: String,
    /// Caller network address.
    pub actor_address: Option<String>,
    /// Value before the action.
    pub old_value: Option<StorableValue>,
    /// Value after the action.
    pub new_value: Option<StorableValue>,
    /// Free-form details.
    pub details: String,
    /// Whether the action succeeded.
    pub success: bool,
}

impl From<&AuditRecord> for AuditRow {
    fn from(record: &AuditRecord) -> Self {
        Self {
            id: record.id,
            timestamp_ms: record.timestamp_ms,
            action: record.action.clone(),
            variable_id: record.variable_id.as_ref().map(|v| v.as_str().to_string()),
            variable_name: record.variable_name.clone(),
            actor: record.actor.clone(),
            actor_address: record.actor_address.clone(),
            old_value: record.old_value.as_ref().map(StorableValue::from),
            new_value: record.new_value.as_ref().map(StorableValue::from),
            details: record.details.clone(),
            success: record.status == AuditStatus::Success,
        }
    }
}

impl AuditRow {
    /// Converts the row back to an audit record.
    pub fn into_record(self) -> AuditRecord {
        AuditRecord {
            id: self.id,
            timestamp_ms: self.timestamp_ms,
            action: self.action,
            variable_id: self.variable_id.map(VariableId::new),
            variable_name: self.variable_name,
            actor: self.actor,
            actor_address: self.actor_address,
            old_value: self.old_value.map(Value::from),
            new_value: self.new_value.map(Value::from),
            details: self.details,
            status: if self.success {
                AuditStatus::Success
            } else {
                AuditStatus::Failed
            },
        }
    }
}

// =============================================================================
// Key Encoding
// =============================================================================

/// Builds a time-ordered key: `{ts:be8}{seq:be4}`.
pub fn time_key(timestamp_ms: i64, seq: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&timestamp_ms.to_be_bytes());
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

/// Builds a prefixed time-ordered key: `{prefix}0x00{ts:be8}{seq:be4}`.
pub fn prefixed_key(prefix: &str, timestamp_ms: i64, seq: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 13);
    key.extend_from_slice(prefix.as_bytes());
    key.push(0);
    key.extend_from_slice(&timestamp_ms.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// The `{prefix}0x00` byte string every key of one prefix starts with.
pub fn key_prefix(prefix: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 1);
    key.extend_from_slice(prefix.as_bytes());
    key.push(0);
    key
}

/// Extracts the timestamp from a prefixed key, if well-formed.
pub fn timestamp_of_prefixed(key: &[u8], prefix_len: usize) -> Option<i64> {
    let ts_bytes = key.get(prefix_len + 1..prefix_len + 9)?;
    Some(i64::from_be_bytes(ts_bytes.try_into().ok()?))
}

/// Extracts the timestamp from a plain time key.
pub fn timestamp_of_time_key(key: &[u8]) -> Option<i64> {
    let ts_bytes = key.get(..8)?;
    Some(i64::from_be_bytes(ts_bytes.try_into().ok()?))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_key_ordering() {
        let a = time_key(1_000, 0);
        let b = time_key(1_000, 1);
        let c = time_key(2_000, 0);

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_prefixed_key_layout() {
        let key = prefixed_key("v1", 1_000, 7);
        assert!(key.starts_with(&key_prefix("v1")));
        assert_eq!(timestamp_of_prefixed(&key, 2), Some(1_000));
    }

    #[test]
    fn test_prefixed_keys_group_by_prefix() {
        // a shorter id must never be a prefix of a longer id's keys
        let a = prefixed_key("v1", i64::MAX, u32::MAX);
        let b = prefixed_key("v10", 0, 0);
        assert!(!b.starts_with(&key_prefix("v1")));
        assert!(a.starts_with(&key_prefix("v1")));
    }

    #[test]
    fn test_history_row_roundtrip() {
        let sample = Sample::at(42, Value::Float(1.5), Quality::Good);
        let row = HistoryRow::new(&VariableId::new("v1"), "temp", &sample);

        let bytes = bincode::serialize(&row).unwrap();
        let decoded: HistoryRow = bincode::deserialize(&bytes).unwrap();

        assert_eq!(decoded.variable_id, "v1");
        assert_eq!(decoded.sample(), sample);
    }

    #[test]
    fn test_audit_row_roundtrip() {
        let record = AuditRecord::failed("variable.write", "op-1")
            .with_variable(VariableId::new("v1"), "temp")
            .with_values(Some(Value::Int(1)), Some(Value::Int(2)))
            .with_details("rejected by device");

        let row = AuditRow::from(&record);
        let bytes = bincode::serialize(&row).unwrap();
        let decoded: AuditRow = bincode::deserialize(&bytes).unwrap();
        let restored = decoded.into_record();

        assert_eq!(restored.id, record.id);
        assert_eq!(restored.action, "variable.write");
        assert_eq!(restored.status, AuditStatus::Failed);
        assert_eq!(restored.old_value, Some(Value::Int(1)));
        assert_eq!(restored.new_value, Some(Value::Int(2)));
    }
}
