// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bincode-compatible mirrors of the dynamic value types.
//!
//! [`Value`](crate::types::Value) is `#[serde(untagged)]` for natural
//! JSON at the API boundary, which bincode cannot deserialize. Binary
//! boundaries (cache values, store rows) convert through these flat
//! mirrors instead.

use serde::{Deserialize, Serialize};

use crate::types::{Quality, Sample, Value};

// =============================================================================
// StorableValue
// =============================================================================

/// Flat, externally tagged mirror of [`Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StorableValue {
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Key-value structure.
    Struct(Vec<(String, StorableValue)>),
    /// Null value.
    Null,
}

impl From<&Value> for StorableValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Bool(v) => StorableValue::Bool(*v),
            Value::Int(v) => StorableValue::Int(*v),
            Value::Float(v) => StorableValue::Float(*v),
            Value::Text(v) => StorableValue::Text(v.clone()),
            Value::Bytes(v) => StorableValue::Bytes(v.clone()),
            Value::Struct(fields) => StorableValue::Struct(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), StorableValue::from(v)))
                    .collect(),
            ),
            Value::Null => StorableValue::Null,
        }
    }
}

impl From<StorableValue> for Value {
    fn from(value: StorableValue) -> Self {
        match value {
            StorableValue::Bool(v) => Value::Bool(v),
            StorableValue::Int(v) => Value::Int(v),
            StorableValue::Float(v) => Value::Float(v),
            StorableValue::Text(v) => Value::Text(v),
            StorableValue::Bytes(v) => Value::Bytes(v),
            StorableValue::Struct(fields) => Value::Struct(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
            StorableValue::Null => Value::Null,
        }
    }
}

// =============================================================================
// StorableSample
// =============================================================================

/// Flat mirror of [`Sample`] for binary storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorableSample {
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// The sampled value.
    pub value: StorableValue,
    /// Sample quality.
    pub quality: Quality,
}

impl From<&Sample> for StorableSample {
    fn from(sample: &Sample) -> Self {
        Self {
            timestamp_ms: sample.timestamp_ms,
            value: StorableValue::from(&sample.value),
            quality: sample.quality,
        }
    }
}

impl From<StorableSample> for Sample {
    fn from(sample: StorableSample) -> Self {
        Self {
            timestamp_ms: sample.timestamp_ms,
            value: Value::from(sample.value),
            quality: sample.quality,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_mirror_roundtrip() {
        let values = vec![
            Value::Bool(true),
            Value::Int(-5),
            Value::Float(2.5),
            Value::Text("abc".into()),
            Value::Bytes(vec![1, 2, 3]),
            Value::Struct(vec![("a".into(), Value::Int(1))]),
            Value::Null,
        ];

        for value in values {
            let storable = StorableValue::from(&value);
            assert_eq!(Value::from(storable), value);
        }
    }

    #[test]
    fn test_sample_survives_bincode() {
        let sample = Sample::at(1_700_000_000_000, Value::Float(23.5), Quality::Good);
        let storable = StorableSample::from(&sample);

        let bytes = bincode::serialize(&storable).unwrap();
        let decoded: StorableSample = bincode::deserialize(&bytes).unwrap();

        assert_eq!(Sample::from(decoded), sample);
    }

    #[test]
    fn test_struct_survives_bincode() {
        let value = Value::Struct(vec![
            ("speed".into(), Value::Float(1.5)),
            ("running".into(), Value::Bool(true)),
        ]);
        let storable = StorableValue::from(&value);

        let bytes = bincode::serialize(&storable).unwrap();
        let decoded: StorableValue = bincode::deserialize(&bytes).unwrap();

        assert_eq!(Value::from(decoded), value);
    }
}
