// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Value encoding and decoding for the primitive PLC types.
//!
//! All multi-byte types are little-endian on the wire. Strings occupy a
//! fixed 81-byte slot and are null-terminated.

use adsgate_core::{AdsType, Value};

use crate::error::{AdsError, AdsResult};

// =============================================================================
// Decoding
// =============================================================================

/// Decodes raw bytes into a [`Value`] according to the declared type.
///
/// The buffer must be at least `ads_type.size()` bytes; trailing bytes are
/// ignored (devices may pad reads to the handle's declared size).
pub fn decode(bytes: &[u8], ads_type: AdsType) -> AdsResult<Value> {
    let need = ads_type.size();
    if bytes.len() < need {
        return Err(AdsError::frame(format!(
            "{} expects {} bytes, got {}",
            ads_type,
            need,
            bytes.len()
        )));
    }

    let value = match ads_type {
        AdsType::Bool => Value::Bool(bytes[0] != 0),
        AdsType::Byte => Value::Int(bytes[0] as i64),
        AdsType::Word => Value::Int(u16::from_le_bytes([bytes[0], bytes[1]]) as i64),
        AdsType::Dword => {
            Value::Int(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64)
        }
        AdsType::Int => Value::Int(i16::from_le_bytes([bytes[0], bytes[1]]) as i64),
        AdsType::Dint => {
            Value::Int(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64)
        }
        AdsType::Real => {
            Value::Float(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64)
        }
        AdsType::Lreal => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            Value::Float(f64::from_le_bytes(raw))
        }
        AdsType::String => {
            let slot = &bytes[..need];
            let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
            let text = std::str::from_utf8(&slot[..end])
                .map_err(|e| AdsError::frame(format!("string is not valid UTF-8: {}", e)))?;
            Value::Text(text.to_string())
        }
    };

    Ok(value)
}

// =============================================================================
// Encoding
// =============================================================================

/// Encodes a [`Value`] for the wire according to the declared type.
///
/// Numeric values are range-checked against the target width; strings are
/// padded into the fixed 81-byte slot.
pub fn encode(value: &Value, ads_type: AdsType) -> AdsResult<Vec<u8>> {
    let mismatch = || {
        AdsError::frame(format!(
            "cannot encode {} value as {}",
            value.type_name(),
            ads_type
        ))
    };

    let bytes = match ads_type {
        AdsType::Bool => {
            let v = value.as_bool().ok_or_else(mismatch)?;
            vec![v as u8]
        }
        AdsType::Byte => {
            let v = int_in_range(value, 0, u8::MAX as i64)?;
            vec![v as u8]
        }
        AdsType::Word => {
            let v = int_in_range(value, 0, u16::MAX as i64)?;
            (v as u16).to_le_bytes().to_vec()
        }
        AdsType::Dword => {
            let v = int_in_range(value, 0, u32::MAX as i64)?;
            (v as u32).to_le_bytes().to_vec()
        }
        AdsType::Int => {
            let v = int_in_range(value, i16::MIN as i64, i16::MAX as i64)?;
            (v as i16).to_le_bytes().to_vec()
        }
        AdsType::Dint => {
            let v = int_in_range(value, i32::MIN as i64, i32::MAX as i64)?;
            (v as i32).to_le_bytes().to_vec()
        }
        AdsType::Real => {
            let v = value.as_f64().ok_or_else(mismatch)?;
            (v as f32).to_le_bytes().to_vec()
        }
        AdsType::Lreal => {
            let v = value.as_f64().ok_or_else(mismatch)?;
            v.to_le_bytes().to_vec()
        }
        AdsType::String => {
            let text = value.as_str().ok_or_else(mismatch)?;
            let raw = text.as_bytes();
            if raw.len() >= AdsType::String.size() {
                return Err(AdsError::frame(format!(
                    "string of {} bytes exceeds the 80-byte slot",
                    raw.len()
                )));
            }
            let mut slot = vec![0u8; AdsType::String.size()];
            slot[..raw.len()].copy_from_slice(raw);
            slot
        }
    };

    Ok(bytes)
}

fn int_in_range(value: &Value, min: i64, max: i64) -> AdsResult<i64> {
    let v = match value {
        Value::Int(v) => *v,
        Value::Bool(b) => *b as i64,
        Value::Float(f) if f.fract() == 0.0 => *f as i64,
        other => {
            return Err(AdsError::frame(format!(
                "cannot encode {} value as integer",
                other.type_name()
            )))
        }
    };

    if v < min || v > max {
        return Err(AdsError::frame(format!(
            "value {} out of range [{}, {}]",
            v, min, max
        )));
    }
    Ok(v)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_roundtrip() {
        for v in [true, false] {
            let bytes = encode(&Value::Bool(v), AdsType::Bool).unwrap();
            assert_eq!(bytes.len(), 1);
            assert_eq!(decode(&bytes, AdsType::Bool).unwrap(), Value::Bool(v));
        }
        // nonzero is true
        assert_eq!(decode(&[7], AdsType::Bool).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_integer_roundtrips() {
        let cases: Vec<(AdsType, i64)> = vec![
            (AdsType::Byte, 0),
            (AdsType::Byte, 255),
            (AdsType::Word, 65_535),
            (AdsType::Dword, 4_294_967_295),
            (AdsType::Int, -32_768),
            (AdsType::Int, 32_767),
            (AdsType::Dint, -2_147_483_648),
            (AdsType::Dint, 2_147_483_647),
        ];

        for (ads_type, v) in cases {
            let bytes = encode(&Value::Int(v), ads_type).unwrap();
            assert_eq!(bytes.len(), ads_type.size());
            assert_eq!(decode(&bytes, ads_type).unwrap(), Value::Int(v), "{}", ads_type);
        }
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = encode(&Value::Int(0x1234), AdsType::Word).unwrap();
        assert_eq!(bytes, vec![0x34, 0x12]);

        let bytes = encode(&Value::Int(-2), AdsType::Int).unwrap();
        assert_eq!(bytes, vec![0xFE, 0xFF]);
    }

    #[test]
    fn test_real_roundtrip() {
        let bytes = encode(&Value::Float(23.5), AdsType::Real).unwrap();
        let decoded = decode(&bytes, AdsType::Real).unwrap();
        let v = decoded.as_f64().unwrap();
        assert!((v - 23.5).abs() < 1e-6);
    }

    #[test]
    fn test_lreal_roundtrip_exact() {
        let bytes = encode(&Value::Float(core::f64::consts::PI), AdsType::Lreal).unwrap();
        assert_eq!(
            decode(&bytes, AdsType::Lreal).unwrap(),
            Value::Float(core::f64::consts::PI)
        );
    }

    #[test]
    fn test_string_roundtrip() {
        let bytes = encode(&Value::Text("hello plc".into()), AdsType::String).unwrap();
        assert_eq!(bytes.len(), 81);
        assert_eq!(bytes[9], 0);
        assert_eq!(
            decode(&bytes, AdsType::String).unwrap(),
            Value::Text("hello plc".into())
        );
    }

    #[test]
    fn test_string_too_long() {
        let long = "x".repeat(81);
        assert!(encode(&Value::Text(long), AdsType::String).is_err());
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(encode(&Value::Int(256), AdsType::Byte).is_err());
        assert!(encode(&Value::Int(-1), AdsType::Word).is_err());
        assert!(encode(&Value::Int(70_000), AdsType::Int).is_err());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        assert!(encode(&Value::Text("x".into()), AdsType::Real).is_err());
        assert!(encode(&Value::Bool(true), AdsType::String).is_err());
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(decode(&[1, 2], AdsType::Dword).is_err());
        assert!(decode(&[], AdsType::Bool).is_err());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let decoded = decode(&[0x2A, 0x00, 0xFF, 0xFF], AdsType::Word).unwrap();
        assert_eq!(decoded, Value::Int(0x2A));
    }

    #[test]
    fn test_whole_float_encodes_as_integer() {
        let bytes = encode(&Value::Float(42.0), AdsType::Dint).unwrap();
        assert_eq!(decode(&bytes, AdsType::Dint).unwrap(), Value::Int(42));
        assert!(encode(&Value::Float(1.5), AdsType::Dint).is_err());
    }

    #[test]
    fn test_encode_decode_encode_is_stable() {
        // encode(decode(b)) == b for each primitive width
        let fixtures: Vec<(AdsType, Vec<u8>)> = vec![
            (AdsType::Bool, vec![1]),
            (AdsType::Byte, vec![0x80]),
            (AdsType::Word, vec![0x34, 0x12]),
            (AdsType::Dword, vec![1, 2, 3, 4]),
            (AdsType::Int, vec![0xFE, 0xFF]),
            (AdsType::Dint, vec![0xFE, 0xFF, 0xFF, 0xFF]),
            (AdsType::Real, 1.5f32.to_le_bytes().to_vec()),
            (AdsType::Lreal, 2.25f64.to_le_bytes().to_vec()),
        ];

        for (ads_type, bytes) in fixtures {
            let value = decode(&bytes, ads_type).unwrap();
            let encoded = encode(&value, ads_type).unwrap();
            assert_eq!(encoded, bytes, "{}", ads_type);
        }
    }
}
