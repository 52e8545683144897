// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Symbol table upload parsing and struct expansion.
//!
//! The symbol table is uploaded in one bulk read: the PLC info block
//! (index group `0xF00F`) carries the OnlineChange counter, the symbol
//! count and the upload size; the entry data (index group `0xF009`) is a
//! concatenation of variable-length entries.
//!
//! Entry layout (all little-endian):
//!
//! ```text
//! u32 entry_length    total bytes of this entry including the header
//! u32 index_group
//! u32 index_offset
//! u32 size
//! u32 data_type
//! u32 flags
//! u16 name_length     string lengths exclude their null terminator
//! u16 type_length
//! u16 comment_length
//! name\0 type\0 comment\0 (padding up to entry_length)
//! ```

use std::collections::HashSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use adsgate_core::SymbolInfo;

use crate::error::{AdsError, AdsResult};

/// Fixed header bytes preceding the three strings of an entry.
const ENTRY_HEADER_LEN: usize = 30;

// =============================================================================
// Info Block
// =============================================================================

/// The parsed PLC info block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoBlock {
    /// Monotonically increasing OnlineChange counter.
    pub online_change_counter: u32,
    /// Number of symbols in the table.
    pub symbol_count: u32,
    /// Size in bytes of the symbol upload data.
    pub upload_size: u32,
}

/// Parses the 48-byte info block.
pub fn parse_info_block(bytes: &[u8]) -> AdsResult<InfoBlock> {
    if bytes.len() < 12 {
        return Err(AdsError::frame(format!(
            "info block of {} bytes is too short",
            bytes.len()
        )));
    }
    Ok(InfoBlock {
        online_change_counter: u32::from_le_bytes(bytes[0..4].try_into().unwrap_or_default()),
        symbol_count: u32::from_le_bytes(bytes[4..8].try_into().unwrap_or_default()),
        upload_size: u32::from_le_bytes(bytes[8..12].try_into().unwrap_or_default()),
    })
}

/// Serializes a 48-byte info block (used by the mock PLC).
pub fn build_info_block(info: &InfoBlock) -> Bytes {
    let mut buf = BytesMut::with_capacity(48);
    buf.put_u32_le(info.online_change_counter);
    buf.put_u32_le(info.symbol_count);
    buf.put_u32_le(info.upload_size);
    buf.put_slice(&[0u8; 36]);
    buf.freeze()
}

// =============================================================================
// Entry Parsing
// =============================================================================

/// Parses the concatenated symbol entries of a bulk upload.
pub fn parse_symbol_upload(mut data: Bytes) -> AdsResult<Vec<SymbolInfo>> {
    let mut symbols = Vec::new();

    while data.has_remaining() {
        if data.len() < ENTRY_HEADER_LEN {
            return Err(AdsError::frame("symbol entry header truncated"));
        }

        let entry_length = u32::from_le_bytes(data[0..4].try_into().unwrap_or_default()) as usize;
        if entry_length < ENTRY_HEADER_LEN || entry_length > data.len() {
            return Err(AdsError::frame(format!(
                "symbol entry length {} out of bounds ({} remain)",
                entry_length,
                data.len()
            )));
        }

        let mut entry = data.split_to(entry_length);
        entry.advance(4); // entry_length
        let index_group = entry.get_u32_le();
        let index_offset = entry.get_u32_le();
        let size = entry.get_u32_le();
        let _data_type = entry.get_u32_le();
        let flags = entry.get_u32_le();
        let name_length = entry.get_u16_le() as usize;
        let type_length = entry.get_u16_le() as usize;
        let comment_length = entry.get_u16_le() as usize;

        // Each string is followed by a null terminator.
        let needed = name_length + 1 + type_length + 1 + comment_length + 1;
        if entry.len() < needed {
            return Err(AdsError::frame("symbol entry strings truncated"));
        }

        let path = read_string(&mut entry, name_length)?;
        let type_name = read_string(&mut entry, type_length)?;
        let comment = read_string(&mut entry, comment_length)?;

        symbols.push(SymbolInfo {
            path,
            index_group,
            index_offset,
            size,
            type_name,
            comment,
            flags,
        });
    }

    Ok(symbols)
}

fn read_string(entry: &mut Bytes, length: usize) -> AdsResult<String> {
    let raw = entry.split_to(length);
    entry.advance(1); // null terminator
    String::from_utf8(raw.to_vec())
        .map_err(|e| AdsError::frame(format!("symbol string is not valid UTF-8: {}", e)))
}

/// Serializes one symbol entry (used by the mock PLC).
pub fn build_symbol_entry(symbol: &SymbolInfo) -> Bytes {
    let name = symbol.path.as_bytes();
    let type_name = symbol.type_name.as_bytes();
    let comment = symbol.comment.as_bytes();

    let entry_length = ENTRY_HEADER_LEN + name.len() + 1 + type_name.len() + 1 + comment.len() + 1;

    let mut buf = BytesMut::with_capacity(entry_length);
    buf.put_u32_le(entry_length as u32);
    buf.put_u32_le(symbol.index_group);
    buf.put_u32_le(symbol.index_offset);
    buf.put_u32_le(symbol.size);
    buf.put_u32_le(0); // data type id, unused by the gateway
    buf.put_u32_le(symbol.flags);
    buf.put_u16_le(name.len() as u16);
    buf.put_u16_le(type_name.len() as u16);
    buf.put_u16_le(comment.len() as u16);
    buf.put_slice(name);
    buf.put_u8(0);
    buf.put_slice(type_name);
    buf.put_u8(0);
    buf.put_slice(comment);
    buf.put_u8(0);
    buf.freeze()
}

/// Serializes a whole symbol table (used by the mock PLC).
pub fn build_symbol_upload(symbols: &[SymbolInfo]) -> Bytes {
    let mut buf = BytesMut::new();
    for symbol in symbols {
        buf.put_slice(&build_symbol_entry(symbol));
    }
    buf.freeze()
}

// =============================================================================
// Struct Expansion
// =============================================================================

/// Expands non-primitive symbols to their direct children, recursing one
/// extra level for structs-of-structs reached through those children.
///
/// `selected` is the filtered set; `table` is the full symbol table the
/// children are looked up in. The result keeps the selected symbols and
/// appends children, deduplicated by path.
pub fn expand_structs(table: &[SymbolInfo], selected: &[SymbolInfo]) -> Vec<SymbolInfo> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut result: Vec<SymbolInfo> = Vec::new();

    fn push(symbol: &SymbolInfo, seen: &mut HashSet<String>, result: &mut Vec<SymbolInfo>) {
        if seen.insert(symbol.path.clone()) {
            result.push(symbol.clone());
        }
    }

    for symbol in selected {
        push(symbol, &mut seen, &mut result);

        if symbol.is_primitive() {
            continue;
        }

        for child in table.iter().filter(|c| symbol.is_direct_child(&c.path)) {
            push(child, &mut seen, &mut result);

            if child.is_primitive() {
                continue;
            }

            // One extra level only.
            for grandchild in table.iter().filter(|g| child.is_direct_child(&g.path)) {
                push(grandchild, &mut seen, &mut result);
            }
        }
    }

    result
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(path: &str, type_name: &str) -> SymbolInfo {
        SymbolInfo {
            path: path.to_string(),
            index_group: 0x4020,
            index_offset: 0,
            size: 4,
            type_name: type_name.to_string(),
            comment: String::new(),
            flags: 0,
        }
    }

    #[test]
    fn test_info_block_roundtrip() {
        let info = InfoBlock {
            online_change_counter: 3,
            symbol_count: 12,
            upload_size: 4096,
        };
        let bytes = build_info_block(&info);
        assert_eq!(bytes.len(), 48);
        assert_eq!(parse_info_block(&bytes).unwrap(), info);
    }

    #[test]
    fn test_symbol_entry_roundtrip() {
        let original = SymbolInfo {
            path: "MAIN.temperature".to_string(),
            index_group: 0x4020,
            index_offset: 16,
            size: 4,
            type_name: "REAL".to_string(),
            comment: "boiler outlet".to_string(),
            flags: 0x1,
        };

        let upload = build_symbol_upload(&[original.clone(), symbol("GVL.counter", "DINT")]);
        let parsed = parse_symbol_upload(upload).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], original);
        assert_eq!(parsed[1].path, "GVL.counter");
    }

    #[test]
    fn test_truncated_upload_rejected() {
        let upload = build_symbol_upload(&[symbol("MAIN.x", "REAL")]);
        let cut = upload.slice(..upload.len() - 3);
        assert!(parse_symbol_upload(cut).is_err());
    }

    #[test]
    fn test_expand_primitives_untouched() {
        let table = vec![symbol("MAIN.a", "REAL"), symbol("MAIN.b", "BOOL")];
        let expanded = expand_structs(&table, &table);
        assert_eq!(expanded.len(), 2);
    }

    #[test]
    fn test_expand_struct_children() {
        let table = vec![
            symbol("MAIN.machine", "ST_Machine"),
            symbol("MAIN.machine.speed", "REAL"),
            symbol("MAIN.machine.running", "BOOL"),
            symbol("MAIN.other", "REAL"),
        ];

        let selected = vec![table[0].clone()];
        let expanded = expand_structs(&table, &selected);

        let paths: Vec<&str> = expanded.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["MAIN.machine", "MAIN.machine.speed", "MAIN.machine.running"]
        );
    }

    #[test]
    fn test_expand_one_extra_level_only() {
        let table = vec![
            symbol("MAIN.m", "ST_M"),
            symbol("MAIN.m.axis", "ST_Axis"),
            symbol("MAIN.m.axis.pos", "LREAL"),
            symbol("MAIN.m.axis.drive", "ST_Drive"),
            symbol("MAIN.m.axis.drive.current", "REAL"),
        ];

        let expanded = expand_structs(&table, &table[..1]);
        let paths: Vec<&str> = expanded.iter().map(|s| s.path.as_str()).collect();

        assert!(paths.contains(&"MAIN.m.axis"));
        assert!(paths.contains(&"MAIN.m.axis.pos"));
        assert!(paths.contains(&"MAIN.m.axis.drive"));
        // depth cut: grandchild-of-child is not pulled in
        assert!(!paths.contains(&"MAIN.m.axis.drive.current"));
    }

    #[test]
    fn test_expand_deduplicates() {
        let table = vec![
            symbol("MAIN.m", "ST_M"),
            symbol("MAIN.m.speed", "REAL"),
        ];
        // selecting both parent and child must not duplicate the child
        let expanded = expand_structs(&table, &table);
        assert_eq!(expanded.len(), 2);
    }
}
