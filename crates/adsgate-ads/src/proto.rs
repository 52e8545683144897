// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! AMS/TCP framing.
//!
//! Every packet is a 6-byte AMS/TCP header (2 reserved bytes + 4-byte
//! little-endian length) followed by a 32-byte AMS header and the command
//! payload. This module builds request payloads, parses responses, and
//! decodes the server-pushed notification stream. Both the client and the
//! in-process mock PLC used by the tests are built on these functions.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{AdsError, AdsResult};
use crate::types::{AdsCommand, AmsAddr, AmsNetId};

/// Size of the AMS header that follows the TCP header.
pub const AMS_HEADER_LEN: usize = 32;

/// Size of the AMS/TCP length prefix.
pub const TCP_HEADER_LEN: usize = 6;

/// Offset between the Windows FILETIME epoch (1601) and unix epoch, in ms.
const FILETIME_EPOCH_OFFSET_MS: i64 = 11_644_473_600_000;

// =============================================================================
// AMS Header
// =============================================================================

/// The 32-byte AMS header carried by every packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmsHeader {
    /// Destination endpoint.
    pub target: AmsAddr,
    /// Source endpoint.
    pub source: AmsAddr,
    /// Command id.
    pub command: u16,
    /// State flags (request/response).
    pub state_flags: u16,
    /// Payload length in bytes.
    pub length: u32,
    /// AMS-level error code.
    pub error_code: u32,
    /// Correlation id chosen by the requester.
    pub invoke_id: u32,
}

impl AmsHeader {
    /// Returns `true` if the response bit is set.
    pub fn is_response(&self) -> bool {
        self.state_flags & 0x0001 != 0
    }

    /// Returns the parsed command, if known.
    pub fn command(&self) -> Option<AdsCommand> {
        AdsCommand::from_u16(self.command)
    }
}

/// Serializes a complete frame (TCP header + AMS header + payload).
pub fn write_frame(header: &AmsHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(TCP_HEADER_LEN + AMS_HEADER_LEN + payload.len());

    // AMS/TCP header: reserved + length of everything that follows
    buf.put_u16_le(0);
    buf.put_u32_le((AMS_HEADER_LEN + payload.len()) as u32);

    buf.put_slice(&header.target.net_id.octets());
    buf.put_u16_le(header.target.port);
    buf.put_slice(&header.source.net_id.octets());
    buf.put_u16_le(header.source.port);
    buf.put_u16_le(header.command);
    buf.put_u16_le(header.state_flags);
    buf.put_u32_le(payload.len() as u32);
    buf.put_u32_le(header.error_code);
    buf.put_u32_le(header.invoke_id);

    buf.put_slice(payload);
    buf.freeze()
}

/// Parses the AMS header and payload out of a frame body (the bytes after
/// the 6-byte TCP header).
pub fn parse_frame(mut body: Bytes) -> AdsResult<(AmsHeader, Bytes)> {
    if body.len() < AMS_HEADER_LEN {
        return Err(AdsError::frame(format!(
            "frame body of {} bytes is shorter than the AMS header",
            body.len()
        )));
    }

    let mut target_id = [0u8; 6];
    body.copy_to_slice(&mut target_id);
    let target_port = body.get_u16_le();
    let mut source_id = [0u8; 6];
    body.copy_to_slice(&mut source_id);
    let source_port = body.get_u16_le();

    let command = body.get_u16_le();
    let state_flags = body.get_u16_le();
    let length = body.get_u32_le();
    let error_code = body.get_u32_le();
    let invoke_id = body.get_u32_le();

    if body.len() < length as usize {
        return Err(AdsError::frame(format!(
            "payload truncated: header says {} bytes, {} remain",
            length,
            body.len()
        )));
    }
    let payload = body.split_to(length as usize);

    Ok((
        AmsHeader {
            target: AmsAddr::new(AmsNetId::new(target_id), target_port),
            source: AmsAddr::new(AmsNetId::new(source_id), source_port),
            command,
            state_flags,
            length,
            error_code,
            invoke_id,
        },
        payload,
    ))
}

// =============================================================================
// Request Payloads
// =============================================================================

/// Builds a Read request payload.
pub fn read_request(index_group: u32, index_offset: u32, length: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(12);
    buf.put_u32_le(index_group);
    buf.put_u32_le(index_offset);
    buf.put_u32_le(length);
    buf.freeze()
}

/// Builds a Write request payload.
pub fn write_request(index_group: u32, index_offset: u32, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(12 + data.len());
    buf.put_u32_le(index_group);
    buf.put_u32_le(index_offset);
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
    buf.freeze()
}

/// Builds a ReadWrite request payload.
pub fn read_write_request(
    index_group: u32,
    index_offset: u32,
    read_length: u32,
    write_data: &[u8],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 + write_data.len());
    buf.put_u32_le(index_group);
    buf.put_u32_le(index_offset);
    buf.put_u32_le(read_length);
    buf.put_u32_le(write_data.len() as u32);
    buf.put_slice(write_data);
    buf.freeze()
}

/// Builds an AddDeviceNotification request payload.
///
/// `max_delay` and `cycle_time` are in 100 ns units per the wire format.
pub fn add_notification_request(
    index_group: u32,
    index_offset: u32,
    length: u32,
    transmission_mode: u32,
    max_delay_100ns: u32,
    cycle_time_100ns: u32,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(40);
    buf.put_u32_le(index_group);
    buf.put_u32_le(index_offset);
    buf.put_u32_le(length);
    buf.put_u32_le(transmission_mode);
    buf.put_u32_le(max_delay_100ns);
    buf.put_u32_le(cycle_time_100ns);
    buf.put_slice(&[0u8; 16]); // reserved
    buf.freeze()
}

/// Builds a DeleteDeviceNotification request payload.
pub fn delete_notification_request(handle: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32_le(handle);
    buf.freeze()
}

// =============================================================================
// Response Payloads
// =============================================================================

/// Builds a Read/ReadWrite response payload (used by the mock PLC).
pub fn read_response(result: u32, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + data.len());
    buf.put_u32_le(result);
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
    buf.freeze()
}

/// Builds a Write response payload (used by the mock PLC).
pub fn write_response(result: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32_le(result);
    buf.freeze()
}

/// Builds a ReadState response payload (used by the mock PLC).
pub fn read_state_response(result: u32, ads_state: u16, device_state: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32_le(result);
    buf.put_u16_le(ads_state);
    buf.put_u16_le(device_state);
    buf.freeze()
}

/// Builds an AddDeviceNotification response payload (used by the mock PLC).
pub fn add_notification_response(result: u32, handle: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32_le(result);
    buf.put_u32_le(handle);
    buf.freeze()
}

/// Parses a response payload that starts with a result code followed by a
/// length-prefixed data block (Read and ReadWrite).
pub fn parse_read_response(mut payload: Bytes, operation: &str) -> AdsResult<Bytes> {
    if payload.len() < 8 {
        return Err(AdsError::frame("read response shorter than 8 bytes"));
    }
    let result = payload.get_u32_le();
    if result != 0 {
        return Err(AdsError::device(result, operation));
    }
    let length = payload.get_u32_le() as usize;
    if payload.len() < length {
        return Err(AdsError::frame("read response data truncated"));
    }
    Ok(payload.split_to(length))
}

/// Parses a Write response payload.
pub fn parse_write_response(mut payload: Bytes, operation: &str) -> AdsResult<()> {
    if payload.len() < 4 {
        return Err(AdsError::frame("write response shorter than 4 bytes"));
    }
    let result = payload.get_u32_le();
    if result != 0 {
        return Err(AdsError::device(result, operation));
    }
    Ok(())
}

/// Parses a ReadState response payload into (ads_state, device_state).
pub fn parse_read_state_response(mut payload: Bytes, operation: &str) -> AdsResult<(u16, u16)> {
    if payload.len() < 8 {
        return Err(AdsError::frame("read state response shorter than 8 bytes"));
    }
    let result = payload.get_u32_le();
    if result != 0 {
        return Err(AdsError::device(result, operation));
    }
    Ok((payload.get_u16_le(), payload.get_u16_le()))
}

/// Parses an AddDeviceNotification response into the handle.
pub fn parse_add_notification_response(mut payload: Bytes, operation: &str) -> AdsResult<u32> {
    if payload.len() < 8 {
        return Err(AdsError::frame("notification response shorter than 8 bytes"));
    }
    let result = payload.get_u32_le();
    if result != 0 {
        return Err(AdsError::device(result, operation));
    }
    Ok(payload.get_u32_le())
}

// =============================================================================
// Notification Stream
// =============================================================================

/// One sample from a device notification stream.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationSample {
    /// The notification handle the sample belongs to.
    pub handle: u32,
    /// Device-supplied timestamp, unix milliseconds.
    pub timestamp_ms: i64,
    /// Raw value bytes.
    pub data: Bytes,
}

/// Parses a DeviceNotification payload into its samples.
///
/// Layout: total length u32, stamp count u32, then per stamp a FILETIME
/// u64 and sample count u32, then per sample handle u32, size u32, data.
pub fn parse_notification_stream(mut payload: Bytes) -> AdsResult<Vec<NotificationSample>> {
    if payload.len() < 8 {
        return Err(AdsError::frame("notification stream shorter than 8 bytes"));
    }
    let _total_length = payload.get_u32_le();
    let stamp_count = payload.get_u32_le();

    let mut samples = Vec::new();
    for _ in 0..stamp_count {
        if payload.len() < 12 {
            return Err(AdsError::frame("notification stamp truncated"));
        }
        let filetime = payload.get_u64_le();
        let timestamp_ms = filetime_to_unix_ms(filetime);
        let sample_count = payload.get_u32_le();

        for _ in 0..sample_count {
            if payload.len() < 8 {
                return Err(AdsError::frame("notification sample truncated"));
            }
            let handle = payload.get_u32_le();
            let size = payload.get_u32_le() as usize;
            if payload.len() < size {
                return Err(AdsError::frame("notification sample data truncated"));
            }
            let data = payload.split_to(size);
            samples.push(NotificationSample {
                handle,
                timestamp_ms,
                data,
            });
        }
    }

    Ok(samples)
}

/// Serializes a single-stamp notification stream (used by the mock PLC).
pub fn build_notification_stream(timestamp_ms: i64, samples: &[(u32, &[u8])]) -> Bytes {
    let mut stamp = BytesMut::new();
    stamp.put_u64_le(unix_ms_to_filetime(timestamp_ms));
    stamp.put_u32_le(samples.len() as u32);
    for (handle, data) in samples {
        stamp.put_u32_le(*handle);
        stamp.put_u32_le(data.len() as u32);
        stamp.put_slice(data);
    }

    let mut buf = BytesMut::with_capacity(8 + stamp.len());
    buf.put_u32_le((4 + stamp.len()) as u32);
    buf.put_u32_le(1); // one stamp
    buf.put_slice(&stamp);
    buf.freeze()
}

/// Converts a Windows FILETIME (100 ns since 1601) to unix milliseconds.
pub fn filetime_to_unix_ms(filetime: u64) -> i64 {
    (filetime / 10_000) as i64 - FILETIME_EPOCH_OFFSET_MS
}

/// Converts unix milliseconds to a Windows FILETIME.
pub fn unix_ms_to_filetime(unix_ms: i64) -> u64 {
    ((unix_ms + FILETIME_EPOCH_OFFSET_MS) as u64) * 10_000
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::state_flags;

    fn addr(last: u8, port: u16) -> AmsAddr {
        AmsAddr::new(AmsNetId::new([192, 168, 0, last, 1, 1]), port)
    }

    #[test]
    fn test_frame_roundtrip() {
        let header = AmsHeader {
            target: addr(10, 801),
            source: addr(20, 32750),
            command: AdsCommand::Read as u16,
            state_flags: state_flags::REQUEST,
            length: 0,
            error_code: 0,
            invoke_id: 42,
        };
        let payload = read_request(0xF005, 7, 4);

        let frame = write_frame(&header, &payload);

        // TCP header: reserved + length
        assert_eq!(&frame[..2], &[0, 0]);
        let body_len = u32::from_le_bytes(frame[2..6].try_into().unwrap()) as usize;
        assert_eq!(body_len, AMS_HEADER_LEN + payload.len());

        let body = Bytes::copy_from_slice(&frame[TCP_HEADER_LEN..]);
        let (parsed, parsed_payload) = parse_frame(body).unwrap();

        assert_eq!(parsed.target, header.target);
        assert_eq!(parsed.source, header.source);
        assert_eq!(parsed.command(), Some(AdsCommand::Read));
        assert_eq!(parsed.invoke_id, 42);
        assert!(!parsed.is_response());
        assert_eq!(parsed_payload, payload);
    }

    #[test]
    fn test_parse_frame_rejects_short_body() {
        assert!(parse_frame(Bytes::from_static(&[0u8; 10])).is_err());
    }

    #[test]
    fn test_read_response_roundtrip() {
        let payload = read_response(0, &[1, 2, 3, 4]);
        let data = parse_read_response(payload, "read").unwrap();
        assert_eq!(&data[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_read_response_error_code() {
        let payload = read_response(0x710, &[]);
        let err = parse_read_response(payload, "MAIN.gone").unwrap_err();
        assert_eq!(err.code(), Some(0x710));
    }

    #[test]
    fn test_write_response_roundtrip() {
        assert!(parse_write_response(write_response(0), "write").is_ok());
        assert!(parse_write_response(write_response(0x745), "write").is_err());
    }

    #[test]
    fn test_read_state_roundtrip() {
        let payload = read_state_response(0, 5, 1);
        let (ads_state, device_state) = parse_read_state_response(payload, "state").unwrap();
        assert_eq!(ads_state, 5);
        assert_eq!(device_state, 1);
    }

    #[test]
    fn test_notification_roundtrip() {
        let ts = 1_700_000_000_000i64;
        let stream = build_notification_stream(ts, &[(7, &[1, 0, 0, 0]), (9, &[2, 0])]);

        let samples = parse_notification_stream(stream).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].handle, 7);
        assert_eq!(samples[0].timestamp_ms, ts);
        assert_eq!(&samples[0].data[..], &[1, 0, 0, 0]);
        assert_eq!(samples[1].handle, 9);
        assert_eq!(&samples[1].data[..], &[2, 0]);
    }

    #[test]
    fn test_filetime_conversion() {
        let unix_ms = 1_700_000_000_123i64;
        assert_eq!(filetime_to_unix_ms(unix_ms_to_filetime(unix_ms)), unix_ms);
        // unix epoch in FILETIME
        assert_eq!(filetime_to_unix_ms(116_444_736_000_000_000), 0);
    }

    #[test]
    fn test_truncated_notification_rejected() {
        let stream = build_notification_stream(0, &[(1, &[1, 2, 3, 4])]);
        let cut = stream.slice(..stream.len() - 2);
        assert!(parse_notification_stream(cut).is_err());
    }
}
