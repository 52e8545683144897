// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT 3.1.1 packet codec.
//!
//! Covers the broker's minimum profile: CONNECT/CONNACK,
//! PUBLISH (QoS 0/1) with PUBACK, SUBSCRIBE/SUBACK,
//! UNSUBSCRIBE/UNSUBACK, PINGREQ/PINGRESP, DISCONNECT.
//!
//! Decoding is incremental: [`decode`] returns `Ok(None)` until a whole
//! packet is buffered, so the session loop can feed it straight from the
//! socket.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use adsgate_core::{BrokerError, BrokerResult};

/// Largest accepted remaining length (1 MiB); enough for any gateway
/// payload, small enough to bound a misbehaving client.
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

// =============================================================================
// Packets
// =============================================================================

/// A decoded MQTT control packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Client connection request.
    Connect {
        /// Client identifier (may be empty; the broker assigns one).
        client_id: String,
        /// Clean session flag.
        clean_session: bool,
        /// Keep-alive interval in seconds.
        keep_alive: u16,
    },
    /// Connection acknowledgement.
    ConnAck {
        /// Session-present flag.
        session_present: bool,
        /// Return code (0 = accepted).
        return_code: u8,
    },
    /// Application message.
    Publish {
        /// Topic name.
        topic: String,
        /// Payload bytes.
        payload: Bytes,
        /// Quality of service (0 or 1).
        qos: u8,
        /// Retain flag.
        retain: bool,
        /// Duplicate delivery flag.
        dup: bool,
        /// Packet id, present when `qos > 0`.
        packet_id: Option<u16>,
    },
    /// QoS 1 acknowledgement.
    PubAck {
        /// Acknowledged packet id.
        packet_id: u16,
    },
    /// Subscription request.
    Subscribe {
        /// Packet id.
        packet_id: u16,
        /// `(topic filter, requested QoS)` pairs.
        filters: Vec<(String, u8)>,
    },
    /// Subscription acknowledgement.
    SubAck {
        /// Packet id.
        packet_id: u16,
        /// Granted QoS per filter (0x80 = failure).
        return_codes: Vec<u8>,
    },
    /// Unsubscription request.
    Unsubscribe {
        /// Packet id.
        packet_id: u16,
        /// Topic filters to remove.
        filters: Vec<String>,
    },
    /// Unsubscription acknowledgement.
    UnsubAck {
        /// Packet id.
        packet_id: u16,
    },
    /// Keep-alive probe.
    PingReq,
    /// Keep-alive response.
    PingResp,
    /// Orderly disconnect.
    Disconnect,
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes one packet from the buffer, consuming its bytes.
///
/// Returns `Ok(None)` when the buffer does not yet hold a full packet.
pub fn decode(buf: &mut BytesMut) -> BrokerResult<Option<Packet>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let first = buf[0];
    let (remaining_len, header_len) = match decode_remaining_length(&buf[1..]) {
        Some(parsed) => parsed,
        None => return Ok(None), // length bytes incomplete
    };

    if remaining_len > MAX_PACKET_SIZE {
        return Err(BrokerError::protocol(format!(
            "remaining length {} exceeds limit",
            remaining_len
        )));
    }

    let total = 1 + header_len + remaining_len;
    if buf.len() < total {
        return Ok(None);
    }

    buf.advance(1 + header_len);
    let mut body = buf.split_to(remaining_len).freeze();

    let packet_type = first >> 4;
    let flags = first & 0x0F;

    let packet = match packet_type {
        1 => decode_connect(&mut body)?,
        2 => {
            require_len(&body, 2, "CONNACK")?;
            Packet::ConnAck {
                session_present: body.get_u8() & 0x01 != 0,
                return_code: body.get_u8(),
            }
        }
        3 => decode_publish(flags, &mut body)?,
        4 => {
            require_len(&body, 2, "PUBACK")?;
            Packet::PubAck {
                packet_id: body.get_u16(),
            }
        }
        8 => decode_subscribe(&mut body)?,
        9 => {
            require_len(&body, 2, "SUBACK")?;
            let packet_id = body.get_u16();
            Packet::SubAck {
                packet_id,
                return_codes: body.to_vec(),
            }
        }
        10 => decode_unsubscribe(&mut body)?,
        11 => {
            require_len(&body, 2, "UNSUBACK")?;
            Packet::UnsubAck {
                packet_id: body.get_u16(),
            }
        }
        12 => Packet::PingReq,
        13 => Packet::PingResp,
        14 => Packet::Disconnect,
        other => {
            return Err(BrokerError::protocol(format!(
                "unsupported packet type {}",
                other
            )))
        }
    };

    Ok(Some(packet))
}

fn decode_remaining_length(bytes: &[u8]) -> Option<(usize, usize)> {
    let mut value = 0usize;
    let mut shift = 0u32;
    for (index, byte) in bytes.iter().enumerate().take(4) {
        value |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            return Some((value, index + 1));
        }
        shift += 7;
    }
    None
}

fn decode_connect(body: &mut Bytes) -> BrokerResult<Packet> {
    let protocol = read_string(body, "CONNECT protocol name")?;
    if protocol != "MQTT" && protocol != "MQIsdp" {
        return Err(BrokerError::protocol(format!(
            "unknown protocol name '{}'",
            protocol
        )));
    }

    require_len(body, 4, "CONNECT header")?;
    let level = body.get_u8();
    if level != 3 && level != 4 {
        return Err(BrokerError::protocol(format!(
            "unsupported protocol level {}",
            level
        )));
    }

    let connect_flags = body.get_u8();
    let keep_alive = body.get_u16();
    let clean_session = connect_flags & 0x02 != 0;
    let has_will = connect_flags & 0x04 != 0;
    let has_username = connect_flags & 0x80 != 0;
    let has_password = connect_flags & 0x40 != 0;

    let client_id = read_string(body, "CONNECT client id")?;

    // Will and credentials are parsed past but unused: the broker is
    // anonymous and has no will delivery.
    if has_will {
        read_string(body, "CONNECT will topic")?;
        read_bytes(body, "CONNECT will message")?;
    }
    if has_username {
        read_string(body, "CONNECT username")?;
    }
    if has_password {
        read_bytes(body, "CONNECT password")?;
    }

    Ok(Packet::Connect {
        client_id,
        clean_session,
        keep_alive,
    })
}

fn decode_publish(flags: u8, body: &mut Bytes) -> BrokerResult<Packet> {
    let dup = flags & 0x08 != 0;
    let qos = (flags >> 1) & 0x03;
    let retain = flags & 0x01 != 0;

    if qos > 1 {
        return Err(BrokerError::protocol(format!("unsupported QoS {}", qos)));
    }

    let topic = read_string(body, "PUBLISH topic")?;
    let packet_id = if qos > 0 {
        require_len(body, 2, "PUBLISH packet id")?;
        Some(body.get_u16())
    } else {
        None
    };

    Ok(Packet::Publish {
        topic,
        payload: body.clone(),
        qos,
        retain,
        dup,
        packet_id,
    })
}

fn decode_subscribe(body: &mut Bytes) -> BrokerResult<Packet> {
    require_len(body, 2, "SUBSCRIBE packet id")?;
    let packet_id = body.get_u16();

    let mut filters = Vec::new();
    while body.has_remaining() {
        let filter = read_string(body, "SUBSCRIBE filter")?;
        require_len(body, 1, "SUBSCRIBE qos")?;
        let qos = body.get_u8() & 0x03;
        filters.push((filter, qos.min(1)));
    }

    if filters.is_empty() {
        return Err(BrokerError::protocol("SUBSCRIBE with no filters"));
    }

    Ok(Packet::Subscribe { packet_id, filters })
}

fn decode_unsubscribe(body: &mut Bytes) -> BrokerResult<Packet> {
    require_len(body, 2, "UNSUBSCRIBE packet id")?;
    let packet_id = body.get_u16();

    let mut filters = Vec::new();
    while body.has_remaining() {
        filters.push(read_string(body, "UNSUBSCRIBE filter")?);
    }

    Ok(Packet::Unsubscribe { packet_id, filters })
}

fn read_string(body: &mut Bytes, what: &str) -> BrokerResult<String> {
    let raw = read_bytes(body, what)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| BrokerError::protocol(format!("{} is not valid UTF-8", what)))
}

fn read_bytes(body: &mut Bytes, what: &str) -> BrokerResult<Bytes> {
    require_len(body, 2, what)?;
    let len = body.get_u16() as usize;
    if body.len() < len {
        return Err(BrokerError::protocol(format!("{} truncated", what)));
    }
    Ok(body.split_to(len))
}

fn require_len(body: &Bytes, len: usize, what: &str) -> BrokerResult<()> {
    if body.len() < len {
        return Err(BrokerError::protocol(format!("{} truncated", what)));
    }
    Ok(())
}

// =============================================================================
// Encoding
// =============================================================================

/// Encodes a packet into the buffer.
pub fn encode(packet: &Packet, buf: &mut BytesMut) {
    match packet {
        Packet::Connect {
            client_id,
            clean_session,
            keep_alive,
        } => {
            let mut body = BytesMut::new();
            put_string(&mut body, "MQTT");
            body.put_u8(4);
            body.put_u8(if *clean_session { 0x02 } else { 0x00 });
            body.put_u16(*keep_alive);
            put_string(&mut body, client_id);
            put_fixed_header(buf, 0x10, &body);
        }
        Packet::ConnAck {
            session_present,
            return_code,
        } => {
            buf.put_u8(0x20);
            buf.put_u8(2);
            buf.put_u8(*session_present as u8);
            buf.put_u8(*return_code);
        }
        Packet::Publish {
            topic,
            payload,
            qos,
            retain,
            dup,
            packet_id,
        } => {
            let mut body = BytesMut::new();
            put_string(&mut body, topic);
            if *qos > 0 {
                body.put_u16(packet_id.unwrap_or(0));
            }
            body.put_slice(payload);

            let first = 0x30 | ((*dup as u8) << 3) | (qos << 1) | (*retain as u8);
            put_fixed_header(buf, first, &body);
        }
        Packet::PubAck { packet_id } => {
            buf.put_u8(0x40);
            buf.put_u8(2);
            buf.put_u16(*packet_id);
        }
        Packet::Subscribe { packet_id, filters } => {
            let mut body = BytesMut::new();
            body.put_u16(*packet_id);
            for (filter, qos) in filters {
                put_string(&mut body, filter);
                body.put_u8(*qos);
            }
            put_fixed_header(buf, 0x82, &body);
        }
        Packet::SubAck {
            packet_id,
            return_codes,
        } => {
            let mut body = BytesMut::new();
            body.put_u16(*packet_id);
            body.put_slice(return_codes);
            put_fixed_header(buf, 0x90, &body);
        }
        Packet::Unsubscribe { packet_id, filters } => {
            let mut body = BytesMut::new();
            body.put_u16(*packet_id);
            for filter in filters {
                put_string(&mut body, filter);
            }
            put_fixed_header(buf, 0xA2, &body);
        }
        Packet::UnsubAck { packet_id } => {
            buf.put_u8(0xB0);
            buf.put_u8(2);
            buf.put_u16(*packet_id);
        }
        Packet::PingReq => {
            buf.put_u8(0xC0);
            buf.put_u8(0);
        }
        Packet::PingResp => {
            buf.put_u8(0xD0);
            buf.put_u8(0);
        }
        Packet::Disconnect => {
            buf.put_u8(0xE0);
            buf.put_u8(0);
        }
    }
}

fn put_fixed_header(buf: &mut BytesMut, first: u8, body: &BytesMut) {
    buf.put_u8(first);
    put_remaining_length(buf, body.len());
    buf.put_slice(body);
}

fn put_remaining_length(buf: &mut BytesMut, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

// =============================================================================
// Topic Matching
// =============================================================================

/// Returns `true` if a topic filter matches a concrete topic.
///
/// `+` matches exactly one level; `#` matches any remainder and must be
/// the last level of the filter.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
