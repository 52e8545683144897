// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! AMS addressing and ADS protocol constants.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AdsError;

// =============================================================================
// AMS Net ID
// =============================================================================

/// A six-byte AMS routing identifier, rendered as `a.b.c.d.e.f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AmsNetId(pub [u8; 6]);

impl AmsNetId {
    /// Creates a net ID from six octets.
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Derives the conventional net ID for an IPv4 host: `ip.1.1`.
    pub fn from_ipv4(ip: std::net::Ipv4Addr) -> Self {
        let o = ip.octets();
        Self([o[0], o[1], o[2], o[3], 1, 1])
    }

    /// Returns the raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for AmsNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}.{}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for AmsNetId {
    type Err = AdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 6 {
            return Err(AdsError::invalid_address(s, "expected six dot-separated octets"));
        }

        let mut octets = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            octets[i] = part
                .parse::<u8>()
                .map_err(|_| AdsError::invalid_address(s, format!("bad octet '{}'", part)))?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for AmsNetId {
    type Error = AdsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AmsNetId> for String {
    fn from(id: AmsNetId) -> Self {
        id.to_string()
    }
}

/// A routable AMS endpoint: net ID plus port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AmsAddr {
    /// Routing identifier.
    pub net_id: AmsNetId,
    /// AMS port (801/851 for PLC runtimes).
    pub port: u16,
}

impl AmsAddr {
    /// Creates an address.
    pub fn new(net_id: AmsNetId, port: u16) -> Self {
        Self { net_id, port }
    }
}

impl fmt::Display for AmsAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.net_id, self.port)
    }
}

// =============================================================================
// ADS Commands
// =============================================================================

/// ADS command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AdsCommand {
    /// Read device name and version.
    ReadDeviceInfo = 1,
    /// Read by index group/offset.
    Read = 2,
    /// Write by index group/offset.
    Write = 3,
    /// Read ADS and device state.
    ReadState = 4,
    /// Change ADS state.
    WriteControl = 5,
    /// Install a device notification.
    AddDeviceNotification = 6,
    /// Remove a device notification.
    DeleteDeviceNotification = 7,
    /// Server-pushed notification stream.
    DeviceNotification = 8,
    /// Combined write-then-read.
    ReadWrite = 9,
}

impl AdsCommand {
    /// Parses a raw command id.
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(AdsCommand::ReadDeviceInfo),
            2 => Some(AdsCommand::Read),
            3 => Some(AdsCommand::Write),
            4 => Some(AdsCommand::ReadState),
            5 => Some(AdsCommand::WriteControl),
            6 => Some(AdsCommand::AddDeviceNotification),
            7 => Some(AdsCommand::DeleteDeviceNotification),
            8 => Some(AdsCommand::DeviceNotification),
            9 => Some(AdsCommand::ReadWrite),
            _ => None,
        }
    }
}

// =============================================================================
// Index Groups
// =============================================================================

/// Reserved index groups used by the gateway.
pub mod index_group {
    /// Acquire a symbol handle by name (ReadWrite).
    pub const SYM_HANDLE_BY_NAME: u32 = 0xF003;
    /// Read/write a value through a symbol handle.
    pub const SYM_VALUE_BY_HANDLE: u32 = 0xF005;
    /// Release a symbol handle.
    pub const SYM_RELEASE_HANDLE: u32 = 0xF006;
    /// Per-entry symbol table data.
    pub const SYM_UPLOAD: u32 = 0xF009;
    /// PLC info block: 48 bytes; bytes 0..3 hold the little-endian
    /// OnlineChange counter, 4..7 the symbol count, 8..11 the upload size.
    pub const SYM_INFO: u32 = 0xF00F;
}

/// Length of the PLC info block read from [`index_group::SYM_INFO`].
pub const INFO_BLOCK_LEN: u32 = 48;

// =============================================================================
// State Flags
// =============================================================================

/// AMS state flags.
pub mod state_flags {
    /// ADS command request over TCP.
    pub const REQUEST: u16 = 0x0004;
    /// ADS command response over TCP.
    pub const RESPONSE: u16 = 0x0005;
}

// =============================================================================
// Notification Transmission Modes
// =============================================================================

/// ADS notification transmission modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TransmissionMode {
    /// Deliver on the server cycle.
    ServerCycle = 3,
    /// Deliver only when the value changes.
    OnChange = 4,
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Configuration for one ADS session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Router host.
    pub host: String,
    /// Router TCP port.
    pub port: u16,
    /// Target endpoint on the PLC side.
    pub target: AmsAddr,
    /// Local AMS source port registered with the router.
    pub source_port: u16,
    /// Connect timeout.
    #[serde(default = "default_connect_timeout")]
    #[serde(with = "adsgate_core::types::duration_millis")]
    pub connect_timeout: Duration,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    #[serde(with = "adsgate_core::types::duration_millis")]
    pub request_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(2)
}

impl SessionConfig {
    /// Builds a session configuration from a gateway connection record.
    pub fn from_connection(config: &adsgate_core::ConnectionConfig) -> Result<Self, AdsError> {
        let net_id: AmsNetId = config.target_address.parse()?;
        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            target: AmsAddr::new(net_id, config.target_port),
            source_port: config.source_port,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        })
    }

    /// Returns the router socket address string.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_id_parse_roundtrip() {
        let id: AmsNetId = "192.168.1.10.1.1".parse().unwrap();
        assert_eq!(id.octets(), [192, 168, 1, 10, 1, 1]);
        assert_eq!(id.to_string(), "192.168.1.10.1.1");
    }

    #[test]
    fn test_net_id_parse_rejects_garbage() {
        assert!("1.2.3.4".parse::<AmsNetId>().is_err());
        assert!("1.2.3.4.5.999".parse::<AmsNetId>().is_err());
        assert!("a.b.c.d.e.f".parse::<AmsNetId>().is_err());
    }

    #[test]
    fn test_net_id_from_ipv4() {
        let id = AmsNetId::from_ipv4("10.0.0.7".parse().unwrap());
        assert_eq!(id.to_string(), "10.0.0.7.1.1");
    }

    #[test]
    fn test_ads_command_from_u16() {
        assert_eq!(AdsCommand::from_u16(2), Some(AdsCommand::Read));
        assert_eq!(AdsCommand::from_u16(9), Some(AdsCommand::ReadWrite));
        assert_eq!(AdsCommand::from_u16(99), None);
    }

    #[test]
    fn test_session_config_from_connection() {
        let conn: adsgate_core::ConnectionConfig = serde_json::from_str(
            r#"{
                "id": "c1",
                "name": "line 1",
                "host": "plc.local",
                "target_address": "192.168.1.10.1.1"
            }"#,
        )
        .unwrap();

        let cfg = SessionConfig::from_connection(&conn).unwrap();
        assert_eq!(cfg.socket_addr(), "plc.local:48898");
        assert_eq!(cfg.target.port, 801);
        assert_eq!(cfg.source_port, 32750);
        assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
    }
}
