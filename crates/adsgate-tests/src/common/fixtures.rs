// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shared test fixtures.

use std::time::Duration;

use adsgate_core::{
    AdsType, ConnectionConfig, ConnectionId, DiscoveryConfig, Quality, Sample, SymbolInfo, Value,
    VariableConfig, VariableId,
};

/// Connection configuration builders.
pub struct ConnectionFixtures;

impl ConnectionFixtures {
    /// A connection to a local mock PLC on the given router port.
    pub fn local(id: &str, port: u16) -> ConnectionConfig {
        ConnectionConfig {
            id: ConnectionId::new(id),
            name: format!("mock {}", id),
            host: "127.0.0.1".to_string(),
            port,
            target_address: "127.0.0.1.1.1".to_string(),
            target_port: 801,
            source_port: 32750,
            enabled: true,
            discovery: DiscoveryConfig::default(),
        }
    }

    /// Same, with aggressive auto-discovery for OnlineChange tests.
    pub fn discovering(id: &str, port: u16, poll_period: Duration) -> ConnectionConfig {
        let mut config = Self::local(id, port);
        config.discovery = DiscoveryConfig {
            auto_discover: true,
            poll_period,
            auto_register: true,
            default_sample_period: Duration::from_millis(50),
            name_filter: String::new(),
        };
        config
    }

    /// A disabled connection that never spawns a session.
    pub fn disabled(id: &str) -> ConnectionConfig {
        let mut config = Self::local(id, 48898);
        config.enabled = false;
        config
    }
}

/// Variable configuration builders.
pub struct VariableFixtures;

impl VariableFixtures {
    /// A polled REAL variable.
    pub fn polled(id: &str, connection: &str, path: &str, period: Duration) -> VariableConfig {
        VariableConfig {
            id: VariableId::new(id),
            connection_id: ConnectionId::new(connection),
            name: id.to_string(),
            path: path.to_string(),
            ads_type: AdsType::Real,
            sample_period: period,
            use_notification: false,
            topic: String::new(),
        }
    }

    /// A notification-driven variable.
    pub fn notified(id: &str, connection: &str, path: &str, ads_type: AdsType) -> VariableConfig {
        VariableConfig {
            id: VariableId::new(id),
            connection_id: ConnectionId::new(connection),
            name: id.to_string(),
            path: path.to_string(),
            ads_type,
            sample_period: Duration::from_millis(20),
            use_notification: true,
            topic: String::new(),
        }
    }
}

/// Symbol table builders.
pub struct SymbolFixtures;

impl SymbolFixtures {
    /// A primitive symbol.
    pub fn primitive(path: &str, type_name: &str, offset: u32) -> SymbolInfo {
        SymbolInfo {
            path: path.to_string(),
            index_group: 0x4020,
            index_offset: offset,
            size: AdsType::parse(type_name).map(|t| t.size() as u32).unwrap_or(4),
            type_name: type_name.to_string(),
            comment: String::new(),
            flags: 0,
        }
    }

    /// A small plant program: one struct with two fields plus a scalar.
    pub fn plant() -> Vec<SymbolInfo> {
        vec![
            Self::primitive("MAIN.temperature", "REAL", 0),
            SymbolInfo {
                path: "MAIN.machine".to_string(),
                index_group: 0x4020,
                index_offset: 16,
                size: 8,
                type_name: "ST_Machine".to_string(),
                comment: "line machine".to_string(),
                flags: 0,
            },
            Self::primitive("MAIN.machine.speed", "REAL", 16),
            Self::primitive("MAIN.machine.running", "BOOL", 20),
        ]
    }
}

/// Sample builders.
pub struct SampleFixtures;

impl SampleFixtures {
    /// A good float sample at an explicit timestamp.
    pub fn good(ts: i64, v: f64) -> Sample {
        Sample::at(ts, Value::Float(v), Quality::Good)
    }

    /// A ramp of samples 1..=n at 10 ms spacing.
    pub fn ramp(n: usize) -> Vec<Sample> {
        (1..=n)
            .map(|i| Sample::at(i as i64 * 10, Value::Float(i as f64), Quality::Good))
            .collect()
    }
}
