// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Gateway configuration from the environment.
//!
//! Every option has a default; the recognized variables are:
//!
//! | Key | Default | Effect |
//! |---|---|---|
//! | `MQTT_PORT` | 1883 | Broker listen port |
//! | `MQTT_HOST` | 0.0.0.0 | Broker bind address |
//! | `API_PORT` | 8080 | Admin HTTP/WS listen port |
//! | `API_HOST` | 0.0.0.0 | Admin bind address |
//! | `ADS_HOST` | localhost | Default router host |
//! | `ADS_PORT` | 48898 | Default router port |
//! | `ADS_TARGET_IP` | 127.0.0.1 | Default target address root |
//! | `ADS_TARGET_PORT` | 801 | Default runtime port |
//! | `ADS_SOURCE_PORT` | 32750 | Local ADS source port |
//! | `CACHE_HOST` | localhost | Cache backend host |
//! | `CACHE_PORT` | 6379 | Cache backend port |
//! | `BUFFER_SIZE` | 10000 | Per-variable ring capacity |
//! | `DEBUG_EVENTS` | false | Verbose event bus logging |
//! | `DATA_DIR` | ./data | Database directory |

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use adsgate_api::ApiConfig;
use adsgate_engine::EngineConfig;

use crate::error::{BinError, BinResult};

// =============================================================================
// GatewayConfig
// =============================================================================

/// The full gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    /// Engine configuration (broker, cache, store, queue, defaults).
    #[serde(default)]
    pub engine: EngineConfig,
    /// Admin API configuration.
    #[serde(default)]
    pub api: ApiConfig,
}

impl GatewayConfig {
    /// Builds the configuration from the environment, falling back to
    /// the documented defaults.
    pub fn from_env() -> BinResult<Self> {
        let mut config = Self::default();

        config.engine.mqtt.port = env_parse("MQTT_PORT", 1883)?;
        config.engine.mqtt.host = env_or("MQTT_HOST", "0.0.0.0");
        config.api.port = env_parse("API_PORT", 8080)?;
        config.api.host = env_or("API_HOST", "0.0.0.0");

        config.engine.ads.host = env_or("ADS_HOST", "localhost");
        config.engine.ads.port = env_parse("ADS_PORT", 48898)?;
        config.engine.ads.target_ip = env_or("ADS_TARGET_IP", "127.0.0.1");
        config.engine.ads.target_port = env_parse("ADS_TARGET_PORT", 801)?;
        config.engine.ads.source_port = env_parse("ADS_SOURCE_PORT", 32750)?;

        config.engine.cache.host = env_or("CACHE_HOST", "localhost");
        config.engine.cache.port = env_parse("CACHE_PORT", 6379)?;

        config.engine.buffer_size = env_parse("BUFFER_SIZE", 10_000)?;
        config.engine.debug_events = env_parse("DEBUG_EVENTS", false)?;

        let data_dir: PathBuf = env_or("DATA_DIR", "./data").into();
        config.engine.store.path = data_dir.join("adsgate.db");

        Ok(config)
    }

    /// Sanity-checks the assembled configuration.
    pub fn validate(&self) -> BinResult<()> {
        if self.engine.buffer_size == 0 {
            return Err(BinError::Configuration(
                "BUFFER_SIZE must be at least 1".to_string(),
            ));
        }
        if self.engine.mqtt.port == self.api.port {
            return Err(BinError::Configuration(format!(
                "MQTT_PORT and API_PORT collide on {}",
                self.api.port
            )));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> BinResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw.parse().map_err(|e| {
            BinError::Configuration(format!("{}='{}' is invalid: {}", key, raw, e))
        }),
        _ => Ok(default),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.engine.mqtt.port, 1883);
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.engine.buffer_size, 10_000);
        assert!(!config.engine.debug_events);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_port_collision() {
        let mut config = GatewayConfig::default();
        config.api.port = 1883;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let mut config = GatewayConfig::default();
        config.engine.buffer_size = 0;
        assert!(config.validate().is_err());
    }
}
