// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Exponential backoff used by the reconnect path and the work queues.
//!
//! The gateway uses one schedule everywhere: exponential growth from a
//! base delay to a ceiling, with optional jitter to avoid thundering
//! herds after a shared outage.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::duration_millis;

// =============================================================================
// Retry Configuration
// =============================================================================

/// Configuration for the exponential backoff schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts (0 = unbounded, used by the reconnect loop).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_delay")]
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Ceiling on the delay.
    #[serde(default = "default_max_delay")]
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Growth factor per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0) applied to each delay.
    #[serde(default)]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// The schedule used by the connection reconnect loop: unbounded
    /// attempts, 1 s doubling to a 60 s ceiling.
    pub fn reconnect() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the jitter factor.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

// =============================================================================
// Exponential Backoff
// =============================================================================

/// Decision after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    Retry(Duration),
    /// Give up.
    Stop,
}

/// The backoff schedule.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Creates a schedule from a configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay for the given 1-based attempt number, before
    /// jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = self.config.multiplier.powi(exponent as i32);
        let delay = self.config.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.config.max_delay.as_secs_f64()))
    }

    /// Decides whether to retry after a failed 1-based attempt.
    ///
    /// Applies jitter when configured.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if self.config.max_attempts > 0 && attempt >= self.config.max_attempts {
            return RetryDecision::Stop;
        }

        let base = self.delay_for(attempt);
        let delay = if self.config.jitter > 0.0 {
            let spread = base.as_secs_f64() * self.config.jitter;
            let offset = (rand::random::<f64>() * 2.0 - 1.0) * spread;
            Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
        } else {
            base
        };

        RetryDecision::Retry(delay)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_schedule() {
        let backoff = ExponentialBackoff::default();

        assert_eq!(backoff.delay_for(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(7), Duration::from_secs(60)); // capped
        assert_eq!(backoff.delay_for(30), Duration::from_secs(60));
    }

    #[test]
    fn test_attempt_bound() {
        let backoff = ExponentialBackoff::new(RetryConfig::default().with_max_attempts(3));

        assert!(matches!(backoff.decide(1), RetryDecision::Retry(_)));
        assert!(matches!(backoff.decide(2), RetryDecision::Retry(_)));
        assert_eq!(backoff.decide(3), RetryDecision::Stop);
        assert_eq!(backoff.decide(4), RetryDecision::Stop);
    }

    #[test]
    fn test_unbounded_reconnect() {
        let backoff = ExponentialBackoff::new(RetryConfig::reconnect());
        assert!(matches!(backoff.decide(1_000), RetryDecision::Retry(_)));
    }

    #[test]
    fn test_jitter_stays_positive() {
        let backoff = ExponentialBackoff::new(RetryConfig::default().with_jitter(0.5));
        for attempt in 1..10 {
            match backoff.decide(attempt) {
                RetryDecision::Retry(delay) => assert!(delay >= Duration::ZERO),
                RetryDecision::Stop => {}
            }
        }
    }
}
