//! Audience engine configuration.
//!
//! Defines the tick cadence, event buffering and arbitration tie-break.

use std::time::Duration;

use audience_types::TieBreak;
use serde::{Deserialize, Serialize};

use crate::error::{AudienceError, AudienceResult};

/// Deployment profile used to pick configuration presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineProfile {
    /// Live server: one tick every 50ms, generous event buffer.
    Production,

    /// Local testing: slower ticks, small buffer.
    Development,
}

/// Configuration for the audience engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceConfig {
    /// Interval between ticks of the tick loop.
    pub tick_interval: Duration,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,

    /// How equal-priority claims are decided.
    pub tie_break: TieBreak,
}

impl Default for AudienceConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            event_capacity: 1024,
            tie_break: TieBreak::RefOrder,
        }
    }
}

impl AudienceConfig {
    /// Create config for a specific profile.
    pub fn for_profile(profile: EngineProfile) -> Self {
        let mut config = Self::default();

        match profile {
            EngineProfile::Production => {
                config.event_capacity = 4096;
            }
            EngineProfile::Development => {
                config.tick_interval = Duration::from_millis(250);
                config.event_capacity = 256;
            }
        }

        config
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> AudienceResult<()> {
        if self.tick_interval.is_zero() {
            return Err(AudienceError::ConfigurationError(
                "tick_interval must be non-zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(AudienceError::ConfigurationError(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
