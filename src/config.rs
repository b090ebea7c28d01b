// 7.0 config.rs: all settings in one place. engine limits and the sweep schedule.
// 7.1 durations serialize as milliseconds so the json stays human editable.

use crate::balance::DEFAULT_DUST;
use crate::types::Leverage;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Settlement limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // Requested leverage above this is clamped down
    pub max_leverage: Leverage,
    // Holdings below this are hidden from portfolio views
    pub dust_threshold: Decimal,
    // Maximum number of events kept in the in-memory audit trail
    pub max_events: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_leverage: Leverage::new_unchecked(dec!(5)),
            dust_threshold: DEFAULT_DUST,
            max_events: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dust_threshold < Decimal::ZERO {
            return Err(ConfigError::InvalidEngine {
                reason: "dust threshold cannot be negative".to_string(),
            });
        }
        if self.max_events == 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "need room for at least one event".to_string(),
            });
        }
        Ok(())
    }
}

/** 7.2: sweep schedule. interval plus up to `jitter` of random delay per tick */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(with = "millis")]
    pub interval: Duration,
    #[serde(with = "millis")]
    pub jitter: Duration,
    // Budget for one order or position inside a sweep
    #[serde(with = "millis")]
    pub entity_timeout: Duration,
    // Sweep once at startup instead of waiting a full interval
    pub run_immediately: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            jitter: Duration::from_secs(5),
            entity_timeout: Duration::from_secs(10),
            run_immediately: true,
        }
    }
}

impl SchedulerConfig {
    // Short timings for tests and the simulation binary
    pub fn fast() -> Self {
        Self {
            interval: Duration::from_millis(50),
            jitter: Duration::ZERO,
            entity_timeout: Duration::from_millis(200),
            run_immediately: true,
        }
    }

    // Every 15 minutes with 30s of jitter
    pub fn production() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            jitter: Duration::from_secs(30),
            entity_timeout: Duration::from_secs(30),
            run_immediately: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidSchedule {
                reason: "interval must be positive".to_string(),
            });
        }
        if self.jitter >= self.interval {
            return Err(ConfigError::InvalidSchedule {
                reason: "jitter must be shorter than the interval".to_string(),
            });
        }
        if self.entity_timeout.is_zero() {
            return Err(ConfigError::InvalidSchedule {
                reason: "entity timeout must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// Everything the simulation binary needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
}

impl SettlementConfig {
    pub fn fast() -> Self {
        Self {
            engine: EngineConfig::default(),
            scheduler: SchedulerConfig::fast(),
        }
    }

    pub fn production() -> Self {
        Self {
            engine: EngineConfig::default(),
            scheduler: SchedulerConfig::production(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.scheduler.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid engine config: {reason}")]
    InvalidEngine { reason: String },

    #[error("Invalid schedule: {reason}")]
    InvalidSchedule { reason: String },
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
