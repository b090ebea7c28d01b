//! Periodic sweep driver.

use super::core::Engine;
use crate::config::{ConfigError, SchedulerConfig};
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub struct Scheduler {
    engine: Engine,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(engine: Engine, config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { engine, config })
    }

    /// Sweep every `interval` (plus jitter) until `shutdown` flips to true or
    /// its sender is dropped. Returns how many sweeps ran.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.config.interval);
        // a slow sweep delays the next one instead of causing a burst
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.config.run_immediately {
            ticker.reset();
        }

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            jitter_ms = self.config.jitter.as_millis() as u64,
            "scheduler started"
        );

        let mut sweeps = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {}
            }
            if stopped(&shutdown) {
                break;
            }

            let jitter = self.jitter();
            if !jitter.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(jitter) => {}
                    _ = shutdown.changed() => {}
                }
                if stopped(&shutdown) {
                    break;
                }
            }

            let report = self
                .engine
                .run_sweep(self.config.entity_timeout, &shutdown)
                .await;
            sweeps += 1;
            if report.failed() > 0 {
                warn!(sweep = sweeps, failed = report.failed(), "sweep had failures");
            }
            if report.interrupted {
                break;
            }
        }

        info!(sweeps, "scheduler stopped");
        sweeps
    }

    fn jitter(&self) -> Duration {
        let max = self.config.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

// true once shutdown was requested or the sender went away
fn stopped(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
