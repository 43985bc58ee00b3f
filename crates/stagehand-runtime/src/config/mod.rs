//! Stagehand configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder methods
//! 2. Environment variables (runtime)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use stagehand_runtime::config::{ClockConfig, TheaterConfig};
//!
//! // Use defaults with env overrides
//! let config = TheaterConfig::from_env();
//!
//! // Or customize programmatically
//! let config = TheaterConfig::from_env()
//!     .parallelism(8)
//!     .clock(ClockConfig::from_env().tick_millis(10));
//! ```

pub mod defaults;

use std::time::Duration;
use stagehand_core::env::{env_get, env_get_opt, env_get_str};
use stagehand_core::error::{StageError, StageResult};

/// Hashed-wheel clock configuration.
#[derive(Debug, Clone)]
pub struct ClockConfig {
    /// Sweep thread name
    pub name: String,
    /// Wheel resolution
    pub tick_millis: u64,
    /// Buckets per revolution; rounded up to a power of two on use
    pub tick_count: usize,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ClockConfig {
    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `STAGEHAND_NAME` - Thread-name prefix (`{name}-clock`)
    /// - `STAGEHAND_TICK_MILLIS` - Wheel resolution in milliseconds
    /// - `STAGEHAND_TICK_COUNT` - Buckets per revolution
    pub fn from_env() -> Self {
        Self {
            name: format!("{}-clock", env_get_str("STAGEHAND_NAME", defaults::NAME)),
            tick_millis: env_get("STAGEHAND_TICK_MILLIS", defaults::TICK_MILLIS),
            tick_count: env_get("STAGEHAND_TICK_COUNT", defaults::TICK_COUNT),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            name: format!("{}-clock", defaults::NAME),
            tick_millis: defaults::TICK_MILLIS,
            tick_count: defaults::TICK_COUNT,
        }
    }

    // Builder methods

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn tick_millis(mut self, millis: u64) -> Self {
        self.tick_millis = millis;
        self
    }

    pub fn tick_count(mut self, count: usize) -> Self {
        self.tick_count = count;
        self
    }

    /// Bucket count actually used by the wheel
    pub fn effective_tick_count(&self) -> usize {
        self.tick_count.max(1).next_power_of_two()
    }

    pub fn tick_nanos(&self) -> u64 {
        self.tick_millis.saturating_mul(1_000_000)
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> StageResult<()> {
        if self.tick_millis == 0 {
            return Err(StageError::InvalidConfig("tick_millis must be > 0"));
        }
        if self.tick_millis > 60 * 60 * 1000 {
            return Err(StageError::InvalidConfig("tick_millis must be <= 1h"));
        }
        if self.tick_count == 0 {
            return Err(StageError::InvalidConfig("tick_count must be > 0"));
        }
        if self.tick_count > 1 << 20 {
            return Err(StageError::InvalidConfig("tick_count must be <= 2^20"));
        }
        Ok(())
    }
}

/// Theater (worker pool + clock) configuration.
#[derive(Debug, Clone)]
pub struct TheaterConfig {
    /// Worker thread-name prefix (`{name}-worker-{n}`)
    pub name: String,
    /// Worker count
    pub parallelism: usize,
    /// Ceiling for compensating workers; defaults to 4x parallelism
    pub max_threads: Option<usize>,
    /// Idle worker park timeout; surplus workers retire after one
    pub park_timeout: Duration,
    /// Poll interval while draining the pool at stop
    pub shutdown_poll: Duration,
    /// Configuration of the owned clock
    pub clock: ClockConfig,
}

impl Default for TheaterConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl TheaterConfig {
    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `STAGEHAND_NAME` - Thread-name prefix
    /// - `STAGEHAND_PARALLELISM` - Worker count
    /// - `STAGEHAND_MAX_THREADS` - Ceiling for compensating workers
    /// - `STAGEHAND_PARK_TIMEOUT_MS` - Park timeout in milliseconds
    /// - `STAGEHAND_SHUTDOWN_POLL_MS` - Drain poll interval in milliseconds
    /// - plus the [`ClockConfig::from_env`] variables
    pub fn from_env() -> Self {
        Self {
            name: env_get_str("STAGEHAND_NAME", defaults::NAME),
            parallelism: env_get("STAGEHAND_PARALLELISM", defaults::parallelism()),
            max_threads: env_get_opt("STAGEHAND_MAX_THREADS"),
            park_timeout: Duration::from_millis(env_get(
                "STAGEHAND_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
            shutdown_poll: Duration::from_millis(env_get(
                "STAGEHAND_SHUTDOWN_POLL_MS",
                defaults::SHUTDOWN_POLL_MS,
            )),
            clock: ClockConfig::from_env(),
        }
    }

    /// Create config with explicit defaults (no env override).
    /// Useful for testing or when you want full control.
    pub fn new() -> Self {
        Self {
            name: defaults::NAME.to_string(),
            parallelism: defaults::parallelism(),
            max_threads: None,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            shutdown_poll: Duration::from_millis(defaults::SHUTDOWN_POLL_MS),
            clock: ClockConfig::new(),
        }
    }

    // Builder methods

    /// Set the thread-name prefix for workers and the clock
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.clock.name = format!("{}-clock", self.name);
        self
    }

    pub fn parallelism(mut self, n: usize) -> Self {
        self.parallelism = n;
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = Some(n);
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn shutdown_poll(mut self, d: Duration) -> Self {
        self.shutdown_poll = d;
        self
    }

    pub fn clock(mut self, clock: ClockConfig) -> Self {
        self.clock = clock;
        self
    }

    pub fn effective_max_threads(&self) -> usize {
        self.max_threads
            .unwrap_or(self.parallelism.saturating_mul(defaults::MAX_THREADS_FACTOR))
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> StageResult<()> {
        if self.parallelism == 0 {
            return Err(StageError::InvalidConfig("parallelism must be > 0"));
        }
        if self.parallelism > 4096 {
            return Err(StageError::InvalidConfig("parallelism must be <= 4096"));
        }
        if self.effective_max_threads() < self.parallelism {
            return Err(StageError::InvalidConfig(
                "max_threads must be >= parallelism",
            ));
        }
        if self.park_timeout.is_zero() {
            return Err(StageError::InvalidConfig("park_timeout must be > 0"));
        }
        if self.shutdown_poll.is_zero() {
            return Err(StageError::InvalidConfig("shutdown_poll must be > 0"));
        }
        self.clock.validate()
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("Stagehand Configuration:");
        eprintln!("  name:           {}", self.name);
        eprintln!("  parallelism:    {}", self.parallelism);
        eprintln!("  max_threads:    {}", self.effective_max_threads());
        eprintln!("  park_timeout:   {:?}", self.park_timeout);
        eprintln!("  shutdown_poll:  {:?}", self.shutdown_poll);
        eprintln!("  clock.name:     {}", self.clock.name);
        eprintln!("  tick_millis:    {}", self.clock.tick_millis);
        eprintln!("  tick_count:     {}", self.clock.effective_tick_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env() {
        let config = TheaterConfig::from_env();
        assert!(config.parallelism >= 1);
    }

    #[test]
    fn test_defaults() {
        let config = TheaterConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.clock.tick_millis, 100);
        assert_eq!(config.clock.effective_tick_count(), 512);
        assert_eq!(config.effective_max_threads(), config.parallelism * 4);
        assert_eq!(config.clock.name, "stagehand-clock");
    }

    #[test]
    fn test_builder() {
        let config = TheaterConfig::new()
            .name("stage")
            .parallelism(8)
            .clock(ClockConfig::new().tick_millis(10).tick_count(60));

        assert_eq!(config.parallelism, 8);
        assert_eq!(config.effective_max_threads(), 32);
        assert_eq!(config.clock.tick_nanos(), 10_000_000);
        assert_eq!(config.clock.effective_tick_count(), 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_name_propagates_to_clock() {
        let config = TheaterConfig::new().name("edge");
        assert_eq!(config.clock.name, "edge-clock");
    }

    #[test]
    fn test_validation() {
        assert!(TheaterConfig::new().parallelism(0).validate().is_err());
        assert!(TheaterConfig::new()
            .parallelism(4)
            .max_threads(2)
            .validate()
            .is_err());
        assert_eq!(
            ClockConfig::new().tick_millis(0).validate(),
            Err(StageError::InvalidConfig("tick_millis must be > 0"))
        );
        assert!(ClockConfig::new().tick_count(0).validate().is_err());
    }
}
