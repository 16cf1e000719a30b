//! Select backend configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use evmux_select::SelectConfig;
//!
//! // Defaults with env overrides
//! let config = SelectConfig::from_env();
//!
//! // Or customize programmatically
//! let config = SelectConfig::new().max_descriptors(256);
//! ```

use std::time::Duration;

use evmux_core::env::env_get;
use evmux_core::{BackendError, Tstamp};

pub mod defaults {
    /// Descriptor ceiling: the platform's fd_set size.
    pub const MAX_DESCRIPTORS: usize = libc::FD_SETSIZE as usize;

    /// Early-wakeup pad added by the scheduler, in microseconds.
    pub const FUDGE_US: u64 = 10_000;
}

/// Select backend configuration with builder pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectConfig {
    /// Descriptors `0..max_descriptors` may be registered
    pub max_descriptors: usize,
    /// Time pad declared to the scheduler at init
    pub fudge: Duration,
}

impl Default for SelectConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SelectConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `EVMUX_SELECT_MAX_FD` - Descriptor ceiling
    /// - `EVMUX_SELECT_FUDGE_US` - Fudge factor in microseconds
    pub fn from_env() -> Self {
        Self {
            max_descriptors: env_get("EVMUX_SELECT_MAX_FD", defaults::MAX_DESCRIPTORS),
            fudge: Duration::from_micros(env_get("EVMUX_SELECT_FUDGE_US", defaults::FUDGE_US)),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            max_descriptors: defaults::MAX_DESCRIPTORS,
            fudge: Duration::from_micros(defaults::FUDGE_US),
        }
    }

    pub fn max_descriptors(mut self, n: usize) -> Self {
        self.max_descriptors = n;
        self
    }

    pub fn fudge(mut self, d: Duration) -> Self {
        self.fudge = d;
        self
    }

    /// Fudge factor in loop seconds
    pub fn fudge_secs(&self) -> Tstamp {
        self.fudge.as_secs_f64()
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_descriptors == 0 {
            return Err(ConfigError::InvalidValue("max_descriptors must be > 0"));
        }
        if self.max_descriptors > libc::c_int::MAX as usize {
            return Err(ConfigError::InvalidValue("max_descriptors must fit in a C int"));
        }
        if self.fudge.is_zero() {
            return Err(ConfigError::InvalidValue("fudge must be > 0"));
        }
        if self.fudge >= Duration::from_secs(1) {
            return Err(ConfigError::InvalidValue("fudge must be < 1s"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("evmux select configuration:");
        eprintln!("  max_descriptors:  {}", self.max_descriptors);
        eprintln!("  fudge:            {:?}", self.fudge);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl ConfigError {
    pub fn message(&self) -> &'static str {
        match self {
            ConfigError::InvalidValue(msg) => msg,
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for BackendError {
    fn from(e: ConfigError) -> Self {
        BackendError::InvalidConfig(e.message())
    }
}
