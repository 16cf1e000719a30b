//! # evmux-select — select(2) readiness backend
//!
//! The most portable evmux strategy. Interest is kept as two growable
//! descriptor bitsets (read, write) in native `fd_set` layout; each poll
//! copies them into scratch sets, blocks in `select(2)`, and dispatches
//! every ready descriptor to the owning loop.
//!
//! ## Modules
//!
//! - `bitset` - `FdBitset` and the four-set `InterestStore`
//! - `sys` - `WaitPrimitive` seam, `SysSelect`, timeout conversion
//! - `backend` - `SelectBackend`: modify / poll / init / destroy
//! - `config` - `SelectConfig` with env overrides
//!
//! Descriptors must stay below `SelectConfig::max_descriptors`
//! (`FD_SETSIZE` by default); larger ones are rejected with
//! `BackendError::CapacityExceeded`.

pub mod bitset;
pub mod sys;
pub mod backend;
pub mod config;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::SelectBackend;
pub use config::{ConfigError, SelectConfig};
pub use sys::{SysSelect, WaitPrimitive};

use evmux_core::{Backend, BackendError, BackendFlags, Result};

/// Strategies this crate can construct.
pub fn supported_backends() -> BackendFlags {
    BackendFlags::SELECT
}

/// Build the select backend if `flags` allows it.
///
/// Fails with `NoBackend` when `flags` excludes select, or with
/// `InvalidConfig` when the config does not validate.
pub fn create_backend(flags: BackendFlags, config: SelectConfig) -> Result<Box<dyn Backend>> {
    if !flags.intersects(supported_backends()) {
        return Err(BackendError::NoBackend(flags));
    }
    Ok(Box::new(SelectBackend::init(flags, config)?))
}
