//! # evmux-core
//!
//! Core types and traits shared by every evmux readiness backend.
//!
//! This crate knows nothing about any particular wait primitive.
//! Strategy implementations (select, poll, epoll, ...) live in their own
//! crates and plug into the owning event loop through [`Backend`].
//!
//! ## Modules
//!
//! - `mask` - Readiness event mask and timestamp type
//! - `backend` - `Backend` trait, strategy tags, loop collaborator hooks
//! - `error` - Error types and wait-failure classification
//! - `kprint` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod mask;
pub mod backend;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use mask::{EventMask, Tstamp};
pub use backend::{Backend, BackendFlags, BackendKind, LoopHooks};
pub use error::{BackendError, PollFailure, Result};
pub use env::{env_get, env_get_bool};

/// Re-exported so backends and loops share one errno type.
pub use nix::errno::Errno;
