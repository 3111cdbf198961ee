//! Shared building blocks for Roost services.
//!
//! - [`error`]: unified error type with HTTP status mapping
//! - [`config`]: platform configuration loaded from `~/.roost/config.json`
//! - [`logging`]: tracing subscriber setup with noise filtering

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::{Error, Result};
