//! Shared types for the streamed voice decode engine
//!
//! Holds what every crate in the workspace agrees on: the common error type,
//! engine configuration loaded from TOML, and the observer event bus.

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
