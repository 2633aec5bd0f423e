//! Common error types for the decode engine

use thiserror::Error;

/// Common result type for shared operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across engine crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML syntax or type error while parsing a config file
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Invalid caller-supplied parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
