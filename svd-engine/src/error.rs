//! Error types for the decode engine
//!
//! Pass/fail travels through [`Error`]; detail that should be logged without
//! steering control flow travels as a [`Diagnostic`] inside [`Tagged`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Diagnostic codes attached to results and failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Diagnostic {
    /// Header bytes are not a recognizable media header
    InvalidHeader,
    /// Codec-reported frame count disagrees with the header
    TotalFramesMismatch,
    /// Loop end is not after loop start, or lies past the end of data
    LoopBoundsInvalid,
    /// Codec reported a throughput the stream cannot be scheduled with
    InvalidThroughput,
    /// Seek target is at or past the end of data
    SeekOutOfRange,
    /// No marker with the requested id exists
    MarkerNotFound,
    /// Codec cannot map a frame to a byte offset
    SeekTableMissing,
    /// Codec returned fewer frames than the media declares
    CodecUnderrun,
    /// Hardware batch or job failed
    HardwareFailure,
    /// Output ring had no ready slot when the mixer asked for data
    Starvation,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Main error type for the decode engine
#[derive(Error, Debug)]
pub enum Error {
    /// Memory source was opened without any bytes
    #[error("No data ready")]
    NoDataReady,

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Provider-specific failure other than plain I/O
    #[error("Stream provider error: {0}")]
    Provider(String),

    /// Malformed media, fatal to the voice
    #[error("Invalid file ({diagnostic}): {detail}")]
    InvalidFile {
        diagnostic: Diagnostic,
        detail: String,
    },

    /// Seek target at or past the end of data
    #[error("Seek to frame {target} out of range (total {total})")]
    SeekOutOfRange { target: u64, total: u64 },

    /// Hardware batch or job failure
    #[error("Hardware decode failed with code {code}")]
    Hardware { code: i32 },

    /// Allocation failure while growing an internal buffer
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No codec handles this format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Errors from the shared crate (config, I/O)
    #[error(transparent)]
    Common(#[from] svd_common::Error),
}

impl Error {
    /// Build an invalid-file error
    pub fn invalid_file(diagnostic: Diagnostic, detail: impl Into<String>) -> Self {
        Error::InvalidFile {
            diagnostic,
            detail: detail.into(),
        }
    }

    /// Diagnostic code carried by this failure, if any
    pub fn diagnostic(&self) -> Option<Diagnostic> {
        match self {
            Error::InvalidFile { diagnostic, .. } => Some(*diagnostic),
            Error::SeekOutOfRange { .. } => Some(Diagnostic::SeekOutOfRange),
            Error::Hardware { .. } => Some(Diagnostic::HardwareFailure),
            _ => None,
        }
    }
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Successful result tagged with an optional diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<T> {
    pub value: T,
    pub diagnostic: Option<Diagnostic>,
}

impl<T> Tagged<T> {
    /// Plain success
    pub fn ok(value: T) -> Self {
        Self {
            value,
            diagnostic: None,
        }
    }

    /// Success that carries a diagnostic worth logging
    pub fn with(value: T, diagnostic: Diagnostic) -> Self {
        Self {
            value,
            diagnostic: Some(diagnostic),
        }
    }

    /// Transform the value, keeping the diagnostic
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Tagged<U> {
        Tagged {
            value: f(self.value),
            diagnostic: self.diagnostic,
        }
    }
}
