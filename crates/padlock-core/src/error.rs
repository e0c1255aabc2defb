//! Error taxonomy for the PadLock engine.
//!
//! Every failure is a returned value. Only [`PadlockError::Transient`] is worth
//! retrying as-is; a [`PadlockError::PartialApply`] means the cores no longer
//! agree and the engine has to be re-initialised.

use std::io;

use thiserror::Error;

/// Errors reported by the PadLock engine.
#[derive(Debug, Error)]
pub enum PadlockError {
    /// No PadLock RNG was found. The feature is simply unavailable.
    #[error("no VIA PadLock RNG present")]
    NotPresent,

    /// A PadLock RNG exists but is blacklisted, or the cores disagree on its type.
    #[error("VIA PadLock RNG present but unusable")]
    Unsupported,

    /// Device-layer failure; the OS error code is kept verbatim.
    #[error("device I/O error: {0}")]
    Io(#[from] io::Error),

    /// An operation needed detected hardware but the engine holds none.
    #[error("engine has no initialised PadLock RNG")]
    NoDevice,

    /// Enable was requested before any configuration was applied.
    #[error("RNG must be configured before it can be enabled")]
    InvalidState,

    /// The control register changed under us during extraction.
    #[error("RNG configuration was tampered with, retry the read")]
    Transient,

    /// A register write failed after some cores were already updated.
    #[error("RNG configuration applied to {applied} of {total} cores: {source}")]
    PartialApply {
        applied: usize,
        total: usize,
        #[source]
        source: io::Error,
    },

    /// The device path template does not have exactly one `%u` escape.
    #[error("invalid device path template {0:?}: expected exactly one %u")]
    InvalidTemplate(String),

    /// A configuration file could not be parsed.
    #[error("invalid RNG configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl PadlockError {
    /// Whether repeating the same call can be expected to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Raw OS error code for device-layer failures.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io(e) | Self::PartialApply { source: e, .. } => e.raw_os_error(),
            _ => None,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PadlockError>;
