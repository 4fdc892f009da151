//! Backend error types

use thiserror::Error;

/// What kind of id failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Channel,
    Tablet,
}

impl std::fmt::Display for IdKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdKind::Channel => write!(f, "channel"),
            IdKind::Tablet => write!(f, "tablet"),
        }
    }
}

/// Errors returned by the control facade. All are recoverable: the call is
/// rejected before any state mutation, and the engine keeps running.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Id outside the fixed topology
    #[error("{kind} id {id} out of range 1..={max}")]
    BadId {
        kind: IdKind,
        id: usize,
        max: usize,
    },

    /// Gain that is negative, NaN, or infinite
    #[error("invalid gain {0}: gains must be finite and non-negative")]
    BadGain(f32),

    /// Headroom outside 0..=60 dB or non-finite
    #[error("invalid headroom {0} dB: must be finite and within 0..=60")]
    BadHeadroom(f32),

    /// Pushed or pulled frame with the wrong sample count
    #[error("frame length {got} does not match frame size {expected}")]
    BadFrameLength { expected: usize, got: usize },
}

/// Result type for facade operations
pub type BackendResult<T> = Result<T, BackendError>;
