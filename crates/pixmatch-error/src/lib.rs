//! Error types shared across the pixmatch workspace.
//!
//! One enum covers every failure kind the service can produce. Each kind
//! carries a stable numeric code that the command protocol reports in its
//! terminal `<CMD> FAILED, code <n>` line, so clients can script against
//! the codes without parsing detail text.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T, E = PixmatchError> = std::result::Result<T, E>;

/// All failure kinds surfaced by the service.
#[derive(Debug, Error)]
pub enum PixmatchError {
    /// Socket read/write, accept, or file open failed.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode or resize failed, or the source was too small.
    #[error("decode failure: {detail}")]
    Decode { detail: String },

    /// A store call failed or returned an unexpected shape.
    #[error("persistence failure: {detail}")]
    Persistence { detail: String },

    /// An allocation failed.
    #[error("out of memory: {detail}")]
    OutOfMemory { detail: String },

    /// Malformed command, unknown command, or command line too long.
    #[error("protocol failure: {detail}")]
    Protocol { detail: String },

    /// No free connection slot.
    #[error("no free connection slot")]
    Capacity,

    /// Two miniatures with differing dimensions were compared.
    #[error("miniature size mismatch: {left_width}x{left_height} vs {right_width}x{right_height}")]
    SizeMismatch {
        left_width: u32,
        left_height: u32,
        right_width: u32,
        right_height: u32,
    },

    /// An internal invariant was violated. Logged, never reported as success.
    #[error("internal invariant violated: {detail}")]
    Internal { detail: String },
}

impl PixmatchError {
    /// Build a [`PixmatchError::Decode`] from anything displayable.
    pub fn decode(detail: impl Into<String>) -> Self {
        Self::Decode {
            detail: detail.into(),
        }
    }

    /// Build a [`PixmatchError::Persistence`] from anything displayable.
    pub fn persistence(detail: impl Into<String>) -> Self {
        Self::Persistence {
            detail: detail.into(),
        }
    }

    /// Build a [`PixmatchError::Protocol`] from anything displayable.
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol {
            detail: detail.into(),
        }
    }

    /// Build a [`PixmatchError::Internal`] from anything displayable.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal {
            detail: detail.into(),
        }
    }

    /// Stable numeric code reported by `<CMD> FAILED, code <n>` replies.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::Io(_) => 1,
            Self::Decode { .. } => 2,
            Self::Persistence { .. } => 3,
            Self::OutOfMemory { .. } => 4,
            Self::Protocol { .. } => 5,
            Self::Capacity => 6,
            Self::SizeMismatch { .. } | Self::Internal { .. } => 7,
        }
    }
}
