//! Error taxonomy shared by the safe API and the C boundary.
//!
//! Locally detected precondition failures map to fixed negative status codes.
//! Engine failures carry the engine's own status, which is forwarded verbatim.

use std::path::PathBuf;

use thiserror::Error;

pub const STATUS_OK: i32 = 0;
pub const STATUS_NULL_ARGUMENT: i32 = -1;
pub const STATUS_INVALID_HANDLE: i32 = -2;
pub const STATUS_MODEL_NOT_LOADED: i32 = -3;
pub const STATUS_INVALID_FRAME: i32 = -4;
pub const STATUS_INVALID_PATH: i32 = -5;
pub const STATUS_PANIC: i32 = -6;

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("required argument `{0}` is null")]
    NullArgument(&'static str),

    #[error("context handle is invalid or has been destroyed")]
    InvalidHandle,

    #[error("no model loaded; call load before interpolating")]
    ModelNotLoaded,

    #[error("invalid model path: {0}")]
    InvalidPath(String),

    #[error("model directory not found: {}", .0.display())]
    ModelDirNotFound(PathBuf),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("frame shape mismatch: {left} vs {right}")]
    ShapeMismatch { left: String, right: String },

    #[error("inference engine could not be created")]
    CreateFailed,

    #[error("inference engine returned status {status}")]
    Engine { status: i32 },

    #[error("panic at the API boundary: {0}")]
    Panic(String),
}

impl BridgeError {
    /// Integer status reported across the C boundary.
    pub fn status(&self) -> i32 {
        match self {
            Self::NullArgument(_) => STATUS_NULL_ARGUMENT,
            Self::InvalidHandle | Self::CreateFailed => STATUS_INVALID_HANDLE,
            Self::ModelNotLoaded => STATUS_MODEL_NOT_LOADED,
            Self::InvalidFrame(_) | Self::ShapeMismatch { .. } => STATUS_INVALID_FRAME,
            Self::InvalidPath(_) | Self::ModelDirNotFound(_) => STATUS_INVALID_PATH,
            Self::Engine { status } => *status,
            Self::Panic(_) => STATUS_PANIC,
        }
    }

    /// True when the failure was detected locally, before the engine was involved.
    pub fn is_precondition(&self) -> bool {
        !matches!(self, Self::Engine { .. })
    }
}
