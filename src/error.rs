//! Error types for host-side virtual SCSI operations
//!
//! Guest-visible protocol errors never show up here; those travel as sense
//! data on the completed request.

use thiserror::Error;

/// Virtual SCSI errors
#[derive(Debug, Error)]
pub enum VscsiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("LUN initialization failed: {0}")]
    LunInit(String),

    #[error("Unknown LUN type: {0}")]
    UnknownLunType(String),

    #[error("LUN {0} is not attached")]
    LunNotFound(u32),

    #[error("LUN {0} is already attached")]
    LunExists(u32),

    #[error("LUN {0} is busy")]
    LunBusy(u32),

    #[error("I/O request aborted: {0}")]
    Aborted(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for virtual SCSI operations
pub type VscsiResult<T> = Result<T, VscsiError>;
