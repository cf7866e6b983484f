//! Typed RPC failures.
//!
//! Every RPC handler returns `Result<_, RpcError>`; the dispatcher turns
//! the error into an [`ExecutedCall`](super::messages::ExecutedCall) so a
//! failure is always a reply, never a dropped frame or a dead session. The
//! code set is closed; the backend matches on the numbers.

use thiserror::Error;

/// Stable numeric codes sent in the `error` field of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Unexpected failure inside the agent; the catch-all.
    Internal = 1,
    /// The rig cannot service the call (pending state, unsupported
    /// method or level, power-mode restrictions).
    UnableToHandle = 2,
    /// Payment address failed validation.
    InvalidUsername = 3,
    /// Worker name failed validation.
    InvalidWorker = 4,
    /// The requested change is already in effect.
    Redundant = 5,
    /// No device with the given id.
    NonExistentDevice = 6,
    /// The targeted device is disabled.
    DisabledDevice = 7,
}

impl ErrorCode {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RpcError {
    pub message: String,
    pub code: ErrorCode,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    pub fn redundant(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Redundant, message)
    }

    pub fn unable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnableToHandle, message)
    }

    pub fn non_existent_device() -> Self {
        Self::new(ErrorCode::NonExistentDevice, "Device not found")
    }

    pub fn disabled_device(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DisabledDevice, message)
    }

    pub fn internal() -> Self {
        Self::new(ErrorCode::Internal, "Internal rig agent error")
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
