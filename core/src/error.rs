/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use thiserror::Error;

use crate::device::SessionState;

pub type Result<T> = std::result::Result<T, Error>;

/// Transport-level failures. These carry no device status code, only the
/// condition the link itself reported.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("read timed out")]
    Timeout,
    #[error("device disconnected")]
    Disconnected,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Security gates raised by the target or by the stage-1 status range
/// 0x1D00..=0x1D0D.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("serial link authentication required")]
    SlaRequired,
    #[error("serial link authentication failed, no accepted key")]
    SlaFailed,
    #[error("secure boot check rejected the unsigned download agent")]
    SbcBlocked,
    #[error("download agent authentication rejected the payload")]
    DaaBlocked,
    #[error("memory access blocked by target authentication")]
    MemAuthBlocked,
    #[error("security rejection, status 0x{code:04X}")]
    Rejected { code: u16 },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no download agent matches hw_code 0x{hw_code:04X}")]
    NoMatchingDa { hw_code: u16 },
    #[error("corrupt download agent blob: {0}")]
    CorruptDaBlob(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no valid GPT found: {0}")]
    GptInvalid(String),
    #[error("partition '{name}' not found")]
    PartitionNotFound { name: String },
    #[error("data size {data} exceeds partition size {partition}")]
    SizeExceedsPartition { data: u64, partition: u64 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("handshake failed after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },

    /// Non-zero device status, preserved bit-exactly for log correlation.
    #[error("device returned status 0x{code:08X}")]
    Protocol { code: u32 },

    #[error("security: {0}")]
    Security(#[from] SecurityError),

    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid session state: expected {expected}, actual {actual}")]
    InvalidState { expected: SessionState, actual: SessionState },

    /// A chunked write that died mid-flight. `offset` is the first byte the
    /// device has not acknowledged; nothing before it is rolled back.
    #[error("write failed at byte offset {offset}: {source}")]
    PartialWrite { offset: u64, source: Box<Error> },

    #[error("operation '{op}' is not supported by the active protocol")]
    Unsupported { op: &'static str },

    /// Structurally invalid device payload (bad frame, bad XML, bad length).
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl Error {
    pub fn proto(code: u32) -> Self {
        Error::Protocol { code }
    }

    /// Exit-status contract with the CLI collaborator.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Cancelled => 1,
            Error::Transport(_) => 2,
            Error::Security(_) => 4,
            Error::Storage(_) => 5,
            Error::PartialWrite { source, .. } => source.exit_code(),
            _ => 3,
        }
    }

    /// Stable tag used by the event channel.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::HandshakeFailed { .. } => "handshake_failed",
            Error::Protocol { .. } => "protocol",
            Error::Security(_) => "security",
            Error::Catalog(_) => "catalog",
            Error::Storage(_) => "storage",
            Error::Cancelled => "cancelled",
            Error::InvalidState { .. } => "invalid_state",
            Error::PartialWrite { .. } => "partial_write",
            Error::Unsupported { .. } => "unsupported",
            Error::Malformed(_) => "protocol",
        }
    }
}
