//! Error types for weavesync.
//!
//! `SyncError` is the crate-wide error. `UploadError` is the narrower
//! taxonomy produced by the chunk uploader; it is classified as fatal or
//! retriable so the orchestration layer can decide what happens to the
//! entity that was being uploaded.

use crate::ledger::client::RequestError;
use crate::ledger::TxId;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Store error: {0}")]
    Store(#[from] fjall::Error),

    #[error("Corrupt store record: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] ignore::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Ledger request failed: {0}")]
    Request(#[from] RequestError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("{path} is no longer present locally")]
    StaleEntity { path: PathBuf },

    #[error("Parent folder of {path} is not tracked yet")]
    MissingParent { path: PathBuf },

    #[error("Unknown drive {0}")]
    UnknownDrive(Uuid),

    #[error("Transaction {tx_id} was not confirmed within {minutes} minutes")]
    ConfirmationTimeout { tx_id: TxId, minutes: i64 },

    #[error("Malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("{capability} failed: {reason}")]
    Capability {
        capability: &'static str,
        reason: String,
    },
}

impl SyncError {
    pub fn capability(capability: &'static str, reason: impl Into<String>) -> Self {
        SyncError::Capability {
            capability,
            reason: reason.into(),
        }
    }

    pub fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        SyncError::Malformed {
            what,
            reason: reason.into(),
        }
    }
}

/// Error codes a gateway returns for requests that can never succeed.
pub const FATAL_CHUNK_ERRORS: &[&str] = &[
    "invalid_json",
    "chunk_too_big",
    "data_path_too_big",
    "offset_too_big",
    "data_size_too_big",
    "chunk_proof_ratio_not_attractive",
    "invalid_proof",
];

/// Failure of a single transaction upload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    /// The gateway rejected the request with a code that resending cannot fix.
    #[error("Gateway rejected {request} with fatal code `{code}`")]
    FatalProtocol { request: String, code: String },

    /// A single failed attempt that will be retried.
    #[error("Transient failure on {request}: {reason}")]
    Transient { request: String, reason: String },

    /// The shared error counter reached the configured maximum.
    #[error("Gave up after {errors} errors, last on {request}: {reason}")]
    BudgetExhausted {
        errors: u32,
        request: String,
        reason: String,
    },

    #[error("Upload is already complete")]
    AlreadyComplete,

    #[error("Chunk {index} is out of range for a transaction with {total} chunks")]
    ChunkOutOfRange { index: usize, total: usize },
}

impl UploadError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            UploadError::FatalProtocol { .. }
                | UploadError::BudgetExhausted { .. }
                | UploadError::ChunkOutOfRange { .. }
        )
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, UploadError::Transient { .. })
    }
}
