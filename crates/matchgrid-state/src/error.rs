//! Error types for the backfill state store.
//!
//! Errors fall into four categories ([`ErrorKind`]) that a service layer can
//! map onto its own status codes. Every error carries the operation that
//! produced it and, where there is one, the backfill id.

use thiserror::Error;

use crate::engine::EngineError;

/// Result type alias for state store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Public operations of [`crate::BackfillStore`], named in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateBackfill,
    GetBackfill,
    UpdateBackfill,
    DeleteBackfill,
    AcknowledgeBackfill,
    ListExpiredBackfillIds,
    IndexBackfill,
    DeindexBackfill,
    ListIndexedBackfills,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::CreateBackfill => "CreateBackfill",
            Operation::GetBackfill => "GetBackfill",
            Operation::UpdateBackfill => "UpdateBackfill",
            Operation::DeleteBackfill => "DeleteBackfill",
            Operation::AcknowledgeBackfill => "AcknowledgeBackfill",
            Operation::ListExpiredBackfillIds => "ListExpiredBackfillIds",
            Operation::IndexBackfill => "IndexBackfill",
            Operation::DeindexBackfill => "DeindexBackfill",
            Operation::ListIndexedBackfills => "ListIndexedBackfills",
        };
        f.write_str(name)
    }
}

/// Error category, independent of the underlying cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No storage connection could be obtained.
    Unavailable,
    /// Create collided with an existing id.
    AlreadyExists,
    /// The record is absent or empty.
    NotFound,
    /// Encoding, malformed stored data, or an unexpected storage failure.
    Internal,
}

/// Errors returned by [`crate::BackfillStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op}{}: failed to connect to storage: {source}", id_suffix(.id))]
    Unavailable {
        op: Operation,
        id: Option<String>,
        #[source]
        source: EngineError,
    },

    #[error("backfill already exists, id: {0}")]
    AlreadyExists(String),

    #[error("backfill not found, id: {0}")]
    NotFound(String),

    #[error("{op}{}: {cause}", id_suffix(.id))]
    Internal {
        op: Operation,
        id: Option<String>,
        #[source]
        cause: InternalCause,
    },
}

/// Underlying cause of an [`StoreError::Internal`].
#[derive(Debug, Error)]
pub enum InternalCause {
    #[error("storage command failed: {0}")]
    Engine(#[from] EngineError),

    #[error("failed to decode backfill record: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("stored record has no backfill")]
    MissingBackfill,

    #[error("invalid generation for backfill {id}: expected 8 bytes, found {len}")]
    InvalidGeneration { id: String, len: usize },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable { .. } => ErrorKind::Unavailable,
            StoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn unavailable(op: Operation, id: Option<&str>, source: EngineError) -> Self {
        StoreError::Unavailable {
            op,
            id: id.map(str::to_string),
            source,
        }
    }

    pub(crate) fn internal(op: Operation, id: Option<&str>, cause: impl Into<InternalCause>) -> Self {
        StoreError::Internal {
            op,
            id: id.map(str::to_string),
            cause: cause.into(),
        }
    }
}

fn id_suffix(id: &Option<String>) -> String {
    match id {
        Some(id) => format!(", id: {id}"),
        None => String::new(),
    }
}
