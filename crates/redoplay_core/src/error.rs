//! Error types for the replay engine.

use crate::types::{EntityId, SequenceNumber, TransactionId};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// How the failure controller treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Skip the offending record or unit and continue, unless the run is
    /// configured to stop on error.
    Recoverable,
    /// Abort the whole run regardless of configuration.
    Fatal,
    /// Halt the process; no outcome is returned.
    Halt,
}

/// Errors raised while selecting, decoding, or replaying redo log segments.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] redoplay_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A selected segment could not be opened or its header is invalid.
    #[error("segment unreadable: {}: {reason}", path.display())]
    SegmentUnreadable {
        /// Path of the segment file.
        path: PathBuf,
        /// Why the segment could not be read.
        reason: String,
    },

    /// A record inside a segment is malformed.
    #[error("corrupt record in segment {sequence} at offset {offset}: {message}")]
    CorruptRecord {
        /// Sequence of the segment containing the record.
        sequence: SequenceNumber,
        /// Byte offset of the record within the segment.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// The mailbox store failed to apply a replayed unit.
    #[error("apply failed for {txid} ({}): {message}", entity_label(*entity))]
    ApplyFailed {
        /// Transaction that produced the unit.
        txid: TransactionId,
        /// Entity the unit targets, or `None` for a global unit.
        entity: Option<EntityId>,
        /// Error reported by the store.
        message: String,
    },

    /// Memory or another process-wide resource ran out.
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// Description of the exhausted resource.
        message: String,
    },

    /// The replay configuration is inconsistent.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A worker thread panicked.
    #[error("replay worker {worker} panicked")]
    WorkerPanicked {
        /// Index of the worker.
        worker: usize,
    },

    /// A worker stopped accepting units before the dispatcher finished.
    #[error("replay worker {worker} stopped accepting units")]
    WorkerDisconnected {
        /// Index of the worker.
        worker: usize,
    },
}

fn entity_label(entity: Option<EntityId>) -> String {
    match entity {
        Some(id) => id.to_string(),
        None => "global".to_string(),
    }
}

impl CoreError {
    /// Creates a segment unreadable error.
    pub fn segment_unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::SegmentUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a corrupt record error.
    pub fn corrupt_record(
        sequence: SequenceNumber,
        offset: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::CorruptRecord {
            sequence,
            offset,
            message: message.into(),
        }
    }

    /// Creates a resource exhausted error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Classifies the error for the failure controller.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::CorruptRecord { .. } | Self::ApplyFailed { .. } => ErrorClass::Recoverable,
            Self::ResourceExhausted { .. } => ErrorClass::Halt,
            _ => ErrorClass::Fatal,
        }
    }

    /// Returns true if the error may be skipped when not stopping on error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Recoverable
    }
}
