//! The mailbox-store capability and the process halt policy.
//!
//! Replay knows nothing about what an operation does. It hands every
//! committed unit to a [`MailboxStore`] supplied by the embedding
//! application, and routes resource exhaustion to a [`HaltPolicy`].

use crate::error::CoreError;
use crate::unit::ReplayUnit;
use thiserror::Error;
use tracing::error;

/// Exit code used when the process halts on resource exhaustion.
pub const HALT_EXIT_CODE: i32 = 3;

/// Failure reported by a mailbox store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// The operation could not be applied; replay may continue.
    #[error("{0}")]
    Failed(String),

    /// Memory or another process-wide resource ran out.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl ApplyError {
    /// Creates a failed error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Converts into the engine error for `unit`.
    #[must_use]
    pub fn into_core(self, unit: &ReplayUnit) -> CoreError {
        match self {
            Self::Failed(message) => CoreError::ApplyFailed {
                txid: unit.txid,
                entity: unit.entity(),
                message,
            },
            Self::ResourceExhausted(message) => CoreError::resource_exhausted(format!(
                "{message} (while applying {} to {})",
                unit.txid, unit.scope
            )),
        }
    }
}

/// Applies replayed operations.
///
/// `apply` is called from worker threads, but never concurrently for the
/// same entity. `apply_global` is called on the dispatch thread.
pub trait MailboxStore: Send + Sync {
    /// Applies an entity-scoped unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    fn apply(&self, unit: &ReplayUnit) -> Result<(), ApplyError>;

    /// Applies a global unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    fn apply_global(&self, unit: &ReplayUnit) -> Result<(), ApplyError>;
}

/// What to do when a resource-exhaustion error is raised.
pub trait HaltPolicy: Send + Sync {
    /// Halts the process.
    ///
    /// Implementations that return (tests) make the run fail with the
    /// error instead of producing an outcome.
    fn halt(&self, error: &CoreError);
}

/// Halt policy terminating the process with [`HALT_EXIT_CODE`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitProcess;

impl HaltPolicy for ExitProcess {
    fn halt(&self, error: &CoreError) {
        error!(%error, "halting process");
        std::process::exit(HALT_EXIT_CODE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityId, SequenceNumber, TransactionId};
    use crate::unit::Scope;

    #[test]
    fn into_core_keeps_context() {
        let unit = ReplayUnit {
            txid: TransactionId::new(5),
            scope: Scope::Entity(EntityId::new(9)),
            timestamp: 1,
            payload: Vec::new(),
            segment: SequenceNumber::new(1),
        };

        let err = ApplyError::failed("folder missing").into_core(&unit);
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "apply failed for txn:5 (entity:9): folder missing"
        );

        let err = ApplyError::ResourceExhausted("heap".into()).into_core(&unit);
        assert!(matches!(err, CoreError::ResourceExhausted { .. }));
        assert!(err.to_string().contains("txn:5"));
    }
}
