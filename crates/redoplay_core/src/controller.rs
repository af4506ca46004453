//! Failure and shutdown control.
//!
//! The controller is shared by the dispatch thread and every worker. It
//! classifies each raised error, decides whether the run continues, and
//! tracks the run through its states:
//!
//! ```text
//! Running ──> Draining ──> Stopped      stream exhausted
//!    │           │
//!    └──────> Aborting ──> Stopped      fatal error or stop-on-error trip
//! ```

use crate::decoder::DecodeStats;
use crate::error::{CoreError, ErrorClass};
use crate::store::HaltPolicy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// State of a replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Units are being dispatched.
    Running,
    /// The stream is exhausted; workers finish their queues.
    Draining,
    /// A failure stopped the run; workers drop their queues.
    Aborting,
    /// All workers have been joined.
    Stopped,
}

/// Whether the reporter of an error should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Skip the failed record or unit and continue.
    Continue,
    /// Stop consuming work.
    Stop,
}

/// Shared failure policy of one replay run.
pub struct FailureController {
    stop_on_error: bool,
    halt: Arc<dyn HaltPolicy>,
    state: Mutex<ControllerState>,
    aborting: AtomicBool,
    errors_seen: AtomicU64,
    failure: Mutex<Option<CoreError>>,
    halted: Mutex<Option<CoreError>>,
}

impl FailureController {
    /// Creates a controller in the `Running` state.
    pub fn new(stop_on_error: bool, halt: Arc<dyn HaltPolicy>) -> Self {
        Self {
            stop_on_error,
            halt,
            state: Mutex::new(ControllerState::Running),
            aborting: AtomicBool::new(false),
            errors_seen: AtomicU64::new(0),
            failure: Mutex::new(None),
            halted: Mutex::new(None),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ControllerState {
        *self.state.lock()
    }

    /// Returns true once the run is aborting.
    ///
    /// Workers check this before each unit; the dispatcher before each pull.
    pub fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::Acquire)
    }

    /// Returns the number of recoverable errors reported so far.
    pub fn errors_seen(&self) -> u64 {
        self.errors_seen.load(Ordering::Acquire)
    }

    /// Classifies `error` and decides whether the reporter continues.
    ///
    /// Recoverable errors are counted and logged; they stop the run only
    /// when stopping on error. Fatal errors always stop it. Resource
    /// exhaustion goes to the halt policy first.
    pub fn report(&self, error: CoreError) -> Decision {
        match error.class() {
            ErrorClass::Recoverable => {
                self.errors_seen.fetch_add(1, Ordering::AcqRel);
                if self.stop_on_error {
                    error!(%error, "stopping on error");
                    self.abort_with(error);
                    Decision::Stop
                } else {
                    warn!(%error, "ignoring error and moving on");
                    Decision::Continue
                }
            }
            ErrorClass::Fatal => {
                error!(%error, "aborting replay");
                self.abort_with(error);
                Decision::Stop
            }
            ErrorClass::Halt => {
                error!(%error, "resource exhausted, halting");
                self.halt.halt(&error);
                let mut halted = self.halted.lock();
                if halted.is_none() {
                    *halted = Some(error);
                }
                drop(halted);
                self.enter(ControllerState::Aborting);
                Decision::Stop
            }
        }
    }

    fn abort_with(&self, error: CoreError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(error);
        } else {
            debug!(%error, "additional failure while aborting");
        }
        drop(failure);
        self.enter(ControllerState::Aborting);
    }

    /// Moves to `Draining` when the stream ends normally.
    ///
    /// Has no effect once the run is aborting.
    pub fn begin_drain(&self) {
        self.enter(ControllerState::Draining);
    }

    /// Moves to `Stopped` after all workers are joined.
    pub fn stop(&self) {
        self.enter(ControllerState::Stopped);
    }

    fn enter(&self, next: ControllerState) {
        let mut state = self.state.lock();
        let current = *state;
        let allowed = matches!(
            (current, next),
            (ControllerState::Running, ControllerState::Draining)
                | (ControllerState::Running | ControllerState::Draining, ControllerState::Aborting)
                | (ControllerState::Draining | ControllerState::Aborting, ControllerState::Stopped)
        );
        if allowed {
            debug!(from = ?current, to = ?next, "replay state change");
            *state = next;
        }
        if next == ControllerState::Aborting {
            self.aborting.store(true, Ordering::Release);
        }
    }

    /// Takes the error that aborted the run, if any.
    pub fn take_failure(&self) -> Option<CoreError> {
        self.failure.lock().take()
    }

    /// Takes the resource-exhaustion error if the halt policy returned.
    pub fn take_halt(&self) -> Option<CoreError> {
        self.halted.lock().take()
    }
}

impl std::fmt::Debug for FailureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureController")
            .field("stop_on_error", &self.stop_on_error)
            .field("state", &self.state())
            .field("errors_seen", &self.errors_seen())
            .finish()
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Segments read, fully or until the run aborted.
    pub segments_replayed: u64,
    /// Units handed to the dispatcher.
    pub units_dispatched: u64,
    /// Units the store applied successfully.
    pub units_applied: u64,
    /// Units dropped by the range filter.
    pub units_filtered: u64,
    /// Recoverable errors seen.
    pub errors_seen: u64,
    /// Decoder counters across all segments.
    pub decode: DecodeStats,
}

/// Result of a replay run that did not halt.
#[derive(Debug)]
pub enum ReplayOutcome {
    /// Every selected segment was replayed.
    Completed(ReplaySummary),
    /// The run stopped early.
    Aborted {
        /// The error that stopped the run.
        error: CoreError,
        /// Progress made before stopping.
        summary: ReplaySummary,
    },
}

impl ReplayOutcome {
    /// Returns the run summary.
    #[must_use]
    pub fn summary(&self) -> &ReplaySummary {
        match self {
            Self::Completed(summary) | Self::Aborted { summary, .. } => summary,
        }
    }

    /// Returns true if the run completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns the process exit code for this outcome.
    ///
    /// `0` on a clean completion, `1` when aborted, `2` when `strict` and the
    /// run completed with recovered errors.
    #[must_use]
    pub fn exit_code(&self, strict: bool) -> i32 {
        match self {
            Self::Completed(summary) if strict && summary.errors_seen > 0 => 2,
            Self::Completed(_) => 0,
            Self::Aborted { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SequenceNumber, TransactionId};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingHalt(AtomicUsize);

    impl HaltPolicy for CountingHalt {
        fn halt(&self, _error: &CoreError) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn corrupt() -> CoreError {
        CoreError::corrupt_record(SequenceNumber::new(1), 38, "bad crc")
    }

    fn apply_failed() -> CoreError {
        CoreError::ApplyFailed {
            txid: TransactionId::new(3),
            entity: None,
            message: "boom".into(),
        }
    }

    #[test]
    fn recoverable_errors_continue() {
        let controller = FailureController::new(false, Arc::new(CountingHalt::default()));
        assert_eq!(controller.report(corrupt()), Decision::Continue);
        assert_eq!(controller.report(apply_failed()), Decision::Continue);
        assert_eq!(controller.errors_seen(), 2);
        assert!(!controller.is_aborting());

        controller.begin_drain();
        controller.stop();
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert!(controller.take_failure().is_none());
    }

    #[test]
    fn stop_on_error_keeps_first_failure() {
        let controller = FailureController::new(true, Arc::new(CountingHalt::default()));
        assert_eq!(controller.report(apply_failed()), Decision::Stop);
        assert_eq!(controller.report(corrupt()), Decision::Stop);
        assert!(controller.is_aborting());
        assert_eq!(controller.state(), ControllerState::Aborting);

        controller.begin_drain();
        assert_eq!(controller.state(), ControllerState::Aborting);
        controller.stop();
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert!(matches!(
            controller.take_failure(),
            Some(CoreError::ApplyFailed { .. })
        ));
    }

    #[test]
    fn fatal_error_aborts_regardless() {
        let controller = FailureController::new(false, Arc::new(CountingHalt::default()));
        let decision = controller.report(CoreError::WorkerPanicked { worker: 1 });
        assert_eq!(decision, Decision::Stop);
        assert!(controller.is_aborting());
        assert_eq!(controller.errors_seen(), 0);
    }

    #[test]
    fn exhaustion_goes_to_halt_policy() {
        let halt = Arc::new(CountingHalt::default());
        let controller = FailureController::new(false, halt.clone());
        assert_eq!(
            controller.report(CoreError::resource_exhausted("heap")),
            Decision::Stop
        );
        assert_eq!(halt.0.load(Ordering::SeqCst), 1);
        assert!(controller.is_aborting());
        assert!(controller.take_halt().is_some());
        assert!(controller.take_failure().is_none());
    }

    #[test]
    fn exit_codes() {
        let clean = ReplayOutcome::Completed(ReplaySummary::default());
        assert_eq!(clean.exit_code(true), 0);

        let noisy = ReplayOutcome::Completed(ReplaySummary {
            errors_seen: 1,
            ..ReplaySummary::default()
        });
        assert_eq!(noisy.exit_code(false), 0);
        assert_eq!(noisy.exit_code(true), 2);

        let aborted = ReplayOutcome::Aborted {
            error: corrupt(),
            summary: ReplaySummary::default(),
        };
        assert_eq!(aborted.exit_code(false), 1);
        assert!(!aborted.is_completed());
    }
}
