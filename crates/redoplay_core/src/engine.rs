//! The replay engine.
//!
//! Pipeline, one segment at a time in catalog order:
//!
//! ```text
//! SegmentReader -> SegmentDecoder -> RangeFilter -> EntityRemap -> Dispatcher
//!                                                                   ├─ inline (global, sequential)
//!                                                                   └─ WorkerPool (entity units)
//! ```

use crate::catalog::Segment;
use crate::config::{RecoveryConfig, ReplayConfig};
use crate::controller::{Decision, FailureController, ReplayOutcome, ReplaySummary};
use crate::decoder::{DecodeStats, SegmentDecoder};
use crate::dispatcher::Dispatcher;
use crate::error::CoreResult;
use crate::filter::{EntityRemap, RangeFilter, RangePredicate};
use crate::recovery::{recover_uncommitted, RecoveryReport};
use crate::store::{ExitProcess, HaltPolicy, MailboxStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Replays committed operations from redo log segments into a store.
///
/// # Example
///
/// ```rust,ignore
/// use redoplay_core::{ReplayConfig, ReplayEngine, SegmentCatalog};
///
/// let config = ReplayConfig::new().worker_count(8);
/// let segments = SegmentCatalog::select(archive_dir, Some(active_log), &config)?;
/// let outcome = ReplayEngine::new(config, store).run(&segments)?;
/// println!("applied {}", outcome.summary().units_applied);
/// ```
pub struct ReplayEngine {
    config: ReplayConfig,
    store: Arc<dyn MailboxStore>,
    halt: Arc<dyn HaltPolicy>,
}

impl ReplayEngine {
    /// Creates an engine that halts the process on resource exhaustion.
    pub fn new(config: ReplayConfig, store: Arc<dyn MailboxStore>) -> Self {
        Self {
            config,
            store,
            halt: Arc::new(ExitProcess),
        }
    }

    /// Replaces the halt policy.
    #[must_use]
    pub fn with_halt_policy(mut self, halt: Arc<dyn HaltPolicy>) -> Self {
        self.halt = halt;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Replays `segments` in the given order.
    ///
    /// Recoverable errors are logged and counted unless the configuration
    /// stops on error, in which case they abort the run like fatal errors.
    /// An aborted run still joins every worker before returning.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an inconsistent configuration, an error if
    /// the worker pool cannot start, and `ResourceExhausted` if the halt
    /// policy returned instead of halting.
    pub fn run(&self, segments: &[Segment]) -> CoreResult<ReplayOutcome> {
        self.config.validate()?;

        let controller = Arc::new(FailureController::new(
            self.config.stop_on_error,
            Arc::clone(&self.halt),
        ));
        let mut dispatcher =
            Dispatcher::for_config(&self.config, Arc::clone(&self.store), Arc::clone(&controller))?;
        let predicate = RangePredicate::from_config(&self.config);

        let mut summary = ReplaySummary::default();
        for segment in segments {
            if controller.is_aborting() {
                break;
            }
            info!(
                segment = %segment.sequence(),
                path = %segment.path().display(),
                open = segment.is_open(),
                "replaying segment"
            );
            let decoder = match SegmentDecoder::open(segment) {
                Ok(decoder) => decoder,
                Err(e) => {
                    controller.report(e);
                    break;
                }
            };
            let mut units = EntityRemap::new(
                RangeFilter::new(decoder, predicate.clone()),
                self.config.entity_remap,
            );

            for item in units.by_ref() {
                let decision = match item {
                    Ok(unit) => dispatcher.dispatch(unit),
                    Err(e) => controller.report(e),
                };
                if decision == Decision::Stop || controller.is_aborting() {
                    break;
                }
            }

            let filter = units.get_ref();
            summary.units_filtered += filter.filtered();
            summary.decode.merge(filter.get_ref().stats());
            summary.segments_replayed += 1;
        }

        if !controller.is_aborting() {
            controller.begin_drain();
        }
        let report = dispatcher.finish();
        controller.stop();

        if let Some(error) = controller.take_halt() {
            return Err(error);
        }

        summary.units_dispatched = report.dispatched;
        summary.units_applied = report.applied;
        summary.errors_seen = controller.errors_seen();
        log_summary(&summary);

        Ok(match controller.take_failure() {
            Some(error) => {
                warn!(%error, "replay aborted");
                ReplayOutcome::Aborted { error, summary }
            }
            None => ReplayOutcome::Completed(summary),
        })
    }

    /// Re-applies the transactions left uncommitted in `segment`.
    ///
    /// See [`recover_uncommitted`].
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be read or the store runs out
    /// of resources.
    pub fn recover(&self, segment: &Segment, recovery: RecoveryConfig) -> CoreResult<RecoveryReport> {
        recover_uncommitted(
            segment,
            self.store.as_ref(),
            &self.config,
            recovery,
            self.halt.as_ref(),
        )
    }
}

fn log_summary(summary: &ReplaySummary) {
    let DecodeStats {
        orphan_markers,
        unresolved_transactions,
        corrupt_records,
        ..
    } = summary.decode;
    info!(
        segments = summary.segments_replayed,
        dispatched = summary.units_dispatched,
        applied = summary.units_applied,
        filtered = summary.units_filtered,
        errors = summary.errors_seen,
        corrupt_records,
        orphan_markers,
        unresolved_transactions,
        "replay finished"
    );
}
