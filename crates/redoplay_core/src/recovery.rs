//! Crash recovery of uncommitted transactions.
//!
//! After a crash the active segment ends with transactions that were
//! started but never resolved. Recovery scans that segment without
//! replaying anything committed, then redoes each unresolved operation in
//! log order. The caller appends a commit or abort marker for every entry
//! of the returned report.

use crate::catalog::Segment;
use crate::config::{RecoveryConfig, ReplayConfig};
use crate::decoder::{DecodeStats, PendingStart, SegmentDecoder};
use crate::error::CoreResult;
use crate::filter::RangePredicate;
use crate::store::{ApplyError, HaltPolicy, MailboxStore};
use crate::segment::{OperationRecord, SegmentWriter};
use crate::types::{SequenceNumber, Timestamp, TransactionId};
use crate::unit::{ReplayUnit, Scope};
use tracing::{error, info, warn};

/// How a redone transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The operation was applied; the log should record a commit.
    Committed,
    /// The operation failed; the log should record an abort.
    Aborted,
}

/// One transaction redone by recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredTransaction {
    /// Transaction ID.
    pub txid: TransactionId,
    /// Target of the operation.
    pub scope: Scope,
    /// Outcome of the redo.
    pub resolution: Resolution,
}

impl RecoveredTransaction {
    /// Returns the marker record closing this transaction at `timestamp`.
    #[must_use]
    pub fn marker(&self, timestamp: Timestamp) -> OperationRecord {
        match self.resolution {
            Resolution::Committed => OperationRecord::Commit {
                txid: self.txid,
                timestamp,
            },
            Resolution::Aborted => OperationRecord::Abort {
                txid: self.txid,
                timestamp,
            },
        }
    }
}

/// Result of recovering one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Segment that was scanned.
    pub segment: SequenceNumber,
    /// Redone transactions in log order.
    pub transactions: Vec<RecoveredTransaction>,
    /// Decoder counters of the scan.
    pub decode: DecodeStats,
}

impl RecoveryReport {
    /// Returns the transactions that were committed.
    pub fn committed(&self) -> impl Iterator<Item = &RecoveredTransaction> {
        self.transactions
            .iter()
            .filter(|t| t.resolution == Resolution::Committed)
    }

    /// Returns the transactions that were aborted.
    pub fn aborted(&self) -> impl Iterator<Item = &RecoveredTransaction> {
        self.transactions
            .iter()
            .filter(|t| t.resolution == Resolution::Aborted)
    }

    /// Appends one marker per redone transaction, all stamped `timestamp`,
    /// and flushes the segment.
    ///
    /// Returns the number of markers written.
    ///
    /// # Errors
    ///
    /// Returns an error if a marker cannot be appended or flushed.
    pub fn append_markers(
        &self,
        writer: &mut SegmentWriter,
        timestamp: Timestamp,
    ) -> CoreResult<usize> {
        for transaction in &self.transactions {
            writer.append(&transaction.marker(timestamp))?;
        }
        writer.flush()?;
        info!(
            segment = %self.segment,
            markers = self.transactions.len(),
            "recovery markers appended"
        );
        Ok(self.transactions.len())
    }
}

/// Redoes every transaction left uncommitted in `segment`.
///
/// Commits at or after `recovery.ignore_commits_at_or_after` count as not
/// yet committed. Global operations go through `apply_global`. A failed
/// apply is logged and reported as aborted; corrupt records are skipped
/// with a warning. The entity filter of `config` restricts which entity
/// operations are redone; global operations are always redone.
///
/// # Errors
///
/// Returns an error if the segment cannot be read, and `ResourceExhausted`
/// if the store ran out of resources and `halt` returned.
pub fn recover_uncommitted(
    segment: &Segment,
    store: &dyn MailboxStore,
    config: &ReplayConfig,
    recovery: RecoveryConfig,
    halt: &dyn HaltPolicy,
) -> CoreResult<RecoveryReport> {
    let mut decoder = SegmentDecoder::open(segment)?
        .ignore_commits_at_or_after(recovery.ignore_commits_at_or_after)
        .keep_unresolved();

    for item in decoder.by_ref() {
        match item {
            Ok(_) => {}
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "skipping record during recovery scan");
            }
            Err(e) => return Err(e),
        }
    }

    let sequence = decoder.sequence();
    let decode = *decoder.stats();
    let predicate = RangePredicate::new(i64::MIN, i64::MAX, config.entity_filter.clone());
    let pending = decoder.into_pending();
    info!(segment = %sequence, pending = pending.len(), "redoing uncommitted transactions");

    let mut transactions = Vec::with_capacity(pending.len());
    for start in pending {
        let unit = pending_unit(start, sequence);
        if !predicate.matches(&unit) {
            continue;
        }
        let result = if unit.is_global() {
            store.apply_global(&unit)
        } else {
            store.apply(&unit)
        };
        let resolution = match result {
            Ok(()) => Resolution::Committed,
            Err(ApplyError::Failed(message)) => {
                error!(
                    segment = %sequence,
                    txid = %unit.txid,
                    scope = %unit.scope,
                    %message,
                    "redo of uncommitted transaction failed, aborting it"
                );
                Resolution::Aborted
            }
            Err(e @ ApplyError::ResourceExhausted(_)) => {
                let error = e.into_core(&unit);
                halt.halt(&error);
                return Err(error);
            }
        };
        transactions.push(RecoveredTransaction {
            txid: unit.txid,
            scope: unit.scope,
            resolution,
        });
    }

    Ok(RecoveryReport {
        segment: sequence,
        transactions,
        decode,
    })
}

fn pending_unit(start: PendingStart, segment: SequenceNumber) -> ReplayUnit {
    ReplayUnit {
        txid: start.txid,
        scope: start.scope,
        timestamp: start.timestamp,
        payload: start.payload,
        segment,
    }
}
