//! Two-phase decoding of one segment.
//!
//! The decoder pairs every `Start` with its later `Commit` or `Abort` and
//! yields only committed operations, in commit order. Pending state is scoped
//! to one segment: a transaction must resolve in the segment it started in.

use crate::catalog::Segment;
use crate::error::{CoreError, CoreResult};
use crate::segment::{OperationRecord, SegmentReader};
use crate::types::{SequenceNumber, Timestamp, TransactionId};
use crate::unit::{ReplayUnit, Scope};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// Counters collected while decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Records read successfully.
    pub records_read: u64,
    /// Units emitted on commit.
    pub units_committed: u64,
    /// Transactions discarded by an abort.
    pub transactions_aborted: u64,
    /// Transactions still pending when their segment ended.
    pub unresolved_transactions: u64,
    /// Commit or abort records without a pending start.
    pub orphan_markers: u64,
    /// Checkpoints whose active set disagreed with the pending set.
    pub checkpoint_discrepancies: u64,
    /// Records skipped as corrupt.
    pub corrupt_records: u64,
    /// Commits treated as uncommitted by a recovery look-back window.
    pub ignored_commits: u64,
    /// Torn bytes at the end of open segments.
    pub junk_bytes: u64,
}

impl DecodeStats {
    /// Adds `other` into `self`.
    pub fn merge(&mut self, other: &Self) {
        self.records_read += other.records_read;
        self.units_committed += other.units_committed;
        self.transactions_aborted += other.transactions_aborted;
        self.unresolved_transactions += other.unresolved_transactions;
        self.orphan_markers += other.orphan_markers;
        self.checkpoint_discrepancies += other.checkpoint_discrepancies;
        self.corrupt_records += other.corrupt_records;
        self.ignored_commits += other.ignored_commits;
        self.junk_bytes += other.junk_bytes;
    }
}

/// A `Start` record waiting for its commit or abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStart {
    /// Transaction ID.
    pub txid: TransactionId,
    /// Target of the operation.
    pub scope: Scope,
    /// Time the operation was prepared.
    pub timestamp: Timestamp,
    /// Opaque serialized operation.
    pub payload: Vec<u8>,
    /// Offset of the `Start` record in its segment.
    pub offset: u64,
}

/// Streams the committed units of one segment.
pub struct SegmentDecoder {
    reader: SegmentReader,
    sequence: SequenceNumber,
    pending: HashMap<TransactionId, PendingStart>,
    orphans: HashSet<TransactionId>,
    ignore_commits_at_or_after: Timestamp,
    warn_unresolved: bool,
    stats: DecodeStats,
    finished: bool,
}

impl SegmentDecoder {
    /// Creates a decoder with fresh pending state.
    #[must_use]
    pub fn new(reader: SegmentReader) -> Self {
        let sequence = reader.header().sequence;
        Self {
            reader,
            sequence,
            pending: HashMap::new(),
            orphans: HashSet::new(),
            ignore_commits_at_or_after: Timestamp::MAX,
            warn_unresolved: true,
            stats: DecodeStats::default(),
            finished: false,
        }
    }

    /// Opens a decoder over a selected segment.
    ///
    /// # Errors
    ///
    /// Returns `SegmentUnreadable` if the segment can no longer be opened.
    pub fn open(segment: &Segment) -> CoreResult<Self> {
        Ok(Self::new(segment.open_reader()?))
    }

    /// Leaves commits at or after `timestamp` unresolved.
    #[must_use]
    pub fn ignore_commits_at_or_after(mut self, timestamp: Timestamp) -> Self {
        self.ignore_commits_at_or_after = timestamp;
        self
    }

    /// Keeps transactions still pending at the end of the segment for
    /// [`into_pending`](Self::into_pending) instead of warning about them.
    #[must_use]
    pub fn keep_unresolved(mut self) -> Self {
        self.warn_unresolved = false;
        self
    }

    /// Returns the sequence of the segment being decoded.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Returns the counters collected so far.
    #[must_use]
    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Returns the number of transactions currently pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Consumes the decoder, returning pending starts in log order.
    #[must_use]
    pub fn into_pending(self) -> Vec<PendingStart> {
        let mut pending: Vec<_> = self.pending.into_values().collect();
        pending.sort_by_key(|p| p.offset);
        pending
    }

    fn on_record(&mut self, offset: u64, record: OperationRecord) -> Option<ReplayUnit> {
        self.stats.records_read += 1;
        match record {
            OperationRecord::Start {
                txid,
                timestamp,
                entity,
                payload,
            } => {
                if self.orphans.remove(&txid) {
                    error!(
                        segment = %self.sequence,
                        %txid,
                        offset,
                        "start record found after its commit/abort record"
                    );
                }
                let start = PendingStart {
                    txid,
                    scope: Scope::from(entity),
                    timestamp,
                    payload,
                    offset,
                };
                if let Some(previous) = self.pending.insert(txid, start) {
                    warn!(
                        segment = %self.sequence,
                        %txid,
                        previous_offset = previous.offset,
                        "duplicate start record, replacing pending operation"
                    );
                }
                None
            }
            OperationRecord::Commit { txid, timestamp } => {
                if timestamp >= self.ignore_commits_at_or_after {
                    self.stats.ignored_commits += 1;
                    debug!(segment = %self.sequence, %txid, timestamp, "commit inside look-back window, leaving pending");
                    return None;
                }
                let start = self.resolve(txid, offset, "commit")?;
                self.stats.units_committed += 1;
                Some(ReplayUnit {
                    txid,
                    scope: start.scope,
                    timestamp,
                    payload: start.payload,
                    segment: self.sequence,
                })
            }
            OperationRecord::Abort { txid, .. } => {
                if self.resolve(txid, offset, "abort").is_some() {
                    self.stats.transactions_aborted += 1;
                }
                None
            }
            OperationRecord::Checkpoint { timestamp, active } => {
                self.check_checkpoint(timestamp, &active);
                None
            }
        }
    }

    fn resolve(&mut self, txid: TransactionId, offset: u64, marker: &str) -> Option<PendingStart> {
        let start = self.pending.remove(&txid);
        if start.is_none() {
            self.stats.orphan_markers += 1;
            error!(
                segment = %self.sequence,
                %txid,
                offset,
                marker,
                "commit/abort record without a preceding start record"
            );
            if !self.orphans.insert(txid) {
                error!(segment = %self.sequence, %txid, "repeated orphan {marker} record");
            }
        }
        start
    }

    fn check_checkpoint(&mut self, timestamp: Timestamp, active: &[TransactionId]) {
        let matches = active.len() == self.pending.len()
            && active.iter().all(|txid| self.pending.contains_key(txid));
        if matches {
            return;
        }
        self.stats.checkpoint_discrepancies += 1;
        info!(
            segment = %self.sequence,
            timestamp,
            pending = self.pending.len(),
            checkpoint = active.len(),
            "checkpoint discrepancy"
        );
        if tracing::enabled!(tracing::Level::DEBUG) {
            let mut pending: Vec<_> = self.pending.keys().map(|t| t.as_u64()).collect();
            pending.sort_unstable();
            let listed: Vec<_> = active.iter().map(|t| t.as_u64()).collect();
            debug!(segment = %self.sequence, ?pending, checkpoint = ?listed, "checkpoint transaction sets");
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.stats.junk_bytes += self.reader.junk_bytes();
        self.stats.unresolved_transactions += self.pending.len() as u64;
        if self.warn_unresolved && !self.pending.is_empty() {
            let mut unresolved: Vec<_> = self.pending.values().collect();
            unresolved.sort_by_key(|p| p.offset);
            for start in unresolved {
                warn!(
                    segment = %self.sequence,
                    txid = %start.txid,
                    scope = %start.scope,
                    "transaction never committed, discarding"
                );
            }
        }
        debug!(segment = %self.sequence, stats = ?self.stats, "segment decoded");
    }
}

impl Iterator for SegmentDecoder {
    type Item = CoreResult<ReplayUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.reader.next() {
                Some(Ok((offset, record))) => {
                    if let Some(unit) = self.on_record(offset, record) {
                        return Some(Ok(unit));
                    }
                }
                Some(Err(e)) => {
                    if matches!(e, CoreError::CorruptRecord { .. }) {
                        self.stats.corrupt_records += 1;
                    } else {
                        self.finished = true;
                    }
                    return Some(Err(e));
                }
                None => self.finish(),
            }
        }
        None
    }
}
