//! Segment fixtures.
//!
//! Builds record sequences and writes them as segment files in a temporary
//! directory laid out like a real redo log directory.

use redoplay_core::catalog::archive_file_name;
use redoplay_core::{
    EntityId, OperationRecord, RecoveryReport, ReplayConfig, Segment, SegmentCatalog,
    SegmentWriter, SequenceNumber, Timestamp, TransactionId,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builds a list of records with an advancing clock.
///
/// Every record gets the current clock value, then the clock advances by
/// one millisecond.
#[derive(Debug, Clone)]
pub struct LogBuilder {
    records: Vec<OperationRecord>,
    clock: Timestamp,
}

impl LogBuilder {
    /// Creates an empty builder with the clock at 1.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            clock: 1,
        }
    }

    /// Moves the clock to `timestamp`.
    #[must_use]
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.clock = timestamp;
        self
    }

    fn tick(&mut self) -> Timestamp {
        let now = self.clock;
        self.clock += 1;
        now
    }

    /// Appends a `Start` with a payload naming the transaction.
    #[must_use]
    pub fn start(self, txid: u64, entity: Option<u64>) -> Self {
        let payload = format!("op-{txid}").into_bytes();
        self.start_with(txid, entity, payload)
    }

    /// Appends a `Start` with an explicit payload.
    #[must_use]
    pub fn start_with(mut self, txid: u64, entity: Option<u64>, payload: Vec<u8>) -> Self {
        let timestamp = self.tick();
        self.records.push(OperationRecord::Start {
            txid: TransactionId::new(txid),
            timestamp,
            entity: entity.map(EntityId::new),
            payload,
        });
        self
    }

    /// Appends a `Commit`.
    #[must_use]
    pub fn commit(mut self, txid: u64) -> Self {
        let timestamp = self.tick();
        self.records.push(OperationRecord::Commit {
            txid: TransactionId::new(txid),
            timestamp,
        });
        self
    }

    /// Appends an `Abort`.
    #[must_use]
    pub fn abort(mut self, txid: u64) -> Self {
        let timestamp = self.tick();
        self.records.push(OperationRecord::Abort {
            txid: TransactionId::new(txid),
            timestamp,
        });
        self
    }

    /// Appends a `Checkpoint` listing `active`.
    #[must_use]
    pub fn checkpoint(mut self, active: &[u64]) -> Self {
        let timestamp = self.tick();
        self.records.push(OperationRecord::Checkpoint {
            timestamp,
            active: active.iter().copied().map(TransactionId::new).collect(),
        });
        self
    }

    /// Appends a `Start` immediately followed by its `Commit`.
    #[must_use]
    pub fn committed(self, txid: u64, entity: Option<u64>) -> Self {
        self.start(txid, entity).commit(txid)
    }

    /// Returns the records.
    pub fn build(self) -> Vec<OperationRecord> {
        self.records
    }
}

impl Default for LogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A temporary redo log directory.
///
/// ```text
/// <tmp>/
/// ├─ archive/redo-<seq>.log   # sealed segments
/// └─ redo.log                 # active segment
/// ```
pub struct SegmentFixture {
    dir: TempDir,
}

impl SegmentFixture {
    /// Creates an empty fixture directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Returns the fixture root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the archive directory path.
    pub fn archive_dir(&self) -> PathBuf {
        self.root().join("archive")
    }

    /// Returns the active segment path.
    pub fn active_path(&self) -> PathBuf {
        self.root().join("redo.log")
    }

    /// Writes a sealed archive segment.
    pub fn archive(&self, sequence: u64, records: &[OperationRecord]) -> PathBuf {
        let path = self
            .archive_dir()
            .join(archive_file_name(SequenceNumber::new(sequence)));
        write_segment(&path, sequence, records, true, &[]);
        path
    }

    /// Writes the open active segment.
    pub fn active(&self, sequence: u64, records: &[OperationRecord]) -> PathBuf {
        let path = self.active_path();
        write_segment(&path, sequence, records, false, &[]);
        path
    }

    /// Writes the open active segment followed by raw trailing bytes, as
    /// left by a crash in the middle of an append.
    pub fn active_with_tail(&self, sequence: u64, records: &[OperationRecord], tail: &[u8]) -> PathBuf {
        let path = self.active_path();
        write_segment(&path, sequence, records, false, tail);
        path
    }

    /// Writes a segment at `name` under the fixture root.
    pub fn file(&self, name: &str, sequence: u64, records: &[OperationRecord], sealed: bool) -> PathBuf {
        let path = self.root().join(name);
        write_segment(&path, sequence, records, sealed, &[]);
        path
    }

    /// Appends the markers of a recovery report to the active segment, the
    /// way the log-writing side closes redone transactions.
    pub fn close_recovered(&self, report: &RecoveryReport, timestamp: Timestamp) -> usize {
        let mut writer =
            SegmentWriter::resume_file(&self.active_path()).expect("Failed to resume active segment");
        report
            .append_markers(&mut writer, timestamp)
            .expect("Failed to append recovery markers")
    }

    /// Selects segments from the archive directory and active segment.
    pub fn select(&self, config: &ReplayConfig) -> Vec<Segment> {
        SegmentCatalog::select(&self.archive_dir(), Some(&self.active_path()), config)
            .expect("Failed to select segments")
    }
}

impl Default for SegmentFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes one segment file.
pub fn write_segment(path: &Path, sequence: u64, records: &[OperationRecord], sealed: bool, tail: &[u8]) {
    let mut writer = SegmentWriter::create_file(path, SequenceNumber::new(sequence))
        .expect("Failed to create segment");
    for record in records {
        writer.append(record).expect("Failed to append record");
    }
    if !tail.is_empty() {
        writer.append_raw(tail).expect("Failed to append tail");
    }
    if sealed {
        writer.seal().expect("Failed to seal segment");
    }
    writer.flush().expect("Failed to flush segment");
}
