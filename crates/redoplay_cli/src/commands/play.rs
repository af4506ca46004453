//! Play command implementation.

use crate::selection::SelectionArgs;
use clap::Args;
use redoplay_core::{
    ApplyError, EntityId, MailboxStore, ReplayConfig, ReplayEngine, ReplayOutcome, ReplayUnit,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Flags of the `play` command.
#[derive(Debug, Args)]
pub struct PlayArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Replay the single selected entity into this entity instead
    #[arg(long, requires = "entity_id")]
    pub target_entity_id: Option<u64>,

    /// Abort on the first error; also makes recovered errors fail the exit code
    #[arg(long)]
    pub stop_on_error: bool,

    /// Number of worker threads
    #[arg(long, default_value_t = DEFAULT_WORKER_COUNT)]
    pub threads: usize,

    /// Capacity of each worker queue
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

impl PlayArgs {
    /// Builds the full replay configuration.
    pub fn config(&self) -> ReplayConfig {
        let mut config = self
            .selection
            .config()
            .worker_count(self.threads)
            .queue_capacity(self.queue_capacity)
            .stop_on_error(self.stop_on_error);
        if let Some(target) = self.target_entity_id {
            config = config.entity_remap(EntityId::new(target));
        }
        config
    }
}

/// Store that logs every unit instead of changing anything.
///
/// Applications embedding the engine supply their own store.
#[derive(Debug, Default)]
pub struct TracingStore {
    entity_units: AtomicU64,
    global_units: AtomicU64,
    payload_bytes: AtomicU64,
}

/// What a [`TracingStore`] saw during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreTotals {
    /// Entity-scoped units applied.
    pub entity_units: u64,
    /// Global units applied.
    pub global_units: u64,
    /// Sum of applied payload sizes.
    pub payload_bytes: u64,
}

impl TracingStore {
    /// Returns the counters collected so far.
    pub fn totals(&self) -> StoreTotals {
        StoreTotals {
            entity_units: self.entity_units.load(Ordering::Relaxed),
            global_units: self.global_units.load(Ordering::Relaxed),
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
        }
    }

    fn log(&self, unit: &ReplayUnit) {
        self.payload_bytes
            .fetch_add(unit.payload.len() as u64, Ordering::Relaxed);
        info!(
            segment = %unit.segment,
            txid = %unit.txid,
            scope = %unit.scope,
            timestamp = unit.timestamp,
            bytes = unit.payload.len(),
            "replay"
        );
    }
}

impl MailboxStore for TracingStore {
    fn apply(&self, unit: &ReplayUnit) -> Result<(), ApplyError> {
        self.entity_units.fetch_add(1, Ordering::Relaxed);
        self.log(unit);
        Ok(())
    }

    fn apply_global(&self, unit: &ReplayUnit) -> Result<(), ApplyError> {
        self.global_units.fetch_add(1, Ordering::Relaxed);
        self.log(unit);
        Ok(())
    }
}

/// Play summary for output.
#[derive(Debug, Serialize)]
pub struct PlayReport {
    /// `completed` or `aborted`.
    pub status: &'static str,
    /// Error that aborted the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Segments read.
    pub segments: u64,
    /// Units dispatched.
    pub dispatched: u64,
    /// Units applied.
    pub applied: u64,
    /// Units dropped by the range filter.
    pub filtered: u64,
    /// Recoverable errors seen.
    pub errors: u64,
    /// Corrupt records skipped.
    pub corrupt_records: u64,
    /// Commit/abort records without a start.
    pub orphan_markers: u64,
    /// Transactions never resolved.
    pub unresolved_transactions: u64,
    /// Per-scope counts from the store.
    pub store: StoreTotals,
    /// Process exit code.
    pub exit_code: i32,
}

impl PlayReport {
    fn new(outcome: &ReplayOutcome, store: StoreTotals, strict: bool) -> Self {
        let summary = outcome.summary();
        let (status, error) = match outcome {
            ReplayOutcome::Completed(_) => ("completed", None),
            ReplayOutcome::Aborted { error, .. } => ("aborted", Some(error.to_string())),
        };
        Self {
            status,
            error,
            segments: summary.segments_replayed,
            dispatched: summary.units_dispatched,
            applied: summary.units_applied,
            filtered: summary.units_filtered,
            errors: summary.errors_seen,
            corrupt_records: summary.decode.corrupt_records,
            orphan_markers: summary.decode.orphan_markers,
            unresolved_transactions: summary.decode.unresolved_transactions,
            store,
            exit_code: outcome.exit_code(strict),
        }
    }
}

/// Runs the play command, returning the process exit code.
pub fn run(args: &PlayArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = args.config();
    config.validate()?;

    let segments = args.selection.select(&config)?;
    if segments.is_empty() {
        info!("no segments selected");
    }
    for segment in &segments {
        info!(segment = %segment.sequence(), path = %segment.path().display(), "selected");
    }

    let store = Arc::new(TracingStore::default());
    let outcome = ReplayEngine::new(config, store.clone()).run(&segments)?;
    let report = PlayReport::new(&outcome, store.totals(), args.stop_on_error);

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_output(&report),
    }

    Ok(report.exit_code)
}

fn print_text_output(report: &PlayReport) {
    println!("Replay {}", report.status);
    println!("================");
    if let Some(ref error) = report.error {
        println!("Error:              {error}");
    }
    println!("Segments:           {}", report.segments);
    println!("Units dispatched:   {}", report.dispatched);
    println!(
        "Units applied:      {} ({} entity, {} global, {} payload bytes)",
        report.applied,
        report.store.entity_units,
        report.store.global_units,
        report.store.payload_bytes
    );
    println!("Units filtered:     {}", report.filtered);
    println!("Errors:             {}", report.errors);
    println!("Corrupt records:    {}", report.corrupt_records);
    println!("Orphan markers:     {}", report.orphan_markers);
    println!("Never committed:    {}", report.unresolved_transactions);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use redoplay_core::{OperationRecord, SegmentWriter, SequenceNumber, TransactionId};
    use tempfile::tempdir;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        play: PlayArgs,
    }

    #[test]
    fn flags_build_config() {
        let args = Harness::parse_from([
            "playredo",
            "--entity-id",
            "4",
            "--target-entity-id",
            "40",
            "--threads",
            "8",
            "--queue-capacity",
            "3",
            "--stop-on-error",
        ])
        .play;
        let config = args.config();
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.queue_capacity, 3);
        assert!(config.stop_on_error);
        assert_eq!(config.entity_remap, Some(EntityId::new(40)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn store_totals_split_by_scope() {
        let store = TracingStore::default();
        let unit = |entity: Option<u64>, bytes: usize| ReplayUnit {
            txid: TransactionId::new(1),
            scope: entity.map(EntityId::new).into(),
            timestamp: 0,
            payload: vec![0; bytes],
            segment: SequenceNumber::new(1),
        };
        store.apply(&unit(Some(2), 5)).unwrap();
        store.apply(&unit(Some(3), 1)).unwrap();
        store.apply_global(&unit(None, 4)).unwrap();

        assert_eq!(
            store.totals(),
            StoreTotals {
                entity_units: 2,
                global_units: 1,
                payload_bytes: 10,
            }
        );
    }

    #[test]
    fn plays_explicit_logfiles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one.log");
        let mut writer = SegmentWriter::create_file(&path, SequenceNumber::new(1)).unwrap();
        for txid in 1..=3 {
            writer
                .append(&OperationRecord::Start {
                    txid: TransactionId::new(txid),
                    timestamp: 1,
                    entity: Some(EntityId::new(txid)),
                    payload: b"x".to_vec(),
                })
                .unwrap();
            writer
                .append(&OperationRecord::Commit {
                    txid: TransactionId::new(txid),
                    timestamp: 2,
                })
                .unwrap();
        }
        writer.seal().unwrap();
        writer.flush().unwrap();

        let path = path.to_string_lossy().into_owned();
        let args = Harness::parse_from(["playredo", "--logfiles", &path, "--format", "json"]).play;
        assert_eq!(run(&args).unwrap(), 0);
    }
}
