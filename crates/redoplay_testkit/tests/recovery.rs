//! Damaged segments and crash recovery.

use redoplay_core::{CoreError, RecoveryConfig, Resolution, Scope, Segment};
use redoplay_testkit::prelude::*;
use std::sync::Arc;

fn crashed_log() -> Vec<OperationRecord> {
    // t=1..2 committed, t=3..6 starts, t=7 commit of 5.
    LogBuilder::new()
        .committed(1, Some(1))
        .start(2, Some(2))
        .start(3, None)
        .start(4, Some(3))
        .start(5, Some(2))
        .commit(5)
        .build()
}

#[test]
fn junk_after_open_segment_is_end_of_log() {
    let fixture = SegmentFixture::new();
    fixture.archive(1, &LogBuilder::new().committed(1, Some(1)).build());
    fixture.active_with_tail(2, &LogBuilder::new().at(10).committed(2, Some(1)).build(), &[0xAB; 7]);

    let store = Arc::new(RecordingStore::new());
    let config = ReplayConfig::new();
    let segments = fixture.select(&config);
    let outcome = ReplayEngine::new(config, store.clone()).run(&segments).unwrap();

    assert!(outcome.is_completed());
    let summary = outcome.summary();
    assert_eq!(summary.errors_seen, 0);
    assert_eq!(summary.decode.junk_bytes, 7);
    assert_eq!(store.applied_txids(), vec![1, 2]);
}

#[test]
fn torn_closed_segment_counts_one_error() {
    let fixture = SegmentFixture::new();
    let path = fixture.archive_dir().join("redo-00000000000000000001.log");
    write_segment(&path, 1, &LogBuilder::new().committed(1, Some(1)).build(), true, &[0x52, 0x44, 0x4F]);
    fixture.archive(2, &LogBuilder::new().at(10).committed(2, Some(1)).build());

    let store = Arc::new(RecordingStore::new());
    let config = ReplayConfig::new().worker_count(2);
    let segments = fixture.select(&config);
    let outcome = ReplayEngine::new(config, store.clone()).run(&segments).unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.summary().errors_seen, 1);
    assert_eq!(outcome.summary().decode.corrupt_records, 1);
    assert_eq!(outcome.exit_code(true), 2);
    assert_eq!(store.applied_txids(), vec![1, 2]);
}

#[test]
fn torn_closed_segment_aborts_with_stop_on_error() {
    let fixture = SegmentFixture::new();
    let path = fixture.archive_dir().join("redo-00000000000000000001.log");
    write_segment(&path, 1, &LogBuilder::new().committed(1, None).build(), true, &[0x52]);
    fixture.archive(2, &LogBuilder::new().at(10).committed(2, None).build());

    let store = Arc::new(RecordingStore::new());
    let config = ReplayConfig::new().stop_on_error(true);
    let segments = fixture.select(&config);
    let outcome = ReplayEngine::new(config, store.clone()).run(&segments).unwrap();

    let ReplayOutcome::Aborted { error, .. } = outcome else {
        panic!("expected abort");
    };
    assert!(matches!(error, CoreError::CorruptRecord { .. }));
    assert_eq!(store.applied_txids(), vec![1]);
}

#[test]
fn recovery_redoes_unresolved_in_log_order() {
    let fixture = SegmentFixture::new();
    let path = fixture.active(3, &crashed_log());
    let segment = Segment::open(&path).unwrap();

    let store = Arc::new(RecordingStore::new().fail_on(4));
    let engine = ReplayEngine::new(ReplayConfig::new(), store.clone())
        .with_halt_policy(Arc::new(RecordingHalt::new()));
    let report = engine
        .recover(&segment, RecoveryConfig::new().lookback(7, 1))
        .unwrap();

    assert_eq!(report.segment, SequenceNumber::new(3));
    assert_eq!(report.decode.ignored_commits, 1);
    let order: Vec<_> = report.transactions.iter().map(|t| t.txid.as_u64()).collect();
    assert_eq!(order, vec![2, 3, 4, 5]);

    let committed: Vec<_> = report.committed().map(|t| t.txid.as_u64()).collect();
    assert_eq!(committed, vec![2, 3, 5]);
    let aborted: Vec<_> = report.aborted().collect();
    assert_eq!(aborted.len(), 1);
    assert_eq!(aborted[0].txid, TransactionId::new(4));
    assert_eq!(
        aborted[0].marker(20),
        OperationRecord::Abort {
            txid: TransactionId::new(4),
            timestamp: 20,
        }
    );

    assert_eq!(store.order_for(Scope::Global), vec![3]);
    assert!(store.call(1).is_none());
}

#[test]
fn recovery_without_lookback_trusts_commits() {
    let fixture = SegmentFixture::new();
    let segment = Segment::open(fixture.active(3, &crashed_log())).unwrap();

    let store = Arc::new(RecordingStore::new());
    let report = ReplayEngine::new(ReplayConfig::new(), store.clone())
        .recover(&segment, RecoveryConfig::new())
        .unwrap();

    let order: Vec<_> = report.transactions.iter().map(|t| t.txid.as_u64()).collect();
    assert_eq!(order, vec![2, 3, 4]);
    assert!(report.transactions.iter().all(|t| t.resolution == Resolution::Committed));
}

#[test]
fn recovery_respects_entity_filter() {
    let fixture = SegmentFixture::new();
    let segment = Segment::open(fixture.active(3, &crashed_log())).unwrap();

    let store = Arc::new(RecordingStore::new());
    let config = ReplayConfig::new().entities([EntityId::new(2)]);
    let report = ReplayEngine::new(config, store.clone())
        .recover(&segment, RecoveryConfig::new())
        .unwrap();

    let order: Vec<_> = report.transactions.iter().map(|t| t.txid.as_u64()).collect();
    assert_eq!(order, vec![2, 3]);
    assert!(store.call(4).is_none());
}

#[test]
fn recovery_halts_on_exhaustion() {
    let fixture = SegmentFixture::new();
    let segment = Segment::open(fixture.active(3, &crashed_log())).unwrap();

    let store = Arc::new(RecordingStore::new().exhaust_on(3));
    let halt = Arc::new(RecordingHalt::new());
    let result = ReplayEngine::new(ReplayConfig::new(), store.clone())
        .with_halt_policy(halt.clone())
        .recover(&segment, RecoveryConfig::new());

    assert!(matches!(result, Err(CoreError::ResourceExhausted { .. })));
    assert_eq!(halt.halts().len(), 1);
    assert!(store.call(4).is_none());
}

#[test]
fn markers_close_redone_transactions() {
    let fixture = SegmentFixture::new();
    let path = fixture.active(3, &crashed_log());

    let store = Arc::new(RecordingStore::new().fail_on(4));
    let engine = ReplayEngine::new(ReplayConfig::new(), store.clone());
    let report = engine
        .recover(&Segment::open(&path).unwrap(), RecoveryConfig::new())
        .unwrap();
    assert_eq!(fixture.close_recovered(&report, 20), 3);

    let again = engine
        .recover(&Segment::open(&path).unwrap(), RecoveryConfig::new())
        .unwrap();
    assert!(again.transactions.is_empty());
    assert_eq!(again.decode.transactions_aborted, 1);

    let replay_store = Arc::new(RecordingStore::new());
    let config = ReplayConfig::new().worker_count(1);
    let segments = fixture.select(&config);
    let outcome = ReplayEngine::new(config, replay_store.clone())
        .run(&segments)
        .unwrap();
    assert!(outcome.is_completed());
    assert_eq!(replay_store.applied_txids(), vec![1, 5, 2, 3]);
}
