//! Property-based generators for transaction logs.
//!
//! A generated log interleaves the start and end records of many
//! transactions. Each transaction commits, aborts, or stays unresolved, so
//! the expected committed units are known up front.

use proptest::prelude::*;
use redoplay_core::{EntityId, OperationRecord, Timestamp, TransactionId};

/// How a generated transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    /// A `Commit` record follows the start.
    Commit,
    /// An `Abort` record follows the start.
    Abort,
    /// No end record; the segment ends first.
    Unresolved,
}

/// A committed transaction the decoder must emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedUnit {
    /// Transaction ID.
    pub txid: u64,
    /// Target entity, `None` for global.
    pub entity: Option<u64>,
    /// Commit time.
    pub commit_time: Timestamp,
}

/// An interleaved log and the units it commits, in commit order.
#[derive(Debug, Clone)]
pub struct GeneratedLog {
    /// Records in file order.
    pub records: Vec<OperationRecord>,
    /// Committed units in commit order.
    pub expected: Vec<ExpectedUnit>,
}

impl GeneratedLog {
    /// Returns the expected txids of one entity, in commit order.
    pub fn expected_for(&self, entity: u64) -> Vec<u64> {
        self.expected
            .iter()
            .filter(|u| u.entity == Some(entity))
            .map(|u| u.txid)
            .collect()
    }

    /// Returns the entities that have committed units.
    pub fn entities(&self) -> Vec<u64> {
        let mut entities: Vec<_> = self.expected.iter().filter_map(|u| u.entity).collect();
        entities.sort_unstable();
        entities.dedup();
        entities
    }
}

/// Strategy for how a transaction ends; commits dominate.
pub fn outcome_strategy() -> impl Strategy<Value = TxnOutcome> {
    prop_oneof![
        6 => Just(TxnOutcome::Commit),
        2 => Just(TxnOutcome::Abort),
        1 => Just(TxnOutcome::Unresolved),
    ]
}

/// Strategy for a transaction target: global about one time in eight.
pub fn scope_strategy(max_entities: u64) -> impl Strategy<Value = Option<u64>> {
    prop_oneof![
        7 => (1..=max_entities).prop_map(Some),
        1 => Just(None),
    ]
}

/// Strategy for interleaved logs of up to `max_txns` transactions over
/// entities `1..=max_entities`.
pub fn transaction_log_strategy(
    max_txns: usize,
    max_entities: u64,
) -> impl Strategy<Value = GeneratedLog> {
    prop::collection::vec(
        (
            scope_strategy(max_entities),
            outcome_strategy(),
            any::<u16>(),
            any::<u16>(),
        ),
        1..max_txns,
    )
    .prop_map(build_log)
}

/// Orders start and end events by their generated positions.
fn build_log(txns: Vec<(Option<u64>, TxnOutcome, u16, u16)>) -> GeneratedLog {
    // (position, is_end, txid)
    let mut events = Vec::with_capacity(txns.len() * 2);
    for (index, (_, outcome, a, b)) in txns.iter().enumerate() {
        let txid = index as u64 + 1;
        events.push(((*a).min(*b), false, txid));
        if *outcome != TxnOutcome::Unresolved {
            events.push(((*a).max(*b), true, txid));
        }
    }
    events.sort_unstable();

    let mut records = Vec::with_capacity(events.len());
    let mut expected = Vec::new();
    for (clock, (_, is_end, txid)) in events.into_iter().enumerate() {
        let timestamp = clock as Timestamp + 1;
        let (entity, outcome, _, _) = txns[txid as usize - 1];
        let id = TransactionId::new(txid);
        let record = match (is_end, outcome) {
            (false, _) => OperationRecord::Start {
                txid: id,
                timestamp,
                entity: entity.map(EntityId::new),
                payload: txid.to_le_bytes().to_vec(),
            },
            (true, TxnOutcome::Commit) => {
                expected.push(ExpectedUnit {
                    txid,
                    entity,
                    commit_time: timestamp,
                });
                OperationRecord::Commit {
                    txid: id,
                    timestamp,
                }
            }
            (true, _) => OperationRecord::Abort {
                txid: id,
                timestamp,
            },
        };
        records.push(record);
    }

    GeneratedLog { records, expected }
}

/// Proptest configuration for tests that spin up worker threads.
pub fn threaded_config() -> ProptestConfig {
    ProptestConfig {
        cases: 32,
        max_shrink_iters: 100,
        ..ProptestConfig::default()
    }
}
