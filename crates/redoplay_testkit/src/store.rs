//! Recording store and halt policy.
//!
//! [`RecordingStore`] records every apply with begin and end ticks from one
//! shared counter, so tests can check both per-entity order and
//! happens-before between global and entity units.

use parking_lot::{Condvar, Mutex};
use redoplay_core::{ApplyError, CoreError, HaltPolicy, MailboxStore, ReplayUnit, Scope};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// One recorded apply call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUnit {
    /// Transaction ID.
    pub txid: u64,
    /// Target of the unit.
    pub scope: Scope,
    /// Name of the applying thread.
    pub thread: String,
    /// Tick taken when the call began.
    pub begin: u64,
    /// Tick taken when the call returned.
    pub end: u64,
    /// Whether the call succeeded.
    pub succeeded: bool,
}

/// Mailbox store that records calls.
#[derive(Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<AppliedUnit>>,
    ticks: AtomicU64,
    fail: HashSet<u64>,
    exhaust: HashSet<u64>,
    delay: Option<Duration>,
    gated: Mutex<bool>,
    gate: Condvar,
    in_flight: AtomicUsize,
}

impl RecordingStore {
    /// Creates a store that accepts every unit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the apply of `txid`.
    #[must_use]
    pub fn fail_on(mut self, txid: u64) -> Self {
        self.fail.insert(txid);
        self
    }

    /// Reports resource exhaustion when applying `txid`.
    #[must_use]
    pub fn exhaust_on(mut self, txid: u64) -> Self {
        self.exhaust.insert(txid);
        self
    }

    /// Sleeps for `delay` inside every entity apply.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Blocks every entity apply until [`release`](Self::release).
    #[must_use]
    pub fn gated(self) -> Self {
        *self.gated.lock() = true;
        self
    }

    /// Lets blocked applies proceed.
    pub fn release(&self) {
        *self.gated.lock() = false;
        self.gate.notify_all();
    }

    /// Number of entity applies currently inside the store.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Returns every recorded call in completion order.
    pub fn calls(&self) -> Vec<AppliedUnit> {
        self.calls.lock().clone()
    }

    /// Returns the txids of successful calls in completion order.
    pub fn applied_txids(&self) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.succeeded)
            .map(|c| c.txid)
            .collect()
    }

    /// Returns the txids of every call for `scope`, in call order.
    pub fn order_for(&self, scope: Scope) -> Vec<u64> {
        let mut calls: Vec<_> = self
            .calls
            .lock()
            .iter()
            .filter(|c| c.scope == scope)
            .cloned()
            .collect();
        calls.sort_by_key(|c| c.begin);
        calls.into_iter().map(|c| c.txid).collect()
    }

    /// Returns the recorded call for `txid`.
    pub fn call(&self, txid: u64) -> Option<AppliedUnit> {
        self.calls.lock().iter().find(|c| c.txid == txid).cloned()
    }

    fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::SeqCst)
    }

    fn record(&self, unit: &ReplayUnit, global: bool) -> Result<(), ApplyError> {
        let begin = self.tick();
        if !global {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let mut gated = self.gated.lock();
            while *gated {
                self.gate.wait(&mut gated);
            }
            drop(gated);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        let txid = unit.txid.as_u64();
        let result = if self.exhaust.contains(&txid) {
            Err(ApplyError::ResourceExhausted("allocation failed".into()))
        } else if self.fail.contains(&txid) {
            Err(ApplyError::failed(format!("injected failure for txn {txid}")))
        } else {
            Ok(())
        };

        let end = self.tick();
        self.calls.lock().push(AppliedUnit {
            txid,
            scope: unit.scope,
            thread: std::thread::current().name().unwrap_or("unnamed").to_string(),
            begin,
            end,
            succeeded: result.is_ok(),
        });
        result
    }
}

impl MailboxStore for RecordingStore {
    fn apply(&self, unit: &ReplayUnit) -> Result<(), ApplyError> {
        self.record(unit, false)
    }

    fn apply_global(&self, unit: &ReplayUnit) -> Result<(), ApplyError> {
        self.record(unit, true)
    }
}

/// Halt policy that records the error instead of exiting.
#[derive(Debug, Default)]
pub struct RecordingHalt {
    halts: Mutex<Vec<String>>,
}

impl RecordingHalt {
    /// Creates a policy with no recorded halts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the messages of recorded halts.
    pub fn halts(&self) -> Vec<String> {
        self.halts.lock().clone()
    }
}

impl HaltPolicy for RecordingHalt {
    fn halt(&self, error: &CoreError) {
        self.halts.lock().push(error.to_string());
    }
}
