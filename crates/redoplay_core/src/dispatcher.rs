//! Routing of committed units.
//!
//! Global units are applied inline, so their effects are complete before
//! any later unit is enqueued. Entity units go to the worker owning the
//! entity, or are applied inline too when the run is sequential.

use crate::config::ReplayConfig;
use crate::controller::{Decision, FailureController};
use crate::error::CoreResult;
use crate::store::MailboxStore;
use crate::unit::ReplayUnit;
use crate::worker::{WorkerPool, WorkerReport};
use std::sync::Arc;
use tracing::{debug, info};

/// Totals of a finished dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Units that reached the store: enqueued on a worker or applied inline.
    pub dispatched: u64,
    /// Units applied successfully, inline or by workers.
    pub applied: u64,
    /// Per-worker reports; empty for sequential runs.
    pub workers: Vec<WorkerReport>,
}

/// Single-threaded consumer of the filtered unit stream.
pub struct Dispatcher {
    store: Arc<dyn MailboxStore>,
    controller: Arc<FailureController>,
    pool: Option<WorkerPool>,
    dispatched: u64,
    applied_inline: u64,
}

impl Dispatcher {
    /// Creates a dispatcher applying every unit on the calling thread.
    pub fn sequential(store: Arc<dyn MailboxStore>, controller: Arc<FailureController>) -> Self {
        Self {
            store,
            controller,
            pool: None,
            dispatched: 0,
            applied_inline: 0,
        }
    }

    /// Creates a dispatcher feeding a worker pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be started.
    pub fn parallel(
        store: Arc<dyn MailboxStore>,
        controller: Arc<FailureController>,
        worker_count: usize,
        queue_capacity: usize,
    ) -> CoreResult<Self> {
        let pool = WorkerPool::start(
            worker_count,
            queue_capacity,
            Arc::clone(&store),
            Arc::clone(&controller),
        )?;
        Ok(Self {
            store,
            controller,
            pool: Some(pool),
            dispatched: 0,
            applied_inline: 0,
        })
    }

    /// Creates the dispatcher a configuration calls for.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be started.
    pub fn for_config(
        config: &ReplayConfig,
        store: Arc<dyn MailboxStore>,
        controller: Arc<FailureController>,
    ) -> CoreResult<Self> {
        if config.is_sequential() {
            info!("replaying sequentially on the dispatch thread");
            Ok(Self::sequential(store, controller))
        } else {
            info!(
                workers = config.worker_count,
                queue_capacity = config.queue_capacity,
                "replaying with worker pool"
            );
            Self::parallel(store, controller, config.worker_count, config.queue_capacity)
        }
    }

    /// Returns true if units are applied on the calling thread.
    pub fn is_sequential(&self) -> bool {
        self.pool.is_none()
    }

    /// Dispatches one unit.
    ///
    /// Returns [`Decision::Stop`] once the run is aborting.
    pub fn dispatch(&mut self, unit: ReplayUnit) -> Decision {
        if self.controller.is_aborting() {
            return Decision::Stop;
        }
        let pool = match &self.pool {
            Some(pool) if !unit.is_global() => pool,
            _ => return self.apply_inline(&unit),
        };
        match pool.submit(unit) {
            Ok(()) => {
                self.dispatched += 1;
                Decision::Continue
            }
            // A worker that stopped on its own has already aborted the run.
            Err(_) if self.controller.is_aborting() => Decision::Stop,
            Err(e) => self.controller.report(e),
        }
    }

    fn apply_inline(&mut self, unit: &ReplayUnit) -> Decision {
        self.dispatched += 1;
        let result = if unit.is_global() {
            self.store.apply_global(unit)
        } else {
            self.store.apply(unit)
        };
        match result {
            Ok(()) => {
                self.applied_inline += 1;
                debug!(txid = %unit.txid, scope = %unit.scope, "applied");
                if self.controller.is_aborting() {
                    Decision::Stop
                } else {
                    Decision::Continue
                }
            }
            Err(e) => self.controller.report(e.into_core(unit)),
        }
    }

    /// Closes the worker queues and joins the workers.
    ///
    /// A panicked worker is reported to the controller as fatal.
    pub fn finish(self) -> DispatchReport {
        let mut report = DispatchReport {
            dispatched: self.dispatched,
            applied: self.applied_inline,
            workers: Vec::new(),
        };
        if let Some(pool) = self.pool {
            for result in pool.shutdown() {
                match result {
                    Ok(worker) => {
                        report.applied += worker.applied;
                        report.workers.push(worker);
                    }
                    Err(e) => {
                        self.controller.report(e);
                    }
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::store::{ApplyError, HaltPolicy};
    use crate::types::{EntityId, SequenceNumber, TransactionId};
    use crate::unit::Scope;
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Duration;

    struct NoHalt;

    impl HaltPolicy for NoHalt {
        fn halt(&self, _error: &CoreError) {}
    }

    #[derive(Default)]
    struct LogStore {
        events: Mutex<Vec<String>>,
    }

    impl MailboxStore for LogStore {
        fn apply(&self, unit: &ReplayUnit) -> Result<(), ApplyError> {
            thread::sleep(Duration::from_millis(2));
            self.events.lock().push(format!("apply {}", unit.txid.as_u64()));
            Ok(())
        }

        fn apply_global(&self, unit: &ReplayUnit) -> Result<(), ApplyError> {
            if unit.payload == b"fail" {
                return Err(ApplyError::failed("global failed"));
            }
            self.events.lock().push(format!("global {}", unit.txid.as_u64()));
            Ok(())
        }
    }

    fn unit(txid: u64, entity: Option<u64>) -> ReplayUnit {
        ReplayUnit {
            txid: TransactionId::new(txid),
            scope: Scope::from(entity.map(EntityId::new)),
            timestamp: txid as i64,
            payload: Vec::new(),
            segment: SequenceNumber::new(1),
        }
    }

    fn controller(stop_on_error: bool) -> Arc<FailureController> {
        Arc::new(FailureController::new(stop_on_error, Arc::new(NoHalt)))
    }

    #[test]
    fn sequential_applies_in_order() {
        let store = Arc::new(LogStore::default());
        let mut dispatcher = Dispatcher::sequential(store.clone(), controller(false));
        for u in [unit(1, Some(1)), unit(2, None), unit(3, Some(2))] {
            assert_eq!(dispatcher.dispatch(u), Decision::Continue);
        }
        let report = dispatcher.finish();
        assert_eq!(report.dispatched, 3);
        assert_eq!(report.applied, 3);
        assert_eq!(
            *store.events.lock(),
            vec!["apply 1", "global 2", "apply 3"]
        );
    }

    #[test]
    fn global_applied_before_later_entity_units() {
        let store = Arc::new(LogStore::default());
        let mut dispatcher = Dispatcher::parallel(store.clone(), controller(false), 4, 8).unwrap();
        dispatcher.dispatch(unit(1, None));
        for txid in 2..10 {
            dispatcher.dispatch(unit(txid, Some(txid)));
        }
        let report = dispatcher.finish();
        assert_eq!(report.applied, 9);
        assert_eq!(report.workers.len(), 4);
        assert_eq!(store.events.lock()[0], "global 1");
    }

    #[test]
    fn global_failure_respects_policy() {
        let mut failing = unit(1, None);
        failing.payload = b"fail".to_vec();

        let lenient = controller(false);
        let mut dispatcher = Dispatcher::sequential(Arc::new(LogStore::default()), lenient.clone());
        assert_eq!(dispatcher.dispatch(failing.clone()), Decision::Continue);
        assert_eq!(lenient.errors_seen(), 1);

        let strict = controller(true);
        let mut dispatcher = Dispatcher::sequential(Arc::new(LogStore::default()), strict.clone());
        assert_eq!(dispatcher.dispatch(failing), Decision::Stop);
        assert_eq!(dispatcher.dispatch(unit(2, Some(1))), Decision::Stop);
        assert_eq!(dispatcher.finish().dispatched, 1);
    }

    struct PanicOnFirst;

    impl MailboxStore for PanicOnFirst {
        fn apply(&self, unit: &ReplayUnit) -> Result<(), ApplyError> {
            assert_ne!(unit.txid.as_u64(), 1, "apply of txid 1 blows up");
            Ok(())
        }

        fn apply_global(&self, _unit: &ReplayUnit) -> Result<(), ApplyError> {
            Ok(())
        }
    }

    #[test]
    fn panicking_store_stops_dispatch_with_worker_panic() {
        let controller = controller(false);
        let mut dispatcher =
            Dispatcher::parallel(Arc::new(PanicOnFirst), controller.clone(), 2, 1).unwrap();
        let mut stopped_at = None;
        for txid in 1..=20 {
            if dispatcher.dispatch(unit(txid, Some(3))) == Decision::Stop {
                stopped_at = Some(txid);
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        let report = dispatcher.finish();

        assert!(stopped_at.is_some());
        assert_eq!(report.dispatched, stopped_at.unwrap() - 1);
        assert_eq!(report.applied, 0);
        assert!(matches!(
            controller.take_failure(),
            Some(CoreError::WorkerPanicked { worker: 1 })
        ));
    }

    #[test]
    fn config_selects_mode() {
        let store: Arc<dyn MailboxStore> = Arc::new(LogStore::default());
        let single = ReplayConfig::new().entities([EntityId::new(5)]);
        let dispatcher = Dispatcher::for_config(&single, store.clone(), controller(false)).unwrap();
        assert!(dispatcher.is_sequential());

        let pooled = ReplayConfig::new().worker_count(3);
        let dispatcher = Dispatcher::for_config(&pooled, store, controller(false)).unwrap();
        assert!(!dispatcher.is_sequential());
        assert_eq!(dispatcher.finish().workers.len(), 3);
    }
}
