//! Replay worker pool.
//!
//! Each worker is one thread draining one bounded queue. The dispatcher is
//! the only producer; a full queue blocks it, which is the only backpressure
//! in a replay run. An entity always maps to the same worker, so units of
//! one entity are applied in the order they were enqueued.

use crate::controller::{Decision, FailureController};
use crate::error::{CoreError, CoreResult};
use crate::store::MailboxStore;
use crate::unit::ReplayUnit;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

/// What one worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker index.
    pub worker: usize,
    /// Units applied successfully.
    pub applied: u64,
    /// Units whose apply failed.
    pub failed: u64,
    /// Units left in the queue when the run aborted.
    pub discarded: u64,
}

/// A fixed set of workers, each owning the entities `id % count == index`.
pub struct WorkerPool {
    senders: Vec<SyncSender<ReplayUnit>>,
    handles: Vec<JoinHandle<WorkerReport>>,
    queue_capacity: usize,
}

impl WorkerPool {
    /// Starts `worker_count` workers with queues of `queue_capacity` units.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero count or capacity, or an I/O error
    /// if a thread cannot be spawned.
    pub fn start(
        worker_count: usize,
        queue_capacity: usize,
        store: Arc<dyn MailboxStore>,
        controller: Arc<FailureController>,
    ) -> CoreResult<Self> {
        if worker_count == 0 || queue_capacity == 0 {
            return Err(CoreError::invalid_config(
                "worker pool needs at least one worker and a non-zero queue",
            ));
        }

        let mut senders = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let (tx, rx) = mpsc::sync_channel(queue_capacity);
            let store = Arc::clone(&store);
            let controller = Arc::clone(&controller);
            let handle = thread::Builder::new()
                .name(format!("replay-worker-{index}"))
                .spawn(move || run_worker(index, &rx, store.as_ref(), &controller))?;
            senders.push(tx);
            handles.push(handle);
        }
        debug!(workers = worker_count, queue_capacity, "worker pool started");

        Ok(Self {
            senders,
            handles,
            queue_capacity,
        })
    }

    /// Returns the number of workers.
    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Returns the capacity of each worker queue.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Enqueues an entity-scoped unit on the worker owning its entity,
    /// blocking while that worker's queue is full.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a global unit, or `WorkerDisconnected`
    /// if the worker has stopped.
    pub fn submit(&self, unit: ReplayUnit) -> CoreResult<()> {
        let Some(entity) = unit.entity() else {
            return Err(CoreError::invalid_operation(
                "global units are applied on the dispatch thread",
            ));
        };
        let worker = entity.worker_index(self.senders.len());
        trace!(txid = %unit.txid, %entity, worker, "enqueue");
        self.senders[worker]
            .send(unit)
            .map_err(|_| CoreError::WorkerDisconnected { worker })
    }

    /// Closes every queue and joins the workers.
    ///
    /// Workers finish their queues unless the run is aborting. A panic in the
    /// store is reported by the worker itself; a thread that died some other
    /// way is returned as an error instead of a report.
    pub fn shutdown(self) -> Vec<CoreResult<WorkerReport>> {
        drop(self.senders);
        self.handles
            .into_iter()
            .enumerate()
            .map(|(worker, handle)| {
                handle
                    .join()
                    .map_err(|_| CoreError::WorkerPanicked { worker })
            })
            .collect()
    }
}

fn run_worker(
    index: usize,
    queue: &Receiver<ReplayUnit>,
    store: &dyn MailboxStore,
    controller: &FailureController,
) -> WorkerReport {
    let mut report = WorkerReport {
        worker: index,
        ..WorkerReport::default()
    };

    while let Ok(unit) = queue.recv() {
        if controller.is_aborting() {
            report.discarded = 1 + queue.try_iter().count() as u64;
            break;
        }
        let Ok(result) = panic::catch_unwind(AssertUnwindSafe(|| store.apply(&unit))) else {
            // The queue stays open until the controller has been told, so the
            // dispatcher sees an aborting run rather than a closed queue.
            error!(worker = index, txid = %unit.txid, "store panicked while applying unit");
            report.failed += 1;
            controller.report(CoreError::WorkerPanicked { worker: index });
            report.discarded = queue.try_iter().count() as u64;
            break;
        };
        match result {
            Ok(()) => {
                report.applied += 1;
                debug!(worker = index, txid = %unit.txid, scope = %unit.scope, "applied");
            }
            Err(e) => {
                report.failed += 1;
                if controller.report(e.into_core(&unit)) == Decision::Stop {
                    report.discarded = queue.try_iter().count() as u64;
                    break;
                }
            }
        }
    }

    debug!(
        worker = index,
        applied = report.applied,
        failed = report.failed,
        discarded = report.discarded,
        "worker stopped"
    );
    report
}
