//! Process-wide worker that discovers in-progress operations and drives
//! them through the state machine.
//!
//! Two cooperating loops: an outer poll that refreshes the in-memory set
//! from the store every tick (or on a force-refresh nudge), and an inner
//! drive loop that, while the set is non-empty, advances every known
//! operation one step in parallel and re-reads the set. Per-record errors
//! are swallowed and logged; the worker must keep running for the others.
//!
//! There is no coordination between workers across processes. Correctness
//! comes from the per-record lease: a second worker either loses the
//! version race or refuses to steal a fresh lease.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::models::{ReindexStatus, StoredOperation};
use crate::service::ReindexService;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Guards against a second worker in the same process.
static WORKER_EXISTS: AtomicBool = AtomicBool::new(false);

pub struct ReindexWorker {
    service: Arc<ReindexService>,
    poll_interval: Duration,
    in_progress: Mutex<Vec<StoredOperation>>,
    refresh: Notify,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReindexWorker {
    /// Create the process's worker. Panics if one already exists; the slot
    /// is freed again when the instance is dropped.
    pub fn create(service: Arc<ReindexService>, poll_interval: Duration) -> Arc<Self> {
        if WORKER_EXISTS.swap(true, Ordering::SeqCst) {
            panic!("a ReindexWorker already exists in this process");
        }
        Arc::new(Self {
            service,
            poll_interval,
            in_progress: Mutex::new(Vec::new()),
            refresh: Notify::new(),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the poll loop. Idempotent: a second call is ignored.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        let worker = Arc::clone(self);
        *handle = Some(tokio::spawn(async move { worker.run().await }));
    }

    /// Stop polling and wait for the loop to finish. In-flight step bodies
    /// run to completion; only further scheduling stops.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "worker task ended abnormally");
            }
        }
        debug!("reindex worker stopped");
    }

    /// Out-of-band refresh, for use right after creating an operation in
    /// this process instead of waiting out the poll interval.
    pub fn force_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Whether the worker currently tracks this record.
    pub fn includes(&self, doc: &StoredOperation) -> bool {
        self.in_progress.lock().iter().any(|d| d.id == doc.id)
    }

    async fn run(&self) {
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {}
                _ = self.refresh.notified() => {}
            }

            self.refresh_operations().await;
            while !self.in_progress.lock().is_empty() && !self.cancel.is_cancelled() {
                self.drive_once().await;
                self.refresh_operations().await;
            }
        }
    }

    async fn refresh_operations(&self) {
        match self
            .service
            .find_all_by_status(ReindexStatus::InProgress)
            .await
        {
            Ok(ops) => *self.in_progress.lock() = ops,
            Err(err) => error!(error = %err, "failed to refresh in-progress operations"),
        }
    }

    /// Advance every known operation one step, in parallel. A step that
    /// fails for one record must not take the loop down for the rest.
    async fn drive_once(&self) {
        let ops: Vec<StoredOperation> = self.in_progress.lock().clone();
        let steps = ops.into_iter().map(|doc| {
            let service = Arc::clone(&self.service);
            async move {
                let index = doc.attributes.index_name.clone();
                if let Err(err) = service.process_next_step(doc).await {
                    if err.is_transient() {
                        debug!(index = %index, error = %err, "step deferred");
                    } else {
                        error!(index = %index, error = %err, "reindex step error");
                    }
                }
            }
        });
        join_all(steps).await;
    }
}

impl Drop for ReindexWorker {
    fn drop(&mut self) {
        WORKER_EXISTS.store(false, Ordering::SeqCst);
    }
}
