//! Three independent periodic workers, spec.md §4.10. Each is plain,
//! synchronously-testable logic behind a `run_once`; `LifecycleWorkers`
//! is the thin scheduling shell that ticks them on an interval, mirroring
//! the teacher's `spawn_cleanup_task` (tick-sleep-loop, purge-on-startup)
//! generalized to three coordinators instead of one and given an actual
//! stop signal instead of running until process exit.

mod cleanup;
mod expiry;
mod migration;

pub use cleanup::CleanupWorker;
pub use expiry::ExpiryWorker;
pub use migration::MigrationWorker;

use crate::event::{Event, EventSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Outcome of one `run_once` pass: how many items were processed and how
/// many individually failed. Per-item failures never abort the batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record(&mut self, result: crate::error::Result<()>) {
        match result {
            Ok(()) => self.processed += 1,
            Err(_) => self.failed += 1,
        }
    }
}

pub struct LifecycleWorkers {
    expiry: Arc<ExpiryWorker>,
    migration: Arc<MigrationWorker>,
    cleanup: Arc<CleanupWorker>,
    events: Arc<dyn EventSink>,
    tick_interval: Duration,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl LifecycleWorkers {
    pub fn new(
        expiry: ExpiryWorker,
        migration: MigrationWorker,
        cleanup: CleanupWorker,
        events: Arc<dyn EventSink>,
        tick_interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            expiry: Arc::new(expiry),
            migration: Arc::new(migration),
            cleanup: Arc::new(cleanup),
            events,
            tick_interval,
            handles: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    /// Spawns the three tick loops. Safe to call once; a second call
    /// would spawn duplicate loops and is a caller bug, not guarded
    /// against here (mirrors the teacher, which never re-entered
    /// `spawn_cleanup_task` either).
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        handles.push(spawn_tick_loop(
            "expiry",
            self.expiry.clone(),
            self.events.clone(),
            self.tick_interval,
            self.shutdown.subscribe(),
        ));
        handles.push(spawn_tick_loop(
            "migration",
            self.migration.clone(),
            self.events.clone(),
            self.tick_interval,
            self.shutdown.subscribe(),
        ));
        handles.push(spawn_tick_loop(
            "cleanup",
            self.cleanup.clone(),
            self.events.clone(),
            self.tick_interval,
            self.shutdown.subscribe(),
        ));
    }

    /// Signals every loop to exit after its current tick and waits for
    /// them to finish, so a shutdown never interrupts an in-flight
    /// batch.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    pub async fn run_once_expiry(&self) -> BatchSummary {
        self.expiry.run_once().await
    }

    pub async fn run_once_migration(&self) -> BatchSummary {
        self.migration.run_once().await
    }

    pub async fn run_once_cleanup(&self) -> BatchSummary {
        self.cleanup.run_once().await
    }
}

#[async_trait::async_trait]
trait Tickable: Send + Sync {
    async fn run_once(&self) -> BatchSummary;
}

#[async_trait::async_trait]
impl Tickable for ExpiryWorker {
    async fn run_once(&self) -> BatchSummary {
        ExpiryWorker::run_once(self).await
    }
}

#[async_trait::async_trait]
impl Tickable for MigrationWorker {
    async fn run_once(&self) -> BatchSummary {
        MigrationWorker::run_once(self).await
    }
}

#[async_trait::async_trait]
impl Tickable for CleanupWorker {
    async fn run_once(&self) -> BatchSummary {
        CleanupWorker::run_once(self).await
    }
}

fn spawn_tick_loop(
    name: &'static str,
    worker: Arc<dyn Tickable>,
    events: Arc<dyn EventSink>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let summary = worker.run_once().await;
                    events.emit(Event::WorkerBatchSummary {
                        worker: name,
                        processed: summary.processed,
                        failed: summary.failed,
                        duration: Duration::default(),
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
