//! Scan pipeline: bounded event queue and the analyzer worker pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::analyzers::dispatch::{self, DispatchContext};
use crate::models::FileEvent;

/// Number of concurrent analyzer workers.
pub const NUM_WORKERS: usize = 5;

/// Capacity of the inbound event queue. Producers block when the queue is
/// full; a blocked socket producer in turn blocks the upstream IDS's socket
/// write, which is the intended backpressure channel.
pub const QUEUE_CAPACITY: usize = 10_000;

/// Counter of events posted but not yet fully processed.
///
/// Producers increment before enqueueing; workers decrement after dispatch
/// regardless of outcome. The backlog scanner waits for zero to get
/// drain-to-quiescence semantics.
#[derive(Default)]
pub struct WorkCounter {
    count: AtomicUsize,
    notify: Notify,
}

impl WorkCounter {
    pub fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::AcqRel);
    }

    pub fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }

    pub fn outstanding(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until the outstanding count reaches zero.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// The shared event queue plus its fixed pool of workers.
pub struct Pipeline {
    tx: mpsc::Sender<FileEvent>,
    pending: Arc<WorkCounter>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Create the queue and spawn the worker pool.
    pub fn new(ctx: Arc<DispatchContext>) -> Self {
        let (tx, rx) = mpsc::channel::<FileEvent>(QUEUE_CAPACITY);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let pending = Arc::new(WorkCounter::default());

        let mut workers = Vec::with_capacity(NUM_WORKERS);
        for _ in 0..NUM_WORKERS {
            let rx = rx.clone();
            let pending = pending.clone();
            let ctx = ctx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let event = { rx.lock().await.recv().await };
                    let Some(event) = event else { break };
                    tracing::debug!(path = %event.path.display(), "worker grabbed file for processing");
                    if let Err(e) = dispatch::analyze_file(&ctx, &event).await {
                        tracing::error!(path = %event.path.display(), error = %e, "dispatch failed");
                    }
                    pending.done();
                }
                tracing::info!("worker terminated");
            }));
        }

        Self {
            tx,
            pending,
            workers,
        }
    }

    /// Sender handle for producers (socket ingest, backlog scanner).
    pub fn sender(&self) -> mpsc::Sender<FileEvent> {
        self.tx.clone()
    }

    /// Shared outstanding-work counter.
    pub fn pending(&self) -> Arc<WorkCounter> {
        self.pending.clone()
    }

    /// Close the queue and wait for all workers to drain and exit.
    pub async fn close(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "worker join failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_idle_returns_immediately_when_zero() {
        let counter = WorkCounter::default();
        tokio::time::timeout(Duration::from_secs(1), counter.wait_idle())
            .await
            .expect("wait_idle should not block on an idle counter");
    }

    #[tokio::test]
    async fn wait_idle_blocks_until_drained() {
        let counter = Arc::new(WorkCounter::default());
        counter.add(3);

        let waiter = {
            let counter = counter.clone();
            tokio::spawn(async move { counter.wait_idle().await })
        };

        counter.done();
        counter.done();
        assert!(!waiter.is_finished());
        counter.done();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish once drained")
            .unwrap();
    }

    #[tokio::test]
    async fn counter_tracks_outstanding() {
        let counter = WorkCounter::default();
        counter.add(2);
        assert_eq!(counter.outstanding(), 2);
        counter.done();
        assert_eq!(counter.outstanding(), 1);
    }
}
