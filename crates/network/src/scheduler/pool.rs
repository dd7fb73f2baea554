//! Background worker pool.
//!
//! Propagation and run attempts are fire-and-forget: callers submit a [`Job`]
//! and return. A fixed number of tokio workers drain one shared unbounded
//! channel. The channel is unbounded because jobs are submitted while a node
//! lock is held; a bounded send could wait on workers that wait on that lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use tidemark_core::{DataId, NodeId, Pointer};

/// Unit of background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Attempt a run of `node`. `source` is the upstream that triggered the
    /// attempt and the effective pointer it had at trigger time.
    TryRun {
        node: NodeId,
        source: Option<(DataId, Pointer)>,
    },
    /// Deferred performance pass for a node with data but no statistics.
    Perf(NodeId),
}

impl Job {
    pub fn node(&self) -> &NodeId {
        match self {
            Job::TryRun { node, .. } | Job::Perf(node) => node,
        }
    }
}

/// Consumer of jobs. Errors are the handler's to log; the pool never sees them.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: Job);
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    /// Submitted jobs not yet picked up.
    pub backlog: usize,
    /// Workers currently inside a handler.
    pub active: usize,
}

pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Job>,
    backlog: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers on the current tokio runtime. Workers stop when
    /// the pool is dropped or the handler is gone.
    pub fn start<H: JobHandler>(size: usize, handler: Weak<H>) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let backlog = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        info!("Worker pool starting with {} workers", size);
        for worker in 0..size {
            let rx = Arc::clone(&rx);
            let backlog = Arc::clone(&backlog);
            let active = Arc::clone(&active);
            let handler = handler.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    // Count as active before leaving the backlog so the pool
                    // never looks idle while a job is in hand.
                    active.fetch_add(1, Ordering::SeqCst);
                    backlog.fetch_sub(1, Ordering::SeqCst);
                    match handler.upgrade() {
                        Some(handler) => handler.handle(job).await,
                        None => {
                            active.fetch_sub(1, Ordering::SeqCst);
                            break;
                        }
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                }
                debug!(worker, "Worker stopped");
            });
        }

        Self { tx, backlog, active, size }
    }

    pub fn submit(&self, job: Job) {
        self.backlog.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.tx.send(job) {
            self.backlog.fetch_sub(1, Ordering::SeqCst);
            warn!(node = %e.0.node(), "Worker pool closed, job dropped");
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size,
            backlog: self.backlog.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
        }
    }

    pub fn is_idle(&self) -> bool {
        let stats = self.stats();
        stats.backlog == 0 && stats.active == 0
    }
}

/// Counter of public operations currently inside the scheduler.
///
/// Completion callbacks may arrive from outside the pool; they hold an
/// [`ActivityGuard`] so quiescence checks see them.
#[derive(Debug, Default)]
pub struct Activity {
    in_flight: AtomicUsize,
}

impl Activity {
    pub fn enter(&self) -> ActivityGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        ActivityGuard { activity: self }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

pub struct ActivityGuard<'a> {
    activity: &'a Activity,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.activity.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: std::sync::Mutex<Vec<Job>>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: Job) {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.seen.lock().unwrap().push(job);
        }
    }

    async fn drain(pool: &WorkerPool) {
        for _ in 0..200 {
            if pool.is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pool did not drain: {:?}", pool.stats());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_every_submitted_job() {
        let recorder = Arc::new(Recorder::default());
        let pool = WorkerPool::start(3, Arc::downgrade(&recorder));
        assert_eq!(pool.stats().size, 3);

        for i in 0..10 {
            pool.submit(Job::TryRun { node: NodeId::from(format!("n{}", i).as_str()), source: None });
        }
        pool.submit(Job::Perf(NodeId::from("p1")));
        drain(&pool).await;

        assert_eq!(recorder.seen.lock().unwrap().len(), 11);
        assert_eq!(pool.stats(), PoolStats { size: 3, backlog: 0, active: 0 });
    }

    #[tokio::test]
    async fn workers_stop_without_handler() {
        let recorder = Arc::new(Recorder::default());
        let pool = WorkerPool::start(1, Arc::downgrade(&recorder));
        drop(recorder);
        pool.submit(Job::Perf(NodeId::from("p1")));
        drain(&pool).await;
    }

    #[test]
    fn activity_guard_counts() {
        let activity = Activity::default();
        {
            let _a = activity.enter();
            let _b = activity.enter();
            assert_eq!(activity.in_flight(), 2);
        }
        assert_eq!(activity.in_flight(), 0);
    }
}
