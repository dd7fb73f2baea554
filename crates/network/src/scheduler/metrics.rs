use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::pool::PoolStats;

/// Scheduler operational counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkMetrics {
    /// Executor accepted the task.
    pub runs_started: u64,
    /// Executor declined to start (no slot).
    pub runs_refused: u64,
    pub runs_finished: u64,
    pub runs_failed: u64,
    pub runs_system_failed: u64,
    /// Attempts deferred because the node was already running.
    pub retries_deferred: u64,
    /// Propagation jobs discarded because the triggering upstream moved on.
    pub stale_discards: u64,
    /// Nodes poisoned by invalidation cascades or deletion.
    pub nodes_invalidated: u64,
    /// Mean time from task start to success report.
    pub avg_run_duration: Duration,
    pub last_finished: Option<DateTime<Utc>>,
    /// Filled in when a snapshot is taken.
    pub pool: PoolStats,
    /// Active workers over pool size (0.0 - 1.0).
    pub worker_utilization: f64,
}

impl NetworkMetrics {
    /// Record a successful run of the given duration.
    pub fn record_finished(&mut self, duration: Duration) {
        self.runs_finished += 1;
        self.last_finished = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let count = self.runs_finished;
        self.avg_run_duration = if count == 1 {
            duration
        } else {
            let prev = self.avg_run_duration.as_nanos() as f64;
            let cur = duration.as_nanos() as f64;
            Duration::from_nanos((prev + (cur - prev) / count as f64) as u64)
        };
    }

    pub fn with_pool(mut self, pool: PoolStats) -> Self {
        self.worker_utilization = if pool.size == 0 {
            0.0
        } else {
            pool.active as f64 / pool.size as f64
        };
        self.pool = pool;
        self
    }
}
