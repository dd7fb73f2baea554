use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tidemark_core::config::SchedulerConfig;
use tidemark_core::{DataId, Node, NodeId, NodeState};

use crate::error::{NetworkError, Result};
use crate::repository::{NodeRepository, TaskRepository};
use crate::scheduler::locks::NodeLocks;
use crate::scheduler::metrics::NetworkMetrics;
use crate::scheduler::pool::{Activity, Job, JobHandler, PoolStats, WorkerPool};
use crate::scheduler::state::RunStates;
use crate::services::{DataInfo, Executor, MessageQueue, PerformanceService, SymbolLibraryService};

/// The expression scheduler.
///
/// Owns the per-node lock array, the ephemeral run state and the background
/// worker pool. Durable node and task state lives in the repositories and is
/// re-read whenever a decision depends on it.
pub struct ExpressionNetwork {
    pub(super) nodes: Arc<dyn NodeRepository>,
    pub(super) tasks: Arc<dyn TaskRepository>,
    pub(super) executor: Arc<dyn Executor>,
    pub(super) symbols: Arc<dyn SymbolLibraryService>,
    pub(super) queue: Option<Arc<dyn MessageQueue>>,
    pub(super) perf: Option<Arc<dyn PerformanceService>>,
    pub(super) data_info: Option<Arc<dyn DataInfo>>,
    pub(super) config: SchedulerConfig,
    pub(super) locks: NodeLocks,
    pub(super) states: RunStates,
    pub(super) pool: WorkerPool,
    pub(super) activity: Activity,
    /// Serializes graph insertion so concurrent adds of one expression
    /// cannot both miss the lookup.
    pub(super) add_lock: Mutex<()>,
    pub(super) metrics: RwLock<NetworkMetrics>,
}

// ── Builder ──────────────────────────────────────────────────────────

/// Fluent builder for an [`ExpressionNetwork`].
///
/// # Example
/// ```ignore
/// let network = ExpressionNetwork::builder()
///     .node_repository(nodes)
///     .task_repository(tasks)
///     .executor(executor)
///     .symbols(symbols)
///     .message_queue(queue)
///     .build()?;
/// ```
#[derive(Default)]
pub struct ExpressionNetworkBuilder {
    nodes: Option<Arc<dyn NodeRepository>>,
    tasks: Option<Arc<dyn TaskRepository>>,
    executor: Option<Arc<dyn Executor>>,
    symbols: Option<Arc<dyn SymbolLibraryService>>,
    queue: Option<Arc<dyn MessageQueue>>,
    perf: Option<Arc<dyn PerformanceService>>,
    data_info: Option<Arc<dyn DataInfo>>,
    config: SchedulerConfig,
}

impl ExpressionNetworkBuilder {
    pub fn node_repository(mut self, nodes: Arc<dyn NodeRepository>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    pub fn task_repository(mut self, tasks: Arc<dyn TaskRepository>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn symbols(mut self, symbols: Arc<dyn SymbolLibraryService>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    /// Notification sink (optional; notifications are dropped without one).
    pub fn message_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn performance(mut self, perf: Arc<dyn PerformanceService>) -> Self {
        self.perf = Some(perf);
        self
    }

    pub fn data_info(mut self, data_info: Arc<dyn DataInfo>) -> Self {
        self.data_info = Some(data_info);
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the network and start its worker pool. Must be called from
    /// within a tokio runtime.
    pub fn build(self) -> Result<Arc<ExpressionNetwork>> {
        tokio::runtime::Handle::try_current().map_err(|e| NetworkError::Config(e.to_string()))?;
        let missing = |what: &str| NetworkError::Config(format!("missing collaborator: {}", what));
        let nodes = self.nodes.ok_or_else(|| missing("node repository"))?;
        let tasks = self.tasks.ok_or_else(|| missing("task repository"))?;
        let executor = self.executor.ok_or_else(|| missing("executor"))?;
        let symbols = self.symbols.ok_or_else(|| missing("symbol library"))?;

        let config = self.config;
        let workers = config.resolved_workers();
        info!(
            "Expression network starting: {} lock shards, {} workers",
            config.lock_shards, workers
        );

        Ok(Arc::new_cyclic(|weak| ExpressionNetwork {
            nodes,
            tasks,
            executor,
            symbols,
            queue: self.queue,
            perf: self.perf,
            data_info: self.data_info,
            locks: NodeLocks::new(config.lock_shards),
            states: RunStates::new(),
            pool: WorkerPool::start(workers, weak.clone()),
            activity: Activity::default(),
            add_lock: Mutex::new(()),
            metrics: RwLock::new(NetworkMetrics::default()),
            config,
        }))
    }
}

// ── Notifications ────────────────────────────────────────────────────

/// Status change published to the message queue.
pub(super) enum Notice<'a> {
    Running,
    Finished,
    Failed(&'a str),
    SystemFailed(&'a str),
}

impl ExpressionNetwork {
    pub fn builder() -> ExpressionNetworkBuilder {
        ExpressionNetworkBuilder::default()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Snapshot of the counters, with current pool figures.
    pub fn metrics(&self) -> NetworkMetrics {
        let metrics = self.metrics.read().map(|m| m.clone()).unwrap_or_default();
        metrics.with_pool(self.pool.stats())
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Ephemeral run state of `id`; `None` means idle.
    pub fn node_state(&self, id: &NodeId) -> Option<NodeState> {
        self.states.get(id)
    }

    /// Durable record of `id`.
    pub async fn node(&self, id: &NodeId) -> Result<Node> {
        self.nodes
            .get(id)
            .await?
            .ok_or_else(|| NetworkError::NodeNotFound(id.clone()))
    }

    /// Wait until no background job is queued or executing, no public call
    /// is in progress and no node is RUNNING. Returns false on timeout.
    pub async fn wait_settled(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_settled() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(pool = ?self.pool.stats(), running = self.states.running_count(), "Network did not settle");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn is_settled(&self) -> bool {
        self.pool.is_idle() && self.activity.in_flight() == 0 && self.states.running_count() == 0
    }

    pub(super) fn record(&self, f: impl FnOnce(&mut NetworkMetrics)) {
        if let Ok(mut m) = self.metrics.write() {
            f(&mut m);
        }
    }

    pub(super) fn submit(&self, job: Job) {
        self.pool.submit(job);
    }

    /// Deliver a status change. Delivery failures are logged only.
    pub(super) async fn publish(&self, id: &DataId, notice: Notice<'_>) {
        let Some(queue) = &self.queue else { return };
        let result = match notice {
            Notice::Running => queue.push_running(id).await,
            Notice::Finished => queue.push_run_finish(id).await,
            Notice::Failed(reason) => queue.push_run_failed(id, reason).await,
            Notice::SystemFailed(reason) => queue.push_system_failed(id, reason).await,
        };
        if let Err(e) = result {
            warn!(node = %id, error = %e, "Notification delivery failed");
        }
    }

    /// Every node reachable downstream of `start` (one level at a time via
    /// `query_by_input`), each visited once. With `include_start`, the start
    /// nodes themselves lead the result.
    pub(super) async fn downstream_closure(&self, start: &[NodeId], include_start: bool) -> Result<Vec<Node>> {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut closure = Vec::new();
        let mut frontier: VecDeque<Node> = VecDeque::new();

        for id in start {
            if !visited.insert(id.clone()) {
                continue;
            }
            let node = self.node(id).await?;
            if include_start {
                closure.push(node.clone());
            }
            frontier.push_back(node);
        }

        while let Some(node) = frontier.pop_front() {
            for child in self.nodes.query_by_input(&node.expression.outputs).await? {
                if visited.insert(child.id().clone()) {
                    closure.push(child.clone());
                    frontier.push_back(child);
                }
            }
        }
        Ok(closure)
    }

    /// Poison `start` and everything downstream of it. Returns the number of
    /// nodes written.
    pub(super) async fn invalidate_downstream(&self, start: &NodeId) -> Result<usize> {
        let closure: Vec<NodeId> = self
            .downstream_closure(std::slice::from_ref(start), true)
            .await?
            .iter()
            .map(|node| node.id().clone())
            .collect();
        let count = self.modify_each(&closure, Node::invalidate).await?;
        self.record(|m| m.nodes_invalidated += count as u64);
        info!(node = %start, invalidated = count, "Invalidation cascade complete");
        Ok(count)
    }

    /// Apply `change` to each of `ids`, one node at a time under its lock and
    /// against a fresh read. Nodes gone in the meantime are skipped. Returns
    /// the number of nodes written.
    pub(super) async fn modify_each<F>(&self, ids: &[NodeId], mut change: F) -> Result<usize>
    where
        F: FnMut(&mut Node) + Send,
    {
        let mut written = 0;
        for id in ids {
            let _guard = self.locks.lock(id).await;
            let Some(mut node) = self.nodes.get(id).await? else {
                debug!(node = %id, "Node vanished before update");
                continue;
            };
            change(&mut node);
            self.nodes.save(&node).await?;
            written += 1;
        }
        Ok(written)
    }
}

#[async_trait]
impl JobHandler for ExpressionNetwork {
    async fn handle(&self, job: Job) {
        match job {
            Job::TryRun { node, source } => match self.try_run(&node, source).await {
                Ok(outcome) => debug!(node = %node, ?outcome, "Run attempt"),
                Err(e) => warn!(node = %node, error = %e, "Run attempt failed"),
            },
            Job::Perf(node) => {
                if let Err(e) = self.performance_pass(&node).await {
                    warn!(node = %node, error = %e, "Performance pass failed");
                }
            }
        }
    }
}
