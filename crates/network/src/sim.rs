//! Simulated collaborators for the simulation binary and tests.
//!
//! [`SimulatedExecutor`] reports completion the way a remote executor does:
//! asynchronously, through the network's public completion calls, never from
//! inside [`Executor::run`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use tidemark_core::{DataId, Symbol, Task, TaskId};

use crate::error::ServiceError;
use crate::scheduler::ExpressionNetwork;
use crate::services::{DataInfo, Executor, PerformanceService, SymbolLibraryService};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// How the simulated executor answers a run request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "reason")]
pub enum Outcome {
    /// Accept, then report success after the delay.
    Succeed,
    /// Accept, then report a logical failure.
    Fail(String),
    /// Decline: no free slot.
    Refuse,
    /// The call itself errors.
    Unreachable,
    /// Accept and keep running until released.
    Hold,
}

#[derive(Default)]
struct ExecState {
    calls: Vec<Task>,
    in_progress: HashSet<DataId>,
    overlaps: usize,
    held: Vec<TaskId>,
    cancelled: Vec<TaskId>,
    deleted: Vec<DataId>,
}

pub struct SimulatedExecutor {
    network: RwLock<Weak<ExpressionNetwork>>,
    default_outcome: Mutex<Outcome>,
    outcomes: Mutex<HashMap<DataId, Outcome>>,
    delay: Duration,
    state: Arc<Mutex<ExecState>>,
}

impl SimulatedExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            network: RwLock::new(Weak::new()),
            default_outcome: Mutex::new(Outcome::Succeed),
            outcomes: Mutex::new(HashMap::new()),
            delay,
            state: Arc::new(Mutex::new(ExecState::default())),
        }
    }

    /// Wire completion reports to `network`.
    pub fn attach(&self, network: &Arc<ExpressionNetwork>) {
        if let Ok(mut slot) = self.network.write() {
            *slot = Arc::downgrade(network);
        }
    }

    pub fn set_default(&self, outcome: Outcome) {
        *lock(&self.default_outcome) = outcome;
    }

    pub fn set_outcome(&self, id: impl Into<DataId>, outcome: Outcome) {
        lock(&self.outcomes).insert(id.into(), outcome);
    }

    fn outcome_for(&self, id: &DataId) -> Outcome {
        lock(&self.outcomes)
            .get(id)
            .cloned()
            .unwrap_or_else(|| lock(&self.default_outcome).clone())
    }

    fn network(&self) -> Option<Arc<ExpressionNetwork>> {
        self.network.read().ok().and_then(|w| w.upgrade())
    }

    /// Every task handed to `run`, in call order.
    pub fn calls(&self) -> Vec<Task> {
        lock(&self.state).calls.clone()
    }

    pub fn calls_for(&self, id: &DataId) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|t| t.node_id() == Some(id))
            .count()
    }

    /// Times `run` was entered for a node that already had work in progress.
    pub fn overlaps(&self) -> usize {
        lock(&self.state).overlaps
    }

    pub fn held(&self) -> Vec<TaskId> {
        lock(&self.state).held.clone()
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        lock(&self.state).cancelled.clone()
    }

    pub fn deleted(&self) -> Vec<DataId> {
        lock(&self.state).deleted.clone()
    }

    /// Report success for every held task.
    pub async fn release_held(&self) -> usize {
        let (held, ids): (Vec<TaskId>, Vec<DataId>) = {
            let mut state = lock(&self.state);
            let held = std::mem::take(&mut state.held);
            let calls = &state.calls;
            let ids = held
                .iter()
                .filter_map(|h| calls.iter().find(|t| &t.id == h).and_then(|t| t.node_id().cloned()))
                .collect();
            (held, ids)
        };
        {
            let mut state = lock(&self.state);
            for id in &ids {
                state.in_progress.remove(id);
            }
        }
        let Some(network) = self.network() else { return 0 };
        for task in &held {
            if let Err(e) = network.succeed_run(task).await {
                warn!(task = %task, error = %e, "Held task completion failed");
            }
        }
        held.len()
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn run(&self, task: &Task) -> Result<bool, ServiceError> {
        let id = task
            .node_id()
            .cloned()
            .ok_or_else(|| ServiceError::Rejected("task without output".to_string()))?;
        let outcome = self.outcome_for(&id);

        {
            let mut state = lock(&self.state);
            state.calls.push(task.clone());
            match outcome {
                Outcome::Refuse => return Ok(false),
                Outcome::Unreachable => {
                    return Err(ServiceError::Unavailable("simulated executor unreachable".to_string()))
                }
                _ => {}
            }
            if !state.in_progress.insert(id.clone()) {
                state.overlaps += 1;
            }
            if outcome == Outcome::Hold {
                state.held.push(task.id.clone());
                return Ok(true);
            }
        }

        let network = self.network.read().map(|w| w.clone()).unwrap_or_default();
        let state = Arc::clone(&self.state);
        let task_id = task.id.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&state).in_progress.remove(&id);
            let Some(network) = network.upgrade() else { return };
            let result = match &outcome {
                Outcome::Fail(reason) => network.failed_run(&task_id, reason).await,
                _ => network.succeed_run(&task_id).await,
            };
            if let Err(e) = result {
                warn!(task = %task_id, error = %e, "Simulated completion failed");
            }
        });
        Ok(true)
    }

    async fn try_cancel(&self, id: &TaskId) -> Result<(), ServiceError> {
        lock(&self.state).cancelled.push(id.clone());
        Ok(())
    }

    async fn delete_data(&self, id: &DataId) -> Result<(), ServiceError> {
        lock(&self.state).deleted.push(id.clone());
        Ok(())
    }
}

// ── Symbol library ───────────────────────────────────────────────────

/// Symbol table held in memory. Unknown ids get period 1, offset 0.
#[derive(Default)]
pub struct StaticSymbolLibrary {
    symbols: RwLock<HashMap<DataId, Symbol>>,
    unavailable: RwLock<HashSet<DataId>>,
}

impl StaticSymbolLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, symbol: Symbol) {
        if let Ok(mut symbols) = self.symbols.write() {
            symbols.insert(symbol.id.clone(), symbol);
        }
    }

    /// Make lookups of `id` fail.
    pub fn make_unavailable(&self, id: impl Into<DataId>) {
        if let Ok(mut unavailable) = self.unavailable.write() {
            unavailable.insert(id.into());
        }
    }
}

#[async_trait]
impl SymbolLibraryService for StaticSymbolLibrary {
    async fn get_symbol(&self, id: &DataId) -> Result<Symbol, ServiceError> {
        if self.unavailable.read().map(|u| u.contains(id)).unwrap_or(false) {
            return Err(ServiceError::NotFound(format!("symbol {}", id)));
        }
        let symbol = self.symbols.read().ok().and_then(|s| s.get(id).cloned());
        Ok(symbol.unwrap_or_else(|| Symbol::new(id.clone(), "time", 0, "1")))
    }
}

// ── Performance and data info ────────────────────────────────────────

/// Performance service recording what it was asked to calculate.
#[derive(Default)]
pub struct RecordingPerformance {
    calculated: Mutex<Vec<DataId>>,
    fail: bool,
}

impl RecordingPerformance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn calculated(&self) -> Vec<DataId> {
        lock(&self.calculated).clone()
    }
}

#[async_trait]
impl PerformanceService for RecordingPerformance {
    async fn calculate(&self, id: &DataId) -> Result<(), ServiceError> {
        if self.fail {
            return Err(ServiceError::Unavailable("performance service down".to_string()));
        }
        lock(&self.calculated).push(id.clone());
        debug!(node = %id, "Performance calculated");
        Ok(())
    }
}

/// Data info echoing the request as JSON.
#[derive(Default)]
pub struct EchoDataInfo {
    deleted: Mutex<Vec<DataId>>,
}

impl EchoDataInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deleted(&self) -> Vec<DataId> {
        lock(&self.deleted).clone()
    }
}

#[async_trait]
impl DataInfo for EchoDataInfo {
    async fn get_express_data_info(
        &self,
        id: &DataId,
        start: Option<&str>,
        end: Option<&str>,
        need_perf: Option<&str>,
    ) -> Result<String, ServiceError> {
        let body = serde_json::json!({
            "id": id,
            "start": start,
            "end": end,
            "needPerf": need_perf,
        });
        Ok(body.to_string())
    }

    async fn delete_data(&self, id: &DataId) -> Result<(), ServiceError> {
        lock(&self.deleted).push(id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::{Expression, Input, Node, Pointer};

    #[tokio::test]
    async fn unknown_symbols_default_to_unit_period() {
        let library = StaticSymbolLibrary::new();
        library.insert(Symbol::new("p1", "time", 0, "5"));
        library.make_unavailable("p9");

        let p1 = library.get_symbol(&"p1".into()).await.unwrap();
        assert_eq!(p1.normalize(Pointer(12)).unwrap(), Pointer(10));
        let other = library.get_symbol(&"p2".into()).await.unwrap();
        assert_eq!(other.normalize(Pointer(12)).unwrap(), Pointer(12));
        assert!(library.get_symbol(&"p9".into()).await.is_err());
    }

    #[tokio::test]
    async fn executor_modes_without_network() {
        let executor = SimulatedExecutor::new(Duration::ZERO);
        let mut node = Node::new(Expression::new(vec![Input::single("d1")], "f1").with_outputs(vec!["p1".into()]));
        node.expected_ptr = Pointer(10);

        executor.set_outcome("p1", Outcome::Refuse);
        assert!(!executor.run(&Task::for_node(&node)).await.unwrap());
        executor.set_outcome("p1", Outcome::Unreachable);
        assert!(executor.run(&Task::for_node(&node)).await.is_err());
        executor.set_outcome("p1", Outcome::Hold);
        assert!(executor.run(&Task::for_node(&node)).await.unwrap());
        assert!(executor.run(&Task::for_node(&node)).await.unwrap());

        assert_eq!(executor.calls_for(&"p1".into()), 4);
        assert_eq!(executor.held().len(), 2);
        assert_eq!(executor.overlaps(), 1);
    }

    #[tokio::test]
    async fn echo_data_info() {
        let info = EchoDataInfo::new();
        let body = info.get_express_data_info(&"p1".into(), Some("0"), None, Some("true")).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["id"], "p1");
        assert_eq!(value["start"], "0");
        assert!(value["end"].is_null());
    }
}
