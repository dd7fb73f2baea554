//! Administrative operations and read-only projections.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use tracing::{info, warn};

use tidemark_core::{DataId, FuncId, Node, NodeId, NodeState, Pointer, Task};

use crate::error::{NetworkError, Result};
use crate::scheduler::pool::Job;
use crate::view::GraphView;

use super::ExpressionNetwork;

/// Scheduling state of one node as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionState {
    pub id: DataId,
    /// `None` when idle.
    pub state: Option<NodeState>,
    pub valid: bool,
    pub effective_ptr: Pointer,
    pub expected_ptr: Pointer,
}

impl ExpressionNetwork {
    /// Reset every node using `func_id` so it recomputes from scratch.
    /// Descendants are not touched; they follow when the node runs again.
    pub async fn update_func(&self, func_id: &FuncId) -> Result<usize> {
        let _activity = self.activity.enter();
        let affected = self.nodes.query_by_func(func_id).await?;
        for stale in &affected {
            let id = stale.id();
            let _guard = self.locks.lock(id).await;
            let mut node = self.node(id).await?;
            node.effective_ptr = Pointer::ZERO;
            node.valid = true;
            self.nodes.save(&node).await?;
        }
        info!(func = %func_id, nodes = affected.len(), "Operator updated, nodes reset");
        Ok(affected.len())
    }

    pub async fn mark_must_calc(&self, ids: &[NodeId], must_calculate: bool) -> Result<usize> {
        let _activity = self.activity.enter();
        for id in ids {
            let _guard = self.locks.lock(id).await;
            let mut node = self.node(id).await?;
            node.must_calculate = must_calculate;
            self.nodes.save(&node).await?;
        }
        Ok(ids.len())
    }

    /// Move `ids` and their whole downstream closure to the update lane
    /// (`true`) or the steady lane (`false`).
    pub async fn mark_should_update(&self, ids: &[NodeId], should_update: bool) -> Result<usize> {
        let _activity = self.activity.enter();
        let closure: Vec<NodeId> = self
            .downstream_closure(ids, true)
            .await?
            .iter()
            .map(|node| node.id().clone())
            .collect();
        let changed = self.modify_each(&closure, |node| node.should_update = should_update).await?;
        info!(nodes = changed, should_update, "Lane changed");
        Ok(changed)
    }

    pub async fn mark_all_roots_should_update(&self) -> Result<usize> {
        let _activity = self.activity.enter();
        let roots: Vec<NodeId> = self
            .nodes
            .query_all_root()
            .await?
            .iter()
            .map(|root| root.id().clone())
            .collect();
        self.modify_each(&roots, |root| root.should_update = true).await
    }

    /// State of each requested node. Unknown ids are skipped.
    pub async fn query_expressions_state(&self, ids: &[NodeId]) -> Result<Vec<ExpressionState>> {
        let nodes = self.nodes.query_by_output(ids).await?;
        Ok(nodes
            .into_iter()
            .map(|node| ExpressionState {
                state: self.states.get(node.id()),
                id: node.id().clone(),
                valid: node.valid,
                effective_ptr: node.effective_ptr,
                expected_ptr: node.expected_ptr,
            })
            .collect())
    }

    /// `ids` followed by every node upstream of them, each once.
    async fn upstream_closure(&self, ids: &[NodeId]) -> Result<Vec<Node>> {
        let mut visited: HashSet<DataId> = HashSet::new();
        let mut closure = Vec::new();
        let mut frontier: VecDeque<DataId> = ids.iter().cloned().collect();

        while let Some(id) = frontier.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let node = match self.nodes.query_by_output(std::slice::from_ref(&id)).await?.into_iter().next() {
                Some(node) => node,
                None => return Err(NetworkError::NodeNotFound(id)),
            };
            frontier.extend(node.expression.input_ids().filter(|i| !visited.contains(*i)).cloned());
            closure.push(node);
        }
        Ok(closure)
    }

    /// Every data id `id` depends on, directly or not.
    pub async fn find_all_upstream(&self, id: &NodeId) -> Result<Vec<DataId>> {
        let closure = self.upstream_closure(std::slice::from_ref(id)).await?;
        Ok(closure.iter().skip(1).map(|node| node.id().clone()).collect())
    }

    /// Data/operator graph of `ids` and everything they depend on.
    pub async fn build_graph(&self, ids: &[NodeId]) -> Result<GraphView> {
        Ok(GraphView::build(&self.upstream_closure(ids).await?))
    }

    /// [`build_graph`](Self::build_graph) with live scheduling fields on
    /// every data node.
    pub async fn build_debug_graph(&self, ids: &[NodeId]) -> Result<GraphView> {
        let nodes = self.upstream_closure(ids).await?;
        let states = self.states.snapshot(nodes.iter().map(|n| n.id()));
        Ok(GraphView::build_debug(&nodes, &states))
    }

    /// Remove `id` from the graph: cancel its run, drop its data and poison
    /// everything derived from it. Collaborator failures are logged.
    pub async fn delete_node(&self, id: &NodeId) -> Result<usize> {
        let _activity = self.activity.enter();
        self.node(id).await?;

        {
            let _guard = self.locks.lock(id).await;
            if self.states.is_running(id) {
                if let Some(task) = self.tasks.get_task_by_data_id(id).await? {
                    if let Err(e) = self.executor.try_cancel(&task.id).await {
                        warn!(node = %id, task = %task.id, error = %e, "Cancel failed");
                    }
                }
            }
            self.states.forget(id);
        }

        if let Err(e) = self.executor.delete_data(id).await {
            warn!(node = %id, error = %e, "Executor data deletion failed");
        }
        if let Some(info) = &self.data_info {
            if let Err(e) = info.delete_data(id).await {
                warn!(node = %id, error = %e, "Data info deletion failed");
            }
        }

        let invalidated = self.invalidate_downstream(id).await?;
        self.nodes.logic_delete(std::slice::from_ref(id)).await?;
        info!(node = %id, invalidated, "Node deleted");
        Ok(invalidated)
    }

    /// Crash-recovery sweep: submit an attempt for every valid non-root node
    /// without a RUNNING marker. Returns the number submitted.
    pub async fn recover(&self) -> Result<usize> {
        let _activity = self.activity.enter();
        let mut submitted = 0;
        for node in self.nodes.query_all_non_root().await? {
            if !node.valid || self.states.is_running(node.id()) {
                continue;
            }
            self.submit(Job::TryRun { node: node.id().clone(), source: None });
            submitted += 1;
        }
        info!(submitted, "Recovery sweep scheduled");
        Ok(submitted)
    }

    /// Most recent task producing `id`, optionally the one ending at `to`.
    pub async fn latest_task(&self, id: &DataId, to: Option<Pointer>) -> Result<Option<Task>> {
        let task = match to {
            Some(to) => self.tasks.get_task_by_data_id_and_to(id, to).await?,
            None => self.tasks.get_task_by_data_id(id).await?,
        };
        Ok(task)
    }

    pub async fn expression_data_info(
        &self,
        id: &DataId,
        start: Option<&str>,
        end: Option<&str>,
        need_perf: Option<&str>,
    ) -> Result<String> {
        let info = self
            .data_info
            .as_ref()
            .ok_or_else(|| NetworkError::Config("no data info service configured".to_string()))?;
        Ok(info.get_express_data_info(id, start, end, need_perf).await?)
    }
}
