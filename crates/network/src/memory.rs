//! In-memory repositories.
//!
//! Used by the simulation binary and the test suites. Indexes mirror the
//! queries a document store would serve: by output, by flattened input, by
//! operator and by expression identity.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use tidemark_core::{DataId, Expression, ExpressionKey, FuncId, Node, NodeId, Pointer, Task, TaskId};

use crate::error::ServiceError;
use crate::repository::{NodeRepository, TaskRepository};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, ServiceError> {
    lock.read()
        .map_err(|e| ServiceError::Other(format!("store read lock: {}", e)))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, ServiceError> {
    lock.write()
        .map_err(|e| ServiceError::Other(format!("store write lock: {}", e)))
}

#[derive(Debug, Default)]
struct NodeStore {
    nodes: HashMap<NodeId, Node>,
    deleted: HashSet<NodeId>,
    by_expression: HashMap<ExpressionKey, NodeId>,
    by_input: HashMap<DataId, BTreeSet<NodeId>>,
    by_output: HashMap<DataId, NodeId>,
    by_func: HashMap<FuncId, BTreeSet<NodeId>>,
}

impl NodeStore {
    fn insert(&mut self, node: &Node) {
        let id = node.id().clone();
        let expression = &node.expression;
        if !expression.is_root() {
            self.by_expression.insert(expression.key(), id.clone());
        }
        for input in expression.input_ids() {
            self.by_input.entry(input.clone()).or_default().insert(id.clone());
        }
        for output in &expression.outputs {
            self.by_output.insert(output.clone(), id.clone());
        }
        self.by_func
            .entry(expression.func_id.clone())
            .or_default()
            .insert(id.clone());
        self.deleted.remove(&id);
        self.nodes.insert(id, node.clone());
    }

    fn live(&self, id: &NodeId) -> Option<&Node> {
        if self.deleted.contains(id) {
            return None;
        }
        self.nodes.get(id)
    }

    fn collect<'a>(&self, ids: impl Iterator<Item = &'a NodeId>) -> Vec<Node> {
        let unique: BTreeSet<&NodeId> = ids.collect();
        unique.into_iter().filter_map(|id| self.live(id).cloned()).collect()
    }
}

/// Node repository backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryNodeRepository {
    store: RwLock<NodeStore>,
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (not deleted) nodes.
    pub fn len(&self) -> usize {
        self.store
            .read()
            .map(|s| s.nodes.keys().filter(|id| !s.deleted.contains(*id)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn save(&self, node: &Node) -> Result<(), ServiceError> {
        if node.expression.outputs.is_empty() {
            return Err(ServiceError::Rejected("node without outputs".to_string()));
        }
        write(&self.store)?.insert(node);
        Ok(())
    }

    async fn save_all(&self, nodes: &[Node]) -> Result<(), ServiceError> {
        if nodes.iter().any(|n| n.expression.outputs.is_empty()) {
            return Err(ServiceError::Rejected("node without outputs".to_string()));
        }
        let mut store = write(&self.store)?;
        for node in nodes {
            store.insert(node);
        }
        Ok(())
    }

    async fn query_by_expression(&self, expression: &Expression) -> Result<Option<Node>, ServiceError> {
        let store = read(&self.store)?;
        if expression.is_root() {
            if expression.outputs.len() != 1 {
                return Err(ServiceError::Rejected(
                    "root expression should have exactly one output".to_string(),
                ));
            }
            let id = &expression.outputs[0];
            return Ok(store
                .by_output
                .get(id)
                .and_then(|node_id| store.live(node_id))
                .filter(|node| node.is_root())
                .cloned());
        }
        Ok(store
            .by_expression
            .get(&expression.key())
            .and_then(|id| store.live(id))
            .cloned())
    }

    async fn query_by_input(&self, ids: &[DataId]) -> Result<Vec<Node>, ServiceError> {
        let store = read(&self.store)?;
        let hits = ids
            .iter()
            .filter_map(|id| store.by_input.get(id))
            .flat_map(|set| set.iter());
        Ok(store.collect(hits))
    }

    async fn query_by_output(&self, ids: &[DataId]) -> Result<Vec<Node>, ServiceError> {
        let store = read(&self.store)?;
        let hits = ids.iter().filter_map(|id| store.by_output.get(id));
        Ok(store.collect(hits))
    }

    async fn query_by_func(&self, func_id: &FuncId) -> Result<Vec<Node>, ServiceError> {
        let store = read(&self.store)?;
        let hits = store.by_func.get(func_id).into_iter().flat_map(|set| set.iter());
        Ok(store.collect(hits))
    }

    async fn query_all_root(&self) -> Result<Vec<Node>, ServiceError> {
        let store = read(&self.store)?;
        let hits = store.nodes.values().filter(|n| n.is_root()).map(|n| n.id());
        Ok(store.collect(hits))
    }

    async fn query_all_non_root(&self) -> Result<Vec<Node>, ServiceError> {
        let store = read(&self.store)?;
        let hits = store.nodes.values().filter(|n| !n.is_root()).map(|n| n.id());
        Ok(store.collect(hits))
    }

    async fn get(&self, id: &NodeId) -> Result<Option<Node>, ServiceError> {
        Ok(read(&self.store)?.live(id).cloned())
    }

    async fn logic_delete(&self, ids: &[NodeId]) -> Result<(), ServiceError> {
        let mut store = write(&self.store)?;
        for id in ids {
            if let Some(node) = store.nodes.get_mut(id) {
                node.invalidate();
                store.deleted.insert(id.clone());
            }
        }
        Ok(())
    }
}

/// Task repository backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    // (insertion sequence, task): the sequence breaks ties between tasks
    // started within the same clock tick.
    tasks: RwLock<HashMap<TaskId, (u64, Task)>>,
    seq: std::sync::atomic::AtomicU64,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn latest(&self, filter: impl Fn(&Task) -> bool) -> Result<Option<Task>, ServiceError> {
        let tasks = read(&self.tasks)?;
        Ok(tasks
            .values()
            .filter(|(_, task)| filter(task))
            .max_by_key(|(seq, task)| (task.start, *seq))
            .map(|(_, task)| task.clone()))
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: &Task) -> Result<(), ServiceError> {
        let mut tasks = write(&self.tasks)?;
        let seq = match tasks.get(&task.id) {
            Some((seq, _)) => *seq,
            None => self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        };
        tasks.insert(task.id.clone(), (seq, task.clone()));
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<Task>, ServiceError> {
        Ok(read(&self.tasks)?.get(id).map(|(_, task)| task.clone()))
    }

    async fn delete(&self, id: &TaskId) -> Result<(), ServiceError> {
        write(&self.tasks)?.remove(id);
        Ok(())
    }

    async fn get_task_by_data_id(&self, id: &DataId) -> Result<Option<Task>, ServiceError> {
        self.latest(|task| task.expression.outputs.contains(id))
    }

    async fn get_task_by_data_id_and_to(&self, id: &DataId, to: Pointer) -> Result<Option<Task>, ServiceError> {
        self.latest(|task| task.to == to && task.expression.outputs.contains(id))
    }
}
