//! Persistence contracts consumed by the scheduler.
//!
//! Repositories are the source of truth for durable node and task state.
//! The scheduler never keeps node records of its own between calls; it
//! re-reads them whenever a decision depends on them.

use async_trait::async_trait;

use tidemark_core::{DataId, Expression, FuncId, Node, NodeId, Pointer, Task, TaskId};

use crate::error::ServiceError;

#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// Insert or replace the node keyed by its id.
    async fn save(&self, node: &Node) -> Result<(), ServiceError>;

    async fn save_all(&self, nodes: &[Node]) -> Result<(), ServiceError>;

    /// Find the node computing the same thing, ignoring `outputs`.
    /// Root expressions are matched by their single output instead.
    async fn query_by_expression(&self, expression: &Expression) -> Result<Option<Node>, ServiceError>;

    /// Nodes consuming any of `ids` (one level downstream).
    async fn query_by_input(&self, ids: &[DataId]) -> Result<Vec<Node>, ServiceError>;

    /// Nodes producing any of `ids` (one level upstream).
    async fn query_by_output(&self, ids: &[DataId]) -> Result<Vec<Node>, ServiceError>;

    async fn query_by_func(&self, func_id: &FuncId) -> Result<Vec<Node>, ServiceError>;

    async fn query_all_root(&self) -> Result<Vec<Node>, ServiceError>;

    async fn query_all_non_root(&self) -> Result<Vec<Node>, ServiceError>;

    async fn get(&self, id: &NodeId) -> Result<Option<Node>, ServiceError>;

    /// Mark nodes deleted: they stop being returned by any query.
    async fn logic_delete(&self, ids: &[NodeId]) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn save(&self, task: &Task) -> Result<(), ServiceError>;

    async fn get(&self, id: &TaskId) -> Result<Option<Task>, ServiceError>;

    async fn delete(&self, id: &TaskId) -> Result<(), ServiceError>;

    /// Most recently started task producing `id`.
    async fn get_task_by_data_id(&self, id: &DataId) -> Result<Option<Task>, ServiceError>;

    /// Most recently started task producing `id` up to `to`.
    async fn get_task_by_data_id_and_to(&self, id: &DataId, to: Pointer) -> Result<Option<Task>, ServiceError>;
}
