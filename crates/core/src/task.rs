use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{NodeId, TaskId};
use crate::expression::Expression;
use crate::node::Node;
use crate::pointer::Pointer;

/// One execution attempt of a node over the half-open range `[from, to)`.
///
/// Tasks are not authoritative scheduling state; node pointers are. A task
/// may be lost and recreated freely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    /// Snapshot taken when the run was kicked off.
    pub expression: Expression,
    pub from: Pointer,
    pub to: Pointer,
    pub start: DateTime<Utc>,
    pub finish: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub priority: i32,
    #[serde(default)]
    pub must_calculate: bool,
}

impl Task {
    /// Build a task catching `node` up from its effective to its expected pointer.
    pub fn for_node(node: &Node) -> Self {
        Self::with_range(node, node.effective_ptr, node.expected_ptr)
    }

    pub fn with_range(node: &Node, from: Pointer, to: Pointer) -> Self {
        Self {
            id: TaskId::generate(),
            expression: node.expression.clone(),
            from,
            to,
            start: Utc::now(),
            finish: None,
            failed_reason: None,
            priority: node.priority(),
            must_calculate: node.must_calculate,
        }
    }

    /// A copy of this task over the same range under a fresh id.
    pub fn reissue(&self) -> Self {
        Self {
            id: TaskId::generate(),
            start: Utc::now(),
            finish: None,
            failed_reason: None,
            ..self.clone()
        }
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        self.expression.outputs.first()
    }

    pub fn conclude(&mut self, failed_reason: Option<String>) {
        self.finish = Some(Utc::now());
        self.failed_reason = failed_reason;
    }

    pub fn is_concluded(&self) -> bool {
        self.finish.is_some()
    }
}
