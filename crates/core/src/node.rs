use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::NodeId;
use crate::expression::Expression;
use crate::pointer::Pointer;

/// Priority lane for nodes fed by live updates. Lower value = more urgent.
pub const UPDATE_PRIORITY: i32 = 0;
/// Priority lane for steady-state (backfill) nodes.
pub const STEADY_PRIORITY: i32 = 1;

/// Transient run state of a node. Held in memory only; a node with no
/// state is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "finished")]
    Finished,
    #[serde(rename = "system-failed")]
    SystemFailed,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Running => "running",
            NodeState::Failed => "failed",
            NodeState::Finished => "finished",
            NodeState::SystemFailed => "system-failed",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable scheduling record of one expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub valid: bool,
    pub effective_ptr: Pointer,
    pub expected_ptr: Pointer,
    pub expression: Expression,
    /// Force execution even when the operator would pass a single input through.
    pub must_calculate: bool,
    /// Update lane (live roots and everything fed by them).
    pub should_update: bool,
    pub is_perf_calculated: bool,
    /// Distance from the nearest root; roots are 0.
    pub depth: u32,
    /// Exists only because of on-demand materialization.
    pub generated: bool,
}

impl Node {
    pub fn new(expression: Expression) -> Self {
        Self {
            valid: true,
            effective_ptr: Pointer::ZERO,
            expected_ptr: Pointer::ZERO,
            expression,
            must_calculate: false,
            should_update: false,
            is_perf_calculated: false,
            depth: 0,
            generated: false,
        }
    }

    /// First output of the expression.
    ///
    /// Stored expressions always have at least one output; validation and
    /// id minting run before a node is created.
    pub fn id(&self) -> &NodeId {
        &self.expression.outputs[0]
    }

    pub fn is_root(&self) -> bool {
        self.expression.is_root()
    }

    pub fn should_run(&self) -> bool {
        self.expected_ptr > self.effective_ptr
    }

    pub fn is_run_root(&self) -> bool {
        self.is_root() || self.must_calculate
    }

    pub fn priority(&self) -> i32 {
        if self.should_update {
            UPDATE_PRIORITY
        } else {
            STEADY_PRIORITY
        }
    }

    /// Logical invalidation: poisoned until the operator is updated or the
    /// expression is re-added.
    pub fn invalidate(&mut self) {
        self.valid = false;
        self.effective_ptr = Pointer::ZERO;
    }
}
