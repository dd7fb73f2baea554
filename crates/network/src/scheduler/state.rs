use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tidemark_core::{NodeId, NodeState};

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<NodeId, NodeState>,
    pending: HashSet<NodeId>,
}

/// Process-local run state of every node: the transient state map and the
/// deduplicated set of nodes owed one follow-up attempt.
///
/// Owned by a single [`ExpressionNetwork`](super::ExpressionNetwork); lost on
/// restart. A node with no entry is idle. Check-then-act sequences must run
/// under the node's shard lock; this type only makes each call atomic.
#[derive(Debug, Default)]
pub struct RunStates {
    inner: Mutex<Inner>,
}

impl RunStates {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Inner> {
        // Every critical section is a single map operation; a poisoned
        // guard still holds consistent data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, id: &NodeId) -> Option<NodeState> {
        self.guard().states.get(id).copied()
    }

    pub fn set(&self, id: &NodeId, state: NodeState) {
        self.guard().states.insert(id.clone(), state);
    }

    pub fn is_running(&self, id: &NodeId) -> bool {
        self.get(id) == Some(NodeState::Running)
    }

    pub fn running_count(&self) -> usize {
        self.guard()
            .states
            .values()
            .filter(|s| **s == NodeState::Running)
            .count()
    }

    /// Record that `id` owes one more attempt. Returns false when it was
    /// already pending.
    pub fn mark_pending(&self, id: &NodeId) -> bool {
        self.guard().pending.insert(id.clone())
    }

    /// Clear the pending flag, returning whether it was set.
    pub fn take_pending(&self, id: &NodeId) -> bool {
        self.guard().pending.remove(id)
    }

    pub fn is_pending(&self, id: &NodeId) -> bool {
        self.guard().pending.contains(id)
    }

    pub fn forget(&self, id: &NodeId) {
        let mut inner = self.guard();
        inner.states.remove(id);
        inner.pending.remove(id);
    }

    /// States of `ids`; idle nodes are omitted.
    pub fn snapshot<'a>(&self, ids: impl IntoIterator<Item = &'a NodeId>) -> HashMap<NodeId, NodeState> {
        let inner = self.guard();
        ids.into_iter()
            .filter_map(|id| inner.states.get(id).map(|s| (id.clone(), *s)))
            .collect()
    }
}
