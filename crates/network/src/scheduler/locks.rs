use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

use tidemark_core::NodeId;

/// Fixed array of async mutexes shared by all nodes.
///
/// A node maps to shard `hash(id) % len`. Two unrelated nodes may land on the
/// same shard and wait on each other; two callers for the same node always
/// serialize. Nothing is allocated per node.
pub struct NodeLocks {
    shards: Vec<Mutex<()>>,
}

impl NodeLocks {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn shard_for(&self, id: &NodeId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Acquire the shard guarding `id`. Held across repository and executor
    /// calls, so the guard must not be held while waiting on another node.
    pub async fn lock(&self, id: &NodeId) -> MutexGuard<'_, ()> {
        self.shards[self.shard_for(id)].lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn shard_is_stable_and_in_range() {
        let locks = NodeLocks::new(8);
        let id = NodeId::from("expr_abc");
        let shard = locks.shard_for(&id);
        assert!(shard < 8);
        assert_eq!(shard, locks.shard_for(&id));
        assert_eq!(NodeLocks::new(0).len(), 1);
    }

    #[tokio::test]
    async fn same_node_serializes() {
        let locks = Arc::new(NodeLocks::new(1024));
        let id = NodeId::from("p1");
        let guard = locks.lock(&id).await;

        let contender = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender acquires after release")
            .unwrap();
    }
}
