//! Graph insertion and watermark propagation.

use tracing::{debug, info, warn};

use tidemark_core::{DataId, Expression, Node, NodeId, Pointer};

use crate::error::{NetworkError, Result};
use crate::scheduler::pool::Job;

use super::ExpressionNetwork;

impl ExpressionNetwork {
    /// Insert `expression` into the graph, returning its outputs.
    ///
    /// Idempotent: an expression equal to a stored one (ignoring outputs)
    /// returns the stored outputs. Every input must already be produced by a
    /// node. When the caller leaves `outputs` empty a fresh id is minted.
    pub async fn add(&self, expression: Expression) -> Result<Vec<DataId>> {
        self.insert(expression, false).await
    }

    /// Like [`add`](Self::add), for nodes materialized on demand. A later
    /// plain `add` of the same expression promotes the node to explicit.
    pub async fn add_generated(&self, expression: Expression) -> Result<Vec<DataId>> {
        self.insert(expression, true).await
    }

    async fn insert(&self, expression: Expression, generated: bool) -> Result<Vec<DataId>> {
        let _activity = self.activity.enter();
        expression.validate()?;
        let _guard = self.add_lock.lock().await;

        if let Some(existing) = self.nodes.query_by_expression(&expression).await? {
            return self.readd(existing, generated).await;
        }

        if expression.is_root() {
            if let Some(producer) = self.nodes.query_by_output(&expression.outputs).await?.into_iter().next() {
                return Err(NetworkError::InvalidExpression(format!(
                    "{} is produced by operator {} and cannot become a root",
                    producer.id(),
                    producer.expression.func_id
                )));
            }
            let mut node = Node::new(expression);
            node.should_update = true;
            node.generated = generated;
            self.nodes.save(&node).await?;
            info!(node = %node.id(), "Root added");
            return Ok(node.expression.outputs);
        }

        let mut depth = 0;
        let mut should_update = false;
        for id in expression.input_ids() {
            let upstream = self.upstream_of(id).await?;
            depth = depth.max(upstream.depth + 1);
            should_update |= upstream.should_update;
        }

        let mut expression = expression;
        if expression.outputs.is_empty() {
            expression.outputs = vec![DataId::mint(&self.config.output_prefix)];
        } else if !self.nodes.query_by_output(&expression.outputs).await?.is_empty() {
            return Err(NetworkError::InvalidExpression(format!(
                "outputs {:?} are already produced by another node",
                expression.outputs
            )));
        }

        let mut node = Node::new(expression);
        node.depth = depth;
        node.should_update = should_update;
        node.generated = generated;
        self.nodes.save(&node).await?;
        info!(node = %node.id(), func = %node.expression.func_id, depth, "Expression added");

        // Upstreams may already hold data; give the new node a first look.
        self.submit(Job::TryRun { node: node.id().clone(), source: None });
        Ok(node.expression.outputs)
    }

    /// Add of an expression already in the graph. An explicit add promotes a
    /// generated node and clears an invalidation, restarting it from ZERO.
    async fn readd(&self, existing: Node, generated: bool) -> Result<Vec<DataId>> {
        let id = existing.id().clone();
        let revived = {
            let _guard = self.locks.lock(&id).await;
            let mut node = self.node(&id).await?;
            let mut changed = false;
            let mut revived = false;
            if !generated && node.generated {
                node.generated = false;
                changed = true;
                info!(node = %id, "Generated node promoted to explicit");
            }
            if !generated && !node.valid {
                node.valid = true;
                node.effective_ptr = Pointer::ZERO;
                changed = true;
                revived = !node.is_root();
                info!(node = %id, "Invalidated node cleared by re-add");
            }
            if changed {
                self.nodes.save(&node).await?;
            }
            revived
        };

        if revived {
            self.submit(Job::TryRun { node: id, source: None });
        }
        Ok(existing.expression.outputs)
    }

    /// The node producing `id`, or an unknown-reference error.
    async fn upstream_of(&self, id: &DataId) -> Result<Node> {
        self.nodes
            .query_by_output(std::slice::from_ref(id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| NetworkError::UnknownReference(id.clone()))
    }

    /// Expected pointer of `node`: the minimum effective pointer over its
    /// direct upstreams, floored to a tick boundary of the node's own output.
    /// Roots expect exactly what they have.
    pub async fn find_expected_ptr(&self, node: &Node) -> Result<Pointer> {
        if node.is_root() {
            return Ok(node.effective_ptr);
        }
        let mut raw = Pointer::MAX;
        for id in node.expression.input_ids() {
            raw = raw.min(self.upstream_of(id).await?.effective_ptr);
        }

        let id = node.id();
        let symbol = self
            .symbols
            .get_symbol(id)
            .await
            .map_err(|e| NetworkError::Normalization { id: id.clone(), reason: e.to_string() })?;
        symbol
            .normalize(raw)
            .map_err(|e| NetworkError::Normalization { id: id.clone(), reason: e.to_string() })
    }

    /// Schedule a run attempt for every direct child of `node` on the same
    /// lane. Returns the number of attempts submitted.
    pub async fn update_downstream(&self, node: &Node) -> Result<usize> {
        let children = self.nodes.query_by_input(&node.expression.outputs).await?;
        let mut submitted = 0;
        for child in children {
            if child.should_update != node.should_update {
                continue;
            }
            self.submit(Job::TryRun {
                node: child.id().clone(),
                source: Some((node.id().clone(), node.effective_ptr)),
            });
            submitted += 1;
        }
        debug!(node = %node.id(), submitted, "Downstream propagation scheduled");
        Ok(submitted)
    }

    /// Advance a root's watermark. Pointers only move forward: a value not
    /// above the current effective pointer is ignored and `false` returned.
    pub async fn update_root(&self, id: &NodeId, ptr: Pointer) -> Result<bool> {
        let _activity = self.activity.enter();
        let node = {
            let _guard = self.locks.lock(id).await;
            let mut node = self.node(id).await?;
            if !node.is_root() {
                return Err(NetworkError::NotRoot(id.clone()));
            }
            if ptr <= node.effective_ptr {
                debug!(node = %id, current = %node.effective_ptr, requested = %ptr, "Root update ignored");
                return Ok(false);
            }
            node.effective_ptr = ptr;
            node.expected_ptr = ptr;
            self.nodes.save(&node).await?;
            node
        };
        info!(node = %id, ptr = %ptr, "Root advanced");
        self.update_downstream(&node).await?;
        Ok(true)
    }

    /// Transport-facing alias of [`update_root`](Self::update_root).
    pub async fn run_root(&self, id: &NodeId, ptr: Pointer) -> Result<bool> {
        self.update_root(id, ptr).await
    }

    /// Rewind everything downstream of root `id` to `reset` and propagate
    /// again from the root, whose own pointer is left alone. Returns the size
    /// of the closure, root included.
    pub async fn re_update_root(&self, id: &NodeId, reset: Pointer) -> Result<usize> {
        let _activity = self.activity.enter();
        if !self.node(id).await?.is_root() {
            return Err(NetworkError::NotRoot(id.clone()));
        }

        let descendants: Vec<NodeId> = self
            .downstream_closure(std::slice::from_ref(id), false)
            .await?
            .iter()
            .map(|node| node.id().clone())
            .collect();
        self.modify_each(&descendants, |node| node.effective_ptr = reset).await?;

        let root = self.node(id).await?;
        info!(node = %id, reset = %reset, rewound = descendants.len(), "Root rewound");
        self.update_downstream(&root).await?;
        Ok(descendants.len() + 1)
    }

    /// Rewind each root to [`Pointer::ZERO`] and recompute from it. Per-root
    /// failures are logged; returns how many roots were processed.
    pub async fn force_update_roots(&self, ids: &[NodeId]) -> usize {
        let mut done = 0;
        for id in ids {
            match self.re_update_root(id, Pointer::ZERO).await {
                Ok(_) => done += 1,
                Err(e) => warn!(node = %id, error = %e, "Forced root update failed"),
            }
        }
        done
    }
}
