//! Read-only data/operator graph projections for visualization.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use tidemark_core::{DataId, Node, NodeId, NodeState, Pointer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphNodeKind {
    Data,
    Operator,
}

/// Live scheduling fields attached to data nodes in the debug view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub valid: bool,
    pub effective_ptr: Pointer,
    pub expected_ptr: Pointer,
    pub must_calculate: bool,
    pub should_update: bool,
    pub depth: u32,
    pub generated: bool,
    pub state: Option<NodeState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    /// `data:<id>` or `op:<first output>`.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: GraphNodeKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

/// Bipartite graph: data nodes feed operator nodes, which produce data nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

fn data_key(id: &DataId) -> String {
    format!("data:{}", id)
}

impl GraphView {
    pub fn build(nodes: &[Node]) -> Self {
        Self::assemble(nodes, None)
    }

    pub fn build_debug(nodes: &[Node], states: &HashMap<NodeId, NodeState>) -> Self {
        Self::assemble(nodes, Some(states))
    }

    fn assemble(nodes: &[Node], states: Option<&HashMap<NodeId, NodeState>>) -> Self {
        // Keyed by graph id so output order is deterministic.
        let mut vertices: BTreeMap<String, GraphNode> = BTreeMap::new();
        let mut edges = Vec::new();

        let data_vertex = |id: &DataId| GraphNode {
            id: data_key(id),
            kind: GraphNodeKind::Data,
            name: id.to_string(),
            debug: None,
        };

        for node in nodes {
            let debug = states.map(|states| DebugInfo {
                valid: node.valid,
                effective_ptr: node.effective_ptr,
                expected_ptr: node.expected_ptr,
                must_calculate: node.must_calculate,
                should_update: node.should_update,
                depth: node.depth,
                generated: node.generated,
                state: states.get(node.id()).copied(),
            });
            for output in &node.expression.outputs {
                let mut vertex = data_vertex(output);
                vertex.debug = debug.clone();
                vertices.insert(vertex.id.clone(), vertex);
            }
            if node.is_root() {
                continue;
            }

            let op = format!("op:{}", node.id());
            vertices.insert(
                op.clone(),
                GraphNode {
                    id: op.clone(),
                    kind: GraphNodeKind::Operator,
                    name: node.expression.func_id.to_string(),
                    debug: None,
                },
            );
            for input in node.expression.input_ids() {
                let key = data_key(input);
                vertices.entry(key.clone()).or_insert_with(|| data_vertex(input));
                edges.push(GraphEdge { from: key, to: op.clone() });
            }
            for output in &node.expression.outputs {
                edges.push(GraphEdge { from: op.clone(), to: data_key(output) });
            }
        }

        edges.sort();
        edges.dedup();
        Self {
            nodes: vertices.into_values().collect(),
            edges,
        }
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::{Expression, Input};

    fn sample() -> Vec<Node> {
        let mut p1 = Node::new(
            Expression::new(vec![Input::single("d1"), Input::single("d2")], "f1").with_outputs(vec!["p1".into()]),
        );
        p1.effective_ptr = Pointer(10);
        vec![
            Node::new(Expression::make_root("d1")),
            Node::new(Expression::make_root("d2")),
            p1,
        ]
    }

    #[test]
    fn bipartite_layout() {
        let view = GraphView::build(&sample());
        assert_eq!(view.nodes.len(), 4);
        assert_eq!(view.node("op:p1").unwrap().name, "f1");
        assert_eq!(view.edges.len(), 3);
        assert!(view.edges.contains(&GraphEdge { from: "data:d1".into(), to: "op:p1".into() }));
        assert!(view.edges.contains(&GraphEdge { from: "op:p1".into(), to: "data:p1".into() }));
        assert!(view.nodes.iter().all(|n| n.debug.is_none()));
    }

    #[test]
    fn debug_view_carries_live_fields() {
        let states = HashMap::from([(NodeId::from("p1"), NodeState::Finished)]);
        let view = GraphView::build_debug(&sample(), &states);
        let p1 = view.node("data:p1").unwrap().debug.as_ref().unwrap();
        assert_eq!(p1.effective_ptr, Pointer(10));
        assert_eq!(p1.state, Some(NodeState::Finished));
        assert!(view.node("op:p1").unwrap().debug.is_none());
        assert_eq!(view.node("data:d1").unwrap().debug.as_ref().unwrap().state, None);
    }
}
