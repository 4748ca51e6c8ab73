//! Plan trees.
//!
//! A [`PlanTree`] is an arena of [`PlanNode`]s held in a petgraph
//! `StableDiGraph`. Edges point from parent to child and carry the child's
//! position, so node handles stay valid across detach/replace surgery and a
//! node's parent is a lookup rather than a stored back-pointer.
//!
//! Nodes detached during surgery stay in the arena but are unreachable from
//! the root; every traversal starts at the root.

mod explain;
mod node;

pub use node::{
    AggregateColumn, AggregateNode, AggregateStrategy, IndexScanNode, JoinPlanNode, LimitNode,
    OutputColumn, PlanNode, PlanNodeKind, PlanNodeType, ScanNode, SortDirection, SortKey,
};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

/// Handle of a node inside a [`PlanTree`].
pub type NodeId = NodeIndex;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "PlanSpec", into = "PlanSpec")]
pub struct PlanTree {
    graph: StableDiGraph<PlanNode, usize>,
    root: NodeId,
}

impl PlanTree {
    pub fn new(root: PlanNode) -> Self {
        let mut graph = StableDiGraph::new();
        let root = graph.add_node(root);
        Self { graph, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.graph[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PlanNode {
        &mut self.graph[id]
    }

    pub fn node_type(&self, id: NodeId) -> PlanNodeType {
        self.graph[id].node_type()
    }

    /// Adds a node with no parent and no children.
    pub fn add_node(&mut self, node: PlanNode) -> NodeId {
        self.graph.add_node(node)
    }

    /// Links `child` as the last child of `parent`.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        let position = self.graph.edges_directed(parent, Direction::Outgoing).count();
        self.graph.add_edge(parent, child, position);
    }

    /// Creates `node` and links it as the last child of `parent`.
    pub fn add_new_child(&mut self, parent: NodeId, node: PlanNode) -> NodeId {
        let id = self.graph.add_node(node);
        self.add_child(parent, id);
        id
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut edges: Vec<(usize, NodeId)> = self
            .graph
            .edges_directed(id, Direction::Outgoing)
            .map(|e| (*e.weight(), e.target()))
            .collect();
        edges.sort_by_key(|(position, _)| *position);
        edges.into_iter().map(|(_, child)| child).collect()
    }

    pub fn child(&self, id: NodeId, position: usize) -> Option<NodeId> {
        self.graph
            .edges_directed(id, Direction::Outgoing)
            .find(|e| *e.weight() == position)
            .map(|e| e.target())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.graph.neighbors_directed(id, Direction::Incoming).next()
    }

    /// Removes the `parent -> child` edge; later siblings shift left.
    pub fn unlink(&mut self, parent: NodeId, child: NodeId) -> bool {
        let Some(edge) = self.graph.find_edge(parent, child) else {
            return false;
        };
        self.graph.remove_edge(edge);
        let mut remaining: Vec<_> = self
            .graph
            .edges_directed(parent, Direction::Outgoing)
            .map(|e| (*e.weight(), e.id()))
            .collect();
        remaining.sort_by_key(|(position, _)| *position);
        for (position, (_, edge)) in remaining.into_iter().enumerate() {
            if let Some(weight) = self.graph.edge_weight_mut(edge) {
                *weight = position;
            }
        }
        true
    }

    /// Detaches every child of `id`, returning them in order.
    pub fn clear_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children = self.children(id);
        for child in &children {
            if let Some(edge) = self.graph.find_edge(id, *child) {
                self.graph.remove_edge(edge);
            }
        }
        children
    }

    /// Puts `new` in the position `old` held under `parent`.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) -> bool {
        let Some(edge) = self.graph.find_edge(parent, old) else {
            return false;
        };
        let position = self.graph[edge];
        self.graph.remove_edge(edge);
        self.graph.add_edge(parent, new, position);
        true
    }

    /// Creates `node` directly above `child`, taking over `child`'s place
    /// under its parent (or as the root).
    pub fn push_above(&mut self, node: PlanNode, child: NodeId) -> NodeId {
        let id = self.graph.add_node(node);
        if let Some(parent) = self.parent(child) {
            self.replace_child(parent, child, id);
        } else if self.root == child {
            self.root = id;
        }
        self.graph.add_edge(id, child, 0);
        id
    }

    /// Installs an inline node on `id`, replacing one of the same type.
    pub fn add_inline(&mut self, id: NodeId, node: PlanNode) {
        self.graph[id].set_inline(node);
    }

    /// Reachable nodes below and including `from`, in pre-order.
    pub fn preorder(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            out.push(id);
            let mut children = self.children(id);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// Nodes of type `ty` at or below `from`.
    pub fn find_all_below(&self, from: NodeId, ty: PlanNodeType) -> Vec<NodeId> {
        self.preorder(from)
            .into_iter()
            .filter(|id| self.node_type(*id) == ty)
            .collect()
    }

    pub fn find_all(&self, ty: PlanNodeType) -> Vec<NodeId> {
        self.find_all_below(self.root, ty)
    }

    /// Nodes reachable from the root. A tree always has its root.
    pub fn node_count(&self) -> usize {
        self.preorder(self.root).len()
    }

    /// Copies `other` (from its root) beneath `parent`; returns the copy's
    /// top node.
    pub fn graft(&mut self, parent: NodeId, other: &PlanTree) -> NodeId {
        let top = self.copy_from(other, other.root);
        self.add_child(parent, top);
        top
    }

    fn copy_from(&mut self, other: &PlanTree, from: NodeId) -> NodeId {
        let id = self.graph.add_node(other.node(from).clone());
        for child in other.children(from) {
            let copied = self.copy_from(other, child);
            self.add_child(id, copied);
        }
        id
    }

    /// Standalone copy of the subtree rooted at `id`.
    pub fn subtree(&self, id: NodeId) -> PlanTree {
        let mut tree = PlanTree::new(self.node(id).clone());
        let top = tree.root;
        for child in self.children(id) {
            let copied = tree.copy_from(self, child);
            tree.add_child(top, copied);
        }
        tree
    }

    /// True when some node carries an inline index scan of `table`, as an
    /// index nested-loop join does for its inner side.
    pub fn has_inlined_index_scan_of_table(&self, table: &str) -> bool {
        self.preorder(self.root).into_iter().any(|id| {
            self.node(id).inline.iter().any(|inline| match &inline.kind {
                PlanNodeKind::IndexScan(ix) => ix.scan.table.eq_ignore_ascii_case(table),
                _ => false,
            })
        })
    }

    /// Wraps the subtree at `id` in a send/receive pair; returns the receive.
    pub fn add_send_receive_pair(&mut self, id: NodeId) -> NodeId {
        let send = self.push_above(PlanNode::send(), id);
        self.push_above(PlanNode::receive(), send)
    }
}

/// Nested form of a plan tree used for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSpec {
    #[serde(flatten)]
    pub node: PlanNode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanSpec>,
}

impl PlanSpec {
    pub fn leaf(node: PlanNode) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }

    pub fn with_children(node: PlanNode, children: Vec<PlanSpec>) -> Self {
        Self { node, children }
    }

    fn from_tree(tree: &PlanTree, id: NodeId) -> Self {
        Self {
            node: tree.node(id).clone(),
            children: tree
                .children(id)
                .into_iter()
                .map(|child| Self::from_tree(tree, child))
                .collect(),
        }
    }

    fn add_to(self, tree: &mut PlanTree, parent: NodeId) {
        let id = tree.add_new_child(parent, self.node);
        for child in self.children {
            child.add_to(tree, id);
        }
    }
}

impl From<PlanSpec> for PlanTree {
    fn from(spec: PlanSpec) -> Self {
        let mut tree = PlanTree::new(spec.node);
        let root = tree.root;
        for child in spec.children {
            child.add_to(&mut tree, root);
        }
        tree
    }
}

impl From<PlanTree> for PlanSpec {
    fn from(tree: PlanTree) -> Self {
        PlanSpec::from_tree(&tree, tree.root)
    }
}

impl From<&PlanTree> for PlanSpec {
    fn from(tree: &PlanTree) -> Self {
        PlanSpec::from_tree(tree, tree.root)
    }
}
