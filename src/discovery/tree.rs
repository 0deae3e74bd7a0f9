use std::collections::HashMap;
use std::fmt;

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use thiserror::Error;

use crate::id::UniqueId;
use crate::lock::LockRequirement;
use crate::plan::types::{ExecutionMode, NodeKind, TestIdentifier};
use crate::runner::behavior::SharedBehavior;

/// Where in the catalog a node came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSource {
    Engine,
    Package { name: String },
    Class { fq_name: String },
    Method { class: String, method: String },
}

impl fmt::Display for NodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine => write!(f, "engine"),
            Self::Package { name } => write!(f, "package:{name}"),
            Self::Class { fq_name } => write!(f, "class:{fq_name}"),
            Self::Method { class, method } => write!(f, "method:{class}#{method}"),
        }
    }
}

/// A node of the resolution tree.
#[derive(Clone)]
pub struct Node {
    pub id: UniqueId,
    pub display_name: String,
    pub kind: NodeKind,
    pub source: NodeSource,
    pub tags: Vec<String>,
    pub locks: LockRequirement,
    pub execution_mode: ExecutionMode,
    pub parallel_children: bool,
    pub disabled: Option<String>,
    pub behavior: Option<SharedBehavior>,
    /// Some selector named this node directly.
    pub selected: bool,
    /// Every candidate child has been attached.
    pub expanded: bool,
}

impl Node {
    pub fn new(id: UniqueId, display_name: impl Into<String>, kind: NodeKind, source: NodeSource) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            kind,
            source,
            tags: Vec::new(),
            locks: LockRequirement::new(),
            execution_mode: ExecutionMode::default(),
            parallel_children: false,
            disabled: None,
            behavior: None,
            selected: false,
            expanded: false,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("tags", &self.tags)
            .field("locks", &self.locks)
            .field("execution_mode", &self.execution_mode)
            .field("selected", &self.selected)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("{child} is not a direct child of {parent}")]
    NotAChild { parent: UniqueId, child: UniqueId },
    #[error("{id} is already attached below {existing_parent}")]
    Reparented {
        id: UniqueId,
        existing_parent: UniqueId,
    },
}

/// The resolution tree of one engine.
///
/// Each [`UniqueId`] appears at most once. Children keep the order in which
/// they were attached; edges carry that ordinal.
pub struct NodeTree {
    graph: StableDiGraph<Node, usize>,
    index: HashMap<UniqueId, NodeIndex>,
    root: NodeIndex,
    next_ordinal: usize,
}

impl NodeTree {
    pub fn new(root: Node) -> Self {
        let mut graph = StableDiGraph::new();
        let id = root.id.clone();
        let root = graph.add_node(root);
        Self {
            graph,
            index: HashMap::from([(id, root)]),
            root,
            next_ordinal: 0,
        }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.graph[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.graph[idx]
    }

    pub fn find(&self, id: &UniqueId) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &UniqueId) -> bool {
        self.index.contains_key(id)
    }

    /// False once `idx` has been removed.
    pub fn contains_index(&self, idx: NodeIndex) -> bool {
        self.graph.contains_node(idx)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Always false; the root is never removed.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Attach `node` below `parent`, or return the existing node with the
    /// same id. The flag is true when a new node was created.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError`] if the id is not one segment below the parent,
    /// or if it already hangs below a different parent.
    pub fn attach(&mut self, parent: NodeIndex, node: Node) -> Result<(NodeIndex, bool), TreeError> {
        let parent_id = &self.graph[parent].id;
        if !parent_id.is_parent_of(&node.id) {
            return Err(TreeError::NotAChild {
                parent: parent_id.clone(),
                child: node.id,
            });
        }
        if let Some(&existing) = self.index.get(&node.id) {
            return match self.parent(existing) {
                Some(p) if p == parent => Ok((existing, false)),
                Some(p) => Err(TreeError::Reparented {
                    id: node.id,
                    existing_parent: self.graph[p].id.clone(),
                }),
                None => Ok((existing, false)),
            };
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.graph.add_edge(parent, idx, self.next_ordinal);
        self.next_ordinal += 1;
        self.index.insert(id, idx);
        Ok((idx, true))
    }

    pub fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .next()
    }

    /// Direct children in attachment order.
    pub fn children(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<(usize, NodeIndex)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (*e.weight(), e.target()))
            .collect();
        edges.sort_unstable_by_key(|(ordinal, _)| *ordinal);
        edges.into_iter().map(|(_, child)| child).collect()
    }

    /// Every node, parents before children, siblings in order.
    pub fn pre_order(&self) -> Vec<NodeIndex> {
        let mut out = Vec::with_capacity(self.len());
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            out.push(idx);
            stack.extend(self.children(idx).into_iter().rev());
        }
        out
    }

    /// Every node, children before parents.
    pub fn post_order(&self) -> Vec<NodeIndex> {
        let mut order = self.pre_order();
        order.reverse();
        order
    }

    /// Remove `idx` and everything below it. The root is never removed.
    /// Returns the number of nodes removed.
    pub fn remove_subtree(&mut self, idx: NodeIndex) -> usize {
        if idx == self.root {
            return 0;
        }
        let mut stack = vec![idx];
        let mut removed = 0;
        while let Some(current) = stack.pop() {
            stack.extend(self.children(current));
            if let Some(node) = self.graph.remove_node(current) {
                self.index.remove(&node.id);
                removed += 1;
            }
        }
        removed
    }

    /// Own tags followed by ancestors' tags, without duplicates.
    pub fn effective_tags(&self, idx: NodeIndex) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        let mut current = Some(idx);
        while let Some(i) = current {
            for tag in &self.graph[i].tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
            current = self.parent(i);
        }
        tags
    }

    /// The plan-facing description of `idx`.
    pub fn identifier(&self, idx: NodeIndex) -> TestIdentifier {
        let node = &self.graph[idx];
        TestIdentifier {
            unique_id: node.id.clone(),
            parent_id: self.parent(idx).map(|p| self.graph[p].id.clone()),
            display_name: node.display_name.clone(),
            kind: node.kind,
            tags: self.effective_tags(idx),
            source: match node.source {
                NodeSource::Engine => None,
                ref other => Some(other.to_string()),
            },
            dynamic: false,
        }
    }
}

impl fmt::Debug for NodeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self
            .pre_order()
            .into_iter()
            .map(|i| self.graph[i].id.to_string())
            .collect();
        f.debug_struct("NodeTree").field("nodes", &ids).finish()
    }
}
