use std::fmt;

use petgraph::stable_graph::NodeIndex;

use crate::discovery::tree::NodeTree;
use crate::id::UniqueId;
use crate::lock::LockRequirement;
use crate::plan::types::{ExecutionMode, NodeKind, TestIdentifier};
use crate::runner::behavior::{DynamicKind, DynamicNode, SharedBehavior};

/// Owned execution view of one resolved node.
///
/// `tags` and `locks` already include everything inherited from ancestors;
/// where a key appears at several levels the exclusive mode wins.
#[derive(Clone)]
pub struct ExecutionNode {
    pub id: UniqueId,
    pub display_name: String,
    pub kind: NodeKind,
    pub tags: Vec<String>,
    pub locks: LockRequirement,
    pub execution_mode: ExecutionMode,
    pub parallel_children: bool,
    pub disabled: Option<String>,
    pub behavior: Option<SharedBehavior>,
    pub dynamic: bool,
    pub children: Vec<ExecutionNode>,
}

impl ExecutionNode {
    pub fn new(id: UniqueId, display_name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            kind,
            tags: Vec::new(),
            locks: LockRequirement::new(),
            execution_mode: ExecutionMode::default(),
            parallel_children: false,
            disabled: None,
            behavior: None,
            dynamic: false,
            children: Vec::new(),
        }
    }

    /// Mirror a resolution tree, starting at its root.
    pub fn from_tree(tree: &NodeTree) -> Self {
        Self::mirror(tree, tree.root(), &LockRequirement::new())
    }

    fn mirror(tree: &NodeTree, idx: NodeIndex, inherited: &LockRequirement) -> Self {
        let node = tree.node(idx);
        let locks = inherited.merge(&node.locks);
        let children = tree
            .children(idx)
            .into_iter()
            .map(|child| Self::mirror(tree, child, &locks))
            .collect();
        Self {
            id: node.id.clone(),
            display_name: node.display_name.clone(),
            kind: node.kind,
            tags: tree.effective_tags(idx),
            locks,
            execution_mode: node.execution_mode,
            parallel_children: node.parallel_children,
            disabled: node.disabled.clone(),
            behavior: node.behavior.clone(),
            dynamic: false,
            children,
        }
    }

    /// Build the node for a child registered while `parent` ran.
    pub fn from_dynamic(parent: &Self, id: UniqueId, dynamic: DynamicNode) -> Self {
        let mut tags = dynamic.tags;
        for tag in &parent.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        Self {
            id,
            display_name: dynamic.display_name,
            kind: match dynamic.kind {
                DynamicKind::Test => NodeKind::Test,
                DynamicKind::Container => NodeKind::Container,
            },
            tags,
            locks: parent.locks.merge(&dynamic.locks),
            execution_mode: ExecutionMode::default(),
            parallel_children: false,
            disabled: None,
            behavior: Some(dynamic.behavior),
            dynamic: true,
            children: Vec::new(),
        }
    }

    /// How the plan describes this node when it is registered dynamically.
    pub fn identifier(&self, parent: &UniqueId) -> TestIdentifier {
        TestIdentifier {
            unique_id: self.id.clone(),
            parent_id: Some(parent.clone()),
            display_name: self.display_name.clone(),
            kind: self.kind,
            tags: self.tags.clone(),
            source: None,
            dynamic: self.dynamic,
        }
    }

    /// Number of nodes in this subtree, this one included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Self::size).sum::<usize>()
    }
}

impl fmt::Debug for ExecutionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("locks", &self.locks)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}
