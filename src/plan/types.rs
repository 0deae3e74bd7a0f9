use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::UniqueId;

/// Whether a node contains other nodes, is a test, or both (a test factory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Container,
    Test,
    ContainerAndTest,
}

impl NodeKind {
    pub fn is_container(self) -> bool {
        matches!(self, Self::Container | Self::ContainerAndTest)
    }

    pub fn is_test(self) -> bool {
        matches!(self, Self::Test | Self::ContainerAndTest)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::Test => write!(f, "test"),
            Self::ContainerAndTest => write!(f, "container+test"),
        }
    }
}

/// Scheduling constraint a node places on itself and its siblings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// The node may run alongside its siblings.
    #[default]
    Concurrent,
    /// The node and its siblings must run one after another.
    SameThread,
}

/// The externally visible description of one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestIdentifier {
    pub unique_id: UniqueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<UniqueId>,
    pub display_name: String,
    pub kind: NodeKind,
    /// Own tags followed by inherited ones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dynamic: bool,
}

impl TestIdentifier {
    pub fn is_test(&self) -> bool {
        self.kind.is_test()
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }
}

/// Errors raised when a plan would violate its structure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("parent {parent} of {child} has not been added to the plan")]
    MissingParent { parent: UniqueId, child: UniqueId },
    #[error("{0} is already part of the plan")]
    Duplicate(UniqueId),
}

/// Flattened, read-mostly view of the resolved tree.
///
/// Nodes are only ever added, and a node's parent must be present before
/// the node itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestPlan {
    roots: Vec<UniqueId>,
    nodes: HashMap<UniqueId, TestIdentifier>,
    children: HashMap<UniqueId, Vec<UniqueId>>,
    order: Vec<UniqueId>,
}

impl TestPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node below its already-present parent, or as a root.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] if the parent is unknown or the id is taken.
    pub fn add(&mut self, identifier: TestIdentifier) -> Result<(), PlanError> {
        let id = identifier.unique_id.clone();
        if self.nodes.contains_key(&id) {
            return Err(PlanError::Duplicate(id));
        }
        match &identifier.parent_id {
            Some(parent) => {
                if !self.nodes.contains_key(parent) {
                    return Err(PlanError::MissingParent {
                        parent: parent.clone(),
                        child: id,
                    });
                }
                self.children
                    .entry(parent.clone())
                    .or_default()
                    .push(id.clone());
            }
            None => self.roots.push(id.clone()),
        }
        self.order.push(id.clone());
        self.nodes.insert(id, identifier);
        Ok(())
    }

    pub fn roots(&self) -> Vec<&TestIdentifier> {
        self.roots.iter().filter_map(|id| self.nodes.get(id)).collect()
    }

    pub fn get(&self, id: &UniqueId) -> Option<&TestIdentifier> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &UniqueId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn parent(&self, id: &UniqueId) -> Option<&TestIdentifier> {
        self.nodes
            .get(id)?
            .parent_id
            .as_ref()
            .and_then(|p| self.nodes.get(p))
    }

    /// Direct children in insertion order.
    pub fn children(&self, id: &UniqueId) -> Vec<&TestIdentifier> {
        self.children
            .get(id)
            .map(|ids| ids.iter().filter_map(|c| self.nodes.get(c)).collect())
            .unwrap_or_default()
    }

    /// All descendants, depth first in insertion order.
    pub fn descendants(&self, id: &UniqueId) -> Vec<&TestIdentifier> {
        let mut out = Vec::new();
        for child in self.children(id) {
            out.push(child);
            out.extend(self.descendants(&child.unique_id));
        }
        out
    }

    /// Every node in the order it was added.
    pub fn iter(&self) -> impl Iterator<Item = &TestIdentifier> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn count(&self, predicate: impl Fn(&TestIdentifier) -> bool) -> usize {
        self.nodes.values().filter(|n| predicate(n)).count()
    }

    pub fn count_tests(&self) -> usize {
        self.count(TestIdentifier::is_test)
    }
}
