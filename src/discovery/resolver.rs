use petgraph::stable_graph::NodeIndex;

use crate::catalog::{Catalog, ClassEntry, ClassPath, MethodEntry, PackageEntry, class_name};
use crate::discovery::selector::DiscoverySelector;
use crate::discovery::tree::{Node, NodeSource, NodeTree, TreeError};
use crate::discovery::{
    CLASS_SEGMENT, DiscoveryError, METHOD_SEGMENT, NESTED_CLASS_SEGMENT, PACKAGE_SEGMENT,
};
use crate::id::UniqueId;
use crate::plan::types::NodeKind;

/// What one engine made of one selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The named nodes (and their ancestors) are in the tree.
    Attached(Vec<NodeIndex>),
    /// The selector addresses another engine.
    NotApplicable,
    /// This engine has nothing by that name.
    Unresolved(String),
}

/// Resolves selectors against one engine's catalog into its [`NodeTree`].
///
/// Every node is attached through [`NodeTree::attach`], so a node reached
/// by several selectors exists once and is expanded once.
pub struct EngineResolver<'c> {
    catalog: &'c Catalog,
    tree: NodeTree,
}

impl<'c> EngineResolver<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        let mut root = Node::new(
            UniqueId::for_engine(catalog.engine_id.as_str()),
            catalog.display_name(),
            NodeKind::Container,
            NodeSource::Engine,
        );
        root.parallel_children = true;
        Self {
            catalog,
            tree: NodeTree::new(root),
        }
    }

    pub fn engine_id(&self) -> &str {
        &self.catalog.engine_id
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn into_tree(self) -> NodeTree {
        self.tree
    }

    /// Attach whatever `selector` names, then expand it fully.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] for an unparsable unique id or a tree
    /// inconsistency.
    pub fn resolve(&mut self, selector: &DiscoverySelector) -> Result<Resolution, DiscoveryError> {
        let catalog = self.catalog;
        let engine = &catalog.engine_id;
        let attached = match selector {
            DiscoverySelector::Package(name) => match catalog.package(name) {
                Some(package) => vec![self.attach_package(package)?],
                None => {
                    return Ok(Resolution::Unresolved(format!(
                        "engine \"{engine}\" has no package \"{name}\""
                    )));
                }
            },
            DiscoverySelector::Class(fq_name) => match catalog.locate_class(fq_name) {
                Some(path) => vec![self.attach_class_path(&path)?],
                None => {
                    return Ok(Resolution::Unresolved(format!(
                        "engine \"{engine}\" has no class \"{fq_name}\""
                    )));
                }
            },
            DiscoverySelector::Method { class, method } => {
                let located = catalog
                    .locate_class(class)
                    .and_then(|path| path.class().method(method).map(|m| (path, m)));
                match located {
                    Some((path, entry)) => {
                        let parent = self.attach_class_path(&path)?;
                        vec![self.attach_method(parent, class, entry)?]
                    }
                    None => {
                        return Ok(Resolution::Unresolved(format!(
                            "engine \"{engine}\" has no method \"{class}#{method}\""
                        )));
                    }
                }
            }
            DiscoverySelector::Path(path) => {
                let packages = catalog.packages_under(path);
                if packages.is_empty() {
                    return Ok(Resolution::Unresolved(format!(
                        "engine \"{engine}\" has no package under \"{}\"",
                        path.display()
                    )));
                }
                packages
                    .into_iter()
                    .map(|p| self.attach_package(p))
                    .collect::<Result<_, _>>()?
            }
            DiscoverySelector::UniqueId(text) => {
                let id = UniqueId::parse(text).map_err(|source| DiscoveryError::InvalidUniqueId {
                    selector: selector.to_string(),
                    source,
                })?;
                match self.attach_unique_id(&id)? {
                    Resolution::Attached(nodes) => nodes,
                    other => return Ok(other),
                }
            }
        };

        for &idx in &attached {
            self.tree.node_mut(idx).selected = true;
            self.expand(idx)?;
        }
        Ok(Resolution::Attached(attached))
    }

    /// Walk the segments of `id` down the catalog. Segments below a method
    /// (dynamic nodes) resolve to that method.
    fn attach_unique_id(&mut self, id: &UniqueId) -> Result<Resolution, DiscoveryError> {
        if id.engine_id() != Some(self.engine_id()) {
            return Ok(Resolution::NotApplicable);
        }
        let catalog = self.catalog;
        let unresolved = |detail: &str| -> Result<Resolution, DiscoveryError> {
            Ok(Resolution::Unresolved(format!("{detail} in {id}")))
        };
        let segments = &id.segments()[1..];

        let Some(first) = segments.first() else {
            return Ok(Resolution::Attached(vec![self.tree.root()]));
        };
        if first.segment_type != PACKAGE_SEGMENT {
            return unresolved(&format!("unexpected segment type \"{}\"", first.segment_type));
        }
        let Some(package) = catalog.package(&first.value) else {
            return unresolved(&format!("unknown package \"{}\"", first.value));
        };
        let mut current = self.attach_package(package)?;

        let mut chain: Vec<&ClassEntry> = Vec::new();
        for segment in &segments[1..] {
            match segment.segment_type.as_str() {
                CLASS_SEGMENT if chain.is_empty() => {
                    let Some(class) = package.classes.iter().find(|c| c.name == segment.value) else {
                        return unresolved(&format!("unknown class \"{}\"", segment.value));
                    };
                    chain.push(class);
                }
                NESTED_CLASS_SEGMENT if !chain.is_empty() => {
                    let outer = chain[chain.len() - 1];
                    let Some(class) = outer.classes.iter().find(|c| c.name == segment.value) else {
                        return unresolved(&format!("unknown nested class \"{}\"", segment.value));
                    };
                    chain.push(class);
                }
                METHOD_SEGMENT if !chain.is_empty() => {
                    let class = chain[chain.len() - 1];
                    let Some(method) = class.method(&segment.value) else {
                        return unresolved(&format!("unknown method \"{}\"", segment.value));
                    };
                    let path = ClassPath {
                        package,
                        chain: chain.clone(),
                    };
                    let parent = self.attach_class_path(&path)?;
                    let fq = class_path_name(&path);
                    current = self.attach_method(parent, &fq, method)?;
                    if segments.len() > chain.len() + 2 {
                        tracing::debug!(%id, "dynamic segments resolve to their factory method");
                    }
                    return Ok(Resolution::Attached(vec![current]));
                }
                other => {
                    return unresolved(&format!("unexpected segment type \"{other}\""));
                }
            }
        }
        if !chain.is_empty() {
            current = self.attach_class_path(&ClassPath { package, chain })?;
        }
        Ok(Resolution::Attached(vec![current]))
    }

    fn attach_package(&mut self, package: &PackageEntry) -> Result<NodeIndex, TreeError> {
        let root = self.tree.root();
        let id = self.tree.node(root).id.append(PACKAGE_SEGMENT, package.name.as_str());
        let mut node = Node::new(
            id,
            package.name.as_str(),
            NodeKind::Container,
            NodeSource::Package {
                name: package.name.clone(),
            },
        );
        node.parallel_children = true;
        Ok(self.tree.attach(root, node)?.0)
    }

    fn attach_class_path(&mut self, path: &ClassPath<'_>) -> Result<NodeIndex, TreeError> {
        let mut parent = self.attach_package(path.package)?;
        let mut names: Vec<&str> = Vec::with_capacity(path.chain.len());
        for class in &path.chain {
            let nested = !names.is_empty();
            names.push(&class.name);
            let fq = class_name(&path.package.name, &names);
            parent = self.attach_class(parent, class, nested, fq)?;
        }
        Ok(parent)
    }

    fn attach_class(
        &mut self,
        parent: NodeIndex,
        class: &ClassEntry,
        nested: bool,
        fq_name: String,
    ) -> Result<NodeIndex, TreeError> {
        let segment = if nested { NESTED_CLASS_SEGMENT } else { CLASS_SEGMENT };
        let id = self.tree.node(parent).id.append(segment, class.name.as_str());
        let mut node = Node::new(
            id,
            class.display_name(),
            NodeKind::Container,
            NodeSource::Class { fq_name },
        );
        node.tags.clone_from(&class.tags);
        node.locks = class.locks.clone();
        node.execution_mode = class.execution_mode;
        node.parallel_children = class.parallel_children;
        node.disabled.clone_from(&class.disabled);
        node.behavior.clone_from(&class.behavior);
        Ok(self.tree.attach(parent, node)?.0)
    }

    fn attach_method(
        &mut self,
        parent: NodeIndex,
        class_fq: &str,
        method: &MethodEntry,
    ) -> Result<NodeIndex, TreeError> {
        let id = self.tree.node(parent).id.append(METHOD_SEGMENT, method.name.as_str());
        let kind = if method.factory {
            NodeKind::ContainerAndTest
        } else {
            NodeKind::Test
        };
        let mut node = Node::new(
            id,
            method.display_name(),
            kind,
            NodeSource::Method {
                class: class_fq.to_owned(),
                method: method.name.clone(),
            },
        );
        node.tags.clone_from(&method.tags);
        node.locks = method.locks.clone();
        node.execution_mode = method.execution_mode;
        node.disabled.clone_from(&method.disabled);
        node.behavior.clone_from(&method.behavior);
        Ok(self.tree.attach(parent, node)?.0)
    }

    /// Attach every candidate below `idx`, recursively. Already expanded
    /// nodes are left alone.
    fn expand(&mut self, idx: NodeIndex) -> Result<(), TreeError> {
        if self.tree.node(idx).expanded {
            return Ok(());
        }
        self.tree.node_mut(idx).expanded = true;
        let catalog = self.catalog;
        match self.tree.node(idx).source.clone() {
            NodeSource::Engine => {
                for package in &catalog.packages {
                    let child = self.attach_package(package)?;
                    self.expand(child)?;
                }
            }
            NodeSource::Package { name } => {
                if let Some(package) = catalog.package(&name) {
                    for class in &package.classes {
                        let fq = class_name(&package.name, &[class.name.as_str()]);
                        let child = self.attach_class(idx, class, false, fq)?;
                        self.expand(child)?;
                    }
                }
            }
            NodeSource::Class { fq_name } => {
                if let Some(path) = catalog.locate_class(&fq_name) {
                    let class = path.class();
                    for method in &class.methods {
                        self.attach_method(idx, &fq_name, method)?;
                    }
                    for nested in &class.classes {
                        let fq = format!("{fq_name}{}{}", crate::catalog::NESTED_SEPARATOR, nested.name);
                        let child = self.attach_class(idx, nested, true, fq)?;
                        self.expand(child)?;
                    }
                }
            }
            NodeSource::Method { .. } => {}
        }
        Ok(())
    }
}

fn class_path_name(path: &ClassPath<'_>) -> String {
    let names: Vec<&str> = path.chain.iter().map(|c| c.name.as_str()).collect();
    class_name(&path.package.name, &names)
}
