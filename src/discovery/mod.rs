//! Turning a [`DiscoveryRequest`] into resolution trees and a [`TestPlan`].
//!
//! Each included engine gets an [`resolver::EngineResolver`]; selectors are
//! resolved in request order, discovery filters prune the trees, empty
//! containers go, and post-discovery filters run over the assembled plan.

pub mod filter;
pub mod request;
pub mod resolver;
pub mod selector;
pub mod tree;

use petgraph::stable_graph::NodeIndex;
use thiserror::Error;

use crate::catalog::Catalog;
use crate::discovery::filter::FilterResult;
use crate::discovery::request::{DiscoveryRequest, EmptyContainerPolicy};
use crate::discovery::resolver::{EngineResolver, Resolution};
use crate::discovery::selector::DiscoverySelector;
use crate::discovery::tree::{NodeTree, TreeError};
use crate::id::{FormatError, UniqueId};
use crate::plan::types::{NodeKind, PlanError, TestPlan};

pub const PACKAGE_SEGMENT: &str = "package";
pub const CLASS_SEGMENT: &str = "class";
pub const NESTED_CLASS_SEGMENT: &str = "nested-class";
pub const METHOD_SEGMENT: &str = "method";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("could not resolve selector {selector}: {reason}")]
    SelectorResolution { selector: String, reason: String },
    #[error("invalid unique id in selector {selector}: {source}")]
    InvalidUniqueId {
        selector: String,
        #[source]
        source: FormatError,
    },
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Resolution trees, one per included engine, and the plan built from them.
#[derive(Debug)]
pub struct Discovery {
    pub trees: Vec<NodeTree>,
    pub plan: TestPlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectorState {
    Pending,
    Resolving,
    Attached,
    Rejected,
}

/// Resolve `request` against `engines`.
///
/// # Errors
///
/// Fails when a selector cannot be located by any included engine, when a
/// unique-id selector does not parse, or when the trees turn out
/// inconsistent.
pub fn discover(engines: &[Catalog], request: &DiscoveryRequest) -> Result<Discovery, DiscoveryError> {
    let mut resolvers: Vec<EngineResolver<'_>> = engines
        .iter()
        .filter(|catalog| {
            let verdict = FilterResult::combine(
                request
                    .engine_filters
                    .iter()
                    .map(|f| f.apply(&catalog.engine_id)),
            );
            if verdict.is_excluded() {
                tracing::debug!(engine = %catalog.engine_id, reason = verdict.reason(), "engine excluded");
            }
            !verdict.is_excluded()
        })
        .map(EngineResolver::new)
        .collect();

    if request.selectors.is_empty() {
        let everything = resolvers
            .iter()
            .map(|r| DiscoverySelector::unique_id(UniqueId::for_engine(r.engine_id()).to_string()))
            .collect::<Vec<_>>();
        resolve_all(&mut resolvers, &everything)?;
    } else {
        resolve_all(&mut resolvers, &request.selectors)?;
    }

    let mut trees: Vec<NodeTree> = resolvers.into_iter().map(EngineResolver::into_tree).collect();
    for tree in &mut trees {
        apply_discovery_filters(tree, request);
        prune_empty(tree, request.empty_container_policy);
    }
    let mut plan = build_plan(&trees)?;

    if !request.post_filters.is_empty() {
        let excluded: Vec<UniqueId> = plan
            .iter()
            .filter(|identifier| {
                request
                    .post_filters
                    .iter()
                    .filter_map(|f| f.apply(identifier))
                    .any(|r| r.is_excluded())
            })
            .map(|identifier| identifier.unique_id.clone())
            .collect();
        if !excluded.is_empty() {
            for tree in &mut trees {
                for id in &excluded {
                    if let Some(idx) = tree.find(id) {
                        tree.remove_subtree(idx);
                    }
                }
                prune_empty(tree, request.empty_container_policy);
            }
            plan = build_plan(&trees)?;
        }
    }

    tracing::debug!(
        engines = trees.len(),
        nodes = plan.len(),
        tests = plan.count_tests(),
        "discovery finished"
    );
    Ok(Discovery { trees, plan })
}

fn resolve_all(
    resolvers: &mut [EngineResolver<'_>],
    selectors: &[DiscoverySelector],
) -> Result<(), DiscoveryError> {
    for selector in selectors {
        let mut state = SelectorState::Pending;
        tracing::debug!(%selector, ?state, "selector queued");
        state = SelectorState::Resolving;
        tracing::debug!(%selector, ?state, "resolving selector");

        let mut reasons = Vec::new();
        let mut ignored = 0;
        for resolver in resolvers.iter_mut() {
            match resolver.resolve(selector)? {
                Resolution::Attached(nodes) => {
                    state = SelectorState::Attached;
                    tracing::debug!(
                        %selector,
                        engine = resolver.engine_id(),
                        nodes = nodes.len(),
                        "selector attached"
                    );
                }
                Resolution::NotApplicable => ignored += 1,
                Resolution::Unresolved(reason) => reasons.push(reason),
            }
        }

        // A unique id aimed at an engine that was filtered out is not an error.
        if state != SelectorState::Attached && ignored == resolvers.len() {
            tracing::debug!(%selector, "selector names no included engine");
            continue;
        }
        if state != SelectorState::Attached {
            state = SelectorState::Rejected;
            tracing::debug!(%selector, ?state, "selector rejected");
            let reason = if reasons.is_empty() {
                "no engine to resolve against".to_owned()
            } else {
                reasons.join("; ")
            };
            return Err(DiscoveryError::SelectorResolution {
                selector: selector.to_string(),
                reason,
            });
        }
    }
    Ok(())
}

fn apply_discovery_filters(tree: &mut NodeTree, request: &DiscoveryRequest) {
    if request.filters.is_empty() {
        return;
    }
    for idx in tree.pre_order() {
        // Already gone with an excluded ancestor.
        if idx == tree.root() || !tree.contains_index(idx) {
            continue;
        }
        let tags = tree.effective_tags(idx);
        let node = tree.node(idx);
        let verdict = FilterResult::combine(
            request
                .filters
                .iter()
                .filter_map(|f| f.apply(node, &tags)),
        );
        if verdict.is_excluded() {
            tracing::debug!(id = %node.id, reason = verdict.reason(), "node filtered out");
            tree.remove_subtree(idx);
        }
    }
}

/// Remove containers left without children. Engine roots always stay; with
/// [`EmptyContainerPolicy::RetainSelected`] so do containers a selector
/// named directly.
pub fn prune_empty(tree: &mut NodeTree, policy: EmptyContainerPolicy) -> usize {
    let mut removed = 0;
    for idx in tree.post_order() {
        if idx == tree.root() || !is_prunable(tree, idx, policy) {
            continue;
        }
        tracing::debug!(id = %tree.node(idx).id, "pruning empty container");
        removed += tree.remove_subtree(idx);
    }
    removed
}

fn is_prunable(tree: &NodeTree, idx: NodeIndex, policy: EmptyContainerPolicy) -> bool {
    let node = tree.node(idx);
    if node.kind != NodeKind::Container || !tree.children(idx).is_empty() {
        return false;
    }
    !(policy == EmptyContainerPolicy::RetainSelected && node.selected)
}

fn build_plan(trees: &[NodeTree]) -> Result<TestPlan, PlanError> {
    let mut plan = TestPlan::new();
    for tree in trees {
        for idx in tree.pre_order() {
            plan.add(tree.identifier(idx))?;
        }
    }
    Ok(plan)
}
