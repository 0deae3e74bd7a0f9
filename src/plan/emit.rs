use std::fmt::Write;

use serde::Serialize;

use crate::plan::types::{NodeKind, TestIdentifier, TestPlan};

/// Nested, serializable view of a [`TestPlan`].
#[derive(Debug, Clone, Serialize)]
pub struct PlanDocument {
    pub tests: usize,
    pub nodes: usize,
    pub roots: Vec<PlanEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    pub unique_id: String,
    pub display_name: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanEntry>,
}

impl PlanDocument {
    pub fn from_plan(plan: &TestPlan) -> Self {
        Self {
            tests: plan.count_tests(),
            nodes: plan.len(),
            roots: plan.roots().into_iter().map(|r| entry(plan, r)).collect(),
        }
    }
}

fn entry(plan: &TestPlan, node: &TestIdentifier) -> PlanEntry {
    PlanEntry {
        unique_id: node.unique_id.to_string(),
        display_name: node.display_name.clone(),
        kind: node.kind,
        tags: node.tags.clone(),
        source: node.source.clone(),
        children: plan
            .children(&node.unique_id)
            .into_iter()
            .map(|c| entry(plan, c))
            .collect(),
    }
}

/// Emit a test plan as YAML.
///
/// # Errors
///
/// Returns an error if YAML serialization fails.
pub fn emit_yaml(plan: &TestPlan) -> Result<String, String> {
    serde_yaml::to_string(&PlanDocument::from_plan(plan))
        .map_err(|e| format!("yaml serialization failed: {e}"))
}

/// Emit a test plan as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn emit_json(plan: &TestPlan) -> Result<String, String> {
    serde_json::to_string_pretty(&PlanDocument::from_plan(plan))
        .map_err(|e| format!("json serialization failed: {e}"))
}

/// Render the plan as an indented tree, one node per line.
pub fn emit_tree(plan: &TestPlan) -> String {
    let mut out = String::new();
    for root in plan.roots() {
        write_tree(&mut out, plan, root, 0);
    }
    let _ = writeln!(out, "\n{} tests in {} nodes", plan.count_tests(), plan.len());
    out
}

fn write_tree(out: &mut String, plan: &TestPlan, node: &TestIdentifier, depth: usize) {
    let indent = "  ".repeat(depth);
    let marker = match node.kind {
        NodeKind::Container => "+",
        NodeKind::Test => "-",
        NodeKind::ContainerAndTest => "*",
    };
    let _ = write!(out, "{indent}{marker} {}", node.display_name);
    if !node.tags.is_empty() {
        let _ = write!(out, " [{}]", node.tags.join(", "));
    }
    let _ = writeln!(out, "  {}", node.unique_id);
    for child in plan.children(&node.unique_id) {
        write_tree(out, plan, child, depth + 1);
    }
}
