use crate::runner::node::ExecutionNode;

/// Decides whether a node runs at all. Returning a reason skips the node
/// and everything below it.
pub trait SkipCondition: Send + Sync {
    fn evaluate(&self, node: &ExecutionNode) -> Option<String>;
}

impl<F> SkipCondition for F
where
    F: Fn(&ExecutionNode) -> Option<String> + Send + Sync,
{
    fn evaluate(&self, node: &ExecutionNode) -> Option<String> {
        self(node)
    }
}

/// Skips nodes the catalog marked `disabled`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCondition;

impl SkipCondition for DisabledCondition {
    fn evaluate(&self, node: &ExecutionNode) -> Option<String> {
        node.disabled.clone()
    }
}

/// Skips tests carrying any of the given tags.
#[derive(Debug, Clone, Default)]
pub struct SkipTagsCondition {
    tags: Vec<String>,
}

impl SkipTagsCondition {
    pub fn new(tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

impl SkipCondition for SkipTagsCondition {
    fn evaluate(&self, node: &ExecutionNode) -> Option<String> {
        if !node.kind.is_test() {
            return None;
        }
        self.tags
            .iter()
            .find(|t| node.tags.contains(t))
            .map(|t| format!("tagged \"{t}\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::UniqueId;
    use crate::plan::types::NodeKind;

    fn leaf() -> ExecutionNode {
        ExecutionNode::new(
            UniqueId::for_engine("e").append("method", "t"),
            "t",
            NodeKind::Test,
        )
    }

    #[test]
    fn disabled_reason_is_the_skip_reason() {
        let mut node = leaf();
        assert_eq!(DisabledCondition.evaluate(&node), None);
        node.disabled = Some("flaky on CI".into());
        assert_eq!(DisabledCondition.evaluate(&node).as_deref(), Some("flaky on CI"));
    }

    #[test]
    fn skip_tags_only_affects_tests() {
        let condition = SkipTagsCondition::new(["slow"]);
        let mut node = leaf();
        node.tags = vec!["slow".into()];
        assert_eq!(condition.evaluate(&node).as_deref(), Some("tagged \"slow\""));
        node.kind = NodeKind::Container;
        assert_eq!(condition.evaluate(&node), None);
    }

    #[test]
    fn closures_are_conditions() {
        let condition = |n: &ExecutionNode| (n.display_name == "t").then(|| "named t".to_owned());
        assert!(condition.evaluate(&leaf()).is_some());
    }
}
