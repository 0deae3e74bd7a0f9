use crate::discovery::filter::{DiscoveryFilter, EngineFilter, PostDiscoveryFilter};
use crate::discovery::selector::DiscoverySelector;

/// What happens to a container that a selector named but that ends up with
/// no tests after filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyContainerPolicy {
    /// Remove it like any other empty container.
    #[default]
    Prune,
    /// Keep it because it was selected explicitly.
    RetainSelected,
}

/// Selectors plus the filters narrowing what they resolve to.
///
/// No selector at all means every engine root.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRequest {
    pub selectors: Vec<DiscoverySelector>,
    pub engine_filters: Vec<EngineFilter>,
    pub filters: Vec<DiscoveryFilter>,
    pub post_filters: Vec<PostDiscoveryFilter>,
    pub empty_container_policy: EmptyContainerPolicy,
}

impl DiscoveryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn select(mut self, selector: DiscoverySelector) -> Self {
        self.selectors.push(selector);
        self
    }

    #[must_use]
    pub fn select_all(mut self, selectors: impl IntoIterator<Item = DiscoverySelector>) -> Self {
        self.selectors.extend(selectors);
        self
    }

    #[must_use]
    pub fn engine_filter(mut self, filter: EngineFilter) -> Self {
        self.engine_filters.push(filter);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: DiscoveryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn post_filter(mut self, filter: PostDiscoveryFilter) -> Self {
        self.post_filters.push(filter);
        self
    }

    #[must_use]
    pub fn empty_container_policy(mut self, policy: EmptyContainerPolicy) -> Self {
        self.empty_container_policy = policy;
        self
    }
}
