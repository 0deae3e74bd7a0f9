use thiserror::Error;

use crate::discovery::tree::{Node, NodeSource};
use crate::id::ENGINE_SEGMENT;
use crate::plan::types::TestIdentifier;
use crate::util::pattern::NamePattern;

/// Verdict of one filter, with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterResult {
    Included(String),
    Excluded(String),
}

impl FilterResult {
    pub fn included(reason: impl Into<String>) -> Self {
        Self::Included(reason.into())
    }

    pub fn excluded(reason: impl Into<String>) -> Self {
        Self::Excluded(reason.into())
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, Self::Excluded(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Included(r) | Self::Excluded(r) => r,
        }
    }

    /// The first exclusion wins; otherwise everything was included.
    pub fn combine(results: impl IntoIterator<Item = Self>) -> Self {
        results
            .into_iter()
            .find(Self::is_excluded)
            .unwrap_or_else(|| Self::included("all filters passed"))
    }
}

/// A predicate for filtering nodes by tags.
#[derive(Debug, Clone, PartialEq)]
pub enum TagPredicate {
    Include(String),
    Exclude(String),
    And(Vec<TagPredicate>),
    Or(Vec<TagPredicate>),
}

impl TagPredicate {
    pub fn matches(&self, tags: &[String]) -> bool {
        match self {
            Self::Include(tag) => tags.iter().any(|t| t == tag),
            Self::Exclude(tag) => !tags.iter().any(|t| t == tag),
            Self::And(preds) => preds.iter().all(|p| p.matches(tags)),
            Self::Or(preds) => preds.iter().any(|p| p.matches(tags)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagExpressionError {
    #[error("empty tag expression")]
    Empty,
    #[error("empty tag in expression \"{0}\"")]
    EmptyTag(String),
}

/// Parse a tag expression into a [`TagPredicate`].
///
/// Supports:
/// - Single tag: `"smoke"` → `Include("smoke")`
/// - Comma-separated (OR): `"smoke,critical"` → `Or([Include("smoke"), Include("critical")])`
/// - NOT prefix: `"NOT slow"` → `Exclude("slow")`
/// - AND: `"smoke AND NOT slow"` → `And([Include("smoke"), Exclude("slow")])`
///
/// # Errors
///
/// Returns [`TagExpressionError`] if the expression or one of its tags is empty.
pub fn parse_tag_expression(input: &str) -> Result<TagPredicate, TagExpressionError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(TagExpressionError::Empty);
    }

    if input.contains(" AND ") {
        let preds: Result<Vec<TagPredicate>, _> =
            input.split(" AND ").map(|p| parse_single(p, input)).collect();
        return Ok(TagPredicate::And(preds?));
    }

    if input.contains(',') {
        let preds: Result<Vec<TagPredicate>, _> =
            input.split(',').map(|p| parse_single(p, input)).collect();
        return Ok(TagPredicate::Or(preds?));
    }

    parse_single(input, input)
}

fn parse_single(part: &str, whole: &str) -> Result<TagPredicate, TagExpressionError> {
    let part = part.trim();
    if part.is_empty() {
        return Err(TagExpressionError::EmptyTag(whole.to_owned()));
    }

    // `part` is trimmed, so a tag always follows "NOT ".
    if let Some(tag) = part.strip_prefix("NOT ") {
        Ok(TagPredicate::Exclude(tag.trim().to_owned()))
    } else {
        Ok(TagPredicate::Include(part.to_owned()))
    }
}

/// Tag filter over a node's effective tags.
#[derive(Debug, Clone, PartialEq)]
pub struct TagFilter {
    expression: String,
    predicate: TagPredicate,
}

impl TagFilter {
    /// # Errors
    ///
    /// Returns [`TagExpressionError`] for a malformed expression.
    pub fn parse(expression: &str) -> Result<Self, TagExpressionError> {
        Ok(Self {
            expression: expression.trim().to_owned(),
            predicate: parse_tag_expression(expression)?,
        })
    }

    pub fn apply(&self, tags: &[String]) -> FilterResult {
        if self.predicate.matches(tags) {
            FilterResult::included(format!("tags {tags:?} match \"{}\"", self.expression))
        } else {
            FilterResult::excluded(format!("tags {tags:?} do not match \"{}\"", self.expression))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Include,
    Exclude,
}

/// Include or exclude by wildcard name patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    mode: FilterMode,
    patterns: Vec<NamePattern>,
}

impl NameFilter {
    pub fn include(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self::new(FilterMode::Include, patterns)
    }

    pub fn exclude(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self::new(FilterMode::Exclude, patterns)
    }

    fn new(mode: FilterMode, patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            mode,
            patterns: patterns
                .into_iter()
                .map(|p| NamePattern::new(p.as_ref()))
                .collect(),
        }
    }

    pub fn apply(&self, name: &str) -> FilterResult {
        let hit = self.patterns.iter().find(|p| p.matches(name));
        match (self.mode, hit) {
            (FilterMode::Include, Some(p)) => {
                FilterResult::included(format!("\"{name}\" matches included pattern \"{}\"", p.as_str()))
            }
            (FilterMode::Include, None) => {
                FilterResult::excluded(format!("\"{name}\" matches no included pattern"))
            }
            (FilterMode::Exclude, Some(p)) => {
                FilterResult::excluded(format!("\"{name}\" matches excluded pattern \"{}\"", p.as_str()))
            }
            (FilterMode::Exclude, None) => {
                FilterResult::included(format!("\"{name}\" matches no excluded pattern"))
            }
        }
    }
}

/// Include or exclude whole engines by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFilter {
    mode: FilterMode,
    engine_ids: Vec<String>,
}

impl EngineFilter {
    pub fn include(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            mode: FilterMode::Include,
            engine_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exclude(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            mode: FilterMode::Exclude,
            engine_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn apply(&self, engine_id: &str) -> FilterResult {
        let listed = self.engine_ids.iter().any(|id| id == engine_id);
        match (self.mode, listed) {
            (FilterMode::Include, true) | (FilterMode::Exclude, false) => FilterResult::included(
                format!("{ENGINE_SEGMENT} \"{engine_id}\" passes engine filter"),
            ),
            (FilterMode::Include, false) => FilterResult::excluded(format!(
                "{ENGINE_SEGMENT} \"{engine_id}\" is not included by engine filter"
            )),
            (FilterMode::Exclude, true) => FilterResult::excluded(format!(
                "{ENGINE_SEGMENT} \"{engine_id}\" is excluded by engine filter"
            )),
        }
    }
}

/// Filters applied to the resolution tree while discovering.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryFilter {
    /// Fully qualified names of top-level classes.
    ClassName(NameFilter),
    PackageName(NameFilter),
    /// Effective tags of tests.
    Tag(TagFilter),
}

impl DiscoveryFilter {
    /// `None` when the filter does not apply to this kind of node.
    pub fn apply(&self, node: &Node, effective_tags: &[String]) -> Option<FilterResult> {
        match (self, &node.source) {
            (Self::ClassName(filter), NodeSource::Class { fq_name })
                if node.id.last_segment().segment_type == crate::discovery::CLASS_SEGMENT =>
            {
                Some(filter.apply(fq_name))
            }
            (Self::PackageName(filter), NodeSource::Package { name }) => Some(filter.apply(name)),
            (Self::Tag(filter), _) if node.kind.is_test() => Some(filter.apply(effective_tags)),
            _ => None,
        }
    }
}

/// Filters applied to the finished plan; they only ever remove tests.
#[derive(Debug, Clone, PartialEq)]
pub enum PostDiscoveryFilter {
    Tag(TagFilter),
    DisplayName(NameFilter),
}

impl PostDiscoveryFilter {
    pub fn apply(&self, node: &TestIdentifier) -> Option<FilterResult> {
        if !node.is_test() {
            return None;
        }
        Some(match self {
            Self::Tag(filter) => filter.apply(&node.tags),
            Self::DisplayName(filter) => filter.apply(&node.display_name),
        })
    }
}
