use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::id::UniqueId;
use crate::lock::LockRequirement;
use crate::runner::listener::{ExecutionListenerAdapter, ListenerAbort};
use crate::runner::result::{Failure, Outcome};
use crate::util::cancel::{CancelCause, CancellationToken};

pub const DYNAMIC_TEST_SEGMENT: &str = "dynamic-test";
pub const DYNAMIC_CONTAINER_SEGMENT: &str = "dynamic-container";

const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// The work attached to a node.
///
/// `before` runs first; `execute` only runs when `before` succeeded; `after`
/// always runs. Panics in any phase are caught and recorded as failures.
pub trait Behavior: Send + Sync {
    fn before(&self, _cx: &mut ExecutionContext<'_>) -> Outcome {
        Ok(())
    }

    fn execute(&self, cx: &mut ExecutionContext<'_>) -> Outcome;

    fn after(&self, _cx: &mut ExecutionContext<'_>) -> Outcome {
        Ok(())
    }
}

impl<F> Behavior for F
where
    F: Fn(&mut ExecutionContext<'_>) -> Outcome + Send + Sync,
{
    fn execute(&self, cx: &mut ExecutionContext<'_>) -> Outcome {
        self(cx)
    }
}

pub type SharedBehavior = Arc<dyn Behavior>;

/// Wrap a closure as a shareable behavior.
pub fn from_fn<F>(f: F) -> SharedBehavior
where
    F: Fn(&mut ExecutionContext<'_>) -> Outcome + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A key/value pair published by a running node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub key: String,
    pub value: String,
}

impl ReportEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicKind {
    Test,
    Container,
}

/// A node created while its parent runs.
#[derive(Clone)]
pub struct DynamicNode {
    pub kind: DynamicKind,
    pub display_name: String,
    pub tags: Vec<String>,
    pub locks: LockRequirement,
    pub behavior: SharedBehavior,
}

impl DynamicNode {
    pub fn test(display_name: impl Into<String>, behavior: SharedBehavior) -> Self {
        Self::new(DynamicKind::Test, display_name, behavior)
    }

    /// A container whose behavior registers further dynamic nodes.
    pub fn container(display_name: impl Into<String>, behavior: SharedBehavior) -> Self {
        Self::new(DynamicKind::Container, display_name, behavior)
    }

    fn new(kind: DynamicKind, display_name: impl Into<String>, behavior: SharedBehavior) -> Self {
        Self {
            kind,
            display_name: display_name.into(),
            tags: Vec::new(),
            locks: LockRequirement::new(),
            behavior,
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_locks(mut self, locks: LockRequirement) -> Self {
        self.locks = locks;
        self
    }

    fn segment_type(&self) -> &'static str {
        match self.kind {
            DynamicKind::Test => DYNAMIC_TEST_SEGMENT,
            DynamicKind::Container => DYNAMIC_CONTAINER_SEGMENT,
        }
    }
}

impl std::fmt::Debug for DynamicNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicNode")
            .field("kind", &self.kind)
            .field("display_name", &self.display_name)
            .field("tags", &self.tags)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

/// What a running behavior can see and do.
pub struct ExecutionContext<'a> {
    id: &'a UniqueId,
    display_name: &'a str,
    cancel: &'a CancellationToken,
    adapter: &'a ExecutionListenerAdapter,
    registered: Vec<(UniqueId, DynamicNode)>,
    abort: Option<ListenerAbort>,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        id: &'a UniqueId,
        display_name: &'a str,
        cancel: &'a CancellationToken,
        adapter: &'a ExecutionListenerAdapter,
    ) -> Self {
        Self {
            id,
            display_name,
            cancel,
            adapter,
            registered: Vec::new(),
            abort: None,
        }
    }

    pub fn unique_id(&self) -> &UniqueId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        self.display_name
    }

    pub fn cancel_cause(&self) -> Option<CancelCause> {
        self.cancel.cause()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err` with an interruption failure once the run or deadline fired.
    pub fn check_cancelled(&self) -> Outcome {
        match self.cancel.cause() {
            Some(cause) => Err(Failure::interrupted(cause)),
            None => Ok(()),
        }
    }

    /// Sleep for `duration`, waking early when cancelled.
    pub fn sleep(&self, duration: Duration) -> Outcome {
        let until = Instant::now() + duration;
        loop {
            self.check_cancelled()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(until - now));
        }
    }

    /// Publish a reporting entry for this node to every listener. Entries are
    /// dropped once a listener aborted the run.
    pub fn publish_entry(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let entry = ReportEntry::new(key, value);
        if let Err(abort) = self.adapter.reporting_entry_published(self.id, &entry)
            && self.abort.is_none()
        {
            self.abort = Some(abort);
        }
    }

    /// Register a dynamic child. It runs after this node's behavior returns,
    /// in registration order.
    pub fn register_dynamic(&mut self, node: DynamicNode) -> UniqueId {
        let index = self.registered.len() + 1;
        let id = self.id.append(node.segment_type(), format!("#{index}"));
        tracing::debug!(parent = %self.id, child = %id, "dynamic node registered");
        self.registered.push((id.clone(), node));
        id
    }

    pub(crate) fn finish(self) -> (Vec<(UniqueId, DynamicNode)>, Option<ListenerAbort>) {
        (self.registered, self.abort)
    }
}
