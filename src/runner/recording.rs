use parking_lot::Mutex;

use crate::id::UniqueId;
use crate::plan::types::{TestIdentifier, TestPlan};
use crate::runner::behavior::ReportEntry;
use crate::runner::listener::{ExecutionListener, ListenerResult};
use crate::runner::result::TestExecutionResult;

/// One listener callback, as observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PlanStarted,
    DynamicRegistered(UniqueId),
    Skipped(UniqueId, String),
    Started(UniqueId),
    Finished(UniqueId, TestExecutionResult),
    ReportingEntry(UniqueId, ReportEntry),
    PlanFinished,
}

impl Event {
    /// The node this event is about, if any.
    pub fn unique_id(&self) -> Option<&UniqueId> {
        match self {
            Self::PlanStarted | Self::PlanFinished => None,
            Self::DynamicRegistered(id)
            | Self::Skipped(id, _)
            | Self::Started(id)
            | Self::Finished(id, _)
            | Self::ReportingEntry(id, _) => Some(id),
        }
    }
}

/// Keeps the full, ordered event stream of a run.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Index of the first event matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events.lock().iter().position(predicate)
    }

    /// Result reported for `id`, if it finished.
    pub fn result_of(&self, id: &UniqueId) -> Option<TestExecutionResult> {
        self.events.lock().iter().find_map(|e| match e {
            Event::Finished(finished, result) if finished == id => Some(result.clone()),
            _ => None,
        })
    }

    /// Skip reason reported for `id`, if it was skipped.
    pub fn skip_reason_of(&self, id: &UniqueId) -> Option<String> {
        self.events.lock().iter().find_map(|e| match e {
            Event::Skipped(skipped, reason) if skipped == id => Some(reason.clone()),
            _ => None,
        })
    }

    fn record(&self, event: Event) -> ListenerResult {
        self.events.lock().push(event);
        Ok(())
    }
}

impl ExecutionListener for RecordingListener {
    fn name(&self) -> &str {
        "recording"
    }

    fn plan_execution_started(&self, _plan: &TestPlan) -> ListenerResult {
        self.record(Event::PlanStarted)
    }

    fn plan_execution_finished(&self, _plan: &TestPlan) -> ListenerResult {
        self.record(Event::PlanFinished)
    }

    fn dynamic_node_registered(&self, node: &TestIdentifier) -> ListenerResult {
        self.record(Event::DynamicRegistered(node.unique_id.clone()))
    }

    fn execution_skipped(&self, node: &TestIdentifier, reason: &str) -> ListenerResult {
        self.record(Event::Skipped(node.unique_id.clone(), reason.to_owned()))
    }

    fn execution_started(&self, node: &TestIdentifier) -> ListenerResult {
        self.record(Event::Started(node.unique_id.clone()))
    }

    fn execution_finished(&self, node: &TestIdentifier, result: &TestExecutionResult) -> ListenerResult {
        self.record(Event::Finished(node.unique_id.clone(), result.clone()))
    }

    fn reporting_entry_published(&self, node: &TestIdentifier, entry: &ReportEntry) -> ListenerResult {
        self.record(Event::ReportingEntry(node.unique_id.clone(), entry.clone()))
    }
}
