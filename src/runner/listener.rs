use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::id::UniqueId;
use crate::plan::types::{PlanError, TestIdentifier, TestPlan};
use crate::runner::behavior::ReportEntry;
use crate::runner::result::{Failure, TestExecutionResult};

/// What a listener reports back from a notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    /// Logged and otherwise ignored.
    #[error("{0}")]
    Failed(String),
    /// Unrecoverable; aborts the whole run.
    #[error("unrecoverable: {0}")]
    Fatal(String),
}

pub type ListenerResult = Result<(), ListenerError>;

/// A listener escalated an unrecoverable error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("listener {listener} aborted the run during {method}: {message}")]
pub struct ListenerAbort {
    pub listener: String,
    pub method: &'static str,
    pub message: String,
}

/// Receives execution events. Every method defaults to doing nothing.
pub trait ExecutionListener: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn plan_execution_started(&self, _plan: &TestPlan) -> ListenerResult {
        Ok(())
    }

    fn plan_execution_finished(&self, _plan: &TestPlan) -> ListenerResult {
        Ok(())
    }

    fn dynamic_node_registered(&self, _node: &TestIdentifier) -> ListenerResult {
        Ok(())
    }

    fn execution_skipped(&self, _node: &TestIdentifier, _reason: &str) -> ListenerResult {
        Ok(())
    }

    fn execution_started(&self, _node: &TestIdentifier) -> ListenerResult {
        Ok(())
    }

    fn execution_finished(
        &self,
        _node: &TestIdentifier,
        _result: &TestExecutionResult,
    ) -> ListenerResult {
        Ok(())
    }

    fn reporting_entry_published(&self, _node: &TestIdentifier, _entry: &ReportEntry) -> ListenerResult {
        Ok(())
    }
}

/// Fans events out to the registered listeners in registration order.
///
/// A listener that fails or panics is logged and skipped for that event;
/// the rest still receive it. Only [`ListenerError::Fatal`] escapes, as
/// [`ListenerAbort`]. Once a run is aborted every later event is dropped,
/// whichever thread or execution context sends it.
pub struct ExecutionListenerAdapter {
    plan: Mutex<TestPlan>,
    listeners: Vec<Arc<dyn ExecutionListener>>,
    abort: Mutex<Option<ListenerAbort>>,
}

impl ExecutionListenerAdapter {
    pub fn new(plan: TestPlan, listeners: Vec<Arc<dyn ExecutionListener>>) -> Self {
        Self {
            plan: Mutex::new(plan),
            listeners,
            abort: Mutex::new(None),
        }
    }

    /// The first unrecoverable listener error, if the run was aborted.
    pub fn abort(&self) -> Option<ListenerAbort> {
        self.abort.lock().clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.lock().is_some()
    }

    fn record_abort(&self, abort: ListenerAbort) -> ListenerAbort {
        let mut slot = self.abort.lock();
        if slot.is_none() {
            *slot = Some(abort.clone());
        }
        abort
    }

    /// The plan including every dynamic node registered so far.
    pub fn plan(&self) -> TestPlan {
        self.plan.lock().clone()
    }

    pub fn into_plan(self) -> TestPlan {
        self.plan.into_inner()
    }

    pub fn identifier(&self, id: &UniqueId) -> Option<TestIdentifier> {
        self.plan.lock().get(id).cloned()
    }

    pub fn plan_execution_started(&self) -> Result<(), ListenerAbort> {
        let plan = self.plan();
        self.notify("plan_execution_started", "test plan", |l| {
            l.plan_execution_started(&plan)
        })
    }

    pub fn plan_execution_finished(&self) -> Result<(), ListenerAbort> {
        let plan = self.plan();
        self.notify("plan_execution_finished", "test plan", |l| {
            l.plan_execution_finished(&plan)
        })
    }

    /// Add a dynamic node to the plan, then announce it.
    ///
    /// # Errors
    ///
    /// The plan rejecting the node is reported as an abort of the run, since
    /// it means the node's parent was never announced.
    pub fn dynamic_node_registered(&self, node: TestIdentifier) -> Result<(), ListenerAbort> {
        if self.is_aborted() {
            return Ok(());
        }
        self.plan.lock().add(node.clone()).map_err(|e: PlanError| {
            self.record_abort(ListenerAbort {
                listener: "test plan".into(),
                method: "dynamic_node_registered",
                message: e.to_string(),
            })
        })?;
        self.notify("dynamic_node_registered", &node.display_name, |l| {
            l.dynamic_node_registered(&node)
        })
    }

    pub fn execution_skipped(&self, id: &UniqueId, reason: &str) -> Result<(), ListenerAbort> {
        self.with_node(id, "execution_skipped", |node, l| l.execution_skipped(node, reason))
    }

    pub fn execution_started(&self, id: &UniqueId) -> Result<(), ListenerAbort> {
        self.with_node(id, "execution_started", |node, l| l.execution_started(node))
    }

    pub fn execution_finished(
        &self,
        id: &UniqueId,
        result: &TestExecutionResult,
    ) -> Result<(), ListenerAbort> {
        self.with_node(id, "execution_finished", |node, l| {
            l.execution_finished(node, result)
        })
    }

    pub fn reporting_entry_published(
        &self,
        id: &UniqueId,
        entry: &ReportEntry,
    ) -> Result<(), ListenerAbort> {
        self.with_node(id, "reporting_entry_published", |node, l| {
            l.reporting_entry_published(node, entry)
        })
    }

    fn with_node(
        &self,
        id: &UniqueId,
        method: &'static str,
        call: impl Fn(&TestIdentifier, &dyn ExecutionListener) -> ListenerResult,
    ) -> Result<(), ListenerAbort> {
        let Some(node) = self.identifier(id) else {
            tracing::error!(%id, method, "event for a node missing from the test plan");
            return Ok(());
        };
        self.notify(method, &node.display_name, |l| call(&node, l))
    }

    fn notify(
        &self,
        method: &'static str,
        subject: &str,
        call: impl Fn(&dyn ExecutionListener) -> ListenerResult,
    ) -> Result<(), ListenerAbort> {
        if self.is_aborted() {
            tracing::trace!(method, subject, "run aborted; dropping event");
            return Ok(());
        }
        for listener in &self.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| call(listener.as_ref())));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(ListenerError::Fatal(message))) => {
                    tracing::error!(listener = listener.name(), method, subject, %message, "listener aborted the run");
                    return Err(self.record_abort(ListenerAbort {
                        listener: listener.name().to_owned(),
                        method,
                        message,
                    }));
                }
                Ok(Err(ListenerError::Failed(message))) => message,
                Err(payload) => Failure::panicked(payload.as_ref()).message,
            };
            tracing::warn!(
                listener = listener.name(),
                method,
                subject,
                %message,
                "listener failed; continuing with the remaining listeners"
            );
        }
        Ok(())
    }
}
