use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::lock::LockManager;
use crate::plan::types::ExecutionMode;
use crate::runner::behavior::ExecutionContext;
use crate::runner::condition::{DisabledCondition, SkipCondition};
use crate::runner::listener::{ExecutionListenerAdapter, ListenerAbort};
use crate::runner::node::ExecutionNode;
use crate::runner::result::{
    ExecutionStatus, Failure, FailureKind, TestExecutionResult, ThrowableCollector,
};
use crate::util::cancel::{CancelCause, CancellationToken};

/// Skip reason for children of a node whose own behavior failed.
pub const PARENT_FAILED: &str = "parent did not complete successfully";

/// Configuration for a test run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Worker threads (1 = sequential).
    pub parallelism: usize,
    /// Deadline for each node's own phases, lock wait included.
    pub node_timeout: Option<Duration>,
    /// Cancel the run after the first failed test.
    pub fail_fast: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            node_timeout: None,
            fail_fast: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("could not start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Listener(#[from] ListenerAbort),
}

/// Runs execution trees depth-first, reporting every node to the listener
/// adapter exactly once as either skipped or started and finished.
///
/// A node's locks are held only while its own behavior runs. Children of a
/// node that opted into parallel children are forked onto the worker pool
/// when none of them needs the same thread and their lock requirements are
/// pairwise compatible; otherwise they run in order.
pub struct HierarchicalExecutor {
    config: RunConfig,
    conditions: Vec<Arc<dyn SkipCondition>>,
    locks: LockManager,
}

/// Shared by every node of one run.
struct RunState<'a> {
    adapter: &'a ExecutionListenerAdapter,
    cancel: CancellationToken,
}

impl RunState<'_> {
    /// Deliver an event. The adapter drops it once the run was aborted.
    fn notify(&self, event: impl FnOnce(&ExecutionListenerAdapter) -> Result<(), ListenerAbort>) {
        if let Err(abort) = event(self.adapter) {
            self.record_abort(&abort);
        }
    }

    fn record_abort(&self, abort: &ListenerAbort) {
        tracing::debug!(%abort, "cancelling run after listener abort");
        self.cancel.cancel();
    }
}

impl HierarchicalExecutor {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            conditions: vec![Arc::new(DisabledCondition)],
            locks: LockManager::new(),
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl SkipCondition + 'static) -> Self {
        self.conditions.push(Arc::new(condition));
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute `roots` in order, bracketed by the plan-level events.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] if the worker pool cannot be built or a listener
    /// aborted the run. Node failures are never errors here; they travel in
    /// the finished events.
    pub fn execute(
        &self,
        roots: &[ExecutionNode],
        adapter: &ExecutionListenerAdapter,
    ) -> Result<(), RunError> {
        self.execute_with_token(roots, adapter, CancellationToken::new())
    }

    /// Like [`execute`](Self::execute), cancellable from outside via `cancel`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn execute_with_token(
        &self,
        roots: &[ExecutionNode],
        adapter: &ExecutionListenerAdapter,
        cancel: CancellationToken,
    ) -> Result<(), RunError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism.max(1))
            .thread_name(|i| format!("arbor-worker-{i}"))
            .build()?;
        let state = RunState { adapter, cancel };

        tracing::info!(
            roots = roots.len(),
            parallelism = self.config.parallelism,
            "starting test run"
        );
        state.notify(ExecutionListenerAdapter::plan_execution_started);
        pool.install(|| {
            for root in roots {
                self.execute_node(root, &state);
            }
        });
        state.notify(ExecutionListenerAdapter::plan_execution_finished);

        match adapter.abort() {
            Some(abort) => Err(abort.into()),
            None => {
                tracing::info!("test run finished");
                Ok(())
            }
        }
    }

    fn skip_reason(&self, node: &ExecutionNode, state: &RunState<'_>) -> Option<String> {
        if state.cancel.is_run_cancelled() {
            return Some(CancelCause::Run.to_string());
        }
        self.conditions.iter().find_map(|c| c.evaluate(node))
    }

    fn execute_node(&self, node: &ExecutionNode, state: &RunState<'_>) {
        if let Some(reason) = self.skip_reason(node, state) {
            tracing::debug!(id = %node.id, %reason, "skipping");
            state.notify(|a| a.execution_skipped(&node.id, &reason));
            return;
        }

        state.notify(|a| a.execution_started(&node.id));
        let start = Instant::now();
        let node_cancel = match self.config.node_timeout {
            Some(timeout) => state.cancel.with_timeout(timeout),
            None => state.cancel.clone(),
        };

        let mut collector = ThrowableCollector::new();
        let mut registered = Vec::new();
        if let Some(behavior) = &node.behavior {
            let lock = self.locks.resource_lock(&node.locks.effective());
            match lock.acquire(&node_cancel) {
                Ok(guard) => {
                    let mut cx =
                        ExecutionContext::new(&node.id, &node.display_name, &node_cancel, state.adapter);
                    collector.execute(|| behavior.before(&mut cx));
                    if collector.is_empty() {
                        collector.execute(|| behavior.execute(&mut cx));
                    }
                    collector.execute(|| behavior.after(&mut cx));
                    drop(guard);
                    let (dynamic, abort) = cx.finish();
                    if let Some(abort) = abort {
                        state.record_abort(&abort);
                    }
                    registered = dynamic;
                }
                Err(err) => collector.add(err.into()),
            }
        }
        if let Some(timeout) = self.config.node_timeout
            && node_cancel.cause() == Some(CancelCause::Deadline)
            && !collector.has_kind(FailureKind::TimedOut)
        {
            let mut timed_out = Failure::timed_out(timeout);
            if let Some(cause) = collector.into_failure() {
                timed_out.suppressed.push(cause);
            }
            collector = ThrowableCollector::new();
            collector.add(timed_out);
        }
        let failure = collector.into_failure();

        if failure.is_none() {
            self.execute_children(node, &node.children, state);
            for (id, dynamic) in registered {
                let child = ExecutionNode::from_dynamic(node, id, dynamic);
                let identifier = child.identifier(&node.id);
                state.notify(|a| a.dynamic_node_registered(identifier));
                self.execute_node(&child, state);
            }
        } else {
            for child in &node.children {
                state.notify(|a| a.execution_skipped(&child.id, PARENT_FAILED));
            }
            for (id, dynamic) in registered {
                let child = ExecutionNode::from_dynamic(node, id, dynamic);
                let identifier = child.identifier(&node.id);
                state.notify(|a| a.dynamic_node_registered(identifier));
                state.notify(|a| a.execution_skipped(&child.id, PARENT_FAILED));
            }
        }

        let result = match failure {
            None => TestExecutionResult::successful(start.elapsed()),
            Some(failure) => TestExecutionResult::from_failure(failure, start.elapsed()),
        };
        if result.status == ExecutionStatus::Failed && node.kind.is_test() && self.config.fail_fast {
            tracing::info!(id = %node.id, "fail-fast: cancelling remaining nodes");
            state.cancel.cancel();
        }
        tracing::debug!(id = %node.id, status = %result.status, "finished");
        state.notify(|a| a.execution_finished(&node.id, &result));
    }

    fn execute_children(&self, parent: &ExecutionNode, children: &[ExecutionNode], state: &RunState<'_>) {
        if self.can_run_concurrently(parent, children) {
            tracing::debug!(id = %parent.id, children = children.len(), "running children concurrently");
            rayon::scope(|scope| {
                for child in children {
                    scope.spawn(move |_| self.execute_node(child, state));
                }
            });
        } else {
            for child in children {
                self.execute_node(child, state);
            }
        }
    }

    fn can_run_concurrently(&self, parent: &ExecutionNode, children: &[ExecutionNode]) -> bool {
        if self.config.parallelism <= 1 || !parent.parallel_children || children.len() < 2 {
            return false;
        }
        if children
            .iter()
            .any(|c| c.execution_mode == ExecutionMode::SameThread)
        {
            return false;
        }
        let requirements: Vec<_> = children.iter().map(|c| c.locks.effective()).collect();
        requirements.iter().enumerate().all(|(i, a)| {
            requirements[i + 1..]
                .iter()
                .all(|b| a.is_compatible_with(b))
        })
    }
}
