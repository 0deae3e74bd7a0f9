use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::plan::types::{TestIdentifier, TestPlan};
use crate::runner::listener::{ExecutionListener, ListenerResult};
use crate::runner::result::{ExecutionStatus, TestExecutionResult};

/// Summary statistics for a test run. Only tests are counted, except for
/// `containers_failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub tests_found: usize,
    pub tests_started: usize,
    pub tests_skipped: usize,
    pub tests_aborted: usize,
    pub tests_succeeded: usize,
    pub tests_failed: usize,
    pub containers_failed: usize,
    #[serde(rename = "duration_ms", serialize_with = "millis")]
    pub duration: Duration,
}

impl RunSummary {
    /// Whether no test failed.
    pub fn success(&self) -> bool {
        self.tests_failed == 0
    }

    pub fn exit_code(&self) -> i32 {
        i32::from(!self.success())
    }
}

fn millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Counts outcomes as they are reported.
#[derive(Debug, Default)]
pub struct SummaryListener {
    found: AtomicUsize,
    started: AtomicUsize,
    skipped: AtomicUsize,
    aborted: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    containers_failed: AtomicUsize,
    started_at: Mutex<Option<Instant>>,
    duration: Mutex<Duration>,
}

impl SummaryListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            tests_found: self.found.load(Ordering::SeqCst),
            tests_started: self.started.load(Ordering::SeqCst),
            tests_skipped: self.skipped.load(Ordering::SeqCst),
            tests_aborted: self.aborted.load(Ordering::SeqCst),
            tests_succeeded: self.succeeded.load(Ordering::SeqCst),
            tests_failed: self.failed.load(Ordering::SeqCst),
            containers_failed: self.containers_failed.load(Ordering::SeqCst),
            duration: *self.duration.lock(),
        }
    }
}

fn bump(counter: &AtomicUsize) -> ListenerResult {
    counter.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

impl ExecutionListener for SummaryListener {
    fn name(&self) -> &str {
        "summary"
    }

    fn plan_execution_started(&self, plan: &TestPlan) -> ListenerResult {
        self.found.store(plan.count_tests(), Ordering::SeqCst);
        *self.started_at.lock() = Some(Instant::now());
        Ok(())
    }

    fn plan_execution_finished(&self, _plan: &TestPlan) -> ListenerResult {
        if let Some(start) = *self.started_at.lock() {
            *self.duration.lock() = start.elapsed();
        }
        Ok(())
    }

    fn dynamic_node_registered(&self, node: &TestIdentifier) -> ListenerResult {
        if node.is_test() {
            bump(&self.found)?;
        }
        Ok(())
    }

    fn execution_skipped(&self, node: &TestIdentifier, _reason: &str) -> ListenerResult {
        if node.is_test() {
            bump(&self.skipped)?;
        }
        Ok(())
    }

    fn execution_started(&self, node: &TestIdentifier) -> ListenerResult {
        if node.is_test() {
            bump(&self.started)?;
        }
        Ok(())
    }

    fn execution_finished(&self, node: &TestIdentifier, result: &TestExecutionResult) -> ListenerResult {
        match (node.is_test(), result.status) {
            (true, ExecutionStatus::Successful) => bump(&self.succeeded),
            (true, ExecutionStatus::Failed) => bump(&self.failed),
            (true, ExecutionStatus::Aborted) => bump(&self.aborted),
            (false, ExecutionStatus::Failed) => bump(&self.containers_failed),
            (false, _) => Ok(()),
        }
    }
}
