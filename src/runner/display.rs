use std::io::Write;

use parking_lot::Mutex;

use crate::plan::types::{TestIdentifier, TestPlan};
use crate::runner::listener::{ExecutionListener, ListenerError, ListenerResult};
use crate::runner::result::{ExecutionStatus, TestExecutionResult};
use crate::runner::summary::RunSummary;

/// Format a status label for terminal output.
fn status_label(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Successful => "PASSED",
        ExecutionStatus::Failed => "FAILED",
        ExecutionStatus::Aborted => "ABORTED",
    }
}

/// Format a finished node.
pub fn format_finished(node: &TestIdentifier, result: &TestExecutionResult) -> String {
    let status = status_label(result.status);
    let duration_secs = result.duration.as_secs_f64();
    let mut line = format!("  [{status}] {} ({:.1}s)", node.unique_id, duration_secs);
    if let Some(failure) = &result.failure {
        line.push_str(&format!("\n         → {failure}"));
        for suppressed in &failure.suppressed {
            line.push_str(&format!("\n           suppressed: {suppressed}"));
        }
    }
    line
}

/// Format a skipped node.
pub fn format_skipped(node: &TestIdentifier, reason: &str) -> String {
    format!("  [SKIPPED] {}\n         → {reason}", node.unique_id)
}

/// Format the final summary after the run completes.
pub fn format_summary(summary: &RunSummary) -> String {
    let duration_secs = summary.duration.as_secs_f64();
    let mut parts = Vec::new();

    if summary.tests_succeeded > 0 {
        parts.push(format!("{} passed", summary.tests_succeeded));
    }
    if summary.tests_failed > 0 {
        parts.push(format!("{} failed", summary.tests_failed));
    }
    if summary.tests_aborted > 0 {
        parts.push(format!("{} aborted", summary.tests_aborted));
    }
    if summary.tests_skipped > 0 {
        parts.push(format!("{} skipped", summary.tests_skipped));
    }
    if summary.containers_failed > 0 {
        parts.push(format!("{} containers failed", summary.containers_failed));
    }

    if parts.is_empty() {
        parts.push("0 tests".into());
    }

    format!("\nResults: {} ({:.1}s)", parts.join(", "), duration_secs)
}

/// Format the run header line.
pub fn format_run_header(plan: &TestPlan) -> String {
    format!(
        "Running {} tests from {} engines...\n",
        plan.count_tests(),
        plan.roots().len()
    )
}

/// Prints one line per finished test, skipped node, and failed container.
pub struct ConsoleListener {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleListener {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn print(&self, text: &str) -> ListenerResult {
        let mut out = self.out.lock();
        writeln!(out, "{text}")
            .and_then(|()| out.flush())
            .map_err(|e| ListenerError::Failed(format!("could not write progress: {e}")))
    }
}

impl ExecutionListener for ConsoleListener {
    fn name(&self) -> &str {
        "console"
    }

    fn plan_execution_started(&self, plan: &TestPlan) -> ListenerResult {
        self.print(&format_run_header(plan))
    }

    fn execution_skipped(&self, node: &TestIdentifier, reason: &str) -> ListenerResult {
        self.print(&format_skipped(node, reason))
    }

    fn execution_finished(&self, node: &TestIdentifier, result: &TestExecutionResult) -> ListenerResult {
        if node.is_test() || !result.is_successful() {
            self.print(&format_finished(node, result))?;
        }
        Ok(())
    }
}
