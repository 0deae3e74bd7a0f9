use serde::{Deserialize, Serialize};

use crate::plan::types::TestPlan;
use crate::runner::recording::Event;
use crate::runner::result::Failure;
use crate::runner::summary::RunSummary;

/// Serializable record of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct TestRunReport {
    pub summary: RunSummary,
    pub results: Vec<NodeReport>,
}

/// One node's outcome in the report, in event order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeReport {
    pub unique_id: String,
    pub display_name: String,
    pub kind: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dynamic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<(String, String)>,
}

/// Build the report from the recorded events. `plan` must include the
/// dynamic nodes registered during the run.
pub fn to_report(plan: &TestPlan, events: &[Event], summary: &RunSummary) -> TestRunReport {
    let mut results: Vec<NodeReport> = Vec::new();
    let base = |id: &crate::id::UniqueId, status: &str| {
        let identifier = plan.get(id);
        NodeReport {
            unique_id: id.to_string(),
            display_name: identifier.map(|i| i.display_name.clone()).unwrap_or_default(),
            kind: identifier.map(|i| i.kind.to_string()).unwrap_or_default(),
            status: status.to_owned(),
            dynamic: identifier.is_some_and(|i| i.dynamic),
            duration_ms: None,
            reason: None,
            failure: None,
            entries: Vec::new(),
        }
    };

    for event in events {
        match event {
            Event::Skipped(id, reason) => {
                let mut report = base(id, "skipped");
                report.reason = Some(reason.clone());
                results.push(report);
            }
            Event::Finished(id, result) => {
                let mut report = base(id, &result.status.to_string());
                report.duration_ms = Some(u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX));
                report.failure.clone_from(&result.failure);
                report.entries = events
                    .iter()
                    .filter_map(|e| match e {
                        Event::ReportingEntry(entry_id, entry) if entry_id == id => {
                            Some((entry.key.clone(), entry.value.clone()))
                        }
                        _ => None,
                    })
                    .collect();
                results.push(report);
            }
            _ => {}
        }
    }

    TestRunReport {
        summary: summary.clone(),
        results,
    }
}

/// Emit a run report as YAML.
pub fn emit_report_yaml(report: &TestRunReport) -> String {
    serde_yaml::to_string(report).unwrap_or_else(|e| format!("# Error serializing report: {e}"))
}

/// Emit a run report as JSON.
pub fn emit_report_json(report: &TestRunReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|e| format!("{{ \"error\": \"{e}\" }}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::id::UniqueId;
    use crate::plan::types::{NodeKind, TestIdentifier};
    use crate::runner::behavior::ReportEntry;
    use crate::runner::result::TestExecutionResult;

    fn plan() -> (TestPlan, UniqueId, UniqueId) {
        let root = UniqueId::for_engine("e");
        let test = root.append("method", "t");
        let mut plan = TestPlan::new();
        for (id, parent, kind) in [
            (root.clone(), None, NodeKind::Container),
            (test.clone(), Some(root.clone()), NodeKind::Test),
        ] {
            plan.add(TestIdentifier {
                display_name: id.last_segment().value.clone(),
                unique_id: id,
                parent_id: parent,
                kind,
                tags: Vec::new(),
                source: None,
                dynamic: false,
            })
            .unwrap();
        }
        (plan, root, test)
    }

    #[test]
    fn report_lists_finished_and_skipped_nodes_in_event_order() {
        let (plan, root, test) = plan();
        let events = vec![
            Event::PlanStarted,
            Event::Started(root.clone()),
            Event::Started(test.clone()),
            Event::ReportingEntry(test.clone(), ReportEntry::new("user", "alice")),
            Event::Finished(
                test.clone(),
                TestExecutionResult::from_failure(Failure::failed("bad"), Duration::from_millis(12)),
            ),
            Event::Finished(root.clone(), TestExecutionResult::successful(Duration::from_millis(20))),
            Event::PlanFinished,
        ];
        let report = to_report(&plan, &events, &RunSummary::default());
        assert_eq!(report.results.len(), 2);
        let first = &report.results[0];
        assert_eq!(first.display_name, "t");
        assert_eq!(first.kind, "test");
        assert_eq!(first.status, "failed");
        assert_eq!(first.duration_ms, Some(12));
        assert_eq!(first.entries, vec![("user".to_owned(), "alice".to_owned())]);
        assert_eq!(report.results[1].status, "successful");
    }

    #[test]
    fn emitted_formats_carry_status() {
        let (plan, _, test) = plan();
        let events = vec![Event::Skipped(test, "disabled".into())];
        let report = to_report(&plan, &events, &RunSummary::default());
        let yaml = emit_report_yaml(&report);
        assert!(yaml.contains("status: skipped"));
        assert!(yaml.contains("reason: disabled"));
        let json: serde_json::Value = serde_json::from_str(&emit_report_json(&report)).unwrap();
        assert_eq!(json["results"][0]["status"], "skipped");
        assert_eq!(json["summary"]["tests_failed"], 0);
    }
}
