use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runner::behavior::{Behavior, DynamicNode, ExecutionContext, SharedBehavior};
use crate::runner::result::{Failure, Outcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptOutcome {
    #[default]
    Pass,
    Fail,
    Abort,
    Panic,
}

/// What a catalog entry does when it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptSpec {
    pub outcome: ScriptOutcome,
    pub message: Option<String>,
    pub sleep_ms: u64,
    pub report: BTreeMap<String, String>,
    pub setup_failure: Option<String>,
    pub teardown_failure: Option<String>,
}

/// A dynamic node a factory registers. Entries with children of their own
/// become dynamic containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicSpec {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub script: ScriptSpec,
    #[serde(default)]
    pub dynamic: Vec<DynamicSpec>,
}

/// Behavior driven by a [`ScriptSpec`], registering `dynamic` children after
/// its own script passed.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBehavior {
    script: ScriptSpec,
    dynamic: Vec<DynamicSpec>,
}

impl ScriptedBehavior {
    pub fn new(script: ScriptSpec) -> Self {
        Self {
            script,
            dynamic: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_dynamic(mut self, dynamic: Vec<DynamicSpec>) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn shared(self) -> SharedBehavior {
        Arc::new(self)
    }

    fn message(&self, fallback: &str) -> String {
        self.script
            .message
            .clone()
            .unwrap_or_else(|| fallback.to_owned())
    }
}

impl Behavior for ScriptedBehavior {
    fn before(&self, _cx: &mut ExecutionContext<'_>) -> Outcome {
        match &self.script.setup_failure {
            Some(message) => Err(Failure::failed(message.clone())),
            None => Ok(()),
        }
    }

    fn execute(&self, cx: &mut ExecutionContext<'_>) -> Outcome {
        if self.script.sleep_ms > 0 {
            cx.sleep(Duration::from_millis(self.script.sleep_ms))?;
        }
        for (key, value) in &self.script.report {
            cx.publish_entry(key.clone(), value.clone());
        }
        match self.script.outcome {
            ScriptOutcome::Pass => {}
            ScriptOutcome::Fail => return Err(Failure::failed(self.message("scripted failure"))),
            ScriptOutcome::Abort => return Err(Failure::aborted(self.message("scripted abort"))),
            ScriptOutcome::Panic => panic!("{}", self.message("scripted panic")),
        }
        for spec in &self.dynamic {
            cx.register_dynamic(dynamic_node(spec));
        }
        Ok(())
    }

    fn after(&self, _cx: &mut ExecutionContext<'_>) -> Outcome {
        match &self.script.teardown_failure {
            Some(message) => Err(Failure::failed(message.clone())),
            None => Ok(()),
        }
    }
}

fn dynamic_node(spec: &DynamicSpec) -> DynamicNode {
    let behavior = ScriptedBehavior::new(spec.script.clone())
        .with_dynamic(spec.dynamic.clone())
        .shared();
    let node = if spec.dynamic.is_empty() {
        DynamicNode::test(spec.name.clone(), behavior)
    } else {
        DynamicNode::container(spec.name.clone(), behavior)
    };
    node.with_tags(spec.tags.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::UniqueId;
    use crate::plan::types::TestPlan;
    use crate::runner::behavior::DynamicKind;
    use crate::runner::listener::ExecutionListenerAdapter;
    use crate::runner::result::FailureKind;
    use crate::util::cancel::CancellationToken;

    fn run(behavior: &ScriptedBehavior) -> (Vec<Outcome>, Vec<DynamicNode>) {
        let adapter = ExecutionListenerAdapter::new(TestPlan::new(), vec![]);
        let id = UniqueId::for_engine("demo").append("method", "m");
        let cancel = CancellationToken::new();
        let mut cx = ExecutionContext::new(&id, "m", &cancel, &adapter);
        let outcomes = vec![
            behavior.before(&mut cx),
            behavior.execute(&mut cx),
            behavior.after(&mut cx),
        ];
        let (registered, _) = cx.finish();
        (outcomes, registered.into_iter().map(|(_, n)| n).collect())
    }

    #[test]
    fn default_script_passes() {
        let (outcomes, dynamic) = run(&ScriptedBehavior::default());
        assert!(outcomes.iter().all(Result::is_ok));
        assert!(dynamic.is_empty());
    }

    #[test]
    fn fail_and_abort_use_message() {
        let script = ScriptSpec {
            outcome: ScriptOutcome::Fail,
            message: Some("expected 200".into()),
            ..ScriptSpec::default()
        };
        let (outcomes, _) = run(&ScriptedBehavior::new(script));
        assert_eq!(outcomes[1].as_ref().unwrap_err().message, "expected 200");

        let script = ScriptSpec {
            outcome: ScriptOutcome::Abort,
            ..ScriptSpec::default()
        };
        let (outcomes, _) = run(&ScriptedBehavior::new(script));
        assert_eq!(outcomes[1].as_ref().unwrap_err().kind, FailureKind::Aborted);
    }

    #[test]
    fn setup_and_teardown_failures() {
        let script = ScriptSpec {
            setup_failure: Some("no db".into()),
            teardown_failure: Some("leak".into()),
            ..ScriptSpec::default()
        };
        let (outcomes, _) = run(&ScriptedBehavior::new(script));
        assert_eq!(outcomes[0].as_ref().unwrap_err().message, "no db");
        assert_eq!(outcomes[2].as_ref().unwrap_err().message, "leak");
    }

    #[test]
    fn dynamic_specs_become_tests_and_containers() {
        let leaf = DynamicSpec {
            name: "leaf".into(),
            tags: vec!["gen".into()],
            script: ScriptSpec::default(),
            dynamic: vec![],
        };
        let group = DynamicSpec {
            name: "group".into(),
            tags: vec![],
            script: ScriptSpec::default(),
            dynamic: vec![leaf.clone()],
        };
        let behavior = ScriptedBehavior::default().with_dynamic(vec![leaf, group]);
        let (_, dynamic) = run(&behavior);
        assert_eq!(dynamic.len(), 2);
        assert_eq!(dynamic[0].kind, DynamicKind::Test);
        assert_eq!(dynamic[0].tags, vec!["gen"]);
        assert_eq!(dynamic[1].kind, DynamicKind::Container);
    }

    #[test]
    fn failing_script_registers_nothing() {
        let spec = DynamicSpec {
            name: "leaf".into(),
            tags: vec![],
            script: ScriptSpec::default(),
            dynamic: vec![],
        };
        let behavior = ScriptedBehavior::new(ScriptSpec {
            outcome: ScriptOutcome::Fail,
            ..ScriptSpec::default()
        })
        .with_dynamic(vec![spec]);
        let (_, dynamic) = run(&behavior);
        assert!(dynamic.is_empty());
    }

    #[test]
    fn script_spec_from_yaml() {
        let spec: ScriptSpec = serde_yaml::from_str(
            "outcome: fail\nmessage: nope\nsleep_ms: 5\nreport:\n  user: alice\n",
        )
        .unwrap();
        assert_eq!(spec.outcome, ScriptOutcome::Fail);
        assert_eq!(spec.sleep_ms, 5);
        assert_eq!(spec.report["user"], "alice");
    }
}
