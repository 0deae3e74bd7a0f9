use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arbor::catalog::{Catalog, ClassEntry, MethodEntry, PackageEntry};
use arbor::discovery::discover;
use arbor::discovery::filter::{DiscoveryFilter, TagFilter};
use arbor::discovery::request::{DiscoveryRequest, EmptyContainerPolicy};
use arbor::discovery::selector::DiscoverySelector;
use arbor::id::UniqueId;
use arbor::launcher::{LaunchError, Launcher};
use arbor::lock::LockRequirement;
use arbor::plan::types::{NodeKind, TestIdentifier, TestPlan};
use arbor::runner::behavior::{DynamicNode, SharedBehavior, from_fn};
use arbor::runner::executor::{PARENT_FAILED, RunConfig, RunError};
use arbor::runner::listener::{ExecutionListener, ListenerError, ListenerResult};
use arbor::runner::recording::{Event, RecordingListener};
use arbor::runner::result::{ExecutionStatus, Failure, TestExecutionResult};

fn pass() -> SharedBehavior {
    from_fn(|_| Ok(()))
}

fn id(text: &str) -> UniqueId {
    UniqueId::parse(text).unwrap()
}

const CLASS_C: &str = "[engine:demo]/[package:p]/[class:C]";

fn one_class(class: ClassEntry) -> Vec<Catalog> {
    vec![Catalog::new("demo").with_package(PackageEntry::new("p").with_class(class))]
}

/// Events whose node lies at or below `root`.
fn events_under(events: &[Event], root: &UniqueId) -> Vec<Event> {
    events
        .iter()
        .filter(|e| e.unique_id().is_some_and(|id| id == root || root.is_ancestor_of(id)))
        .cloned()
        .collect()
}

fn status(event: &Event) -> Option<ExecutionStatus> {
    match event {
        Event::Finished(_, result) => Some(result.status),
        _ => None,
    }
}

/// Tracks how many timed behaviors run at once.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

fn timed(gauge: &Arc<Gauge>, millis: u64) -> SharedBehavior {
    let gauge = Arc::clone(gauge);
    from_fn(move |cx| {
        let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.max.fetch_max(now, Ordering::SeqCst);
        let slept = cx.sleep(Duration::from_millis(millis));
        gauge.current.fetch_sub(1, Ordering::SeqCst);
        slept
    })
}

fn parallel(parallelism: usize) -> RunConfig {
    RunConfig {
        parallelism,
        ..RunConfig::default()
    }
}

// ── Simple tree ─────────────────────────────────────────────

#[test]
fn sequential_events_follow_discovery_order() {
    let engines = one_class(
        ClassEntry::new("C")
            .with_method(MethodEntry::test("t1", pass()))
            .with_method(MethodEntry::test("t2", pass())),
    );
    let request = DiscoveryRequest::new().select(DiscoverySelector::class("p.C"));
    let outcome = Launcher::new(engines).execute(&request).unwrap();

    let class = id(CLASS_C);
    let t1 = class.append("method", "t1");
    let t2 = class.append("method", "t2");
    let events = events_under(&outcome.events, &class);
    let expected = [
        Event::Started(class.clone()),
        Event::Started(t1.clone()),
        Event::Finished(t1, TestExecutionResult::successful(Duration::ZERO)),
        Event::Started(t2.clone()),
        Event::Finished(t2, TestExecutionResult::successful(Duration::ZERO)),
        Event::Finished(class.clone(), TestExecutionResult::successful(Duration::ZERO)),
    ];
    assert_eq!(events.len(), expected.len());
    for (actual, wanted) in events.iter().zip(&expected) {
        assert_eq!(actual.unique_id(), wanted.unique_id());
        assert_eq!(std::mem::discriminant(actual), std::mem::discriminant(wanted));
        assert_eq!(status(actual), status(wanted));
    }
}

// ── Skip ────────────────────────────────────────────────────

#[test]
fn skipped_leaf_has_no_lifecycle() {
    let engines = one_class(
        ClassEntry::new("C")
            .with_method(MethodEntry::test("t1", pass()))
            .with_method(MethodEntry::test("leaf", pass()).disabled("not on this platform")),
    );
    let outcome = Launcher::new(engines).execute(&DiscoveryRequest::new()).unwrap();
    let leaf = id(CLASS_C).append("method", "leaf");

    let for_leaf: Vec<&Event> = outcome
        .events
        .iter()
        .filter(|e| e.unique_id() == Some(&leaf))
        .collect();
    assert_eq!(
        for_leaf,
        vec![&Event::Skipped(leaf.clone(), "not on this platform".into())]
    );
    let class_result = outcome.events.iter().find_map(|e| match e {
        Event::Finished(id, result) if id.to_string() == CLASS_C => Some(result.status),
        _ => None,
    });
    assert_eq!(class_result, Some(ExecutionStatus::Successful));
    assert_eq!(outcome.summary.tests_skipped, 1);
}

// ── Dynamic registration ────────────────────────────────────

#[test]
fn dynamic_nodes_announced_before_their_lifecycle() {
    let factory = from_fn(|cx| {
        cx.register_dynamic(DynamicNode::test("first", from_fn(|_| Ok(()))));
        cx.register_dynamic(DynamicNode::test("second", from_fn(|_| Ok(()))));
        Ok(())
    });
    let engines = one_class(ClassEntry::new("C").with_method(MethodEntry::factory("gen", factory)));
    let outcome = Launcher::new(engines).execute(&DiscoveryRequest::new()).unwrap();

    let generator = id(CLASS_C).append("method", "gen");
    let first = generator.append("dynamic-test", "#1");
    let second = generator.append("dynamic-test", "#2");
    let kinds: Vec<String> = events_under(&outcome.events, &generator)
        .iter()
        .map(|e| match e {
            Event::Started(id) => format!("started {id}"),
            Event::Finished(id, _) => format!("finished {id}"),
            Event::DynamicRegistered(id) => format!("registered {id}"),
            other => format!("{other:?}"),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            format!("started {generator}"),
            format!("registered {first}"),
            format!("started {first}"),
            format!("finished {first}"),
            format!("registered {second}"),
            format!("started {second}"),
            format!("finished {second}"),
            format!("finished {generator}"),
        ]
    );

    let dynamic = outcome.plan.get(&second).unwrap();
    assert!(dynamic.dynamic);
    assert_eq!(dynamic.parent_id.as_ref(), Some(&generator));
    assert_eq!(dynamic.display_name, "second");
}

#[test]
fn dynamic_containers_nest() {
    let factory = from_fn(|cx| {
        cx.register_dynamic(DynamicNode::container(
            "group",
            from_fn(|cx| {
                cx.register_dynamic(DynamicNode::test("inner", from_fn(|_| Ok(()))));
                Ok(())
            }),
        ));
        Ok(())
    });
    let engines = one_class(ClassEntry::new("C").with_method(MethodEntry::factory("gen", factory)));
    let outcome = Launcher::new(engines).execute(&DiscoveryRequest::new()).unwrap();
    let inner = id(CLASS_C)
        .append("method", "gen")
        .append("dynamic-container", "#1")
        .append("dynamic-test", "#1");
    assert!(outcome.plan.contains(&inner));
    assert_eq!(outcome.summary.tests_succeeded, 2);
}

#[test]
fn nodes_registered_by_a_failing_factory_are_announced_then_skipped() {
    let factory = from_fn(|cx| {
        cx.register_dynamic(DynamicNode::test("one", from_fn(|_| Ok(()))));
        cx.register_dynamic(DynamicNode::test("two", from_fn(|_| Ok(()))));
        Err(Failure::failed("late failure"))
    });
    let engines = one_class(ClassEntry::new("C").with_method(MethodEntry::factory("gen", factory)));
    let outcome = Launcher::new(engines).execute(&DiscoveryRequest::new()).unwrap();

    let generator = id(CLASS_C).append("method", "gen");
    let one = generator.append("dynamic-test", "#1");
    let two = generator.append("dynamic-test", "#2");
    let events = events_under(&outcome.events, &generator);
    let finished = events
        .iter()
        .position(|e| matches!(e, Event::Finished(id, _) if *id == generator))
        .unwrap();
    for child in [&one, &two] {
        let registered = events
            .iter()
            .position(|e| *e == Event::DynamicRegistered(child.clone()))
            .unwrap_or_else(|| panic!("{child} was never announced"));
        assert_eq!(
            events[registered + 1],
            Event::Skipped(child.clone(), PARENT_FAILED.to_owned())
        );
        assert!(registered < finished);
        assert!(!events.contains(&Event::Started(child.clone())));
    }
    assert_eq!(status(&events[finished]), Some(ExecutionStatus::Failed));

    assert!(outcome.plan.contains(&two));
    assert_eq!(outcome.summary.tests_found, 3);
    assert_eq!(outcome.summary.tests_failed, 1);
    assert_eq!(outcome.summary.tests_skipped, 2);
}

// ── Resource locks ──────────────────────────────────────────

#[test]
fn exclusive_siblings_never_overlap() {
    let gauge = Arc::new(Gauge::default());
    let engines = one_class(
        ClassEntry::new("C")
            .parallel_children()
            .with_method(MethodEntry::test("a", timed(&gauge, 40)).with_locks(LockRequirement::exclusive("R")))
            .with_method(MethodEntry::test("b", timed(&gauge, 40)).with_locks(LockRequirement::exclusive("R"))),
    );
    let outcome = Launcher::new(engines)
        .with_config(parallel(4))
        .execute(&DiscoveryRequest::new())
        .unwrap();
    assert_eq!(outcome.summary.tests_succeeded, 2);
    assert_eq!(gauge.max.load(Ordering::SeqCst), 1);
}

#[test]
fn exclusive_cousins_contend_on_the_lock_itself() {
    let gauge = Arc::new(Gauge::default());
    let class = |name: &str| {
        ClassEntry::new(name).with_method(
            MethodEntry::test("uses_r", timed(&gauge, 40)).with_locks(LockRequirement::exclusive("R")),
        )
    };
    let engines = vec![Catalog::new("demo").with_package(
        PackageEntry::new("p")
            .with_class(class("X"))
            .with_class(class("Y"))
            .with_class(class("Z")),
    )];
    let outcome = Launcher::new(engines)
        .with_config(parallel(4))
        .execute(&DiscoveryRequest::new())
        .unwrap();
    assert_eq!(outcome.summary.tests_succeeded, 3);
    assert_eq!(gauge.max.load(Ordering::SeqCst), 1);
}

#[test]
fn shared_locks_let_siblings_overlap() {
    let gauge = Arc::new(Gauge::default());
    let engines = one_class(
        ClassEntry::new("C")
            .parallel_children()
            .with_method(MethodEntry::test("a", timed(&gauge, 300)).with_locks(LockRequirement::shared("R")))
            .with_method(MethodEntry::test("b", timed(&gauge, 300)).with_locks(LockRequirement::shared("R"))),
    );
    Launcher::new(engines)
        .with_config(parallel(4))
        .execute(&DiscoveryRequest::new())
        .unwrap();
    assert_eq!(gauge.max.load(Ordering::SeqCst), 2);
}

#[test]
fn global_exclusive_runs_alone() {
    let gauge = Arc::new(Gauge::default());
    let engines = vec![Catalog::new("demo").with_package(
        PackageEntry::new("p")
            .with_class(
                ClassEntry::new("Alone").with_method(
                    MethodEntry::test("everything", timed(&gauge, 60))
                        .with_locks(LockRequirement::global_exclusive()),
                ),
            )
            .with_class(ClassEntry::new("Other").with_method(MethodEntry::test("t", timed(&gauge, 60)))),
    )];
    Launcher::new(engines)
        .with_config(parallel(4))
        .execute(&DiscoveryRequest::new())
        .unwrap();
    assert_eq!(gauge.max.load(Ordering::SeqCst), 1);
}

#[test]
fn parallel_children_without_locks_overlap() {
    let gauge = Arc::new(Gauge::default());
    let engines = one_class(
        ClassEntry::new("C")
            .parallel_children()
            .with_method(MethodEntry::test("a", timed(&gauge, 300)))
            .with_method(MethodEntry::test("b", timed(&gauge, 300))),
    );
    Launcher::new(engines)
        .with_config(parallel(2))
        .execute(&DiscoveryRequest::new())
        .unwrap();
    assert_eq!(gauge.max.load(Ordering::SeqCst), 2);
}

// ── Filter pruning ──────────────────────────────────────────

fn tagged_engine() -> Vec<Catalog> {
    vec![Catalog::new("demo").with_package(
        PackageEntry::new("p")
            .with_class(ClassEntry::new("C").with_method(MethodEntry::test("slow_one", pass()).with_tags(["slow"])))
            .with_class(ClassEntry::new("Keep").with_method(MethodEntry::test("fast", pass()))),
    )]
}

fn not_slow() -> DiscoveryFilter {
    DiscoveryFilter::Tag(TagFilter::parse("NOT slow").unwrap())
}

#[test]
fn cascading_prune_removes_container() {
    let request = DiscoveryRequest::new().filter(not_slow());
    let discovery = discover(&tagged_engine(), &request).unwrap();
    assert!(!discovery.plan.contains(&id(CLASS_C)));
    assert!(discovery.plan.contains(&id("[engine:demo]/[package:p]/[class:Keep]")));
}

#[test]
fn selected_container_pruned_by_default() {
    let request = DiscoveryRequest::new()
        .select(DiscoverySelector::class("p.C"))
        .filter(not_slow());
    let discovery = discover(&tagged_engine(), &request).unwrap();
    assert!(!discovery.plan.contains(&id(CLASS_C)));
    assert_eq!(discovery.plan.len(), 1);
}

#[test]
fn selected_container_retained_when_asked() {
    let request = DiscoveryRequest::new()
        .select(DiscoverySelector::class("p.C"))
        .filter(not_slow())
        .empty_container_policy(EmptyContainerPolicy::RetainSelected);
    let discovery = discover(&tagged_engine(), &request).unwrap();
    assert!(discovery.plan.contains(&id(CLASS_C)));
    assert!(discovery.plan.children(&id(CLASS_C)).is_empty());
}

// ── Ordering and uniqueness ─────────────────────────────────

fn wide_engine() -> Vec<Catalog> {
    let mut package = PackageEntry::new("p");
    for c in 0..4 {
        let mut class = ClassEntry::new(format!("C{c}")).parallel_children();
        for m in 0..5 {
            let behavior = from_fn(move |cx| {
                cx.sleep(Duration::from_millis(((c * 5 + m) % 3) as u64 * 5))?;
                if m == 3 {
                    cx.register_dynamic(DynamicNode::test("d", from_fn(|_| Ok(()))));
                }
                Ok(())
            });
            let method = if m == 3 {
                MethodEntry::factory(format!("m{m}"), behavior)
            } else {
                MethodEntry::test(format!("m{m}"), behavior)
            };
            class = class.with_method(method);
        }
        class = class.with_class(
            ClassEntry::new("Nested").with_method(MethodEntry::test("deep", pass()).disabled("off")),
        );
        package = package.with_class(class);
    }
    vec![Catalog::new("demo").with_package(package)]
}

fn assert_parent_brackets_children(plan: &TestPlan, events: &[Event]) {
    let mut first: HashMap<UniqueId, usize> = HashMap::new();
    let mut last: HashMap<UniqueId, usize> = HashMap::new();
    for (i, event) in events.iter().enumerate() {
        let Some(id) = event.unique_id() else { continue };
        match event {
            Event::Started(_) | Event::Skipped(..) | Event::Finished(..) => {
                first.entry(id.clone()).or_insert(i);
                last.insert(id.clone(), i);
            }
            _ => {}
        }
    }
    for node in plan.iter() {
        let Some(parent) = &node.parent_id else { continue };
        let (Some(&child_first), Some(&child_last)) = (first.get(&node.unique_id), last.get(&node.unique_id)) else {
            continue;
        };
        assert!(first[parent] < child_first, "{parent} must start before {}", node.unique_id);
        assert!(last[parent] > child_last, "{parent} must finish after {}", node.unique_id);
    }
}

#[test]
fn parallel_run_keeps_parent_child_event_order() {
    let outcome = Launcher::new(wide_engine())
        .with_config(parallel(4))
        .execute(&DiscoveryRequest::new())
        .unwrap();
    assert_parent_brackets_children(&outcome.plan, &outcome.events);
    // Every node is reported exactly once as skipped or finished.
    let terminal: Vec<&UniqueId> = outcome
        .events
        .iter()
        .filter(|e| matches!(e, Event::Skipped(..) | Event::Finished(..)))
        .filter_map(Event::unique_id)
        .collect();
    let distinct: HashSet<&UniqueId> = terminal.iter().copied().collect();
    assert_eq!(terminal.len(), distinct.len());
    assert_eq!(terminal.len(), outcome.plan.len());
    assert_eq!(outcome.summary.tests_succeeded, 4 * 5 + 4);
    assert_eq!(outcome.summary.tests_skipped, 4);
}

#[test]
fn overlapping_selectors_yield_unique_nodes() {
    let request = DiscoveryRequest::new()
        .select(DiscoverySelector::method("p.C1", "m0"))
        .select(DiscoverySelector::class("p.C1"))
        .select(DiscoverySelector::class("p.C1$Nested"))
        .select(DiscoverySelector::package("p"))
        .select(DiscoverySelector::unique_id("[engine:demo]/[package:p]/[class:C2]/[method:m4]"));
    let discovery = discover(&wide_engine(), &request).unwrap();
    let tree = &discovery.trees[0];
    let ids: Vec<String> = tree.pre_order().into_iter().map(|i| tree.node(i).id.to_string()).collect();
    let distinct: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), distinct.len());
    assert_eq!(discovery.plan.len(), ids.len());
    // Parents always precede children in the plan.
    let mut seen = HashSet::new();
    for node in discovery.plan.iter() {
        if let Some(parent) = &node.parent_id {
            assert!(seen.contains(parent));
        }
        seen.insert(node.unique_id.clone());
    }
}

#[test]
fn unresolvable_selector_aborts_before_execution() {
    let err = Launcher::new(wide_engine())
        .execute(&DiscoveryRequest::new().select(DiscoverySelector::method("p.C1", "missing")))
        .unwrap_err();
    assert!(matches!(err, LaunchError::Discovery(_)));
    assert!(err.to_string().starts_with("could not resolve selector method:p.C1#missing"));
}

// ── Listener isolation ──────────────────────────────────────

struct Grumpy;

impl ExecutionListener for Grumpy {
    fn execution_started(&self, _node: &TestIdentifier) -> ListenerResult {
        Err(ListenerError::Failed("disk full".into()))
    }

    fn execution_finished(&self, _node: &TestIdentifier, _result: &TestExecutionResult) -> ListenerResult {
        panic!("listener bug");
    }
}

struct Fatal;

impl ExecutionListener for Fatal {
    fn execution_started(&self, node: &TestIdentifier) -> ListenerResult {
        if node.kind == NodeKind::Test {
            return Err(ListenerError::Fatal("out of memory".into()));
        }
        Ok(())
    }
}

#[test]
fn failing_listener_does_not_disturb_run_or_others() {
    let engines = one_class(
        ClassEntry::new("C")
            .with_method(MethodEntry::test("t1", pass()))
            .with_method(MethodEntry::test("t2", pass())),
    );
    let recorder = Arc::new(RecordingListener::new());
    let outcome = Launcher::new(engines)
        .with_listener(Arc::new(Grumpy))
        .with_listener(recorder.clone())
        .execute(&DiscoveryRequest::new())
        .unwrap();
    assert_eq!(outcome.summary.tests_succeeded, 2);
    assert_eq!(recorder.events(), outcome.events);
}

#[test]
fn fatal_listener_error_aborts_the_run() {
    let ran = Arc::new(AtomicUsize::new(0));
    let count = |ran: &Arc<AtomicUsize>| {
        let ran = Arc::clone(ran);
        from_fn(move |_| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    let engines = one_class(
        ClassEntry::new("C")
            .with_method(MethodEntry::test("t1", count(&ran)))
            .with_method(MethodEntry::test("t2", count(&ran))),
    );
    let err = Launcher::new(engines)
        .with_listener(Arc::new(Fatal))
        .execute(&DiscoveryRequest::new())
        .unwrap_err();
    let LaunchError::Run(RunError::Listener(abort)) = err else {
        panic!("expected listener abort, got {err}");
    };
    assert_eq!(abort.method, "execution_started");
    assert_eq!(abort.message, "out of memory");
    // t1 had already started when the listener gave up; t2 never runs.
    assert!(ran.load(Ordering::SeqCst) <= 1);
}

// ── Timeouts and fail-fast ──────────────────────────────────

#[test]
fn timed_out_test_releases_its_lock() {
    let engines = one_class(
        ClassEntry::new("C")
            .with_method(
                MethodEntry::test("hog", from_fn(|cx| cx.sleep(Duration::from_secs(10))))
                    .with_locks(LockRequirement::exclusive("R")),
            )
            .with_method(MethodEntry::test("next", pass()).with_locks(LockRequirement::exclusive("R"))),
    );
    let outcome = Launcher::new(engines)
        .with_config(RunConfig {
            node_timeout: Some(Duration::from_millis(100)),
            ..RunConfig::default()
        })
        .execute(&DiscoveryRequest::new())
        .unwrap();
    assert_eq!(outcome.summary.tests_failed, 1);
    assert_eq!(outcome.summary.tests_succeeded, 1);
}

#[test]
fn fail_fast_reports_the_rest_as_skipped() {
    let engines = one_class(
        ClassEntry::new("C")
            .with_method(MethodEntry::test("bad", from_fn(|_| Err(Failure::failed("x")))))
            .with_method(MethodEntry::test("after1", pass()))
            .with_method(MethodEntry::test("after2", pass())),
    );
    let outcome = Launcher::new(engines)
        .with_config(RunConfig {
            fail_fast: true,
            ..RunConfig::default()
        })
        .execute(&DiscoveryRequest::new())
        .unwrap();
    assert_eq!(outcome.summary.tests_failed, 1);
    assert_eq!(outcome.summary.tests_skipped, 2);
    assert_eq!(outcome.summary.tests_started, 1);
}
