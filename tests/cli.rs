use std::path::PathBuf;

use arbor::cli::commands::{ExecuteOptions, SelectionOptions, run_discover, run_execute};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn catalogs(names: &[&str]) -> SelectionOptions {
    SelectionOptions {
        catalogs: names.iter().map(|n| fixture(n)).collect(),
        ..SelectionOptions::default()
    }
}

fn quiet(selection: SelectionOptions) -> ExecuteOptions {
    ExecuteOptions {
        selection,
        progress: false,
        ..ExecuteOptions::default()
    }
}

// ── Discover command tests ──────────────────────────────────

#[test]
fn discover_prints_tree_of_whole_catalog() {
    let tree = run_discover(&catalogs(&["shop.yaml"]), "tree", None).expect("discover should succeed");
    let lines: Vec<&str> = tree.lines().collect();
    assert!(lines[0].starts_with("+ Shop suite  [engine:shop]"));
    assert!(tree.contains("  + shop.cart  [engine:shop]/[package:shop.cart]"));
    assert!(tree.contains("- adds_item [smoke, cart]"));
    assert!(tree.contains("* search_cases"));
    assert!(tree.ends_with("7 tests in 13 nodes\n"));
}

#[test]
fn discover_yaml_lists_unique_ids() {
    let yaml = run_discover(&catalogs(&["shop.yaml"]), "yaml", None).expect("discover should succeed");
    assert!(yaml.contains("tests: 7"));
    assert!(yaml.contains("[engine:shop]/[package:shop.cart]/[class:CartTests]/[nested-class:Persistence]/[method:saves_cart]"));
}

#[test]
fn discover_json_respects_tag_expression() {
    let selection = SelectionOptions {
        tags: Some("smoke".into()),
        ..catalogs(&["shop.yaml"])
    };
    let json = run_discover(&selection, "json", None).expect("discover should succeed");
    let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(doc["tests"], 1);
    assert_eq!(doc["nodes"], 4);
    let class = &doc["roots"][0]["children"][0]["children"][0];
    assert_eq!(class["display_name"], "CartTests");
    assert_eq!(class["children"][0]["display_name"], "adds_item");
}

#[test]
fn discover_by_method_selector() {
    let selection = SelectionOptions {
        methods: vec!["shop.cart.CartTests$Persistence#loads_cart".into()],
        ..catalogs(&["shop.yaml"])
    };
    let tree = run_discover(&selection, "tree", None).unwrap();
    assert!(tree.contains("loads_cart"));
    assert!(!tree.contains("saves_cart"));
    assert!(tree.ends_with("1 tests in 5 nodes\n"));
}

#[test]
fn discover_by_path_selector() {
    let selection = SelectionOptions {
        paths: vec![PathBuf::from("src/catalog")],
        ..catalogs(&["shop.yaml"])
    };
    let tree = run_discover(&selection, "tree", None).unwrap();
    assert!(tree.contains("SearchTests"));
    assert!(!tree.contains("CartTests"));
}

#[test]
fn discover_selected_container_pruned_or_retained() {
    let selection = SelectionOptions {
        classes: vec!["shop.cart.CartTests$Persistence".into()],
        tags: Some("NOT db".into()),
        ..catalogs(&["shop.yaml"])
    };
    let pruned = run_discover(&selection, "tree", None).unwrap();
    assert!(!pruned.contains("Persistence"));
    assert!(pruned.ends_with("0 tests in 1 nodes\n"));

    let retained = SelectionOptions {
        retain_selected: true,
        ..selection
    };
    let kept = run_discover(&retained, "tree", None).unwrap();
    assert!(kept.contains("+ Persistence"));
    assert!(kept.ends_with("0 tests in 4 nodes\n"));
}

#[test]
fn discover_with_name_filters() {
    let selection = SelectionOptions {
        exclude_packages: vec!["shop.cart".into()],
        ..catalogs(&["shop.yaml"])
    };
    let tree = run_discover(&selection, "tree", None).unwrap();
    assert!(!tree.contains("CartTests"));
    assert!(tree.ends_with("1 tests in 4 nodes\n"));

    let selection = SelectionOptions {
        include_classes: vec!["*.Search*".into()],
        ..catalogs(&["shop.yaml"])
    };
    let tree = run_discover(&selection, "tree", None).unwrap();
    assert!(tree.contains("SearchTests"));
    assert!(!tree.contains("CartTests"));
}

#[test]
fn discover_across_engines_with_engine_filter() {
    let selection = SelectionOptions {
        exclude_engines: vec!["shop".into()],
        ..catalogs(&["shop.yaml", "billing.yaml"])
    };
    let tree = run_discover(&selection, "tree", None).unwrap();
    assert!(tree.starts_with("+ billing  [engine:billing]"));
    assert!(!tree.contains("[engine:shop]"));
}

#[test]
fn discover_with_output_flag_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("plan.yaml");
    let result = run_discover(&catalogs(&["shop.yaml"]), "yaml", Some(&out)).unwrap();
    assert!(result.contains("plan written to"));
    let contents = std::fs::read_to_string(&out).expect("should read output file");
    assert!(contents.contains("display_name: Shop suite"));
}

#[test]
fn discover_rejects_unknown_format() {
    let err = run_discover(&catalogs(&["shop.yaml"]), "xml", None).unwrap_err();
    assert!(err.contains("unknown format 'xml'"));
}

#[test]
fn discover_reports_unresolvable_selector() {
    let selection = SelectionOptions {
        classes: vec!["shop.cart.Missing".into()],
        ..catalogs(&["shop.yaml"])
    };
    let err = run_discover(&selection, "tree", None).unwrap_err();
    assert!(err.contains("could not resolve selector class:shop.cart.Missing"));
}

#[test]
fn discover_reports_malformed_catalog() {
    let err = run_discover(&catalogs(&["broken.yaml"]), "yaml", None).unwrap_err();
    assert!(err.contains("unexpected_field"));
}

// ── Execute command tests ───────────────────────────────────

#[test]
fn execute_whole_catalog_summarizes_every_outcome() {
    let outcome = run_execute(&quiet(catalogs(&["shop.yaml"]))).expect("run should complete");
    let summary = &outcome.summary;
    assert_eq!(summary.tests_found, 10);
    assert_eq!(summary.tests_succeeded, 7);
    assert_eq!(summary.tests_failed, 1);
    assert_eq!(summary.tests_aborted, 1);
    assert_eq!(summary.tests_skipped, 1);
    assert_eq!(summary.exit_code(), 1);
    assert!(outcome.output.contains("Results: 7 passed, 1 failed, 1 aborted, 1 skipped"));
}

#[test]
fn execute_without_failures_exits_zero() {
    let selection = SelectionOptions {
        packages: vec!["shop.catalog".into()],
        ..catalogs(&["shop.yaml"])
    };
    let outcome = run_execute(&quiet(selection)).unwrap();
    assert!(outcome.summary.success());
    assert_eq!(outcome.summary.exit_code(), 0);
    assert_eq!(outcome.summary.tests_succeeded, 3);
    assert_eq!(outcome.summary.tests_aborted, 1);
}

#[test]
fn execute_in_parallel_matches_sequential_counts() {
    let options = ExecuteOptions {
        parallelism: 4,
        ..quiet(catalogs(&["shop.yaml", "billing.yaml"]))
    };
    let outcome = run_execute(&options).unwrap();
    assert_eq!(outcome.summary.tests_succeeded, 9);
    assert_eq!(outcome.summary.tests_failed, 1);
}

#[test]
fn execute_skip_tag_reports_tests_as_skipped() {
    let options = ExecuteOptions {
        skip_tags: vec!["slow".into()],
        ..quiet(catalogs(&["billing.yaml"]))
    };
    let outcome = run_execute(&options).unwrap();
    assert_eq!(outcome.summary.tests_succeeded, 1);
    assert_eq!(outcome.summary.tests_skipped, 1);
}

#[test]
fn execute_fail_fast_stops_after_first_failure() {
    let selection = SelectionOptions {
        classes: vec!["shop.cart.CartTests".into()],
        ..catalogs(&["shop.yaml"])
    };
    let options = ExecuteOptions {
        fail_fast: true,
        ..quiet(selection)
    };
    let outcome = run_execute(&options).unwrap();
    assert_eq!(outcome.summary.tests_failed, 1);
    // Only legacy_checkout counts; the skipped Persistence container hides its tests.
    assert_eq!(outcome.summary.tests_skipped, 1);
    assert_eq!(outcome.summary.tests_started, 3);
}

#[test]
fn execute_writes_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("report.json");
    let options = ExecuteOptions {
        report: Some("json".into()),
        output: Some(out.clone()),
        ..quiet(catalogs(&["shop.yaml"]))
    };
    let outcome = run_execute(&options).unwrap();
    assert!(outcome.output.contains("report written to"));

    let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(report["summary"]["tests_failed"], 1);
    let results = report["results"].as_array().unwrap();
    let find = |name: &str| {
        results
            .iter()
            .find(|r| r["display_name"] == name)
            .unwrap_or_else(|| panic!("no result for {name}"))
    };
    assert_eq!(find("legacy_checkout")["status"], "skipped");
    assert_eq!(find("legacy_checkout")["reason"], "checkout v1 retired");
    assert_eq!(find("applies_coupon")["failure"]["message"], "expected 90, got 100");
    assert_eq!(find("loads_cart")["entries"][0][0], "rows");
    assert_eq!(find("by tag")["status"], "aborted");
    assert_eq!(find("by tag")["dynamic"], true);
}

#[test]
fn execute_yaml_report_to_stdout() {
    let options = ExecuteOptions {
        report: Some("yaml".into()),
        ..quiet(catalogs(&["billing.yaml"]))
    };
    let outcome = run_execute(&options).unwrap();
    assert!(outcome.output.contains("results:"));
    assert!(outcome.output.contains("status: successful"));
}

#[test]
fn execute_timeout_fails_slow_tests() {
    let selection = SelectionOptions {
        methods: vec!["shop.cart.CartTests#removes_item".into()],
        ..catalogs(&["shop.yaml"])
    };
    let options = ExecuteOptions {
        timeout_ms: Some(1),
        ..quiet(selection)
    };
    let outcome = run_execute(&options).unwrap();
    assert_eq!(outcome.summary.tests_failed, 1);
}
