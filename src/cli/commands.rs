use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{Catalog, load_catalog};
use crate::discovery::filter::{DiscoveryFilter, EngineFilter, NameFilter, TagFilter};
use crate::discovery::request::{DiscoveryRequest, EmptyContainerPolicy};
use crate::discovery::selector::DiscoverySelector;
use crate::launcher::Launcher;
use crate::plan::emit::{emit_json, emit_tree, emit_yaml};
use crate::runner::condition::SkipTagsCondition;
use crate::runner::display::{ConsoleListener, format_summary};
use crate::runner::executor::RunConfig;
use crate::runner::report::{emit_report_json, emit_report_yaml, to_report};
use crate::runner::summary::RunSummary;

/// Catalogs plus the selectors and filters shared by `discover` and
/// `execute`.
#[derive(Debug, Clone, Default)]
pub struct SelectionOptions {
    pub catalogs: Vec<PathBuf>,
    pub packages: Vec<String>,
    pub classes: Vec<String>,
    /// `pkg.Class#method`
    pub methods: Vec<String>,
    pub paths: Vec<PathBuf>,
    pub ids: Vec<String>,
    pub include_classes: Vec<String>,
    pub exclude_classes: Vec<String>,
    pub include_packages: Vec<String>,
    pub exclude_packages: Vec<String>,
    pub tags: Option<String>,
    pub include_engines: Vec<String>,
    pub exclude_engines: Vec<String>,
    pub retain_selected: bool,
}

impl SelectionOptions {
    /// Build the discovery request these options describe.
    ///
    /// # Errors
    ///
    /// Returns an error string for a malformed method selector or tag
    /// expression.
    pub fn request(&self) -> Result<DiscoveryRequest, String> {
        let mut request = DiscoveryRequest::new()
            .select_all(self.packages.iter().map(DiscoverySelector::package))
            .select_all(self.classes.iter().map(DiscoverySelector::class));
        for method in &self.methods {
            let selector = DiscoverySelector::parse_method(method)
                .ok_or_else(|| format!("invalid method selector '{method}' (expected: pkg.Class#method)"))?;
            request = request.select(selector);
        }
        request = request
            .select_all(self.paths.iter().map(DiscoverySelector::path))
            .select_all(self.ids.iter().map(DiscoverySelector::unique_id));

        if !self.include_classes.is_empty() {
            request = request.filter(DiscoveryFilter::ClassName(NameFilter::include(&self.include_classes)));
        }
        if !self.exclude_classes.is_empty() {
            request = request.filter(DiscoveryFilter::ClassName(NameFilter::exclude(&self.exclude_classes)));
        }
        if !self.include_packages.is_empty() {
            request = request.filter(DiscoveryFilter::PackageName(NameFilter::include(&self.include_packages)));
        }
        if !self.exclude_packages.is_empty() {
            request = request.filter(DiscoveryFilter::PackageName(NameFilter::exclude(&self.exclude_packages)));
        }
        if let Some(expression) = &self.tags {
            let filter = TagFilter::parse(expression).map_err(|e| format!("invalid tag expression: {e}"))?;
            request = request.filter(DiscoveryFilter::Tag(filter));
        }
        if !self.include_engines.is_empty() {
            request = request.engine_filter(EngineFilter::include(self.include_engines.iter().cloned()));
        }
        if !self.exclude_engines.is_empty() {
            request = request.engine_filter(EngineFilter::exclude(self.exclude_engines.iter().cloned()));
        }
        if self.retain_selected {
            request = request.empty_container_policy(EmptyContainerPolicy::RetainSelected);
        }
        Ok(request)
    }

    fn load(&self) -> Result<Vec<Catalog>, String> {
        if self.catalogs.is_empty() {
            return Err("no catalog files provided".to_owned());
        }
        self.catalogs
            .iter()
            .map(|path| load_catalog(path).map_err(|e| e.to_string()))
            .collect()
    }
}

fn write_output(output: Option<&PathBuf>, text: &str) -> Result<(), String> {
    if let Some(out_path) = output {
        std::fs::write(out_path, text).map_err(|e| format!("failed to write {}: {e}", out_path.display()))?;
    }
    Ok(())
}

/// Run the `discover` command: resolve the selection and print the plan.
///
/// # Errors
///
/// Returns an error string if a catalog cannot be loaded, discovery fails,
/// or the output cannot be written.
pub fn run_discover(
    selection: &SelectionOptions,
    format: &str,
    output: Option<&PathBuf>,
) -> Result<String, String> {
    let launcher = Launcher::new(selection.load()?);
    let discovery = launcher
        .discover(&selection.request()?)
        .map_err(|e| e.to_string())?;
    let text = match format {
        "yaml" => emit_yaml(&discovery.plan)?,
        "json" => emit_json(&discovery.plan)?,
        "tree" => emit_tree(&discovery.plan),
        other => return Err(format!("unknown format '{other}' (expected: yaml, json, tree)")),
    };
    write_output(output, &text)?;
    match output {
        Some(out_path) => Ok(format!("plan written to {}\n", out_path.display())),
        None => Ok(text),
    }
}

/// Options for the `execute` command.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub selection: SelectionOptions,
    pub parallelism: usize,
    pub timeout_ms: Option<u64>,
    pub fail_fast: bool,
    pub skip_tags: Vec<String>,
    /// `yaml` or `json`; no report when unset.
    pub report: Option<String>,
    pub output: Option<PathBuf>,
    /// Print a line per finished test to stdout while running.
    pub progress: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            selection: SelectionOptions::default(),
            parallelism: 1,
            timeout_ms: None,
            fail_fast: false,
            skip_tags: Vec::new(),
            report: None,
            output: None,
            progress: true,
        }
    }
}

/// What `execute` hands back to the binary.
#[derive(Debug)]
pub struct ExecuteOutcome {
    pub output: String,
    pub summary: RunSummary,
}

/// Run the `execute` command: discover, run, and summarize.
///
/// # Errors
///
/// Returns an error string if loading, discovery, or the run itself fails.
/// Failing tests are not errors; check the returned summary.
pub fn run_execute(options: &ExecuteOptions) -> Result<ExecuteOutcome, String> {
    let report_format = match options.report.as_deref() {
        None => None,
        Some(format @ ("yaml" | "json")) => Some(format),
        Some(other) => return Err(format!("unknown report format '{other}' (expected: yaml, json)")),
    };
    let config = RunConfig {
        parallelism: options.parallelism.max(1),
        node_timeout: options.timeout_ms.map(Duration::from_millis),
        fail_fast: options.fail_fast,
    };

    let mut launcher = Launcher::new(options.selection.load()?).with_config(config);
    if !options.skip_tags.is_empty() {
        launcher = launcher.with_condition(SkipTagsCondition::new(options.skip_tags.iter().cloned()));
    }
    if options.progress {
        launcher = launcher.with_listener(Arc::new(ConsoleListener::stdout()));
    }

    let outcome = launcher
        .execute(&options.selection.request()?)
        .map_err(|e| e.to_string())?;

    let mut output = format_summary(&outcome.summary);
    output.push('\n');
    if let Some(format) = report_format {
        let report = to_report(&outcome.plan, &outcome.events, &outcome.summary);
        let text = match format {
            "json" => emit_report_json(&report),
            _ => emit_report_yaml(&report),
        };
        write_output(options.output.as_ref(), &text)?;
        match &options.output {
            Some(out_path) => output.push_str(&format!("report written to {}\n", out_path.display())),
            None => output.push_str(&text),
        }
    }

    Ok(ExecuteOutcome {
        output,
        summary: outcome.summary,
    })
}
