//! Discovery and execution over one set of engines.

use std::sync::Arc;

use thiserror::Error;

use crate::catalog::Catalog;
use crate::discovery::request::DiscoveryRequest;
use crate::discovery::{Discovery, DiscoveryError, discover};
use crate::plan::types::TestPlan;
use crate::runner::condition::SkipCondition;
use crate::runner::executor::{HierarchicalExecutor, RunConfig, RunError};
use crate::runner::listener::{ExecutionListener, ExecutionListenerAdapter};
use crate::runner::node::ExecutionNode;
use crate::runner::recording::{Event, RecordingListener};
use crate::runner::summary::{RunSummary, SummaryListener};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct LaunchOutcome {
    /// The plan including dynamic nodes registered while running.
    pub plan: TestPlan,
    pub summary: RunSummary,
    pub events: Vec<Event>,
}

pub struct Launcher {
    engines: Vec<Catalog>,
    executor: HierarchicalExecutor,
    listeners: Vec<Arc<dyn ExecutionListener>>,
}

impl Launcher {
    pub fn new(engines: Vec<Catalog>) -> Self {
        Self {
            engines,
            executor: HierarchicalExecutor::new(RunConfig::default()),
            listeners: Vec::new(),
        }
    }

    /// Replaces the executor, dropping conditions added so far.
    #[must_use]
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.executor = HierarchicalExecutor::new(config);
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl SkipCondition + 'static) -> Self {
        self.executor = self.executor.with_condition(condition);
        self
    }

    /// Listeners are notified after the built-in summary and recording ones.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn engines(&self) -> &[Catalog] {
        &self.engines
    }

    /// # Errors
    ///
    /// Returns [`LaunchError::Discovery`] when the request cannot be resolved.
    pub fn discover(&self, request: &DiscoveryRequest) -> Result<Discovery, LaunchError> {
        Ok(discover(&self.engines, request)?)
    }

    /// Discover, then run what was found.
    ///
    /// # Errors
    ///
    /// Fails before anything runs when discovery fails, or with
    /// [`LaunchError::Run`] when the run could not start or a listener
    /// aborted it.
    pub fn execute(&self, request: &DiscoveryRequest) -> Result<LaunchOutcome, LaunchError> {
        let discovery = self.discover(request)?;
        let roots: Vec<ExecutionNode> = discovery.trees.iter().map(ExecutionNode::from_tree).collect();

        let summary = Arc::new(SummaryListener::new());
        let recorder = Arc::new(RecordingListener::new());
        let mut listeners: Vec<Arc<dyn ExecutionListener>> = vec![summary.clone(), recorder.clone()];
        listeners.extend(self.listeners.iter().cloned());

        let adapter = ExecutionListenerAdapter::new(discovery.plan, listeners);
        self.executor.execute(&roots, &adapter)?;

        Ok(LaunchOutcome {
            plan: adapter.into_plan(),
            summary: summary.summary(),
            events: recorder.events(),
        })
    }
}
