//! Execution strategies.
//!
//! Both runners take the same inputs (a [`Pipeline`], a [`RunConfig`] and a
//! [`ContentStore`]) and produce the same outputs for the same items:
//!
//! ```text
//! location ──▶ read (+files) ──▶ guess type ──▶ step 1 … step N ──▶ write
//! ```
//!
//! * [`local::LocalRunner`] runs each location as one task on a bounded
//!   worker pool and counts successes and failures per task.
//! * [`distributed::DistributedRunner`] runs every stage as its own task,
//!   connected by bounded channels, and aborts the run if a stage fails.

pub mod distributed;
pub mod local;

pub use distributed::DistributedRunner;
pub use local::LocalRunner;

use crate::client::{RetryClient, RetryPolicy};
use crate::config::RunConfig;
use crate::error::PipelineError;
use crate::io::{format_size, ContentStore};
use crate::item::Item;
use crate::metrics::{MetricsSink, StepCounts, FILES};
use crate::mime::guess_type;
use crate::pipeline::{Pipeline, StepContext};
use crate::source::{list_remaining, OutputMapping};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// An execution strategy for one run.
#[async_trait]
pub trait Runner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Process every location, returning once all outputs are written (or
    /// the run has failed).
    async fn run(&self, locations: Vec<String>) -> Result<RunSummary, PipelineError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunnerKind {
    #[default]
    Local,
    Distributed,
}

impl FromStr for RunnerKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(RunnerKind::Local),
            "distributed" => Ok(RunnerKind::Distributed),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown runner '{other}' (expected local or distributed)"
            ))),
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunnerKind::Local => "local",
            RunnerKind::Distributed => "distributed",
        })
    }
}

/// Totals reported when a run finishes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub runner: String,
    /// Locations handed to the runner.
    pub total: usize,
    /// Locations whose output was written.
    pub success: usize,
    /// Locations that failed as a whole (read/write errors, escalated steps).
    pub failure: usize,
    /// Value of the `files` counter.
    pub files: u64,
    pub steps: Vec<StepCounts>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub(crate) fn new(runner: &str, pipeline: &Pipeline, total: usize) -> Self {
        Self {
            runner: runner.to_string(),
            total,
            files: pipeline.metrics().get(FILES),
            steps: pipeline.step_counts(),
            ..Default::default()
        }
    }

    pub(crate) fn finished(mut self, pipeline: &Pipeline, elapsed: Duration) -> Self {
        self.files = pipeline.metrics().get(FILES);
        self.steps = pipeline.step_counts();
        self.duration_ms = elapsed.as_millis() as u64;
        self
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} runner: {} success, {} failures (total: {}), {} files read in {:.1}s",
            self.runner,
            self.success,
            self.failure,
            self.total,
            self.files,
            self.duration_ms as f64 / 1000.0
        )?;
        for step in &self.steps {
            writeln!(
                f,
                "  {}: processed={} ignored={} error={}",
                step.step, step.processed, step.ignored, step.error
            )?;
        }
        Ok(())
    }
}

/// One client per run, shared by every step through the context.
pub(crate) fn step_context(config: &RunConfig) -> Result<StepContext, PipelineError> {
    let policy = RetryPolicy::new(config.max_retries, config.retry_backoff);
    let client = RetryClient::new(policy, config.request_timeout())?;
    Ok(StepContext::new()
        .with_client(client)
        .with_request_args(config.request_args.clone())
        .with_request_timeout(config.request_timeout()))
}

/// Read a source into a new, untyped item and bump `files`.
pub(crate) async fn read_item(
    store: &dyn ContentStore,
    metrics: &dyn MetricsSink,
    location: &str,
) -> Result<Item, PipelineError> {
    let content = store.read_all(location).await?;
    info!("read source content: {} ({})", location, format_size(content.len()));
    metrics.inc(FILES);
    Ok(Item::new(location, content))
}

pub(crate) fn determine_type(item: Item) -> Item {
    let mime_type = guess_type(item.source_location());
    item.with_type(mime_type)
}

/// Write the item's content to its mapped output location.
pub(crate) async fn write_item(
    store: &dyn ContentStore,
    mapping: &OutputMapping,
    item: Item,
) -> Result<String, PipelineError> {
    let output = mapping.output_location_for(item.source_location());
    store.write(&output, &item.content.into_bytes()).await?;
    info!("saved output to: {}", output);
    Ok(output)
}

pub fn create_runner(
    kind: RunnerKind,
    pipeline: Pipeline,
    config: RunConfig,
    store: Arc<dyn ContentStore>,
) -> Box<dyn Runner> {
    match kind {
        RunnerKind::Local => Box::new(LocalRunner::new(pipeline, config, store)),
        RunnerKind::Distributed => Box::new(DistributedRunner::new(pipeline, config, store)),
    }
}

/// List the configured sources and run them with the selected strategy.
pub async fn run_pipeline(
    kind: RunnerKind,
    pipeline: Pipeline,
    config: RunConfig,
    store: Arc<dyn ContentStore>,
) -> Result<RunSummary, PipelineError> {
    let locations = list_remaining(&config, store.as_ref()).await?;
    info!(
        "{} runner, steps: {:?}, {} files",
        kind,
        pipeline.step_names(),
        locations.len()
    );
    create_runner(kind, pipeline, config, store)
        .run(locations)
        .await
}
