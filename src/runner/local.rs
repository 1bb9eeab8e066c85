//! Worker-pool runner: one task per location, at most `num_workers` at once.
//!
//! Tasks are drained in completion order. A task fails as a whole when its
//! source cannot be read or its output cannot be written; a failed step is
//! counted by the dispatcher and the item carries on, unless
//! `fail_on_error` is set, in which case the item stops at the failing step
//! and the first failure of either kind ends the run.

use super::{determine_type, read_item, step_context, write_item, RunSummary, Runner};
use crate::config::RunConfig;
use crate::error::PipelineError;
use crate::io::ContentStore;
use crate::pipeline::{Pipeline, StepContext};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::source::OutputMapping;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

pub struct LocalRunner {
    pipeline: Pipeline,
    config: RunConfig,
    store: Arc<dyn ContentStore>,
}

impl LocalRunner {
    pub fn new(pipeline: Pipeline, config: RunConfig, store: Arc<dyn ContentStore>) -> Self {
        Self {
            pipeline,
            config,
            store,
        }
    }
}

/// Everything one file task needs, cloned into the spawned future.
#[derive(Clone)]
struct FileTask {
    pipeline: Pipeline,
    store: Arc<dyn ContentStore>,
    ctx: Arc<StepContext>,
    mapping: Arc<OutputMapping>,
    fail_on_error: bool,
}

impl FileTask {
    async fn run(&self, location: &str) -> Result<(), PipelineError> {
        let item = read_item(self.store.as_ref(), self.pipeline.metrics().as_ref(), location).await?;
        let item = determine_type(item);

        let item = if self.fail_on_error {
            self.pipeline
                .run_item_fail_fast(item, &self.ctx)
                .await
                .map_err(|failure| PipelineError::StepFailed {
                    step: failure.step,
                    location: location.to_string(),
                    source: failure.error,
                })?
        } else {
            self.pipeline.run_item(item, &self.ctx).await.item
        };

        write_item(self.store.as_ref(), &self.mapping, item).await?;
        Ok(())
    }
}

fn log_summary(label: &str, success: usize, failure: usize, total: usize) {
    info!("{}: {} success, {} failures (total: {})", label, success, failure, total);
}

#[async_trait]
impl Runner for LocalRunner {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, locations: Vec<String>) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let total = locations.len();
        let mut summary = RunSummary::new(self.name(), &self.pipeline, total);
        if locations.is_empty() {
            warn!("no files to process");
            return Ok(summary.finished(&self.pipeline, started.elapsed()));
        }

        let num_workers = self.config.num_workers.max(1);
        info!("using {} workers", num_workers);

        let callback: ProgressCallback = self
            .config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));
        callback.on_run_start(total);

        let task = FileTask {
            pipeline: self.pipeline.clone(),
            store: Arc::clone(&self.store),
            ctx: Arc::new(step_context(&self.config)?),
            mapping: Arc::new(OutputMapping::from_config(&self.config)),
            fail_on_error: self.config.fail_on_error,
        };

        let semaphore = Arc::new(Semaphore::new(num_workers));
        let mut pending = FuturesUnordered::new();
        for location in locations {
            let task = task.clone();
            let semaphore = Arc::clone(&semaphore);
            let task_location = location.clone();
            let handle = tokio::spawn(async move {
                // Closed once the run has been aborted: never start.
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::Internal("run aborted".into()))?;
                task.run(&task_location).await
            });
            pending.push(async move { (location, handle.await) });
        }
        // Only the spawned tasks hold the client from here on.
        drop(task);

        let (mut success, mut failure) = (0usize, 0usize);
        while let Some((location, joined)) = pending.next().await {
            let result = joined
                .map_err(|e| PipelineError::TaskJoin {
                    location: location.clone(),
                    detail: e.to_string(),
                })
                .and_then(|r| r);

            match result {
                Ok(()) => {
                    success += 1;
                    callback.on_task_complete(&location, success, failure, total);
                }
                Err(e) => {
                    failure += 1;
                    warn!("{:?} generated an exception: {}", location, e);
                    callback.on_task_error(&location, &e.to_string(), success, failure, total);
                    if self.config.fail_on_error {
                        semaphore.close();
                        error!("aborting run after failure of {}", location);
                        return Err(e);
                    }
                }
            }
            log_summary("progress", success, failure, total);
        }

        log_summary("done", success, failure, total);
        callback.on_run_complete(success, failure);

        summary.success = success;
        summary.failure = failure;
        Ok(summary.finished(&self.pipeline, started.elapsed()))
    }
}
