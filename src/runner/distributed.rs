//! Stage-graph runner.
//!
//! ## Graph
//!
//! ```text
//! Create ──▶ PreventFusion ──▶ ReadFileContent ──▶ DetermineType
//!                                                       │
//!          WriteOutput ◀── <step N> ◀── … ◀── <step 1> ◀┘
//! ```
//!
//! Every stage is a task on a [`JoinSet`]; stages are joined by bounded
//! `mpsc` channels of `channel_capacity`, and each stage works on up to
//! `stage_parallelism` items at once. Step stages go through
//! [`dispatch`], so step failures are counted and swallowed exactly as in
//! the local runner. An I/O error in any stage aborts the whole run; there
//! is no per-item success/failure accounting here.
//!
//! `PreventFusion` collects every location before emitting any, so listing
//! completes before the first read starts.

use super::{determine_type, read_item, step_context, write_item, RunSummary, Runner};
use crate::config::RunConfig;
use crate::error::PipelineError;
use crate::io::ContentStore;
use crate::item::Item;
use crate::pipeline::{dispatch, Pipeline};
use crate::source::OutputMapping;
use async_trait::async_trait;
use futures::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

type Stages = JoinSet<Result<(), PipelineError>>;

pub struct DistributedRunner {
    pipeline: Pipeline,
    config: RunConfig,
    store: Arc<dyn ContentStore>,
}

impl DistributedRunner {
    pub fn new(pipeline: Pipeline, config: RunConfig, store: Arc<dyn ContentStore>) -> Self {
        Self {
            pipeline,
            config,
            store,
        }
    }
}

/// Spawn a stage mapping every input to one output, `parallelism` at a time.
///
/// The stage ends when its input closes, when downstream hangs up, or on the
/// first error, which is returned wrapped with the stage name.
fn spawn_stage<I, O, F, Fut>(
    stages: &mut Stages,
    name: impl Into<String>,
    rx: mpsc::Receiver<I>,
    tx: mpsc::Sender<O>,
    parallelism: usize,
    f: F,
) where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> Fut + Send + 'static,
    Fut: Future<Output = Result<O, PipelineError>> + Send + 'static,
{
    let name = name.into();
    stages.spawn(async move {
        let mut results = ReceiverStream::new(rx).map(f).buffer_unordered(parallelism);
        while let Some(result) = results.next().await {
            let output = result.map_err(|e| e.in_stage(&name))?;
            if tx.send(output).await.is_err() {
                debug!("stage {}: downstream closed", name);
                break;
            }
        }
        debug!("stage {} finished", name);
        Ok(())
    });
}

#[async_trait]
impl Runner for DistributedRunner {
    fn name(&self) -> &'static str {
        "distributed"
    }

    async fn run(&self, locations: Vec<String>) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let total = locations.len();
        let mut summary = RunSummary::new(self.name(), &self.pipeline, total);
        if locations.is_empty() {
            info!("no files to process");
            return Ok(summary.finished(&self.pipeline, started.elapsed()));
        }

        let capacity = self.config.channel_capacity.max(1);
        let parallelism = self.config.stage_parallelism.max(1);
        let ctx = Arc::new(step_context(&self.config)?);
        let metrics = Arc::clone(self.pipeline.metrics());
        let mut stages = Stages::new();

        // Create
        let (create_tx, mut create_rx) = mpsc::channel::<String>(capacity);
        stages.spawn(async move {
            for location in locations {
                if create_tx.send(location).await.is_err() {
                    break;
                }
            }
            Ok(())
        });

        // PreventFusion
        let (fused_tx, fused_rx) = mpsc::channel::<String>(capacity);
        stages.spawn(async move {
            let mut all = Vec::new();
            while let Some(location) = create_rx.recv().await {
                all.push(location);
            }
            debug!("prevent fusion: {} locations", all.len());
            for location in all {
                if fused_tx.send(location).await.is_err() {
                    break;
                }
            }
            Ok(())
        });

        // ReadFileContent
        let (read_tx, read_rx) = mpsc::channel::<Item>(capacity);
        let store = Arc::clone(&self.store);
        let read_metrics = Arc::clone(&metrics);
        spawn_stage(&mut stages, "ReadFileContent", fused_rx, read_tx, parallelism, move |location: String| {
            let store = Arc::clone(&store);
            let metrics = Arc::clone(&read_metrics);
            async move { read_item(store.as_ref(), metrics.as_ref(), &location).await }
        });

        // DetermineType
        let (typed_tx, mut rx) = mpsc::channel::<Item>(capacity);
        spawn_stage(&mut stages, "DetermineType", read_rx, typed_tx, parallelism, |item: Item| {
            async move { Ok(determine_type(item)) }
        });

        // One stage per step.
        for step in self.pipeline.steps() {
            let (step_tx, step_rx) = mpsc::channel::<Item>(capacity);
            let step = Arc::clone(step);
            let ctx = Arc::clone(&ctx);
            let metrics = Arc::clone(&metrics);
            let name = step.name().to_string();
            spawn_stage(&mut stages, name, rx, step_tx, parallelism, move |item: Item| {
                let step = Arc::clone(&step);
                let ctx = Arc::clone(&ctx);
                let metrics = Arc::clone(&metrics);
                async move {
                    let dispatched = dispatch(step.as_ref(), item, &ctx, metrics.as_ref()).await;
                    Ok(dispatched.into_item())
                }
            });
            rx = step_rx;
        }
        // Step stages hold their own clones.
        drop(ctx);

        // WriteOutput
        let written = Arc::new(AtomicUsize::new(0));
        let store = Arc::clone(&self.store);
        let mapping = Arc::new(OutputMapping::from_config(&self.config));
        let counter = Arc::clone(&written);
        stages.spawn(async move {
            let mut writes = ReceiverStream::new(rx)
                .map(|item| {
                    let store = Arc::clone(&store);
                    let mapping = Arc::clone(&mapping);
                    async move { write_item(store.as_ref(), &mapping, item).await }
                })
                .buffer_unordered(parallelism);
            while let Some(result) = writes.next().await {
                result.map_err(|e| e.in_stage("WriteOutput"))?;
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        });

        while let Some(joined) = stages.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => Err(PipelineError::Internal(format!("stage task panicked: {e}"))),
            };
            if let Err(e) = result {
                error!("run aborted: {}", e);
                stages.abort_all();
                return Err(e);
            }
        }

        summary.success = written.load(Ordering::Relaxed);
        info!("done: {} outputs written (total: {})", summary.success, total);
        Ok(summary.finished(&self.pipeline, started.elapsed()))
    }
}
