//! Pipelines: ordered steps, the dispatcher, and the built-in definitions.
//!
//! ## Data Flow
//!
//! ```text
//! Item ──▶ dispatch(step 1) ──▶ dispatch(step 2) ──▶ … ──▶ Item
//!          (skip if type not      (sees step 1's
//!           supported)             merged output)
//! ```
//!
//! 1. [`step`]    : the [`Step`] trait, [`StepContext`] and [`FunctionStep`]
//! 2. [`dispatch`]: type filter, counters and failure isolation per step
//! 3. [`grobid`]  : PDF → TEI via a GROBID service
//! 4. [`api`]     : generic "POST document, get document back" service step
//! 5. [`definition`]: select and build a pipeline's steps from configuration
//!
//! Steps self-select by MIME type, so a pipeline can mix steps for different
//! document families without explicit branching: a TEI step placed after a
//! PDF step runs on whatever the PDF step converted and ignores the rest.

pub mod api;
pub mod definition;
pub mod dispatch;
pub mod grobid;
pub mod step;

pub use definition::{PipelineConfig, PipelineKind};
pub use dispatch::{dispatch, Dispatched};
pub use step::{FunctionStep, SharedStep, Step, StepContext};

use crate::error::StepError;
use crate::item::Item;
use crate::metrics::{SharedMetrics, StepCounts};
use std::sync::Arc;

/// One step failure recorded while folding a pipeline over an item.
#[derive(Debug)]
pub struct StepFailure {
    pub step: String,
    pub error: StepError,
}

/// Result of running every step over one item.
#[derive(Debug)]
pub struct ItemOutcome {
    pub item: Item,
    /// Failures in step order; empty when every applicable step succeeded.
    pub failures: Vec<StepFailure>,
}

/// An ordered, immutable list of steps plus the run's counter sink.
///
/// Clones share the sink, so counts keep accumulating across every run that
/// uses the same pipeline. Pass a new [`Counters`](crate::metrics::Counters)
/// per run, or call [`Pipeline::for_new_run`], when each run should count
/// from zero.
#[derive(Clone)]
pub struct Pipeline {
    steps: Arc<[SharedStep]>,
    metrics: SharedMetrics,
}

impl Pipeline {
    pub fn new(steps: Vec<SharedStep>, metrics: SharedMetrics) -> Self {
        Self {
            steps: steps.into(),
            metrics,
        }
    }

    /// Same steps, fresh in-memory counters.
    pub fn for_new_run(&self) -> Self {
        Self {
            steps: Arc::clone(&self.steps),
            metrics: crate::metrics::Counters::shared(),
        }
    }

    pub fn steps(&self) -> &[SharedStep] {
        &self.steps
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    /// Fold `dispatch` over the steps, left to right.
    pub async fn run_item(&self, item: Item, ctx: &StepContext) -> ItemOutcome {
        let mut item = item;
        let mut failures = Vec::new();
        for step in self.steps.iter() {
            match dispatch(step.as_ref(), item, ctx, self.metrics.as_ref()).await {
                Dispatched::Processed(next) | Dispatched::Ignored(next) => item = next,
                Dispatched::Failed { item: next, error } => {
                    failures.push(StepFailure {
                        step: step.name().to_string(),
                        error,
                    });
                    item = next;
                }
            }
        }
        ItemOutcome { item, failures }
    }

    /// Like [`Pipeline::run_item`], but stop at the first failed step.
    ///
    /// Later steps are never dispatched, so they neither run nor count the
    /// item.
    pub async fn run_item_fail_fast(
        &self,
        item: Item,
        ctx: &StepContext,
    ) -> Result<Item, StepFailure> {
        let mut item = item;
        for step in self.steps.iter() {
            item = match dispatch(step.as_ref(), item, ctx, self.metrics.as_ref()).await {
                Dispatched::Processed(next) | Dispatched::Ignored(next) => next,
                Dispatched::Failed { error, .. } => {
                    return Err(StepFailure {
                        step: step.name().to_string(),
                        error,
                    })
                }
            };
        }
        Ok(item)
    }

    /// Processed / ignored / error counts per step, in pipeline order.
    pub fn step_counts(&self) -> Vec<StepCounts> {
        self.steps
            .iter()
            .map(|s| StepCounts::read(self.metrics.as_ref(), s.name()))
            .collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("steps", &self.steps).finish()
    }
}
