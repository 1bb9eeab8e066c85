//! Per-run named counters.
//!
//! Every step owns a `processed_<step>`, `ignored_<step>` and `error_<step>`
//! counter; the item-creation stage owns `files`. Counters start at zero
//! when a [`Counters`] is created (one per run), only ever go up, and can be
//! read at any time for progress reporting.
//!
//! The sink is injected through [`crate::pipeline::Pipeline`] rather than kept
//! in a global, so concurrent runs (and tests) never share state.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Counter incremented once per item read from storage.
pub const FILES: &str = "files";

pub fn step_processed_counter(step: &str) -> String {
    format!("processed_{step}")
}

pub fn step_ignored_counter(step: &str) -> String {
    format!("ignored_{step}")
}

pub fn step_error_counter(step: &str) -> String {
    format!("error_{step}")
}

/// Increment-only counter sink. Implementations must tolerate concurrent
/// increments from many tasks.
pub trait MetricsSink: Send + Sync {
    fn inc(&self, name: &str) {
        self.inc_by(name, 1);
    }

    fn inc_by(&self, name: &str, n: u64);

    /// Current value; `0` for a counter that was never incremented.
    fn get(&self, name: &str) -> u64;

    /// All counters, sorted by name.
    fn snapshot(&self) -> BTreeMap<String, u64>;
}

/// Shared handle type stored in pipelines and runners.
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Default in-memory sink.
#[derive(Debug, Default)]
pub struct Counters {
    values: DashMap<String, u64>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedMetrics {
        Arc::new(Self::new())
    }
}

impl MetricsSink for Counters {
    fn inc_by(&self, name: &str, n: u64) {
        *self.values.entry(name.to_string()).or_insert(0) += n;
    }

    fn get(&self, name: &str) -> u64 {
        self.values.get(name).map(|v| *v).unwrap_or(0)
    }

    fn snapshot(&self) -> BTreeMap<String, u64> {
        self.values
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

/// Processed / ignored / error totals for one step, as reported at run end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepCounts {
    pub step: String,
    pub processed: u64,
    pub ignored: u64,
    pub error: u64,
}

impl StepCounts {
    pub fn read(metrics: &dyn MetricsSink, step: &str) -> Self {
        Self {
            step: step.to_string(),
            processed: metrics.get(&step_processed_counter(step)),
            ignored: metrics.get(&step_ignored_counter(step)),
            error: metrics.get(&step_error_counter(step)),
        }
    }
}
