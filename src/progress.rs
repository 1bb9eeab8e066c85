//! Progress-callback trait for per-file run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::RunConfigBuilder::progress_callback`] to receive events
//! as the local runner completes each file task. The binary forwards them to
//! an `indicatif` progress bar; library callers can forward them anywhere.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pipelines::{RunConfig, RunProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl RunProgressCallback for CountingCallback {
//!     fn on_task_complete(&self, location: &str, success: usize, failure: usize, total: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{location}: {success} ok / {failure} failed of {total}");
//!     }
//! }
//!
//! let config = RunConfig::builder()
//!     .data_path("/data")
//!     .source_path("*.pdf")
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the local runner as file tasks complete.
///
/// Tasks complete concurrently and out of submission order, so
/// implementations must be `Send + Sync` and protect their own state.
/// All methods default to no-ops.
pub trait RunProgressCallback: Send + Sync {
    /// Called once, before any task is submitted.
    fn on_run_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a file task succeeds. Counts include this task.
    fn on_task_complete(&self, location: &str, success: usize, failure: usize, total: usize) {
        let _ = (location, success, failure, total);
    }

    /// Called when a file task fails. Counts include this task.
    fn on_task_error(
        &self,
        location: &str,
        error: &str,
        success: usize,
        failure: usize,
        total: usize,
    ) {
        let _ = (location, error, success, failure, total);
    }

    /// Called once after every task completed (not called on a fail-fast abort).
    fn on_run_complete(&self, success: usize, failure: usize) {
        let _ = (success, failure);
    }
}

/// Default when no callback is configured.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn RunProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        completes: AtomicUsize,
        errors: AtomicUsize,
        total: AtomicUsize,
    }

    impl RunProgressCallback for TrackingCallback {
        fn on_run_start(&self, total: usize) {
            self.total.store(total, Ordering::SeqCst);
        }

        fn on_task_complete(&self, _: &str, _: usize, _: usize, _: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_task_error(&self, _: &str, _: &str, _: usize, _: usize, _: usize) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_run_start(2);
        cb.on_task_complete("a.pdf", 1, 0, 2);
        cb.on_task_error("b.pdf", "boom", 1, 1, 2);
        cb.on_run_complete(1, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let cb = TrackingCallback::default();
        cb.on_run_start(3);
        cb.on_task_complete("a", 1, 0, 3);
        cb.on_task_complete("b", 2, 0, 3);
        cb.on_task_error("c", "HTTP 503", 2, 1, 3);
        assert_eq!(cb.total.load(Ordering::SeqCst), 3);
        assert_eq!(cb.completes.load(Ordering::SeqCst), 2);
        assert_eq!(cb.errors.load(Ordering::SeqCst), 1);
    }
}
