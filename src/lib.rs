//! # edgequake-pipelines
//!
//! Batch document conversion: run a pipeline of MIME-filtered steps over
//! many source documents and write one converted output per source.
//!
//! ## Why this crate?
//!
//! Conversion services (GROBID, format converters, …) each understand a few
//! document types and fail now and then under load. A batch run over tens of
//! thousands of files needs the same plumbing every time: route each document
//! only to the steps that understand it, retry flaky services, keep going
//! when one document fails, and count what happened. This crate is that
//! plumbing, with two interchangeable execution strategies.
//!
//! ## Pipeline Overview
//!
//! ```text
//! sources (glob or file list)
//!  │
//!  ├─ 1. List     resume filter, limit
//!  ├─ 2. Read     content + `files` counter
//!  ├─ 3. Type     MIME type guessed from the file name
//!  ├─ 4. Steps    dispatch each step: ignored / processed / error counters
//!  └─ 5. Write    output path derived from the source path
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pipelines::{
//!     run_pipeline, Counters, LocalFileStore, Pipeline, PipelineConfig, PipelineKind,
//!     RunConfig, RunnerKind,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::builder()
//!         .data_path("/data/pdfs")
//!         .source_path("*/*.pdf")
//!         .num_workers(4)
//!         .build()?;
//!     let steps = PipelineConfig::new(PipelineKind::Grobid).build_steps()?;
//!     let pipeline = Pipeline::new(steps, Counters::shared());
//!
//!     let summary = run_pipeline(
//!         RunnerKind::Local,
//!         pipeline,
//!         config,
//!         Arc::new(LocalFileStore::new()),
//!     )
//!     .await?;
//!     eprint!("{summary}");
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `eq-pipelines` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pipelines = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod error;
pub mod io;
pub mod item;
pub mod metrics;
pub mod mime;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod source;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{RetryClient, RetryPolicy};
pub use config::{parse_request_args, RunConfig, RunConfigBuilder, SourceSpec};
pub use error::{NetworkError, PipelineError, StepError};
pub use io::{ContentStore, LocalFileStore};
pub use item::{Content, Item, ItemUpdate};
pub use metrics::{Counters, MetricsSink, SharedMetrics, StepCounts};
pub use pipeline::{
    dispatch, Dispatched, FunctionStep, Pipeline, PipelineConfig, PipelineKind, SharedStep, Step,
    StepContext,
};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use runner::{
    create_runner, run_pipeline, DistributedRunner, LocalRunner, RunSummary, Runner, RunnerKind,
};
pub use source::{list_remaining, OutputMapping};
