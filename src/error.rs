//! Error types for the edgequake-pipelines library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`PipelineError`]: **Fatal** for the run (or, in the local runner, for
//!   one file task): bad configuration, unreadable input, unwritable output,
//!   a failed graph stage. Returned as `Err(PipelineError)` from the runners.
//!
//! * [`StepError`]: **Non-fatal**: one step failed for one item. The
//!   dispatcher counts and logs it, then hands the unchanged item to the next
//!   step. Only the local runner's fail-fast mode escalates it.
//!
//! * [`NetworkError`]: produced by [`crate::client::RetryClient`] once its
//!   retry budget is exhausted. Steps convert it into a [`StepError`].
//!
//! An item whose type a step does not support is *not* an error at all; that
//! routing outcome is [`crate::pipeline::Dispatched::Ignored`].

use thiserror::Error;

/// All fatal errors returned by the edgequake-pipelines library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── I/O errors ────────────────────────────────────────────────────────
    /// Source content could not be read.
    #[error("Failed to read '{location}': {source}")]
    ReadFailed {
        location: String,
        #[source]
        source: std::io::Error,
    },

    /// Output content could not be written.
    #[error("Failed to write output '{location}': {source}")]
    WriteFailed {
        location: String,
        #[source]
        source: std::io::Error,
    },

    /// The list of source files could not be produced.
    #[error("Failed to list source files: {0}")]
    ListingFailed(String),

    // ── Step errors (escalated) ───────────────────────────────────────────
    /// A step failed and the run is configured to fail on error.
    #[error("Step '{step}' failed for '{location}': {source}")]
    StepFailed {
        step: String,
        location: String,
        #[source]
        source: StepError,
    },

    // ── Runner errors ─────────────────────────────────────────────────────
    /// A stage of the distributed graph aborted.
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<PipelineError>,
    },

    /// A worker task panicked or was cancelled unexpectedly.
    #[error("Worker task for '{location}' did not complete: {detail}")]
    TaskJoin { location: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Wrap this error as the failure of a named graph stage.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        PipelineError::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }
}

/// A non-fatal error raised by a single step for a single item.
#[derive(Debug, Error)]
pub enum StepError {
    /// The external conversion service could not be reached or rejected the
    /// request.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The step received content it cannot work with (e.g. a missing input).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Any other step-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// Raised by the retrying client only after all retries are exhausted,
/// or immediately for a non-retryable error status.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Connection, TLS or timeout failure on the final attempt.
    #[error("request to {url} failed after {attempts} attempt(s): {detail}")]
    Transport {
        url: String,
        attempts: u32,
        detail: String,
    },

    /// The service answered with a non-success status.
    #[error("request to {url} returned HTTP {status} after {attempts} attempt(s)")]
    Status {
        url: String,
        status: u16,
        attempts: u32,
    },

    /// The request could not be built (bad URL, unsupported method).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_failed_display_names_step_and_location() {
        let e = PipelineError::StepFailed {
            step: "Convert to TEI".into(),
            location: "data/1/file.pdf".into(),
            source: StepError::Failed("doh".into()),
        };
        let msg = e.to_string();
        assert!(msg.contains("Convert to TEI"), "got: {msg}");
        assert!(msg.contains("data/1/file.pdf"), "got: {msg}");
        assert!(msg.contains("doh"), "got: {msg}");
    }

    #[test]
    fn network_error_converts_into_step_error() {
        let net = NetworkError::Status {
            url: "http://localhost:8080/api".into(),
            status: 503,
            attempts: 11,
        };
        let step: StepError = net.into();
        assert!(matches!(step, StepError::Network(_)));
        assert!(step.to_string().contains("503"));
    }

    #[test]
    fn in_stage_wraps_source() {
        let e = PipelineError::Internal("boom".into()).in_stage("ReadFileContent");
        let msg = e.to_string();
        assert!(msg.contains("ReadFileContent"));
        assert!(msg.contains("boom"));
    }
}
