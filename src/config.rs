//! Run configuration.
//!
//! Everything a runner needs, apart from the pipeline's own steps, lives in
//! [`RunConfig`], built via [`RunConfigBuilder`]. Pipeline-specific options
//! (service URLs, actions) live in [`crate::pipeline::PipelineConfig`].
//!
//! Derived defaults are resolved in [`RunConfigBuilder::build`]:
//! * `base_data_path` is `--data-path`, or the directory of the file list;
//! * `output_path` is `<base_data_path>-results` when not given.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where source locations come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Glob pattern relative to the data path, e.g. `*/*.pdf`.
    Pattern(String),
    /// A file listing one source per line (or a CSV/TSV column).
    FileList {
        path: PathBuf,
        column: Option<String>,
    },
}

/// Configuration for one pipeline run.
///
/// Built via [`RunConfig::builder()`].
///
/// # Example
/// ```rust
/// use edgequake_pipelines::RunConfig;
///
/// let config = RunConfig::builder()
///     .data_path("/data/pdfs")
///     .source_path("*/*.pdf")
///     .num_workers(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.output_path.to_str(), Some("/data/pdfs-results"));
/// ```
#[derive(Clone)]
pub struct RunConfig {
    pub source: SourceSpec,

    /// Root that source paths are made relative to when mapping outputs.
    pub base_data_path: PathBuf,

    /// Root of the output tree.
    pub output_path: PathBuf,

    /// Replaces the source extension. Default: `.xml`.
    pub output_suffix: String,

    /// Process at most this many sources.
    pub limit: Option<usize>,

    /// Skip sources whose output already exists. Default: false.
    pub resume: bool,

    /// Concurrent file tasks in the local runner. Default: 1.
    ///
    /// Conversion is network-bound, so raising this mostly multiplies load on
    /// the conversion service. Start low and watch for 503s.
    pub num_workers: usize,

    /// Retries per HTTP request. Default: 10.
    pub max_retries: u32,

    /// Exponential backoff factor in seconds. Default: 0.1.
    pub retry_backoff: f64,

    /// Abort the local run on the first failed file. Default: false.
    pub fail_on_error: bool,

    /// Extra query parameters forwarded to conversion services.
    pub request_args: Vec<(String, String)>,

    /// Per-request timeout in seconds. Default: 300.
    pub request_timeout_secs: u64,

    /// Concurrent items per stage in the distributed runner. Default: 4.
    pub stage_parallelism: usize,

    /// Bounded channel size between distributed stages. Default: 16.
    pub channel_capacity: usize,

    pub progress_callback: Option<ProgressCallback>,
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("source", &self.source)
            .field("base_data_path", &self.base_data_path)
            .field("output_path", &self.output_path)
            .field("output_suffix", &self.output_suffix)
            .field("limit", &self.limit)
            .field("resume", &self.resume)
            .field("num_workers", &self.num_workers)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("fail_on_error", &self.fail_on_error)
            .field("request_args", &self.request_args)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("stage_parallelism", &self.stage_parallelism)
            .field("channel_capacity", &self.channel_capacity)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RunProgressCallback>"),
            )
            .finish()
    }
}

/// Builder for [`RunConfig`].
#[derive(Default)]
pub struct RunConfigBuilder {
    data_path: Option<PathBuf>,
    source_path: Option<String>,
    source_file_list: Option<PathBuf>,
    source_file_column: Option<String>,
    output_path: Option<PathBuf>,
    output_suffix: Option<String>,
    limit: Option<usize>,
    resume: bool,
    num_workers: Option<usize>,
    max_retries: Option<u32>,
    retry_backoff: Option<f64>,
    fail_on_error: bool,
    request_args: Vec<(String, String)>,
    request_timeout_secs: Option<u64>,
    stage_parallelism: Option<usize>,
    channel_capacity: Option<usize>,
    progress_callback: Option<ProgressCallback>,
}

impl RunConfigBuilder {
    pub fn data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    pub fn source_path(mut self, pattern: impl Into<String>) -> Self {
        self.source_path = Some(pattern.into());
        self
    }

    pub fn source_file_list(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_file_list = Some(path.into());
        self
    }

    pub fn source_file_column(mut self, column: impl Into<String>) -> Self {
        self.source_file_column = Some(column.into());
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn output_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.output_suffix = Some(suffix.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn resume(mut self, v: bool) -> Self {
        self.resume = v;
        self
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = Some(n.max(1));
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn retry_backoff(mut self, factor: f64) -> Self {
        self.retry_backoff = Some(factor);
        self
    }

    pub fn fail_on_error(mut self, v: bool) -> Self {
        self.fail_on_error = v;
        self
    }

    pub fn request_args(mut self, args: Vec<(String, String)>) -> Self {
        self.request_args = args;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    pub fn stage_parallelism(mut self, n: usize) -> Self {
        self.stage_parallelism = Some(n.max(1));
        self
    }

    pub fn channel_capacity(mut self, n: usize) -> Self {
        self.channel_capacity = Some(n.max(1));
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints and resolving
    /// derived paths.
    pub fn build(self) -> Result<RunConfig, PipelineError> {
        let (source, base_data_path) = match (self.source_path, self.source_file_list) {
            (Some(_), Some(_)) => {
                return Err(PipelineError::InvalidConfig(
                    "--source-path and --source-file-list are mutually exclusive".into(),
                ))
            }
            (None, None) => {
                return Err(PipelineError::InvalidConfig(
                    "one of --source-path or --source-file-list is required".into(),
                ))
            }
            (Some(pattern), None) => {
                let base = self.data_path.ok_or_else(|| {
                    PipelineError::InvalidConfig("--source-path requires --data-path".into())
                })?;
                (SourceSpec::Pattern(pattern), base)
            }
            (None, Some(list)) => {
                let base = self.data_path.unwrap_or_else(|| {
                    list.parent().map(PathBuf::from).unwrap_or_default()
                });
                (
                    SourceSpec::FileList {
                        path: list,
                        column: self.source_file_column,
                    },
                    base,
                )
            }
        };

        let retry_backoff = self.retry_backoff.unwrap_or(0.1);
        if !retry_backoff.is_finite() || retry_backoff < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "retry backoff must be ≥ 0, got {retry_backoff}"
            )));
        }

        let output_path = self.output_path.unwrap_or_else(|| default_output_path(&base_data_path));

        Ok(RunConfig {
            source,
            base_data_path,
            output_path,
            output_suffix: self.output_suffix.unwrap_or_else(|| ".xml".into()),
            limit: self.limit,
            resume: self.resume,
            num_workers: self.num_workers.unwrap_or(1),
            max_retries: self.max_retries.unwrap_or(10),
            retry_backoff,
            fail_on_error: self.fail_on_error,
            request_args: self.request_args,
            request_timeout_secs: self.request_timeout_secs.unwrap_or(300),
            stage_parallelism: self.stage_parallelism.unwrap_or(4),
            channel_capacity: self.channel_capacity.unwrap_or(16),
            progress_callback: self.progress_callback,
        })
    }
}

fn default_output_path(base_data_path: &std::path::Path) -> PathBuf {
    let mut name = base_data_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "data".into());
    name.push("-results");
    base_data_path.with_file_name(name)
}

/// Parse `--request-args` (query-string syntax, surrounding quotes allowed).
///
/// Repeated keys are kept, in order.
pub fn parse_request_args(s: &str) -> Vec<(String, String)> {
    let s = s.trim().trim_matches('"');
    url::form_urlencoded::parse(s.as_bytes())
        .into_owned()
        .collect()
}
