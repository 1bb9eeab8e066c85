//! CLI binary for edgequake-pipelines.
//!
//! A thin shim over the library crate that maps CLI flags to `RunConfig` and
//! `PipelineConfig`, runs the selected runner and prints the summary.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pipelines::pipeline::definition::{parse_fields, resolve_mime_type};
use edgequake_pipelines::{
    parse_request_args, run_pipeline, Counters, LocalFileStore, Pipeline, PipelineConfig,
    PipelineKind, ProgressCallback, RunConfig, RunProgressCallback, RunnerKind,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the whole run plus one log line per finished file. Files
/// finish out of order when `--num-workers` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Listing source files…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total: usize) {
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total} files…"))
        ));
    }

    fn on_task_complete(&self, location: &str, _success: usize, _failure: usize, _total: usize) {
        self.bar.println(format!("  {} {}", green("✓"), dim(location)));
        self.bar.inc(1);
    }

    fn on_task_error(
        &self,
        location: &str,
        error: &str,
        _success: usize,
        _failure: usize,
        _total: usize,
    ) {
        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), location, red(&msg)));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, success: usize, failure: usize) {
        self.bar.finish_and_clear();
        if failure == 0 {
            eprintln!(
                "{} {} files converted successfully",
                green("✔"),
                bold(&success.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files converted  ({} failed)",
                if success == 0 { red("✘") } else { cyan("⚠") },
                bold(&success.to_string()),
                success + failure,
                red(&failure.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every PDF one level below /data/pdfs with a local GROBID
  eq-pipelines --data-path /data/pdfs --source-path '*/*.pdf'

  # Four workers, header fields only, skip files already converted
  eq-pipelines --data-path /data/pdfs --source-path '*/*.pdf' \
    --num-workers 4 --fields title,abstract --resume

  # Sources from a TSV column, stage-graph runner
  eq-pipelines --runner distributed \
    --source-file-list /data/file-list.tsv --source-file-column source_url

  # DOCX to PDF through a generic conversion service
  eq-pipelines --pipeline api --api-url http://localhost:8080/api/convert \
    --api-supported-types docx,doc --api-output-type pdf --output-suffix .pdf \
    --data-path /data/docs --source-path '**/*.docx' \
    --request-args 'remove_line_no=n&remove_redline=n'

ENVIRONMENT VARIABLES:
  Every flag can be set as EQ_PIPELINES_<FLAG>, e.g. EQ_PIPELINES_NUM_WORKERS=4.
  RUST_LOG overrides the log filter chosen by --debug / --quiet.
"#;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RunnerArg {
    Local,
    Distributed,
}

impl From<RunnerArg> for RunnerKind {
    fn from(v: RunnerArg) -> Self {
        match v {
            RunnerArg::Local => RunnerKind::Local,
            RunnerArg::Distributed => RunnerKind::Distributed,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PipelineArg {
    Grobid,
    Api,
}

impl From<PipelineArg> for PipelineKind {
    fn from(v: PipelineArg) -> Self {
        match v {
            PipelineArg::Grobid => PipelineKind::Grobid,
            PipelineArg::Api => PipelineKind::Api,
        }
    }
}

/// Run documents through a conversion pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "eq-pipelines",
    version,
    about = "Run documents through a conversion pipeline",
    long_about = "Run a batch of source documents through an ordered list of MIME-filtered \
conversion steps (e.g. PDF → TEI via GROBID) and write one output per source. Runs on a local \
worker pool or as a stage graph.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Execution strategy.
    #[arg(long, env = "EQ_PIPELINES_RUNNER", value_enum, default_value = "local")]
    runner: RunnerArg,

    /// Pipeline to run.
    #[arg(long, env = "EQ_PIPELINES_PIPELINE", value_enum, default_value = "grobid")]
    pipeline: PipelineArg,

    // ── Sources & outputs ────────────────────────────────────────────────
    /// Base directory of the source files.
    #[arg(long, env = "EQ_PIPELINES_DATA_PATH")]
    data_path: Option<PathBuf>,

    /// Source pattern relative to --data-path, e.g. '*/*.pdf'.
    #[arg(long, env = "EQ_PIPELINES_SOURCE_PATH", conflicts_with = "source_file_list")]
    source_path: Option<String>,

    /// File listing the sources (plain, CSV or TSV).
    #[arg(long, env = "EQ_PIPELINES_SOURCE_FILE_LIST")]
    source_file_list: Option<PathBuf>,

    /// Column of --source-file-list holding the source location.
    #[arg(long, env = "EQ_PIPELINES_SOURCE_FILE_COLUMN")]
    source_file_column: Option<String>,

    /// Process at most this many files.
    #[arg(long, env = "EQ_PIPELINES_LIMIT")]
    limit: Option<usize>,

    /// Output directory. Default: <data-path>-results.
    #[arg(long, env = "EQ_PIPELINES_OUTPUT_PATH")]
    output_path: Option<PathBuf>,

    /// Replaces the source extension.
    #[arg(long, env = "EQ_PIPELINES_OUTPUT_SUFFIX", default_value = ".xml")]
    output_suffix: String,

    /// Skip files whose output already exists.
    #[arg(long, env = "EQ_PIPELINES_RESUME")]
    resume: bool,

    // ── Execution ────────────────────────────────────────────────────────
    /// Concurrent files (local runner).
    #[arg(long, env = "EQ_PIPELINES_NUM_WORKERS", default_value_t = 1)]
    num_workers: usize,

    /// Concurrent items per stage (distributed runner).
    #[arg(long, env = "EQ_PIPELINES_STAGE_PARALLELISM", default_value_t = 4)]
    stage_parallelism: usize,

    /// Retries per HTTP request.
    #[arg(long, env = "EQ_PIPELINES_MAX_RETRIES", default_value_t = 10)]
    max_retries: u32,

    /// Exponential backoff factor in seconds.
    #[arg(long, env = "EQ_PIPELINES_RETRY_BACKOFF", default_value_t = 0.1)]
    retry_backoff: f64,

    /// Abort on the first failed file (local runner).
    #[arg(long, env = "EQ_PIPELINES_FAIL_ON_ERROR")]
    fail_on_error: bool,

    /// Query parameters forwarded to services, e.g. 'a=1&b=2'.
    #[arg(long, env = "EQ_PIPELINES_REQUEST_ARGS")]
    request_args: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "EQ_PIPELINES_REQUEST_TIMEOUT", default_value_t = 300)]
    request_timeout: u64,

    // ── GROBID ───────────────────────────────────────────────────────────
    /// Base URL of the GROBID service.
    #[arg(long, env = "EQ_PIPELINES_GROBID_URL")]
    grobid_url: Option<String>,

    /// GROBID action (default derived from --fields).
    #[arg(long, env = "EQ_PIPELINES_GROBID_ACTION")]
    grobid_action: Option<String>,

    /// Comma-separated fields to extract, e.g. title,abstract.
    #[arg(long, env = "EQ_PIPELINES_FIELDS")]
    fields: Option<String>,

    // ── API pipeline ─────────────────────────────────────────────────────
    /// Conversion service URL (required for --pipeline api).
    #[arg(long, env = "EQ_PIPELINES_API_URL")]
    api_url: Option<String>,

    /// Step name used in logs and counters.
    #[arg(long, env = "EQ_PIPELINES_API_NAME")]
    api_name: Option<String>,

    /// Comma-separated input types (MIME types or extensions). Default: pdf.
    #[arg(long, env = "EQ_PIPELINES_API_SUPPORTED_TYPES")]
    api_supported_types: Option<String>,

    /// Type of the service's output (MIME type or extension).
    #[arg(long, env = "EQ_PIPELINES_API_OUTPUT_TYPE")]
    api_output_type: Option<String>,

    // ── Output ───────────────────────────────────────────────────────────
    /// Print the run summary as JSON on stdout.
    #[arg(long, env = "EQ_PIPELINES_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "EQ_PIPELINES_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "EQ_PIPELINES_DEBUG")]
    debug: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "EQ_PIPELINES_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces per-file INFO lines.
    let runner: RunnerKind = cli.runner.into();
    let show_progress =
        !cli.quiet && !cli.no_progress && !cli.json && runner == RunnerKind::Local;
    let filter = if cli.debug {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RunProgressCallback>)
    } else {
        None
    };

    let config = build_run_config(&cli, progress_cb)?;
    let steps = build_pipeline_config(&cli)
        .build_steps()
        .context("Invalid pipeline configuration")?;
    let pipeline = Pipeline::new(steps, Counters::shared());

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = run_pipeline(runner, pipeline, config, Arc::new(LocalFileStore::new()))
        .await
        .context("Pipeline run failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?;
        println!("{json}");
    } else if !cli.quiet {
        eprint!("{summary}");
    }

    Ok(())
}

/// Map CLI args to `RunConfig`.
fn build_run_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RunConfig> {
    let mut builder = RunConfig::builder()
        .output_suffix(cli.output_suffix.clone())
        .resume(cli.resume)
        .num_workers(cli.num_workers)
        .stage_parallelism(cli.stage_parallelism)
        .max_retries(cli.max_retries)
        .retry_backoff(cli.retry_backoff)
        .fail_on_error(cli.fail_on_error)
        .request_timeout_secs(cli.request_timeout);

    if let Some(ref path) = cli.data_path {
        builder = builder.data_path(path.clone());
    }
    if let Some(ref pattern) = cli.source_path {
        builder = builder.source_path(pattern.clone());
    }
    if let Some(ref list) = cli.source_file_list {
        builder = builder.source_file_list(list.clone());
    }
    if let Some(ref column) = cli.source_file_column {
        builder = builder.source_file_column(column.clone());
    }
    if let Some(ref path) = cli.output_path {
        builder = builder.output_path(path.clone());
    }
    if let Some(limit) = cli.limit {
        builder = builder.limit(limit);
    }
    if let Some(ref args) = cli.request_args {
        builder = builder.request_args(parse_request_args(args));
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Map CLI args to `PipelineConfig`.
fn build_pipeline_config(cli: &Cli) -> PipelineConfig {
    PipelineConfig {
        kind: cli.pipeline.into(),
        grobid_url: cli.grobid_url.clone(),
        grobid_action: cli.grobid_action.clone(),
        fields: cli.fields.as_deref().map(parse_fields),
        api_url: cli.api_url.clone(),
        api_name: cli.api_name.clone(),
        api_supported_types: cli
            .api_supported_types
            .as_deref()
            .map(|s| parse_fields(s).iter().map(|t| resolve_mime_type(t)).collect())
            .unwrap_or_default(),
        api_output_type: cli.api_output_type.as_deref().map(resolve_mime_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_maps_to_run_config() {
        let cli = Cli::parse_from([
            "eq-pipelines",
            "--data-path",
            "/data/pdfs",
            "--source-path",
            "*/*.pdf",
            "--num-workers",
            "3",
            "--request-args",
            "remove_line_no=n",
            "--fail-on-error",
        ]);
        let config = build_run_config(&cli, None).unwrap();
        assert_eq!(config.num_workers, 3);
        assert!(config.fail_on_error);
        assert_eq!(config.output_path, PathBuf::from("/data/pdfs-results"));
        assert_eq!(
            config.request_args,
            vec![("remove_line_no".to_string(), "n".to_string())]
        );
    }

    #[test]
    fn source_path_and_file_list_conflict() {
        let result = Cli::try_parse_from([
            "eq-pipelines",
            "--source-path",
            "*.pdf",
            "--source-file-list",
            "list.txt",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn api_options_resolve_extensions() {
        let cli = Cli::parse_from([
            "eq-pipelines",
            "--pipeline",
            "api",
            "--api-url",
            "http://localhost:8080/api/convert",
            "--api-supported-types",
            "docx,doc",
            "--api-output-type",
            "pdf",
            "--data-path",
            "/data",
            "--source-path",
            "*.docx",
        ]);
        let pipeline = build_pipeline_config(&cli);
        assert_eq!(pipeline.kind, PipelineKind::Api);
        assert_eq!(
            pipeline.api_supported_types,
            vec![
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document".to_string(),
                "application/msword".to_string()
            ]
        );
        assert_eq!(pipeline.api_output_type.as_deref(), Some("application/pdf"));
    }
}
