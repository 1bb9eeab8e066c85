//! Which files to process, and where their outputs go.
//!
//! Sources come either from a glob-style pattern under the data directory
//! (`--source-path '*/*.pdf'`) or from a file list (`--source-file-list`,
//! plain text or CSV/TSV with a named column). The output location of every
//! source is a pure function of the run configuration, which is what makes
//! `--resume` possible: a source whose output already exists is skipped.

use crate::config::{RunConfig, SourceSpec};
use crate::error::PipelineError;
use crate::io::ContentStore;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Maps a source location to its output location.
#[derive(Debug, Clone)]
pub struct OutputMapping {
    pub base_data_path: PathBuf,
    pub output_path: PathBuf,
    pub output_suffix: String,
}

impl OutputMapping {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            base_data_path: config.base_data_path.clone(),
            output_path: config.output_path.clone(),
            output_suffix: config.output_suffix.clone(),
        }
    }

    /// `<output_path>/<source relative to base_data_path, extension → suffix>`.
    ///
    /// A trailing `.gz` is dropped before the extension is replaced. Sources
    /// outside the base directory keep only their file name.
    pub fn output_location_for(&self, source_location: &str) -> String {
        let source = Path::new(source_location);
        let relative = source
            .strip_prefix(&self.base_data_path)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| source.file_name().map(PathBuf::from).unwrap_or_default());

        let mut relative = relative.to_string_lossy().into_owned();
        if let Some(stripped) = relative.strip_suffix(".gz") {
            relative = stripped.to_string();
        }
        let stem_len = Path::new(&relative)
            .extension()
            .map(|ext| relative.len() - ext.len() - 1)
            .unwrap_or(relative.len());
        relative.truncate(stem_len);
        relative.push_str(&self.output_suffix);

        self.output_path.join(relative).to_string_lossy().into_owned()
    }
}

/// Translate a glob pattern (`*`, `**`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, PipelineError> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                // `**/` also matches zero directories
                if chars.peek() == Some(&'/') {
                    chars.next();
                    re.push_str("(?:.*/)?");
                } else {
                    re.push_str(".*");
                }
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
        .map_err(|e| PipelineError::InvalidConfig(format!("bad source pattern '{pattern}': {e}")))
}

/// All files under `base` whose relative path matches `pattern`, sorted.
pub fn find_matching_files(base: &Path, pattern: &str) -> Result<Vec<String>, PipelineError> {
    let re = glob_to_regex(pattern)?;
    let mut files = Vec::new();
    for entry in WalkDir::new(base).follow_links(true) {
        let entry = entry.map_err(|e| PipelineError::ListingFailed(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(base) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if re.is_match(&relative) {
            files.push(entry.path().to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}

/// Parse a file list: one location per line, or CSV/TSV with a header row.
pub fn parse_file_list(
    text: &str,
    file_name: &str,
    column: Option<&str>,
) -> Result<Vec<String>, PipelineError> {
    let delimiter = if file_name.ends_with(".tsv") {
        Some('\t')
    } else if file_name.ends_with(".csv") {
        Some(',')
    } else {
        None
    };

    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(delimiter) = delimiter else {
        return Ok(lines.map(str::to_string).collect());
    };

    let header: Vec<String> = lines
        .next()
        .map(|h| split_row(h, delimiter))
        .unwrap_or_default();
    let index = match column {
        Some(name) => header.iter().position(|h| h == name).ok_or_else(|| {
            PipelineError::ListingFailed(format!(
                "column '{name}' not found in {file_name} (columns: {header:?})"
            ))
        })?,
        None => 0,
    };

    Ok(lines
        .filter_map(|l| split_row(l, delimiter).into_iter().nth(index))
        .filter(|v| !v.is_empty())
        .collect())
}

/// Split one delimited row into trimmed fields.
///
/// A field wrapped in double quotes may contain the delimiter, and `""`
/// inside it stands for one quote. Quoted fields never span lines.
fn split_row(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' if in_quotes => in_quotes = false,
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            c if c == delimiter && !in_quotes => {
                fields.push(field.trim().to_string());
                field.clear();
            }
            c => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

/// Resolve a file-list entry: relative entries are relative to the list's
/// directory.
fn resolve_entry(entry: &str, list_dir: &Path) -> String {
    if entry.contains("://") || Path::new(entry).is_absolute() {
        entry.to_string()
    } else {
        list_dir.join(entry).to_string_lossy().into_owned()
    }
}

/// Every source location selected by `config`, after `--limit` and `--resume`.
pub async fn list_remaining(
    config: &RunConfig,
    store: &dyn ContentStore,
) -> Result<Vec<String>, PipelineError> {
    let mut files = match &config.source {
        SourceSpec::Pattern(pattern) => find_matching_files(&config.base_data_path, pattern)?,
        SourceSpec::FileList { path, column } => {
            let location = path.to_string_lossy();
            let bytes = store.read_all(&location).await?;
            let list_dir = path.parent().unwrap_or_else(|| Path::new(""));
            parse_file_list(&String::from_utf8_lossy(&bytes), &location, column.as_deref())?
                .iter()
                .map(|e| resolve_entry(e, list_dir))
                .collect::<Vec<_>>()
        }
    };
    debug!("found {} source files", files.len());

    if config.resume {
        let mapping = OutputMapping::from_config(config);
        let mut remaining = Vec::with_capacity(files.len());
        for file in files {
            if !store.exists(&mapping.output_location_for(&file)).await {
                remaining.push(file);
            }
        }
        files = remaining;
        info!("{} files remaining after skipping existing outputs", files.len());
    }

    if let Some(limit) = config.limit {
        files.truncate(limit);
    }
    Ok(files)
}
