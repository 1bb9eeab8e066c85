//! Named pipeline definitions and the options they take.

use super::api::ApiStep;
use super::grobid::{GrobidStep, DEFAULT_GROBID_URL};
use super::step::SharedStep;
use crate::error::PipelineError;
use crate::mime;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelineKind {
    /// PDF → TEI through GROBID.
    #[default]
    Grobid,
    /// A single configurable conversion-service call.
    Api,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Grobid => "grobid",
            PipelineKind::Api => "api",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grobid" => Ok(PipelineKind::Grobid),
            "api" => Ok(PipelineKind::Api),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown pipeline '{other}' (expected grobid or api)"
            ))),
        }
    }
}

/// Pipeline selection plus every pipeline-specific option.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub kind: PipelineKind,

    /// GROBID base URL. Default: [`DEFAULT_GROBID_URL`].
    pub grobid_url: Option<String>,
    /// Overrides the field-derived GROBID action.
    pub grobid_action: Option<String>,
    /// Requested fields, e.g. `title,abstract`.
    pub fields: Option<Vec<String>>,

    /// Required for [`PipelineKind::Api`].
    pub api_url: Option<String>,
    pub api_name: Option<String>,
    /// Defaults to PDF only.
    pub api_supported_types: Vec<String>,
    pub api_output_type: Option<String>,
}

impl PipelineConfig {
    pub fn new(kind: PipelineKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Instantiate the selected pipeline's steps, in execution order.
    pub fn build_steps(&self) -> Result<Vec<SharedStep>, PipelineError> {
        let steps: Vec<SharedStep> = match self.kind {
            PipelineKind::Grobid => {
                let url = self.grobid_url.as_deref().unwrap_or(DEFAULT_GROBID_URL);
                info!("grobid pipeline: url={}, action={:?}", url, self.grobid_action);
                vec![Arc::new(
                    GrobidStep::new(url)
                        .with_action(self.grobid_action.clone())
                        .with_fields(self.fields.clone()),
                )]
            }
            PipelineKind::Api => {
                let url = self.api_url.as_deref().filter(|u| !u.is_empty()).ok_or_else(|| {
                    PipelineError::InvalidConfig("--api-url is required for the api pipeline".into())
                })?;
                let mut step = ApiStep::new(url).with_output_type(self.api_output_type.clone());
                if let Some(name) = &self.api_name {
                    step = step.with_name(name.clone());
                }
                if !self.api_supported_types.is_empty() {
                    step = step.with_supported_types(self.api_supported_types.iter().cloned());
                }
                info!("api pipeline: url={}, output_type={:?}", url, self.api_output_type);
                vec![Arc::new(step)]
            }
        };
        Ok(steps)
    }
}

/// Split a comma-separated field list, dropping blanks.
pub fn parse_fields(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve a type given either as a MIME type or as a file extension.
pub fn resolve_mime_type(s: &str) -> String {
    let s = s.trim();
    if s.contains('/') {
        return s.to_string();
    }
    mime::guess_type(&format!("file.{}", s.trim_start_matches('.')))
        .map(str::to_string)
        .unwrap_or_else(|| s.to_string())
}
