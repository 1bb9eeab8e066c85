//! PDF → TEI conversion through a GROBID service.

use super::step::{Step, StepContext};
use crate::client::{with_query, RequestBody};
use crate::error::StepError;
use crate::item::{Item, ItemUpdate};
use crate::mime;
use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_GROBID_URL: &str = "http://localhost:8080/api";

pub const PROCESS_HEADER_DOCUMENT: &str = "processHeaderDocument";
pub const PROCESS_FULL_TEXT_DOCUMENT: &str = "processFulltextDocument";

/// Fields the header-only action can extract.
pub const HEADER_FIELDS: &[&str] = &["title", "abstract", "authors", "affiliations"];

pub const STEP_NAME: &str = "Convert to TEI";

/// `true` for a non-empty field list made of header fields only.
pub fn has_only_header_fields(fields: &[String]) -> bool {
    !fields.is_empty() && fields.iter().all(|f| HEADER_FIELDS.contains(&f.as_str()))
}

/// Cheapest action that still yields every requested field.
pub fn default_action_for_fields(fields: Option<&[String]>) -> &'static str {
    match fields {
        Some(fields) if has_only_header_fields(fields) => PROCESS_HEADER_DOCUMENT,
        _ => PROCESS_FULL_TEXT_DOCUMENT,
    }
}

/// Uploads the PDF as multipart field `input` and takes the TEI response as
/// the new content.
#[derive(Debug, Clone)]
pub struct GrobidStep {
    url: String,
    action: Option<String>,
    fields: Option<Vec<String>>,
    supported_types: HashSet<String>,
}

impl GrobidStep {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            action: None,
            fields: None,
            supported_types: [mime::PDF.to_string()].into_iter().collect(),
        }
    }

    /// Force an action instead of deriving it from the requested fields.
    pub fn with_action(mut self, action: Option<String>) -> Self {
        self.action = action.filter(|a| !a.is_empty());
        self
    }

    /// Fields used when an item carries no `includes` of its own.
    pub fn with_fields(mut self, fields: Option<Vec<String>>) -> Self {
        self.fields = fields;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn action_for(&self, item: &Item) -> &str {
        if let Some(action) = &self.action {
            return action;
        }
        let fields = item.includes.as_deref().or(self.fields.as_deref());
        default_action_for_fields(fields)
    }
}

impl Default for GrobidStep {
    fn default() -> Self {
        Self::new(DEFAULT_GROBID_URL)
    }
}

#[async_trait]
impl Step for GrobidStep {
    fn name(&self) -> &str {
        STEP_NAME
    }

    fn supported_types(&self) -> &HashSet<String> {
        &self.supported_types
    }

    async fn process(&self, item: &Item, ctx: &StepContext) -> Result<ItemUpdate, StepError> {
        let client = ctx.client()?;
        let endpoint = format!("{}/{}", self.url, self.action_for(item));
        let url = with_query(&endpoint, ctx.request_args())?;

        let file_name = Path::new(item.source_location())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        debug!("posting {} ({} bytes) to {}", file_name, item.content.len(), url);
        let body = RequestBody::Multipart {
            field: "input".to_string(),
            file_name,
            mime_type: Some(mime::PDF.to_string()),
            data: item.content.as_bytes().to_vec(),
        };
        let response = client
            .request(Method::POST, &url, body, ctx.request_timeout())
            .await?;

        Ok(ItemUpdate::content(response.text()).with_type(mime::TEI_XML))
    }
}
