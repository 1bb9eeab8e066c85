//! Generic conversion-service step: POST the document, keep what comes back.

use super::step::{Step, StepContext};
use crate::client::with_query;
use crate::error::StepError;
use crate::item::{Item, ItemUpdate};
use crate::mime;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

pub const DEFAULT_STEP_NAME: &str = "Convert via API";

#[derive(Debug, Clone)]
pub struct ApiStep {
    name: String,
    api_url: String,
    supported_types: HashSet<String>,
    output_type: Option<String>,
}

impl ApiStep {
    /// A step accepting PDF and keeping the item's type unless told otherwise.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            name: DEFAULT_STEP_NAME.to_string(),
            api_url: api_url.into(),
            supported_types: [mime::PDF.to_string()].into_iter().collect(),
            output_type: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_supported_types<T>(mut self, types: T) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
    {
        self.supported_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output_type(mut self, mime_type: Option<String>) -> Self {
        self.output_type = mime_type;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

#[async_trait]
impl Step for ApiStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_types(&self) -> &HashSet<String> {
        &self.supported_types
    }

    async fn process(&self, item: &Item, ctx: &StepContext) -> Result<ItemUpdate, StepError> {
        let client = ctx.client()?;
        let url = with_query(&self.api_url, ctx.request_args())?;
        debug!(
            "posting {} ({} bytes) to {}",
            item.source_location(),
            item.content.len(),
            url
        );

        let response = client
            .post_bytes(&url, item.content.as_bytes().to_vec(), ctx.request_timeout())
            .await?;

        Ok(ItemUpdate {
            content: Some(response.body.into()),
            mime_type: self.output_type.clone(),
            ..Default::default()
        })
    }
}
