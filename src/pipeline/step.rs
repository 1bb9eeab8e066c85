//! The [`Step`] contract and the context steps run in.

use crate::client::RetryClient;
use crate::error::StepError;
use crate::item::{Item, ItemUpdate};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Read-only resources scoped to one run: the shared HTTP client, request
/// arguments forwarded to services and the per-call timeout.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    client: Option<RetryClient>,
    request_args: Vec<(String, String)>,
    request_timeout: Option<Duration>,
}

impl StepContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: RetryClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_request_args(mut self, args: Vec<(String, String)>) -> Self {
        self.request_args = args;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// The run's client; steps that call services fail without one.
    pub fn client(&self) -> Result<&RetryClient, StepError> {
        self.client
            .as_ref()
            .ok_or_else(|| StepError::Failed("no HTTP client in step context".into()))
    }

    pub fn request_args(&self) -> &[(String, String)] {
        &self.request_args
    }

    /// Per-call timeout override; `None` means the client default.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }
}

/// A named, type-filtered transformation.
///
/// Steps are configuration-only: everything run-scoped arrives through
/// [`StepContext`], so one instance is shared by every worker.
#[async_trait]
pub trait Step: Send + Sync {
    /// Display name; also the key of this step's counters.
    fn name(&self) -> &str;

    /// MIME types this step acts on. Fixed at construction.
    fn supported_types(&self) -> &HashSet<String>;

    fn supports(&self, mime_type: Option<&str>) -> bool {
        mime_type.is_some_and(|t| self.supported_types().contains(t))
    }

    /// Transform `item`, returning the fields to replace.
    async fn process(&self, item: &Item, ctx: &StepContext) -> Result<ItemUpdate, StepError>;
}

pub type SharedStep = Arc<dyn Step>;

impl fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.supported_types().iter().collect();
        types.sort();
        f.debug_struct("Step")
            .field("name", &self.name())
            .field("supported_types", &types)
            .finish()
    }
}

type StepFn = dyn Fn(&Item, &StepContext) -> Result<ItemUpdate, StepError> + Send + Sync;

/// A step backed by a plain function. Handy for local transformations that
/// need no I/O.
///
/// ```rust
/// use edgequake_pipelines::{FunctionStep, ItemUpdate, Step};
///
/// let upper = FunctionStep::new("Uppercase", ["text/xml"], |item, _| {
///     Ok(ItemUpdate::content(item.content.to_text().to_uppercase()))
/// });
/// assert!(upper.supports(Some("text/xml")));
/// ```
pub struct FunctionStep {
    name: String,
    supported_types: HashSet<String>,
    f: Box<StepFn>,
}

impl FunctionStep {
    pub fn new<T, F>(name: impl Into<String>, supported_types: T, f: F) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        F: Fn(&Item, &StepContext) -> Result<ItemUpdate, StepError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            supported_types: supported_types.into_iter().map(Into::into).collect(),
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl Step for FunctionStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_types(&self) -> &HashSet<String> {
        &self.supported_types
    }

    async fn process(&self, item: &Item, ctx: &StepContext) -> Result<ItemUpdate, StepError> {
        (self.f)(item, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_requires_known_type() {
        let step = FunctionStep::new("s", ["application/pdf"], |_, _| Ok(ItemUpdate::default()));
        assert!(step.supports(Some("application/pdf")));
        assert!(!step.supports(Some("text/xml")));
        assert!(!step.supports(None));
    }

    #[test]
    fn context_without_client_is_an_error() {
        let ctx = StepContext::new();
        assert!(ctx.client().is_err());
        assert!(ctx.request_args().is_empty());
        assert_eq!(ctx.request_timeout(), None);
    }

    #[tokio::test]
    async fn function_step_calls_closure() {
        let step = FunctionStep::new("Uppercase", ["text/xml"], |item, _| {
            Ok(ItemUpdate::content(item.content.to_text().to_uppercase()))
        });
        let item = Item::new("a.xml", "<a>x</a>").with_type(Some("text/xml"));
        let update = step.process(&item, &StepContext::new()).await.unwrap();
        assert_eq!(update, ItemUpdate::content("<A>X</A>"));
    }

    #[test]
    fn debug_lists_sorted_types() {
        let step: SharedStep = Arc::new(FunctionStep::new("s", ["b", "a"], |_, _| {
            Ok(ItemUpdate::default())
        }));
        let s = format!("{:?}", step);
        assert!(s.contains("\"s\""), "got: {s}");
        assert!(s.contains("[\"a\", \"b\"]"), "got: {s}");
    }
}
