//! Conditional, failure-isolated application of one step to one item.
//!
//! Both runners go through [`dispatch`], so type routing, counter bookkeeping
//! and the swallow-and-continue policy are identical whichever strategy
//! drives the pipeline.

use super::step::{Step, StepContext};
use crate::error::StepError;
use crate::item::Item;
use crate::metrics::{
    step_error_counter, step_ignored_counter, step_processed_counter, MetricsSink,
};
use tracing::{debug, warn};

/// What happened when a step met an item.
#[derive(Debug)]
pub enum Dispatched {
    /// The step ran; the item carries its merged update.
    Processed(Item),
    /// The item's type is not supported by the step; item unchanged.
    Ignored(Item),
    /// The step failed; the item is exactly what the step received.
    Failed { item: Item, error: StepError },
}

impl Dispatched {
    pub fn item(&self) -> &Item {
        match self {
            Dispatched::Processed(item) | Dispatched::Ignored(item) => item,
            Dispatched::Failed { item, .. } => item,
        }
    }

    pub fn into_item(self) -> Item {
        match self {
            Dispatched::Processed(item) | Dispatched::Ignored(item) => item,
            Dispatched::Failed { item, .. } => item,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Dispatched::Failed { .. })
    }
}

/// Apply `step` to `item` if it supports the item's type.
///
/// Never fails: a step error is counted, logged at WARN and returned as
/// [`Dispatched::Failed`] alongside the untouched item.
pub async fn dispatch(
    step: &dyn Step,
    item: Item,
    ctx: &StepContext,
    metrics: &dyn MetricsSink,
) -> Dispatched {
    let name = step.name();

    if !step.supports(item.mime_type()) {
        debug!(
            "skipping step {}, {:?} not in supported types",
            name,
            item.mime_type()
        );
        metrics.inc(&step_ignored_counter(name));
        return Dispatched::Ignored(item);
    }

    debug!("executing step {}: {} ({:?})", name, item.source_location(), item.mime_type());
    match step.process(&item, ctx).await {
        Ok(update) => {
            let item = item.apply(update);
            debug!("result of step {}: {:?}", name, item.mime_type());
            metrics.inc(&step_processed_counter(name));
            Dispatched::Processed(item)
        }
        Err(error) => {
            warn!(
                "caught exception (ignoring item): {}, source file: {}, step: {}",
                error,
                item.source_location(),
                name
            );
            metrics.inc(&step_error_counter(name));
            Dispatched::Failed { item, error }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemUpdate;
    use crate::metrics::Counters;
    use crate::mime;
    use crate::pipeline::step::FunctionStep;

    fn pdf_item() -> Item {
        Item::new("data/1/file.pdf", b"pdf content 1".as_slice()).with_type(Some(mime::PDF))
    }

    #[tokio::test]
    async fn unsupported_type_is_ignored_and_unchanged() {
        let counters = Counters::new();
        let step = FunctionStep::new("step1", ["other"], |_, _| {
            panic!("must not be called")
        });

        let before = pdf_item();
        let out = dispatch(&step, before.clone(), &StepContext::new(), &counters).await;

        assert!(matches!(out, Dispatched::Ignored(_)));
        assert_eq!(out.item(), &before);
        assert_eq!(counters.get("ignored_step1"), 1);
        assert_eq!(counters.get("processed_step1"), 0);
        assert_eq!(counters.get("error_step1"), 0);
    }

    #[tokio::test]
    async fn missing_type_is_ignored() {
        let counters = Counters::new();
        let step = FunctionStep::new("s", [mime::PDF], |_, _| Ok(ItemUpdate::content("x")));
        let item = Item::new("README", "text");
        let out = dispatch(&step, item, &StepContext::new(), &counters).await;
        assert!(matches!(out, Dispatched::Ignored(_)));
        assert_eq!(counters.get("ignored_s"), 1);
    }

    #[tokio::test]
    async fn supported_type_is_processed_and_merged() {
        let counters = Counters::new();
        let step = FunctionStep::new("Convert to TEI", [mime::PDF], |_, _| {
            Ok(ItemUpdate::content("<TEI>tei content 1</TEI>").with_type(mime::TEI_XML))
        });

        let out = dispatch(&step, pdf_item(), &StepContext::new(), &counters).await;

        let item = out.into_item();
        assert_eq!(item.content.as_bytes(), b"<TEI>tei content 1</TEI>");
        assert_eq!(item.mime_type(), Some(mime::TEI_XML));
        assert_eq!(item.source_location(), "data/1/file.pdf");
        assert_eq!(counters.get("processed_Convert to TEI"), 1);
        assert_eq!(counters.get("ignored_Convert to TEI"), 0);
    }

    #[tokio::test]
    async fn failure_is_counted_and_item_passed_through() {
        let counters = Counters::new();
        let step = FunctionStep::new("step1", [mime::PDF], |_, _| {
            Err(StepError::Failed("doh1".into()))
        });

        let before = pdf_item();
        let out = dispatch(&step, before.clone(), &StepContext::new(), &counters).await;

        assert!(out.is_failed());
        assert_eq!(out.item(), &before);
        assert_eq!(counters.get("error_step1"), 1);
        assert_eq!(counters.get("processed_step1"), 0);
    }
}
