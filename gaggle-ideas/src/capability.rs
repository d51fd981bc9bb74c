//! The seam to whatever produces text: an LLM provider, a scripted double,
//! or [`MockCapability`](crate::MockCapability).

use async_trait::async_trait;
use gaggle_core::MergeStrategy;

use crate::error::CapabilityError;

/// Async text-generation backend consumed by the pipeline and the merge
/// synthesizer. Calls may fail or hang; callers own retry and timeout.
#[async_trait]
pub trait IdeaCapability: Send + Sync {
    /// Produce up to `count` pieces of text for `prompt`.
    ///
    /// A backend may return one blob holding every item (the caller parses
    /// it) or one string per item.
    async fn generate(&self, prompt: &str, count: usize) -> Result<Vec<String>, CapabilityError>;

    /// Combine `sources` into one text under `strategy`.
    async fn merge(
        &self,
        sources: &[String],
        strategy: MergeStrategy,
        instruction: Option<&str>,
    ) -> Result<String, CapabilityError>;

    fn name(&self) -> &str;
}
