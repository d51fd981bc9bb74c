//! One merged text from 2-5 source texts.

use std::sync::Arc;
use std::time::Duration;

use gaggle_core::MergeStrategy;

use crate::capability::IdeaCapability;
use crate::error::{CapabilityError, MergeError};
use crate::extract::parse_merge_output;

pub const MIN_MERGE_SOURCES: usize = 2;
pub const MAX_MERGE_SOURCES: usize = 5;
pub const MAX_INSTRUCTION_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub timeout: Duration,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Validate the shape of a merge before any placeholder is created.
pub fn validate_merge(source_count: usize, instruction: Option<&str>) -> Result<(), MergeError> {
    if !(MIN_MERGE_SOURCES..=MAX_MERGE_SOURCES).contains(&source_count) {
        return Err(MergeError::InvalidRequest(format!(
            "merge needs between {MIN_MERGE_SOURCES} and {MAX_MERGE_SOURCES} ideas, got {source_count}"
        )));
    }
    if instruction.is_some_and(|s| s.chars().count() > MAX_INSTRUCTION_CHARS) {
        return Err(MergeError::InvalidRequest(format!(
            "merge instruction must be at most {MAX_INSTRUCTION_CHARS} characters"
        )));
    }
    Ok(())
}

pub struct MergeSynthesizer {
    capability: Arc<dyn IdeaCapability>,
    config: MergeConfig,
}

impl MergeSynthesizer {
    pub fn new(capability: Arc<dyn IdeaCapability>) -> Self {
        Self::with_config(capability, MergeConfig::default())
    }

    pub fn with_config(capability: Arc<dyn IdeaCapability>, config: MergeConfig) -> Self {
        Self { capability, config }
    }

    /// Invoke the capability once and return the cleaned merge text.
    pub async fn synthesize(
        &self,
        sources: &[String],
        strategy: MergeStrategy,
        instruction: Option<&str>,
    ) -> Result<String, MergeError> {
        validate_merge(sources.len(), instruction)?;
        let instruction = instruction.map(str::trim).filter(|s| !s.is_empty());

        log::info!(
            "Merging {} ideas with {} ({strategy})",
            sources.len(),
            self.capability.name()
        );
        let raw = tokio::time::timeout(
            self.config.timeout,
            self.capability.merge(sources, strategy, instruction),
        )
        .await
        .map_err(|_| CapabilityError::Timeout(self.config.timeout))??;

        let merged = parse_merge_output(&raw);
        if merged.is_empty() {
            return Err(MergeError::EmptyOutput);
        }
        Ok(merged)
    }
}
