//! Deterministic capability for demos and tests. No network, no randomness.

use std::time::Duration;

use async_trait::async_trait;
use gaggle_core::MergeStrategy;

use crate::capability::IdeaCapability;
use crate::error::CapabilityError;
use crate::prompt::{labelled_value, IDEA_LABEL, PARENT_LABEL};

const BASE_IDEAS: [&str; 10] = [
    "Implement user authentication system",
    "Add real-time collaboration features",
    "Create mobile-responsive design",
    "Integrate third-party analytics",
    "Build automated testing pipeline",
    "Optimize database queries for performance",
    "Add dark mode support",
    "Implement caching strategy",
    "Create API documentation",
    "Add internationalization support",
];

/// Canned provider.
///
/// Extraction prompts get the ten base ideas (or numbered sub-ideas of the
/// parent when the prompt carries one); expansion prompts get a short
/// elaboration of the idea; merges get strategy-specific text.
#[derive(Debug, Clone, Default)]
pub struct MockCapability {
    latency: Option<Duration>,
}

impl MockCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before every answer.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
        }
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl IdeaCapability for MockCapability {
    async fn generate(&self, prompt: &str, count: usize) -> Result<Vec<String>, CapabilityError> {
        self.delay().await;

        if let Some(idea) = labelled_value(prompt, IDEA_LABEL) {
            return Ok(vec![format!(
                "{idea}. Start with a small prototype and review the results with the team."
            )]);
        }

        let ideas = match labelled_value(prompt, PARENT_LABEL) {
            Some(parent) => {
                let head: String = parent.chars().take(50).collect();
                (1..=count)
                    .map(|i| format!("Sub-idea {i} for: {head}..."))
                    .collect()
            }
            None => BASE_IDEAS
                .iter()
                .take(count)
                .map(|s| s.to_string())
                .collect(),
        };
        Ok(ideas)
    }

    async fn merge(
        &self,
        sources: &[String],
        strategy: MergeStrategy,
        instruction: Option<&str>,
    ) -> Result<String, CapabilityError> {
        self.delay().await;

        let n = sources.len();
        if let Some(instruction) = instruction.filter(|s| !s.trim().is_empty()) {
            return Ok(format!(
                "Merged based on \"{}\": Combined concepts from {n} ideas",
                instruction.trim()
            ));
        }
        Ok(match strategy {
            MergeStrategy::Synthesize => {
                format!("Synthesis: A unified approach combining the best aspects of all {n} ideas")
            }
            MergeStrategy::Combine => {
                format!("Combination: All {n} ideas working together in parallel")
            }
            MergeStrategy::Abstract => {
                format!("Abstraction: High-level concept derived from the {n} core ideas")
            }
            MergeStrategy::Contrast => {
                format!("Contrast: Exploring the differences and tensions between the {n} ideas")
            }
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt;

    #[tokio::test]
    async fn test_extraction_without_parent() {
        let mock = MockCapability::new();
        let ideas = mock.generate(&prompt::extraction("app", 3, None, None), 3).await.unwrap();
        assert_eq!(ideas.len(), 3);
        assert_eq!(ideas[0], "Implement user authentication system");

        let capped = mock.generate(&prompt::extraction("app", 12, None, None), 12).await.unwrap();
        assert_eq!(capped.len(), 10);
    }

    #[tokio::test]
    async fn test_extraction_with_parent() {
        let mock = MockCapability::new();
        let parent = "x".repeat(80);
        let ideas = mock
            .generate(&prompt::extraction("more", 2, Some(&parent), None), 2)
            .await
            .unwrap();
        assert_eq!(ideas[1], format!("Sub-idea 2 for: {}...", "x".repeat(50)));
    }

    #[tokio::test]
    async fn test_expansion_echoes_idea() {
        let mock = MockCapability::new();
        let out = mock
            .generate(&prompt::expansion("Add dark mode", "ui", None, None), 1)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("Add dark mode."));
    }

    #[tokio::test]
    async fn test_merge_text_per_strategy() {
        let mock = MockCapability::new();
        let sources = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let text = mock.merge(&sources, MergeStrategy::Contrast, None).await.unwrap();
        assert!(text.starts_with("Contrast:"));
        assert!(text.contains("3 ideas"));

        let text = mock
            .merge(&sources, MergeStrategy::Abstract, Some("keep it short"))
            .await
            .unwrap();
        assert_eq!(text, "Merged based on \"keep it short\": Combined concepts from 3 ideas");
    }
}
