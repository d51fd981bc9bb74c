//! Generation pipeline against a scripted capability: partial failure,
//! total failure, timeouts and malformed extraction output.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gaggle_core::MergeStrategy;
use gaggle_ideas::prompt::{labelled_value, DOMAIN_LABEL, IDEA_LABEL, STYLE_LABEL};
use gaggle_ideas::{
    CapabilityError, GenerationConstraints, GenerationPipeline, GenerationRequest,
    GenerationStyle, IdeaCapability, PipelineConfig, PipelineError, DEGRADED_PREFIX,
};

/// Answers extraction with a fixed response and expansion per stub.
#[derive(Default)]
struct Scripted {
    extraction: Vec<String>,
    extraction_failures: AtomicUsize,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    expansion_calls: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    fn extracting(items: &[&str]) -> Self {
        Self {
            extraction: items.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    fn failing(mut self, stubs: &[&str]) -> Self {
        self.failing.extend(stubs.iter().map(|s| s.to_string()));
        self
    }

    fn hanging(mut self, stubs: &[&str]) -> Self {
        self.hanging.extend(stubs.iter().map(|s| s.to_string()));
        self
    }

    fn calls_for(&self, stub: &str) -> usize {
        self.expansion_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.as_str() == stub)
            .count()
    }
}

#[async_trait]
impl IdeaCapability for Scripted {
    async fn generate(&self, prompt: &str, _count: usize) -> Result<Vec<String>, CapabilityError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let Some(stub) = labelled_value(prompt, IDEA_LABEL).map(str::to_string) else {
            let remaining = self.extraction_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.extraction_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(CapabilityError::Failed("extraction unavailable".into()));
            }
            return Ok(self.extraction.clone());
        };

        self.expansion_calls.lock().unwrap().push(stub.clone());
        if self.hanging.contains(&stub) {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        if self.failing.contains(&stub) {
            return Err(CapabilityError::Failed(format!("model refused {stub}")));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(vec![format!("Full text of {stub}")])
    }

    async fn merge(
        &self,
        _sources: &[String],
        _strategy: MergeStrategy,
        _instruction: Option<&str>,
    ) -> Result<String, CapabilityError> {
        Err(CapabilityError::Failed("not scripted".into()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        max_retries: 3,
        retry_delay: Duration::from_millis(1),
        task_timeout: Duration::from_millis(200),
        extraction_retries: 3,
    }
}

fn pipeline(capability: Arc<Scripted>) -> GenerationPipeline {
    GenerationPipeline::with_config(capability, fast_config())
}

#[tokio::test]
async fn test_partial_failure_keeps_every_node() {
    let cap = Arc::new(
        Scripted::extracting(&["a", "b", "c", "d", "e"]).failing(&["b", "d"]),
    );
    let batch = pipeline(cap.clone())
        .run(&GenerationRequest::new("five things", 5))
        .await
        .unwrap();

    assert_eq!(batch.ideas.len(), 5);
    assert_eq!(batch.failures.len(), 2);
    assert_eq!(batch.succeeded(), 3);

    let degraded: Vec<_> = batch.ideas.iter().filter(|n| n.metadata.degraded).collect();
    assert_eq!(degraded.len(), 2);
    for node in degraded {
        assert!(node.content.starts_with(DEGRADED_PREFIX));
        assert!(node.content.contains("model refused"));
    }
    assert_eq!(batch.ideas[0].content, "Full text of a");

    // Each failing task spent its own retry budget.
    assert_eq!(cap.calls_for("b"), 3);
    assert_eq!(cap.calls_for("a"), 1);
}

#[tokio::test]
async fn test_all_tasks_failing_is_a_hard_error() {
    let cap = Arc::new(Scripted::extracting(&["a", "b"]).failing(&["a", "b"]));
    let err = pipeline(cap)
        .run(&GenerationRequest::new("doomed", 2))
        .await
        .unwrap_err();

    match err {
        PipelineError::AllTasksFailed {
            attempted,
            first_error,
        } => {
            assert_eq!(attempted, 2);
            assert_eq!(first_error, CapabilityError::Failed("model refused a".into()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_is_a_task_failure() {
    let cap = Arc::new(Scripted::extracting(&["slow", "quick"]).hanging(&["slow"]));
    let config = PipelineConfig {
        max_retries: 1,
        task_timeout: Duration::from_millis(50),
        ..fast_config()
    };
    let batch = GenerationPipeline::with_config(cap, config)
        .run(&GenerationRequest::new("race", 2))
        .await
        .unwrap();

    assert_eq!(batch.failures.len(), 1);
    assert_eq!(batch.failures[0].stub, "slow");
    assert!(matches!(batch.failures[0].error, CapabilityError::Timeout(_)));
    assert_eq!(batch.ideas[1].content, "Full text of quick");
}

#[tokio::test]
async fn test_shortfall_from_malformed_blob() {
    let cap = Arc::new(Scripted::extracting(&[
        "```\nHere is what I have:\n1. First\n2. Second\n```",
    ]));
    let batch = pipeline(cap)
        .run(&GenerationRequest::new("three please", 3))
        .await
        .unwrap();

    assert_eq!(batch.ideas.len(), 2);
    assert_eq!(batch.shortfall, 1);
    assert_eq!(batch.ideas[0].metadata.stub.as_deref(), Some("First"));
}

#[tokio::test]
async fn test_extraction_is_retried() {
    let cap = Scripted::extracting(&["only"]);
    cap.extraction_failures.store(2, Ordering::SeqCst);
    let batch = pipeline(Arc::new(cap))
        .run(&GenerationRequest::new("persist", 1))
        .await
        .unwrap();
    assert_eq!(batch.ideas.len(), 1);
}

#[tokio::test]
async fn test_extraction_budget_exhausted() {
    let cap = Scripted::extracting(&["never"]);
    cap.extraction_failures.store(10, Ordering::SeqCst);
    let err = pipeline(Arc::new(cap))
        .run(&GenerationRequest::new("give up", 1))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PipelineError::Extraction(CapabilityError::Failed("extraction unavailable".into()))
    );
}

#[tokio::test]
async fn test_empty_extraction_yields_no_stubs() {
    let cap = Arc::new(Scripted::extracting(&["   "]));
    let err = pipeline(cap)
        .run(&GenerationRequest::new("nothing", 2))
        .await
        .unwrap_err();
    assert_eq!(err, PipelineError::NoStubs);
}

#[tokio::test]
async fn test_constraints_reach_every_call() {
    let cap = Arc::new(Scripted::extracting(&["Loyalty card", "Pop-up store"]));
    let constraints = GenerationConstraints::style(GenerationStyle::Detailed).with_domain("retail");
    let request = GenerationRequest::new("grow sales", 2).with_constraints(constraints);
    pipeline(cap.clone()).run(&request).await.unwrap();

    let prompts = cap.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 3);
    for prompt in &prompts {
        assert_eq!(labelled_value(prompt, STYLE_LABEL), Some("detailed"));
        assert_eq!(labelled_value(prompt, DOMAIN_LABEL), Some("retail"));
    }
}

#[tokio::test]
async fn test_empty_constraints_leave_prompts_plain() {
    let cap = Arc::new(Scripted::extracting(&["Loyalty card"]));
    let request =
        GenerationRequest::new("grow sales", 1).with_constraints(GenerationConstraints::default());
    pipeline(cap.clone()).run(&request).await.unwrap();

    let prompts = cap.prompts.lock().unwrap().clone();
    assert!(prompts.iter().all(|p| !p.contains(STYLE_LABEL) && !p.contains(DOMAIN_LABEL)));
}
