//! Prompt → N idea nodes.
//!
//! ```text
//!            ┌────────────┐   stubs    ┌──────────┐
//! request ──►│ extraction │──────────► │ expand 1 │──┐
//!            │ (1 call)   │  ─────────►│ expand 2 │──┤ join_all ──► GeneratedBatch
//!            └────────────┘  ─────────►│ expand n │──┘ (settle-all)
//!                                      └──────────┘
//! ```
//!
//! Every expansion task has its own retry budget and timeout. A failed task
//! yields a degraded node instead of failing the batch; the batch fails only
//! when no task succeeded.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use gaggle_core::{IdeaNode, NodeId, NodeKind, ParticipantId, SYSTEM_AUTHOR};

use crate::capability::IdeaCapability;
use crate::error::{CapabilityError, PipelineError};
use crate::extract::parse_stubs;
use crate::prompt;
use crate::retry::with_retry;

pub const MAX_PROMPT_CHARS: usize = 1000;
pub const MAX_IDEAS: usize = 10;

/// Prefix of the content written into a node whose expansion failed.
pub const DEGRADED_PREFIX: &str = "Failed to generate content: ";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Attempts per expansion task.
    pub max_retries: u32,
    /// Base backoff; attempt `n` waits `retry_delay * n`.
    pub retry_delay: Duration,
    /// Bound on each individual capability call.
    pub task_timeout: Duration,
    pub extraction_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            task_timeout: Duration::from_secs(30),
            extraction_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationStyle {
    Brief,
    Detailed,
    Creative,
}

impl GenerationStyle {
    pub const ALL: [GenerationStyle; 3] = [
        GenerationStyle::Brief,
        GenerationStyle::Detailed,
        GenerationStyle::Creative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStyle::Brief => "brief",
            GenerationStyle::Detailed => "detailed",
            GenerationStyle::Creative => "creative",
        }
    }
}

impl fmt::Display for GenerationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GenerationStyle::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown generation style: {s}"))
    }
}

/// Optional steering passed to every capability call of one generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationConstraints {
    pub style: Option<GenerationStyle>,
    /// Subject area such as "technical" or "marketing".
    pub domain: Option<String>,
}

impl GenerationConstraints {
    pub fn style(style: GenerationStyle) -> Self {
        Self {
            style: Some(style),
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Trimmed domain, `None` when blank.
    pub fn domain(&self) -> Option<&str> {
        self.domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.style.is_none() && self.domain().is_none()
    }
}

/// Existing node new ideas are generated under.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentContext {
    pub id: NodeId,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub count: usize,
    pub parent: Option<ParentContext>,
    /// Without a parent, hang the ideas under a new node holding the prompt.
    pub create_prompt_node: bool,
    pub constraints: Option<GenerationConstraints>,
    pub author: ParticipantId,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, count: usize) -> Self {
        Self {
            prompt: prompt.into(),
            count,
            parent: None,
            create_prompt_node: false,
            constraints: None,
            author: SYSTEM_AUTHOR.to_string(),
        }
    }

    pub fn with_parent(mut self, id: impl Into<NodeId>, content: impl Into<String>) -> Self {
        self.parent = Some(ParentContext {
            id: id.into(),
            content: content.into(),
        });
        self
    }

    pub fn with_prompt_node(mut self) -> Self {
        self.create_prompt_node = true;
        self
    }

    pub fn with_constraints(mut self, constraints: GenerationConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn by(mut self, author: impl Into<ParticipantId>) -> Self {
        self.author = author.into();
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let chars = self.prompt.trim().chars().count();
        if chars == 0 {
            return Err(PipelineError::InvalidRequest("prompt is required".into()));
        }
        if chars > MAX_PROMPT_CHARS {
            return Err(PipelineError::InvalidRequest(format!(
                "prompt must be at most {MAX_PROMPT_CHARS} characters"
            )));
        }
        if !(1..=MAX_IDEAS).contains(&self.count) {
            return Err(PipelineError::InvalidRequest(format!(
                "count must be between 1 and {MAX_IDEAS}"
            )));
        }
        Ok(())
    }

    fn parent_content(&self) -> Option<&str> {
        self.parent.as_ref().map(|p| p.content.as_str())
    }

    fn constraints(&self) -> Option<&GenerationConstraints> {
        self.constraints.as_ref().filter(|c| !c.is_empty())
    }
}

/// One expansion task that ended in a degraded node.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub node_id: NodeId,
    pub stub: String,
    pub error: CapabilityError,
}

#[derive(Debug, Clone)]
pub struct GeneratedBatch {
    pub prompt_node: Option<IdeaNode>,
    /// One node per recovered stub, degraded ones included, in stub order.
    pub ideas: Vec<IdeaNode>,
    pub requested: usize,
    /// Requested minus recovered stubs.
    pub shortfall: usize,
    pub failures: Vec<TaskFailure>,
}

impl GeneratedBatch {
    /// Prompt node first, then the ideas.
    pub fn into_nodes(self) -> Vec<IdeaNode> {
        self.prompt_node.into_iter().chain(self.ideas).collect()
    }

    pub fn succeeded(&self) -> usize {
        self.ideas.len() - self.failures.len()
    }
}

pub struct GenerationPipeline {
    capability: Arc<dyn IdeaCapability>,
    config: PipelineConfig,
}

impl GenerationPipeline {
    pub fn new(capability: Arc<dyn IdeaCapability>) -> Self {
        Self::with_config(capability, PipelineConfig::default())
    }

    pub fn with_config(capability: Arc<dyn IdeaCapability>, config: PipelineConfig) -> Self {
        Self { capability, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self, request: &GenerationRequest) -> Result<GeneratedBatch, PipelineError> {
        request.validate()?;
        log::info!(
            "Generating {} ideas with {} for prompt {:?}",
            request.count,
            self.capability.name(),
            request.prompt
        );

        let stubs = self.extract(request).await?;
        let shortfall = request.count.saturating_sub(stubs.len());
        if shortfall > 0 {
            log::warn!(
                "Extraction recovered {} of {} ideas, continuing with what we have",
                stubs.len(),
                request.count
            );
        }

        let outcomes = join_all(stubs.iter().map(|stub| self.expand(request, stub))).await;

        if outcomes.iter().all(Result::is_err) {
            let first_error = outcomes
                .into_iter()
                .find_map(Result::err)
                .unwrap_or(CapabilityError::EmptyResponse);
            log::error!("All {} expansion tasks failed: {first_error}", stubs.len());
            return Err(PipelineError::AllTasksFailed {
                attempted: stubs.len(),
                first_error,
            });
        }

        // Ideas point at the prompt node; the store builds its child list.
        let prompt_node = (request.parent.is_none() && request.create_prompt_node).then(|| {
            let mut node = IdeaNode::new(
                request.prompt.trim(),
                NodeKind::UserAuthored,
                request.author.clone(),
            );
            node.metadata.flags.is_prompt = true;
            node.metadata.generation_prompt = Some(request.prompt.clone());
            node
        });
        let parent_id = request
            .parent
            .as_ref()
            .map(|p| p.id.clone())
            .or_else(|| prompt_node.as_ref().map(|n| n.id.clone()));

        let mut ideas = Vec::with_capacity(stubs.len());
        let mut failures = Vec::new();
        for (stub, outcome) in stubs.into_iter().zip(outcomes) {
            let content = match &outcome {
                Ok(text) => text.clone(),
                Err(e) => format!("{DEGRADED_PREFIX}{e}"),
            };
            let mut node = IdeaNode::new(content, NodeKind::AiGenerated, request.author.clone())
                .with_parent(parent_id.clone());
            node.metadata.generation_prompt = Some(request.prompt.clone());
            node.metadata.stub = Some(stub.clone());
            if let Err(error) = outcome {
                node.metadata.degraded = true;
                failures.push(TaskFailure {
                    node_id: node.id.clone(),
                    stub,
                    error,
                });
            }
            ideas.push(node);
        }

        log::info!(
            "Generated {} ideas ({} degraded, shortfall {shortfall})",
            ideas.len(),
            failures.len()
        );
        Ok(GeneratedBatch {
            prompt_node,
            ideas,
            requested: request.count,
            shortfall,
            failures,
        })
    }

    async fn extract(&self, request: &GenerationRequest) -> Result<Vec<String>, PipelineError> {
        let text = prompt::extraction(
            &request.prompt,
            request.count,
            request.parent_content(),
            request.constraints(),
        );
        let text = text.as_str();
        let capability = &self.capability;
        let count = request.count;

        let result = with_retry(
            "extraction",
            self.config.extraction_retries,
            self.config.retry_delay,
            self.config.task_timeout,
            || async move {
                let items = capability.generate(text, count).await?;
                let stubs = match items.as_slice() {
                    [blob] => parse_stubs(blob, count),
                    _ => items
                        .iter()
                        .filter_map(|s| {
                            let s = s.trim();
                            (!s.is_empty()).then(|| s.to_string())
                        })
                        .take(count)
                        .collect(),
                };
                if stubs.is_empty() {
                    return Err(CapabilityError::EmptyResponse);
                }
                Ok(stubs)
            },
        )
        .await;

        match result {
            Ok(stubs) => Ok(stubs),
            Err(CapabilityError::EmptyResponse) => Err(PipelineError::NoStubs),
            Err(e) => Err(PipelineError::Extraction(e)),
        }
    }

    async fn expand(&self, request: &GenerationRequest, stub: &str) -> Result<String, CapabilityError> {
        let text = prompt::expansion(
            stub,
            &request.prompt,
            request.parent_content(),
            request.constraints(),
        );
        let text = text.as_str();
        let capability = &self.capability;
        let label = format!("expand {stub:?}");

        with_retry(
            &label,
            self.config.max_retries,
            self.config.retry_delay,
            self.config.task_timeout,
            || async move {
                let parts = capability.generate(text, 1).await?;
                let content = parts.join("\n\n").trim().to_string();
                if content.is_empty() {
                    return Err(CapabilityError::EmptyResponse);
                }
                Ok(content)
            },
        )
        .await
    }
}
