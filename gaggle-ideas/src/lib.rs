//! # gaggle-ideas — idea generation and merge synthesis
//!
//! Everything that talks to the text-generation capability lives here:
//!
//! - [`capability`] — the async [`IdeaCapability`] seam
//! - [`pipeline`] — extraction, parallel expansion, partial-failure fan-in
//! - [`merge`] — single-call merge synthesis with validation and timeout
//! - [`extract`] — defensive parsing of capability output
//! - [`prompt`] — prompt text
//! - [`mock`] — deterministic capability for demos and tests
//!
//! Nothing in this crate touches a node store; callers decide where the
//! produced nodes go.

pub mod capability;
pub mod error;
pub mod extract;
pub mod merge;
pub mod mock;
pub mod pipeline;
pub mod prompt;
mod retry;

pub use capability::IdeaCapability;
pub use error::{CapabilityError, MergeError, PipelineError};
pub use merge::{validate_merge, MergeConfig, MergeSynthesizer};
pub use mock::MockCapability;
pub use pipeline::{
    GeneratedBatch, GenerationConstraints, GenerationPipeline, GenerationRequest,
    GenerationStyle, ParentContext, PipelineConfig, TaskFailure, DEGRADED_PREFIX,
};
