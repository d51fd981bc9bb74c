use std::time::Duration;

use thiserror::Error;

/// Failure of a single call into an [`IdeaCapability`](crate::IdeaCapability).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("{0}")]
    Failed(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Empty response from capability")]
    EmptyResponse,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),
    #[error("Idea extraction failed: {0}")]
    Extraction(CapabilityError),
    #[error("Extraction produced no usable ideas")]
    NoStubs,
    #[error("All {attempted} generation tasks failed: {first_error}")]
    AllTasksFailed {
        attempted: usize,
        first_error: CapabilityError,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("Invalid merge request: {0}")]
    InvalidRequest(String),
    #[error("Merge failed: {0}")]
    Capability(#[from] CapabilityError),
    #[error("Merge produced no content")]
    EmptyOutput,
}
