//! Error types for the agent pipeline.
//!
//! Policy outcomes are values, not errors. These types cover validation
//! failures surfaced to clients and infrastructure failures.

use folio_core::error::FolioError;

/// Errors from agent operations exposed to callers.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent is disabled for this workspace")]
    Disabled,
    #[error("Feature disabled: {0}")]
    FeatureDisabled(&'static str),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid plan transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),
    #[error("Storage error: {0}")]
    Storage(#[from] FolioError),
}

/// Errors from the approval ledger.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Approval token is invalid, expired, or already used")]
    InvalidToken,
    #[error("Storage error: {0}")]
    Storage(#[from] FolioError),
}

/// Errors from language model calls.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Language model is not configured")]
    NotConfigured,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request failed: HTTP {status}: {body}")]
    RequestFailed { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors while generating or storing a horizon plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Plan generation failed: {0}")]
    Llm(#[from] LlmError),
    #[error("Stored plan is malformed: {0}")]
    Malformed(String),
    #[error("Storage error: {0}")]
    Storage(#[from] FolioError),
}

impl From<PlanError> for AgentError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::Storage(e) => AgentError::Storage(e),
            other => AgentError::Validation(other.to_string()),
        }
    }
}

/// Errors from recurring schedules.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },
    #[error("Storage error: {0}")]
    Storage(#[from] FolioError),
}
