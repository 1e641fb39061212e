use folio_core::error::FolioError;
use thiserror::Error;

/// Errors that can occur in the pattern engine.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("storage error: {0}")]
    Storage(#[from] FolioError),
    #[error("graph error: {0}")]
    Graph(String),
    #[error("evaluator {pattern} failed: {message}")]
    Evaluator { pattern: String, message: String },
    #[error("detection not found: {0}")]
    NotFound(String),
    #[error("invalid detection transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("scan queue is closed")]
    QueueClosed,
}
