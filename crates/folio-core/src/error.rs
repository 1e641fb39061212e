use thiserror::Error;

/// Top-level error type for the Folio system.
///
/// Subsystem crates define their own error types and implement
/// `From<FolioError>` so that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FolioError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Language model error: {0}")]
    Llm(String),

    #[error("Graph query error: {0}")]
    Graph(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for FolioError {
    fn from(err: toml::de::Error) -> Self {
        FolioError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for FolioError {
    fn from(err: toml::ser::Error) -> Self {
        FolioError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for FolioError {
    fn from(err: serde_json::Error) -> Self {
        FolioError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Folio operations.
pub type Result<T> = std::result::Result<T, FolioError>;
