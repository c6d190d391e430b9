use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The video container could not be opened or its frame rate is unusable.
    #[error("Video source unavailable: {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("Analysis request failed: {0}")]
    AnalysisRequestFailed(String),

    /// The service answered but the content was not valid JSON, even after fence stripping.
    #[error("Analysis response parse failed: {reason}")]
    AnalysisParseFailed { reason: String, raw: String },

    #[error("Result document unreadable: {path}: {reason}")]
    ImportParseFailed { path: PathBuf, reason: String },

    #[error("Unrecognized frame filename: {0}")]
    FilenameParseFailed(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn source_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::SourceUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
