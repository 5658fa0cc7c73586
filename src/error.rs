use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("missing credential: {0}")]
    MissingToken(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid date format: {0}")]
    InvalidDate(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Slack API error: {0}")]
    SlackApi(String),

    #[error("Slack rate limit error: retry after {retry_after_secs}s")]
    SlackRateLimit { retry_after_secs: u64 },

    #[error("Slack authentication error: {0}")]
    SlackAuth(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Google Drive API error: {0}")]
    DriveApi(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to read file at {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write file at {path}: {source}")]
    WriteFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("JSON serialization error: {0}")]
    JsonSerialize(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("{0} conversation export(s) failed")]
    ExportFailed(usize),

    #[error("export cancelled")]
    Cancelled,
}

impl AppError {
    /// Whether this error should abort the whole run rather than just the
    /// conversation that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Io(_)
                | AppError::ReadFile { .. }
                | AppError::WriteFile { .. }
                | AppError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
