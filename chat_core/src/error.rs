use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Rejected before any upstream call.
    #[error("invalid request: {0}")]
    Input(String),

    #[error("failed to extract document text: {0}")]
    Extraction(String),

    #[error("model request failed: {0}")]
    Upstream(String),

    #[error("model did not finish within {0} seconds")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl ChatError {
    /// Short machine-readable name used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Input(_) => "invalid_request",
            ChatError::Extraction(_) => "extraction_failed",
            ChatError::Upstream(_) => "upstream_error",
            ChatError::Timeout(_) => "timeout",
            ChatError::Transport(_) => "transport_error",
            ChatError::Config(_) => "configuration_error",
            ChatError::NotFound(_) => "not_found",
        }
    }

    /// Whether re-issuing the same request from scratch could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::Upstream(_) | ChatError::Timeout(_) | ChatError::Transport(_)
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Upstream(err.without_url().to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
