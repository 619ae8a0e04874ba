//! Retrieval error type.

/// Failure talking to the retrieval backend. Always fatal to a turn.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// Request could not be sent or the connection failed.
    #[error("retrieval request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("retrieval backend returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// Response body was not a snippet list.
    #[error("retrieval response was not valid: {0}")]
    Json(#[from] serde_json::Error),
}

impl RetrievalError {
    /// Short label for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Http(_) => "network",
            Self::Status { .. } => "status",
            Self::Json(_) => "parse",
        }
    }
}
