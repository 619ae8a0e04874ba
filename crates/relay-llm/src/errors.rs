//! Generation errors and decode warnings.

/// Failure of the generation backend. Always fatal to a turn.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Request could not be sent, or the connection failed before a response.
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("generation backend returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// Blocking response body was not the expected JSON object.
    #[error("generation response was not valid: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport failed while the stream was being read.
    #[error("generation stream read failed: {message}")]
    Read {
        /// Transport error text.
        message: String,
    },

    /// The backend reported a failure in-band.
    #[error("{message}")]
    Generation {
        /// Backend-supplied message.
        message: String,
    },

    /// The stream closed before a done or error frame arrived.
    #[error("generation stream ended before completion")]
    IncompleteStream,

    /// The turn was cancelled before the stream finished.
    #[error("generation cancelled")]
    Cancelled,
}

impl UpstreamError {
    /// Short label for metrics and logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Http(_) => "network",
            Self::Status { .. } => "status",
            Self::Json(_) => "parse",
            Self::Read { .. } => "read",
            Self::Generation { .. } => "backend",
            Self::IncompleteStream => "incomplete",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A frame that could not be decoded as a structured event.
///
/// Never fatal: the decoder logs it and passes the raw text on as a chunk.
#[derive(Debug, thiserror::Error)]
pub enum DecodeWarning {
    /// Payload is not one of the three tagged event forms.
    #[error("unrecognized frame payload ({reason}): {preview}")]
    MalformedPayload {
        /// Leading bytes of the payload.
        preview: String,
        /// Why it did not parse.
        reason: String,
    },

    /// A line was not valid UTF-8 and was decoded lossily.
    #[error("frame line contained invalid UTF-8")]
    InvalidUtf8,
}
