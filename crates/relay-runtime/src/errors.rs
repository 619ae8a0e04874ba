//! Turn error type.

use relay_llm::UpstreamError;
use relay_retrieval::RetrievalError;
use relay_store::StoreError;

/// Why a turn did not complete.
///
/// None of these are retried: the client starts a new turn.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// Context retrieval failed.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// Generation failed, was rejected, or ended early.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The session store rejected a read or append.
    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    /// The turn was cancelled (client disconnect or shutdown).
    #[error("turn cancelled")]
    Cancelled,

    /// The request itself was unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TurnError {
    /// Text placed in the client-facing error event.
    pub fn client_message(&self) -> String {
        match self {
            Self::Upstream(UpstreamError::Generation { message }) => message.clone(),
            Self::Store(_) => "failed to save the conversation".to_string(),
            other => other.to_string(),
        }
    }

    /// Pipeline stage that failed, for metrics labels.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Retrieval(_) => "retrieval",
            Self::Upstream(_) => "generation",
            Self::Store(_) => "store",
            Self::Cancelled => "cancelled",
            Self::InvalidInput(_) => "input",
        }
    }
}
