//! Retriever trait and HTTP implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::ContextSnippet;
use relay_core::text::truncate_str;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::RetrievalError;

/// Shared handle to a retriever.
pub type RetrieverHandle = Arc<dyn ContextRetriever>;

/// Fetches supporting snippets for a query.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Snippets in the backend's order; `top_k` is a request, not a cap.
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ContextSnippet>, RetrievalError>;
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    query: &'a str,
    top_k: usize,
}

// The search service answers with a bare array; a `{"results": [...]}`
// wrapper is accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum RetrieveResponse {
    List(Vec<ContextSnippet>),
    Wrapped { results: Vec<ContextSnippet> },
}

impl RetrieveResponse {
    fn into_snippets(self) -> Vec<ContextSnippet> {
        match self {
            Self::List(snippets) | Self::Wrapped { results: snippets } => snippets,
        }
    }
}

/// [`ContextRetriever`] that posts to a search service.
#[derive(Clone, Debug)]
pub struct HttpRetriever {
    client: reqwest::Client,
    url: String,
    timeout: Option<Duration>,
}

impl HttpRetriever {
    /// Retriever posting to `url` with a shared HTTP client.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            timeout: None,
        }
    }

    /// Bound each request to `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Endpoint this retriever posts to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ContextRetriever for HttpRetriever {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ContextSnippet>, RetrievalError> {
        debug!(url = %self.url, top_k, "retrieving context");
        let mut request = self.client.post(&self.url).json(&RetrieveRequest { query, top_k });
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "retrieval backend error");
            return Err(RetrievalError::Status {
                status: status.as_u16(),
                message: truncate_str(&body, 200).to_string(),
            });
        }

        let bytes = response.bytes().await?;
        let snippets = serde_json::from_slice::<RetrieveResponse>(&bytes)?.into_snippets();
        if snippets.len() > top_k {
            debug!(returned = snippets.len(), top_k, "retrieval returned more than requested");
        }
        Ok(snippets)
    }
}
