//! Generation backend trait and HTTP client.
//!
//! Both modes post `{prompt, max_tokens}`. The blocking mode applies the
//! configured request timeout; the streaming mode never does, since a
//! generation may legitimately run for minutes. Streaming callers stop the
//! request by dropping the returned stream.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use relay_core::IncrementalEvent;
use relay_core::text::truncate_str;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::decoder::decode_event_stream;
use crate::errors::UpstreamError;

/// Boxed stream of decoded events returned by [`Generator::stream`].
pub type IncrementalEventStream =
    Pin<Box<dyn Stream<Item = Result<IncrementalEvent, UpstreamError>> + Send>>;

/// Shared handle to a generator.
pub type GeneratorHandle = Arc<dyn Generator>;

/// Generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a full answer in one call.
    ///
    /// `Ok(None)` means the backend answered successfully without an answer.
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Option<String>, UpstreamError>;

    /// Open a streaming generation.
    ///
    /// Fails before yielding anything if the backend is unreachable or
    /// rejects the request. Dropping the stream cancels the request.
    async fn stream(&self, prompt: &str, max_tokens: u32)
    -> Result<IncrementalEventStream, UpstreamError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    answer: Option<String>,
}

/// [`Generator`] backed by two HTTP endpoints.
#[derive(Clone, Debug)]
pub struct HttpGenerator {
    client: reqwest::Client,
    generate_url: String,
    stream_url: String,
    request_timeout: Duration,
}

impl HttpGenerator {
    /// Generator using a shared client.
    ///
    /// The client must not carry a global request timeout or long
    /// streams will be cut off; `request_timeout` is applied per blocking
    /// request instead.
    pub fn new(
        client: reqwest::Client,
        generate_url: impl Into<String>,
        stream_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            generate_url: generate_url.into(),
            stream_url: stream_url.into(),
            request_timeout,
        }
    }
}

async fn status_error(response: reqwest::Response, endpoint: &str) -> UpstreamError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    error!(status, endpoint, "generation backend error");
    UpstreamError::Status {
        status,
        message: truncate_str(&body, 200).to_string(),
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Option<String>, UpstreamError> {
        debug!(url = %self.generate_url, prompt_len = prompt.len(), max_tokens, "blocking generation");
        let response = self
            .client
            .post(&self.generate_url)
            .timeout(self.request_timeout)
            .json(&GenerateRequest { prompt, max_tokens })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response, "generate").await);
        }

        let bytes = response.bytes().await?;
        let body: GenerateResponse = serde_json::from_slice(&bytes)?;
        Ok(body.answer.filter(|a| !a.is_empty()))
    }

    async fn stream(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<IncrementalEventStream, UpstreamError> {
        debug!(url = %self.stream_url, prompt_len = prompt.len(), max_tokens, "opening generation stream");
        let response = self
            .client
            .post(&self.stream_url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&GenerateRequest { prompt, max_tokens })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response, "stream").await);
        }

        Ok(Box::pin(decode_event_stream(response.bytes_stream())))
    }
}
