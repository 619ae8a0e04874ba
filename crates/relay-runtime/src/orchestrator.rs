//! # Turn Orchestrator
//!
//! Drives one user turn through the pipeline:
//!
//! 1. append the `user` entry (before anything can fail)
//! 2. retrieve context snippets
//! 3. build the prompt
//! 4. generate, either blocking or streaming
//! 5. append the `assistant` entry, only for a complete answer
//!
//! Streaming turns forward every chunk to the [`TurnEventSink`] in arrival
//! order and always end with exactly one `bot_done` or `bot_error`. Turns on
//! the same session are serialized. Nothing is retried.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use metrics::{counter, histogram};
use relay_core::prompt::build_prompt;
use relay_core::{ChannelEvent, ContextSnippet, IncrementalEvent, SessionId, TurnEntry};
use relay_llm::{GeneratorHandle, IncrementalEventStream, UpstreamError};
use relay_retrieval::RetrieverHandle;
use relay_store::SessionStoreHandle;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::TurnError;
use crate::locks::SessionLocks;
use crate::phase::{PhaseTracker, TurnMode, TurnPhase};
use crate::sink::TurnEventSink;

/// Answer recorded when a blocking generation succeeds without an answer.
pub const NO_RESPONSE: &str = "No response";

/// Per-turn parameters.
#[derive(Clone, Copy, Debug)]
pub struct TurnConfig {
    /// Snippets requested from the retriever.
    pub top_k: usize,
    /// Generation limit passed to the backend.
    pub max_tokens: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_tokens: 512,
        }
    }
}

/// Result of a blocking turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnReply {
    /// Final answer (persisted).
    pub answer: String,
    /// Snippets the answer was generated from (not persisted).
    pub contexts: Vec<ContextSnippet>,
}

/// Result of a completed streaming turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamedTurn {
    /// Final answer from the done event.
    pub answer: String,
    /// Chunk events forwarded before completion.
    pub chunks: usize,
}

/// Coordinates retrieval, generation, delivery, and persistence.
pub struct TurnOrchestrator {
    store: SessionStoreHandle,
    retriever: RetrieverHandle,
    generator: GeneratorHandle,
    sink: Arc<dyn TurnEventSink>,
    config: TurnConfig,
    locks: SessionLocks,
}

impl TurnOrchestrator {
    /// Wire an orchestrator to its collaborators.
    pub fn new(
        store: SessionStoreHandle,
        retriever: RetrieverHandle,
        generator: GeneratorHandle,
        sink: Arc<dyn TurnEventSink>,
        config: TurnConfig,
    ) -> Self {
        Self {
            store,
            retriever,
            generator,
            sink,
            config,
            locks: SessionLocks::new(),
        }
    }

    /// The session store turns are persisted to.
    pub fn store(&self) -> &SessionStoreHandle {
        &self.store
    }

    /// Active per-session locks.
    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Run a turn and return the whole answer with its snippets.
    ///
    /// Nothing is emitted to the sink; errors go back to the caller.
    #[instrument(skip_all, fields(session_id = %session_id, mode = "blocking"))]
    pub async fn run_blocking_turn(
        &self,
        session_id: &SessionId,
        message: &str,
    ) -> Result<TurnReply, TurnError> {
        let mode = TurnMode::Blocking;
        counter!("relay_turns_total", "mode" => mode.as_str()).increment(1);
        let mut tracker = PhaseTracker::new();

        let result = async {
            validate_message(message)?;
            let _turn = self.locks.acquire(session_id).await;
            let contexts = self.receive_and_retrieve(session_id, message, &mut tracker).await?;

            tracker.advance(TurnPhase::Prompting);
            let prompt = build_prompt(message, &contexts);

            tracker.advance(TurnPhase::Generating);
            tracker.advance(TurnPhase::Awaiting);
            let answer = self
                .generator
                .generate(&prompt, self.config.max_tokens)
                .await?
                .unwrap_or_else(|| NO_RESPONSE.to_string());

            tracker.advance(TurnPhase::Finalizing);
            self.store
                .append(session_id, &TurnEntry::assistant(answer.clone()))
                .await?;
            Ok::<_, TurnError>(TurnReply { answer, contexts })
        }
        .await;

        finish(mode, &mut tracker, result)
    }

    /// Run a turn whose output is pushed to the sink.
    ///
    /// Emits `bot_chunk` per chunk, then exactly one `bot_done` or
    /// `bot_error`. Cancelling `cancel` aborts the upstream request; once
    /// the done event has arrived the turn finishes regardless.
    #[instrument(skip_all, fields(session_id = %session_id, mode = "streaming"))]
    pub async fn run_streaming_turn(
        &self,
        session_id: &SessionId,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<StreamedTurn, TurnError> {
        let mode = TurnMode::Streaming;
        counter!("relay_turns_total", "mode" => mode.as_str()).increment(1);
        let mut tracker = PhaseTracker::new();

        let result = async {
            validate_message(message)?;
            let _turn = or_cancel(cancel, self.locks.acquire(session_id))
                .await
                .ok_or(TurnError::Cancelled)?;
            let contexts = or_cancel(
                cancel,
                self.receive_and_retrieve(session_id, message, &mut tracker),
            )
            .await
            .ok_or(TurnError::Cancelled)??;

            tracker.advance(TurnPhase::Prompting);
            let prompt = build_prompt(message, &contexts);

            tracker.advance(TurnPhase::Generating);
            let stream = or_cancel(cancel, self.generator.stream(&prompt, self.config.max_tokens))
                .await
                .ok_or(TurnError::Cancelled)??;

            tracker.advance(TurnPhase::Streaming);
            self.forward_stream(session_id, stream, cancel, &mut tracker)
                .await
        }
        .await;

        if let Err(e) = &result {
            // The done event already went out if finalizing failed.
            if !matches!(e, TurnError::Store(_)) || tracker.phase() != TurnPhase::Finalizing {
                let _ = self
                    .sink
                    .emit(
                        session_id,
                        ChannelEvent::BotError {
                            error: e.client_message(),
                        },
                    )
                    .await;
            }
        }

        finish(mode, &mut tracker, result)
    }

    async fn receive_and_retrieve(
        &self,
        session_id: &SessionId,
        message: &str,
        tracker: &mut PhaseTracker,
    ) -> Result<Vec<ContextSnippet>, TurnError> {
        self.store
            .append(session_id, &TurnEntry::user(message))
            .await?;

        tracker.advance(TurnPhase::Retrieving);
        let contexts = self.retriever.retrieve(message, self.config.top_k).await?;
        debug!(snippets = contexts.len(), "context retrieved");
        Ok(contexts)
    }

    async fn forward_stream(
        &self,
        session_id: &SessionId,
        mut stream: IncrementalEventStream,
        cancel: &CancellationToken,
        tracker: &mut PhaseTracker,
    ) -> Result<StreamedTurn, TurnError> {
        let mut chunks = 0usize;
        loop {
            // biased: a pending cancel wins over a ready event
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(chunks, "turn cancelled mid-stream");
                    return Err(TurnError::Cancelled);
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(IncrementalEvent::Chunk(chunk))) => {
                    chunks += 1;
                    let _ = self
                        .sink
                        .emit(session_id, ChannelEvent::BotChunk { chunk })
                        .await;
                }
                Some(Ok(IncrementalEvent::Done(answer))) => {
                    drop(stream);
                    tracker.advance(TurnPhase::Finalizing);
                    let entry = TurnEntry::assistant(answer.clone());
                    let (stored, _) = tokio::join!(
                        self.store.append(session_id, &entry),
                        self.sink.emit(
                            session_id,
                            ChannelEvent::BotDone {
                                answer: answer.clone(),
                            }
                        ),
                    );
                    stored?;
                    return Ok(StreamedTurn { answer, chunks });
                }
                Some(Ok(IncrementalEvent::Error(message))) => {
                    return Err(UpstreamError::Generation { message }.into());
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(UpstreamError::IncompleteStream.into()),
            }
        }
    }
}

fn validate_message(message: &str) -> Result<(), TurnError> {
    if message.trim().is_empty() {
        return Err(TurnError::InvalidInput("message must not be empty".into()));
    }
    Ok(())
}

async fn or_cancel<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

fn finish<T>(
    mode: TurnMode,
    tracker: &mut PhaseTracker,
    result: Result<T, TurnError>,
) -> Result<T, TurnError> {
    match &result {
        Ok(_) => {
            tracker.advance(TurnPhase::Completed);
            info!(elapsed_secs = tracker.elapsed_secs(), "turn completed");
        }
        Err(e) => {
            let failed_in = tracker.phase();
            tracker.advance(TurnPhase::Failed);
            counter!("relay_turn_failures_total", "mode" => mode.as_str(), "stage" => e.stage())
                .increment(1);
            match e {
                TurnError::Cancelled | TurnError::InvalidInput(_) => {
                    warn!(phase = %failed_in, error = %e, "turn aborted");
                }
                _ => error!(phase = %failed_in, error = %e, "turn failed"),
            }
        }
    }
    histogram!("relay_turn_duration_seconds", "mode" => mode.as_str())
        .record(tracker.elapsed_secs());
    result
}
