//! # Incremental-Event Decoder
//!
//! Decodes a Server-Sent Events byte stream from the generation backend into
//! [`IncrementalEvent`]s.
//!
//! Framing:
//! - Lines end with `\n` or `\r\n`; a blank line ends a frame
//! - `data:` lines accumulate (joined with `\n`) into the frame payload
//! - Comment lines (`:`) and other fields (`event:`, `id:`, `retry:`) are ignored
//! - A trailing frame without its blank line is flushed at end of stream
//!
//! Each payload is expected to be `{"type":"chunk","text"}`,
//! `{"type":"done","text"}` or `{"type":"error","error"}`. Anything else is
//! passed on verbatim as a [`IncrementalEvent::Chunk`] after logging a
//! [`DecodeWarning`]; one bad frame never affects the frames after it.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use relay_core::IncrementalEvent;
use relay_core::text::truncate_str;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::errors::{DecodeWarning, UpstreamError};

/// Message used when an error frame carries no text.
pub const DEFAULT_ERROR_MESSAGE: &str = "generation backend reported an error";

const PREVIEW_BYTES: usize = 120;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WirePayload {
    Chunk {
        text: String,
    },
    Done {
        #[serde(default)]
        text: String,
    },
    Error {
        #[serde(default)]
        error: Option<String>,
    },
}

/// Incremental SSE frame decoder.
///
/// Holds the unterminated tail of the input between calls, so frames may be
/// split across [`feed`](Self::feed) calls at any byte offset.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    data_lines: Vec<String>,
}

impl FrameDecoder {
    /// Empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk of input and return every event it completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<IncrementalEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush whatever is left at end of input.
    pub fn finish(&mut self) -> Vec<IncrementalEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let mut line = self.buffer.split();
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        if let Some(event) = self.dispatch() {
            events.push(event);
        }
        events
    }

    /// Bytes buffered waiting for a line terminator.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<IncrementalEvent> {
        if raw.is_empty() {
            return self.dispatch();
        }
        let line = if let Ok(s) = std::str::from_utf8(raw) {
            Cow::Borrowed(s)
        } else {
            report(&DecodeWarning::InvalidUtf8);
            String::from_utf8_lossy(raw)
        };
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (&*line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        } else {
            debug!(field, "ignoring sse field");
        }
        None
    }

    fn dispatch(&mut self) -> Option<IncrementalEvent> {
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        if payload.is_empty() {
            return None;
        }
        Some(decode_payload(&payload))
    }
}

/// Decode one frame payload.
pub fn decode_payload(payload: &str) -> IncrementalEvent {
    match serde_json::from_str::<WirePayload>(payload) {
        Ok(WirePayload::Chunk { text }) => IncrementalEvent::Chunk(text),
        Ok(WirePayload::Done { text }) => IncrementalEvent::Done(text),
        Ok(WirePayload::Error { error }) => IncrementalEvent::Error(
            error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
        ),
        Err(e) => {
            report(&DecodeWarning::MalformedPayload {
                preview: truncate_str(payload, PREVIEW_BYTES).to_string(),
                reason: e.to_string(),
            });
            IncrementalEvent::Chunk(payload.to_string())
        }
    }
}

fn report(warning: &DecodeWarning) {
    warn!(warning = %warning, "degrading sse frame");
    metrics::counter!("relay_decode_warnings_total").increment(1);
}

struct DecodeState<S> {
    stream: Pin<Box<S>>,
    decoder: FrameDecoder,
    pending: VecDeque<IncrementalEvent>,
    exhausted: bool,
    terminated: bool,
}

/// Turn a response byte stream into a lazy stream of events.
///
/// The output ends right after the first `Done` or `Error` event, after a
/// transport error (yielded as [`UpstreamError::Read`]), or when the input
/// ends. Ending without a terminal event is not reported here; the consumer
/// decides what an incomplete stream means.
pub fn decode_event_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<IncrementalEvent, UpstreamError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = DecodeState {
        stream: Box::pin(byte_stream),
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
        terminated: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if st.terminated {
                return None;
            }
            if let Some(event) = st.pending.pop_front() {
                if event.is_terminal() {
                    st.terminated = true;
                    st.pending.clear();
                }
                return Some((Ok(event), st));
            }
            if st.exhausted {
                return None;
            }
            match st.stream.next().await {
                Some(Ok(chunk)) => st.pending.extend(st.decoder.feed(&chunk)),
                Some(Err(e)) => {
                    warn!(error = %e, "generation stream read error");
                    st.exhausted = true;
                    st.terminated = true;
                    return Some((
                        Err(UpstreamError::Read {
                            message: e.to_string(),
                        }),
                        st,
                    ));
                }
                None => {
                    st.exhausted = true;
                    let rest = st.decoder.finish();
                    st.pending.extend(rest);
                }
            }
        }
    })
}
