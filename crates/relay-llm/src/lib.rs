//! # relay-llm
//!
//! Everything between a prompt and a stream of [`IncrementalEvent`]s:
//!
//! - [`Generator`]: the generation backend seam, blocking or streaming
//! - [`HttpGenerator`]: `reqwest` implementation of both modes
//! - [`decoder`]: turns a Server-Sent Events byte stream into
//!   [`IncrementalEvent`]s, tolerating frames split across reads
//!
//! [`IncrementalEvent`]: relay_core::IncrementalEvent

#![deny(unsafe_code)]

pub mod client;
pub mod decoder;
pub mod errors;

pub use client::{GeneratorHandle, Generator, HttpGenerator, IncrementalEventStream};
pub use decoder::{FrameDecoder, decode_event_stream};
pub use errors::{DecodeWarning, UpstreamError};
