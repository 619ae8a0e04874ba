//! # relay-runtime
//!
//! The Turn Orchestrator: takes one user message for a session and drives it
//! through retrieval, prompt construction, and generation, forwarding
//! incremental output to a [`TurnEventSink`] and appending the transcript to
//! the session store.
//!
//! - [`TurnOrchestrator`]: blocking and streaming turn entry points
//! - [`TurnPhase`]: the per-turn state machine
//! - [`SessionLocks`]: serializes turns on the same session
//! - [`TurnError`]: why a turn failed, and what the client is told

#![deny(unsafe_code)]

pub mod errors;
pub mod locks;
pub mod orchestrator;
pub mod phase;
pub mod sink;

pub use errors::TurnError;
pub use locks::{SessionLocks, SessionTurnGuard};
pub use orchestrator::{NO_RESPONSE, StreamedTurn, TurnConfig, TurnOrchestrator, TurnReply};
pub use phase::{TurnMode, TurnPhase};
pub use sink::{NullSink, TurnEventSink};
