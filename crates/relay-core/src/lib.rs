//! # relay-core
//!
//! Foundation types shared by every relay crate:
//!
//! - **Branded IDs**: [`SessionId`], [`ConnectionId`] as newtypes for type safety
//! - **Transcript**: [`Role`] and [`TurnEntry`], the immutable records a session log holds
//! - **Retrieval**: [`ContextSnippet`] with its [`SnippetMetadata`] provenance
//! - **Events**: [`IncrementalEvent`] (decoded generation output) and
//!   [`ChannelEvent`] (what a joined client sees)
//! - **Prompt builder**: [`prompt::build_prompt`]
//! - **Logging**: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod logging;
pub mod prompt;
pub mod text;
pub mod types;

pub use events::{ChannelEnvelope, ChannelEvent, IncrementalEvent};
pub use ids::{ConnectionId, SessionId};
pub use types::{ContextSnippet, Role, SnippetMetadata, TurnEntry};
