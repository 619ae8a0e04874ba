//! Transcript and retrieval records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a transcript entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The generated answer.
    Assistant,
}

impl Role {
    /// Wire name (`"user"` / `"assistant"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable line of a session transcript.
///
/// Serialized as `{"role", "text", "ts"}` with `ts` in epoch milliseconds.
/// Consecutive entries usually alternate user/assistant, but a failed turn
/// leaves a lone user entry, so readers must not assume alternation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnEntry {
    /// Who wrote it.
    pub role: Role,
    /// Message text.
    pub text: String,
    /// Creation time.
    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl TurnEntry {
    /// Entry stamped with the current time.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            created_at: truncate_to_millis(Utc::now()),
        }
    }

    /// A `user` entry stamped now.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// An `assistant` entry stamped now.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

// Stored timestamps only carry milliseconds; truncating up front keeps
// in-memory and reloaded entries equal.
fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Provenance attached to a retrieved snippet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetMetadata {
    /// Source document identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Canonical URL of the source, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl SnippetMetadata {
    /// Best provenance label: URL, then source id. Empty strings are ignored.
    pub fn provenance(&self) -> Option<&str> {
        self.source_url
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.source.as_deref().filter(|s| !s.is_empty()))
    }
}

/// A retrieved passage of supporting text.
///
/// Lives for exactly one turn: it feeds the prompt and may be echoed back to
/// a blocking caller, but it is never written to the transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnippet {
    /// Passage text.
    pub text: String,
    /// Provenance.
    #[serde(default)]
    pub metadata: SnippetMetadata,
}

impl ContextSnippet {
    /// Snippet with a plain source id.
    pub fn new(text: impl Into<String>, source: Option<&str>) -> Self {
        Self {
            text: text.into(),
            metadata: SnippetMetadata {
                source: source.map(str::to_owned),
                source_url: None,
            },
        }
    }
}
