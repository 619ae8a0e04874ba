//! Per-turn state machine.
//!
//! ```text
//! Received → Retrieving → Prompting → Generating → {Streaming | Awaiting}
//!          → Finalizing → {Completed | Failed}
//! ```
//!
//! Any non-terminal phase may fail.

use std::fmt;
use std::time::Instant;

use tracing::{debug, warn};

/// How the caller receives the turn's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnMode {
    /// Single answer returned to the caller.
    Blocking,
    /// Incremental events pushed to joined clients.
    Streaming,
}

impl TurnMode {
    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::Streaming => "streaming",
        }
    }
}

/// Where a turn is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    /// User entry is being appended.
    Received,
    /// Waiting on the context retriever.
    Retrieving,
    /// Building the prompt.
    Prompting,
    /// Opening the generation request.
    Generating,
    /// Forwarding streamed events.
    Streaming,
    /// Waiting for a blocking answer.
    Awaiting,
    /// Persisting the assistant entry.
    Finalizing,
    /// Answer delivered and persisted.
    Completed,
    /// Turn ended without an answer.
    Failed,
}

impl TurnPhase {
    /// Whether the turn is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal successor.
    pub fn can_advance_to(self, next: Self) -> bool {
        use TurnPhase::{
            Awaiting, Completed, Failed, Finalizing, Generating, Prompting, Received, Retrieving,
            Streaming,
        };
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Received, Retrieving)
                | (Retrieving, Prompting)
                | (Prompting, Generating)
                | (Generating, Streaming | Awaiting)
                | (Streaming | Awaiting, Finalizing)
                | (Finalizing, Completed)
        )
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Retrieving => "retrieving",
            Self::Prompting => "prompting",
            Self::Generating => "generating",
            Self::Streaming => "streaming",
            Self::Awaiting => "awaiting",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one turn's phase and start time.
#[derive(Debug)]
pub(crate) struct PhaseTracker {
    phase: TurnPhase,
    started: Instant,
}

impl PhaseTracker {
    pub(crate) fn new() -> Self {
        Self {
            phase: TurnPhase::Received,
            started: Instant::now(),
        }
    }

    pub(crate) fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub(crate) fn advance(&mut self, next: TurnPhase) {
        if !self.phase.can_advance_to(next) {
            warn!(from = %self.phase, to = %next, "unexpected turn phase transition");
        }
        debug!(from = %self.phase, to = %next, "turn phase");
        self.phase = next;
    }

    pub(crate) fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_happy_path_is_legal() {
        let path = [
            TurnPhase::Received,
            TurnPhase::Retrieving,
            TurnPhase::Prompting,
            TurnPhase::Generating,
            TurnPhase::Streaming,
            TurnPhase::Finalizing,
            TurnPhase::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn blocking_path_uses_awaiting() {
        assert!(TurnPhase::Generating.can_advance_to(TurnPhase::Awaiting));
        assert!(TurnPhase::Awaiting.can_advance_to(TurnPhase::Finalizing));
    }

    #[test]
    fn any_live_phase_can_fail() {
        for phase in [
            TurnPhase::Received,
            TurnPhase::Retrieving,
            TurnPhase::Generating,
            TurnPhase::Streaming,
            TurnPhase::Finalizing,
        ] {
            assert!(phase.can_advance_to(TurnPhase::Failed));
        }
    }

    #[test]
    fn terminal_phases_are_final() {
        assert!(!TurnPhase::Completed.can_advance_to(TurnPhase::Failed));
        assert!(!TurnPhase::Failed.can_advance_to(TurnPhase::Received));
    }

    #[test]
    fn skipping_retrieval_is_illegal() {
        assert!(!TurnPhase::Received.can_advance_to(TurnPhase::Generating));
        assert!(!TurnPhase::Streaming.can_advance_to(TurnPhase::Completed));
    }

    #[test]
    fn tracker_follows_advances() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.phase(), TurnPhase::Received);
        tracker.advance(TurnPhase::Retrieving);
        assert_eq!(tracker.phase(), TurnPhase::Retrieving);
        assert!(tracker.elapsed_secs() >= 0.0);
    }
}
