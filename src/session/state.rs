//! Session state machine.
//!
//! ```text
//! Created → Reading → Processing → Writing → Reading → ... → Closed
//!              ↑          │
//!              └──────────┘  (no reply)
//! ```
//!
//! `Closed` is reachable from every state and is terminal.

/// Connection session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Built, nothing read yet. An initial payload may be written here.
    Created,
    /// Waiting for bytes from the peer.
    Reading,
    /// Bytes handed to the processor.
    Processing,
    /// Sending the processor's reply.
    Writing,
    /// Connection released. Terminal.
    Closed,
}

impl SessionState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Created, Reading) | (Created, Writing) => true,
            (Reading, Reading) | (Reading, Processing) => true,
            (Processing, Writing) | (Processing, Reading) => true,
            (Writing, Reading) => true,
            _ => false,
        }
    }

    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Reading => "reading",
            SessionState::Processing => "processing",
            SessionState::Writing => "writing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
