//! Conversation context owned by the session controller

use crate::api::Tone;
use crate::reconciler::Reconciler;
use crate::transcript::Transcript;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Companion name shown before a session starts and after a reset
pub const DEFAULT_COMPANION_NAME: &str = "Skylar";

/// One persona-bound conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub user_name: String,
    pub companion_name: String,
    pub tone: Tone,
}

/// Session lifecycle
#[derive(Debug, Default)]
pub(crate) enum Phase {
    /// No session
    #[default]
    Idle,

    /// Create-session request in flight
    AwaitingOpening {
        ticket: u64,
        /// Session to restore if the request fails
        previous: Option<Session>,
    },

    Active(Session),
}

/// The open chat stream of the active send
#[derive(Debug)]
pub(crate) struct ActiveStream {
    pub id: u64,
    pub cancel: CancellationToken,
    pub reconciler: Reconciler,
}

/// Everything one conversation owns
#[derive(Debug)]
pub(crate) struct Conversation {
    pub phase: Phase,
    pub transcript: Transcript,
    pub companion_name: String,
    /// At most one stream per session (single-flight)
    pub stream: Option<ActiveStream>,
    next_ticket: u64,
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            transcript: Transcript::new(),
            companion_name: DEFAULT_COMPANION_NAME.to_string(),
            stream: None,
            next_ticket: 1,
        }
    }
}

impl Conversation {
    /// Fresh id for a start attempt or a stream
    pub fn next_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.phase {
            Phase::Active(session) => Some(session),
            Phase::Idle | Phase::AwaitingOpening { .. } => None,
        }
    }

    /// Cancel and forget the open stream, returning its id
    pub fn cancel_stream(&mut self) -> Option<u64> {
        let stream = self.stream.take()?;
        stream.cancel.cancel();
        Some(stream.id)
    }

    /// True while a send is outstanding
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }
}
