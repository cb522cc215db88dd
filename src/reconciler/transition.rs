//! Pure state transition function
//!
//! Given the same state and event it always produces the same new state and
//! edits, with no I/O.

use super::{Event, ReplyState, TranscriptEdit};
use crate::api::StreamEvent;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ReplyState,
    pub edits: Vec<TranscriptEdit>,
}

impl TransitionResult {
    #[must_use]
    pub fn new(state: ReplyState) -> Self {
        Self {
            new_state: state,
            edits: vec![],
        }
    }

    #[must_use]
    pub fn with_edit(mut self, edit: TranscriptEdit) -> Self {
        self.edits.push(edit);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("A reply is already streaming")]
    AlreadyStreaming,
    #[error("No reply is streaming")]
    NotStreaming,
}

/// Compute the next state and the transcript edits for `event`.
///
/// # Errors
///
/// Returns [`TransitionError`] for a pair the state machine does not accept.
pub fn transition(state: &ReplyState, event: Event) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // Idle + Begin -> Streaming
        (ReplyState::Idle, Event::Begin { text }) => Ok(TransitionResult::new(
            ReplyState::Streaming { received: 0 },
        )
        .with_edit(TranscriptEdit::AppendUser { text })
        .with_edit(TranscriptEdit::OpenReply)),

        (ReplyState::Streaming { .. }, Event::Begin { .. }) => {
            Err(TransitionError::AlreadyStreaming)
        }

        // Streaming + Data -> Streaming with the delta appended
        (ReplyState::Streaming { received }, Event::Stream(StreamEvent::Data(delta))) => {
            Ok(TransitionResult::new(ReplyState::Streaming {
                received: received + delta.len(),
            })
            .with_edit(TranscriptEdit::AppendReply { delta }))
        }

        // Streaming + End -> Idle, reply kept
        (ReplyState::Streaming { .. }, Event::Stream(StreamEvent::End)) => {
            Ok(TransitionResult::new(ReplyState::Idle).with_edit(TranscriptEdit::FinalizeReply))
        }

        // Streaming + Error -> Idle, reply replaced by the fallback
        (ReplyState::Streaming { .. }, Event::Stream(StreamEvent::Error(_))) => {
            Ok(TransitionResult::new(ReplyState::Idle)
                .with_edit(TranscriptEdit::DiscardReply)
                .with_edit(TranscriptEdit::AppendFallback))
        }

        (ReplyState::Idle, Event::Stream(_)) => Err(TransitionError::NotStreaming),
    }
}
