//! Stream reconciler
//!
//! Folds one send's stream events into the transcript. The state machine in
//! [`transition`] decides which edits happen; [`Reconciler`] applies them
//! through the in-flight handle it holds.

mod edit;
mod event;
mod state;
mod transition;


pub use edit::{TranscriptEdit, FALLBACK_REPLY};
pub use event::Event;
pub use state::ReplyState;
pub use transition::{transition, TransitionError, TransitionResult};

use crate::api::StreamEvent;
use crate::transcript::{InFlightHandle, Role, Transcript, TranscriptError};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Transcript(#[from] TranscriptError),
}

/// Applies reply transitions to a transcript
#[derive(Debug, Default)]
pub struct Reconciler {
    state: ReplyState,
    reply: Option<InFlightHandle>,
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> &ReplyState {
        &self.state
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming()
    }

    /// Handle of the reply this reconciler is growing
    #[must_use]
    pub fn reply(&self) -> Option<InFlightHandle> {
        self.reply
    }

    /// Start a send: append the user message and an in-flight reply
    ///
    /// # Errors
    ///
    /// Fails if this reconciler is already streaming or the transcript
    /// already holds an in-flight reply. The transcript is left untouched.
    pub fn begin(
        &mut self,
        transcript: &mut Transcript,
        text: impl Into<String>,
    ) -> Result<(), ReconcileError> {
        if transcript.in_flight().is_some() {
            return Err(TranscriptError::ReplyInFlight.into());
        }
        self.step(transcript, Event::Begin { text: text.into() })
    }

    /// Fold one stream event into the transcript
    ///
    /// # Errors
    ///
    /// Fails for an event while idle, or when the held reply no longer
    /// resolves in `transcript`.
    pub fn apply(
        &mut self,
        transcript: &mut Transcript,
        event: StreamEvent,
    ) -> Result<(), ReconcileError> {
        self.step(transcript, Event::Stream(event))
    }

    fn step(&mut self, transcript: &mut Transcript, event: Event) -> Result<(), ReconcileError> {
        let result = transition(&self.state, event)?;

        if let Err(e) = self.apply_edits(transcript, result.edits) {
            // The transcript moved on without us (cleared or edited elsewhere).
            self.state = ReplyState::Idle;
            self.reply = None;
            return Err(e.into());
        }

        self.state = result.new_state;
        Ok(())
    }

    fn apply_edits(
        &mut self,
        transcript: &mut Transcript,
        edits: Vec<TranscriptEdit>,
    ) -> Result<(), TranscriptError> {
        for edit in edits {
            match edit {
                TranscriptEdit::AppendUser { text } => {
                    transcript.push_final(Role::User, text)?;
                }
                TranscriptEdit::OpenReply => {
                    self.reply = Some(transcript.open_in_flight()?);
                }
                TranscriptEdit::AppendReply { delta } => {
                    transcript.append_in_flight(self.held_reply()?, &delta)?;
                }
                TranscriptEdit::FinalizeReply => {
                    transcript.finalize(self.held_reply()?)?;
                    self.reply = None;
                }
                TranscriptEdit::DiscardReply => {
                    transcript.discard(self.held_reply()?)?;
                    self.reply = None;
                }
                TranscriptEdit::AppendFallback => {
                    transcript.push_final(Role::Companion, FALLBACK_REPLY)?;
                }
            }
        }
        Ok(())
    }

    fn held_reply(&self) -> Result<InFlightHandle, TranscriptError> {
        self.reply.ok_or(TranscriptError::StaleHandle)
    }
}

/// Run a complete send over a finite event sequence.
///
/// Events after the first terminal one are ignored.
///
/// # Errors
///
/// Propagates the first [`ReconcileError`] from beginning or applying.
pub fn fold(
    transcript: &mut Transcript,
    text: impl Into<String>,
    events: impl IntoIterator<Item = StreamEvent>,
) -> Result<(), ReconcileError> {
    let mut reconciler = Reconciler::new();
    reconciler.begin(transcript, text)?;
    for event in events {
        let terminal = event.is_terminal();
        reconciler.apply(transcript, event)?;
        if terminal {
            break;
        }
    }
    Ok(())
}
