//! Conversation transcript
//!
//! Ordered messages of the active session. At most one companion message is
//! in flight at a time, and while it exists it is the last element. Edits to
//! it go through the [`InFlightHandle`] returned when it was opened.

use serde::Serialize;
use thiserror::Error;

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Companion,
}

/// Whether a message can still change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Companion reply still receiving deltas
    InFlight,
    #[default]
    Final,
}

/// Transcript-unique message id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MessageId(u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub state: MessageState,
}

impl Message {
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.state == MessageState::InFlight
    }
}

/// Direct reference to the in-flight message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightHandle {
    epoch: u64,
    index: usize,
    id: MessageId,
}

impl InFlightHandle {
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("A companion reply is already in flight")]
    ReplyInFlight,
    #[error("In-flight handle is stale (transcript was cleared or the reply already settled)")]
    StaleHandle,
}

#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    next_id: u64,
    /// Advanced on every clear; handles from an older epoch are stale
    epoch: u64,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The in-flight message, if any
    #[must_use]
    pub fn in_flight(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.is_in_flight())
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Append a final message.
    ///
    /// While a reply is in flight it must stay last, so final messages are
    /// rejected until it settles.
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptError::ReplyInFlight`] while a reply is in flight.
    pub fn push_final(
        &mut self,
        role: Role,
        content: impl Into<String>,
    ) -> Result<MessageId, TranscriptError> {
        if self.in_flight().is_some() {
            return Err(TranscriptError::ReplyInFlight);
        }
        let id = self.allocate_id();
        self.messages.push(Message {
            id,
            role,
            content: content.into(),
            state: MessageState::Final,
        });
        Ok(id)
    }

    /// Append an empty in-flight companion message
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptError::ReplyInFlight`] if one is already open.
    pub fn open_in_flight(&mut self) -> Result<InFlightHandle, TranscriptError> {
        if self.in_flight().is_some() {
            return Err(TranscriptError::ReplyInFlight);
        }
        let id = self.allocate_id();
        let index = self.messages.len();
        self.messages.push(Message {
            id,
            role: Role::Companion,
            content: String::new(),
            state: MessageState::InFlight,
        });
        Ok(InFlightHandle {
            epoch: self.epoch,
            index,
            id,
        })
    }

    fn resolve(&mut self, handle: InFlightHandle) -> Result<&mut Message, TranscriptError> {
        if handle.epoch != self.epoch {
            return Err(TranscriptError::StaleHandle);
        }
        match self.messages.get_mut(handle.index) {
            Some(message) if message.id == handle.id && message.is_in_flight() => Ok(message),
            _ => Err(TranscriptError::StaleHandle),
        }
    }

    /// Append `delta` to the in-flight message's content
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptError::StaleHandle`] if the transcript was cleared
    /// or the message already settled.
    pub fn append_in_flight(
        &mut self,
        handle: InFlightHandle,
        delta: &str,
    ) -> Result<(), TranscriptError> {
        let message = self.resolve(handle)?;
        message.content.push_str(delta);
        Ok(())
    }

    /// Freeze the in-flight message with its current content
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptError::StaleHandle`] for a stale handle.
    pub fn finalize(&mut self, handle: InFlightHandle) -> Result<MessageId, TranscriptError> {
        let message = self.resolve(handle)?;
        message.state = MessageState::Final;
        Ok(message.id)
    }

    /// Remove the in-flight message
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptError::StaleHandle`] for a stale handle.
    pub fn discard(&mut self, handle: InFlightHandle) -> Result<Message, TranscriptError> {
        self.resolve(handle)?;
        Ok(self.messages.remove(handle.index))
    }

    /// Remove every message; outstanding handles become stale
    pub fn clear(&mut self) {
        self.messages.clear();
        self.epoch += 1;
    }

    /// Clear, then start over with a single final message
    pub fn seed(&mut self, role: Role, content: impl Into<String>) -> MessageId {
        self.clear();
        let id = self.allocate_id();
        self.messages.push(Message {
            id,
            role,
            content: content.into(),
            state: MessageState::Final,
        });
        id
    }
}
