//! Session controller
//!
//! Owns the active session and its transcript, and drives one streamed reply
//! at a time. Stream events are folded into the transcript by a background
//! task; events from a stream that was cancelled or replaced are dropped.

mod error;
mod state;

#[cfg(test)]
pub mod testing;

pub use error::SessionError;
pub use state::{Session, DEFAULT_COMPANION_NAME};

use crate::api::{
    ApiError, ChatRequest, CompanionApi, EventStream, StartSessionRequest, StreamEvent, Tone,
};
use crate::reconciler::Reconciler;
use crate::transcript::{Message, Role};
use futures::StreamExt;
use state::{ActiveStream, Conversation, Phase};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Notifications for whoever renders the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationUpdate {
    Started {
        session: Session,
        opening_message: String,
    },
    UserMessage {
        text: String,
    },
    ReplyDelta {
        delta: String,
    },
    ReplyFinished {
        content: String,
    },
    /// The reply failed and was replaced by the fallback message
    ReplyFailed {
        message: String,
    },
    Reset,
}

/// Orchestrates session lifecycle and message sending
pub struct SessionController<A> {
    api: Arc<A>,
    inner: Arc<Mutex<Conversation>>,
    updates: broadcast::Sender<ConversationUpdate>,
    user_external_id: Option<String>,
}

impl<A: CompanionApi + 'static> SessionController<A> {
    #[must_use]
    pub fn new(api: A) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            api: Arc::new(api),
            inner: Arc::new(Mutex::new(Conversation::default())),
            updates,
            user_external_id: None,
        }
    }

    /// Stable profile id forwarded on every session start
    #[must_use]
    pub fn with_user_external_id(mut self, id: Option<String>) -> Self {
        self.user_external_id = id;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Conversation> {
        lock_conversation(&self.inner)
    }

    fn notify(&self, update: ConversationUpdate) {
        // No receivers is fine
        let _ = self.updates.send(update);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationUpdate> {
        self.updates.subscribe()
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.lock().session().cloned()
    }

    /// Snapshot of the transcript
    #[must_use]
    pub fn transcript(&self) -> Vec<Message> {
        self.lock().transcript.messages().to_vec()
    }

    /// True while a reply is streaming
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.lock().is_streaming()
    }

    /// True while a create-session request is outstanding
    #[must_use]
    pub fn is_starting(&self) -> bool {
        matches!(self.lock().phase, Phase::AwaitingOpening { .. })
    }

    #[must_use]
    pub fn companion_name(&self) -> String {
        self.lock().companion_name.clone()
    }

    /// Create a session and seed the transcript with its opening message.
    ///
    /// Blank names are rejected without a request. On failure the previous
    /// state is kept.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidInput`] if a name trims to empty
    /// - [`SessionError::StartInProgress`] while another start is pending
    /// - [`SessionError::NetworkFailure`] if the backend request fails
    /// - [`SessionError::Superseded`] if a reset happened while waiting
    pub async fn start(
        &self,
        user_name: &str,
        companion_name: &str,
        tone: Tone,
    ) -> Result<Session, SessionError> {
        let user_name = user_name.trim();
        if user_name.is_empty() {
            return Err(SessionError::InvalidInput { field: "user_name" });
        }
        let companion_name = companion_name.trim();
        if companion_name.is_empty() {
            return Err(SessionError::InvalidInput {
                field: "companion_name",
            });
        }

        let ticket = {
            let mut conv = self.lock();
            if matches!(conv.phase, Phase::AwaitingOpening { .. }) {
                return Err(SessionError::StartInProgress);
            }
            let ticket = conv.next_ticket();
            let previous = match std::mem::take(&mut conv.phase) {
                Phase::Active(session) => Some(session),
                Phase::Idle | Phase::AwaitingOpening { .. } => None,
            };
            conv.phase = Phase::AwaitingOpening { ticket, previous };
            ticket
        };

        let request = StartSessionRequest {
            user_name: user_name.to_string(),
            companion_name: companion_name.to_string(),
            style: tone,
            user_external_id: self.user_external_id.clone(),
        };
        let result = self.api.create_session(&request).await;

        let mut conv = self.lock();
        let previous = match &mut conv.phase {
            Phase::AwaitingOpening {
                ticket: pending,
                previous,
            } if *pending == ticket => previous.take(),
            _ => {
                tracing::info!("Session start superseded by reset, discarding response");
                return Err(SessionError::Superseded);
            }
        };

        let created = match result {
            Ok(created) => created,
            Err(e) => {
                conv.phase = previous.map_or(Phase::Idle, Phase::Active);
                tracing::warn!(error = %e, "Failed to start session");
                return Err(SessionError::NetworkFailure(e));
            }
        };

        let session = Session {
            id: created.session_id,
            user_name: user_name.to_string(),
            companion_name: created
                .companion_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| companion_name.to_string()),
            tone: created.style.unwrap_or(tone),
        };

        if let Some(stream_id) = conv.cancel_stream() {
            tracing::info!(stream_id, "Cancelled stream of replaced session");
        }
        conv.transcript.seed(Role::Companion, created.opening_message.clone());
        conv.companion_name.clone_from(&session.companion_name);
        conv.phase = Phase::Active(session.clone());
        drop(conv);

        tracing::info!(
            session_id = %session.id,
            companion = %session.companion_name,
            tone = %session.tone,
            "Session started"
        );
        self.notify(ConversationUpdate::Started {
            session: session.clone(),
            opening_message: created.opening_message,
        });
        Ok(session)
    }

    /// Drop the session and transcript, cancelling any open stream
    pub fn reset(&self) {
        let mut conv = self.lock();
        let cancelled = conv.cancel_stream();
        conv.phase = Phase::Idle;
        conv.transcript.clear();
        DEFAULT_COMPANION_NAME.clone_into(&mut conv.companion_name);
        drop(conv);

        tracing::info!(cancelled_stream = ?cancelled, "Conversation reset");
        self.notify(ConversationUpdate::Reset);
    }

    /// Send a user message and stream the reply into the transcript.
    ///
    /// Returns `None` without doing anything when the text is blank, there is
    /// no session, or a reply is already streaming. Otherwise the user message
    /// and an empty in-flight reply are in the transcript when this returns,
    /// and the handle resolves once the stream settles or is cancelled.
    /// Must be called from within a Tokio runtime.
    pub fn send(&self, text: &str) -> Option<JoinHandle<()>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let (request, stream_id, cancel) = {
            let mut guard = self.lock();
            let conv = &mut *guard;

            let Some(session) = conv.session() else {
                tracing::debug!("Ignoring send without an active session");
                return None;
            };
            let session_id = session.id.clone();

            if conv.is_streaming() {
                tracing::debug!(session_id = %session_id, "Ignoring send while a reply is streaming");
                return None;
            }

            let mut reconciler = Reconciler::new();
            if let Err(e) = reconciler.begin(&mut conv.transcript, text) {
                tracing::warn!(error = %e, "Could not begin reply");
                return None;
            }

            let stream_id = conv.next_ticket();
            let cancel = CancellationToken::new();
            conv.stream = Some(ActiveStream {
                id: stream_id,
                cancel: cancel.clone(),
                reconciler,
            });

            let request = ChatRequest {
                session_id,
                message: text.to_string(),
            };
            (request, stream_id, cancel)
        };

        tracing::info!(session_id = %request.session_id, stream_id, "Opening reply stream");
        self.notify(ConversationUpdate::UserMessage {
            text: text.to_string(),
        });

        let events = self.api.open_stream(request);
        Some(tokio::spawn(drive_stream(
            Arc::clone(&self.inner),
            self.updates.clone(),
            events,
            stream_id,
            cancel,
        )))
    }
}

fn lock_conversation(inner: &Mutex<Conversation>) -> MutexGuard<'_, Conversation> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fold one stream into the conversation until it settles or is cancelled.
///
/// The stream is dropped on every exit path, which releases the transport.
async fn drive_stream(
    inner: Arc<Mutex<Conversation>>,
    updates: broadcast::Sender<ConversationUpdate>,
    events: EventStream,
    stream_id: u64,
    cancel: CancellationToken,
) {
    let mut events = Box::pin(events.take_until(cancel.clone().cancelled_owned()));

    while let Some(event) = events.next().await {
        let terminal = event.is_terminal();
        match apply_event(&inner, stream_id, event) {
            Some(update) => {
                let _ = updates.send(update);
            }
            None => return,
        }
        if terminal {
            return;
        }
    }

    if cancel.is_cancelled() {
        tracing::debug!(stream_id, "Reply stream cancelled");
        return;
    }

    // Ended without End or Error; settle it so the session is not stuck.
    tracing::warn!(stream_id, "Reply stream ended without a terminal event");
    let event = StreamEvent::Error(ApiError::unknown("stream ended without a terminal event"));
    if let Some(update) = apply_event(&inner, stream_id, event) {
        let _ = updates.send(update);
    }
}

/// Apply one event if `stream_id` is still the active stream.
///
/// Returns the update to publish, or `None` when the event was dropped.
fn apply_event(
    inner: &Mutex<Conversation>,
    stream_id: u64,
    event: StreamEvent,
) -> Option<ConversationUpdate> {
    let mut guard = lock_conversation(inner);
    let conv = &mut *guard;

    let Some(active) = conv.stream.as_mut().filter(|s| s.id == stream_id) else {
        tracing::debug!(stream_id, "Dropping event from stale stream");
        return None;
    };

    let update = match &event {
        StreamEvent::Data(delta) => ConversationUpdate::ReplyDelta {
            delta: delta.clone(),
        },
        StreamEvent::End => ConversationUpdate::ReplyFinished {
            content: String::new(),
        },
        StreamEvent::Error(e) => {
            tracing::warn!(stream_id, error = %e, kind = ?e.kind, "Reply stream failed");
            ConversationUpdate::ReplyFailed {
                message: e.message.clone(),
            }
        }
    };
    let terminal = event.is_terminal();

    if let Err(e) = active.reconciler.apply(&mut conv.transcript, event) {
        tracing::warn!(stream_id, error = %e, "Could not apply stream event");
        conv.cancel_stream();
        return None;
    }

    if !terminal {
        return Some(update);
    }

    conv.stream = None;
    match update {
        ConversationUpdate::ReplyFinished { .. } => {
            let content = conv
                .transcript
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            tracing::info!(stream_id, chars = content.chars().count(), "Reply finished");
            Some(ConversationUpdate::ReplyFinished { content })
        }
        other => Some(other),
    }
}
