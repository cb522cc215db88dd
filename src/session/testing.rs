//! Mock implementations for testing
//!
//! A scripted backend lets the controller be exercised without real I/O.

use crate::api::{
    ApiError, ChatRequest, CompanionApi, EventStream, StartSessionRequest, StartSessionResponse,
    StreamEvent,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

// ============================================================================
// Mock Companion API
// ============================================================================

enum ScriptedStream {
    /// Fixed events, yielded immediately
    Events(Vec<StreamEvent>),
    /// Events pushed by the test through a [`StreamFeed`]
    Feed {
        rx: mpsc::UnboundedReceiver<StreamEvent>,
        dropped: Arc<AtomicBool>,
    },
}

/// Test side of a fed stream
pub struct StreamFeed {
    tx: mpsc::UnboundedSender<StreamEvent>,
    dropped: Arc<AtomicBool>,
}

impl StreamFeed {
    /// Push an event; returns false once the consumer dropped the stream
    pub fn push(&self, event: StreamEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn data(&self, delta: &str) -> bool {
        self.push(StreamEvent::Data(delta.to_string()))
    }

    /// Whether the consumer released the stream
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Sets a flag when the stream holding it is dropped
struct DropSignal(Arc<AtomicBool>);

impl Drop for DropSignal {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

type QueuedSession = (Result<StartSessionResponse, ApiError>, Option<Arc<Notify>>);

/// Backend that replays queued session responses and streams
pub struct MockCompanionApi {
    sessions: Mutex<VecDeque<QueuedSession>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    /// Record of all create-session requests
    pub start_requests: Mutex<Vec<StartSessionRequest>>,
    /// Record of all chat requests
    pub chat_requests: Mutex<Vec<ChatRequest>>,
}

impl MockCompanionApi {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            start_requests: Mutex::new(Vec::new()),
            chat_requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful session start
    pub fn queue_session(&self, session_id: &str, opening_message: &str) {
        self.queue_session_response(Ok(opening(session_id, opening_message)));
    }

    pub fn queue_session_response(&self, response: Result<StartSessionResponse, ApiError>) {
        self.sessions.lock().unwrap().push_back((response, None));
    }

    /// Queue a session start that completes only when the returned gate is notified
    pub fn queue_gated_session(&self, session_id: &str, opening_message: &str) -> Arc<Notify> {
        self.queue_gated_response(Ok(opening(session_id, opening_message)))
    }

    pub fn queue_gated_response(
        &self,
        response: Result<StartSessionResponse, ApiError>,
    ) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.sessions
            .lock()
            .unwrap()
            .push_back((response, Some(Arc::clone(&gate))));
        gate
    }

    /// Queue a stream that yields `events` and ends
    pub fn queue_events(&self, events: Vec<StreamEvent>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(ScriptedStream::Events(events));
    }

    /// Queue a stream driven by the returned feed
    pub fn queue_feed(&self) -> StreamFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        let dropped = Arc::new(AtomicBool::new(false));
        self.streams.lock().unwrap().push_back(ScriptedStream::Feed {
            rx,
            dropped: Arc::clone(&dropped),
        });
        StreamFeed { tx, dropped }
    }

    pub fn recorded_start_requests(&self) -> Vec<StartSessionRequest> {
        self.start_requests.lock().unwrap().clone()
    }

    pub fn recorded_chat_requests(&self) -> Vec<ChatRequest> {
        self.chat_requests.lock().unwrap().clone()
    }
}

impl Default for MockCompanionApi {
    fn default() -> Self {
        Self::new()
    }
}

fn opening(session_id: &str, opening_message: &str) -> StartSessionResponse {
    StartSessionResponse {
        session_id: session_id.to_string(),
        opening_message: opening_message.to_string(),
        companion_name: None,
        style: None,
    }
}

#[async_trait]
impl CompanionApi for MockCompanionApi {
    async fn create_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, ApiError> {
        self.start_requests.lock().unwrap().push(request.clone());
        let queued = self.sessions.lock().unwrap().pop_front();
        let Some((response, gate)) = queued else {
            return Err(ApiError::network("No mock session queued"));
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        response
    }

    fn open_stream(&self, request: ChatRequest) -> EventStream {
        self.chat_requests.lock().unwrap().push(request);
        match self.streams.lock().unwrap().pop_front() {
            Some(ScriptedStream::Events(events)) => Box::pin(futures::stream::iter(events)),
            Some(ScriptedStream::Feed { rx, dropped }) => Box::pin(futures::stream::unfold(
                (rx, DropSignal(dropped)),
                |(mut rx, signal)| async move { rx.recv().await.map(|event| (event, (rx, signal))) },
            )),
            None => Box::pin(futures::stream::iter([StreamEvent::Error(
                ApiError::network("No mock stream queued"),
            )])),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiErrorKind, Tone};
    use crate::reconciler::FALLBACK_REPLY;
    use crate::session::{ConversationUpdate, SessionController, SessionError, DEFAULT_COMPANION_NAME};
    use crate::transcript::{MessageState, Role};
    use std::time::Duration;
    use tokio::task::JoinHandle;

    fn controller() -> (Arc<MockCompanionApi>, SessionController<Arc<MockCompanionApi>>) {
        let api = Arc::new(MockCompanionApi::new());
        let controller = SessionController::new(Arc::clone(&api));
        (api, controller)
    }

    fn contents(controller: &SessionController<Arc<MockCompanionApi>>) -> Vec<(Role, String)> {
        controller
            .transcript()
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect()
    }

    async fn settle(handle: JoinHandle<()>) {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("stream task should settle")
            .expect("stream task should not panic");
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn started(api: &MockCompanionApi, controller: &SessionController<Arc<MockCompanionApi>>) {
        api.queue_session("s1", "Hi Alex!");
        controller.start("Alex", "Nova", Tone::Calm).await.unwrap();
    }

    // ── start ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_start_seeds_opening_message() {
        let (api, controller) = controller();
        api.queue_session("s1", "Hi Alex!");

        let session = controller.start("Alex", "Nova", Tone::Calm).await.unwrap();

        assert_eq!(session.id, "s1");
        assert_eq!(session.companion_name, "Nova");
        assert_eq!(session.tone, Tone::Calm);
        assert_eq!(controller.session(), Some(session));
        assert_eq!(contents(&controller), vec![(Role::Companion, "Hi Alex!".to_string())]);
        assert_eq!(controller.companion_name(), "Nova");

        let requests = api.recorded_start_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].style, Tone::Calm);
        assert_eq!(requests[0].user_external_id, None);
    }

    #[tokio::test]
    async fn test_start_trims_names() {
        let (api, controller) = controller();
        api.queue_session("s1", "Hi");

        let session = controller.start("  Alex ", "\tNova\n", Tone::Warm).await.unwrap();
        assert_eq!(session.user_name, "Alex");

        let request = &api.recorded_start_requests()[0];
        assert_eq!(request.user_name, "Alex");
        assert_eq!(request.companion_name, "Nova");
    }

    #[tokio::test]
    async fn test_start_rejects_blank_names_without_request() {
        let (api, controller) = controller();

        for (user, companion, field) in [
            ("", "Nova", "user_name"),
            ("   ", "Nova", "user_name"),
            ("Alex", "", "companion_name"),
            ("Alex", " \t ", "companion_name"),
        ] {
            let err = controller.start(user, companion, Tone::Warm).await.unwrap_err();
            assert_eq!(err, SessionError::InvalidInput { field });
        }

        assert!(api.recorded_start_requests().is_empty());
        assert_eq!(controller.session(), None);
        assert!(controller.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_blank_names_leave_active_session_untouched() {
        let (api, controller) = controller();
        started(&api, &controller).await;

        let err = controller.start("", "Nova", Tone::Warm).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidInput { .. }));
        assert_eq!(controller.session().map(|s| s.id), Some("s1".to_string()));
        assert_eq!(controller.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_start_network_failure_then_retry() {
        let (api, controller) = controller();
        api.queue_session_response(Err(ApiError::status(500, "HTTP 500: boom")));
        api.queue_session("s2", "Welcome back");

        let err = controller.start("Alex", "Nova", Tone::Warm).await.unwrap_err();
        match err {
            SessionError::NetworkFailure(e) => assert_eq!(e.kind, ApiErrorKind::Status),
            other => panic!("Expected NetworkFailure, got {other:?}"),
        }
        assert_eq!(controller.session(), None);
        assert!(controller.transcript().is_empty());
        assert!(!controller.is_starting());

        let session = controller.start("Alex", "Nova", Tone::Warm).await.unwrap();
        assert_eq!(session.id, "s2");
    }

    #[tokio::test]
    async fn test_failed_restart_keeps_previous_session() {
        let (api, controller) = controller();
        started(&api, &controller).await;
        api.queue_session_response(Err(ApiError::network("connection refused")));

        let err = controller.start("Alex", "Luna", Tone::Warm).await.unwrap_err();
        assert!(matches!(err, SessionError::NetworkFailure(_)));
        assert_eq!(controller.session().map(|s| s.id), Some("s1".to_string()));
        assert_eq!(contents(&controller), vec![(Role::Companion, "Hi Alex!".to_string())]);
    }

    #[tokio::test]
    async fn test_failed_restart_leaves_open_reply_streaming() {
        let api = Arc::new(MockCompanionApi::new());
        let controller = Arc::new(SessionController::new(Arc::clone(&api)));
        api.queue_session("s1", "Hi Alex!");
        controller.start("Alex", "Nova", Tone::Calm).await.unwrap();

        let feed = api.queue_feed();
        let reply = controller.send("I feel anxious").unwrap();
        feed.data("I hear ");
        wait_until(|| controller.transcript()[2].content == "I hear ").await;

        let gate = api.queue_gated_response(Err(ApiError::network("connection refused")));
        let restart = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.start("Alex", "Luna", Tone::Warm).await })
        };
        wait_until(|| controller.is_starting()).await;

        // Deltas keep landing while the restart is pending
        feed.data("you.");
        wait_until(|| controller.transcript()[2].content == "I hear you.").await;
        assert!(controller.is_streaming());

        gate.notify_one();
        let err = restart.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::NetworkFailure(_)));
        assert!(controller.is_streaming());
        assert!(!feed.is_dropped());
        assert_eq!(controller.session().map(|s| s.id), Some("s1".to_string()));
        assert_eq!(controller.companion_name(), "Nova");

        feed.push(StreamEvent::End);
        settle(reply).await;

        assert_eq!(
            contents(&controller),
            vec![
                (Role::Companion, "Hi Alex!".to_string()),
                (Role::User, "I feel anxious".to_string()),
                (Role::Companion, "I hear you.".to_string()),
            ]
        );
        assert!(!controller.is_streaming());
    }

    #[tokio::test]
    async fn test_server_normalized_fields_win() {
        let (api, controller) = controller();
        api.queue_session_response(Ok(StartSessionResponse {
            session_id: "s1".to_string(),
            opening_message: "Hey".to_string(),
            companion_name: Some("Luna".to_string()),
            style: Some(Tone::Warm),
        }));

        let session = controller.start("Alex", "Nova", Tone::Playful).await.unwrap();
        assert_eq!(session.companion_name, "Luna");
        assert_eq!(session.tone, Tone::Warm);
        assert_eq!(controller.companion_name(), "Luna");
    }

    #[tokio::test]
    async fn test_user_external_id_forwarded() {
        let api = Arc::new(MockCompanionApi::new());
        let controller = SessionController::new(Arc::clone(&api))
            .with_user_external_id(Some("user-42".to_string()));
        api.queue_session("s1", "Hi");

        controller.start("Alex", "Nova", Tone::Warm).await.unwrap();
        assert_eq!(
            api.recorded_start_requests()[0].user_external_id.as_deref(),
            Some("user-42")
        );
    }

    #[tokio::test]
    async fn test_concurrent_start_rejected() {
        let api = Arc::new(MockCompanionApi::new());
        let controller = Arc::new(SessionController::new(Arc::clone(&api)));
        let gate = api.queue_gated_session("s1", "Hi");

        let pending = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.start("Alex", "Nova", Tone::Warm).await })
        };
        wait_until(|| controller.is_starting()).await;

        let err = controller.start("Alex", "Nova", Tone::Warm).await.unwrap_err();
        assert_eq!(err, SessionError::StartInProgress);

        gate.notify_one();
        let session = pending.await.unwrap().unwrap();
        assert_eq!(session.id, "s1");
        assert!(!controller.is_starting());
    }

    #[tokio::test]
    async fn test_reset_during_start_supersedes_response() {
        let api = Arc::new(MockCompanionApi::new());
        let controller = Arc::new(SessionController::new(Arc::clone(&api)));
        let gate = api.queue_gated_session("s1", "Hi");

        let pending = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.start("Alex", "Nova", Tone::Warm).await })
        };
        wait_until(|| controller.is_starting()).await;

        controller.reset();
        gate.notify_one();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err, SessionError::Superseded);
        assert_eq!(controller.session(), None);
        assert!(controller.transcript().is_empty());
    }

    // ── send ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_scenario_send_streams_reply() {
        let (api, controller) = controller();
        started(&api, &controller).await;
        api.queue_events(vec![
            StreamEvent::Data("I hear ".to_string()),
            StreamEvent::Data("you.".to_string()),
            StreamEvent::End,
        ]);

        let handle = controller.send("I feel anxious").expect("send should start");
        settle(handle).await;

        assert_eq!(
            contents(&controller),
            vec![
                (Role::Companion, "Hi Alex!".to_string()),
                (Role::User, "I feel anxious".to_string()),
                (Role::Companion, "I hear you.".to_string()),
            ]
        );
        assert!(controller
            .transcript()
            .iter()
            .all(|m| m.state == MessageState::Final));
        assert!(!controller.is_streaming());
        assert_eq!(
            api.recorded_chat_requests(),
            vec![ChatRequest {
                session_id: "s1".to_string(),
                message: "I feel anxious".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_send_shows_placeholder_before_first_delta() {
        let (api, controller) = controller();
        started(&api, &controller).await;
        let feed = api.queue_feed();

        let handle = controller.send("  hello  ").unwrap();

        let transcript = controller.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[1].content, "hello");
        assert_eq!(transcript[2].content, "");
        assert_eq!(transcript[2].state, MessageState::InFlight);
        assert!(controller.is_streaming());

        feed.data("hi ");
        wait_until(|| controller.transcript()[2].content == "hi ").await;
        feed.data("there");
        feed.push(StreamEvent::End);
        settle(handle).await;

        assert_eq!(controller.transcript()[2].content, "hi there");
        assert!(feed.is_dropped());
    }

    #[tokio::test]
    async fn test_send_noops() {
        let (api, controller) = controller();

        // No session
        assert!(controller.send("hello").is_none());

        started(&api, &controller).await;

        // Blank text
        assert!(controller.send("").is_none());
        assert!(controller.send("  \n ").is_none());

        // Single-flight
        let feed = api.queue_feed();
        let handle = controller.send("first").unwrap();
        assert!(controller.send("second").is_none());

        assert_eq!(api.recorded_chat_requests().len(), 1);
        assert_eq!(controller.transcript().len(), 3);

        feed.push(StreamEvent::End);
        settle(handle).await;
    }

    #[tokio::test]
    async fn test_stream_error_substitutes_fallback_and_releases_lock() {
        let (api, controller) = controller();
        started(&api, &controller).await;
        api.queue_events(vec![
            StreamEvent::Data("half a".to_string()),
            StreamEvent::Error(ApiError::network("connection reset")),
        ]);

        settle(controller.send("hello").unwrap()).await;

        assert_eq!(
            contents(&controller),
            vec![
                (Role::Companion, "Hi Alex!".to_string()),
                (Role::User, "hello".to_string()),
                (Role::Companion, FALLBACK_REPLY.to_string()),
            ]
        );
        assert!(!controller.is_streaming());

        // User may retry
        api.queue_events(vec![StreamEvent::Data("ok".to_string()), StreamEvent::End]);
        settle(controller.send("hello again").unwrap()).await;
        assert_eq!(controller.transcript().len(), 5);
        assert_eq!(controller.transcript()[4].content, "ok");
    }

    #[tokio::test]
    async fn test_unqueued_stream_fails_gracefully() {
        let (api, controller) = controller();
        started(&api, &controller).await;

        settle(controller.send("anyone there?").unwrap()).await;
        assert_eq!(controller.transcript().last().unwrap().content, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_stream_without_terminal_event_is_settled() {
        let (api, controller) = controller();
        started(&api, &controller).await;
        api.queue_events(vec![StreamEvent::Data("cut off".to_string())]);

        settle(controller.send("hello").unwrap()).await;

        let transcript = controller.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[2].content, FALLBACK_REPLY);
        assert!(!controller.is_streaming());
    }

    // ── reset & cancellation ─────────────────────────────────────────────

    #[tokio::test]
    async fn test_reset_mid_stream() {
        let (api, controller) = controller();
        started(&api, &controller).await;
        let feed = api.queue_feed();

        let handle = controller.send("hello").unwrap();
        feed.data("partial");
        wait_until(|| controller.transcript()[2].content == "partial").await;

        controller.reset();

        assert!(controller.transcript().is_empty());
        assert_eq!(controller.session(), None);
        assert!(!controller.is_streaming());
        assert_eq!(controller.companion_name(), DEFAULT_COMPANION_NAME);

        // Late events never land
        feed.data(" and more");
        feed.push(StreamEvent::End);
        settle(handle).await;
        assert!(controller.transcript().is_empty());
        assert!(feed.is_dropped());
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let (_api, controller) = controller();
        controller.reset();
        controller.reset();
        assert!(controller.transcript().is_empty());
        assert_eq!(controller.session(), None);
        assert_eq!(controller.companion_name(), DEFAULT_COMPANION_NAME);
    }

    #[tokio::test]
    async fn test_cancelled_stream_never_crosses_into_new_session() {
        let (api, controller) = controller();
        started(&api, &controller).await;

        let old_feed = api.queue_feed();
        let old_handle = controller.send("old question").unwrap();
        old_feed.data("old ");
        wait_until(|| controller.transcript()[2].content == "old ").await;

        // Starting a new session cancels the open stream
        api.queue_session("s2", "Hi again!");
        controller.start("Alex", "Luna", Tone::Playful).await.unwrap();
        settle(old_handle).await;
        assert!(old_feed.is_dropped());

        let new_feed = api.queue_feed();
        let new_handle = controller.send("new question").unwrap();

        old_feed.data("stale");
        old_feed.push(StreamEvent::End);
        new_feed.data("fresh");
        new_feed.push(StreamEvent::End);
        settle(new_handle).await;

        assert_eq!(
            contents(&controller),
            vec![
                (Role::Companion, "Hi again!".to_string()),
                (Role::User, "new question".to_string()),
                (Role::Companion, "fresh".to_string()),
            ]
        );
        assert_eq!(api.recorded_chat_requests()[1].session_id, "s2");
    }

    // ── updates ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_updates_published_in_order() {
        let (api, controller) = controller();
        let mut updates = controller.subscribe();

        started(&api, &controller).await;
        api.queue_events(vec![
            StreamEvent::Data("a".to_string()),
            StreamEvent::Data("b".to_string()),
            StreamEvent::End,
        ]);
        settle(controller.send("hi").unwrap()).await;
        controller.reset();

        let mut received = Vec::new();
        while let Ok(update) = updates.try_recv() {
            received.push(update);
        }

        assert!(matches!(
            &received[0],
            ConversationUpdate::Started { opening_message, .. } if opening_message == "Hi Alex!"
        ));
        assert_eq!(
            received[1..],
            [
                ConversationUpdate::UserMessage {
                    text: "hi".to_string()
                },
                ConversationUpdate::ReplyDelta {
                    delta: "a".to_string()
                },
                ConversationUpdate::ReplyDelta {
                    delta: "b".to_string()
                },
                ConversationUpdate::ReplyFinished {
                    content: "ab".to_string()
                },
                ConversationUpdate::Reset,
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_reply_update() {
        let (api, controller) = controller();
        started(&api, &controller).await;
        let mut updates = controller.subscribe();
        api.queue_events(vec![StreamEvent::Error(ApiError::status(502, "HTTP 502: bad gateway"))]);

        settle(controller.send("hi").unwrap()).await;

        let mut last = None;
        while let Ok(update) = updates.try_recv() {
            last = Some(update);
        }
        assert_eq!(
            last,
            Some(ConversationUpdate::ReplyFailed {
                message: "HTTP 502: bad gateway".to_string()
            })
        );
    }
}
