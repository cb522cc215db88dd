//! Companion backend client
//!
//! Two collaborator operations sit behind [`CompanionApi`]: creating a session
//! and opening a streamed reply. [`HttpCompanionApi`] talks to the real backend;
//! tests substitute scripted implementations.

mod error;
mod event;
mod http;
pub mod sse;
mod types;

pub use error::{ApiError, ApiErrorKind};
pub use event::StreamEvent;
pub use http::HttpCompanionApi;
pub use types::{
    ChatRequest, HealthStatus, StartSessionRequest, StartSessionResponse, Tone, UnknownTone,
};

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Lazy, finite, non-restartable sequence of stream events
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Interface to the companion backend
#[async_trait]
pub trait CompanionApi: Send + Sync {
    /// Create a session and receive its opening message
    async fn create_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, ApiError>;

    /// Open a streamed reply to one user message.
    ///
    /// Nothing is sent until the returned stream is first polled. Dropping the
    /// stream aborts the underlying request.
    fn open_stream(&self, request: ChatRequest) -> EventStream;
}

#[async_trait]
impl<T: CompanionApi + ?Sized> CompanionApi for Arc<T> {
    async fn create_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, ApiError> {
        (**self).create_session(request).await
    }

    fn open_stream(&self, request: ChatRequest) -> EventStream {
        (**self).open_stream(request)
    }
}
