//! HTTP implementation of the companion backend client

use super::types::{ChatRequest, HealthStatus, StartSessionRequest, StartSessionResponse};
use super::{sse, ApiError, CompanionApi, EventStream, StreamEvent};
use crate::config::ClientConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Client for the companion backend over HTTP
#[derive(Debug, Clone)]
pub struct HttpCompanionApi {
    client: Client,
    base_url: String,
}

impl HttpCompanionApi {
    /// Build a client for `config.api_base`.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        // Connect timeout only: a streamed reply has no bounded duration.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ApiError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Check that the backend is up
    ///
    /// # Errors
    ///
    /// Fails when the backend is unreachable, answers non-2xx, or sends a
    /// body that is not a health status.
    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest("health check", &e))?;

        read_json(response).await
    }
}

#[async_trait]
impl CompanionApi for HttpCompanionApi {
    async fn create_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/start"))
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest("start session", &e))?;

        let created: StartSessionResponse = read_json(response).await?;
        tracing::info!(session_id = %created.session_id, "Session created");
        Ok(created)
    }

    fn open_stream(&self, request: ChatRequest) -> EventStream {
        let builder = self
            .client
            .post(self.url("/chat/stream"))
            .header(ACCEPT, "text/event-stream")
            .json(&request);

        Box::pin(futures::stream::once(connect_stream(builder, request.session_id)).flatten())
    }
}

/// Send the chat request and turn the response into an event stream.
/// Any failure before the body starts becomes a single `Error` event.
async fn connect_stream(builder: RequestBuilder, session_id: String) -> EventStream {
    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            let error = ApiError::from_reqwest("chat stream", &e);
            tracing::warn!(session_id = %session_id, error = %error, "Chat stream failed to connect");
            return single_error(error);
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let error = ApiError::status(
            status.as_u16(),
            format!("HTTP {status}: {}", error_detail(&body)),
        );
        tracing::warn!(session_id = %session_id, status = status.as_u16(), "Chat stream rejected");
        return single_error(error);
    }

    tracing::debug!(session_id = %session_id, "Chat stream opened");

    let body = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| ApiError::from_reqwest("reading chat stream", &e)));

    Box::pin(sse::event_stream(Box::pin(body)))
}

fn single_error(error: ApiError) -> EventStream {
    Box::pin(futures::stream::iter([StreamEvent::Error(error)]))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::from_reqwest("reading response", &e))?;

    if !status.is_success() {
        return Err(ApiError::status(
            status.as_u16(),
            format!("HTTP {status}: {}", error_detail(&body)),
        ));
    }

    serde_json::from_str(&body)
        .map_err(|e| ApiError::decode(format!("Failed to parse response: {e} - body: {body}")))
}

/// Error body shape used by the backend (`{"detail": "..."}`)
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    detail: serde_json::Value,
}

fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorResponse { detail }) => detail.to_string(),
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}
