//! Wire types for the companion backend

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Conversational tone of the companion ("vibe")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Warm,
    Calm,
    Playful,
}

impl Tone {
    pub const ALL: [Tone; 3] = [Tone::Warm, Tone::Calm, Tone::Playful];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Warm => "warm",
            Tone::Calm => "calm",
            Tone::Playful => "playful",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tone '{0}' (expected warm, calm or playful)")]
pub struct UnknownTone(pub String);

impl FromStr for Tone {
    type Err = UnknownTone;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warm" => Ok(Tone::Warm),
            "calm" => Ok(Tone::Calm),
            "playful" => Ok(Tone::Playful),
            _ => Err(UnknownTone(s.to_string())),
        }
    }
}

/// `POST /start` request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartSessionRequest {
    pub user_name: String,
    pub companion_name: String,
    pub style: Tone,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_external_id: Option<String>,
}

/// `POST /start` response body
///
/// `companion_name` and `style` are the server's normalized values; older
/// backends omit them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub opening_message: String,
    #[serde(default)]
    pub companion_name: Option<String>,
    #[serde(default)]
    pub style: Option<Tone>,
}

/// `POST /chat/stream` request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

/// `GET /health` response body
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl HealthStatus {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
