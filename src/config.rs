//! Process configuration
//!
//! Read once at startup from the environment.

use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Configuration for the companion backend client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend base URL, without a trailing slash
    pub api_base: String,
    /// Stable profile id forwarded on session start
    pub user_external_id: Option<String>,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            user_external_id: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_base = lookup("COMPANION_API_BASE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let user_external_id = lookup("COMPANION_USER_ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let connect_timeout = lookup("COMPANION_CONNECT_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse().ok())
            .map_or(
                Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
                Duration::from_secs,
            );

        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            user_external_id,
            connect_timeout,
        }
    }
}
