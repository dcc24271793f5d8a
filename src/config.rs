//! Session configuration

use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:3000/ws";
const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/api";
const DEFAULT_AGENT_ID: &str = "agent";
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for a chat session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Messaging endpoint for the persistent connection
    pub endpoint: String,
    /// Base URL of the REST collaborators
    pub api_url: String,
    /// Sender id of the local agent
    pub agent_id: String,
    /// How long an optimistic send may stay pending before it is marked failed
    pub send_timeout: Duration,
    /// Timeout for REST collaborator requests
    pub request_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            agent_id: DEFAULT_AGENT_ID.to_string(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ChatConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (used by `from_env` and tests)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            endpoint: lookup("SUPPORT_CHAT_WS_URL").unwrap_or(defaults.endpoint),
            api_url: lookup("SUPPORT_CHAT_API_URL").unwrap_or(defaults.api_url),
            agent_id: lookup("SUPPORT_CHAT_AGENT_ID").unwrap_or(defaults.agent_id),
            send_timeout: millis(&lookup, "SUPPORT_CHAT_SEND_TIMEOUT_MS")
                .unwrap_or(defaults.send_timeout),
            request_timeout: millis(&lookup, "SUPPORT_CHAT_REQUEST_TIMEOUT_MS")
                .unwrap_or(defaults.request_timeout),
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable duration, using default");
            None
        }
    }
}
