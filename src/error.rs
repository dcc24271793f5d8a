//! Error types

use thiserror::Error;

/// Transport-level failures
///
/// These never escape `ConnectionManager::connect`; they surface as a
/// `disconnected` event or a failed delivery instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,
    #[error("Failed to open transport: {0}")]
    Open(String),
    #[error("Transport closed: {0}")]
    Closed(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Error from an external collaborator (history fetch, status command,
/// customer lookup)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct CollaboratorError {
    pub kind: CollaboratorErrorKind,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(kind: CollaboratorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::Network, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::NotFound, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::Rejected, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::Decode, message)
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorErrorKind {
    /// Connection refused, timeout, 5xx - retryable
    Network,
    /// 404
    NotFound,
    /// Other 4xx: the service refused the request
    Rejected,
    /// Response body did not match the expected shape
    Decode,
}

impl CollaboratorErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network)
    }
}

/// Caller misuse of the session API
///
/// Operational failures are reported as state, not as this error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("No conversation is active")]
    NoActiveConversation,
    #[error("Conversation not found: {0}")]
    UnknownConversation(String),
    #[error("Message not found: {0}")]
    UnknownMessage(String),
    #[error("Message content is empty")]
    EmptyMessage,
    #[error("Message {0} is not in a failed state")]
    NotRetryable(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
