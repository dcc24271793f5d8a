//! Effects produced by connection transitions

use super::state::LinkId;
use crate::model::Message;
use serde::Serialize;

/// Events emitted to connection subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: Option<String> },
    MessageReceived { message: Message },
}

/// Effects to be executed after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a transport attempt for this link
    OpenTransport { link: LinkId, endpoint: String },

    /// Release the transport held by this link
    CloseTransport { link: LinkId },

    /// Notify subscribers
    Notify(ConnectionEvent),
}

impl Effect {
    pub fn notify_connected() -> Self {
        Effect::Notify(ConnectionEvent::Connected)
    }

    pub fn notify_disconnected(reason: Option<String>) -> Self {
        Effect::Notify(ConnectionEvent::Disconnected { reason })
    }
}
