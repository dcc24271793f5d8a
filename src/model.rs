//! Chat data model
//!
//! Read models mirrored from the messaging backend. Field names are camelCase
//! on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    Agent,
    Customer,
    Bot,
}

/// Lifecycle of a locally originated message
///
/// Server-originated messages are always `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    #[default]
    Confirmed,
    Failed,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_kind: SenderKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_message_id: Option<String>,
    #[serde(default)]
    pub delivery_state: DeliveryState,
    /// Client-generated id echoed back by servers that carry it through the
    /// round-trip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

impl Message {
    pub fn is_pending(&self) -> bool {
        self.delivery_state == DeliveryState::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.delivery_state == DeliveryState::Failed
    }

    /// Pending or failed: not yet known to the server
    pub fn is_unconfirmed(&self) -> bool {
        self.delivery_state != DeliveryState::Confirmed
    }
}

/// Who is currently answering a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    BotEnabled,
    HumanHandled,
}

impl ConversationStatus {
    pub fn from_bot_enabled(enabled: bool) -> Self {
        if enabled {
            Self::BotEnabled
        } else {
            Self::HumanHandled
        }
    }

    pub fn bot_enabled(self) -> bool {
        self == Self::BotEnabled
    }
}

/// Conversation summary as listed in the sidebar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    /// Last-message preview
    pub content: String,
    pub status: ConversationStatus,
    pub customer_id: String,
    #[serde(default)]
    pub unread: bool,
}

/// Customer profile shown in the contact panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
