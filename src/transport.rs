//! Persistent messaging transport
//!
//! A `Transport` opens a `Link`: a pair of channels to and from the messaging
//! endpoint. Whoever holds the `Link` holds the connection; dropping it
//! releases the underlying socket.

mod websocket;
pub mod wire;

pub use websocket::WebSocketTransport;

use crate::error::TransportError;
use crate::model::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The `send` command accepted by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub conversation_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_message_id: Option<String>,
    /// Lets the server echo the optimistic entry's id back
    pub client_message_id: String,
}

impl OutboundMessage {
    /// Build the outbound command for an optimistic message
    pub fn from_optimistic(message: &Message) -> Self {
        Self {
            conversation_id: message.conversation_id.clone(),
            content: message.content.clone(),
            quoted_message_id: message.quoted_message_id.clone(),
            client_message_id: message.id.clone(),
        }
    }
}

/// Frames delivered from a live link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Message(Message),
    /// Fatal transport error; the link is finished after this
    Error(String),
}

/// A live connection
///
/// The inbound channel closing means the peer went away.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<OutboundMessage>,
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// Opens links to a messaging endpoint
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish a link. Errors here are reported to subscribers as a
    /// `disconnected` event, never thrown to the caller of `connect`.
    async fn open(&self, endpoint: &str) -> Result<Link, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn open(&self, endpoint: &str) -> Result<Link, TransportError> {
        (**self).open(endpoint).await
    }
}
