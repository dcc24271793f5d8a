//! JSON wire protocol spoken over the messaging socket

use super::OutboundMessage;
use crate::error::TransportError;
use crate::model::Message;
use serde::{Deserialize, Serialize};

/// Frames sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    SendMessage {
        #[serde(flatten)]
        message: OutboundMessage,
    },
}

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ReceiveMessage { message: Message },
    /// Application-level error notice; the socket stays open
    Error { message: String },
}

pub fn encode_send(message: &OutboundMessage) -> Result<String, TransportError> {
    let frame = ClientFrame::SendMessage {
        message: message.clone(),
    };
    Ok(serde_json::to_string(&frame)?)
}

pub fn decode_server(text: &str) -> Result<ServerFrame, TransportError> {
    serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))
}
