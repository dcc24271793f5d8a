//! WebSocket transport

use super::wire::{self, ServerFrame};
use super::{InboundFrame, Link, OutboundMessage, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Opens WebSocket links speaking the JSON wire protocol
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    channel_capacity: usize,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &str) -> Result<Link, TransportError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;
        tracing::debug!(endpoint, "WebSocket opened");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) =
            mpsc::channel::<OutboundMessage>(self.channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundFrame>(self.channel_capacity);

        // The socket lives in this task; it ends when either side lets go
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        let Some(message) = outbound else {
                            // Link dropped by its owner
                            let _ = ws_write.send(WsMessage::Close(None)).await;
                            break;
                        };
                        let text = match wire::encode_send(&message) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to encode outbound message");
                                continue;
                            }
                        };
                        if let Err(e) = ws_write.send(WsMessage::Text(text.into())).await {
                            let _ = inbound_tx.send(InboundFrame::Error(e.to_string())).await;
                            break;
                        }
                    }
                    incoming = ws_read.next() => match incoming {
                        Some(Ok(WsMessage::Text(text))) => match wire::decode_server(text.as_str()) {
                            Ok(ServerFrame::ReceiveMessage { message }) => {
                                if inbound_tx.send(InboundFrame::Message(message)).await.is_err() {
                                    break;
                                }
                            }
                            Ok(ServerFrame::Error { message }) => {
                                tracing::warn!(error = %message, "Server reported an error");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Skipping malformed frame");
                            }
                        },
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = inbound_tx.send(InboundFrame::Error(e.to_string())).await;
                            break;
                        }
                    }
                }
            }
            tracing::debug!("WebSocket task finished");
        });

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
