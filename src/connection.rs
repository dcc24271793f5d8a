//! Connection Manager
//!
//! Owns the single persistent connection of a session. State changes go
//! through a pure transition function (`transition`); the manager executes
//! the resulting effects and is the only writer of the connection state.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{ConnectionEvent, Effect};
pub use event::Event;
pub use state::{ConnState, ConnectionState, LinkId};
pub use transition::transition;

use crate::error::TransportError;
use crate::model::Message;
use crate::transport::{InboundFrame, OutboundMessage, Transport};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

const OUTBOUND_QUEUE: usize = 64;
const SUBSCRIBER_BUFFER: usize = 128;

/// Callback from a link task, fed back through `ConnectionManager::handle_signal`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    Opened { link: LinkId },
    Closed { link: LinkId, reason: String },
    Inbound { link: LinkId, message: Message },
}

/// The transport task backing the current link
///
/// Dropping it cancels the task, and the task owns the transport, so the
/// connection is released on every exit path.
struct LiveLink {
    id: LinkId,
    cancel: CancellationToken,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl Drop for LiveLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Manages the session's persistent connection
pub struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    state: ConnState,
    next_link: u64,
    live: Option<LiveLink>,
    signal_tx: mpsc::UnboundedSender<TransportSignal>,
    events_tx: broadcast::Sender<ConnectionEvent>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager; the receiver yields transport callbacks that must be
    /// passed back to `handle_signal` in arrival order.
    pub fn new(transport: T) -> (Self, mpsc::UnboundedReceiver<TransportSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        let manager = Self {
            transport: Arc::new(transport),
            state: ConnState::Idle,
            next_link: 0,
            live: None,
            signal_tx,
            events_tx,
        };
        (manager, signal_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state.phase()
    }

    /// Reason reported by the transport for the last disconnect
    pub fn last_disconnect_reason(&self) -> Option<&str> {
        match &self.state {
            ConnState::Disconnected { reason } => reason.as_deref(),
            _ => None,
        }
    }

    /// Subscribe to connection events; drop the receiver to unsubscribe
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    /// Start connecting to `endpoint`
    ///
    /// When a connection is already live (connecting or connected) its link is
    /// returned and nothing new is opened. Transport failures are reported
    /// later as a `Disconnected` event.
    pub fn connect(&mut self, endpoint: &str) -> LinkId {
        if let Some(link) = self.state.link() {
            tracing::debug!(%link, "Connect requested while live, reusing link");
            return link;
        }
        self.next_link += 1;
        let link = LinkId(self.next_link);
        self.apply(Event::ConnectRequested {
            link,
            endpoint: endpoint.to_string(),
        });
        link
    }

    /// Release the transport; always safe to call
    pub fn disconnect(&mut self) -> Vec<ConnectionEvent> {
        self.apply(Event::DisconnectRequested)
    }

    /// Apply a transport callback
    pub fn handle_signal(&mut self, signal: TransportSignal) -> Vec<ConnectionEvent> {
        match signal {
            TransportSignal::Opened { link } => self.apply(Event::TransportOpened { link }),
            TransportSignal::Closed { link, reason } => {
                self.apply(Event::TransportClosed { link, reason })
            }
            TransportSignal::Inbound { link, message } => {
                if self.state != (ConnState::Connected { link }) {
                    tracing::debug!(%link, "Dropping message from a link that is not current");
                    return vec![];
                }
                let event = ConnectionEvent::MessageReceived { message };
                let _ = self.events_tx.send(event.clone());
                vec![event]
            }
        }
    }

    /// Send a message over the current link
    pub fn transmit(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let ConnState::Connected { link } = &self.state else {
            return Err(TransportError::NotConnected);
        };
        let live = self
            .live
            .as_ref()
            .filter(|live| live.id == *link)
            .ok_or(TransportError::NotConnected)?;
        live.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::Closed("outbound queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                TransportError::Closed("transport task has stopped".to_string())
            }
        })
    }

    fn apply(&mut self, event: Event) -> Vec<ConnectionEvent> {
        let result = transition(&self.state, event);
        if result.new_state != self.state {
            tracing::info!(
                from = ?self.state.phase(),
                to = ?result.new_state.phase(),
                "Connection state changed"
            );
        }
        self.state = result.new_state;

        let mut notified = Vec::new();
        for effect in result.effects {
            match effect {
                Effect::OpenTransport { link, endpoint } => self.open_link(link, endpoint),
                Effect::CloseTransport { link } => self.close_link(link),
                Effect::Notify(event) => {
                    let _ = self.events_tx.send(event.clone());
                    notified.push(event);
                }
            }
        }
        notified
    }

    fn open_link(&mut self, link: LinkId, endpoint: String) {
        // Replaces, never duplicates
        if let Some(old) = self.live.take() {
            tracing::warn!(old = %old.id, new = %link, "Replacing a live link");
        }

        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        tokio::spawn(run_link(
            Arc::clone(&self.transport),
            endpoint,
            link,
            cancel.clone(),
            outbound_rx,
            self.signal_tx.clone(),
        ));
        self.live = Some(LiveLink {
            id: link,
            cancel,
            outbound: outbound_tx,
        });
    }

    fn close_link(&mut self, link: LinkId) {
        if self.live.as_ref().is_some_and(|live| live.id == link) {
            tracing::debug!(%link, "Releasing transport");
            self.live = None;
        }
    }
}

/// Body of a link task: open, pump frames, report the outcome
async fn run_link<T: Transport>(
    transport: Arc<T>,
    endpoint: String,
    link: LinkId,
    cancel: CancellationToken,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    signals: mpsc::UnboundedSender<TransportSignal>,
) {
    let opened = tokio::select! {
        () = cancel.cancelled() => return,
        opened = transport.open(&endpoint) => opened,
    };

    let mut channel = match opened {
        Ok(channel) => channel,
        Err(e) => {
            tracing::warn!(%link, error = %e, "Transport failed to open");
            let _ = signals.send(TransportSignal::Closed {
                link,
                reason: e.to_string(),
            });
            return;
        }
    };
    if cancel.is_cancelled() {
        return;
    }
    let _ = signals.send(TransportSignal::Opened { link });

    let reason = loop {
        tokio::select! {
            biased;
            // The manager already moved on; dropping `channel` releases it
            () = cancel.cancelled() => return,
            frame = outbound.recv() => {
                let Some(frame) = frame else { return };
                if channel.outbound.send(frame).await.is_err() {
                    break "transport stopped accepting messages".to_string();
                }
            }
            inbound = channel.inbound.recv() => match inbound {
                Some(InboundFrame::Message(message)) => {
                    let _ = signals.send(TransportSignal::Inbound { link, message });
                }
                Some(InboundFrame::Error(e)) => break e,
                None => break "connection closed by peer".to_string(),
            }
        }
    };

    tracing::info!(%link, %reason, "Transport closed");
    let _ = signals.send(TransportSignal::Closed { link, reason });
}
