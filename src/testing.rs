//! Mock implementations for testing
//!
//! These mocks enable session tests without a real socket or HTTP backend.
//! Collaborator calls can be held open with `hold_*` so tests decide the
//! order in which they complete.

use crate::collaborators::{ConversationSource, CustomerDirectory, StatusCommands};
use crate::error::{CollaboratorError, TransportError};
use crate::model::{Conversation, ConversationStatus, Customer, DeliveryState, Message, SenderKind};
use crate::transport::{InboundFrame, Link, OutboundMessage, Transport};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// Fixtures
// ============================================================================

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

fn kind_for(sender_id: &str) -> SenderKind {
    match sender_id {
        "agent" => SenderKind::Agent,
        "bot" => SenderKind::Bot,
        _ => SenderKind::Customer,
    }
}

/// Confirmed message stamped now
pub fn sample_message(id: &str, conversation_id: &str, sender_id: &str, content: &str) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        sender_kind: kind_for(sender_id),
        content: content.to_string(),
        created_at: Utc::now(),
        quoted_message_id: None,
        delivery_state: DeliveryState::Confirmed,
        client_message_id: None,
    }
}

/// Confirmed message stamped `offset_secs` after a fixed base time
pub fn sample_message_at(
    id: &str,
    conversation_id: &str,
    sender_id: &str,
    content: &str,
    offset_secs: i64,
) -> Message {
    Message {
        created_at: base_time() + chrono::Duration::seconds(offset_secs),
        ..sample_message(id, conversation_id, sender_id, content)
    }
}

pub fn sample_conversation(id: &str, customer_id: &str) -> Conversation {
    Conversation {
        id: id.to_string(),
        content: String::new(),
        status: ConversationStatus::BotEnabled,
        customer_id: customer_id.to_string(),
        unread: false,
    }
}

pub fn sample_customer(id: &str, name: &str) -> Customer {
    Customer {
        id: id.to_string(),
        name: name.to_string(),
        email: Some(format!("{id}@example.com")),
        phone: None,
        notes: None,
    }
}

// ============================================================================
// Mock Transport
// ============================================================================

#[derive(Default)]
struct MockTransportInner {
    opens: Mutex<u32>,
    failures: Mutex<VecDeque<String>>,
    /// Server side of the current link
    peer: Mutex<Option<mpsc::Sender<InboundFrame>>>,
    outbound: tokio::sync::Mutex<Option<mpsc::Receiver<OutboundMessage>>>,
}

/// Transport whose server side is driven by the test
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockTransportInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail
    pub fn fail_next_open(&self, reason: &str) {
        self.inner
            .failures
            .lock()
            .unwrap()
            .push_back(reason.to_string());
    }

    pub fn open_count(&self) -> u32 {
        *self.inner.opens.lock().unwrap()
    }

    fn peer(&self) -> mpsc::Sender<InboundFrame> {
        self.inner
            .peer
            .lock()
            .unwrap()
            .clone()
            .expect("no link has been opened")
    }

    /// Deliver a message from the server
    pub async fn push_inbound(&self, message: Message) {
        self.peer()
            .send(InboundFrame::Message(message))
            .await
            .expect("link already released");
    }

    /// Simulate the server going away
    pub fn close_peer(&self) {
        self.inner.peer.lock().unwrap().take();
    }

    /// Next message the client sent
    pub async fn next_outbound(&self) -> OutboundMessage {
        let mut guard = self.inner.outbound.lock().await;
        let rx = guard.as_mut().expect("no link has been opened");
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("link closed")
    }

    /// Wait until the client dropped its end of the current link
    pub async fn wait_released(&self) -> bool {
        let peer = self.peer();
        tokio::time::timeout(Duration::from_secs(2), peer.closed())
            .await
            .is_ok()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _endpoint: &str) -> Result<Link, TransportError> {
        *self.inner.opens.lock().unwrap() += 1;
        if let Some(reason) = self.inner.failures.lock().unwrap().pop_front() {
            return Err(TransportError::Open(reason));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(32);
        let (inbound_tx, inbound_rx) = mpsc::channel(32);
        *self.inner.peer.lock().unwrap() = Some(inbound_tx);
        *self.inner.outbound.lock().await = Some(outbound_rx);

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

// ============================================================================
// Mock Backend
// ============================================================================

type Gate = oneshot::Receiver<()>;

#[derive(Default)]
struct MockBackendInner {
    conversations: Mutex<Vec<Conversation>>,
    histories: Mutex<HashMap<String, Vec<Message>>>,
    customers: Mutex<HashMap<String, Customer>>,
    status_failures: Mutex<VecDeque<CollaboratorError>>,
    history_gates: Mutex<HashMap<String, Gate>>,
    status_gates: Mutex<VecDeque<Gate>>,
    /// Record of status commands issued
    status_calls: Mutex<Vec<(String, bool)>>,
    history_calls: Mutex<Vec<String>>,
    customer_calls: Mutex<Vec<String>>,
}

/// In-memory conversation service implementing every collaborator trait
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<MockBackendInner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversation(self, conversation: Conversation) -> Self {
        self.inner.conversations.lock().unwrap().push(conversation);
        self
    }

    pub fn with_history(self, conversation_id: &str, messages: Vec<Message>) -> Self {
        self.inner
            .histories
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), messages);
        self
    }

    pub fn with_customer(self, customer: Customer) -> Self {
        self.inner
            .customers
            .lock()
            .unwrap()
            .insert(customer.id.clone(), customer);
        self
    }

    /// Make the next status command fail
    pub fn fail_next_status(&self, error: CollaboratorError) {
        self.inner.status_failures.lock().unwrap().push_back(error);
    }

    /// Hold the next history fetch for `conversation_id` until the returned
    /// sender fires
    pub fn hold_history(&self, conversation_id: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .history_gates
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), rx);
        tx
    }

    /// Hold the next status command until the returned sender fires
    pub fn hold_status(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.status_gates.lock().unwrap().push_back(rx);
        tx
    }

    pub fn status_calls(&self) -> Vec<(String, bool)> {
        self.inner.status_calls.lock().unwrap().clone()
    }

    pub fn history_calls(&self) -> Vec<String> {
        self.inner.history_calls.lock().unwrap().clone()
    }

    pub fn customer_calls(&self) -> Vec<String> {
        self.inner.customer_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationSource for MockBackend {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, CollaboratorError> {
        Ok(self.inner.conversations.lock().unwrap().clone())
    }

    async fn fetch_history(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, CollaboratorError> {
        self.inner
            .history_calls
            .lock()
            .unwrap()
            .push(conversation_id.to_string());
        let gate = self.inner.history_gates.lock().unwrap().remove(conversation_id);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(self
            .inner
            .histories
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl StatusCommands for MockBackend {
    async fn set_bot_enabled(
        &self,
        conversation_id: &str,
        enabled: bool,
    ) -> Result<(), CollaboratorError> {
        self.inner
            .status_calls
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), enabled));
        let gate = self.inner.status_gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match self.inner.status_failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CustomerDirectory for MockBackend {
    async fn lookup_customer(&self, customer_id: &str) -> Result<Customer, CollaboratorError> {
        self.inner
            .customer_calls
            .lock()
            .unwrap()
            .push(customer_id.to_string());
        self.inner
            .customers
            .lock()
            .unwrap()
            .get(customer_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::not_found(format!("customer {customer_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend_serves_history() {
        let backend = MockBackend::new().with_history(
            "c1",
            vec![sample_message("m1", "c1", "cust", "hi")],
        );

        let history = backend.fetch_history("c1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(backend.fetch_history("c2").await.unwrap().is_empty());
        assert_eq!(backend.history_calls(), vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_mock_backend_status_failure_is_consumed_once() {
        let backend = MockBackend::new();
        backend.fail_next_status(CollaboratorError::rejected("nope"));

        assert!(backend.set_bot_enabled("c1", false).await.is_err());
        assert!(backend.set_bot_enabled("c1", false).await.is_ok());
        assert_eq!(backend.status_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_transport_round_trip() {
        let transport = MockTransport::new();
        let mut link = transport.open("ws://test").await.unwrap();

        transport
            .push_inbound(sample_message("m1", "c1", "cust", "hi"))
            .await;
        assert!(matches!(
            link.inbound.recv().await,
            Some(InboundFrame::Message(_))
        ));

        drop(link);
        assert!(transport.wait_released().await);
    }
}
