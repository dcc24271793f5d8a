//! Session runtime
//!
//! Owns one connection, the message store, quote linker, conversation
//! directory and contact panel for a signed-in agent. Every mutation happens
//! inside `step()` or a command method on the owning task; async work (REST
//! calls, delivery timeouts) runs in spawned jobs whose completions come back
//! through the session inbox. Transport callbacks arrive on their own channel
//! and are applied in arrival order.


use crate::collaborators::Backend;
use crate::config::ChatConfig;
use crate::connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, LinkId, TransportSignal,
};
use crate::contact_panel::{Binding, ContactPanel, CustomerLookup, PanelView};
use crate::directory::{ConversationDirectory, StatusChange};
use crate::error::{CollaboratorError, SessionError, SessionResult};
use crate::message_store::{LoadOutcome, LoadTicket, MessageStore, Reconciliation};
use crate::model::{Conversation, Customer, Message};
use crate::quote::{QuoteLinker, QuotePreview};
use crate::transport::{OutboundMessage, Transport};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

const UPDATE_BUFFER: usize = 256;

/// Notification to session subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    ConnectionChanged {
        state: ConnectionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MessagesChanged {
        conversation_id: String,
        messages: Vec<Message>,
    },
    ConversationsChanged {
        conversations: Vec<Conversation>,
    },
    #[serde(rename_all = "camelCase")]
    QuoteChanged {
        quoted_message_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ContactPanelChanged {
        open: bool,
        binding: Binding,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes_draft: Option<String>,
    },
    Error {
        message: String,
    },
}

/// Completion of a spawned job
#[derive(Debug)]
enum SessionInput {
    ConversationsLoaded(Result<Vec<Conversation>, CollaboratorError>),
    HistoryLoaded {
        ticket: LoadTicket,
        result: Result<Vec<Message>, CollaboratorError>,
    },
    StatusFinished {
        change: StatusChange,
        result: Result<(), CollaboratorError>,
    },
    CustomerLoaded {
        lookup: CustomerLookup,
        result: Result<Customer, CollaboratorError>,
    },
    SendTimedOut {
        client_id: String,
    },
}

/// A send waiting for its server echo
struct PendingSend {
    conversation_id: String,
    timer: CancellationToken,
}

/// Chat session state engine
pub struct Session<T: Transport, B: Backend + 'static> {
    config: ChatConfig,
    backend: Arc<B>,
    connection: ConnectionManager<T>,
    signals: mpsc::UnboundedReceiver<TransportSignal>,
    store: MessageStore,
    quotes: QuoteLinker,
    directory: ConversationDirectory,
    panel: ContactPanel,
    inbox_tx: mpsc::UnboundedSender<SessionInput>,
    inbox_rx: mpsc::UnboundedReceiver<SessionInput>,
    updates_tx: broadcast::Sender<SessionUpdate>,
    /// Cancels the in-flight history fetch of the previous selection
    history_cancel: Option<CancellationToken>,
    pending_sends: HashMap<String, PendingSend>,
    /// Parent of every job token; cancelled on drop
    jobs: CancellationToken,
}

impl<T: Transport, B: Backend + 'static> Session<T, B> {
    pub fn new(config: ChatConfig, transport: T, backend: B) -> Self {
        let (connection, signals) = ConnectionManager::new(transport);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (updates_tx, _) = broadcast::channel(UPDATE_BUFFER);
        let store = MessageStore::new(config.agent_id.clone());
        Self {
            config,
            backend: Arc::new(backend),
            connection,
            signals,
            store,
            quotes: QuoteLinker::new(),
            directory: ConversationDirectory::new(),
            panel: ContactPanel::new(),
            inbox_tx,
            inbox_rx,
            updates_tx,
            history_cancel: None,
            pending_sends: HashMap::new(),
            jobs: CancellationToken::new(),
        }
    }

    /// Subscribe to session updates; drop the receiver to unsubscribe
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates_tx.subscribe()
    }

    /// Wait for the next transport callback or job completion and apply it
    ///
    /// Cancel-safe: an input is only taken off a channel in the same poll
    /// that applies it.
    pub async fn step(&mut self) {
        tokio::select! {
            biased;
            Some(signal) = self.signals.recv() => self.on_signal(signal),
            Some(input) = self.inbox_rx.recv() => self.on_input(input),
        }
    }

    // ==================== Reads ====================

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn conversations(&self) -> &[Conversation] {
        self.directory.list()
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.directory.active()
    }

    /// Messages of the active conversation
    pub fn messages(&self) -> Vec<&Message> {
        self.store.active_messages()
    }

    pub fn resolve_quote(&self, message_id: &str) -> Option<&Message> {
        self.quotes.resolve(&self.store, message_id)
    }

    pub fn quote_preview(&self) -> QuotePreview<'_> {
        self.quotes.preview(&self.store)
    }

    pub fn contact_panel(&self) -> Option<PanelView<'_>> {
        self.panel.view()
    }

    // ==================== Connection ====================

    pub fn connect(&mut self) -> LinkId {
        let link = self.connection.connect(&self.config.endpoint);
        self.publish_connection();
        link
    }

    pub fn disconnect(&mut self) {
        let events = self.connection.disconnect();
        self.on_connection_events(events);
    }

    // ==================== Conversations ====================

    pub fn refresh_conversations(&mut self) {
        let backend = Arc::clone(&self.backend);
        self.spawn_job(self.jobs.child_token(), async move {
            SessionInput::ConversationsLoaded(backend.list_conversations().await)
        });
    }

    /// Switch the active conversation and load its history
    ///
    /// A history fetch still running for the previous selection is cancelled,
    /// and its ticket goes stale so a late answer cannot land.
    pub fn select(&mut self, conversation_id: &str) -> SessionResult<()> {
        self.directory.select(conversation_id)?;
        tracing::info!(conversation_id, "Conversation selected");

        if self.quotes.quoted().is_some() {
            self.quotes.on_conversation_changed();
            self.publish_quote();
        }

        if let Some(previous) = self.history_cancel.take() {
            previous.cancel();
        }
        let ticket = self.store.begin_load(conversation_id);
        let cancel = self.jobs.child_token();
        self.history_cancel = Some(cancel.clone());
        let backend = Arc::clone(&self.backend);
        let id = conversation_id.to_string();
        self.spawn_job(cancel, async move {
            let result = backend.fetch_history(&id).await;
            SessionInput::HistoryLoaded { ticket, result }
        });

        if let Some(lookup) = self.panel.rebind(&self.directory, Some(conversation_id)) {
            self.spawn_lookup(lookup);
            self.publish_panel();
        }
        self.publish_conversations();
        self.publish_messages(conversation_id);
        Ok(())
    }

    /// Flip bot handling, reverting if the service refuses
    pub fn update_status_bot(&mut self, conversation_id: &str, enabled: bool) -> SessionResult<()> {
        let change = self.directory.begin_status_change(conversation_id, enabled)?;
        tracing::info!(conversation_id, enabled, "Updating bot status");
        let backend = Arc::clone(&self.backend);
        self.spawn_job(self.jobs.child_token(), async move {
            let result = backend
                .set_bot_enabled(&change.conversation_id, enabled)
                .await;
            SessionInput::StatusFinished { change, result }
        });
        self.publish_conversations();
        Ok(())
    }

    // ==================== Compose ====================

    pub fn set_quote(&mut self, message_id: &str) -> SessionResult<()> {
        let conversation_id = self
            .store
            .active_conversation()
            .ok_or(SessionError::NoActiveConversation)?;
        if self.store.get(conversation_id, message_id).is_none() {
            return Err(SessionError::UnknownMessage(message_id.to_string()));
        }
        self.quotes.set_quote(message_id);
        self.publish_quote();
        Ok(())
    }

    pub fn clear_quote(&mut self) {
        self.quotes.clear_quote();
        self.publish_quote();
    }

    /// Send a reply in the active conversation
    ///
    /// The message is visible immediately as pending. Delivery failures do
    /// not error; they show up as `failed` on the returned entry and in later
    /// updates.
    pub fn send(&mut self, content: &str) -> SessionResult<Message> {
        let had_quote = self.quotes.quoted().is_some();
        let message = self.quotes.send_with_quote(&mut self.store, content)?;
        if had_quote {
            self.publish_quote();
        }
        Ok(self.deliver(message))
    }

    /// Send a failed message again
    pub fn retry(&mut self, client_id: &str) -> SessionResult<Message> {
        let message = self.store.retry(client_id)?;
        tracing::info!(client_id, "Retrying message");
        Ok(self.deliver(message))
    }

    /// Drop a failed message
    pub fn discard(&mut self, client_id: &str) -> SessionResult<()> {
        let message = self.store.discard(client_id)?;
        self.publish_messages(&message.conversation_id);
        Ok(())
    }

    fn deliver(&mut self, message: Message) -> Message {
        let conversation_id = message.conversation_id.clone();
        match self
            .connection
            .transmit(OutboundMessage::from_optimistic(&message))
        {
            Ok(()) => self.arm_send_timeout(&message),
            Err(e) => {
                self.store.mark_failed(&message.id);
                self.publish(SessionUpdate::Error {
                    message: format!("Message not delivered: {e}"),
                });
            }
        }
        self.publish_messages(&conversation_id);
        self.store
            .get(&conversation_id, &message.id)
            .cloned()
            .unwrap_or(message)
    }

    fn arm_send_timeout(&mut self, message: &Message) {
        let timer = self.jobs.child_token();
        let client_id = message.id.clone();
        let timeout = self.config.send_timeout;
        self.spawn_job(timer.clone(), async move {
            tokio::time::sleep(timeout).await;
            SessionInput::SendTimedOut { client_id }
        });
        let previous = self.pending_sends.insert(
            message.id.clone(),
            PendingSend {
                conversation_id: message.conversation_id.clone(),
                timer,
            },
        );
        if let Some(previous) = previous {
            previous.timer.cancel();
        }
    }

    fn settle_send(&mut self, client_id: &str) {
        if let Some(pending) = self.pending_sends.remove(client_id) {
            pending.timer.cancel();
        }
    }

    // ==================== Contact panel ====================

    pub fn open_contact_panel(&mut self) -> SessionResult<()> {
        let conversation_id = self
            .directory
            .active_id()
            .ok_or(SessionError::NoActiveConversation)?
            .to_string();
        if let Some(lookup) = self.panel.open(&self.directory, &conversation_id)? {
            self.spawn_lookup(lookup);
        }
        self.publish_panel();
        Ok(())
    }

    pub fn close_contact_panel(&mut self) {
        self.panel.close();
        self.publish_panel();
    }

    /// Start editing the bound customer's notes; false unless a profile is
    /// loaded and the panel is open
    pub fn begin_notes_edit(&mut self) -> bool {
        let started = self.panel.begin_edit();
        if started {
            self.publish_panel();
        }
        started
    }

    pub fn update_notes_edit(&mut self, text: &str) -> bool {
        self.panel.update_edit(text)
    }

    fn spawn_lookup(&self, lookup: CustomerLookup) {
        let backend = Arc::clone(&self.backend);
        self.spawn_job(self.jobs.child_token(), async move {
            let result = backend.lookup_customer(&lookup.customer_id).await;
            SessionInput::CustomerLoaded { lookup, result }
        });
    }

    // ==================== Inputs ====================

    fn on_signal(&mut self, signal: TransportSignal) {
        let events = self.connection.handle_signal(signal);
        self.on_connection_events(events);
    }

    fn on_connection_events(&mut self, events: Vec<ConnectionEvent>) {
        for event in events {
            match event {
                ConnectionEvent::Connected => self.publish_connection(),
                ConnectionEvent::Disconnected { .. } => {
                    self.fail_pending_sends();
                    self.publish_connection();
                }
                ConnectionEvent::MessageReceived { message } => self.on_message(message),
            }
        }
    }

    /// Sends still awaiting an echo when the link dropped will never get one
    fn fail_pending_sends(&mut self) {
        let mut touched = Vec::new();
        for (client_id, pending) in self.pending_sends.drain() {
            pending.timer.cancel();
            if self.store.mark_failed(&client_id) {
                touched.push(pending.conversation_id);
            }
        }
        touched.sort_unstable();
        touched.dedup();
        for conversation_id in touched {
            self.publish_messages(&conversation_id);
        }
    }

    fn on_message(&mut self, message: Message) {
        let conversation_id = message.conversation_id.clone();
        let from_local_agent = self.store.is_local_sender(&message);
        let preview = message.clone();

        match self.store.reconcile(message) {
            Reconciliation::Confirmed { client_id } | Reconciliation::Collapsed { client_id } => {
                self.settle_send(&client_id);
            }
            Reconciliation::Appended | Reconciliation::Duplicate => {}
        }
        self.publish_messages(&conversation_id);

        if self.directory.note_message(&preview, from_local_agent) {
            self.publish_conversations();
        }
    }

    fn on_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::ConversationsLoaded(Ok(conversations)) => {
                self.directory.replace(conversations);
                self.publish_conversations();
            }
            SessionInput::ConversationsLoaded(Err(e)) => {
                tracing::warn!(
                    error = %e,
                    retryable = e.kind.is_retryable(),
                    "Failed to load conversations"
                );
                self.publish(SessionUpdate::Error {
                    message: format!("Failed to load conversations: {e}"),
                });
            }
            SessionInput::HistoryLoaded { ticket, result } => self.on_history(ticket, result),
            SessionInput::StatusFinished { change, result } => match result {
                Ok(()) => {
                    if self.directory.settle_status_change(&change) {
                        self.publish_conversations();
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %change.conversation_id,
                        error = %e,
                        retryable = e.kind.is_retryable(),
                        "Status command failed"
                    );
                    if self.directory.revert_status_change(&change) {
                        self.publish_conversations();
                    }
                    self.publish(SessionUpdate::Error {
                        message: format!(
                            "Failed to update status of {}: {e}",
                            change.conversation_id
                        ),
                    });
                }
            },
            SessionInput::CustomerLoaded { lookup, result } => {
                if self.panel.bind_result(&lookup, result) {
                    self.publish_panel();
                }
            }
            SessionInput::SendTimedOut { client_id } => {
                let Some(pending) = self.pending_sends.remove(&client_id) else {
                    return;
                };
                if self.store.mark_failed(&client_id) {
                    tracing::warn!(%client_id, "Send timed out waiting for confirmation");
                    self.publish_messages(&pending.conversation_id);
                }
            }
        }
    }

    fn on_history(&mut self, ticket: LoadTicket, result: Result<Vec<Message>, CollaboratorError>) {
        if !self.store.is_current(&ticket) {
            tracing::debug!(conversation_id = %ticket.conversation_id, "Ignoring stale history");
            return;
        }
        self.history_cancel = None;
        match result {
            Ok(messages) => {
                if self.store.finish_load(&ticket, messages) == LoadOutcome::Applied {
                    self.publish_messages(&ticket.conversation_id);
                }
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id = %ticket.conversation_id,
                    error = %e,
                    retryable = e.kind.is_retryable(),
                    "Failed to load history"
                );
                self.publish(SessionUpdate::Error {
                    message: format!("Failed to load messages: {e}"),
                });
            }
        }
    }

    // ==================== Jobs & updates ====================

    fn spawn_job<F>(&self, cancel: CancellationToken, job: F)
    where
        F: Future<Output = SessionInput> + Send + 'static,
    {
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                input = job => {
                    let _ = inbox.send(input);
                }
            }
        });
    }

    fn publish(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.updates_tx.send(update);
    }

    fn publish_connection(&self) {
        self.publish(SessionUpdate::ConnectionChanged {
            state: self.connection.state(),
            reason: self.connection.last_disconnect_reason().map(str::to_string),
        });
    }

    fn publish_messages(&self, conversation_id: &str) {
        self.publish(SessionUpdate::MessagesChanged {
            conversation_id: conversation_id.to_string(),
            messages: self
                .store
                .list(conversation_id)
                .into_iter()
                .cloned()
                .collect(),
        });
    }

    fn publish_conversations(&self) {
        self.publish(SessionUpdate::ConversationsChanged {
            conversations: self.directory.list().to_vec(),
        });
    }

    fn publish_quote(&self) {
        self.publish(SessionUpdate::QuoteChanged {
            quoted_message_id: self.quotes.quoted().map(str::to_string),
        });
    }

    fn publish_panel(&self) {
        self.publish(SessionUpdate::ContactPanelChanged {
            open: self.panel.is_open(),
            binding: self.panel.binding().clone(),
            notes_draft: self.panel.notes_draft().map(str::to_string),
        });
    }
}

impl<T: Transport, B: Backend + 'static> Drop for Session<T, B> {
    fn drop(&mut self) {
        self.jobs.cancel();
    }
}
