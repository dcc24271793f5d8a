//! Message Store
//!
//! Ordered, deduplicated messages per conversation. Local sends are shown
//! immediately as pending entries and later supplanted in place by the
//! server-confirmed copy, so the final state matches what the server would
//! replay on reload.
//!
//! Entries are kept sorted by `(created_at, insertion sequence)`. An entry keeps
//! its insertion sequence for life, including across confirmation, which is
//! what "preserve its position" means when timestamps tie.

#[cfg(test)]
mod proptests;

use crate::error::{SessionError, SessionResult};
use crate::model::{DeliveryState, Message, SenderKind};
use chrono::Utc;
use std::collections::HashMap;

const CLIENT_ID_PREFIX: &str = "local-";

/// Generation tag for an initial-history load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub conversation_id: String,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// A newer selection superseded this load; nothing changed
    Stale,
}

/// What `reconcile` did with a server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// A pending entry was confirmed in place
    Confirmed { client_id: String },
    /// No local entry matched; appended as new
    Appended,
    /// Already present under its durable id; refreshed
    Duplicate,
    /// Already present under its durable id and a pending copy was also
    /// waiting for it; the pending copy was dropped
    Collapsed { client_id: String },
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    /// Load generation current when the entry last came over the socket or
    /// was sent; 0 for history entries
    arrived: u64,
    message: Message,
}

#[derive(Debug, Default)]
struct Partition {
    entries: Vec<Entry>,
    /// Confirmed client id -> durable id
    aliases: HashMap<String, String>,
}

impl Partition {
    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.message.id == id)
    }

    fn resolve_id<'a>(&'a self, id: &'a str) -> &'a str {
        self.aliases.get(id).map_or(id, String::as_str)
    }

    fn get(&self, id: &str) -> Option<&Message> {
        let id = self.resolve_id(id);
        self.entries
            .iter()
            .find(|e| e.message.id == id)
            .map(|e| &e.message)
    }

    fn insert_sorted(&mut self, entry: Entry) {
        let key = (entry.message.created_at, entry.seq);
        let at = self
            .entries
            .partition_point(|e| (e.message.created_at, e.seq) <= key);
        self.entries.insert(at, entry);
    }

    /// Oldest pending entry from this sender with identical content
    fn find_content_match(&self, incoming: &Message) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.message.is_pending()
                    && e.message.sender_id == incoming.sender_id
                    && e.message.content == incoming.content
            })
            .min_by_key(|(_, e)| e.seq)
            .map(|(i, _)| i)
    }

    /// Unconfirmed entry named by an echoed client id
    fn find_echo_match(&self, incoming: &Message) -> Option<usize> {
        let client_id = incoming.client_message_id.as_deref()?;
        self.entries
            .iter()
            .position(|e| e.message.id == client_id && e.message.is_unconfirmed())
    }
}

/// Per-conversation message collections for one session
#[derive(Debug)]
pub struct MessageStore {
    agent_id: String,
    partitions: HashMap<String, Partition>,
    /// Unconfirmed client id -> owning conversation
    local_index: HashMap<String, String>,
    active: Option<LoadTicket>,
    next_generation: u64,
    next_seq: u64,
}

impl MessageStore {
    /// Create a store whose optimistic messages are authored by `agent_id`
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            partitions: HashMap::new(),
            local_index: HashMap::new(),
            active: None,
            next_generation: 0,
            next_seq: 0,
        }
    }

    pub fn active_conversation(&self) -> Option<&str> {
        self.active.as_ref().map(|t| t.conversation_id.as_str())
    }

    // ==================== Loading ====================

    /// Make `conversation_id` active and issue a ticket for its history load
    ///
    /// Any ticket issued earlier becomes stale.
    pub fn begin_load(&mut self, conversation_id: &str) -> LoadTicket {
        self.next_generation += 1;
        let ticket = LoadTicket {
            conversation_id: conversation_id.to_string(),
            generation: self.next_generation,
        };
        self.active = Some(ticket.clone());
        ticket
    }

    /// Whether `ticket` belongs to the latest selection
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.active.as_ref() == Some(ticket)
    }

    /// Apply a history load if its ticket is still current
    pub fn finish_load(&mut self, ticket: &LoadTicket, messages: Vec<Message>) -> LoadOutcome {
        if !self.is_current(ticket) {
            tracing::debug!(
                conversation_id = %ticket.conversation_id,
                generation = ticket.generation,
                "Discarding stale history load"
            );
            return LoadOutcome::Stale;
        }
        self.replace(ticket, messages);
        LoadOutcome::Applied
    }

    /// Replace a conversation's sequence and make it active
    ///
    /// Idempotent per conversation id. Local entries that the server has not
    /// confirmed yet are kept.
    pub fn load_initial(&mut self, conversation_id: &str, messages: Vec<Message>) {
        let ticket = self.begin_load(conversation_id);
        self.finish_load(&ticket, messages);
    }

    /// Swap in a history snapshot
    ///
    /// Unconfirmed entries are kept, and so is anything that arrived live
    /// after the load began, since the snapshot may predate it.
    fn replace(&mut self, ticket: &LoadTicket, messages: Vec<Message>) {
        let conversation_id = ticket.conversation_id.as_str();
        let (carried, old_aliases) = match self.partitions.remove(conversation_id) {
            Some(old) => (
                old.entries
                    .into_iter()
                    .filter(|e| e.message.is_unconfirmed() || e.arrived >= ticket.generation)
                    .collect(),
                old.aliases,
            ),
            None => (Vec::new(), HashMap::new()),
        };

        let mut partition = Partition::default();
        for mut message in messages {
            if message.conversation_id != conversation_id {
                tracing::warn!(
                    conversation_id,
                    message_id = %message.id,
                    owner = %message.conversation_id,
                    "Ignoring history entry from another conversation"
                );
                continue;
            }
            if partition.position(&message.id).is_some() {
                continue;
            }
            strip_self_quote(&mut message);
            if let Some(client_id) = message.client_message_id.clone() {
                partition.aliases.insert(client_id, message.id.clone());
            }
            let seq = self.bump_seq();
            partition.insert_sorted(Entry {
                seq,
                arrived: 0,
                message,
            });
        }

        for entry in carried {
            if entry.message.is_unconfirmed() {
                if partition.aliases.contains_key(&entry.message.id) {
                    // History already holds the confirmed copy
                    self.local_index.remove(&entry.message.id);
                    continue;
                }
            } else if let Some(idx) = partition.position(&entry.message.id) {
                inherit_local_fields(&mut partition.entries[idx].message, &entry.message);
                continue;
            }
            partition.insert_sorted(entry);
        }

        for (client_id, durable_id) in old_aliases {
            if partition.position(&durable_id).is_some() {
                partition.aliases.entry(client_id).or_insert(durable_id);
            }
        }

        tracing::debug!(
            conversation_id,
            count = partition.entries.len(),
            "Loaded conversation history"
        );
        self.partitions.insert(conversation_id.to_string(), partition);
    }

    // ==================== Local sends ====================

    /// Create a pending message at the tail of the active conversation
    pub fn append_optimistic(
        &mut self,
        content: &str,
        quoted_message_id: Option<&str>,
    ) -> SessionResult<Message> {
        let conversation_id = self
            .active_conversation()
            .ok_or(SessionError::NoActiveConversation)?
            .to_string();
        let seq = self.bump_seq();
        let partition = self.partitions.entry(conversation_id.clone()).or_default();

        // Keep created_at non-decreasing so the new entry really is the tail
        let now = Utc::now();
        let created_at = partition
            .entries
            .last()
            .map_or(now, |last| last.message.created_at.max(now));
        let quoted_message_id =
            quoted_message_id.map(|id| partition.resolve_id(id).to_string());

        let message = Message {
            id: format!("{CLIENT_ID_PREFIX}{}", uuid::Uuid::new_v4()),
            conversation_id: conversation_id.clone(),
            sender_id: self.agent_id.clone(),
            sender_kind: SenderKind::Agent,
            content: content.to_string(),
            created_at,
            quoted_message_id,
            delivery_state: DeliveryState::Pending,
            client_message_id: None,
        };

        partition.insert_sorted(Entry {
            seq,
            arrived: self.next_generation,
            message: message.clone(),
        });
        self.local_index
            .insert(message.id.clone(), conversation_id);
        tracing::debug!(client_id = %message.id, "Appended optimistic message");
        Ok(message)
    }

    /// Mark a pending entry as failed; returns whether anything changed
    pub fn mark_failed(&mut self, client_id: &str) -> bool {
        let Some(entry) = self.local_entry_mut(client_id) else {
            return false;
        };
        if !entry.message.is_pending() {
            return false;
        }
        entry.message.delivery_state = DeliveryState::Failed;
        tracing::warn!(client_id, "Message delivery failed");
        true
    }

    /// Return a failed entry to pending so it can be sent again
    pub fn retry(&mut self, client_id: &str) -> SessionResult<Message> {
        let entry = self
            .local_entry_mut(client_id)
            .ok_or_else(|| SessionError::UnknownMessage(client_id.to_string()))?;
        if !entry.message.is_failed() {
            return Err(SessionError::NotRetryable(client_id.to_string()));
        }
        entry.message.delivery_state = DeliveryState::Pending;
        Ok(entry.message.clone())
    }

    /// Remove a failed entry
    pub fn discard(&mut self, client_id: &str) -> SessionResult<Message> {
        let conversation_id = self
            .local_index
            .get(client_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownMessage(client_id.to_string()))?;
        let partition = self
            .partitions
            .get_mut(&conversation_id)
            .ok_or_else(|| SessionError::UnknownMessage(client_id.to_string()))?;
        let idx = partition
            .position(client_id)
            .ok_or_else(|| SessionError::UnknownMessage(client_id.to_string()))?;
        if !partition.entries[idx].message.is_failed() {
            return Err(SessionError::NotRetryable(client_id.to_string()));
        }
        let entry = partition.entries.remove(idx);
        self.local_index.remove(client_id);
        Ok(entry.message)
    }

    fn local_entry_mut(&mut self, client_id: &str) -> Option<&mut Entry> {
        let conversation_id = self.local_index.get(client_id)?;
        self.partitions
            .get_mut(conversation_id)?
            .entries
            .iter_mut()
            .find(|e| e.message.id == client_id)
    }

    // ==================== Server messages ====================

    /// Merge a server-confirmed message
    ///
    /// Matching prefers an echoed client id, then falls back to the oldest
    /// pending entry from the same sender with identical content. Anything
    /// that matches nothing is appended: a visible duplicate beats a lost
    /// message.
    pub fn reconcile(&mut self, mut incoming: Message) -> Reconciliation {
        strip_self_quote(&mut incoming);
        incoming.delivery_state = DeliveryState::Confirmed;

        let seq = self.next_seq;
        let arrived = self.next_generation;
        let partition = self
            .partitions
            .entry(incoming.conversation_id.clone())
            .or_default();

        let local_match = partition
            .find_echo_match(&incoming)
            .or_else(|| partition.find_content_match(&incoming));

        // Dedupe by durable id
        if let Some(existing) = partition.position(&incoming.id) {
            let collapsed = local_match.map(|idx| partition.entries.remove(idx));
            // `existing` may have shifted if the removed entry sat before it
            let existing = partition.position(&incoming.id).unwrap_or(existing);
            let current = partition.entries.remove(existing);
            inherit_local_fields(&mut incoming, &current.message);

            let outcome = match collapsed {
                Some(pending) => {
                    let client_id = pending.message.id;
                    if incoming.quoted_message_id.is_none() {
                        incoming.quoted_message_id = pending.message.quoted_message_id;
                    }
                    incoming
                        .client_message_id
                        .get_or_insert_with(|| client_id.clone());
                    partition.aliases.insert(client_id.clone(), incoming.id.clone());
                    self.local_index.remove(&client_id);
                    Reconciliation::Collapsed { client_id }
                }
                None => Reconciliation::Duplicate,
            };
            partition.insert_sorted(Entry {
                seq: current.seq,
                arrived,
                message: incoming,
            });
            return outcome;
        }

        match local_match {
            Some(idx) => {
                let pending = partition.entries.remove(idx);
                let client_id = pending.message.id;
                if incoming.quoted_message_id.is_none() {
                    incoming.quoted_message_id = pending.message.quoted_message_id;
                }
                incoming.client_message_id = Some(client_id.clone());
                partition.aliases.insert(client_id.clone(), incoming.id.clone());
                partition.insert_sorted(Entry {
                    seq: pending.seq,
                    arrived,
                    message: incoming,
                });
                self.local_index.remove(&client_id);
                tracing::debug!(%client_id, "Confirmed optimistic message");
                Reconciliation::Confirmed { client_id }
            }
            None => {
                partition.insert_sorted(Entry {
                    seq,
                    arrived,
                    message: incoming,
                });
                self.next_seq += 1;
                Reconciliation::Appended
            }
        }
    }

    // ==================== Reads ====================

    /// Messages of a conversation, ascending by `created_at`, ties in
    /// insertion order
    pub fn list(&self, conversation_id: &str) -> Vec<&Message> {
        self.partitions
            .get(conversation_id)
            .map(|p| p.entries.iter().map(|e| &e.message).collect())
            .unwrap_or_default()
    }

    /// `list` for the active conversation
    pub fn active_messages(&self) -> Vec<&Message> {
        self.active_conversation()
            .map(|id| self.list(id))
            .unwrap_or_default()
    }

    /// Look up a message by id; confirmed client ids resolve to their
    /// durable message
    pub fn get(&self, conversation_id: &str, message_id: &str) -> Option<&Message> {
        self.partitions.get(conversation_id)?.get(message_id)
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        self.partitions
            .get(conversation_id)
            .map_or(0, |p| p.entries.len())
    }

    pub fn is_local_sender(&self, message: &Message) -> bool {
        message.sender_id == self.agent_id
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Keep links the stored copy has that a redelivered copy omits
fn inherit_local_fields(incoming: &mut Message, stored: &Message) {
    if incoming.quoted_message_id.is_none() {
        incoming.quoted_message_id.clone_from(&stored.quoted_message_id);
    }
    if incoming.client_message_id.is_none() {
        incoming.client_message_id.clone_from(&stored.client_message_id);
    }
}

fn strip_self_quote(message: &mut Message) {
    if message.quoted_message_id.as_deref() == Some(message.id.as_str()) {
        tracing::warn!(message_id = %message.id, "Dropping self-referencing quote");
        message.quoted_message_id = None;
    }
}
