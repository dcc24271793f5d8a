//! Conversation Directory
//!
//! Read model of the sidebar. Conversations are created elsewhere; this only
//! mirrors the fetched list, tracks which one is active and applies
//! optimistic status flips.

use crate::error::{SessionError, SessionResult};
use crate::model::{Conversation, ConversationStatus, Message};
use std::collections::HashMap;

/// Token for an optimistic status flip, needed to settle or revert it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub conversation_id: String,
    pub previous: ConversationStatus,
    pub requested: ConversationStatus,
    revision: u64,
}

/// Unsettled flips of one conversation
#[derive(Debug)]
struct PendingStatus {
    /// Last status the server is known to hold
    confirmed: ConversationStatus,
    confirmed_revision: u64,
    /// In issue order
    outstanding: Vec<StatusChange>,
}

impl PendingStatus {
    fn new(confirmed: ConversationStatus) -> Self {
        Self {
            confirmed,
            confirmed_revision: 0,
            outstanding: Vec::new(),
        }
    }

    /// The newest unsettled request wins; with none left, the server's value
    fn shown(&self) -> ConversationStatus {
        self.outstanding
            .last()
            .map_or(self.confirmed, |change| change.requested)
    }
}

#[derive(Debug, Default)]
pub struct ConversationDirectory {
    conversations: Vec<Conversation>,
    active: Option<String>,
    next_revision: u64,
    pending: HashMap<String, PendingStatus>,
}

impl ConversationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror a freshly fetched list, keeping server order
    ///
    /// Local unread flags and unsettled status flips survive the refresh.
    pub fn replace(&mut self, conversations: Vec<Conversation>) {
        let unread: HashMap<String, bool> = self
            .conversations
            .drain(..)
            .map(|c| (c.id, c.unread))
            .collect();

        self.conversations = conversations
            .into_iter()
            .map(|mut c| {
                c.unread |= unread.get(&c.id).copied().unwrap_or(false);
                if self.active.as_deref() == Some(c.id.as_str()) {
                    c.unread = false;
                }
                if let Some(pending) = self.pending.get_mut(&c.id) {
                    pending.confirmed = c.status;
                    c.status = pending.shown();
                }
                c
            })
            .collect();
        tracing::debug!(count = self.conversations.len(), "Conversation list refreshed");
    }

    /// Conversations by most recent activity, as the server ordered them
    pub fn list(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    fn get_mut(&mut self, conversation_id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == conversation_id)
    }

    /// Make a conversation active and clear its unread flag
    pub fn select(&mut self, conversation_id: &str) -> SessionResult<&Conversation> {
        let conversation = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| SessionError::UnknownConversation(conversation_id.to_string()))?;
        conversation.unread = false;
        self.active = Some(conversation_id.to_string());
        Ok(conversation)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.get(self.active.as_deref()?)
    }

    /// Update the preview for a new message; returns whether anything changed
    pub fn note_message(&mut self, message: &Message, from_local_agent: bool) -> bool {
        let is_active = self.active.as_deref() == Some(message.conversation_id.as_str());
        let Some(conversation) = self.get_mut(&message.conversation_id) else {
            return false;
        };
        let mut changed = false;
        if conversation.content != message.content {
            conversation.content.clone_from(&message.content);
            changed = true;
        }
        if !is_active && !from_local_agent && !conversation.unread {
            conversation.unread = true;
            changed = true;
        }
        changed
    }

    // ==================== Status ====================

    /// Optimistically flip bot handling
    pub fn begin_status_change(
        &mut self,
        conversation_id: &str,
        enabled: bool,
    ) -> SessionResult<StatusChange> {
        let conversation = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| SessionError::UnknownConversation(conversation_id.to_string()))?;
        self.next_revision += 1;

        let change = StatusChange {
            conversation_id: conversation_id.to_string(),
            previous: conversation.status,
            requested: ConversationStatus::from_bot_enabled(enabled),
            revision: self.next_revision,
        };
        conversation.status = change.requested;
        self.pending
            .entry(conversation_id.to_string())
            .or_insert_with(|| PendingStatus::new(change.previous))
            .outstanding
            .push(change.clone());
        Ok(change)
    }

    /// The command succeeded; returns whether the shown status changed
    pub fn settle_status_change(&mut self, change: &StatusChange) -> bool {
        self.finish_status_change(change, true)
    }

    /// The command failed; returns whether the shown status changed
    ///
    /// The status falls back to the newest change still in flight, or to the
    /// last status the server confirmed once nothing is.
    pub fn revert_status_change(&mut self, change: &StatusChange) -> bool {
        let changed = self.finish_status_change(change, false);
        if changed {
            tracing::warn!(
                conversation_id = %change.conversation_id,
                "Reverted conversation status"
            );
        }
        changed
    }

    fn finish_status_change(&mut self, change: &StatusChange, succeeded: bool) -> bool {
        let Some(pending) = self.pending.get_mut(&change.conversation_id) else {
            return false;
        };
        let Some(idx) = pending
            .outstanding
            .iter()
            .position(|c| c.revision == change.revision)
        else {
            return false;
        };
        pending.outstanding.remove(idx);
        if succeeded && change.revision > pending.confirmed_revision {
            pending.confirmed = change.requested;
            pending.confirmed_revision = change.revision;
        }
        let shown = pending.shown();
        if pending.outstanding.is_empty() {
            self.pending.remove(&change.conversation_id);
        }

        let Some(conversation) = self.get_mut(&change.conversation_id) else {
            return false;
        };
        let changed = conversation.status != shown;
        conversation.status = shown;
        tracing::debug!(
            conversation_id = %change.conversation_id,
            succeeded,
            status = ?shown,
            "Status change finished"
        );
        changed
    }
}
