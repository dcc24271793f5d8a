//! Quote Linker
//!
//! Tracks which message the active draft replies to. Only the id is held;
//! content is always read back from the Message Store, so a quoted message
//! that disappears simply degrades to a stub.

use crate::error::{SessionError, SessionResult};
use crate::message_store::MessageStore;
use crate::model::Message;
use serde::Serialize;

/// What the compose box should show above the draft
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuotePreview<'a> {
    None,
    Available { message: &'a Message },
    /// The quoted message is not (or no longer) in the store
    #[serde(rename_all = "camelCase")]
    Unavailable { message_id: String },
}

#[derive(Debug, Default)]
pub struct QuoteLinker {
    quoted: Option<String>,
}

impl QuoteLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to `message_id` in the active draft
    pub fn set_quote(&mut self, message_id: &str) {
        tracing::debug!(message_id, "Quote set");
        self.quoted = Some(message_id.to_string());
    }

    pub fn clear_quote(&mut self) {
        self.quoted = None;
    }

    /// Id currently being replied to
    pub fn quoted(&self) -> Option<&str> {
        self.quoted.as_deref()
    }

    /// Look up a message of the active conversation
    pub fn resolve<'a>(&self, store: &'a MessageStore, message_id: &str) -> Option<&'a Message> {
        let conversation_id = store.active_conversation()?;
        store.get(conversation_id, message_id)
    }

    pub fn preview<'a>(&self, store: &'a MessageStore) -> QuotePreview<'a> {
        let Some(id) = self.quoted.as_deref() else {
            return QuotePreview::None;
        };
        match self.resolve(store, id) {
            Some(message) => QuotePreview::Available { message },
            None => QuotePreview::Unavailable {
                message_id: id.to_string(),
            },
        }
    }

    /// Append an optimistic message carrying the current quote, then clear it
    ///
    /// A quote that no longer resolves is still attached; the reader renders
    /// it as a stub. On error the quote is kept for the next attempt.
    pub fn send_with_quote(
        &mut self,
        store: &mut MessageStore,
        content: &str,
    ) -> SessionResult<Message> {
        if content.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let message = store.append_optimistic(content, self.quoted.as_deref())?;
        self.quoted = None;
        Ok(message)
    }

    /// Drafts belong to one conversation; switching drops the quote
    pub fn on_conversation_changed(&mut self) {
        if self.quoted.take().is_some() {
            tracing::debug!("Quote cleared on conversation change");
        }
    }
}
