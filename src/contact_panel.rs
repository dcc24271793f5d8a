//! Contact Panel State
//!
//! Visibility of the customer side panel and the profile bound to the active
//! conversation. Profiles are looked up externally; lookups carry a
//! generation so a late answer for a conversation the panel has moved away
//! from is dropped.

use crate::directory::ConversationDirectory;
use crate::error::{CollaboratorError, SessionError, SessionResult};
use crate::model::Customer;
use serde::Serialize;

/// Lookup the caller must run against the customer directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerLookup {
    pub customer_id: String,
    pub generation: u64,
}

/// Profile binding for the panel's conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Binding {
    Unbound,
    #[serde(rename_all = "camelCase")]
    Loading { customer_id: String },
    Loaded { customer: Customer },
    #[serde(rename_all = "camelCase")]
    Unavailable { customer_id: String, reason: String },
}

/// Read-only snapshot for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelView<'a> {
    pub conversation_id: &'a str,
    pub binding: &'a Binding,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes_draft: Option<&'a str>,
}

#[derive(Debug)]
pub struct ContactPanel {
    visible: bool,
    conversation_id: Option<String>,
    binding: Binding,
    generation: u64,
    /// Unsaved notes edit
    notes_draft: Option<String>,
}

impl Default for ContactPanel {
    fn default() -> Self {
        Self {
            visible: false,
            conversation_id: None,
            binding: Binding::Unbound,
            generation: 0,
            notes_draft: None,
        }
    }
}

impl ContactPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.visible
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Show the panel for `conversation_id`
    ///
    /// Returns the lookup to run, or `None` when the profile is already bound
    /// or being fetched.
    pub fn open(
        &mut self,
        directory: &ConversationDirectory,
        conversation_id: &str,
    ) -> SessionResult<Option<CustomerLookup>> {
        let conversation = directory
            .get(conversation_id)
            .ok_or_else(|| SessionError::UnknownConversation(conversation_id.to_string()))?;
        self.visible = true;

        let same_target = self.conversation_id.as_deref() == Some(conversation_id)
            && self.bound_customer_id() == Some(conversation.customer_id.as_str());
        if same_target && !matches!(self.binding, Binding::Unavailable { .. }) {
            return Ok(None);
        }
        Ok(Some(self.bind(conversation_id, &conversation.customer_id)))
    }

    /// Hide the panel; any unsaved edit is discarded
    pub fn close(&mut self) {
        self.visible = false;
        self.notes_draft = None;
    }

    /// Follow the active conversation
    ///
    /// While hidden the panel just forgets its binding and looks up lazily on
    /// the next `open`.
    pub fn rebind(
        &mut self,
        directory: &ConversationDirectory,
        conversation_id: Option<&str>,
    ) -> Option<CustomerLookup> {
        if self.conversation_id.as_deref() == conversation_id {
            return None;
        }
        let conversation = conversation_id.and_then(|id| directory.get(id));
        match conversation {
            Some(conversation) if self.visible => {
                Some(self.bind(&conversation.id, &conversation.customer_id))
            }
            _ => {
                self.generation += 1;
                self.conversation_id = conversation_id.map(str::to_string);
                self.binding = Binding::Unbound;
                self.notes_draft = None;
                None
            }
        }
    }

    fn bind(&mut self, conversation_id: &str, customer_id: &str) -> CustomerLookup {
        self.generation += 1;
        self.conversation_id = Some(conversation_id.to_string());
        self.binding = Binding::Loading {
            customer_id: customer_id.to_string(),
        };
        self.notes_draft = None;
        CustomerLookup {
            customer_id: customer_id.to_string(),
            generation: self.generation,
        }
    }

    fn bound_customer_id(&self) -> Option<&str> {
        match &self.binding {
            Binding::Unbound => None,
            Binding::Loading { customer_id } | Binding::Unavailable { customer_id, .. } => {
                Some(customer_id)
            }
            Binding::Loaded { customer } => Some(&customer.id),
        }
    }

    /// Apply a finished lookup; returns false if it was superseded
    pub fn bind_result(
        &mut self,
        lookup: &CustomerLookup,
        result: Result<Customer, CollaboratorError>,
    ) -> bool {
        if lookup.generation != self.generation {
            tracing::debug!(
                customer_id = %lookup.customer_id,
                generation = lookup.generation,
                "Discarding stale customer lookup"
            );
            return false;
        }
        self.binding = match result {
            Ok(customer) => Binding::Loaded { customer },
            Err(e) => {
                tracing::warn!(
                    customer_id = %lookup.customer_id,
                    error = %e,
                    "Customer lookup failed"
                );
                Binding::Unavailable {
                    customer_id: lookup.customer_id.clone(),
                    reason: e.to_string(),
                }
            }
        };
        true
    }

    /// Nothing to render without a conversation or while hidden
    pub fn view(&self) -> Option<PanelView<'_>> {
        if !self.visible {
            return None;
        }
        Some(PanelView {
            conversation_id: self.conversation_id.as_deref()?,
            binding: &self.binding,
            notes_draft: self.notes_draft.as_deref(),
        })
    }

    // ==================== Transient edit ====================

    /// Start editing the loaded customer's notes
    pub fn begin_edit(&mut self) -> bool {
        let Binding::Loaded { customer } = &self.binding else {
            return false;
        };
        if !self.visible {
            return false;
        }
        self.notes_draft = Some(customer.notes.clone().unwrap_or_default());
        true
    }

    pub fn update_edit(&mut self, text: &str) -> bool {
        match self.notes_draft.as_mut() {
            Some(draft) => {
                text.clone_into(draft);
                true
            }
            None => false,
        }
    }

    pub fn notes_draft(&self) -> Option<&str> {
        self.notes_draft.as_deref()
    }
}
