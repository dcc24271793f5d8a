//! External collaborators
//!
//! The core never owns history, conversation records or customer profiles;
//! it reaches them through these traits. Tests use the mocks in `testing`.

mod http;

pub use http::HttpBackend;

use crate::error::CollaboratorError;
use crate::model::{Conversation, Customer, Message};
use async_trait::async_trait;
use std::sync::Arc;

/// Read access to conversations and their message history
#[async_trait]
pub trait ConversationSource: Send + Sync {
    /// Conversation summaries, most recent activity first
    async fn list_conversations(&self) -> Result<Vec<Conversation>, CollaboratorError>;

    /// Initial message history for a conversation
    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Message>, CollaboratorError>;
}

/// Conversation status mutations
#[async_trait]
pub trait StatusCommands: Send + Sync {
    /// Enable or disable bot handling for a conversation
    async fn set_bot_enabled(
        &self,
        conversation_id: &str,
        enabled: bool,
    ) -> Result<(), CollaboratorError>;
}

/// Customer profile lookup
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn lookup_customer(&self, customer_id: &str) -> Result<Customer, CollaboratorError>;
}

/// Combined collaborator trait for convenience
pub trait Backend: ConversationSource + StatusCommands + CustomerDirectory {}
impl<T: ConversationSource + StatusCommands + CustomerDirectory> Backend for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ConversationSource + ?Sized> ConversationSource for Arc<T> {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, CollaboratorError> {
        (**self).list_conversations().await
    }

    async fn fetch_history(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, CollaboratorError> {
        (**self).fetch_history(conversation_id).await
    }
}

#[async_trait]
impl<T: StatusCommands + ?Sized> StatusCommands for Arc<T> {
    async fn set_bot_enabled(
        &self,
        conversation_id: &str,
        enabled: bool,
    ) -> Result<(), CollaboratorError> {
        (**self).set_bot_enabled(conversation_id, enabled).await
    }
}

#[async_trait]
impl<T: CustomerDirectory + ?Sized> CustomerDirectory for Arc<T> {
    async fn lookup_customer(&self, customer_id: &str) -> Result<Customer, CollaboratorError> {
        (**self).lookup_customer(customer_id).await
    }
}
