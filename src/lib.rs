//! Support chat session engine
//!
//! Keeps an agent's view of a support inbox consistent: one persistent
//! connection, per-conversation message lists that show local sends at once
//! and reconcile them with server confirmations, reply quoting, the
//! conversation sidebar and the customer contact panel.
//!
//! [`Session`] ties the parts together. Each part is also usable on its own.

pub mod collaborators;
pub mod config;
pub mod connection;
pub mod contact_panel;
pub mod directory;
pub mod error;
pub mod message_store;
pub mod model;
pub mod quote;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use collaborators::{Backend, HttpBackend};
pub use config::ChatConfig;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use error::{CollaboratorError, SessionError, SessionResult, TransportError};
pub use message_store::MessageStore;
pub use model::{Conversation, ConversationStatus, Customer, DeliveryState, Message, SenderKind};
pub use session::{Session, SessionUpdate};
pub use transport::{Transport, WebSocketTransport};
