//! Inputs to the connection state machine

use super::state::LinkId;

/// Events that trigger connection state transitions
///
/// Only `ConnectRequested` and `DisconnectRequested` come from callers; the
/// rest are transport callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ConnectRequested { link: LinkId, endpoint: String },
    DisconnectRequested,
    TransportOpened { link: LinkId },
    TransportClosed { link: LinkId, reason: String },
}
