//! Connection state types

use serde::{Deserialize, Serialize};

/// Identifies one transport attempt
///
/// Every `connect` that opens a transport gets a fresh id. Callbacks tagged
/// with an id that is no longer current are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Full state machine state
///
/// Holds at most one link, which is what makes "one live connection per
/// session" structural.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnState {
    #[default]
    Idle,
    Connecting {
        link: LinkId,
    },
    Connected {
        link: LinkId,
    },
    Disconnected {
        /// Transport-reported cause; `None` for a requested disconnect
        reason: Option<String>,
    },
}

impl ConnState {
    pub fn phase(&self) -> ConnectionState {
        match self {
            ConnState::Idle => ConnectionState::Idle,
            ConnState::Connecting { .. } => ConnectionState::Connecting,
            ConnState::Connected { .. } => ConnectionState::Connected,
            ConnState::Disconnected { .. } => ConnectionState::Disconnected,
        }
    }

    /// The link currently owned by this state, if any
    pub fn link(&self) -> Option<LinkId> {
        match self {
            ConnState::Connecting { link } | ConnState::Connected { link } => Some(*link),
            ConnState::Idle | ConnState::Disconnected { .. } => None,
        }
    }
}
