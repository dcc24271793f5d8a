//! Pure connection state transition function
//!
//! `idle -> connecting -> connected -> disconnected -> connecting -> ...`

use super::{ConnState, Effect, Event};

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConnState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConnState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    /// No state change, no effects
    pub fn unchanged(state: &ConnState) -> Self {
        Self::new(state.clone())
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs, with no I/O.
/// Every event is accepted: redundant requests and callbacks from links that
/// are no longer current leave the state untouched.
pub fn transition(state: &ConnState, event: Event) -> TransitionResult {
    match (state, event) {
        // ============================================================
        // Caller requests
        // ============================================================

        (
            ConnState::Idle | ConnState::Disconnected { .. },
            Event::ConnectRequested { link, endpoint },
        ) => {
            TransitionResult::new(ConnState::Connecting { link })
                .with_effect(Effect::OpenTransport { link, endpoint })
        }

        // Already live: the existing link stands in for the new one
        (
            ConnState::Connecting { .. } | ConnState::Connected { .. },
            Event::ConnectRequested { .. },
        ) => {
            TransitionResult::unchanged(state)
        }

        (
            ConnState::Connecting { link } | ConnState::Connected { link },
            Event::DisconnectRequested,
        ) => {
            TransitionResult::new(ConnState::Disconnected { reason: None })
                .with_effect(Effect::CloseTransport { link: *link })
                .with_effect(Effect::notify_disconnected(None))
        }

        // Always safe, including from idle
        (ConnState::Idle | ConnState::Disconnected { .. }, Event::DisconnectRequested) => {
            TransitionResult::unchanged(state)
        }

        // ============================================================
        // Transport callbacks
        // ============================================================

        (ConnState::Connecting { link: current }, Event::TransportOpened { link })
            if *current == link =>
        {
            TransitionResult::new(ConnState::Connected { link })
                .with_effect(Effect::notify_connected())
        }

        // A link we no longer want came up anyway
        (_, Event::TransportOpened { link }) => {
            TransitionResult::unchanged(state).with_effect(Effect::CloseTransport { link })
        }

        (
            ConnState::Connecting { link: current } | ConnState::Connected { link: current },
            Event::TransportClosed { link, reason },
        ) if *current == link => {
            TransitionResult::new(ConnState::Disconnected {
                reason: Some(reason.clone()),
            })
            .with_effect(Effect::CloseTransport { link })
            .with_effect(Effect::notify_disconnected(Some(reason)))
        }

        (_, Event::TransportClosed { .. }) => TransitionResult::unchanged(state),
    }
}
