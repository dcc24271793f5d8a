//! Property-based tests for the connection state machine

use super::transition::transition;
use super::*;
use proptest::prelude::*;
use std::collections::HashSet;

/// Abstract operations; link picks are resolved against the links issued so far
#[derive(Debug, Clone)]
enum Op {
    Connect,
    Disconnect,
    Opened(usize),
    Closed(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Connect),
        Just(Op::Disconnect),
        (0usize..8).prop_map(Op::Opened),
        (0usize..8).prop_map(Op::Closed),
    ]
}

/// Drives the machine and tracks which transports are open, the way the
/// manager would after executing effects.
struct Harness {
    state: ConnState,
    issued: Vec<LinkId>,
    open: HashSet<LinkId>,
    notified: Vec<ConnectionEvent>,
}

impl Harness {
    fn new() -> Self {
        Self {
            state: ConnState::Idle,
            issued: Vec::new(),
            open: HashSet::new(),
            notified: Vec::new(),
        }
    }

    fn pick(&self, i: usize) -> Option<LinkId> {
        if self.issued.is_empty() {
            None
        } else {
            Some(self.issued[i % self.issued.len()])
        }
    }

    fn event_for(&mut self, op: &Op) -> Option<Event> {
        match op {
            Op::Connect => {
                let link = LinkId(self.issued.len() as u64 + 1);
                self.issued.push(link);
                Some(Event::ConnectRequested {
                    link,
                    endpoint: "ws://test".to_string(),
                })
            }
            Op::Disconnect => Some(Event::DisconnectRequested),
            Op::Opened(i) => self.pick(*i).map(|link| Event::TransportOpened { link }),
            Op::Closed(i) => self.pick(*i).map(|link| Event::TransportClosed {
                link,
                reason: "dropped".to_string(),
            }),
        }
    }

    fn apply(&mut self, event: Event) -> Vec<Effect> {
        if let Event::TransportClosed { link, .. } = &event {
            // The transport itself is gone regardless of what the machine does
            self.open.remove(link);
        }
        let result = transition(&self.state, event);
        self.state = result.new_state;
        for effect in &result.effects {
            match effect {
                Effect::OpenTransport { link, .. } => {
                    self.open.insert(*link);
                }
                Effect::CloseTransport { link } => {
                    self.open.remove(link);
                }
                Effect::Notify(event) => self.notified.push(event.clone()),
            }
        }
        result.effects
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // At most one live transport, and it always belongs to the current state
    #[test]
    fn prop_at_most_one_live_connection(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let mut h = Harness::new();
        for op in &ops {
            if let Some(event) = h.event_for(op) {
                h.apply(event);
            }
            prop_assert!(h.open.len() <= 1, "open links: {:?}", h.open);
            if let Some(open) = h.open.iter().next() {
                prop_assert_eq!(Some(*open), h.state.link());
            }
        }
    }

    // Connected/disconnected notifications alternate, starting with connected
    #[test]
    fn prop_notifications_alternate(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let mut h = Harness::new();
        for op in &ops {
            if let Some(event) = h.event_for(op) {
                h.apply(event);
            }
        }
        let mut expect_connected = true;
        for event in &h.notified {
            match event {
                ConnectionEvent::Connected => {
                    prop_assert!(expect_connected);
                    expect_connected = false;
                }
                ConnectionEvent::Disconnected { .. } => {
                    // A failed attempt disconnects without ever connecting
                    expect_connected = true;
                }
                ConnectionEvent::MessageReceived { .. } => {
                    prop_assert!(false, "transitions never emit messages");
                }
            }
        }
    }

    // Connected is only reachable through the opened callback of the current link
    #[test]
    fn prop_connected_requires_matching_open(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let mut h = Harness::new();
        for op in &ops {
            let before = h.state.clone();
            if let Some(event) = h.event_for(op) {
                let opened_link = match &event {
                    Event::TransportOpened { link } => Some(*link),
                    _ => None,
                };
                h.apply(event);
                if !matches!(before, ConnState::Connected { .. })
                    && matches!(h.state, ConnState::Connected { .. })
                {
                    prop_assert_eq!(before.link(), opened_link);
                    prop_assert_eq!(h.state.link(), opened_link);
                }
            }
        }
    }

    // Disconnect is always safe and never leaves a live state
    #[test]
    fn prop_disconnect_always_safe(ops in proptest::collection::vec(arb_op(), 0..20)) {
        let mut h = Harness::new();
        for op in &ops {
            if let Some(event) = h.event_for(op) {
                h.apply(event);
            }
        }
        let was_idle = h.state == ConnState::Idle;
        h.apply(Event::DisconnectRequested);
        prop_assert!(h.state.link().is_none());
        prop_assert!(h.open.is_empty());
        if was_idle {
            prop_assert_eq!(h.state.phase(), ConnectionState::Idle);
        }
    }
}
