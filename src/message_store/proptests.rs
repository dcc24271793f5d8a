//! Property-based tests for the Message Store

use super::*;
use crate::testing::sample_message_at;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    /// Agent sends one of a few canned texts
    Send(u8),
    /// Server echoes the n-th still-unconfirmed send (by sender and content)
    Echo(usize),
    /// Customer message with an arbitrary timestamp offset
    Inbound(i64),
    /// Delivery of the n-th unconfirmed send fails
    Fail(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..3).prop_map(Op::Send),
        (0usize..6).prop_map(Op::Echo),
        (-100i64..100).prop_map(Op::Inbound),
        (0usize..6).prop_map(Op::Fail),
    ]
}

fn assert_sorted(store: &MessageStore) -> Result<(), TestCaseError> {
    let list = store.list("c1");
    for pair in list.windows(2) {
        prop_assert!(
            pair[0].created_at <= pair[1].created_at,
            "out of order: {:?} then {:?}",
            pair[0].id,
            pair[1].id
        );
    }
    Ok(())
}

fn assert_unique_ids(store: &MessageStore) -> Result<(), TestCaseError> {
    let list = store.list("c1");
    let mut ids: Vec<&str> = list.iter().map(|m| m.id.as_str()).collect();
    ids.sort_unstable();
    let before = ids.len();
    ids.dedup();
    prop_assert_eq!(before, ids.len(), "duplicate ids in store");
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    // Every optimistic send followed by its echo yields exactly one message
    #[test]
    fn prop_send_then_echo_yields_one_message_per_send(
        texts in proptest::collection::vec("[a-c]{1,2}", 1..12)
    ) {
        let mut store = MessageStore::new("agent");
        store.load_initial("c1", vec![]);

        let sent: Vec<Message> = texts
            .iter()
            .map(|t| store.append_optimistic(t, None).unwrap())
            .collect();
        for (i, local) in sent.iter().enumerate() {
            let mut echo = sample_message_at(&format!("srv{i}"), "c1", "agent", &local.content, 0);
            echo.created_at = local.created_at;
            let outcome = store.reconcile(echo);
            let is_confirmed = matches!(outcome, Reconciliation::Confirmed { .. });
            prop_assert!(is_confirmed, "echo {} did not confirm: {:?}", i, outcome);
        }

        let list = store.list("c1");
        prop_assert_eq!(list.len(), texts.len());
        prop_assert!(list.iter().all(|m| m.delivery_state == DeliveryState::Confirmed));
        let contents: Vec<&str> = list.iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<&str> = texts.iter().map(String::as_str).collect();
        prop_assert_eq!(contents, expected);
    }

    // Ordering and identity invariants hold after any interleaving
    #[test]
    fn prop_store_stays_sorted_and_deduplicated(
        ops in proptest::collection::vec(arb_op(), 0..40)
    ) {
        let texts = ["hi", "ok", "thanks"];
        let mut store = MessageStore::new("agent");
        store.load_initial("c1", vec![]);
        let mut unconfirmed: Vec<Message> = Vec::new();
        let mut sends = 0usize;
        let mut echoes = 0usize;
        let mut inbound = 0usize;

        for op in ops {
            match op {
                Op::Send(t) => {
                    let msg = store.append_optimistic(texts[t as usize], None).unwrap();
                    unconfirmed.push(msg);
                    sends += 1;
                }
                Op::Echo(n) => {
                    let pending: Vec<usize> = unconfirmed
                        .iter()
                        .enumerate()
                        .filter(|(_, m)| store.get("c1", &m.id).is_some_and(Message::is_pending))
                        .map(|(i, _)| i)
                        .collect();
                    if pending.is_empty() {
                        continue;
                    }
                    let local = unconfirmed.remove(pending[n % pending.len()]);
                    let echo = sample_message_at(
                        &format!("srv{echoes}"),
                        "c1",
                        "agent",
                        &local.content,
                        0,
                    );
                    echoes += 1;
                    let outcome = store.reconcile(echo);
                    let is_confirmed = matches!(outcome, Reconciliation::Confirmed { .. });
                    prop_assert!(is_confirmed);
                }
                Op::Inbound(offset) => {
                    let msg = sample_message_at(
                        &format!("in{inbound}"),
                        "c1",
                        "cust",
                        "question",
                        offset,
                    );
                    inbound += 1;
                    prop_assert_eq!(store.reconcile(msg), Reconciliation::Appended);
                }
                Op::Fail(n) => {
                    if !unconfirmed.is_empty() {
                        let id = unconfirmed[n % unconfirmed.len()].id.clone();
                        store.mark_failed(&id);
                    }
                }
            }
            assert_sorted(&store)?;
            assert_unique_ids(&store)?;
        }

        // No loss, no duplication: one entry per send plus one per inbound
        prop_assert_eq!(store.len("c1"), sends + inbound);
    }
}
