//! `proptest` strategies for mailbox messages.

use proptest::prelude::*;

use crate::types::{Message, MessageStatus, Severity};

pub(crate) fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    }
}

pub(crate) fn arb_severity() -> impl Strategy<Value = Option<Severity>> {
    proptest::option::of(prop_oneof![
        Just(Severity::Blocking),
        Just(Severity::Major),
        Just(Severity::Minor),
    ])
}

pub(crate) fn arb_status() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Open),
        Just(MessageStatus::InProgress),
        Just(MessageStatus::Resolved),
        Just(MessageStatus::Closed),
    ]
}

/// Thread ids drawn from a small pool so groups collide. Some name other
/// messages' ids, and an empty one falls back to the message id.
fn arb_thread_id() -> impl Strategy<Value = Option<String>> {
    proptest::option::of(
        proptest::sample::select(vec!["t0", "t1", "m0", "m3", ""]).prop_map(str::to_owned),
    )
}

fn arb_agent() -> impl Strategy<Value = String> {
    proptest::sample::select(vec!["qa", "coordinator", "physics", "render"])
        .prop_map(str::to_owned)
}

/// A message with the given id and generated content.
pub(crate) fn arb_message(id: String) -> impl Strategy<Value = Message> {
    (
        arb_agent(),
        arb_agent(),
        proptest::collection::vec(arb_agent(), 0..3),
        0u8..6,
        arb_thread_id(),
        arb_severity(),
        arb_status(),
        any::<bool>(),
    )
        .prop_map(
            move |(from, to, cc, day, thread_id, severity, status, archived)| {
                let mut message = Message::new(id.clone(), from, to, format!("2025-01-0{day}"))
                    .with_cc(cc)
                    .with_status(status);
                message.thread_id = thread_id;
                message.severity = severity;
                message.archived = archived;
                message
            },
        )
}

/// Up to `max` messages with distinct ids `m0`, `m1`, ...
pub(crate) fn arb_messages(max: usize) -> impl Strategy<Value = Vec<Message>> {
    (0..=max).prop_flat_map(|len| {
        (0..len)
            .map(|i| arb_message(format!("m{i}")))
            .collect::<Vec<_>>()
    })
}
