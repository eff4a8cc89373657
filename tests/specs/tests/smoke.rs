// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The six literal end-to-end scenarios: single-active-session pre-emption,
//! multi-user fan-out ordering, history pagination windows, rate limiting,
//! AI mention streaming, and read receipts.

use std::collections::HashMap;
use std::time::Duration;

use chat_core::config::CoreConfig;
use chat_core::connections::ConnSignal;
use chat_core::error::ChatError;
use chat_core::model::{Message, MessageKind};
use chat_core::ports::{HistoryQuery, MessageRepo};
use chat_core::wire::{BusEnvelope, OutboundEvent};
use chat_core_specs::Harness;

const TIMEOUT: Duration = Duration::from_secs(2);

fn decode(raw: String) -> OutboundEvent {
    let envelope: BusEnvelope = serde_json::from_str(&raw).expect("valid bus envelope");
    envelope.event
}

#[tokio::test]
async fn s1_single_active_session_preempts_prior_connection() {
    let config = CoreConfig { preempt_ms: 50, ..CoreConfig::default() };
    let harness = Harness::with_config(config);
    harness.register_user("u1", "Alice").await;

    let session_a = harness.state.connections.register("u1", "connA".to_owned()).await.expect("register a");
    assert!(session_a.preempted_prior.is_none());
    let mut signal_a = session_a.signal_rx;

    let session_b = harness.state.connections.register("u1", "connB".to_owned()).await.expect("register b");
    assert_eq!(session_b.preempted_prior, Some("connA".to_owned()));

    let first = tokio::time::timeout(Duration::from_millis(500), signal_a.recv()).await.expect("within 500ms").expect("signal");
    assert!(matches!(first, ConnSignal::DuplicateLogin));

    let second = tokio::time::timeout(Duration::from_millis(8_500), signal_a.recv()).await.expect("within 8.5s").expect("signal");
    assert!(matches!(second, ConnSignal::Preempted));

    assert!(harness.state.connections.is_current("u1", &"connB".to_owned()).await);

    harness.create_room("r1", "u1").await;
    let joined = harness.state.presence.join("u1", "r1", None).await.expect("session b joins r1");
    assert!(joined.participants.iter().any(|p| p == "u1"));
}

#[tokio::test]
async fn s2_three_users_see_messages_in_send_order() {
    let harness = Harness::new();
    harness.create_room("r", "a").await;
    for (id, name) in [("a", "Alice"), ("b", "Bob"), ("c", "Carol")] {
        harness.register_user(id, name).await;
        harness.state.presence.join(id, "r", None).await.expect("join");
    }

    let mut receivers = vec![
        harness.state.ingest.subscribe_room(&"r".to_owned()).await,
        harness.state.ingest.subscribe_room(&"r".to_owned()).await,
        harness.state.ingest.subscribe_room(&"r".to_owned()).await,
    ];

    harness.state.ingest.send("a", "r", "hi", harness.sender("a", "Alice")).await.expect("send a");
    harness.state.ingest.send("b", "r", "hello", harness.sender("b", "Bob")).await.expect("send b");
    harness.state.ingest.send("c", "r", "hey", harness.sender("c", "Carol")).await.expect("send c");

    for rx in &mut receivers {
        let mut contents = Vec::new();
        for _ in 0..3 {
            let raw = tokio::time::timeout(TIMEOUT, rx.recv()).await.expect("no timeout").expect("message event");
            match decode(raw) {
                OutboundEvent::Message(view) => contents.push(view.content),
                other => panic!("expected a message event, got {other:?}"),
            }
        }
        assert_eq!(contents, vec!["hi".to_owned(), "hello".to_owned(), "hey".to_owned()]);
    }
}

#[tokio::test]
async fn s3_history_pagination_matches_exact_windows() {
    let harness = Harness::new();
    harness.create_room("r", "u1").await;
    harness.state.presence.join("u1", "r", None).await.expect("join");
    for i in 1..=60i64 {
        harness
            .messages
            .create(Message {
                id: format!("m{i}"),
                room_id: "r".to_owned(),
                sender_id: Some("u1".to_owned()),
                content: format!("msg {i}"),
                kind: MessageKind::Text,
                file: None,
                ai_type: None,
                timestamp: i,
                readers: Vec::new(),
                reactions: HashMap::new(),
                deleted: false,
            })
            .await
            .expect("seed message");
    }

    let mut first = harness.state.history.load_page("r", &"u1".to_owned(), None).await.expect("first page");
    assert_eq!(first.len(), 25);
    assert!(first.len() >= harness.state.config.history_page_size);
    // Repo returns newest-first; the wire contract needs ascending order.
    first.reverse();
    assert_eq!(first.first().unwrap().timestamp, 36);
    assert_eq!(first.last().unwrap().timestamp, 60);

    let mut second = harness.state.history.load_page("r", &"u1".to_owned(), Some(36)).await.expect("second page");
    assert_eq!(second.len(), 25);
    second.reverse();
    assert_eq!(second.first().unwrap().timestamp, 11);
    assert_eq!(second.last().unwrap().timestamp, 35);
}

#[tokio::test]
async fn s4_rate_limit_allows_forty_then_rejects_until_window_resets() {
    let harness = Harness::new();
    harness.create_room("r", "u").await;
    for i in 0..40 {
        harness.state.ingest.send("u", "r", &format!("msg {i}"), harness.sender("u", "U")).await.expect("within budget");
    }

    let err = harness.state.ingest.send("u", "r", "one too many", harness.sender("u", "U")).await.unwrap_err();
    assert_eq!(err, ChatError::RateLimited);

    harness.clock.advance(60_000);
    harness.state.ingest.send("u", "r", "after the window resets", harness.sender("u", "U")).await.expect("window reset");
}

#[tokio::test]
async fn s5_ai_mention_streams_and_persists_a_reply() {
    let harness = Harness::new();
    harness.create_room("r", "u").await;
    let mut rx = harness.state.ingest.subscribe_room(&"r".to_owned()).await;

    let outcome = harness.state.ingest.send("u", "r", "@wayneAI summarize please", harness.sender("u", "U")).await.expect("send");
    assert_eq!(outcome.mentioned_models, vec!["wayneAI".to_owned()]);

    let message_evt = tokio::time::timeout(TIMEOUT, rx.recv()).await.expect("no timeout").expect("message event");
    assert!(matches!(decode(message_evt), OutboundEvent::Message(_)));

    for model in &outcome.mentioned_models {
        harness.state.ai.start("r", "u", model, &outcome.query_without_mentions).await.expect("start ai");
    }

    let start_evt = tokio::time::timeout(TIMEOUT, rx.recv()).await.expect("no timeout").expect("aiMessageStart");
    match decode(start_evt) {
        OutboundEvent::AiMessageStart { model, .. } => assert_eq!(model, "wayneAI"),
        other => panic!("expected aiMessageStart, got {other:?}"),
    }

    let mut saw_chunk = false;
    loop {
        let raw = tokio::time::timeout(TIMEOUT, rx.recv()).await.expect("no timeout").expect("ai event");
        match decode(raw) {
            OutboundEvent::AiMessageChunk { .. } => saw_chunk = true,
            OutboundEvent::AiMessageComplete { .. } => break,
            other => panic!("unexpected event during AI stream: {other:?}"),
        }
    }
    assert!(saw_chunk);

    let page = harness
        .messages
        .find_page(HistoryQuery { room_id: "r".to_owned(), before: None, limit: 10 })
        .await
        .expect("history page");
    assert!(page.iter().any(|m| m.kind == MessageKind::Ai));
}

#[tokio::test]
async fn s6_read_receipt_is_broadcast_with_reader_and_message_ids() {
    let harness = Harness::new();
    harness.create_room("r", "u1").await;
    let mut rx = harness.state.ingest.subscribe_room(&"r".to_owned()).await;

    let outcome = harness.state.ingest.send("u1", "r", "m", harness.sender("u1", "U1")).await.expect("send");
    let _ = tokio::time::timeout(TIMEOUT, rx.recv()).await.expect("no timeout").expect("message event");

    harness.state.reactions.mark_read("u2", "r", std::slice::from_ref(&outcome.message.id)).await.expect("mark read");

    let raw = tokio::time::timeout(TIMEOUT, rx.recv()).await.expect("no timeout").expect("messagesRead event");
    let envelope: BusEnvelope = serde_json::from_str(&raw).expect("valid bus envelope");
    assert_eq!(envelope.exclude_user.as_deref(), Some("u2"));
    match envelope.event {
        OutboundEvent::MessagesRead { user_id, message_ids } => {
            assert_eq!(user_id, "u2");
            assert_eq!(message_ids, vec![outcome.message.id.clone()]);
        }
        other => panic!("expected messagesRead, got {other:?}"),
    }

    let persisted = harness.messages.find_by_id(&outcome.message.id).await.expect("persisted message");
    assert!(persisted.has_reader("u2"));
}
