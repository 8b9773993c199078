// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the optimistic send pipeline.
//!
//! These tests validate:
//! - An optimistic entry appears immediately with receipt `sent`
//! - The server copy replaces it in the same slot, under its real id
//! - A failed send rolls the entry back and restores the draft
//! - Only one send may be in flight
//! - Receipts or live echoes that race ahead of the REST reply are kept

use std::sync::Arc;
use std::time::Duration;

use skillchat::api::ApiError;
use skillchat::api::memory::{ApiCall, InMemoryChatApi};
use skillchat::cache::{InMemoryCache, SnapshotCache};
use skillchat::chat::InboxEngine;
use skillchat::chat::send::{IgnoreReason, SendFailure, SendOutcome};
use skillchat::config::{EngineConfig, ReconnectConfig};
use skillchat::transport::ChannelEvent;
use skillchat::transport::connection::ConnectionManager;
use skillchat::transport::loopback::LoopbackDialer;
use skillchat_proto::event::ServerEvent;
use skillchat_proto::message::{
    Message, MessageId, ReceiptStatus, SequenceNumber, Timestamp, UserId,
};
use skillchat_proto::roster::{ContactProfile, RosterContext};

type Engine = InboxEngine<InMemoryChatApi, InMemoryCache>;

struct Harness {
    engine: Arc<Engine>,
    api: Arc<InMemoryChatApi>,
    cache: Arc<SnapshotCache<InMemoryCache>>,
    _manager: ConnectionManager<LoopbackDialer>,
}

fn bob() -> UserId {
    UserId::new("bob")
}

fn harness(config: EngineConfig) -> Harness {
    let alice = UserId::new("alice");
    let api = Arc::new(InMemoryChatApi::new(alice.clone()));
    api.add_contact(
        &RosterContext::all(),
        ContactProfile {
            id: bob(),
            display_name: "Bob".into(),
            role: Some("instructor".into()),
            avatar_url: None,
        },
    );
    let cache = Arc::new(SnapshotCache::new(InMemoryCache::new(), &alice));
    let (dialer, _server) = LoopbackDialer::new(16);
    let manager = ConnectionManager::new(dialer, ReconnectConfig::default(), 64);
    let engine = Arc::new(InboxEngine::new(
        alice,
        Arc::clone(&api),
        Arc::clone(&cache),
        manager.signals(),
        RosterContext::all(),
        config,
    ));
    Harness {
        engine,
        api,
        cache,
        _manager: manager,
    }
}

/// Start a send that blocks on the held backend, and wait until its
/// optimistic entry is visible.
async fn start_held_send(
    h: &Harness,
    text: &'static str,
) -> tokio::task::JoinHandle<SendOutcome> {
    let mut view = h.engine.view();
    let engine = Arc::clone(&h.engine);
    let task = tokio::spawn(async move { engine.send_message(text).await });
    tokio::time::timeout(
        Duration::from_secs(5),
        view.wait_for(|v| v.messages.iter().any(|m| m.id.is_temporary())),
    )
    .await
    .expect("optimistic entry never appeared")
    .unwrap();
    task
}

#[tokio::test]
async fn optimistic_entry_is_replaced_in_place() {
    let h = harness(EngineConfig::default());
    h.api.deliver_from(&bob(), "office hours at 4?");
    h.engine.select_contact(&bob()).await;

    let hold = h.api.hold_sends().await;
    let task = start_held_send(&h, "  yes, see you then  ").await;

    let pending = h.engine.current_view();
    assert_eq!(pending.messages.len(), 2);
    let temp = &pending.messages[1];
    assert!(temp.id.is_temporary());
    assert_eq!(temp.body, "yes, see you then");
    assert_eq!(pending.receipts.get(&temp.id), Some(&ReceiptStatus::Sent));
    assert!(pending.draft.is_empty());
    assert!(h.engine.is_sending());

    drop(hold);
    let SendOutcome::Sent(real) = task.await.unwrap() else {
        panic!("send should succeed");
    };

    let view = h.engine.current_view();
    assert_eq!(view.messages.len(), 2);
    assert_eq!(view.messages[1].id, real.id);
    assert_eq!(view.messages[1].sequence, Some(SequenceNumber::new(2)));
    assert!(view.messages.iter().all(|m| !m.id.is_temporary()));
    assert_eq!(view.receipts.get(&real.id), Some(&ReceiptStatus::Sent));
    assert!(view.receipts.keys().all(|id| !id.is_temporary()));
    assert!(!h.engine.is_sending());
    assert_eq!(h.engine.last_seen(&bob()).await, SequenceNumber::new(2));

    let snapshot = h.cache.load_thread(&bob()).unwrap();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].id, real.id);

    let contact = &view.contacts[0];
    let last = contact.last_message.as_ref().unwrap();
    assert!(last.from_me);
    assert_eq!(last.text, "yes, see you then");
}

#[tokio::test]
async fn first_send_in_empty_conversation_carries_its_id() {
    let h = harness(EngineConfig::default());
    let conversation = h.api.open_conversation(&bob());
    h.engine.select_contact(&bob()).await;
    assert!(h.engine.current_view().messages.is_empty());

    let hold = h.api.hold_sends().await;
    let task = start_held_send(&h, "hi, first message").await;
    let pending = h.engine.current_view();
    assert_eq!(pending.messages[0].conversation_id, Some(conversation.clone()));

    drop(hold);
    assert!(matches!(task.await.unwrap(), SendOutcome::Sent(_)));
    assert_eq!(
        h.cache.load_thread(&bob()).unwrap().conversation_id,
        Some(conversation)
    );
}

#[tokio::test]
async fn failed_send_rolls_back_and_restores_draft() {
    let h = harness(EngineConfig::default());
    h.engine.select_contact(&bob()).await;
    h.api.fail_next_send(ApiError::NotFound);

    let outcome = h.engine.send_message("are you there?").await;
    assert_eq!(
        outcome,
        SendOutcome::Failed {
            reason: SendFailure::RecipientNotFound,
            draft: "are you there?".into(),
        }
    );

    let view = h.engine.current_view();
    assert!(view.messages.is_empty());
    assert!(view.receipts.is_empty());
    assert_eq!(view.draft, "are you there?");
    let notice = view.notice.unwrap();
    assert_eq!(notice.partner, bob());
    assert_eq!(notice.reason, SendFailure::RecipientNotFound);
    assert!(h.cache.load_thread(&bob()).is_none_or(|s| s.messages.is_empty()));

    h.engine.dismiss_notice().await;
    assert!(h.engine.current_view().notice.is_none());
}

#[tokio::test]
async fn expired_session_is_reported_as_auth_failure() {
    let h = harness(EngineConfig::default());
    h.engine.select_contact(&bob()).await;
    h.api.fail_next_send(ApiError::Unauthorized);

    let outcome = h.engine.send_message("hello").await;
    assert!(matches!(
        outcome,
        SendOutcome::Failed {
            reason: SendFailure::AuthExpired,
            ..
        }
    ));
}

#[tokio::test]
async fn second_send_is_ignored_while_first_is_in_flight() {
    let h = harness(EngineConfig::default());
    h.engine.select_contact(&bob()).await;

    let hold = h.api.hold_sends().await;
    let task = start_held_send(&h, "first").await;

    assert_eq!(
        h.engine.send_message("second").await,
        SendOutcome::Ignored(IgnoreReason::InFlight)
    );

    drop(hold);
    assert!(matches!(task.await.unwrap(), SendOutcome::Sent(_)));
    assert_eq!(h.api.count(&ApiCall::Send(bob())), 1);
    assert_eq!(h.engine.current_view().messages.len(), 1);
}

#[tokio::test]
async fn blank_and_unaddressed_sends_are_ignored() {
    let h = harness(EngineConfig::default());
    assert_eq!(
        h.engine.send_message("hello").await,
        SendOutcome::Ignored(IgnoreReason::NoActiveContact)
    );

    h.engine.select_contact(&bob()).await;
    assert_eq!(
        h.engine.send_message(" \n\t ").await,
        SendOutcome::Ignored(IgnoreReason::Empty)
    );
    assert_eq!(h.api.count(&ApiCall::Send(bob())), 0);
}

#[tokio::test]
async fn overlong_body_never_reaches_the_backend() {
    let h = harness(EngineConfig {
        max_body_len: 10,
        ..EngineConfig::default()
    });
    h.engine.select_contact(&bob()).await;

    let outcome = h.engine.send_message("this is far too long").await;
    assert!(matches!(
        outcome,
        SendOutcome::Failed {
            reason: SendFailure::Validation(_),
            ..
        }
    ));
    assert_eq!(h.api.count(&ApiCall::Send(bob())), 0);
    assert!(h.engine.current_view().messages.is_empty());
    assert!(h.engine.current_view().notice.is_some());
}

#[tokio::test]
async fn receipt_that_races_ahead_of_reply_is_kept() {
    let h = harness(EngineConfig::default());
    h.engine.select_contact(&bob()).await;

    let hold = h.api.hold_sends().await;
    let task = start_held_send(&h, "quiz tomorrow?").await;

    // The backend numbers messages m1, m2, ...; this send will be m1.
    let real_id = MessageId::new("m1");
    h.engine
        .handle_event(ChannelEvent::Server(ServerEvent::DeliveryReceipt {
            message_id: real_id.clone(),
            status: ReceiptStatus::Delivered,
        }))
        .await;

    drop(hold);
    let SendOutcome::Sent(real) = task.await.unwrap() else {
        panic!("send should succeed");
    };
    assert_eq!(real.id, real_id);
    assert_eq!(
        h.engine.current_view().receipts.get(&real_id),
        Some(&ReceiptStatus::Delivered)
    );
}

#[tokio::test]
async fn live_echo_before_reply_leaves_one_entry() {
    let h = harness(EngineConfig::default());
    h.engine.select_contact(&bob()).await;

    let hold = h.api.hold_sends().await;
    let task = start_held_send(&h, "see slide 12").await;

    let echo = Message {
        id: MessageId::new("m1"),
        conversation_id: None,
        sender_id: UserId::new("alice"),
        receiver_id: bob(),
        body: "see slide 12".into(),
        created_at: Timestamp::now(),
        read_at: None,
        delivered_at: None,
        sequence: Some(SequenceNumber::new(1)),
    };
    h.engine
        .handle_event(ChannelEvent::Server(ServerEvent::NewMessage { message: echo }))
        .await;
    assert_eq!(h.engine.current_view().messages.len(), 2);

    drop(hold);
    assert!(matches!(task.await.unwrap(), SendOutcome::Sent(_)));
    let view = h.engine.current_view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].id, MessageId::new("m1"));
}
