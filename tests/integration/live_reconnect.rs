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

//! Integration tests for live-channel pushes and connection supervision.
//!
//! These tests validate:
//! - The view tracks the connection state through a drop and redial
//! - A message for the open, visible conversation is marked read at once
//! - A message for any other conversation bumps its unread count
//! - The user's own message arriving live refreshes the roster
//! - Partner typing and presence pushes reach the view
//! - Frames that fail validation are skipped without closing the link

use std::sync::Arc;
use std::time::Duration;

use skillchat::api::memory::{ApiCall, InMemoryChatApi};
use skillchat::cache::{InMemoryCache, SnapshotCache};
use skillchat::chat::{InboxEngine, InboxView};
use skillchat::config::{EngineConfig, ReconnectConfig};
use skillchat::transport::ConnectionState;
use skillchat::transport::connection::ConnectionManager;
use skillchat::transport::loopback::{LoopbackDialer, LoopbackServer, ServerConnection};
use skillchat_proto::event::ServerEvent;
use skillchat_proto::message::{Message, MessageId, SequenceNumber, Timestamp, UserId};
use skillchat_proto::roster::{ContactProfile, RosterContext};
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(5);

type Engine = InboxEngine<InMemoryChatApi, InMemoryCache>;

struct Live {
    engine: Arc<Engine>,
    api: Arc<InMemoryChatApi>,
    manager: ConnectionManager<LoopbackDialer>,
    server: LoopbackServer,
    conn: Option<ServerConnection>,
    view: watch::Receiver<InboxView>,
}

impl Live {
    async fn push(&self, event: ServerEvent) {
        self.conn.as_ref().unwrap().push(&event).await.unwrap();
    }

    async fn wait(&mut self, pred: impl FnMut(&InboxView) -> bool) {
        tokio::time::timeout(WAIT, self.view.wait_for(pred))
            .await
            .expect("view never reached expected state")
            .unwrap();
    }
}

fn user(id: &str) -> UserId {
    UserId::new(id)
}

async fn live() -> Live {
    let alice = user("alice");
    let api = Arc::new(InMemoryChatApi::new(alice.clone()));
    for (id, name) in [("bob", "Bob"), ("carol", "Carol")] {
        api.add_contact(
            &RosterContext::all(),
            ContactProfile {
                id: user(id),
                display_name: name.into(),
                role: Some("student".into()),
                avatar_url: None,
            },
        );
    }
    let cache = Arc::new(SnapshotCache::new(InMemoryCache::new(), &alice));
    let (dialer, mut server) = LoopbackDialer::new(32);
    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        ..ReconnectConfig::default()
    };
    let manager = ConnectionManager::new(dialer, reconnect, 64);
    let engine = Arc::new(InboxEngine::new(
        alice,
        Arc::clone(&api),
        cache,
        manager.signals(),
        RosterContext::all(),
        EngineConfig::default(),
    ));
    let subscription = manager.subscribe();
    tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run(subscription).await }
    });
    manager.connect();
    let conn = tokio::time::timeout(WAIT, server.accept())
        .await
        .unwrap()
        .unwrap();
    engine.refresh_roster().await;

    let view = engine.view();
    let mut live = Live {
        engine,
        api,
        manager,
        server,
        conn: Some(conn),
        view,
    };
    live.wait(|v| v.connection.is_connected()).await;
    live
}

#[tokio::test]
async fn view_follows_drop_and_redial() {
    let mut live = live().await;
    let mut states = live.engine.view();

    drop(live.conn.take());
    live.wait(|v| matches!(v.connection, ConnectionState::Reconnecting { .. } | ConnectionState::Connecting)).await;

    let conn = tokio::time::timeout(WAIT, live.server.accept())
        .await
        .unwrap()
        .unwrap();
    live.conn = Some(conn);
    live.wait(|v| v.connection.is_connected()).await;
    assert!(states.has_changed().unwrap());
    assert!(states.borrow_and_update().connection.is_connected());

    live.manager.shutdown().await;
    live.wait(|v| v.connection == ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn message_for_open_visible_conversation_is_marked_read() {
    let mut live = live().await;
    let bob = user("bob");
    live.engine.select_contact(&bob).await;
    let marks_before = live.api.count(&ApiCall::MarkRead(bob.clone()));

    let incoming = live.api.deliver_from(&bob, "did you get my email?");
    live.push(ServerEvent::NewMessage { message: incoming }).await;
    live.wait(|v| v.messages.len() == 1).await;

    tokio::time::timeout(WAIT, async {
        while live.api.count(&ApiCall::MarkRead(bob.clone())) == marks_before {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("thread was never marked read");
    live.wait(|v| v.total_unread == 0).await;

    live.manager.shutdown().await;
}

#[tokio::test]
async fn message_for_other_conversation_bumps_unread() {
    let mut live = live().await;
    let bob = user("bob");
    let carol = user("carol");
    live.engine.select_contact(&bob).await;

    let incoming = live.api.deliver_from(&carol, "can I join your group?");
    live.push(ServerEvent::NewMessage { message: incoming }).await;

    live.wait(|v| v.total_unread == 1).await;
    let view = live.engine.current_view();
    assert!(view.messages.is_empty());
    assert_eq!(view.contacts[0].id(), &carol);
    assert_eq!(view.contacts[0].unread_count, 1);
    assert_eq!(live.api.count(&ApiCall::MarkRead(carol)), 0);

    live.manager.shutdown().await;
}

#[tokio::test]
async fn own_message_from_another_device_refreshes_roster() {
    let mut live = live().await;
    let refreshes_before = live.api.count(&ApiCall::Conversations);

    let echo = Message {
        id: MessageId::new("web-1"),
        conversation_id: None,
        sender_id: user("alice"),
        receiver_id: user("carol"),
        body: "sent from the browser".into(),
        created_at: Timestamp::now(),
        read_at: None,
        delivered_at: None,
        sequence: Some(SequenceNumber::new(1)),
    };
    live.push(ServerEvent::NewMessage { message: echo }).await;

    tokio::time::timeout(WAIT, async {
        while live.api.count(&ApiCall::Conversations) == refreshes_before {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("roster was never refreshed");
    live.wait(|v| v.total_unread == 0).await;

    live.manager.shutdown().await;
}

#[tokio::test]
async fn hidden_conversation_is_not_marked_read() {
    let mut live = live().await;
    let bob = user("bob");
    live.engine.select_contact(&bob).await;
    live.engine.on_visibility_change(false).await;
    let marks_before = live.api.count(&ApiCall::MarkRead(bob.clone()));

    let incoming = live.api.deliver_from(&bob, "ping");
    live.push(ServerEvent::NewMessage { message: incoming }).await;
    live.wait(|v| v.messages.len() == 1 && v.total_unread == 1).await;
    assert_eq!(live.api.count(&ApiCall::MarkRead(bob)), marks_before);

    live.manager.shutdown().await;
}

#[tokio::test]
async fn partner_typing_shows_and_clears_on_message() {
    let mut live = live().await;
    let bob = user("bob");
    live.engine.select_contact(&bob).await;

    live.push(ServerEvent::TypingStart {
        sender_id: user("carol"),
    })
    .await;
    live.push(ServerEvent::TypingStart {
        sender_id: bob.clone(),
    })
    .await;
    live.wait(|v| v.partner_typing).await;

    let incoming = live.api.deliver_from(&bob, "done typing");
    live.push(ServerEvent::NewMessage { message: incoming }).await;
    live.wait(|v| !v.partner_typing && v.messages.len() == 1).await;

    live.push(ServerEvent::TypingStart {
        sender_id: bob.clone(),
    })
    .await;
    live.wait(|v| v.partner_typing).await;
    live.push(ServerEvent::TypingStop { sender_id: bob }).await;
    live.wait(|v| !v.partner_typing).await;

    live.manager.shutdown().await;
}

#[tokio::test]
async fn presence_updates_contact() {
    let mut live = live().await;
    live.push(ServerEvent::PresenceChange {
        user_id: user("carol"),
        online: true,
    })
    .await;
    live.wait(|v| v.contacts.iter().any(|c| c.id().as_str() == "carol" && c.online))
        .await;

    // Presence survives a roster refresh.
    live.engine.refresh_roster().await;
    let view = live.engine.current_view();
    let carol = view.contacts.iter().find(|c| c.id().as_str() == "carol").unwrap();
    assert!(carol.online);

    live.manager.shutdown().await;
}

#[tokio::test]
async fn invalid_frames_do_not_break_the_link() {
    let mut live = live().await;
    let conn = live.conn.as_ref().unwrap();
    conn.push_raw("{not json").await.unwrap();
    conn.push_raw(r#"{"type":"deliveryReceipt","messageId":"temp-123","status":"read"}"#)
        .await
        .unwrap();
    conn.push_raw(r#"{"type":"somethingNew","x":1}"#).await.unwrap();

    live.push(ServerEvent::PresenceChange {
        user_id: user("bob"),
        online: true,
    })
    .await;
    live.wait(|v| v.contacts.iter().any(|c| c.online)).await;
    assert!(live.engine.current_view().receipts.is_empty());
    assert!(live.engine.current_view().connection.is_connected());

    live.manager.shutdown().await;
}
