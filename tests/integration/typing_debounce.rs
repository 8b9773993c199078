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

//! Integration tests for the outbound typing signal.
//!
//! Typing is announced once per burst, stopped after the idle window,
//! and stopped at once when the input is cleared, a send completes, or the
//! user switches conversation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use skillchat::api::memory::InMemoryChatApi;
use skillchat::cache::{InMemoryCache, SnapshotCache};
use skillchat::chat::InboxEngine;
use skillchat::chat::send::SendOutcome;
use skillchat::config::{EngineConfig, ReconnectConfig};
use skillchat::transport::connection::ConnectionManager;
use skillchat::transport::loopback::{LoopbackDialer, ServerConnection};
use skillchat_proto::event::ClientSignal;
use skillchat_proto::message::UserId;
use skillchat_proto::roster::RosterContext;

const IDLE: Duration = Duration::from_millis(150);
const WAIT: Duration = Duration::from_secs(5);

type Engine = InboxEngine<InMemoryChatApi, InMemoryCache>;

fn bob() -> UserId {
    UserId::new("bob")
}

async fn setup() -> (Arc<Engine>, ConnectionManager<LoopbackDialer>, ServerConnection) {
    let alice = UserId::new("alice");
    let api = Arc::new(InMemoryChatApi::new(alice.clone()));
    let cache = Arc::new(SnapshotCache::new(InMemoryCache::new(), &alice));
    let (dialer, mut server) = LoopbackDialer::new(32);
    let manager = ConnectionManager::new(dialer, ReconnectConfig::default(), 64);
    let engine = Arc::new(InboxEngine::new(
        alice,
        api,
        cache,
        manager.signals(),
        RosterContext::all(),
        EngineConfig {
            typing_idle_timeout: IDLE,
            ..EngineConfig::default()
        },
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
    let mut view = engine.view();
    tokio::time::timeout(WAIT, view.wait_for(|v| v.connection.is_connected()))
        .await
        .unwrap()
        .unwrap();
    engine.select_contact(&bob()).await;
    (engine, manager, conn)
}

async fn next_signal(conn: &mut ServerConnection) -> ClientSignal {
    tokio::time::timeout(WAIT, conn.next_signal())
        .await
        .expect("no signal from client")
        .expect("link closed")
}

fn start(partner: UserId) -> ClientSignal {
    ClientSignal::TypingStart {
        partner_id: partner,
    }
}

fn stop(partner: UserId) -> ClientSignal {
    ClientSignal::TypingStop {
        partner_id: partner,
    }
}

#[tokio::test]
async fn burst_announces_once_and_stops_after_idle() {
    let (engine, manager, mut conn) = setup().await;

    let began = Instant::now();
    engine.on_input_change("h").await;
    assert_eq!(next_signal(&mut conn).await, start(bob()));

    engine.on_input_change("he").await;
    engine.on_input_change("hey").await;
    tokio::task::yield_now().await;
    assert!(conn.try_next_signal().is_none());

    assert_eq!(next_signal(&mut conn).await, stop(bob()));
    assert!(began.elapsed() >= IDLE);
    assert_eq!(engine.current_view().draft, "hey");

    manager.shutdown().await;
}

#[tokio::test]
async fn clearing_input_stops_immediately() {
    let (engine, manager, mut conn) = setup().await;

    engine.on_input_change("draft").await;
    assert_eq!(next_signal(&mut conn).await, start(bob()));
    engine.on_input_change("").await;
    assert_eq!(next_signal(&mut conn).await, stop(bob()));

    tokio::time::sleep(IDLE * 2).await;
    assert!(conn.try_next_signal().is_none());

    manager.shutdown().await;
}

#[tokio::test]
async fn completed_send_stops_typing() {
    let (engine, manager, mut conn) = setup().await;

    engine.on_input_change("on my way").await;
    assert_eq!(next_signal(&mut conn).await, start(bob()));
    assert!(matches!(
        engine.send_message("on my way").await,
        SendOutcome::Sent(_)
    ));
    assert_eq!(next_signal(&mut conn).await, stop(bob()));

    tokio::time::sleep(IDLE * 2).await;
    assert!(conn.try_next_signal().is_none());

    manager.shutdown().await;
}

#[tokio::test]
async fn switching_conversation_stops_previous_partner() {
    let (engine, manager, mut conn) = setup().await;

    engine.on_input_change("one sec").await;
    assert_eq!(next_signal(&mut conn).await, start(bob()));
    engine.select_contact(&UserId::new("carol")).await;
    assert_eq!(next_signal(&mut conn).await, stop(bob()));

    manager.shutdown().await;
}
