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

//! Integration tests for the REST client against a stub backend.
//!
//! An axum router on a loopback port plays the LMS messaging endpoints and
//! records what the client sent.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use skillchat::api::http::HttpChatApi;
use skillchat::api::{ApiError, ChatApi, SendRequest, ThreadPage};
use skillchat_proto::message::{
    ConversationId, Message, MessageId, SequenceNumber, Timestamp, UserId,
};
use skillchat_proto::roster::{ContactProfile, ConversationSummary, LastMessage, RosterContext};
use url::Url;

const TOKEN: &str = "session-token-123";

#[derive(Clone, Default)]
struct Recorded {
    auth: Arc<Mutex<Vec<String>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    sends: Arc<Mutex<Vec<SendRequest>>>,
    marked: Arc<Mutex<Vec<String>>>,
}

impl Recorded {
    fn note_auth(&self, headers: &HeaderMap) {
        let value = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.auth.lock().push(value);
    }
}

fn message(id: &str, seq: u64) -> Message {
    Message {
        id: MessageId::new(id),
        conversation_id: Some(ConversationId::new("c-bob")),
        sender_id: UserId::new("bob"),
        receiver_id: UserId::new("alice"),
        body: format!("message {id}"),
        created_at: Timestamp::from_millis(1_700_000_000_000 + seq),
        read_at: None,
        delivered_at: None,
        sequence: Some(SequenceNumber::new(seq)),
    }
}

async fn contacts(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<ContactProfile>> {
    rec.note_auth(&headers);
    rec.queries.lock().push(query);
    Json(vec![ContactProfile {
        id: UserId::new("bob"),
        display_name: "Bob Nakamura".into(),
        role: Some("instructor".into()),
        avatar_url: Some("https://cdn.example.edu/bob.png".into()),
    }])
}

async fn conversations(State(rec): State<Recorded>, headers: HeaderMap) -> Json<Vec<ConversationSummary>> {
    rec.note_auth(&headers);
    Json(vec![ConversationSummary {
        partner_id: UserId::new("bob"),
        conversation_id: Some(ConversationId::new("c-bob")),
        last_message: Some(LastMessage {
            text: "message m2".into(),
            at: Timestamp::from_millis(1_700_000_000_002),
            from_me: false,
            read: false,
        }),
        unread_count: 2,
    }])
}

async fn thread(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Path(partner): Path<String>,
) -> Result<Json<ThreadPage>, StatusCode> {
    rec.note_auth(&headers);
    match partner.as_str() {
        "bob" => Ok(Json(ThreadPage {
            conversation_id: Some(ConversationId::new("c-bob")),
            messages: vec![message("m1", 1), message("m2", 2)],
            current_sequence: SequenceNumber::new(2),
        })),
        "forged" => Ok(Json(ThreadPage {
            conversation_id: None,
            messages: vec![message("temp-0190aaaa", 1)],
            current_sequence: SequenceNumber::new(1),
        })),
        "gone" => Err(StatusCode::NOT_FOUND),
        "busy" => Err(StatusCode::TOO_MANY_REQUESTS),
        _ => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

async fn mark_read(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Path(partner): Path<String>,
) -> StatusCode {
    rec.note_auth(&headers);
    rec.marked.lock().push(partner);
    StatusCode::NO_CONTENT
}

async fn send(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> Result<Json<Message>, (StatusCode, String)> {
    rec.note_auth(&headers);
    if request.content.len() > 20 {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, "content too long".into()));
    }
    rec.sends.lock().push(request.clone());
    Ok(Json(Message {
        id: MessageId::new("m3"),
        conversation_id: Some(ConversationId::new("c-bob")),
        sender_id: UserId::new("alice"),
        receiver_id: request.receiver_id,
        body: request.content,
        created_at: Timestamp::from_millis(1_700_000_000_003),
        read_at: None,
        delivered_at: None,
        sequence: Some(SequenceNumber::new(3)),
    }))
}

async fn unauthorized() -> StatusCode {
    StatusCode::UNAUTHORIZED
}

async fn stub() -> (HttpChatApi, Recorded) {
    let rec = Recorded::default();
    let app = Router::new()
        .route("/api/messages", post(send))
        .route("/api/messages/contacts", get(contacts))
        .route("/api/messages/conversations", get(conversations))
        .route("/api/messages/thread/{partner}", get(thread))
        .route("/api/messages/thread/{partner}/read", put(mark_read))
        .with_state(rec.clone());
    let base = serve(app).await.join("api").unwrap();
    (HttpChatApi::new(&base, TOKEN.into()).unwrap(), rec)
}

async fn serve(app: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

#[tokio::test]
async fn contacts_carry_bearer_token_and_context() {
    let (api, rec) = stub().await;
    let contacts = api
        .fetch_contacts(&RosterContext::new("class-7"))
        .await
        .unwrap();

    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].display_name, "Bob Nakamura");
    assert_eq!(contacts[0].role.as_deref(), Some("instructor"));
    assert_eq!(rec.auth.lock()[0], format!("Bearer {TOKEN}"));
    assert_eq!(rec.queries.lock()[0].get("context").map(String::as_str), Some("class-7"));
}

#[tokio::test]
async fn conversations_decode_metadata() {
    let (api, _rec) = stub().await;
    let conversations = api.fetch_conversations().await.unwrap();
    assert_eq!(conversations[0].unread_count, 2);
    assert!(!conversations[0].last_message.as_ref().unwrap().from_me);
}

#[tokio::test]
async fn thread_decodes_messages_and_sequence() {
    let (api, _rec) = stub().await;
    let page = api.fetch_thread(&UserId::new("bob")).await.unwrap();
    assert_eq!(page.messages.len(), 2);
    assert_eq!(page.current_sequence, SequenceNumber::new(2));
    assert_eq!(page.messages[1].body, "message m2");
}

#[tokio::test]
async fn thread_with_client_temporary_id_is_rejected() {
    let (api, _rec) = stub().await;
    let err = api.fetch_thread(&UserId::new("forged")).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
}

#[tokio::test]
async fn error_statuses_map_to_api_errors() {
    let (api, _rec) = stub().await;
    assert_eq!(
        api.fetch_thread(&UserId::new("gone")).await,
        Err(ApiError::NotFound)
    );
    assert_eq!(
        api.fetch_thread(&UserId::new("busy")).await,
        Err(ApiError::RateLimited)
    );
    assert_eq!(
        api.fetch_thread(&UserId::new("other")).await,
        Err(ApiError::Server(500))
    );
}

#[tokio::test]
async fn send_posts_body_and_returns_server_copy() {
    let (api, rec) = stub().await;
    let sent = api.send_message(&UserId::new("bob"), "see you at 3").await.unwrap();

    assert_eq!(sent.id, MessageId::new("m3"));
    assert_eq!(sent.sequence, Some(SequenceNumber::new(3)));
    let request = rec.sends.lock()[0].clone();
    assert_eq!(request.receiver_id, UserId::new("bob"));
    assert_eq!(request.content, "see you at 3");

    let err = api
        .send_message(&UserId::new("bob"), "this one is much too long")
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::Validation("content too long".into()));
}

#[tokio::test]
async fn mark_read_hits_thread_read_endpoint() {
    let (api, rec) = stub().await;
    api.mark_thread_read(&UserId::new("bob")).await.unwrap();
    assert_eq!(rec.marked.lock().as_slice(), ["bob"]);
}

#[tokio::test]
async fn ids_with_reserved_characters_are_path_encoded() {
    let (api, rec) = stub().await;
    let odd = UserId::new("a/b?x=1#frag");
    api.mark_thread_read(&odd).await.unwrap();
    assert_eq!(rec.marked.lock().as_slice(), ["a/b?x=1#frag"]);

    // Reaches the thread handler as one id, not `/thread/a` plus junk.
    assert_eq!(api.fetch_thread(&odd).await, Err(ApiError::Server(500)));
}

#[tokio::test]
async fn rejected_session_maps_to_unauthorized() {
    let app = Router::new().route("/messages/conversations", get(unauthorized));
    let base = serve(app).await;
    let api = HttpChatApi::new(&base, "expired".into()).unwrap();
    assert_eq!(api.fetch_conversations().await, Err(ApiError::Unauthorized));
}
