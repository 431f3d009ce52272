// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for the application context against fake servers.
//!
//! An `axum` router stands in for the REST server and a raw
//! `tokio-tungstenite` acceptor stands in for the realtime server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use tchat::api::ApiError;
use tchat::app::{App, AppError, Verification};
use tchat::chat::UNDECRYPTABLE;
use tchat::config::ClientConfig;
use tchat::crypto::envelope::seal_pair;
use tchat::crypto::keys::Keypair;
use tchat::session::{SessionRecord, SessionStore};
use tchat::transport::ConnectionState;
use tchat_proto::api::{LoginRequest, PublicKeyBody, UserProfile};
use tchat_proto::codec;
use tchat_proto::envelope::HybridEnvelope;
use tchat_proto::frame::{DeliveredMessage, ServerFrame};

const WAIT: Duration = Duration::from_secs(5);
const GOOD_TOKEN: &str = "good-token";

static BOB: LazyLock<Keypair> = LazyLock::new(|| Keypair::generate().unwrap());

// ============================================================================
// Fake REST server
// ============================================================================

#[derive(Default)]
struct Backend {
    published_key: Mutex<Option<String>>,
    history: Mutex<Vec<serde_json::Value>>,
    key_fetches: AtomicUsize,
}

type Shared = Arc<Backend>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {GOOD_TOKEN}"))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"message": "Invalid or expired token"})),
    )
        .into_response()
}

async fn login(Json(body): Json<LoginRequest>) -> Response {
    if body.password != "secret" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Invalid credentials"})),
        )
            .into_response();
    }
    Json(json!({
        "token": GOOD_TOKEN,
        "id": "u-alice",
        "username": body.username,
        "email": "alice@example.com"
    }))
    .into_response()
}

async fn me(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({"id": "u-alice", "username": "alice", "email": "alice@example.com"})).into_response()
}

async fn publish_key(
    State(backend): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<PublicKeyBody>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    *backend.published_key.lock() = Some(body.public_key);
    StatusCode::OK.into_response()
}

async fn peer_key(State(backend): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    backend.key_fetches.fetch_add(1, Ordering::SeqCst);
    if id != "u-bob" {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "No such user"}))).into_response();
    }
    Json(PublicKeyBody {
        public_key: BOB.stripped_public_key(),
    })
    .into_response()
}

async fn chats(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!([
        {"id": "u-bob", "username": "bob", "unreadCount": 3, "lastMessageTimestamp": "2024-05-01T09:00:00.000Z"},
        {"id": "u-carol", "username": "carol", "unreadCount": 0, "lastMessageTimestamp": "2024-05-02T09:00:00.000Z"},
        {"id": "u-dave", "username": "dave"}
    ]))
    .into_response()
}

async fn history(State(backend): State<Shared>, headers: HeaderMap, Path(_id): Path<String>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(backend.history.lock().clone()).into_response()
}

async fn search(headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let wanted = query.get("username").cloned().unwrap_or_default();
    let users: Vec<_> = ["bob", "bobby", "carol"]
        .into_iter()
        .filter(|name| name.starts_with(&wanted))
        .map(|name| json!({"id": format!("u-{name}"), "username": name}))
        .collect();
    Json(users).into_response()
}

async fn start_rest(backend: Shared) -> String {
    let router = Router::new()
        .route("/api/users/login", post(login))
        .route("/api/users/me", get(me))
        .route("/api/users/publicKey", post(publish_key))
        .route("/api/users/search", get(search))
        .route("/api/users/{id}/publicKey", get(peer_key))
        .route("/api/messages", get(chats))
        .route("/api/messages/{id}", get(history))
        .with_state(backend);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/api")
}

// ============================================================================
// Fake realtime server
// ============================================================================

struct Realtime {
    url: String,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

async fn start_realtime() -> Realtime {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (from_tx, from_client) = mpsc::unbounded_channel();
    let (to_client, mut to_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            let (mut write, mut read) = ws.split();
            loop {
                tokio::select! {
                    incoming = read.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let _ = from_tx.send(text.as_str().to_owned());
                        }
                        Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                    outgoing = to_rx.recv() => {
                        let Some(text) = outgoing else { return };
                        let _ = write.send(Message::text(text)).await;
                    }
                }
            }
        }
    });
    Realtime {
        url,
        from_client,
        to_client,
    }
}

impl Realtime {
    async fn next_frame(&mut self) -> serde_json::Value {
        let text = tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("realtime server ended");
        serde_json::from_str(&text).unwrap()
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    dir: tempfile::TempDir,
    backend: Shared,
    realtime: Realtime,
    config: ClientConfig,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let backend = Shared::default();
    let api_url = start_rest(Arc::clone(&backend)).await;
    let realtime = start_realtime().await;
    let config = ClientConfig {
        api_url,
        ws_url: realtime.url.clone(),
        request_timeout: WAIT,
        data_dir: Some(dir.path().to_path_buf()),
    };
    Harness {
        dir,
        backend,
        realtime,
        config,
    }
}

fn stored_session(token: &str) -> SessionRecord {
    SessionRecord {
        token: token.to_string(),
        user: UserProfile {
            id: "u-alice".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
        },
    }
}

fn delivered(id: &str, sender: &str, content: HybridEnvelope, timestamp: &str) -> DeliveredMessage {
    DeliveredMessage {
        id: id.to_string(),
        sender_id: sender.to_string(),
        content,
        timestamp: timestamp.to_string(),
    }
}

fn served(messages: Vec<DeliveredMessage>) -> Vec<serde_json::Value> {
    messages
        .into_iter()
        .map(|m| serde_json::to_value(m).unwrap())
        .collect()
}

async fn logged_in(h: &mut Harness) -> App {
    let mut app = App::bootstrap(h.config.clone()).unwrap();
    app.login("alice", "secret").await.unwrap();
    app.settle().await;
    let auth = h.realtime.next_frame().await;
    assert_eq!(auth["type"], "auth");
    app
}

// ============================================================================
// Login and verification
// ============================================================================

#[tokio::test]
async fn login_persists_session_publishes_key_and_connects() {
    let mut h = harness().await;
    let mut app = App::bootstrap(h.config.clone()).unwrap();

    let user = app.login("alice", "secret").await.unwrap().clone();
    app.settle().await;

    assert_eq!(user.id, "u-alice");
    let stored = SessionStore::new(h.dir.path()).load().unwrap().unwrap();
    assert_eq!(stored.token, GOOD_TOKEN);
    assert_eq!(stored.user, user);
    assert_eq!(
        h.backend.published_key.lock().clone(),
        Some(app.keys().stripped_public_key())
    );
    assert_eq!(app.realtime().state(), ConnectionState::Connected);
    let auth = h.realtime.next_frame().await;
    assert_eq!(auth, json!({"type": "auth", "token": GOOD_TOKEN}));
}

#[tokio::test]
async fn bad_credentials_are_authentication_error() {
    let h = harness().await;
    let mut app = App::bootstrap(h.config.clone()).unwrap();

    let result = app.login("alice", "wrong").await;

    match result {
        Err(AppError::Api(ApiError::Authentication(message))) => {
            assert_eq!(message, "Invalid credentials");
        }
        other => panic!("expected authentication error, got {other:?}"),
    }
    assert!(app.session().is_none());
    assert!(!SessionStore::new(h.dir.path()).path().exists());
}

#[tokio::test]
async fn rejected_stored_session_is_cleared() {
    let h = harness().await;
    let store = SessionStore::new(h.dir.path());
    store.save(&stored_session("stale-token")).unwrap();

    let mut app = App::bootstrap(h.config.clone()).unwrap();
    assert!(app.session().is_some());

    assert_eq!(app.verify_session().await.unwrap(), Verification::Rejected);
    assert!(app.session().is_none());
    assert!(!store.path().exists());
    assert_eq!(app.realtime().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn valid_stored_session_connects() {
    let mut h = harness().await;
    SessionStore::new(h.dir.path())
        .save(&stored_session(GOOD_TOKEN))
        .unwrap();

    let mut app = App::bootstrap(h.config.clone()).unwrap();
    assert_eq!(app.verify_session().await.unwrap(), Verification::Valid);

    assert_eq!(app.realtime().state(), ConnectionState::Connected);
    assert_eq!(h.realtime.next_frame().await["token"], GOOD_TOKEN);
}

#[tokio::test]
async fn valid_stored_session_survives_unreachable_realtime() {
    let h = harness().await;
    SessionStore::new(h.dir.path())
        .save(&stored_session(GOOD_TOKEN))
        .unwrap();
    let config = ClientConfig {
        ws_url: "ws://127.0.0.1:1".to_string(),
        ..h.config.clone()
    };

    let mut app = App::bootstrap(config).unwrap();
    assert_eq!(app.verify_session().await.unwrap(), Verification::Valid);

    assert!(app.session().is_some());
    assert_eq!(app.realtime().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn logout_forgets_everything() {
    let mut h = harness().await;
    let mut app = logged_in(&mut h).await;

    app.logout().unwrap();

    assert!(app.session().is_none());
    assert_eq!(app.realtime().state(), ConnectionState::Disconnected);
    assert!(SessionStore::new(h.dir.path()).load().unwrap().is_none());
}

// ============================================================================
// Chat list
// ============================================================================

#[tokio::test]
async fn refresh_chats_rebuilds_unread_and_sorts_newest_first() {
    let mut h = harness().await;
    let app = logged_in(&mut h).await;
    app.realtime().unread().lock().increment("u-zed");

    let chats = app.refresh_chats().await.unwrap();

    let order: Vec<_> = chats.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(order, ["u-carol", "u-bob", "u-dave"]);
    let unread = app.unread();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread.get("u-bob"), Some(&3));
}

#[tokio::test]
async fn search_passes_username_query() {
    let mut h = harness().await;
    let app = logged_in(&mut h).await;

    let found = app.search("bob").await.unwrap();

    let names: Vec<_> = found.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, ["bob", "bobby"]);
}

// ============================================================================
// Conversation
// ============================================================================

#[tokio::test]
async fn conversation_decrypts_history_sends_and_receives() {
    let mut h = harness().await;
    let app = logged_in(&mut h).await;
    app.realtime().unread().lock().increment("u-bob");

    let mine = seal_pair("hi bob", BOB.public_pem(), app.keys()).unwrap();
    let theirs = seal_pair("hi alice", app.keys().public_pem(), &BOB).unwrap();
    let foreign = seal_pair("lost", BOB.public_pem(), &BOB).unwrap();
    // Newest first, as the server returns it.
    *h.backend.history.lock() = served(vec![
        delivered("3", "u-alice", mine.for_sender, "2024-05-01T10:00:03.000Z"),
        delivered("2", "u-bob", theirs.for_receiver.clone(), "2024-05-01T10:00:02.000Z"),
        delivered("1", "u-bob", foreign.for_receiver, "2024-05-01T10:00:01.000Z"),
    ]);

    let mut conversation = app.open_conversation("u-bob").await.unwrap();

    let texts: Vec<_> = conversation.history().iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, [UNDECRYPTABLE, "hi alice", "hi bob"]);
    assert!(conversation.history()[2].is_mine);
    assert!(!conversation.history()[1].is_mine);
    // Opening leaves the counter to the caller.
    assert_eq!(app.realtime().unread().lock().get("u-bob"), 1);

    // Outgoing: both copies travel in one frame.
    let outcome = conversation.send("see you").unwrap().unwrap();
    assert!(outcome.handed_off);
    assert!(outcome.line.is_mine);
    let frame = h.realtime.next_frame().await;
    assert_eq!(frame["type"], "message");
    assert_eq!(frame["receiverId"], "u-bob");
    let for_receiver: HybridEnvelope =
        serde_json::from_value(frame["contentForReceiver"].clone()).unwrap();
    let for_sender: HybridEnvelope =
        serde_json::from_value(frame["contentForSender"].clone()).unwrap();
    assert_eq!(BOB.open(&for_receiver).unwrap(), "see you");
    assert_eq!(app.keys().open(&for_sender).unwrap(), "see you");

    // Blank input is ignored.
    assert!(conversation.send("   ").unwrap().is_none());

    // A live copy of a message already in history is skipped.
    let duplicate = codec::encode_server(&ServerFrame::Message(delivered(
        "2",
        "u-bob",
        theirs.for_receiver,
        "2024-05-01T10:00:02.000Z",
    )))
    .unwrap();
    h.realtime.to_client.send(duplicate).unwrap();

    // Incoming: a live message from the contact reaches the conversation.
    let live = seal_pair("live!", app.keys().public_pem(), &BOB).unwrap();
    let frame = codec::encode_server(&ServerFrame::Message(delivered(
        "4",
        "u-bob",
        live.for_receiver,
        "2024-05-01T10:00:04.000Z",
    )))
    .unwrap();
    h.realtime.to_client.send(frame).unwrap();

    let line = tokio::time::timeout(WAIT, conversation.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.id, "4");
    assert_eq!(line.text, "live!");
    assert_eq!(line.sender_id, "u-bob");
    assert_eq!(app.realtime().unread().lock().get("u-bob"), 1);
}

#[tokio::test]
async fn malformed_history_item_does_not_sink_the_batch() {
    let mut h = harness().await;
    let app = logged_in(&mut h).await;

    let theirs = seal_pair("still readable", app.keys().public_pem(), &BOB).unwrap();
    let mut good = served(vec![delivered(
        "1",
        "u-bob",
        theirs.for_receiver,
        "2024-05-01T10:00:01.000Z",
    )]);
    // Newest first; the newest entry lost its authTag in transit.
    *h.backend.history.lock() = vec![
        json!({
            "id": "2",
            "senderId": "u-bob",
            "timestamp": "2024-05-01T10:00:02.000Z",
            "content": {"iv": "AAAA", "encryptedKey": "AAAA", "encryptedMessage": "AAAA"}
        }),
        good.remove(0),
    ];

    let conversation = app.open_conversation("u-bob").await.unwrap();

    let texts: Vec<_> = conversation.history().iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, ["still readable", UNDECRYPTABLE]);
    let placeholder = &conversation.history()[1];
    assert_eq!(placeholder.id, "2");
    assert_eq!(placeholder.sender_id, "u-bob");
    assert!(!placeholder.decrypted);
}

#[tokio::test]
async fn peer_key_is_fetched_once() {
    let mut h = harness().await;
    let app = logged_in(&mut h).await;

    drop(app.open_conversation("u-bob").await.unwrap());
    assert!(app.open_conversation("u-bob").await.is_ok());
    assert_eq!(h.backend.key_fetches.load(Ordering::SeqCst), 1);

    assert!(matches!(
        app.open_conversation("u-nobody").await,
        Err(AppError::Api(ApiError::Rejected { status: 404, .. }))
    ));
}
