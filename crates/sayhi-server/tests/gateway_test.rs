//! End-to-end tests for the gateway handshake, presence roster, typing relay,
//! message push, last-seen bookkeeping and profile updates.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use sayhi_db::Database;
use sayhi_server::config::Config;
use sayhi_server::{build_router, build_state};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start the server on a random port and return its address.
async fn start_test_server() -> SocketAddr {
    start_test_server_with_db().await.0
}

/// Like `start_test_server`, also handing back the database for direct edits.
async fn start_test_server_with_db() -> (SocketAddr, Arc<Database>) {
    let config = Config {
        jwt_secret: "test-jwt-secret".into(),
        encryption_key: "test-encryption-key".into(),
        upload_dir: std::env::temp_dir().join(format!("sayhi-test-{}", uuid::Uuid::new_v4())),
        ..Config::default()
    };

    let db = Database::open_in_memory().expect("Failed to open DB");
    let state = build_state(db, &config);
    let db = state.db.clone();
    let app = build_router(state, &config).expect("Failed to build router");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, db)
}

/// Sign up a fresh account and return (user_id, token).
async fn signup(addr: SocketAddr, name: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/api/auth/signup", addr))
        .json(&json!({
            "full_name": name,
            "email": format!("{}@example.com", name.to_lowercase()),
            "password": "hunter22",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let body: Value = resp.json().await.unwrap();
    let id = body["user"]["id"].as_str().unwrap().to_string();
    let token = body["token"].as_str().unwrap().to_string();
    (id, token)
}

async fn connect(addr: SocketAddr, token: &str) -> Socket {
    let url = format!("ws://{}/gateway?token={}", addr, token);
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WS connect failed");
    ws
}

/// Read events until one of the given type arrives, skipping pings and
/// anything else.
async fn expect_event(ws: &mut Socket, kind: &str) -> Value {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let event: Value = serde_json::from_str(&text).unwrap();
                    if event["type"] == kind {
                        return event;
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("socket ended while waiting for {}: {:?}", kind, other),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", kind))
}

/// The account as the server currently sees it.
async fn me(addr: SocketAddr, token: &str) -> Value {
    reqwest::Client::new()
        .get(format!("http://{}/api/auth/check", addr))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Read until the server closes the socket.
async fn wait_closed(ws: &mut Socket) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    })
    .await
    .expect("socket was not closed");
}

fn set_flag(db: &Database, user_id: &str, column: &str, value: bool) {
    db.with_conn(|conn| {
        conn.execute(
            &format!("UPDATE users SET {} = {} WHERE id = ?1", column, value as i32),
            [user_id],
        )?;
        Ok(())
    })
    .unwrap();
}

fn roster(event: &Value) -> Vec<String> {
    let mut ids: Vec<String> = event["data"]["user_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_handshake_without_token_is_rejected() {
    let addr = start_test_server().await;

    let url = format!("ws://{}/gateway", addr);
    assert!(tokio_tungstenite::connect_async(&url).await.is_err());

    let url = format!("ws://{}/gateway?token=garbage", addr);
    assert!(tokio_tungstenite::connect_async(&url).await.is_err());
}

#[tokio::test]
async fn test_ready_and_roster_on_connect() {
    let addr = start_test_server().await;
    let (alice_id, alice_token) = signup(addr, "Alice").await;
    let (bob_id, bob_token) = signup(addr, "Bob").await;

    let mut alice = connect(addr, &alice_token).await;
    let ready = expect_event(&mut alice, "ready").await;
    assert_eq!(ready["data"]["user_id"], alice_id.as_str());

    let first = expect_event(&mut alice, "getOnlineUsers").await;
    assert_eq!(roster(&first), vec![alice_id.clone()]);

    let mut bob = connect(addr, &bob_token).await;
    expect_event(&mut bob, "ready").await;

    let mut both = vec![alice_id.clone(), bob_id.clone()];
    both.sort();
    assert_eq!(roster(&expect_event(&mut alice, "getOnlineUsers").await), both);
    assert_eq!(roster(&expect_event(&mut bob, "getOnlineUsers").await), both);

    // Bob leaves; Alice sees the shrunken roster
    bob.close(None).await.unwrap();
    drop(bob);
    assert_eq!(
        roster(&expect_event(&mut alice, "getOnlineUsers").await),
        vec![alice_id]
    );
}

#[tokio::test]
async fn test_typing_is_relayed_to_receiver_only() {
    let addr = start_test_server().await;
    let (alice_id, alice_token) = signup(addr, "Alice").await;
    let (bob_id, bob_token) = signup(addr, "Bob").await;

    let mut alice = connect(addr, &alice_token).await;
    expect_event(&mut alice, "ready").await;
    let mut bob = connect(addr, &bob_token).await;
    expect_event(&mut bob, "ready").await;

    let cmd = json!({ "type": "typing", "data": { "receiver_id": alice_id } });
    bob.send(Message::Text(cmd.to_string().into())).await.unwrap();

    let typing = expect_event(&mut alice, "userTyping").await;
    assert_eq!(typing["data"]["sender_id"], bob_id.as_str());

    let cmd = json!({ "type": "stopTyping", "data": { "receiver_id": alice_id } });
    bob.send(Message::Text(cmd.to_string().into())).await.unwrap();

    let stopped = expect_event(&mut alice, "userStoppedTyping").await;
    assert_eq!(stopped["data"]["sender_id"], bob_id.as_str());
}

#[tokio::test]
async fn test_sent_message_is_pushed_decrypted() {
    let addr = start_test_server().await;
    let (alice_id, alice_token) = signup(addr, "Alice").await;
    let (bob_id, bob_token) = signup(addr, "Bob").await;

    let mut bob = connect(addr, &bob_token).await;
    expect_event(&mut bob, "ready").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/api/messages/send/{}", addr, bob_id))
        .bearer_auth(&alice_token)
        .json(&json!({ "text": "hello bob" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let sent: Value = resp.json().await.unwrap();
    assert_eq!(sent["text"], "hello bob");

    let pushed = expect_event(&mut bob, "newMessage").await;
    let message = &pushed["data"]["message"];
    assert_eq!(message["id"], sent["id"]);
    assert_eq!(message["sender_id"], alice_id.as_str());
    assert_eq!(message["text"], "hello bob");
    assert_eq!(message["is_seen"], false);

    // Reading the thread marks it seen for Bob
    let thread: Value = client
        .get(format!("http://{}/api/messages/{}", addr, alice_id))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let thread = thread.as_array().unwrap();
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0]["text"], "hello bob");
    assert_eq!(thread[0]["is_seen"], true);
}

#[tokio::test]
async fn test_second_connection_replaces_first() {
    let addr = start_test_server().await;
    let (_alice_id, alice_token) = signup(addr, "Alice").await;

    let mut first = connect(addr, &alice_token).await;
    expect_event(&mut first, "ready").await;

    let mut second = connect(addr, &alice_token).await;
    expect_event(&mut second, "ready").await;

    expect_event(&mut first, "sessionReplaced").await;
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let addr = start_test_server().await;

    let resp = reqwest::get(format!("http://{}/api/messages/contacts", addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let body: Value = resp.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().starts_with("Unauthorized"));
}

#[tokio::test]
async fn test_disconnect_records_last_seen() {
    let addr = start_test_server().await;
    let (_alice_id, alice_token) = signup(addr, "Alice").await;
    assert!(me(addr, &alice_token).await["last_seen"].is_null());

    let mut alice = connect(addr, &alice_token).await;
    expect_event(&mut alice, "ready").await;
    alice.close(None).await.unwrap();
    drop(alice);

    // The write happens in the background after cleanup
    let mut last_seen = Value::Null;
    for _ in 0..50 {
        last_seen = me(addr, &alice_token).await["last_seen"].clone();
        if !last_seen.is_null() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(last_seen.is_string(), "last_seen never recorded");
}

#[tokio::test]
async fn test_replaced_connection_closing_keeps_user_online() {
    let addr = start_test_server().await;
    let (alice_id, alice_token) = signup(addr, "Alice").await;
    let (bob_id, bob_token) = signup(addr, "Bob").await;

    let mut first = connect(addr, &alice_token).await;
    expect_event(&mut first, "ready").await;
    let mut second = connect(addr, &alice_token).await;
    expect_event(&mut second, "ready").await;

    expect_event(&mut first, "sessionReplaced").await;
    wait_closed(&mut first).await;
    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The stale socket's cleanup neither took Alice offline nor stamped last-seen
    assert!(me(addr, &alice_token).await["last_seen"].is_null());

    let mut bob = connect(addr, &bob_token).await;
    expect_event(&mut bob, "ready").await;
    let mut both = vec![alice_id.clone(), bob_id];
    both.sort();
    assert_eq!(roster(&expect_event(&mut bob, "getOnlineUsers").await), both);

    // Events for Alice still reach the surviving connection
    let cmd = json!({ "type": "typing", "data": { "receiver_id": alice_id } });
    bob.send(Message::Text(cmd.to_string().into())).await.unwrap();
    expect_event(&mut second, "userTyping").await;
}

#[tokio::test]
async fn test_blocked_or_unverified_account_is_refused_at_handshake() {
    let (addr, db) = start_test_server_with_db().await;
    let (alice_id, alice_token) = signup(addr, "Alice").await;
    let (bob_id, bob_token) = signup(addr, "Bob").await;

    set_flag(&db, &alice_id, "is_blocked", true);
    set_flag(&db, &bob_id, "is_verified", false);

    for token in [&alice_token, &bob_token] {
        let url = format!("ws://{}/gateway?token={}", addr, token);
        match tokio_tungstenite::connect_async(&url).await {
            Err(WsError::Http(resp)) => assert_eq!(resp.status(), 403),
            Err(other) => panic!("expected an HTTP rejection, got {:?}", other),
            Ok(_) => panic!("handshake should have been refused"),
        }
    }
}

#[tokio::test]
async fn test_profile_picture_update() {
    let addr = start_test_server().await;
    let (_alice_id, alice_token) = signup(addr, "Alice").await;

    let client = reqwest::Client::new();
    let resp = client
        .put(format!("http://{}/api/auth/update-profile", addr))
        .bearer_auth(&alice_token)
        .json(&json!({ "profile_pic": "data:image/png;base64,iVBORw0KGgo=" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let user: Value = resp.json().await.unwrap();
    let url = user["profile_pic"].as_str().unwrap().to_string();
    assert!(url.ends_with(".png"));
    assert_eq!(me(addr, &alice_token).await["profile_pic"], url.as_str());

    let resp = client
        .put(format!("http://{}/api/auth/update-profile", addr))
        .bearer_auth(&alice_token)
        .json(&json!({ "profile_pic": "not a data uri" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Failed to upload image.");
}
