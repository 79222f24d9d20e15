// ============================
// chatterbox-lib/tests/integration.rs
// ============================
//! End-to-end scenarios over real sockets: a server on an ephemeral port,
//! driven by WebSocket and HTTP clients.

use chatterbox_lib::config::Settings;
use chatterbox_lib::domain::{Message, MessageType};
use chatterbox_lib::hub::Hub;
use chatterbox_lib::store::{SqliteStore, Store};
use chatterbox_lib::{ws_router, AppState};
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(max_rooms: usize, max_history: usize) -> (SocketAddr, Arc<SqliteStore>, Hub) {
    let store = Arc::new(SqliteStore::open(":memory:").await.unwrap());
    let hub = Hub::new(store.clone(), max_rooms, max_history);
    let runner = hub.clone();
    tokio::spawn(async move { runner.run().await });

    let settings = Settings {
        max_rooms,
        max_history,
        ..Settings::default()
    };
    let app = ws_router::create_router(AppState::new(hub.clone(), store.clone(), settings));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, store, hub)
}

/// Connect and consume the `system` notice every session receives first.
async fn connect(addr: SocketAddr, user: &str) -> WsClient {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws?user={user}"))
        .await
        .expect("websocket connect");
    let notice = next_json_within(&mut ws, WAIT, "system notice on connect").await;
    assert_eq!(notice["type"], "system");
    assert_eq!(notice["text"], format!("connected as {user}"));
    ws
}

async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(WsMessage::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

/// Next JSON text frame, skipping protocol frames. Panics after `wait`.
async fn next_json_within(ws: &mut WsClient, wait: Duration, what: &str) -> Value {
    try_next_json(ws, wait)
        .await
        .unwrap_or_else(|| panic!("no frame within deadline: {what}"))
}

/// Next JSON text frame, or `None` when `wait` elapses first.
async fn try_next_json(ws: &mut WsClient, wait: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let frame = match timeout(remaining, ws.next()).await {
            Err(_) | Ok(None) => return None,
            Ok(Some(frame)) => frame.expect("read frame"),
        };
        if let WsMessage::Text(text) = frame {
            return Some(serde_json::from_str(&text).expect("frame is JSON"));
        }
    }
}

/// Read frames until one satisfies the predicate. Panics after `wait`.
async fn await_frame<F>(ws: &mut WsClient, wait: Duration, what: &str, predicate: F) -> Value
where
    F: Fn(&Value) -> bool,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match try_next_json(ws, remaining).await {
            Some(frame) if predicate(&frame) => return frame,
            Some(_) => {}
            None => panic!("no matching frame within deadline: {what}"),
        }
    }
}

const WAIT: Duration = Duration::from_secs(2);

async fn join_room(ws: &mut WsClient, room: &str) {
    send_json(ws, json!({"type": "join", "room": room})).await;
    // Presence is delivered directly to the joiner once the join completes.
    await_frame(ws, WAIT, "presence after join", |f| f["type"] == "presence").await;
}

#[tokio::test]
async fn solo_join_and_chat() {
    let (addr, store, _hub) = spawn_server(100, 50).await;
    let mut alice = connect(addr, "alice").await;

    send_json(&mut alice, json!({"type": "join", "room": "general"})).await;

    // Join and presence arrive in either order relative to each other.
    let mut saw_join = false;
    let mut saw_presence = false;
    while !(saw_join && saw_presence) {
        let frame = next_json_within(&mut alice, WAIT, "join/presence").await;
        match frame["type"].as_str().unwrap() {
            "join" => {
                assert_eq!(frame["user"], "alice");
                assert_eq!(frame["room"], "general");
                saw_join = true;
            }
            "presence" => {
                assert_eq!(frame["users"], json!(["alice"]));
                saw_presence = true;
            }
            other => panic!("unexpected frame type {other}"),
        }
    }

    send_json(
        &mut alice,
        json!({"type": "chat", "room": "general", "text": "hello"}),
    )
    .await;

    let chat = await_frame(&mut alice, WAIT, "own chat echo", |f| f["type"] == "chat").await;
    assert_eq!(chat["user"], "alice");
    assert_eq!(chat["text"], "hello");
    assert_eq!(chat["room"], "general");

    let history = store.history("general", 50).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, MessageType::Chat);
    assert_eq!(history[0].text, "hello");
}

#[tokio::test]
async fn broadcast_reaches_every_member() {
    let (addr, _store, _hub) = spawn_server(100, 50).await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    let mut charlie = connect(addr, "charlie").await;

    join_room(&mut alice, "general").await;
    join_room(&mut bob, "general").await;
    join_room(&mut charlie, "general").await;

    send_json(
        &mut alice,
        json!({"type": "chat", "room": "general", "text": "hello all"}),
    )
    .await;

    for peer in [&mut bob, &mut charlie] {
        let chat = await_frame(peer, WAIT, "broadcast chat", |f| f["type"] == "chat").await;
        assert_eq!(chat["text"], "hello all");
        assert_eq!(chat["user"], "alice");
    }
}

#[tokio::test]
async fn rooms_are_isolated() {
    let (addr, _store, _hub) = spawn_server(100, 50).await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;

    join_room(&mut alice, "room1").await;
    join_room(&mut bob, "room2").await;

    send_json(
        &mut alice,
        json!({"type": "chat", "room": "room1", "text": "only for room1"}),
    )
    .await;

    let mut leaked = false;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match try_next_json(&mut bob, remaining).await {
            Some(frame) if frame["type"] == "chat" && frame["text"] == "only for room1" => {
                leaked = true;
                break;
            }
            Some(_) => {}
            None => break,
        }
    }
    assert!(!leaked, "bob observed a chat from a room he never joined");
}

#[tokio::test]
async fn history_is_delivered_on_join_oldest_first() {
    let (addr, store, _hub) = spawn_server(100, 50).await;
    for i in 0..5 {
        let msg = Message {
            kind: MessageType::Chat,
            room: "general".to_string(),
            user: "scribe".to_string(),
            text: format!("msg-{i}"),
            timestamp: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, i).unwrap()),
        };
        store.save(&msg).await.unwrap();
    }

    let mut alice = connect(addr, "alice").await;
    send_json(&mut alice, json!({"type": "join", "room": "general"})).await;

    let history = await_frame(&mut alice, WAIT, "history frame", |f| f["type"] == "history").await;
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 5);
    for (i, msg) in messages.iter().enumerate() {
        assert_eq!(msg["text"], format!("msg-{i}"));
    }
}

#[tokio::test]
async fn disconnect_broadcasts_leave() {
    let (addr, _store, _hub) = spawn_server(100, 50).await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;

    join_room(&mut alice, "general").await;
    join_room(&mut bob, "general").await;

    drop(bob);

    let leave = await_frame(&mut alice, WAIT, "leave broadcast", |f| f["type"] == "leave").await;
    assert_eq!(leave["user"], "bob");
    assert_eq!(leave["room"], "general");
}

#[tokio::test]
async fn bad_input_does_not_disconnect() {
    let (addr, _store, _hub) = spawn_server(100, 50).await;
    let mut alice = connect(addr, "alice").await;

    alice
        .send(WsMessage::Text("not json".into()))
        .await
        .unwrap();

    let error = next_json_within(&mut alice, WAIT, "error frame").await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["message"], "invalid JSON");

    // Exactly one error frame, and the connection is still usable.
    send_json(&mut alice, json!({"type": "join", "room": "general"})).await;
    let presence =
        await_frame(&mut alice, WAIT, "presence after join", |f| f["type"] == "presence").await;
    assert_eq!(presence["users"], json!(["alice"]));
}

#[tokio::test]
async fn empty_room_is_removed_from_listing() {
    let (addr, _store, _hub) = spawn_server(100, 50).await;
    let mut alice = connect(addr, "alice").await;

    join_room(&mut alice, "temp").await;
    send_json(&mut alice, json!({"type": "leave", "room": "temp"})).await;
    sleep(Duration::from_millis(200)).await;

    let rooms: Vec<Value> = reqwest::get(format!("http://{addr}/api/rooms"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(rooms.iter().all(|r| r["name"] != "temp"));
}

#[tokio::test]
async fn room_capacity_is_enforced() {
    let (addr, _store, hub) = spawn_server(2, 50).await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    let mut carol = connect(addr, "carol").await;

    join_room(&mut alice, "room1").await;
    join_room(&mut bob, "room2").await;
    send_json(&mut carol, json!({"type": "join", "room": "room3"})).await;

    let error = await_frame(&mut carol, WAIT, "capacity error", |f| f["type"] == "error").await;
    assert_eq!(error["message"], "max rooms reached");

    sleep(Duration::from_millis(100)).await;
    let mut names: Vec<String> = hub
        .list_rooms()
        .into_iter()
        .map(|r| r.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["room1".to_string(), "room2".to_string()]);

    // Exactly one error frame; nothing else arrives for carol.
    assert!(try_next_json(&mut carol, Duration::from_millis(300))
        .await
        .is_none());
}

#[tokio::test]
async fn upgrade_without_user_is_rejected() {
    let (addr, _store, _hub) = spawn_server(100, 50).await;

    let err = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect_err("upgrade should be rejected");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 400);
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn health_and_room_info_endpoints() {
    let (addr, _store, _hub) = spawn_server(100, 50).await;

    let health: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let mut alice = connect(addr, "alice").await;
    join_room(&mut alice, "general").await;

    let info = reqwest::get(format!("http://{addr}/api/rooms/general"))
        .await
        .unwrap();
    assert_eq!(info.status(), 200);
    let info: Value = info.json().await.unwrap();
    assert_eq!(info["name"], "general");
    assert_eq!(info["user_count"], 1);

    let missing = reqwest::get(format!("http://{addr}/api/rooms/nowhere"))
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let missing: Value = missing.json().await.unwrap();
    assert_eq!(missing["error"], "room not found");
}

#[tokio::test]
async fn rejoin_after_cleanup_gets_no_stale_presence() {
    let (addr, _store, _hub) = spawn_server(100, 50).await;

    let mut alice = connect(addr, "alice").await;
    join_room(&mut alice, "temp").await;
    drop(alice);
    sleep(Duration::from_millis(200)).await;

    let mut bob = connect(addr, "bob").await;
    send_json(&mut bob, json!({"type": "join", "room": "temp"})).await;
    let presence =
        await_frame(&mut bob, WAIT, "presence after rejoin", |f| f["type"] == "presence").await;
    assert_eq!(presence["users"], json!(["bob"]));
}
