//! End-to-end tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::Extension;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use parley_core::{Identity, RoomId, close_code};
use parley_server::{RelayServer, RoomRegistry, ServerConfig};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);
const LOCAL_ORIGIN: &str = "http://localhost";

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a relay on an ephemeral port and return its base WS URL.
async fn boot(config: ServerConfig) -> (String, RelayServer) {
    let registry = Arc::new(RoomRegistry::new(config.max_room_members));
    let server = RelayServer::new(config, registry);
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/ws/signaling"), server)
}

async fn boot_default() -> (String, RelayServer) {
    boot(ServerConfig::default()).await
}

async fn connect_with_origin(base: &str, room: &str, origin: &str) -> WsStream {
    let mut request = format!("{base}/{room}/").into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("origin", HeaderValue::from_str(origin).unwrap());
    let (ws, _) = timeout(TIMEOUT, connect_async(request))
        .await
        .unwrap()
        .unwrap();
    ws
}

async fn connect(base: &str, room: &str) -> WsStream {
    connect_with_origin(base, room, LOCAL_ORIGIN).await
}

async fn wait_for_members(server: &RelayServer, room: &str, n: usize) {
    let room = RoomId::parse(room).unwrap();
    timeout(TIMEOUT, async {
        while server.registry().members(&room).len() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("room never reached {n} members"));
}

async fn wait_for_rooms(server: &RelayServer, n: usize) {
    timeout(TIMEOUT, async {
        while server.registry().room_count() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("registry never reached {n} rooms"));
}

async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(Message::text(text)).await.unwrap();
}

/// Next text frame within `wait`, skipping control frames.
async fn next_text_within(ws: &mut WsStream, wait: Duration) -> Option<String> {
    timeout(wait, async {
        while let Some(msg) = ws.next().await {
            match msg.ok()? {
                Message::Text(text) => return Some(text.as_str().to_owned()),
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

async fn read_text(ws: &mut WsStream) -> String {
    next_text_within(ws, TIMEOUT)
        .await
        .expect("expected a text frame")
}

async fn read_json(ws: &mut WsStream) -> Value {
    serde_json::from_str(&read_text(ws).await).unwrap()
}

async fn try_read_text(ws: &mut WsStream) -> Option<String> {
    next_text_within(ws, QUIET).await
}

/// Read until the server's close frame and return its code.
async fn read_close_code(ws: &mut WsStream) -> Option<u16> {
    timeout(TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
                Ok(_) => {}
                Err(_) => return None,
            }
        }
        None
    })
    .await
    .expect("timed out waiting for close")
}

// ── Forwarding ──

#[tokio::test]
async fn offer_is_forwarded_to_peer() {
    let (base, server) = boot_default().await;
    let mut alice = connect(&base, "room-1").await;
    let mut bob = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 2).await;

    send_text(&mut alice, r#"{"type":"offer","sdp":"X"}"#).await;

    let received = read_json(&mut bob).await;
    assert_eq!(received["type"], "offer");
    assert_eq!(received["sdp"], "X");
}

#[tokio::test]
async fn unknown_type_is_forwarded_verbatim() {
    let (base, server) = boot_default().await;
    let mut alice = connect(&base, "room-1").await;
    let mut bob = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 2).await;

    let text = r#"{"type":"renegotiate","extra":{"a":[1,2,3]},"z":null}"#;
    send_text(&mut alice, text).await;
    assert_eq!(read_text(&mut bob).await, text);
}

#[tokio::test]
async fn utf8_binary_frame_is_forwarded() {
    let (base, server) = boot_default().await;
    let mut alice = connect(&base, "room-1").await;
    let mut bob = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 2).await;

    let text = r#"{"type":"candidate","candidate":"c1"}"#;
    alice
        .send(Message::binary(text.as_bytes().to_vec()))
        .await
        .unwrap();
    assert_eq!(read_text(&mut bob).await, text);
}

#[tokio::test]
async fn non_json_is_not_delivered_and_sender_stays_open() {
    let (base, server) = boot_default().await;
    let mut alice = connect(&base, "room-1").await;
    let mut bob = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 2).await;

    send_text(&mut alice, "hello there").await;

    let diag = read_json(&mut alice).await;
    assert_eq!(diag["type"], "error");
    assert_eq!(diag["code"], "PROTOCOL_ERROR");
    assert!(try_read_text(&mut bob).await.is_none());

    send_text(&mut alice, r#"{"type":"answer","sdp":"Y"}"#).await;
    assert_eq!(read_json(&mut bob).await["type"], "answer");
}

#[tokio::test]
async fn sender_receives_echo_by_default() {
    let (base, server) = boot_default().await;
    let mut alice = connect(&base, "room-1").await;
    let mut bob = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 2).await;

    send_text(&mut alice, r#"{"type":"offer"}"#).await;
    assert_eq!(read_json(&mut bob).await["type"], "offer");
    assert_eq!(read_json(&mut alice).await["type"], "offer");
}

#[tokio::test]
async fn sender_excluded_when_echo_disabled() {
    let config = ServerConfig {
        echo_to_sender: false,
        ..ServerConfig::default()
    };
    let (base, server) = boot(config).await;
    let mut alice = connect(&base, "room-1").await;
    let mut bob = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 2).await;

    send_text(&mut alice, r#"{"type":"offer"}"#).await;
    assert_eq!(read_json(&mut bob).await["type"], "offer");
    assert!(try_read_text(&mut alice).await.is_none());
}

#[tokio::test]
async fn rooms_are_isolated() {
    let (base, server) = boot_default().await;
    let mut alice = connect(&base, "room-a").await;
    let mut bob = connect(&base, "room-a").await;
    let mut carol = connect(&base, "room-b").await;
    wait_for_members(&server, "room-a", 2).await;
    wait_for_members(&server, "room-b", 1).await;

    send_text(&mut alice, r#"{"type":"offer"}"#).await;
    assert_eq!(read_json(&mut bob).await["type"], "offer");
    assert!(try_read_text(&mut carol).await.is_none());
}

// ── Membership ──

#[tokio::test]
async fn last_leave_removes_room() {
    let (base, server) = boot_default().await;
    let mut alice = connect(&base, "room-1").await;
    let mut bob = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 2).await;
    assert_eq!(server.registry().room_count(), 1);

    alice.close(None).await.unwrap();
    wait_for_members(&server, "room-1", 1).await;
    assert_eq!(server.registry().room_count(), 1);

    bob.close(None).await.unwrap();
    wait_for_rooms(&server, 0).await;
    assert_eq!(server.registry().connection_count(), 0);
}

#[tokio::test]
async fn full_room_refuses_with_try_again_later() {
    let config = ServerConfig {
        max_room_members: 1,
        ..ServerConfig::default()
    };
    let (base, server) = boot(config).await;
    let _alice = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 1).await;

    let mut bob = connect(&base, "room-1").await;
    assert_eq!(read_close_code(&mut bob).await, Some(close_code::TRY_AGAIN_LATER));
    assert_eq!(server.registry().members(&RoomId::parse("room-1").unwrap()).len(), 1);
}

#[tokio::test]
async fn oversized_frame_closes_with_message_too_big() {
    let config = ServerConfig {
        max_message_bytes: 64,
        ..ServerConfig::default()
    };
    let (base, server) = boot(config).await;
    let mut alice = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 1).await;

    let big = format!(r#"{{"type":"offer","sdp":"{}"}}"#, "x".repeat(200));
    send_text(&mut alice, &big).await;

    assert_eq!(read_close_code(&mut alice).await, Some(close_code::MESSAGE_TOO_BIG));
    wait_for_rooms(&server, 0).await;
}

#[tokio::test]
async fn frame_above_codec_cap_closes_with_message_too_big() {
    let config = ServerConfig {
        max_message_bytes: 64,
        ..ServerConfig::default()
    };
    assert!(config.transport_frame_limit() < 100 * 1024);
    let (base, server) = boot(config).await;
    let mut alice = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 1).await;

    let huge = format!(r#"{{"type":"offer","sdp":"{}"}}"#, "x".repeat(100 * 1024));
    send_text(&mut alice, &huge).await;

    assert_eq!(read_close_code(&mut alice).await, Some(close_code::MESSAGE_TOO_BIG));
    wait_for_rooms(&server, 0).await;
}

#[tokio::test]
async fn dropped_transport_still_cleans_up() {
    let (base, server) = boot_default().await;
    let alice = connect(&base, "room-1").await;
    let mut bob = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 2).await;

    // No close handshake: the TCP stream just goes away.
    drop(alice);
    wait_for_members(&server, "room-1", 1).await;

    send_text(&mut bob, r#"{"type":"offer","sdp":"v=0"}"#).await;
    assert_eq!(read_json(&mut bob).await["type"], "offer");

    drop(bob);
    wait_for_rooms(&server, 0).await;
    assert_eq!(server.registry().connection_count(), 0);
    assert!(server.drain(TIMEOUT).await);
}

// ── Handshake ──

#[tokio::test]
async fn origin_mismatch_closes_with_policy_violation() {
    let (base, server) = boot_default().await;
    let mut ws = connect_with_origin(&base, "room-1", "https://evil.example").await;

    assert_eq!(read_close_code(&mut ws).await, Some(close_code::POLICY_VIOLATION));
    assert_eq!(server.registry().room_count(), 0);
    assert_eq!(server.registry().connection_count(), 0);
}

#[tokio::test]
async fn invalid_room_is_rejected_before_upgrade() {
    let (base, _server) = boot_default().await;
    let mut request = format!("{base}/bad!room/").into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("origin", HeaderValue::from_static(LOCAL_ORIGIN));
    let err = connect_async(request).await.unwrap_err();
    assert_matches!(
        err,
        tokio_tungstenite::tungstenite::Error::Http(resp) if resp.status() == 400
    );
}

#[tokio::test]
async fn room_path_without_trailing_slash_is_accepted() {
    let (base, server) = boot_default().await;
    let mut request = format!("{base}/room-1").into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("origin", HeaderValue::from_static(LOCAL_ORIGIN));
    let (_ws, _) = connect_async(request).await.unwrap();
    wait_for_members(&server, "room-1", 1).await;
}

#[tokio::test]
async fn identity_required_without_identity_is_refused() {
    let config = ServerConfig {
        require_identity: true,
        ..ServerConfig::default()
    };
    let (base, server) = boot(config).await;
    let mut ws = connect(&base, "room-1").await;

    assert_eq!(read_close_code(&mut ws).await, Some(close_code::POLICY_VIOLATION));
    assert_eq!(server.registry().room_count(), 0);
}

#[tokio::test]
async fn identity_required_with_identity_is_admitted() {
    let config = ServerConfig {
        require_identity: true,
        ..ServerConfig::default()
    };
    let server = RelayServer::new(config, Arc::new(RoomRegistry::default()));
    let app = server.router().layer(Extension(Identity::new("alice")));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _serve = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let base = format!("ws://{addr}/ws/signaling");

    let _ws = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 1).await;
    let members = server.registry().members(&RoomId::parse("room-1").unwrap());
    assert_eq!(
        members[0].identity().map(|i| i.user_id.as_str()),
        Some("alice")
    );
}

#[tokio::test]
async fn server_connection_cap_refuses_with_try_again_later() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let (base, server) = boot(config).await;
    let _alice = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 1).await;

    let mut bob = connect(&base, "room-2").await;
    assert_eq!(read_close_code(&mut bob).await, Some(close_code::TRY_AGAIN_LATER));
}

// ── Lifecycle ──

#[tokio::test]
async fn shutdown_closes_connections_with_going_away() {
    let (base, server) = boot_default().await;
    let mut alice = connect(&base, "room-1").await;
    let mut bob = connect(&base, "room-2").await;
    wait_for_members(&server, "room-1", 1).await;
    wait_for_members(&server, "room-2", 1).await;

    server.shutdown().shutdown();

    assert_eq!(read_close_code(&mut alice).await, Some(close_code::GOING_AWAY));
    assert_eq!(read_close_code(&mut bob).await, Some(close_code::GOING_AWAY));
    assert!(server.drain(TIMEOUT).await);
    assert_eq!(server.registry().room_count(), 0);
}

#[tokio::test]
async fn unresponsive_peer_is_closed_after_heartbeat_timeout() {
    let config = ServerConfig {
        heartbeat_interval_ms: 50,
        heartbeat_timeout_ms: 150,
        ..ServerConfig::default()
    };
    let (base, server) = boot(config).await;
    let mut alice = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 1).await;

    // The client never polls its stream, so pings go unanswered.
    tokio::time::sleep(Duration::from_millis(600)).await;
    wait_for_rooms(&server, 0).await;
    assert_eq!(read_close_code(&mut alice).await, Some(close_code::GOING_AWAY));
}

#[tokio::test]
async fn health_reports_live_counts() {
    let (base, server) = boot_default().await;
    let _alice = connect(&base, "room-1").await;
    wait_for_members(&server, "room-1", 1).await;

    let http = base
        .replace("ws://", "http://")
        .replace("/ws/signaling", "/health");
    let body: Value = reqwest::get(&http).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["rooms"], 1);
}
