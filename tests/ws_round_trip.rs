//! End-to-end tests: the real router on an ephemeral port, driven over
//! WebSocket and REST.

#![allow(clippy::panic, clippy::indexing_slicing)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use room_gateway::api::build_app;
use room_gateway::app_state::AppState;
use room_gateway::auth::{Claims, InMemoryRoomAuthority, JwtVerifier};
use room_gateway::config::RealtimeConfig;
use room_gateway::domain::{RoomId, RoomRegistry, UserId};
use room_gateway::persistence::{InMemoryMessageStore, MessageStore};
use room_gateway::service::MessageGateway;

const SECRET: &str = "integration-secret";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
}

impl TestServer {
    async fn start(authority: InMemoryRoomAuthority, config: RealtimeConfig) -> Self {
        let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
        let registry = Arc::new(RoomRegistry::new(
            Arc::clone(&store),
            config.room_limits(),
            config.room_retire_grace,
        ));
        let gateway = Arc::new(MessageGateway::new(
            registry,
            Arc::new(authority),
            store,
            config,
        ));
        let app = build_app(AppState {
            gateway,
            jwt: Arc::new(JwtVerifier::new(SECRET)),
        });

        let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local addr");
        };
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr }
    }

    fn http(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn connect(&self, room: &str, user: &str) -> Client {
        let url = format!("ws://{}/ws?room_id={room}&token={}", self.addr, token(user));
        let Ok((mut ws, _)) = connect_async(url).await else {
            panic!("websocket connect failed for {user}");
        };
        let joined = next_json(&mut ws).await;
        assert_eq!(joined["type"], "event");
        assert_eq!(joined["payload"]["event"], "joined");
        assert_eq!(joined["payload"]["user_id"], user);
        ws
    }

    async fn try_connect(&self, room: &str, user: &str) -> bool {
        let url = format!("ws://{}/ws?room_id={room}&token={}", self.addr, token(user));
        connect_async(url).await.is_ok()
    }

    async fn get_json(&self, path: &str, user: Option<&str>) -> (u16, Value) {
        let mut request = reqwest::Client::new().get(self.http(path));
        if let Some(user) = user {
            request = request.bearer_auth(token(user));
        }
        let Ok(response) = request.send().await else {
            panic!("request to {path} failed");
        };
        let status = response.status().as_u16();
        let Ok(body) = response.json::<Value>().await else {
            panic!("non-JSON body from {path}");
        };
        (status, body)
    }

    async fn post_json(&self, path: &str, user: &str, body: &Value) -> (u16, Value) {
        let request = reqwest::Client::new()
            .post(self.http(path))
            .bearer_auth(token(user))
            .json(body);
        let Ok(response) = request.send().await else {
            panic!("request to {path} failed");
        };
        let status = response.status().as_u16();
        let Ok(body) = response.json::<Value>().await else {
            panic!("non-JSON body from {path}");
        };
        (status, body)
    }

    /// Polls `/health` until it reports `expected` live sessions.
    async fn wait_for_sessions(&self, expected: u64) {
        let mut sessions = Value::Null;
        for _ in 0..200 {
            let (_, body) = self.get_json("/health", None).await;
            sessions = body["sessions"].clone();
            if sessions == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {expected} sessions, health reports {sessions}");
    }
}

fn token(user: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user.to_string(),
        exp: usize::try_from(now + 3600).unwrap_or(0),
        iat: usize::try_from(now).unwrap_or(0),
    };
    let Ok(token) = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    ) else {
        panic!("token encoding failed");
    };
    token
}

async fn next_frame(ws: &mut Client) -> Option<Message> {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
        match next {
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
            Ok(Some(Ok(msg))) => return Some(msg),
            Ok(Some(Err(_)) | None) => return None,
            Err(_) => panic!("timed out waiting for a frame"),
        }
    }
}

async fn next_json(ws: &mut Client) -> Value {
    match next_frame(ws).await {
        Some(Message::Text(text)) => {
            let Ok(value) = serde_json::from_str(text.as_str()) else {
                panic!("frame is not JSON: {text}");
            };
            value
        }
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Reads frames until one matches `pred`.
async fn wait_for(ws: &mut Client, pred: impl Fn(&Value) -> bool) -> Value {
    loop {
        let frame = next_json(ws).await;
        if pred(&frame) {
            return frame;
        }
    }
}

/// Reads until the close frame and returns its code and reason.
async fn expect_close(ws: &mut Client) -> (CloseCode, String) {
    match next_frame(ws).await {
        Some(Message::Close(Some(frame))) => (frame.code, frame.reason.as_str().to_string()),
        other => panic!("expected a close frame, got {other:?}"),
    }
}

async fn send_raw(ws: &mut Client, text: &str) {
    let sent = ws.send(Message::text(text.to_string())).await;
    assert!(sent.is_ok(), "send failed");
}

async fn send(ws: &mut Client, frame: Value) {
    let sent = ws.send(Message::text(frame.to_string())).await;
    assert!(sent.is_ok(), "send failed");
}

fn is_message_event(frame: &Value) -> bool {
    frame["type"] == "event" && frame["payload"]["event"] == "message"
}

fn ids(room: &str, user: &str) -> (RoomId, UserId) {
    let (Ok(room), Ok(user)) = (RoomId::parse(room), UserId::parse(user)) else {
        panic!("valid ids");
    };
    (room, user)
}

#[tokio::test]
async fn health_reports_live_counts() {
    let server = TestServer::start(InMemoryRoomAuthority::open(), RealtimeConfig::default()).await;
    let (status, body) = server.get_json("/health", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rooms"], 0);

    let _alice = server.connect("listing-1", "alice").await;
    let (_, body) = server.get_json("/health", None).await;
    assert_eq!(body["rooms"], 1);
    assert_eq!(body["sessions"], 1);
}

#[tokio::test]
async fn publish_reaches_every_member_in_order() {
    let server = TestServer::start(InMemoryRoomAuthority::open(), RealtimeConfig::default()).await;
    let mut alice = server.connect("listing-42", "alice").await;
    let mut bob = server.connect("listing-42", "bob").await;

    send(
        &mut alice,
        serde_json::json!({"id": "a1", "command": "publish", "body": "is this still available?"}),
    )
    .await;
    send(
        &mut alice,
        serde_json::json!({"id": "a2", "command": "publish", "body": "I can pick it up today"}),
    )
    .await;

    let reply = wait_for(&mut alice, |f| f["type"] == "response" && f["id"] == "a2").await;
    assert_eq!(reply["payload"]["seq"], 2);

    let first = wait_for(&mut bob, is_message_event).await;
    let second = wait_for(&mut bob, is_message_event).await;
    assert_eq!(first["payload"]["seq"], 1);
    assert_eq!(first["payload"]["sender_id"], "alice");
    assert_eq!(first["payload"]["body"], "is this still available?");
    assert_eq!(second["payload"]["seq"], 2);

    send(
        &mut bob,
        serde_json::json!({"id": "b1", "command": "history", "since_seq": 1}),
    )
    .await;
    let history = wait_for(&mut bob, |f| f["id"] == "b1").await;
    assert_eq!(history["type"], "response");
    let Some(messages) = history["payload"]["messages"].as_array() else {
        panic!("history payload has no messages");
    };
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["seq"], 2);
}

#[tokio::test]
async fn ping_and_invalid_body_get_replies() {
    let server = TestServer::start(InMemoryRoomAuthority::open(), RealtimeConfig::default()).await;
    let mut alice = server.connect("listing-7", "alice").await;

    send(&mut alice, serde_json::json!({"id": "p", "command": "ping"})).await;
    let pong = next_json(&mut alice).await;
    assert_eq!(pong["type"], "response");
    assert_eq!(pong["payload"]["pong"], true);

    send(
        &mut alice,
        serde_json::json!({"id": "e", "command": "publish", "body": "  "}),
    )
    .await;
    let error = next_json(&mut alice).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["id"], "e");
    assert_eq!(error["payload"]["code"], 1002);
}

#[tokio::test]
async fn too_many_malformed_frames_close_the_connection() {
    let config = RealtimeConfig {
        malformed_frame_limit: 1,
        ..RealtimeConfig::default()
    };
    let server = TestServer::start(InMemoryRoomAuthority::open(), config).await;
    let mut alice = server.connect("listing-9", "alice").await;

    send_raw(&mut alice, "not json").await;
    send_raw(&mut alice, r#"{"id":"x","command":"dance"}"#).await;

    let first = next_json(&mut alice).await;
    assert_eq!(first["type"], "error");
    assert_eq!(first["payload"]["code"], 1001);
    let last = next_json(&mut alice).await;
    assert_eq!(last["type"], "error");
    assert_eq!(last["id"], "x");
    assert_eq!(last["payload"]["code"], 1001);

    let (code, reason) = expect_close(&mut alice).await;
    assert_eq!(code, CloseCode::Protocol);
    assert_eq!(reason, "protocol_violation");

    server.wait_for_sessions(0).await;
}

#[tokio::test]
async fn idle_session_is_drained_then_closed() {
    let config = RealtimeConfig {
        idle_timeout: Duration::from_millis(150),
        drain_grace: Duration::from_millis(100),
        ..RealtimeConfig::default()
    };
    let server = TestServer::start(InMemoryRoomAuthority::open(), config).await;
    let mut alice = server.connect("listing-11", "alice").await;

    let (code, reason) = expect_close(&mut alice).await;
    assert_eq!(code, CloseCode::Policy);
    assert_eq!(reason, "idle_timeout");

    server.wait_for_sessions(0).await;
}

#[tokio::test]
async fn membership_is_enforced_on_ws_and_rest() {
    let authority = InMemoryRoomAuthority::closed();
    let (room, alice) = ids("listing-5", "alice");
    authority.add_member(room, alice).await;
    let server = TestServer::start(authority, RealtimeConfig::default()).await;

    assert!(server.try_connect("listing-5", "alice").await);
    assert!(!server.try_connect("listing-5", "mallory").await);
    assert!(!server.try_connect("listing-404", "alice").await);

    let (status, _) = server
        .get_json("/api/v1/rooms/listing-5/messages", Some("mallory"))
        .await;
    assert_eq!(status, 403);
    let (status, _) = server
        .get_json("/api/v1/rooms/listing-404/messages", Some("alice"))
        .await;
    assert_eq!(status, 404);
    let (status, body) = server.get_json("/api/v1/rooms/listing-5/messages", None).await;
    assert_eq!(status, 401);
    assert_eq!(body["error"]["code"], 401);
}

#[tokio::test]
async fn rest_history_and_participants() {
    let server = TestServer::start(InMemoryRoomAuthority::open(), RealtimeConfig::default()).await;
    let mut alice = server.connect("listing-3", "alice").await;
    let _bob = server.connect("listing-3", "bob").await;

    for (id, body) in [("1", "hello"), ("2", "world")] {
        send(
            &mut alice,
            serde_json::json!({"id": id, "command": "publish", "body": body}),
        )
        .await;
    }
    wait_for(&mut alice, |f| f["type"] == "response" && f["id"] == "2").await;

    let (status, body) = server
        .get_json("/api/v1/rooms/listing-3/messages?since_seq=0&limit=10", Some("carol"))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["messages"][0]["body"], "hello");
    assert_eq!(body["messages"][1]["body"], "world");
    assert_eq!(body["next_since_seq"], 2);

    let (status, body) = server
        .get_json("/api/v1/rooms/listing-3/participants", Some("carol"))
        .await;
    assert_eq!(status, 200);
    let Some(participants) = body["participants"].as_array() else {
        panic!("participants missing");
    };
    let users: Vec<&str> = participants
        .iter()
        .filter_map(|p| p["user_id"].as_str())
        .collect();
    assert_eq!(users, vec!["alice", "bob"]);
}

#[tokio::test]
async fn created_room_is_joinable_by_its_members() {
    let server =
        TestServer::start(InMemoryRoomAuthority::closed(), RealtimeConfig::default()).await;
    let request = serde_json::json!({
        "room_id": "listing-77-chat",
        "listing_id": "77",
        "members": ["bob"],
    });

    let (status, body) = server.post_json("/api/v1/rooms", "alice", &request).await;
    assert_eq!(status, 201);
    assert_eq!(body["room_id"], "listing-77-chat");
    assert_eq!(body["members"], serde_json::json!(["alice", "bob"]));

    let mut bob = server.connect("listing-77-chat", "bob").await;
    send(&mut bob, serde_json::json!({"id": "p", "command": "ping"})).await;
    let pong = next_json(&mut bob).await;
    assert_eq!(pong["payload"]["pong"], true);
    assert!(!server.try_connect("listing-77-chat", "carol").await);

    let (status, body) = server.get_json("/api/v1/rooms", Some("bob")).await;
    assert_eq!(status, 200);
    assert_eq!(body["rooms"][0]["room_id"], "listing-77-chat");
    assert_eq!(body["rooms"][0]["listing_id"], "77");
    let (_, body) = server.get_json("/api/v1/rooms", Some("carol")).await;
    assert_eq!(body["rooms"], serde_json::json!([]));

    let (status, body) = server.post_json("/api/v1/rooms", "carol", &request).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], 2005);
}
