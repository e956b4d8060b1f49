//! End-to-end tests through the observer WebSocket server

use altpool::config::Config;
use altpool::game::{GameEvent, MockConnector};
use altpool::server::ObserverServer;
use altpool::session::SessionManager;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

type Client = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream closed")
            .expect("websocket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string())).await.unwrap();
}

async fn start() -> (Arc<MockConnector>, tokio::sync::mpsc::Sender<()>, String) {
    let connector = Arc::new(MockConnector::new());
    let mut manager = SessionManager::new(&Config::default(), connector.clone());
    let server = ObserverServer::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", server.local_addr());

    let commands = manager.command_sender();
    let broadcaster = manager.broadcaster();
    tokio::spawn(server.run(commands, broadcaster));

    let shutdown = manager.shutdown_handle();
    tokio::spawn(async move { manager.run().await });

    (connector, shutdown, url)
}

async fn wait_for_connection(
    connector: &MockConnector,
    username: &str,
) -> Arc<altpool::game::mock::MockConnection> {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(conn) = connector.latest(username) {
                break conn;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection never opened")
}

#[tokio::test]
async fn test_add_alt_round_trip() {
    let (connector, shutdown, url) = start().await;
    let (mut client, _) = connect_async(&url).await.unwrap();

    send_json(
        &mut client,
        json!({"event": "add-alt", "data": {"username": "alice", "password": "pw"}}),
    )
    .await;

    let conn = wait_for_connection(&connector, "alice").await;
    conn.emit(GameEvent::Spawn);

    let event = next_json(&mut client).await;
    assert_eq!(event, json!({"event": "bot-spawned", "data": {"username": "alice"}}));

    send_json(
        &mut client,
        json!({"event": "send-chat", "data": {"username": "alice", "message": "hi all"}}),
    )
    .await;
    let event = next_json(&mut client).await;
    assert_eq!(
        event,
        json!({"event": "chat-message", "data": {"username": "alice", "message": "alice: hi all"}})
    );

    send_json(&mut client, json!({"event": "remove-alt", "data": "alice"})).await;
    let event = next_json(&mut client).await;
    assert_eq!(event, json!({"event": "remove-alt", "data": {"username": "alice"}}));
    assert!(conn.is_closed());

    shutdown.send(()).await.unwrap();
}

#[tokio::test]
async fn test_events_reach_every_observer() {
    let (connector, shutdown, url) = start().await;
    let (mut first, _) = connect_async(&url).await.unwrap();
    let (mut second, _) = connect_async(&url).await.unwrap();

    // Malformed frames are ignored and the socket stays usable
    first
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    send_json(&mut first, json!({"event": "no-such-event", "data": {}})).await;

    send_json(
        &mut first,
        json!({"event": "start-alt", "data": {"username": "bob"}}),
    )
    .await;
    let conn = wait_for_connection(&connector, "bob").await;
    conn.emit(GameEvent::Kicked {
        reason: "Server restarting".to_string(),
    });

    let expected = json!({"event": "bot-kicked", "data": {"username": "bob", "reason": "Server restarting"}});
    assert_eq!(next_json(&mut first).await, expected);
    assert_eq!(next_json(&mut second).await, expected);

    send_json(
        &mut second,
        json!({"event": "add-macro", "data": {"username": "bob", "command": "/ping", "cooldown": "2"}}),
    )
    .await;
    let expected = json!({"event": "macro-added", "data": {"username": "bob", "command": "/ping", "cooldown": 2.0}});
    assert_eq!(next_json(&mut first).await, expected);
    assert_eq!(next_json(&mut second).await, expected);

    shutdown.send(()).await.unwrap();
}
