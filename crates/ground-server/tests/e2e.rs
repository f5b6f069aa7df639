//! Boots the server on a free port and drives it over real HTTP and
//! WebSocket connections.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use ground_server::{ServerConfig, ServerHandle};
use ground_store::{Database, SqliteSampleStore};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn boot() -> ServerHandle {
    let store = Arc::new(SqliteSampleStore::new(Database::in_memory().unwrap()));
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    };
    ground_server::start(config, store)
        .await
        .unwrap()
}

fn base(handle: &ServerHandle) -> String {
    format!("http://127.0.0.1:{}", handle.port())
}

async fn ingest(handle: &ServerHandle, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/events/", base(handle)))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn connect(handle: &ServerHandle, identifier: &str) -> Socket {
    let url = format!("ws://127.0.0.1:{}/events/live?identifier={identifier}", handle.port());
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

/// Next text frame as JSON, skipping control frames.
async fn next_json(socket: &mut Socket, wait: Duration) -> Option<Value> {
    tokio::time::timeout(wait, async {
        while let Some(frame) = socket.next().await {
            match frame.ok()? {
                Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

async fn wait_for_subscribers(handle: &ServerHandle, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.registry().subscriber_count() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscribers registered");
}

fn timestamps(items: &Value) -> Vec<&str> {
    items
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["timestamp"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn replay_then_live_events_stay_in_their_session() {
    let handle = boot().await;

    let resp = ingest(
        &handle,
        json!({"timestamp": "T+0", "identifier": "sim-1", "velocity": 1.5, "air_pressure": 1013.0}),
    )
    .await;
    assert_eq!(resp.status(), 204);
    let resp = ingest(
        &handle,
        json!({"timestamp": "T+1", "identifier": "sim-1", "velocity": 3.2, "air_pressure": 1012.6}),
    )
    .await;
    assert_eq!(resp.status(), 204);

    let mut watcher = connect(&handle, "sim-1").await;
    let mut bystander = connect(&handle, "sim-2").await;

    let initial = next_json(&mut watcher, Duration::from_secs(5)).await.unwrap();
    assert_eq!(initial["type"], "initial");
    assert_eq!(timestamps(&initial["data"]), vec!["T+1", "T+0"]);
    assert_eq!(initial["data"][0]["identifier"], "sim-1");
    assert_eq!(initial["data"][0]["velocity"], 3.2);
    assert!(initial["data"][0]["save_datetime"].is_string());

    let empty = next_json(&mut bystander, Duration::from_secs(5)).await.unwrap();
    assert_eq!(empty, json!({"type": "initial", "data": []}));

    wait_for_subscribers(&handle, 2).await;
    let resp = ingest(
        &handle,
        json!({"timestamp": "T+2", "identifier": "sim-1", "velocity": 5.0, "air_pressure": 1012.1}),
    )
    .await;
    assert_eq!(resp.status(), 204);

    let event = next_json(&mut watcher, Duration::from_secs(5)).await.unwrap();
    assert_eq!(event["type"], "event");
    assert_eq!(event["data"]["timestamp"], "T+2");
    assert!(event["data"]["id"].as_i64().unwrap() > initial["data"][0]["id"].as_i64().unwrap());

    assert!(next_json(&mut watcher, Duration::from_millis(200)).await.is_none());
    assert!(next_json(&mut bystander, Duration::from_millis(200)).await.is_none());

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn disconnect_releases_the_subscriber() {
    let handle = boot().await;
    let mut socket = connect(&handle, "sim-1").await;
    next_json(&mut socket, Duration::from_secs(5)).await.unwrap();
    wait_for_subscribers(&handle, 1).await;

    socket.close(None).await.unwrap();
    wait_for_subscribers(&handle, 0).await;

    let health: Value = reqwest::get(format!("{}/health", base(&handle)))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["subscribers"], 0);
}

#[tokio::test]
async fn shutdown_closes_live_sockets() {
    let handle = boot().await;
    let mut socket = connect(&handle, "sim-1").await;
    next_json(&mut socket, Duration::from_secs(5)).await.unwrap();
    wait_for_subscribers(&handle, 1).await;

    handle.shutdown();
    assert!(next_json(&mut socket, Duration::from_secs(5)).await.is_none());
    wait_for_subscribers(&handle, 0).await;
}

#[tokio::test]
async fn live_requires_identifier() {
    let handle = boot().await;
    let url = format!("ws://127.0.0.1:{}/events/live", handle.port());
    match connect_async(url).await {
        Err(WsError::Http(resp)) => assert_eq!(resp.status(), 400),
        Err(e) => panic!("expected HTTP 400, got {e}"),
        Ok(_) => panic!("expected HTTP 400, upgrade succeeded"),
    }
}

#[tokio::test]
async fn malformed_ingest_is_rejected_and_not_stored() {
    let handle = boot().await;
    let mut socket = connect(&handle, "sim-1").await;
    next_json(&mut socket, Duration::from_secs(5)).await.unwrap();
    wait_for_subscribers(&handle, 1).await;

    let resp = ingest(
        &handle,
        json!({"timestamp": "T+0", "identifier": "sim-1", "air_pressure": 1013.0}),
    )
    .await;
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("velocity"));

    assert!(next_json(&mut socket, Duration::from_millis(200)).await.is_none());
    let history: Value = reqwest::get(format!("{}/events/?identifier=sim-1", base(&handle)))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history, json!([]));
}

#[tokio::test]
async fn history_and_sessions_over_http() {
    let handle = boot().await;
    for (t, id) in [(0, "sim-a"), (0, "sim-b"), (1, "sim-a")] {
        ingest(
            &handle,
            json!({"timestamp": format!("T+{t}"), "identifier": id, "velocity": 1.0, "air_pressure": 1000.0}),
        )
        .await;
    }

    let sessions: Value = reqwest::get(format!("{}/events/sessions", base(&handle)))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions, json!(["sim-a", "sim-b"]));

    let history: Value = reqwest::get(format!("{}/events/", base(&handle)))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.as_array().unwrap().len(), 3);
    assert_eq!(history[0]["identifier"], "sim-a");
    assert_eq!(history[0]["timestamp"], "T+1");
}
