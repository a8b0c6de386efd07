//! End-to-end chat over real WebSocket connections

use chatcast_core::chat::{MemoryMessageStore, MessageStore};
use chatcast_core::config::Config;
use chatcast_core::shutdown::{ShutdownCoordinator, ShutdownSignal};
use chatcast_server::protocol::Frame;
use chatcast_server::ChatServer;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    store: Arc<MemoryMessageStore>,
    shutdown: Arc<ShutdownCoordinator>,
    task: JoinHandle<anyhow::Result<()>>,
}

async fn start(config: Config) -> TestServer {
    let store = Arc::new(MemoryMessageStore::new());
    let shutdown = Arc::new(ShutdownCoordinator::new(Duration::from_secs(2)));
    let server = ChatServer::new(&config, store.clone(), shutdown.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(server.serve(listener));

    TestServer {
        addr,
        store,
        shutdown,
        task,
    }
}

async fn connect(addr: SocketAddr, identity: Option<&'static str>) -> Client {
    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    if let Some(user) = identity {
        request
            .headers_mut()
            .insert("x-chat-user", HeaderValue::from_static(user));
    }
    let (client, _) = connect_async(request).await.unwrap();
    client
}

async fn next_frame(client: &mut Client) -> Frame {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

async fn send(client: &mut Client, event: &str, data: Value) {
    let text = serde_json::to_string(&Frame::new(event, data)).unwrap();
    client.send(Message::Text(text)).await.unwrap();
}

fn entries(frame: &Frame) -> Vec<(String, String)> {
    frame
        .data
        .as_array()
        .unwrap()
        .iter()
        .map(|m| {
            (
                m["user"].as_str().unwrap().to_string(),
                m["message"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

fn pair(user: &str, message: &str) -> (String, String) {
    (user.to_string(), message.to_string())
}

#[tokio::test]
async fn test_join_chat_and_leave() {
    let server = start(Config::default()).await;

    let mut a = connect(server.addr, None).await;
    let replay = next_frame(&mut a).await;
    assert_eq!(replay.event, "messages");
    assert_eq!(replay.data, json!([]));

    let mut b = connect(server.addr, None).await;
    let replay = next_frame(&mut b).await;
    assert_eq!(replay.event, "messages");
    assert_eq!(replay.data, json!([]));
    assert_eq!(next_frame(&mut a).await, Frame::new("peerJoined", json!({})));

    send(&mut a, "message", json!({"user": "alice", "message": "hi"})).await;
    for client in [&mut a, &mut b] {
        let frame = next_frame(client).await;
        assert_eq!(frame.event, "messages");
        assert_eq!(entries(&frame), vec![pair("alice", "hi")]);
    }

    b.close(None).await.unwrap();

    send(&mut a, "message", json!({"user": "alice", "message": "bye"})).await;
    let frame = next_frame(&mut a).await;
    assert_eq!(entries(&frame), vec![pair("alice", "hi"), pair("alice", "bye")]);
    assert_eq!(server.store.len().await, 2);
}

#[tokio::test]
async fn test_invalid_submission_is_dropped() {
    let server = start(Config::default()).await;
    let mut a = connect(server.addr, None).await;
    next_frame(&mut a).await;

    send(&mut a, "message", json!({"user": "", "message": "hi"})).await;
    send(&mut a, "message", json!({"user": "alice", "message": "   "})).await;
    send(&mut a, "message", json!({"user": "alice", "message": "real"})).await;

    let frame = next_frame(&mut a).await;
    assert_eq!(entries(&frame), vec![pair("alice", "real")]);
}

#[tokio::test]
async fn test_relay_reaches_everyone_and_is_not_persisted() {
    let server = start(Config::default()).await;
    let mut a = connect(server.addr, None).await;
    next_frame(&mut a).await;
    let mut b = connect(server.addr, None).await;
    next_frame(&mut b).await;
    next_frame(&mut a).await; // b's join

    let products = json!([{"title": "lamp", "price": 20}]);
    send(&mut b, "productList", products.clone()).await;

    for client in [&mut a, &mut b] {
        assert_eq!(next_frame(client).await, Frame::new("updatedProducts", products.clone()));
    }
    assert!(server.store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bound_identity_rejects_impersonation() {
    let server = start(Config::default()).await;
    let mut a = connect(server.addr, Some("alice")).await;
    next_frame(&mut a).await;

    send(&mut a, "message", json!({"user": "mallory", "message": "spoof"})).await;
    send(&mut a, "message", json!({"user": "alice", "message": "genuine"})).await;

    let frame = next_frame(&mut a).await;
    assert_eq!(entries(&frame), vec![pair("alice", "genuine")]);
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    let server = start(Config::default()).await;
    let mut a = connect(server.addr, None).await;
    next_frame(&mut a).await;

    a.send(Message::Text("{not json".to_string())).await.unwrap();
    a.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    send(&mut a, "message", json!({"text": "wrong shape"})).await;
    send(&mut a, "message", json!({"user": "alice", "message": "still here"})).await;

    let frame = next_frame(&mut a).await;
    assert_eq!(entries(&frame), vec![pair("alice", "still here")]);
}

#[tokio::test]
async fn test_graceful_shutdown_stops_server() {
    let server = start(Config::default()).await;
    let mut a = connect(server.addr, None).await;
    next_frame(&mut a).await;

    server.shutdown.shutdown(ShutdownSignal::Graceful);
    let result = tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}
