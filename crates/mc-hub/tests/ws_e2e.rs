use futures_util::{SinkExt, StreamExt};
use mc_hub::hub::{BroadcastHub, HubConfig};
use mc_hub::server;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_hub(config: HubConfig) -> (Arc<BroadcastHub>, SocketAddr) {
    let hub = Arc::new(BroadcastHub::new(config));
    let app = server::router(hub.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("serve");
    });
    (hub, addr)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/api/ws"))
        .await
        .expect("connect");
    ws
}

async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame before timeout")
            .expect("stream open")
            .expect("read ok");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("json frame");
        }
    }
}

async fn expect_frame(ws: &mut WsClient, kind: &str) -> Value {
    loop {
        let frame = next_json(ws).await;
        if frame["type"] == kind {
            return frame;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_subscribe_and_receive() {
    let (hub, addr) = start_hub(HubConfig::default()).await;
    let mut ws = connect(addr).await;

    let welcome = expect_frame(&mut ws, "connected").await;
    let client_id = welcome["data"]["clientId"].as_str().expect("client id");
    assert!(client_id.starts_with("ws-"));

    ws.send(Message::Text(
        r#"{"type":"subscribe","events":["task:completed"]}"#.to_string(),
    ))
    .await
    .expect("send");
    let ack = expect_frame(&mut ws, "subscribed").await;
    assert_eq!(ack["data"]["events"], json!(["task:completed"]));

    // filtered out, then matching
    hub.publish_task_created(json!({"id": "T9"})).await;
    hub.publish_task_completed("T9", json!({"ok": true})).await;
    let frame = expect_frame(&mut ws, "task:completed").await;
    assert_eq!(frame["data"]["taskId"], "T9");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn history_replays_events_published_before_connect() {
    let (hub, addr) = start_hub(HubConfig::default()).await;
    hub.publish_system_status("degraded", Value::Null).await;
    hub.publish_system_status("ok", Value::Null).await;

    let mut ws = connect(addr).await;
    ws.send(Message::Text(r#"{"type":"getHistory","limit":1}"#.to_string()))
        .await
        .expect("send");
    let frame = expect_frame(&mut ws, "history").await;
    let data = frame["data"].as_array().expect("history array");
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["data"]["status"], "ok");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ping_round_trip() {
    let (_hub, addr) = start_hub(HubConfig::default()).await;
    let mut ws = connect(addr).await;
    ws.send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .expect("send");
    let frame = expect_frame(&mut ws, "pong").await;
    assert!(frame["data"]["time"].is_i64());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn over_capacity_connection_is_closed_with_1013() {
    let (_hub, addr) = start_hub(HubConfig {
        max_connections: 1,
        ..HubConfig::default()
    }).await;
    let mut first = connect(addr).await;
    expect_frame(&mut first, "connected").await;

    let mut second = connect(addr).await;
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match second.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("close before timeout");
    let frame = closed.expect("close frame");
    assert_eq!(u16::from(frame.code), 1013);
    assert_eq!(frame.reason, "server capacity reached");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_frees_a_capacity_slot() {
    let (hub, addr) = start_hub(HubConfig {
        max_connections: 1,
        ..HubConfig::default()
    }).await;
    let mut first = connect(addr).await;
    expect_frame(&mut first, "connected").await;
    first.close(None).await.expect("close");
    drop(first);

    // the hub processes the close asynchronously
    tokio::time::timeout(Duration::from_secs(5), async {
        while hub.registry().len().await != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("slot freed");

    let mut second = connect(addr).await;
    expect_frame(&mut second, "connected").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_client_is_evicted_and_its_transport_closed() {
    let (hub, addr) = start_hub(HubConfig {
        heartbeat_interval: Duration::from_millis(200),
        ..HubConfig::default()
    })
    .await;
    let heartbeat = hub.start_heartbeat();
    let mut ws = connect(addr).await;
    expect_frame(&mut ws, "connected").await;

    // never answer the hub's pings; the sweep terminates the transport
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("eviction before timeout");
    if let Some(frame) = closed {
        assert_eq!(u16::from(frame.code), 1001);
        assert_eq!(frame.reason, "heartbeat timeout");
    }
    assert_eq!(hub.registry().len().await, 0);
    heartbeat.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_closes_clients_with_a_normal_close() {
    let (hub, addr) = start_hub(HubConfig::default()).await;
    let mut ws = connect(addr).await;
    expect_frame(&mut ws, "connected").await;

    hub.shutdown().await;
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("close before timeout");
    let frame = closed.expect("close frame");
    assert_eq!(u16::from(frame.code), 1000);
    assert_eq!(frame.reason, "server shutting down");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_and_metrics_report_connection_counts() {
    let (hub, addr) = start_hub(HubConfig::default()).await;
    let mut ws = connect(addr).await;
    expect_frame(&mut ws, "connected").await;

    let metrics = hub.metrics().await;
    assert_eq!(metrics.clients.total, 1);
    assert_eq!(metrics.clients.max, 100);
}
