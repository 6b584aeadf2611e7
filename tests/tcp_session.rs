use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use sproutfarm::config::Config;
use sproutfarm::context::ServerContext;
use sproutfarm::server::GameServer;
use sproutfarm::shutdown::{shutdown_channel, ShutdownTx};

mod common;
use common::{context_with, test_config};

struct Client {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn send(&mut self, line: &str) {
        self.send_raw(format!("{}\n", line).as_bytes()).await;
    }

    /// Next server line, or `None` once the server closed the connection.
    async fn recv(&mut self) -> Option<Value> {
        let line = timeout(Duration::from_secs(10), self.lines.next_line())
            .await
            .expect("server reply timed out")
            .unwrap()?;
        Some(serde_json::from_str(&line).expect("server sent JSON"))
    }
}

async fn start(config: Config) -> (SocketAddr, ServerContext, ShutdownTx) {
    let ctx = context_with(config);
    let server = GameServer::bind(ctx.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (tx, rx) = shutdown_channel();
    tokio::spawn(server.run(rx));
    (addr, ctx, tx)
}

#[tokio::test]
async fn connect_banner_and_protocol_errors() {
    let (addr, _ctx, _shutdown) = start(test_config()).await;
    let mut client = Client::connect(addr).await;

    let banner = client.recv().await.unwrap();
    assert_eq!(banner["type"], "connection_status");
    assert_eq!(banner["status"], "connected");

    // not JSON at all: raw-message handler
    client.send("{not json").await;
    let reply = client.recv().await.unwrap();
    assert_eq!(reply["type"], "text_response");
    assert_eq!(reply["content"], "received: {not json");

    // JSON, but not a message object
    client.send("[1,2,3]").await;
    assert_eq!(client.recv().await.unwrap()["type"], "error");

    client.send_raw(b"\xff\xfe\n").await;
    assert_eq!(client.recv().await.unwrap()["type"], "error");

    client.send(r#"{"type":"warp"}"#).await;
    let reply = client.recv().await.unwrap();
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["request"], "warp");

    // connection survived all of the above
    client.send(r#"{"type":"ping"}"#).await;
    assert_eq!(client.recv().await.unwrap()["type"], "pong");
}

#[tokio::test]
async fn partial_and_batched_frames() {
    let (addr, _ctx, _shutdown) = start(test_config()).await;
    let mut client = Client::connect(addr).await;
    client.recv().await.unwrap();

    client.send_raw(br#"{"type":"pi"#).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.send_raw(b"ng\"}\r\n{\"type\":\"ping\"}\n").await;
    assert_eq!(client.recv().await.unwrap()["type"], "pong");
    assert_eq!(client.recv().await.unwrap()["type"], "pong");
}

#[tokio::test]
async fn oversize_frame_is_rejected_without_closing() {
    let mut config = test_config();
    config.server.max_frame_bytes = 256;
    let (addr, _ctx, _shutdown) = start(config).await;
    let mut client = Client::connect(addr).await;
    client.recv().await.unwrap();

    let big = format!("{{\"type\":\"ping\",\"pad\":\"{}\"}}\n", "x".repeat(1024));
    client.send_raw(big.as_bytes()).await;
    let reply = client.recv().await.unwrap();
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("256"));

    client.send(r#"{"type":"ping"}"#).await;
    assert_eq!(client.recv().await.unwrap()["type"], "pong");
}

#[tokio::test]
async fn login_over_tcp_returns_farm_snapshot() {
    let (addr, ctx, _shutdown) = start(test_config()).await;
    let mut client = Client::connect(addr).await;
    client.recv().await.unwrap();

    client
        .send(r#"{"type":"login","username":"ivy","password":"correct horse"}"#)
        .await;
    let login = client.recv().await.unwrap();
    assert_eq!(login["type"], "login_response");
    assert_eq!(login["success"], true);
    let snapshot = client.recv().await.unwrap();
    assert_eq!(snapshot["type"], "crop_update");
    assert_eq!(snapshot["is_visiting"], false);
    assert!(ctx.registry.is_online("ivy"));

    client
        .send(r#"{"type":"plant_crop","lot_index":3,"crop_type":"wheat"}"#)
        .await;
    // the push and the direct reply may arrive in either order
    let mut kinds = vec![
        client.recv().await.unwrap()["type"].as_str().unwrap().to_string(),
        client.recv().await.unwrap()["type"].as_str().unwrap().to_string(),
    ];
    kinds.sort();
    assert_eq!(kinds, vec!["action_response", "crop_update"]);

    drop(client);
    for _ in 0..100 {
        if !ctx.registry.is_online("ivy") && ctx.registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!ctx.registry.is_online("ivy"));
    assert!(ctx.registry.is_empty());
}

#[tokio::test]
async fn idle_connection_is_pinged_then_dropped() {
    let mut config = test_config();
    config.server.idle_timeout_secs = 1;
    let (addr, ctx, _shutdown) = start(config).await;
    let mut client = Client::connect(addr).await;
    client.recv().await.unwrap();

    let ping = client.recv().await.unwrap();
    assert_eq!(ping["type"], "ping");
    // stay silent: the next read sees the server hang up
    assert!(client.recv().await.is_none());

    for _ in 0..100 {
        if ctx.registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(ctx.registry.is_empty());
}

#[tokio::test]
async fn answering_the_ping_keeps_the_connection() {
    let mut config = test_config();
    config.server.idle_timeout_secs = 1;
    let (addr, _ctx, _shutdown) = start(config).await;
    let mut client = Client::connect(addr).await;
    client.recv().await.unwrap();

    assert_eq!(client.recv().await.unwrap()["type"], "ping");
    client.send(r#"{"type":"pong"}"#).await;
    // a second ping rather than a disconnect
    assert_eq!(client.recv().await.unwrap()["type"], "ping");
}

#[tokio::test]
async fn client_that_stops_reading_is_disconnected() {
    let mut config = test_config();
    config.server.idle_timeout_secs = 1;
    let (addr, ctx, _shutdown) = start(config).await;
    let mut client = Client::connect(addr).await;
    client.recv().await.unwrap();
    client
        .send(r#"{"type":"login","username":"ivy","password":"correct horse"}"#)
        .await;
    assert_eq!(client.recv().await.unwrap()["success"], true);
    client.recv().await.unwrap();

    let session = ctx.registry.lookup_by_account("ivy").unwrap();
    // far more than the socket buffers hold; the client never reads any of it
    let chunk = "x".repeat(1024 * 1024);
    for _ in 0..32 {
        ctx.registry.send_to(session, chunk.clone());
    }

    for _ in 0..500 {
        if ctx.registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(ctx.registry.is_empty());
    assert!(!ctx.registry.is_online("ivy"));
    drop(client);
}

#[tokio::test]
async fn shutdown_closes_connections() {
    let (addr, _ctx, shutdown) = start(test_config()).await;
    let mut client = Client::connect(addr).await;
    client.recv().await.unwrap();

    shutdown.trigger();
    assert!(client.recv().await.is_none());
}
