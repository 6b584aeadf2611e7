use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::dispatch::Dispatcher;
use super::framer::LineFramer;
use super::protocol::ServerMessage;
use super::session::{Outbound, SessionId};
use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::metrics;
use crate::shutdown::ShutdownRx;

/// TCP front door: one tokio task per accepted connection.
pub struct GameServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
}

impl GameServer {
    /// Bind the configured address. Failure here is fatal for startup.
    pub async fn bind(ctx: ServerContext) -> Result<Self> {
        let addr = ctx.config.server.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;
        Ok(Self {
            listener,
            dispatcher: Dispatcher::new(ctx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown.
    pub async fn run(self, mut shutdown: ShutdownRx) -> Result<()> {
        info!(target: "sproutfarm::network", "listening on {}", self.local_addr()?);
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            // per-socket accept errors (e.g. EMFILE) must not stop the listener
                            warn!(target: "sproutfarm::network", "accept failed: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                    };
                    metrics::inc_connections_accepted();
                    let dispatcher = self.dispatcher.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, dispatcher, shutdown).await;
                    });
                }
            }
        }
        info!(target: "sproutfarm::network", "listener stopped");
        Ok(())
    }
}

/// Write one line, giving up after `limit`.
async fn write_line(writer: &mut OwnedWriteHalf, line: &str, limit: Duration) -> std::io::Result<()> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');
    match tokio::time::timeout(limit, writer.write_all(&bytes)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(ErrorKind::TimedOut, "peer stopped reading")),
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    mut shutdown: ShutdownRx,
) {
    let config: ServerConfig = dispatcher.context().config.server.clone();
    let registry = dispatcher.context().registry.clone();
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let session_id = registry.register(peer, outbound_tx);
    info!(target: "sproutfarm::network", "connection {} from {}", session_id, peer);

    let close_reason =
        run_connection(&mut reader, &mut writer, &mut outbound_rx, session_id, &config, &dispatcher, &mut shutdown).await;
    debug!(target: "sproutfarm::network", "connection {} closing: {}", session_id, close_reason);

    let _ = writer.shutdown().await;
    dispatcher.teardown(session_id).await;
    metrics::inc_connections_closed();
    info!(target: "sproutfarm::network", "connection {} from {} closed ({})", session_id, peer, close_reason);
}

/// Connection main loop; returns why it ended.
async fn run_connection(
    reader: &mut tokio::net::tcp::OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    session_id: SessionId,
    config: &ServerConfig,
    dispatcher: &Dispatcher,
    shutdown: &mut ShutdownRx,
) -> String {
    let idle = Duration::from_secs(config.idle_timeout_secs);
    if let Err(e) = write_line(writer, &ServerMessage::connected().to_line(), idle).await {
        return format!("write failed: {}", e);
    }

    let mut framer = LineFramer::new(config.max_frame_bytes);
    let mut buf = vec![0u8; config.read_buffer_bytes];
    let mut deadline = Instant::now() + idle;
    let mut pinged = false;

    loop {
        tokio::select! {
            _ = shutdown.wait() => return "server shutting down".into(),
            _ = tokio::time::sleep_until(deadline) => {
                if pinged {
                    return "idle timeout".into();
                }
                // one liveness ping before giving up
                let ping = ServerMessage::Ping { timestamp: chrono::Utc::now() };
                if let Err(e) = write_line(writer, &ping.to_line(), idle).await {
                    return format!("write failed: {}", e);
                }
                pinged = true;
                deadline = Instant::now() + idle;
            }
            queued = outbound_rx.recv() => match queued {
                Some(Outbound::Line(line)) => {
                    if let Err(e) = write_line(writer, &line, idle).await {
                        return format!("write failed: {}", e);
                    }
                }
                Some(Outbound::Close { reason }) => return reason,
                None => return "session dropped".into(),
            },
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) => return "peer closed".into(),
                    Ok(n) => n,
                    Err(e) => return format!("read error: {}", e),
                };
                deadline = Instant::now() + idle;
                pinged = false;
                framer.push(&buf[..n]);
                while let Some(frame) = framer.next_frame() {
                    metrics::inc_frames_received();
                    let replies = match frame {
                        Ok(frame) => dispatcher.route(session_id, frame).await,
                        Err(e) => {
                            metrics::inc_protocol_errors();
                            vec![ServerMessage::error(e.to_string())]
                        }
                    };
                    for reply in replies {
                        if let Err(e) = write_line(writer, &reply.to_line(), idle).await {
                            return format!("write failed: {}", e);
                        }
                    }
                }
            }
        }
    }
}
