//! Transport scheduler: WebSocket listener, per-connection socket tasks and
//! the command loop.
//!
//! Sockets never touch the world. Inbound traffic is wrapped into relay
//! envelopes for the simulation scheduler; outbound frames arrive as
//! [`SimCommand`]s and are fanned out here. A failed bind is fatal, and the
//! relay dropping in either direction shuts the scheduler down so both
//! sides fail together.

use crate::config::ServerConfig;
use crate::ids::IdentifierPool;
use crate::relay::{
    ConnectionId, OpenedConnection, Recipients, SimCommand, SimCommandReceiver,
    TransportEvent, TransportEventSender,
};
use crate::support::now_ms;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

/// Socket-side state per connection.
struct ConnectionHandle {
    outbox: mpsc::UnboundedSender<Message>,
    /// Bytes queued on the outbox, not yet written to the socket.
    queued: Arc<AtomicUsize>,
}

/// Events raised by per-connection tasks toward the transport loop.
enum LocalEvent {
    Opened {
        meta: OpenedConnection,
        outbox: mpsc::UnboundedSender<Message>,
        queued: Arc<AtomicUsize>,
    },
    Frame {
        connection: ConnectionId,
        frame: Vec<u8>,
    },
    Closed {
        connection: ConnectionId,
    },
    /// The WebSocket handshake never completed. The id goes back to the
    /// pool; the simulation never heard about this connection.
    HandshakeFailed {
        connection: ConnectionId,
    },
}

/// Runs the transport scheduler until a `Stop` command arrives.
pub async fn run(
    config: ServerConfig,
    events: TransportEventSender,
    mut commands: SimCommandReceiver,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let address = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&address).await?;
    info!("Listening on {}", address);

    if config.compression {
        warn!("Per-message compression requested but the WebSocket backend does not support it");
    }

    events.send(TransportEvent::Started)?;

    let mut ids = IdentifierPool::new();
    let mut handles: HashMap<ConnectionId, ConnectionHandle> = HashMap::new();
    let (local_tx, mut local_rx) = mpsc::unbounded_channel::<LocalEvent>();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let id = ids.allocate();
                        let local_tx = local_tx.clone();
                        let config = config.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, peer, id, config, local_tx).await;
                        });
                    }
                    Err(err) => {
                        warn!("Accept failed: {}", err);
                    }
                }
            }

            Some(local) = local_rx.recv() => {
                apply_local_event(local, &mut handles, &mut ids, &events)?;
            }

            command = commands.recv() => {
                match command {
                    Some(SimCommand::SendPackets { frame, recipients, exceptions }) => {
                        send_packets(&mut handles, &config, frame, recipients, exceptions);
                    }
                    Some(SimCommand::CloseConnection { connection }) => {
                        if let Some(handle) = handles.get(&connection) {
                            // The connection task reports Closed once the
                            // socket actually goes down.
                            let _ = handle.outbox.send(Message::Close(None));
                        }
                    }
                    Some(SimCommand::PlayersListResponse { list }) => {
                        debug!("Players list response: {} entries", list.len());
                    }
                    Some(SimCommand::PlayerResponse { player }) => {
                        debug!("Player response: {:?}", player);
                    }
                    Some(SimCommand::Stop) => {
                        info!("Transport scheduler stopping");
                        return Ok(());
                    }
                    None => {
                        return Err("Simulation command channel closed".into());
                    }
                }
            }
        }
    }
}

/// Applies a per-connection task event to the socket registry. Only
/// connections announced as opened produce relay envelopes.
fn apply_local_event(
    local: LocalEvent,
    handles: &mut HashMap<ConnectionId, ConnectionHandle>,
    ids: &mut IdentifierPool,
    events: &TransportEventSender,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match local {
        LocalEvent::Opened { meta, outbox, queued } => {
            let id = meta.id;
            handles.insert(id, ConnectionHandle { outbox, queued });
            events.send(TransportEvent::ConnectionOpened { meta })?;
            debug!("Connection {} registered", id);
        }
        LocalEvent::Frame { connection, frame } => {
            events.send(TransportEvent::PacketReceived { connection, frame })?;
        }
        LocalEvent::Closed { connection } => {
            handles.remove(&connection);
            ids.release(connection);
            events.send(TransportEvent::ConnectionClosed { connection })?;
        }
        LocalEvent::HandshakeFailed { connection } => {
            ids.release(connection);
        }
    }

    Ok(())
}

/// Expands a recipient set against the exception list.
fn resolve_recipients(
    recipients: &Recipients,
    exceptions: Option<&Vec<ConnectionId>>,
) -> Vec<ConnectionId> {
    let targets: Vec<ConnectionId> = match recipients {
        Recipients::One(id) => vec![*id],
        Recipients::Many(ids) => ids.clone(),
    };

    match exceptions {
        Some(excluded) => targets
            .into_iter()
            .filter(|id| !excluded.contains(id))
            .collect(),
        None => targets,
    }
}

fn send_packets(
    handles: &mut HashMap<ConnectionId, ConnectionHandle>,
    config: &ServerConfig,
    frame: Vec<u8>,
    recipients: Recipients,
    exceptions: Option<Vec<ConnectionId>>,
) {
    for id in resolve_recipients(&recipients, exceptions.as_ref()) {
        let handle = match handles.get(&id) {
            Some(handle) => handle,
            None => continue,
        };

        let queued = handle.queued.load(Ordering::Relaxed);
        if queued > 0 {
            debug!("Connection {} has {} bytes buffered", id, queued);
        }

        if queued + frame.len() > config.max_backpressure_bytes {
            warn!(
                "Slow connection {}: {} bytes queued, closing",
                id, queued
            );
            let _ = handle.outbox.send(Message::Close(None));
            continue;
        }

        handle.queued.fetch_add(frame.len(), Ordering::Relaxed);
        let _ = handle.outbox.send(Message::Binary(frame.clone()));
    }
}

/// Client address for the simulation: proxy headers win over the socket
/// peer address.
fn client_ip(headers: &HashMap<String, String>, peer: &SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real) = headers.get("x-real-ip") {
        let real = real.trim();
        if !real.is_empty() {
            return real.to_string();
        }
    }

    peer.ip().to_string()
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    config: ServerConfig,
    local_tx: mpsc::UnboundedSender<LocalEvent>,
) {
    let mut headers: HashMap<String, String> = HashMap::new();

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        for (name, value) in request.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_lowercase(), value.to_string());
            }
        }
        Ok(response)
    };

    let ws_config = WebSocketConfig {
        max_message_size: Some(config.max_payload_bytes),
        max_frame_size: Some(config.max_payload_bytes),
        ..WebSocketConfig::default()
    };

    let ws = match accept_hdr_async_with_config(stream, callback, Some(ws_config)).await {
        Ok(ws) => ws,
        Err(err) => {
            debug!("Handshake failed from {}: {}", peer, err);
            let _ = local_tx.send(LocalEvent::HandshakeFailed { connection: id });
            return;
        }
    };

    let ip = client_ip(&headers, &peer);
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
    let queued = Arc::new(AtomicUsize::new(0));

    if local_tx
        .send(LocalEvent::Opened {
            meta: OpenedConnection {
                id,
                ip,
                headers,
                created_at: now_ms(),
            },
            outbox: outbox_tx,
            queued: Arc::clone(&queued),
        })
        .is_err()
    {
        return;
    }

    let (mut write, mut read) = ws.split();

    let writer_queued = Arc::clone(&queued);
    let writer = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            let len = message.len();
            let closing = matches!(message, Message::Close(_));

            if write.send(message).await.is_err() {
                break;
            }
            writer_queued.fetch_sub(len, Ordering::Relaxed);

            if closing {
                break;
            }
        }
    });

    let idle = Duration::from_secs(config.idle_timeout_sec);

    loop {
        let message = match tokio::time::timeout(idle, read.next()).await {
            Err(_) => {
                debug!("Connection {} idle for {:?}, dropping", id, idle);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                debug!("Connection {} read error: {}", id, err);
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Binary(frame) => {
                if local_tx
                    .send(LocalEvent::Frame {
                        connection: id,
                        frame,
                    })
                    .is_err()
                {
                    break;
                }
            }
            // Binary-only protocol: a text frame is a broken client.
            Message::Text(_) => {
                debug!("Connection {} sent a text frame, dropping", id);
                break;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    writer.abort();
    let _ = local_tx.send(LocalEvent::Closed { connection: id });
}
