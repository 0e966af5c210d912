//! WebSocket Game Server
//!
//! Async WebSocket server for duel connections.
//! Turns JSON text frames into `ClientMessage`s and routes them through the
//! session broker; a writer task per connection drains its outbound queue.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::game::state::PlayerId;
use crate::network::broker::SessionBroker;
use crate::network::identity::SessionIdentity;
use crate::network::protocol::{ClientMessage, ErrorCode, ParseFailure, ServerMessage};
use crate::network::session::SessionError;
use crate::network::transport::{connection_pair, ConnectionHandle, ConnectionId, DEFAULT_OUTBOUND_BUFFER};

/// How often finished match tasks are reaped.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound buffer.
    pub outbound_buffer: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,
}

/// Connected client state.
struct ConnectedClient {
    /// Peer address.
    addr: SocketAddr,
    /// Player identifier (after join).
    player_id: Option<PlayerId>,
    /// Current match (if seated).
    match_id: Option<Uuid>,
    /// Connection time.
    connected_at: Instant,
    /// Last activity.
    last_activity: Instant,
}

type Clients = Arc<RwLock<BTreeMap<ConnectionId, ConnectedClient>>>;

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Match routing.
    broker: Arc<SessionBroker>,
    /// Connected clients.
    clients: Clients,
    /// Connection id source.
    next_connection: AtomicU64,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, broker: Arc<SessionBroker>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            broker,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            next_connection: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            addr = %listener.local_addr()?,
            version = %self.config.version,
            "Game server listening"
        );

        let cleanup_handle = self.broker.spawn_cleanup(CLEANUP_INTERVAL);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!(%addr, "{}", GameServerError::ConnectionLimitReached);
                                tokio::spawn(reject_overloaded(stream, addr));
                                continue;
                            }

                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.broker.shutdown("Server shutting down").await;
        cleanup_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let conn_id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let clients = self.clients.clone();
        let broker = self.broker.clone();
        let buffer = self.config.outbound_buffer;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!(%addr, "Handshake failed: {}", GameServerError::from(e));
                    return;
                }
            };
            info!(connection = %conn_id, %addr, "Client connected");

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (handle, mut msg_rx) = connection_pair(conn_id, buffer);

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(conn_id, ConnectedClient {
                    addr,
                    player_id: None,
                    match_id: None,
                    connected_at: Instant::now(),
                    last_activity: Instant::now(),
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                touch(&clients, conn_id).await;
                                Self::handle_text(conn_id, &text, &clients, &broker, &handle).await;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                handle.emit(ServerMessage::error(
                                    ErrorCode::InvalidMessage,
                                    "binary frames are not supported",
                                ));
                            }
                            Some(Ok(Message::Ping(_))) => {
                                handle.emit(pong(0));
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(connection = %conn_id, "Client closed connection");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(connection = %conn_id, "WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        handle.emit(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            // Cleanup
            let client = clients.write().await.remove(&conn_id);
            if let Some(client) = client {
                if let Some(player_id) = client.player_id {
                    broker.disconnect(player_id, conn_id).await;
                }
                info!(
                    connection = %conn_id,
                    addr = %client.addr,
                    match_id = ?client.match_id,
                    duration_secs = client.connected_at.elapsed().as_secs(),
                    idle_secs = client.last_activity.elapsed().as_secs(),
                    "Client cleaned up"
                );
            }
            sender_task.abort();
        });
    }

    /// Handle one text frame.
    async fn handle_text(
        conn_id: ConnectionId,
        text: &str,
        clients: &Clients,
        broker: &Arc<SessionBroker>,
        handle: &ConnectionHandle,
    ) {
        let player_id = clients.read().await.get(&conn_id).and_then(|c| c.player_id);

        let msg = match ClientMessage::parse(text) {
            Ok(msg) => msg,
            Err(ParseFailure::MalformedAction { client_seq }) => {
                debug!(connection = %conn_id, client_seq, "Malformed action");
                match player_id {
                    Some(player) => broker.reject_malformed(player, handle, client_seq).await,
                    None => {
                        handle.emit(ServerMessage::error(ErrorCode::NotInMatch, "join a match first"));
                    }
                }
                return;
            }
            Err(ParseFailure::Invalid(e)) => {
                debug!(connection = %conn_id, "Invalid message: {}", e);
                handle.emit(ServerMessage::error(ErrorCode::InvalidMessage, "Invalid message format"));
                return;
            }
        };

        let result = match msg {
            ClientMessage::JoinMatch { session, match_id, last_seen_seq } => {
                Self::handle_join(conn_id, &session, match_id, last_seen_seq, clients, broker, handle).await;
                Ok(())
            }
            ClientMessage::Ping { timestamp } => {
                handle.emit(pong(timestamp));
                Ok(())
            }
            msg => match player_id {
                None => Err(SessionError::NotSeated),
                Some(player) => match msg {
                    ClientMessage::SubmitAction { action, client_seq } => {
                        broker.submit(player, handle, client_seq, action).await
                    }
                    ClientMessage::SyncRequest { last_seen_seq } => {
                        broker.sync(player, handle, last_seen_seq).await
                    }
                    ClientMessage::Leave => {
                        let result = broker.leave(player).await;
                        if let Some(client) = clients.write().await.get_mut(&conn_id) {
                            client.match_id = None;
                        }
                        result
                    }
                    ClientMessage::JoinMatch { .. } | ClientMessage::Ping { .. } => Ok(()),
                },
            },
        };

        if let Err(e) = result {
            handle.emit(ServerMessage::error(e.code(), e.to_string()));
        }
    }

    /// Handle `join_match`.
    async fn handle_join(
        conn_id: ConnectionId,
        session: &str,
        match_id: Option<Uuid>,
        last_seen_seq: Option<u64>,
        clients: &Clients,
        broker: &Arc<SessionBroker>,
        handle: &ConnectionHandle,
    ) {
        let identity = match SessionIdentity::parse(session) {
            Ok(identity) => identity,
            Err(e) => {
                handle.emit(ServerMessage::error(ErrorCode::InvalidSession, e.to_string()));
                return;
            }
        };
        let player = identity.player_id();

        // A connection speaks for one player
        let previous = clients.read().await.get(&conn_id).and_then(|c| c.player_id);
        if previous.is_some_and(|p| p != player) {
            handle.emit(ServerMessage::error(
                ErrorCode::AlreadyInMatch,
                "connection already bound to another session",
            ));
            return;
        }

        match broker.join(player, handle.clone(), match_id, last_seen_seq).await {
            Ok((joined, slot)) => {
                debug!(connection = %conn_id, player = %player, match_id = %joined, ?slot, "Join routed");
                if let Some(client) = clients.write().await.get_mut(&conn_id) {
                    client.player_id = Some(player);
                    client.match_id = Some(joined);
                }
            }
            Err(e) => {
                debug!(connection = %conn_id, player = %player, "Join refused: {}", e);
                handle.emit(ServerMessage::error(e.code(), e.to_string()));
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get active match count.
    pub async fn match_count(&self) -> usize {
        self.broker.match_count().await
    }
}

async fn touch(clients: &Clients, conn_id: ConnectionId) {
    if let Some(client) = clients.write().await.get_mut(&conn_id) {
        client.last_activity = Instant::now();
    }
}

fn pong(timestamp: u64) -> ServerMessage {
    ServerMessage::Pong {
        timestamp,
        server_time: chrono::Utc::now().timestamp_millis(),
    }
}

/// Tell a client over the connection limit why it is being turned away.
async fn reject_overloaded(stream: TcpStream, addr: SocketAddr) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%addr, "Handshake failed for rejected client: {}", e);
            return;
        }
    };
    let message = ServerMessage::error(ErrorCode::ServerOverloaded, "connection limit reached");
    if let Ok(text) = message.to_json() {
        let _ = ws.send(Message::Text(text)).await;
    }
    let _ = ws.close(None).await;
}
