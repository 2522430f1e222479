//! WebSocket Game Server
//!
//! Accepts WebSocket connections and feeds them into a single reactor task
//! that owns the [`GameHub`]. Each connection gets a reader loop and a
//! writer task; the reactor also drives the fixed-rate simulation tick.
//!
//! ```text
//!  client ──ws──> reader ──ReactorEvent──┐
//!  client ──ws──> reader ──ReactorEvent──┼──> reactor (GameHub, ticker)
//!  client <──ws── writer <──mpsc──────────┘
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::clock::SystemClock;
use crate::game::ai::Difficulty;
use crate::game::state::GameConfig;
use crate::network::auth::AuthConfig;
use crate::network::hub::{ClientSender, GameHub, HubConfig, HubServices};
use crate::network::protocol::{
    AuthRequest, AuthResult, ClientMessage, ErrorCode, ServerMessage,
};
use crate::services::{
    ConnectionId, IdentityDirectory, InMemoryRecorder, LogPublisher, MatchRecorder, Publisher,
};

/// How long a closing connection may keep flushing queued messages.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE: usize = 256;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Close a connection after this long without a frame.
    pub idle_timeout: Duration,
    /// Tick rate for game simulation (Hz).
    pub tick_rate: u32,
    /// Send snapshots as bincode binary frames instead of JSON.
    pub binary_snapshots: bool,
    /// Points needed to win.
    pub win_score: u32,
    /// Strength of the AI opponent.
    pub ai_difficulty: Difficulty,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            tick_rate: crate::TICK_RATE,
            binary_snapshots: false,
            win_score: crate::DEFAULT_WIN_SCORE,
            ai_difficulty: Difficulty::Medium,
            version: crate::VERSION.to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults
    /// for anything missing or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("PONG_BIND_ADDR", defaults.bind_addr),
            max_connections: env_or("PONG_MAX_CONNECTIONS", defaults.max_connections),
            idle_timeout: Duration::from_secs(env_or(
                "PONG_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )),
            tick_rate: env_or("PONG_TICK_RATE", defaults.tick_rate),
            binary_snapshots: std::env::var("PONG_BINARY_SNAPSHOTS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.binary_snapshots),
            win_score: env_or("PONG_WIN_SCORE", defaults.win_score),
            ai_difficulty: match std::env::var("PONG_AI_DIFFICULTY").as_deref() {
                Ok("easy") => Difficulty::Easy,
                Ok("hard") => Difficulty::Hard,
                _ => defaults.ai_difficulty,
            },
            version: defaults.version,
        }
    }

    /// Seconds simulated per tick.
    pub fn tick_dt(&self) -> f64 {
        1.0 / self.tick_rate.max(1) as f64
    }

    fn tick_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate.max(1) as u64)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={}", key, raw);
            default
        }),
        Err(_) => default,
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

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Input to the reactor.
#[derive(Debug)]
pub enum ReactorEvent {
    /// Transport open; outbound channel ready.
    Connected {
        /// Connection.
        connection: ConnectionId,
        /// Its outbound queue.
        sender: ClientSender,
    },
    /// Decoded client message.
    Message {
        /// Sender.
        connection: ConnectionId,
        /// Payload.
        message: ClientMessage,
    },
    /// Transport closed.
    Disconnected {
        /// Connection.
        connection: ConnectionId,
    },
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// JWT validation settings.
    auth: Arc<AuthConfig>,
    /// Identities of authenticated connections.
    identities: Arc<IdentityDirectory>,
    /// Collaborators handed to the hub.
    services: HubServices,
    /// Open connections.
    connections: Arc<AtomicUsize>,
    /// Next connection id.
    next_connection: AtomicU64,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server that keeps match records in memory and logs
    /// tournament notifications.
    pub fn new(config: ServerConfig, auth: AuthConfig) -> Self {
        Self::with_services(
            config,
            auth,
            Arc::new(InMemoryRecorder::new()),
            Arc::new(LogPublisher),
        )
    }

    /// Create a server with external recorder and publisher.
    pub fn with_services(
        config: ServerConfig,
        auth: AuthConfig,
        recorder: Arc<dyn MatchRecorder>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let identities = Arc::new(IdentityDirectory::new());

        let services = HubServices {
            identities: identities.clone(),
            recorder,
            publisher,
            clock: Arc::new(SystemClock),
        };

        Self {
            config,
            auth: Arc::new(auth),
            identities,
            services,
            connections: Arc::new(AtomicUsize::new(0)),
            next_connection: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    fn hub_config(&self) -> HubConfig {
        HubConfig {
            game: GameConfig {
                win_score: self.config.win_score,
                ..GameConfig::default()
            },
            ai_difficulty: self.config.ai_difficulty,
            ..HubConfig::default()
        }
    }

    /// Run the server until [`GameServer::shutdown`] is called.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);

        if !self.auth.is_configured() {
            warn!("No JWT key configured; every auth attempt will fail");
        }

        let (events_tx, events_rx) = mpsc::channel::<ReactorEvent>(1024);
        let hub = GameHub::new(self.services.clone(), self.hub_config());
        let mut reactor = tokio::spawn(run_reactor(
            hub,
            events_rx,
            self.config.clone(),
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connection_count() >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            let connection = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
                            info!("New connection {} from {}", connection, addr);
                            self.handle_connection(stream, addr, connection, events_tx.clone());
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
                joined = &mut reactor => {
                    return Err(GameServerError::Internal(format!("reactor stopped: {:?}", joined.err())));
                }
            }
        }

        if let Err(e) = reactor.await {
            error!("Reactor task failed: {}", e);
        }

        Ok(())
    }

    /// Spawn the reader loop and writer task of a new connection.
    fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        connection: ConnectionId,
        events: mpsc::Sender<ReactorEvent>,
    ) {
        let auth = self.auth.clone();
        let identities = self.identities.clone();
        let config = self.config.clone();
        let connections = self.connections.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    connections.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

            let binary = config.binary_snapshots;
            let mut writer = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let frame = match encode_frame(&msg, binary) {
                        Some(frame) => frame,
                        None => continue,
                    };
                    if ws_sender.send(frame).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let registered = events
                .send(ReactorEvent::Connected { connection, sender: msg_tx.clone() })
                .await
                .is_ok();

            while registered {
                tokio::select! {
                    frame = timeout(config.idle_timeout, ws_receiver.next()) => {
                        match frame {
                            Err(_) => {
                                info!("Closing idle connection {}", connection);
                                break;
                            }
                            Ok(Some(Ok(Message::Text(text)))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", connection, e);
                                        let _ = msg_tx.send(ServerMessage::error(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        )).await;
                                        continue;
                                    }
                                };

                                match client_msg {
                                    ClientMessage::Auth(req) => {
                                        let reply = authenticate(connection, req, &auth, &identities, &config.version);
                                        let _ = msg_tx.send(reply).await;
                                    }
                                    message => {
                                        if events.send(ReactorEvent::Message { connection, message }).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            Ok(Some(Ok(Message::Binary(_)))) => {
                                debug!("Ignoring binary frame from {}", connection);
                            }
                            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                                debug!("Client {} disconnected", connection);
                                break;
                            }
                            Ok(Some(Err(e))) => {
                                warn!("WebSocket error for {}: {}", connection, e);
                                break;
                            }
                            Ok(Some(Ok(_))) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup
            let _ = events.send(ReactorEvent::Disconnected { connection }).await;
            identities.unbind(connection);
            drop(msg_tx);

            // The writer ends once the hub drops its sender
            if timeout(FLUSH_GRACE, &mut writer).await.is_err() {
                writer.abort();
            }

            connections.fetch_sub(1, Ordering::Relaxed);
            info!("Client {} cleaned up", connection);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Identities of authenticated connections.
    pub fn identities(&self) -> &Arc<IdentityDirectory> {
        &self.identities
    }
}

/// Validate a token and bind the identity to the connection.
fn authenticate(
    connection: ConnectionId,
    req: AuthRequest,
    auth: &AuthConfig,
    identities: &IdentityDirectory,
    version: &str,
) -> ServerMessage {
    match auth.identify(&req.token) {
        Ok(identity) => {
            debug!("{} authenticated as {}", connection, identity.user_id);
            identities.bind(connection, identity.clone());
            ServerMessage::AuthResult(AuthResult {
                success: true,
                user_id: Some(identity.user_id),
                display_name: Some(identity.display_name),
                error: None,
                server_version: version.to_string(),
            })
        }
        Err(e) => {
            warn!("Auth failed for {}: {}", connection, e);
            ServerMessage::AuthResult(AuthResult {
                success: false,
                user_id: None,
                display_name: None,
                error: Some(e.to_string()),
                server_version: version.to_string(),
            })
        }
    }
}

/// Wire frame for a message. Snapshots go out as bincode when `binary`.
fn encode_frame(msg: &ServerMessage, binary: bool) -> Option<Message> {
    if binary {
        if let ServerMessage::GameState(update) = msg {
            return match update.to_bytes() {
                Ok(bytes) => Some(Message::Binary(bytes)),
                Err(e) => {
                    error!("Failed to encode snapshot: {}", e);
                    None
                }
            };
        }
    }

    match msg.to_json() {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            None
        }
    }
}

/// Own the hub: apply connection events in arrival order and tick every
/// running game at a fixed rate.
pub async fn run_reactor(
    mut hub: GameHub,
    mut events: mpsc::Receiver<ReactorEvent>,
    config: ServerConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let dt = config.tick_dt();
    let mut ticker = interval(config.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Reactor running at {} Hz", config.tick_rate);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                hub.tick(dt);
            }
            event = events.recv() => {
                match event {
                    Some(ReactorEvent::Connected { connection, sender }) => hub.connect(connection, sender),
                    Some(ReactorEvent::Message { connection, message }) => hub.handle_message(connection, message),
                    Some(ReactorEvent::Disconnected { connection }) => hub.disconnect(connection),
                    None => break,
                }
            }
            _ = shutdown.recv() => {
                hub.shutdown("Server shutting down");
                break;
            }
        }
    }

    info!("Reactor stopped");
}
