//! Session client.
//!
//! Socket I/O runs on a tokio runtime; everything it learns is queued and
//! applied on the caller's thread by [`SessionClient::poll`], so the chunk
//! mirror and player mirror are only ever mutated from one place.

mod mirror;

pub use mirror::{PlayerDelta, PlayerMirror, RemotePlayer};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tileworld_common::{unix_millis, ChunkCoord, TileCoord, WorldError, WorldResult};
use tileworld_world::{
    ChunkSource, ChunkState, ChunkStore, Direction, TileGrid, WorldObjectUpdate, WorldPersistence,
};
use tokio::io::BufReader;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::codec::{read_frame, write_message};
use crate::error::{NetError, NetResult};
use crate::protocol::{
    ChatKind, ChatMessage, ChunkData, CreateUserRequest, Message, ObjectUpdateRequest,
    PlayerMoveRequest,
};

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Give up connecting after this long
    pub connect_timeout: Duration,
    /// Forget an unanswered chunk request after this long so it can be retried
    pub chunk_request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            chunk_request_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket
    Disconnected,
    /// Connect in progress
    Connecting,
    /// Socket open, not logged in
    Connected,
    /// Logged in
    Authenticated,
}

/// Something the application should react to, produced by [`SessionClient::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The socket opened
    Connected,
    /// The connect attempt failed
    ConnectionFailed(String),
    /// An open connection was lost
    Disconnected(String),
    /// Login outcome
    LoginResult {
        /// Whether the session is now authenticated
        success: bool,
        /// Server or local reason
        message: String,
        /// Spawn tile on success
        start: Option<TileCoord>,
    },
    /// Registration outcome
    CreateUserResult {
        /// Whether the identity was created
        success: bool,
        /// Server or local reason
        message: String,
    },
    /// A chunk arrived and is now in the mirror
    ChunkReceived(ChunkCoord),
    /// Remote players changed
    PlayersUpdated(PlayerDelta),
    /// Object deltas were applied to resident chunks
    ObjectsUpdated {
        /// Deltas applied
        applied: usize,
        /// Deltas for chunks that are not resident
        skipped: usize,
    },
    /// A chat line from another player
    Chat(ChatMessage),
}

#[derive(Debug)]
enum Inbound {
    Connected,
    ConnectFailed(String),
    Message(Message),
    Closed(String),
}

#[derive(Debug, Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// Outbound side of the current connection, shared with [`NetworkChunkSource`].
#[derive(Debug)]
struct Link {
    outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    authenticated: AtomicBool,
    /// Chunks asked for and not yet received, with when they were asked for
    requested: Mutex<HashMap<ChunkCoord, Instant>>,
    request_timeout: Duration,
}

impl Link {
    fn new(request_timeout: Duration) -> Self {
        Self {
            outbound: RwLock::new(None),
            authenticated: AtomicBool::new(false),
            requested: Mutex::new(HashMap::new()),
            request_timeout,
        }
    }

    fn request_chunk(&self, coord: ChunkCoord) -> NetResult<()> {
        self.requested.lock().insert(coord, Instant::now());
        self.send(Message::chunk_request(coord)).map_err(|e| {
            self.requested.lock().remove(&coord);
            e
        })
    }

    /// Whether a request for `coord` is still waiting for its answer.
    /// Expired requests are dropped here.
    fn awaiting(&self, coord: ChunkCoord) -> bool {
        let mut requested = self.requested.lock();
        match requested.get(&coord) {
            Some(sent) if sent.elapsed() < self.request_timeout => true,
            Some(_) => {
                requested.remove(&coord);
                debug!("Request for chunk {} went unanswered", coord);
                false
            },
            None => false,
        }
    }

    fn send(&self, message: Message) -> NetResult<()> {
        let outbound = self.outbound.read();
        let sender = outbound.as_ref().ok_or(NetError::NotConnected)?;
        sender.send(message).map_err(|_| NetError::NotConnected)
    }

    fn reset(&self) {
        *self.outbound.write() = None;
        self.authenticated.store(false, Ordering::SeqCst);
        self.requested.lock().clear();
    }
}

/// Session with one server.
pub struct SessionClient {
    config: ClientConfig,
    runtime: Handle,
    state: ConnectionState,
    link: Arc<Link>,
    inbound: Option<mpsc::UnboundedReceiver<Inbound>>,
    task: Option<JoinHandle<()>>,
    pending_login: Option<Credentials>,
    pending_create: Option<Credentials>,
    username: Option<String>,
    players: PlayerMirror,
    chunks: Arc<ChunkStore>,
}

impl SessionClient {
    /// Creates a disconnected client. `persistence` backs the chunk mirror.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        runtime: Handle,
        persistence: Option<Arc<WorldPersistence>>,
    ) -> Self {
        let link = Arc::new(Link::new(config.chunk_request_timeout));
        Self {
            config,
            runtime,
            state: ConnectionState::Disconnected,
            link,
            inbound: None,
            task: None,
            pending_login: None,
            pending_create: None,
            username: None,
            players: PlayerMirror::new(),
            chunks: Arc::new(ChunkStore::mirror(persistence)),
        }
    }

    // ===== Connection =====

    /// Starts connecting. Progress is reported through [`poll`](Self::poll).
    pub fn connect(&mut self, addr: impl Into<String>) {
        if self.state != ConnectionState::Disconnected {
            self.close();
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self.link.outbound.write() = Some(outbound_tx);
        self.inbound = Some(inbound_rx);
        self.state = ConnectionState::Connecting;

        let addr = addr.into();
        info!("Connecting to {}", addr);
        self.task = Some(self.runtime.spawn(run_connection(
            addr,
            self.config.connect_timeout,
            inbound_tx,
            outbound_rx,
        )));
    }

    /// Closes the connection and clears all mirrored state.
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            info!("Disconnecting");
        }
        self.close();
        self.pending_login = None;
        self.pending_create = None;
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.inbound = None;
        self.state = ConnectionState::Disconnected;
        self.link.reset();
        self.username = None;
        self.players.clear();
        self.chunks.clear();
    }

    /// Whether a socket is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Authenticated
        )
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identity this session is logged in as.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    // ===== Requests =====

    /// Logs in, or queues the login until the connection opens.
    pub fn login(&mut self, username: &str, password: &str) -> NetResult<()> {
        if self.is_connected() {
            return self.link.send(Message::login(username, password));
        }
        self.pending_login = Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        });
        Ok(())
    }

    /// Registers an identity, or queues it until the connection opens.
    pub fn create_user(&mut self, username: &str, password: &str) -> NetResult<()> {
        let request = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        if self.is_connected() {
            return self.link.send(create_user_message(request));
        }
        self.pending_create = Some(request);
        Ok(())
    }

    fn require_auth(&self) -> NetResult<()> {
        match self.state {
            ConnectionState::Authenticated => Ok(()),
            ConnectionState::Connected => Err(NetError::NotAuthenticated),
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                Err(NetError::NotConnected)
            },
        }
    }

    /// Reports the local player's movement.
    pub fn send_move(
        &self,
        tile: TileCoord,
        direction: Direction,
        moving: bool,
        running: bool,
    ) -> NetResult<()> {
        self.require_auth()?;
        self.link.send(Message::PlayerMoveRequest(PlayerMoveRequest {
            x: tile.x,
            y: tile.y,
            running,
            moving,
            direction,
        }))
    }

    /// Asks the server for a chunk.
    pub fn request_chunk(&self, coord: ChunkCoord) -> NetResult<()> {
        self.require_auth()?;
        self.link.request_chunk(coord)
    }

    /// Sends a chat line.
    pub fn send_chat(&self, content: &str) -> NetResult<()> {
        self.require_auth()?;
        self.link.send(Message::ChatMessage(ChatMessage {
            sender: self.username.clone().unwrap_or_default(),
            content: content.to_string(),
            timestamp: unix_millis(),
            kind: ChatKind::Player,
        }))
    }

    /// Asks the server to apply an object delta. The mirror changes when the
    /// server broadcasts it back.
    pub fn send_object_update(&self, update: WorldObjectUpdate) -> NetResult<()> {
        self.require_auth()?;
        self.link
            .send(Message::ObjectUpdateRequest(ObjectUpdateRequest { update }))
    }

    // ===== Mirrors =====

    /// Chunks received from the server.
    #[must_use]
    pub const fn chunks(&self) -> &Arc<ChunkStore> {
        &self.chunks
    }

    /// Other players currently online.
    #[must_use]
    pub const fn remote_players(&self) -> &PlayerMirror {
        &self.players
    }

    /// A [`ChunkSource`] that requests missing chunks from the server, for use
    /// with the chunk preloader.
    #[must_use]
    pub fn chunk_source(&self) -> NetworkChunkSource {
        NetworkChunkSource {
            link: Arc::clone(&self.link),
            chunks: Arc::clone(&self.chunks),
        }
    }

    // ===== Event pump =====

    /// Applies everything received since the last call and advances animation
    /// clocks by `dt` seconds.
    pub fn poll(&mut self, dt: f32) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        loop {
            let next = match self.inbound.as_mut() {
                Some(inbound) => inbound.try_recv(),
                None => break,
            };
            match next {
                Ok(inbound) => self.handle_inbound(inbound, &mut events),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.lose_connection("connection task ended".to_string(), &mut events);
                    break;
                },
            }
        }

        self.players.advance(dt);
        self.chunks.observe(dt);
        events
    }

    fn handle_inbound(&mut self, inbound: Inbound, events: &mut Vec<SessionEvent>) {
        match inbound {
            Inbound::Connected => {
                info!("Connected");
                self.state = ConnectionState::Connected;
                events.push(SessionEvent::Connected);
                self.flush_pending(events);
            },
            Inbound::ConnectFailed(reason) => {
                warn!("Connection failed: {}", reason);
                self.close();
                self.fail_pending(&reason, events);
                events.push(SessionEvent::ConnectionFailed(reason));
            },
            Inbound::Closed(reason) => self.lose_connection(reason, events),
            Inbound::Message(message) => self.handle_message(message, events),
        }
    }

    fn flush_pending(&mut self, events: &mut Vec<SessionEvent>) {
        if let Some(request) = self.pending_create.take() {
            if let Err(e) = self.link.send(create_user_message(request)) {
                events.push(SessionEvent::CreateUserResult {
                    success: false,
                    message: e.to_string(),
                });
            }
        }
        if let Some(login) = self.pending_login.take() {
            if let Err(e) = self
                .link
                .send(Message::login(login.username, login.password))
            {
                events.push(SessionEvent::LoginResult {
                    success: false,
                    message: e.to_string(),
                    start: None,
                });
            }
        }
    }

    fn fail_pending(&mut self, reason: &str, events: &mut Vec<SessionEvent>) {
        if self.pending_create.take().is_some() {
            events.push(SessionEvent::CreateUserResult {
                success: false,
                message: reason.to_string(),
            });
        }
        if self.pending_login.take().is_some() {
            events.push(SessionEvent::LoginResult {
                success: false,
                message: reason.to_string(),
                start: None,
            });
        }
    }

    fn lose_connection(&mut self, reason: String, events: &mut Vec<SessionEvent>) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        warn!("Connection lost: {}", reason);
        self.close();
        self.fail_pending(&reason, events);
        events.push(SessionEvent::Disconnected(reason));
    }

    fn handle_message(&mut self, message: Message, events: &mut Vec<SessionEvent>) {
        match message {
            Message::LoginResponse(response) => {
                let start = response
                    .success
                    .then(|| TileCoord::new(response.start_x, response.start_y));
                if response.success {
                    info!("Logged in as {}", response.username);
                    self.state = ConnectionState::Authenticated;
                    self.link.authenticated.store(true, Ordering::SeqCst);
                    self.username = Some(response.username);
                } else {
                    info!("Login refused: {}", response.message);
                }
                events.push(SessionEvent::LoginResult {
                    success: response.success,
                    message: response.message,
                    start,
                });
            },
            Message::CreateUserResponse(response) => {
                events.push(SessionEvent::CreateUserResult {
                    success: response.success,
                    message: response.message,
                });
            },
            Message::ChunkData(data) => {
                if let Some(coord) = self.store_chunk(data) {
                    events.push(SessionEvent::ChunkReceived(coord));
                }
            },
            Message::PlayerStatesUpdate(update) => {
                let delta = self.players.apply(update.players, self.username.as_deref());
                events.push(SessionEvent::PlayersUpdated(delta));
            },
            Message::WorldObjectsUpdate(update) => {
                let mut applied = 0;
                let mut skipped = 0;
                for delta in &update.objects {
                    match self.chunks.apply_update(delta) {
                        Ok(_) => applied += 1,
                        Err(e) => {
                            trace!("Skipping object delta: {}", e);
                            skipped += 1;
                        },
                    }
                }
                events.push(SessionEvent::ObjectsUpdated { applied, skipped });
            },
            Message::ChatMessage(chat) => events.push(SessionEvent::Chat(chat)),
            other => warn!("Ignoring unexpected {:?} from server", other.kind()),
        }
    }

    fn store_chunk(&self, data: ChunkData) -> Option<ChunkCoord> {
        let coord = data.coord();
        self.link.requested.lock().remove(&coord);
        let Some(tiles) = TileGrid::from_raw(data.tiles) else {
            warn!("Chunk {} arrived with a malformed tile grid", coord);
            return None;
        };
        self.chunks
            .insert_chunk(ChunkState::new(coord, tiles, data.objects));
        debug!("Received chunk {}", coord);
        Some(coord)
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("state", &self.state)
            .field("username", &self.username)
            .field("remote_players", &self.players.len())
            .field("chunks", &self.chunks.loaded_count())
            .finish_non_exhaustive()
    }
}

fn create_user_message(request: Credentials) -> Message {
    Message::CreateUserRequest(CreateUserRequest {
        username: request.username,
        password: request.password,
    })
}

async fn run_connection(
    addr: String,
    connect_timeout: Duration,
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<Message>,
) {
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            let _ = inbound.send(Inbound::ConnectFailed(e.to_string()));
            return;
        },
        Err(_) => {
            let _ = inbound.send(Inbound::ConnectFailed(NetError::Timeout.to_string()));
            return;
        },
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed: {}", e);
    }

    let (reader, writer) = stream.into_split();
    if inbound.send(Inbound::Connected).is_err() {
        return;
    }
    let writer = tokio::spawn(write_loop(writer, outbound));

    let mut reader = BufReader::new(reader);
    let reason = loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => match frame.decode() {
                Ok(message) => {
                    if inbound.send(Inbound::Message(message)).is_err() {
                        break "client dropped".to_string();
                    }
                },
                Err(e) => warn!("Dropping frame: {}", e),
            },
            Ok(None) => break "server closed the connection".to_string(),
            Err(e) if e.is_fatal() => break e.to_string(),
            Err(e) => warn!("Dropping frame: {}", e),
        }
    };

    writer.abort();
    let _ = inbound.send(Inbound::Closed(reason));
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = write_message(&mut writer, &message).await {
            debug!("Write failed: {}", e);
            return;
        }
    }
}

/// Requests missing chunks from the server. Handed to the chunk preloader.
#[derive(Debug, Clone)]
pub struct NetworkChunkSource {
    link: Arc<Link>,
    chunks: Arc<ChunkStore>,
}

impl ChunkSource for NetworkChunkSource {
    fn is_resident(&self, coord: ChunkCoord) -> bool {
        self.chunks.is_loaded(coord) || self.link.awaiting(coord)
    }

    fn load(&self, coord: ChunkCoord) -> WorldResult<()> {
        if !self.link.authenticated.load(Ordering::SeqCst) {
            return Err(WorldError::Closed);
        }
        self.link
            .request_chunk(coord)
            .map_err(|_| WorldError::Closed)
    }
}
