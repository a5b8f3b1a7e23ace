//! Connection manager.
//!
//! One task per connection reads frames and dispatches them; a paired writer
//! task drains that connection's outbound queue. World access goes through the
//! [`WorldHandle`] actor. A tick task flushes queued object deltas and runs
//! autosave.

mod config;
mod world_actor;

pub use config::{ServerConfig, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT};
pub use world_actor::{WorldCommand, WorldHandle};

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tileworld_common::{ChunkCoord, ConnectionId};
use tileworld_world::{PlayerMove, World, WorldObjectUpdate};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::auth::CredentialStore;
use crate::codec::{encode, read_frame};
use crate::error::NetResult;
use crate::events::{EventSink, ServerEvent};
use crate::protocol::{
    ChatKind, ChatMessage, ChunkData, ChunkRequest, CreateUserRequest, CreateUserResponse,
    LoginRequest, LoginResponse, Message, ObjectUpdateRequest, PlayerMoveRequest,
    PlayerStatesUpdate, WorldObjectsUpdate,
};

/// Encoded frame shared between recipients.
type Frame = Arc<[u8]>;

/// How long shutdown waits for sessions to leave on their own.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct Connection {
    outbound: mpsc::UnboundedSender<Frame>,
    identity: Option<String>,
}

struct Shared {
    config: ServerConfig,
    world: WorldHandle,
    credentials: Arc<dyn CredentialStore>,
    events: Arc<dyn EventSink>,
    connections: DashMap<ConnectionId, Connection>,
    /// Identity → the one connection it is bound to
    bindings: Mutex<HashMap<String, ConnectionId>>,
    pending_updates: Mutex<Vec<WorldObjectUpdate>>,
    /// Set once shutdown starts; every session stops reading
    closing: watch::Sender<bool>,
}

/// Authoritative server.
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
    world_thread: JoinHandle<World>,
}

impl Server {
    /// Binds the listener and moves the world onto its own thread.
    pub async fn bind(
        config: ServerConfig,
        world: World,
        credentials: Arc<dyn CredentialStore>,
        events: Arc<dyn EventSink>,
    ) -> NetResult<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.tcp_port)).await?;
        info!(
            "Listening on {} (world '{}', seed {})",
            listener.local_addr()?,
            world.meta().name,
            world.seed()
        );

        let (handle, world_thread) = WorldHandle::spawn(world);
        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                config,
                world: handle,
                credentials,
                events,
                connections: DashMap::new(),
                bindings: Mutex::new(HashMap::new()),
                pending_updates: Mutex::new(Vec::new()),
                closing: watch::channel(false).0,
            }),
            world_thread,
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> NetResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until `shutdown` resolves, then releases every bound
    /// identity and saves the world.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> NetResult<()> {
        let Self {
            listener,
            shared,
            world_thread,
        } = self;

        let ticker = tokio::spawn(tick_loop(Arc::clone(&shared)));
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let id = ConnectionId::next();
                        info!("{} connected from {}", id, addr);
                        connections.spawn(serve_connection(Arc::clone(&shared), stream, id));
                    },
                    Err(e) => warn!("Accept failed: {}", e),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                },
            }
        }

        info!("Shutting down");
        ticker.abort();
        let _ = ticker.await;

        // Sessions run their own disconnect; stragglers are aborted.
        shared.closing.send_replace(true);
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = connections.join_next().await {
                if let Err(e) = joined {
                    error!("Connection task failed: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("{} sessions did not close in time", connections.len());
            connections.shutdown().await;
        }
        shared.shutdown().await;
        drop(listener);

        // The world thread exits once the last handle is gone.
        drop(shared);
        match world_thread.await {
            Ok(world) => debug!("World '{}' released", world.meta().name),
            Err(e) => error!("World thread failed: {}", e),
        }
        Ok(())
    }
}

async fn serve_connection(shared: Arc<Shared>, stream: TcpStream, id: ConnectionId) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("{}: set_nodelay failed: {}", id, e);
    }
    let (reader, writer) = stream.into_split();
    let (outbound, queue) = mpsc::unbounded_channel();
    shared.connections.insert(
        id,
        Connection {
            outbound,
            identity: None,
        },
    );
    tokio::spawn(write_loop(writer, queue, id));

    let mut closing = shared.closing.subscribe();
    let mut reader = BufReader::new(reader);
    loop {
        let read = tokio::select! {
            read = read_frame(&mut reader) => read,
            _ = closing.wait_for(|closing| *closing) => break,
        };
        let frame = match read {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) if e.is_fatal() => {
                warn!("{}: {}", id, e);
                break;
            },
            Err(e) => {
                warn!("{}: dropping frame: {}", id, e);
                continue;
            },
        };
        match frame.decode() {
            Ok(message) => shared.dispatch(id, message).await,
            Err(e) => warn!("{}: dropping frame: {}", id, e),
        }
    }

    shared.disconnect(id).await;
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Frame>,
    id: ConnectionId,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            debug!("{}: write failed: {}", id, e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn tick_loop(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(shared.config.tick_period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let autosave = shared.config.autosave_period();
    let mut last_save = Instant::now();

    loop {
        interval.tick().await;
        shared.flush_object_updates();

        if let Some(period) = autosave {
            if last_save.elapsed() >= period {
                last_save = Instant::now();
                match shared.world.save().await {
                    Ok(()) => debug!("Autosave complete"),
                    Err(e) => error!("Autosave failed: {}", e),
                }
            }
        }
    }
}

impl Shared {
    fn identity_of(&self, id: ConnectionId) -> Option<String> {
        self.connections
            .get(&id)
            .and_then(|conn| conn.identity.clone())
    }

    async fn dispatch(&self, id: ConnectionId, message: Message) {
        let kind = message.kind();
        let identity = self.identity_of(id);
        if identity.is_none() && !kind.allowed_before_login() {
            debug!("{}: ignoring {:?} before login", id, kind);
            return;
        }

        match (message, identity) {
            (Message::LoginRequest(req), identity) => self.handle_login(id, req, identity).await,
            (Message::CreateUserRequest(req), _) => self.handle_create_user(id, &req),
            (Message::PlayerMoveRequest(req), Some(username)) => {
                self.handle_move(&username, req).await;
            },
            (Message::ChunkRequest(req), Some(_)) => self.handle_chunk_request(id, req).await,
            (Message::ChatMessage(chat), Some(username)) => self.handle_chat(id, username, chat),
            (Message::ObjectUpdateRequest(req), Some(username)) => {
                self.handle_object_update(&username, req).await;
            },
            (other, _) => warn!("{}: unexpected {:?}", id, other.kind()),
        }
    }

    // ===== Handlers =====

    async fn handle_login(&self, id: ConnectionId, req: LoginRequest, current: Option<String>) {
        let username = req.username;
        if let Some(current) = current {
            self.send(
                id,
                &Message::login_failed(&username, format!("Already logged in as {current}")),
            );
            return;
        }

        if let Err(e) = self.credentials.authenticate(&username, &req.password) {
            info!("{}: login failed for {}: {}", id, username, e);
            self.send(id, &Message::login_failed(&username, e.to_string()));
            return;
        }

        {
            let mut bindings = self.bindings.lock();
            if bindings.contains_key(&username) {
                drop(bindings);
                info!("{}: {} is already logged in elsewhere", id, username);
                self.send(
                    id,
                    &Message::login_failed(&username, "User is already logged in"),
                );
                return;
            }
            bindings.insert(username.clone(), id);
        }

        let player = match self.world.login(&username).await {
            Ok(player) => player,
            Err(e) => {
                error!("{}: could not load {}: {}", id, username, e);
                self.bindings.lock().remove(&username);
                self.send(id, &Message::login_failed(&username, "World unavailable"));
                return;
            },
        };
        if let Some(mut conn) = self.connections.get_mut(&id) {
            conn.identity = Some(username.clone());
        }

        info!(
            "{}: {} logged in at ({}, {})",
            id, username, player.tile_x, player.tile_y
        );
        self.events.publish(ServerEvent::PlayerJoined {
            username: username.clone(),
            connection: id,
        });

        self.send(
            id,
            &Message::LoginResponse(LoginResponse {
                success: true,
                message: "Login successful".to_string(),
                username: username.clone(),
                start_x: player.tile_x,
                start_y: player.tile_y,
            }),
        );
        self.broadcast_player_states().await;

        for coord in player.chunk().square_around(self.config.login_chunk_radius) {
            self.send_chunk(id, coord).await;
        }
    }

    fn handle_create_user(&self, id: ConnectionId, req: &CreateUserRequest) {
        let response = match self.credentials.create_user(&req.username, &req.password) {
            Ok(()) => {
                info!("{}: created user {}", id, req.username);
                CreateUserResponse {
                    success: true,
                    message: "User created".to_string(),
                }
            },
            Err(e) => CreateUserResponse {
                success: false,
                message: e.to_string(),
            },
        };
        self.send(id, &Message::CreateUserResponse(response));
    }

    async fn handle_move(&self, username: &str, req: PlayerMoveRequest) {
        let mv = PlayerMove {
            tile_x: req.x,
            tile_y: req.y,
            direction: req.direction,
            moving: req.moving,
            running: req.running,
        };
        match self.world.apply_move(username, mv).await {
            Ok(Some(_)) => self.broadcast_player_states().await,
            Ok(None) => warn!("Move for non-resident player {}", username),
            Err(e) => error!("Move for {} failed: {}", username, e),
        }
    }

    async fn handle_chunk_request(&self, id: ConnectionId, req: ChunkRequest) {
        self.send_chunk(id, ChunkCoord::new(req.chunk_x, req.chunk_y))
            .await;
    }

    fn handle_chat(&self, id: ConnectionId, username: String, chat: ChatMessage) {
        let relayed = ChatMessage {
            sender: username,
            content: chat.content,
            timestamp: chat.timestamp,
            kind: ChatKind::Player,
        };
        self.broadcast(&Message::ChatMessage(relayed), Some(id));
    }

    async fn handle_object_update(&self, username: &str, req: ObjectUpdateRequest) {
        match self.world.apply_object_update(req.update.clone()).await {
            Ok(outcome) if outcome.changed() => {
                debug!("{} {:?} object {}", username, outcome, req.update.object_id);
                self.pending_updates.lock().push(req.update);
            },
            Ok(_) => debug!("Object update from {} changed nothing", username),
            Err(e) => warn!("Object update from {} rejected: {}", username, e),
        }
    }

    // ===== Fan-out =====

    async fn send_chunk(&self, id: ConnectionId, coord: ChunkCoord) {
        match self.world.get_chunk(coord).await {
            Ok(chunk) => self.send(id, &Message::ChunkData(ChunkData::from(&chunk))),
            Err(e) => warn!("{}: chunk {} unavailable: {}", id, coord, e),
        }
    }

    async fn broadcast_player_states(&self) {
        let active: Vec<String> = self.bindings.lock().keys().cloned().collect();
        match self.world.player_states(active).await {
            Ok(players) => {
                self.broadcast(
                    &Message::PlayerStatesUpdate(PlayerStatesUpdate { players }),
                    None,
                );
            },
            Err(e) => error!("Player snapshot failed: {}", e),
        }
    }

    fn flush_object_updates(&self) {
        let objects = std::mem::take(&mut *self.pending_updates.lock());
        if objects.is_empty() {
            return;
        }
        debug!("Broadcasting {} object updates", objects.len());
        self.broadcast(&Message::WorldObjectsUpdate(WorldObjectsUpdate { objects }), None);
    }

    fn send(&self, id: ConnectionId, message: &Message) {
        let Some(frame) = encode_frame(message) else {
            return;
        };
        if let Some(conn) = self.connections.get(&id) {
            let _ = conn.outbound.send(frame);
        }
    }

    /// Sends to every authenticated connection except `skip`.
    fn broadcast(&self, message: &Message, skip: Option<ConnectionId>) {
        let Some(frame) = encode_frame(message) else {
            return;
        };
        for conn in &self.connections {
            if conn.identity.is_some() && Some(*conn.key()) != skip {
                let _ = conn.outbound.send(Arc::clone(&frame));
            }
        }
    }

    // ===== Lifecycle =====

    async fn disconnect(&self, id: ConnectionId) {
        let Some((_, conn)) = self.connections.remove(&id) else {
            return;
        };
        let Some(username) = conn.identity else {
            info!("{} disconnected", id);
            return;
        };

        {
            let mut bindings = self.bindings.lock();
            if bindings.get(&username) == Some(&id) {
                bindings.remove(&username);
            }
        }
        match self.world.save_player(&username).await {
            Ok(true) => {},
            Ok(false) => debug!("{} was not persisted", username),
            Err(e) => error!("Saving {} failed: {}", username, e),
        }
        self.broadcast_player_states().await;
        self.events.publish(ServerEvent::PlayerLeft {
            username: username.clone(),
            connection: id,
        });
        info!("{} ({}) disconnected", id, username);
    }

    /// Releases identities whose sessions were aborted, then saves the world.
    async fn shutdown(&self) {
        let bound: Vec<(String, ConnectionId)> = self.bindings.lock().drain().collect();
        for (username, id) in bound {
            if let Err(e) = self.world.save_player(&username).await {
                error!("Saving {} failed: {}", username, e);
            }
            self.events.publish(ServerEvent::PlayerLeft {
                username,
                connection: id,
            });
        }
        self.flush_object_updates();
        self.connections.clear();

        match self.world.save().await {
            Ok(()) => info!("World saved"),
            Err(e) => error!("Final save failed: {}", e),
        }
    }
}

fn encode_frame(message: &Message) -> Option<Frame> {
    match encode(message) {
        Ok(bytes) => Some(bytes.into()),
        Err(e) => {
            error!("Failed to encode {:?}: {}", message.kind(), e);
            None
        },
    }
}
