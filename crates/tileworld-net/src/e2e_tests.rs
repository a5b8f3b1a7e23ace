//! Server and client talking over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tileworld_common::{ChunkCoord, TileCoord};
use tileworld_world::{
    ChunkPreloader, Direction, DiskFileStore, LoaderConfig, MemoryFileStore, ObjectType, World,
    WorldObject, WorldObjectUpdate, WorldOptions, WorldPersistence,
};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::prelude::*;

const WORLD: &str = "e2e";

struct TestServer {
    addr: SocketAddr,
    events: Arc<EventBus>,
    store: Arc<MemoryFileStore>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<NetResult<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let store = Arc::new(MemoryFileStore::new());
        let world = World::open_or_create(
            store.clone(),
            WORLD,
            WorldOptions {
                seed: 42,
                ..WorldOptions::default()
            },
        )
        .expect("open world failed");
        let credentials = Arc::new(MemoryCredentialStore::with_users([
            ("alice", "pw"),
            ("bob", "pw"),
        ]));
        let events = Arc::new(EventBus::default());
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            tcp_port: 0,
            autosave_interval: 0,
            ..ServerConfig::default()
        };

        let server = Server::bind(config, world, credentials, events.clone())
            .await
            .expect("bind failed");
        let addr = server.local_addr().expect("local_addr failed");
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async move {
            let _ = signal.await;
        }));

        Self {
            addr,
            events,
            store,
            shutdown,
            task,
        }
    }

    fn persistence(&self) -> WorldPersistence {
        WorldPersistence::new(self.store.clone(), WORLD).expect("valid name")
    }

    async fn stop(self) -> NetResult<()> {
        let _ = self.shutdown.send(());
        self.task.await.expect("server task panicked")
    }
}

fn new_client() -> SessionClient {
    SessionClient::new(ClientConfig::default(), Handle::current(), None)
}

async fn poll_until(
    client: &mut SessionClient,
    mut done: impl FnMut(&SessionClient, &[SessionEvent]) -> bool,
) -> Vec<SessionEvent> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = Vec::new();
    loop {
        seen.extend(client.poll(0.01));
        if done(client, &seen) {
            return seen;
        }
        assert!(Instant::now() < deadline, "timed out, saw {seen:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_event(bus: &EventBus, mut wanted: impl FnMut(&ServerEvent) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if bus.drain().iter().any(&mut wanted) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for server event");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn login_result(events: &[SessionEvent]) -> Option<&SessionEvent> {
    events
        .iter()
        .find(|e| matches!(e, SessionEvent::LoginResult { .. }))
}

async fn logged_in(addr: SocketAddr, username: &str) -> SessionClient {
    let mut client = new_client();
    client.login(username, "pw").expect("queue login failed");
    client.connect(addr.to_string());

    let events = poll_until(&mut client, |_, seen| login_result(seen).is_some()).await;
    assert!(
        matches!(
            login_result(&events),
            Some(SessionEvent::LoginResult { success: true, .. })
        ),
        "login failed: {events:?}"
    );
    poll_until(&mut client, |c, _| c.chunks().loaded_count() >= 25).await;
    client
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_streams_surrounding_chunks() {
    let server = TestServer::start().await;
    let mut client = new_client();
    client.login("alice", "pw").expect("queue login failed");
    client.connect(server.addr.to_string());

    let events = poll_until(&mut client, |c, _| c.chunks().loaded_count() >= 25).await;
    assert!(events.contains(&SessionEvent::Connected));
    assert!(events.contains(&SessionEvent::LoginResult {
        success: true,
        message: "Login successful".to_string(),
        start: Some(TileCoord::new(0, 0)),
    }));

    assert_eq!(client.state(), ConnectionState::Authenticated);
    assert_eq!(client.username(), Some("alice"));
    assert_eq!(client.chunks().loaded_count(), 25);
    for coord in [(0, 0), (-2, -2), (2, 2), (2, -2)] {
        assert!(client.chunks().is_loaded(ChunkCoord::new(coord.0, coord.1)));
    }
    assert!(client.remote_players().is_empty());

    wait_for_event(&server.events, |e| {
        matches!(e, ServerEvent::PlayerJoined { username, .. } if username == "alice")
    })
    .await;
    server.stop().await.expect("shutdown failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_received_chunks_are_cached_locally() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let cache = Arc::new(
        WorldPersistence::new(Arc::new(DiskFileStore::new(dir.path())), "cache")
            .expect("valid name"),
    );
    let mut client =
        SessionClient::new(ClientConfig::default(), Handle::current(), Some(cache.clone()));
    client.login("alice", "pw").expect("queue login failed");
    client.connect(server.addr.to_string());
    poll_until(&mut client, |c, _| c.chunks().loaded_count() >= 25).await;

    let origin = ChunkCoord::new(0, 0);
    let cached = cache
        .load_chunk(origin)
        .expect("load failed")
        .expect("origin cached");
    let live = client.chunks().get_if_loaded(origin).expect("origin resident");
    assert!(cached.same_content(&live));
    server.stop().await.expect("shutdown failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_password_is_refused() {
    let server = TestServer::start().await;
    let mut client = new_client();
    client.connect(server.addr.to_string());
    poll_until(&mut client, |c, _| c.is_connected()).await;

    client.login("alice", "nope").expect("send login failed");
    let events = poll_until(&mut client, |_, seen| login_result(seen).is_some()).await;
    assert!(matches!(
        login_result(&events),
        Some(SessionEvent::LoginResult {
            success: false,
            start: None,
            ..
        })
    ));
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(matches!(
        client.request_chunk(ChunkCoord::new(0, 0)),
        Err(NetError::NotAuthenticated)
    ));
    server.stop().await.expect("shutdown failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_messages_before_login_are_ignored() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(server.addr)
        .await
        .expect("connect failed");

    let sneaky_move = Message::PlayerMoveRequest(PlayerMoveRequest {
        x: 9,
        y: 9,
        running: false,
        moving: true,
        direction: Direction::Left,
    });
    write_message(&mut stream, &sneaky_move)
        .await
        .expect("write failed");
    write_message(&mut stream, &Message::chunk_request(ChunkCoord::new(5, 5)))
        .await
        .expect("write failed");
    write_message(&mut stream, &Message::login("bob", "pw"))
        .await
        .expect("write failed");

    // Nothing answers the first two, so the login response comes first.
    let frame = read_frame(&mut stream)
        .await
        .expect("read failed")
        .expect("stream closed");
    match frame.decode().expect("decode failed") {
        Message::LoginResponse(response) => {
            assert!(response.success);
            assert_eq!((response.start_x, response.start_y), (0, 0));
        },
        other => panic!("expected login response, got {other:?}"),
    }
    server.stop().await.expect("shutdown failed");
}

async fn next_message(stream: &mut TcpStream) -> Message {
    let frame = tokio::time::timeout(Duration::from_secs(10), read_frame(stream))
        .await
        .expect("timed out waiting for a frame")
        .expect("read failed")
        .expect("stream closed");
    frame.decode().expect("decode failed")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_snapshot_includes_own_player() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(server.addr)
        .await
        .expect("connect failed");
    write_message(&mut stream, &Message::login("alice", "pw"))
        .await
        .expect("write failed");

    match next_message(&mut stream).await {
        Message::LoginResponse(response) => assert!(response.success),
        other => panic!("expected login response, got {other:?}"),
    }
    match next_message(&mut stream).await {
        Message::PlayerStatesUpdate(update) => {
            let alice = update.players.get("alice").expect("alice in snapshot");
            assert_eq!((alice.x, alice.y), (0, 0));
        },
        other => panic!("expected player states, got {other:?}"),
    }

    // The surrounding chunks follow.
    let mut chunks = 0;
    while chunks < 25 {
        match next_message(&mut stream).await {
            Message::ChunkData(_) => chunks += 1,
            other => panic!("expected chunk data, got {other:?}"),
        }
    }
    server.stop().await.expect("shutdown failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_user_then_login() {
    let server = TestServer::start().await;
    let mut client = new_client();
    client.create_user("carol", "pw").expect("queue create failed");
    client.login("carol", "pw").expect("queue login failed");
    client.connect(server.addr.to_string());

    let events = poll_until(&mut client, |_, seen| login_result(seen).is_some()).await;
    assert!(events.contains(&SessionEvent::CreateUserResult {
        success: true,
        message: "User created".to_string(),
    }));
    assert!(matches!(
        login_result(&events),
        Some(SessionEvent::LoginResult { success: true, .. })
    ));
    server.stop().await.expect("shutdown failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_moves_reach_other_players() {
    let server = TestServer::start().await;
    let mut alice = logged_in(server.addr, "alice").await;
    let mut bob = logged_in(server.addr, "bob").await;

    bob.send_move(TileCoord::new(5, 6), Direction::Right, true, false)
        .expect("send move failed");

    poll_until(&mut alice, |c, _| {
        c.remote_players()
            .get("bob")
            .is_some_and(|p| p.sync.x == 5 && p.sync.y == 6)
    })
    .await;
    let seen_by_alice = alice.remote_players().get("bob").expect("bob visible");
    assert_eq!(seen_by_alice.sync.direction, Direction::Right);
    assert!(seen_by_alice.sync.moving);

    poll_until(&mut bob, |c, _| c.remote_players().get("alice").is_some()).await;
    assert!(bob.remote_players().get("bob").is_none());
    server.stop().await.expect("shutdown failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_same_chunk_twice_is_identical() {
    let server = TestServer::start().await;
    let mut alice = logged_in(server.addr, "alice").await;
    let coord = ChunkCoord::new(3, 3);
    let received = |seen: &[SessionEvent]| seen.contains(&SessionEvent::ChunkReceived(coord));

    alice.request_chunk(coord).expect("request failed");
    poll_until(&mut alice, |_, seen| received(seen)).await;
    let first = alice.chunks().get_if_loaded(coord).expect("chunk resident");

    alice.request_chunk(coord).expect("request failed");
    poll_until(&mut alice, |_, seen| received(seen)).await;
    let second = alice.chunks().get_if_loaded(coord).expect("chunk resident");

    assert!(first.same_content(&second));
    server.stop().await.expect("shutdown failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chat_is_relayed() {
    let server = TestServer::start().await;
    let alice = logged_in(server.addr, "alice").await;
    let mut bob = logged_in(server.addr, "bob").await;

    alice.send_chat("hello bob").expect("send chat failed");
    let events = poll_until(&mut bob, |_, seen| {
        seen.iter()
            .any(|e| matches!(e, SessionEvent::Chat(chat) if chat.content == "hello bob"))
    })
    .await;
    let chat = events
        .iter()
        .find_map(|e| match e {
            SessionEvent::Chat(chat) => Some(chat),
            _ => None,
        })
        .expect("chat received");
    assert_eq!(chat.sender, "alice");
    assert_eq!(chat.kind, ChatKind::Player);
    server.stop().await.expect("shutdown failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_object_updates_are_broadcast() {
    let server = TestServer::start().await;
    let mut alice = logged_in(server.addr, "alice").await;
    let mut bob = logged_in(server.addr, "bob").await;

    let origin = ChunkCoord::new(0, 0);
    let chunk = alice.chunks().get_if_loaded(origin).expect("origin resident");
    let free = (0..16)
        .flat_map(|y| (0..16).map(move |x| TileCoord::new(x, y)))
        .find(|tile| chunk.object_at(*tile).is_none())
        .expect("a free tile");
    let rock = WorldObject::spawn(ObjectType::Rock, free);

    alice
        .send_object_update(WorldObjectUpdate::spawned(&rock))
        .expect("send update failed");

    let has_rock = |c: &SessionClient| {
        c.chunks()
            .get_if_loaded(origin)
            .is_some_and(|chunk| chunk.object(rock.id).is_some())
    };
    poll_until(&mut alice, |c, _| has_rock(c)).await;
    poll_until(&mut bob, |c, _| has_rock(c)).await;
    server.stop().await.expect("shutdown failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_login_is_refused() {
    let server = TestServer::start().await;
    let _alice = logged_in(server.addr, "alice").await;

    let mut imposter = new_client();
    imposter.login("alice", "pw").expect("queue login failed");
    imposter.connect(server.addr.to_string());
    let events = poll_until(&mut imposter, |_, seen| login_result(seen).is_some()).await;
    assert!(matches!(
        login_result(&events),
        Some(SessionEvent::LoginResult { success: false, .. })
    ));
    assert_eq!(imposter.state(), ConnectionState::Connected);
    server.stop().await.expect("shutdown failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disconnect_persists_and_notifies() {
    let server = TestServer::start().await;
    let mut alice = logged_in(server.addr, "alice").await;
    let mut bob = logged_in(server.addr, "bob").await;

    alice
        .send_move(TileCoord::new(7, -3), Direction::Up, false, false)
        .expect("send move failed");
    poll_until(&mut bob, |c, _| {
        c.remote_players().get("alice").is_some_and(|p| p.sync.x == 7)
    })
    .await;

    alice.disconnect();
    assert_eq!(alice.state(), ConnectionState::Disconnected);
    assert_eq!(alice.chunks().loaded_count(), 0);

    wait_for_event(&server.events, |e| {
        matches!(e, ServerEvent::PlayerLeft { username, .. } if username == "alice")
    })
    .await;
    poll_until(&mut bob, |c, _| c.remote_players().get("alice").is_none()).await;

    let saved = server
        .persistence()
        .load_player("alice")
        .expect("load failed")
        .expect("alice was saved");
    assert_eq!(saved.tile(), TileCoord::new(7, -3));
    assert_eq!(saved.direction, Direction::Up);
    server.stop().await.expect("shutdown failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pending_login_fails_when_connect_fails() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").expect("bind failed");
    let addr = closed.local_addr().expect("local_addr failed");
    drop(closed);

    let mut client = new_client();
    client.login("alice", "pw").expect("queue login failed");
    client.connect(addr.to_string());

    let events = poll_until(&mut client, |_, seen| {
        seen.iter()
            .any(|e| matches!(e, SessionEvent::ConnectionFailed(_)))
    })
    .await;
    assert!(matches!(
        login_result(&events),
        Some(SessionEvent::LoginResult { success: false, .. })
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_preloader_requests_over_the_network() {
    let server = TestServer::start().await;
    let mut alice = logged_in(server.addr, "alice").await;

    let mut preloader = ChunkPreloader::new(
        Arc::new(alice.chunk_source()),
        LoaderConfig {
            preload_radius: 3,
            ..LoaderConfig::default()
        },
    )
    .expect("spawn preloader failed");
    preloader.update(0.0, 0.0);

    poll_until(&mut alice, |c, _| c.chunks().loaded_count() >= 49).await;
    assert!(alice.chunks().is_loaded(ChunkCoord::new(3, -3)));
    drop(preloader);
    server.stop().await.expect("shutdown failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_releases_players_and_saves() {
    let server = TestServer::start().await;
    let mut alice = logged_in(server.addr, "alice").await;
    let events = server.events.clone();
    let persistence = server.persistence();

    server.stop().await.expect("shutdown failed");

    assert!(events.drain().iter().any(
        |e| matches!(e, ServerEvent::PlayerLeft { username, .. } if username == "alice")
    ));
    assert!(persistence.load_player("alice").expect("load failed").is_some());
    let meta = persistence
        .load_meta()
        .expect("load failed")
        .expect("meta saved");
    assert_eq!(meta.seed, 42);

    poll_until(&mut alice, |_, seen| {
        seen.iter()
            .any(|e| matches!(e, SessionEvent::Disconnected(_)))
    })
    .await;
    assert_eq!(alice.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_during_disconnect_reports_each_leave_once() {
    let server = TestServer::start().await;
    let mut alice = logged_in(server.addr, "alice").await;
    let _bob = logged_in(server.addr, "bob").await;
    let events = server.events.clone();
    let persistence = server.persistence();
    // Drop the join notifications.
    events.drain();

    alice.disconnect();
    server.stop().await.expect("shutdown failed");

    let left: Vec<String> = events
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::PlayerLeft { username, .. } => Some(username),
            ServerEvent::PlayerJoined { .. } => None,
        })
        .collect();
    for name in ["alice", "bob"] {
        assert_eq!(left.iter().filter(|n| *n == name).count(), 1, "leaves: {left:?}");
        assert!(persistence.load_player(name).expect("load failed").is_some());
    }
}
