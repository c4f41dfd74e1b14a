//! TCP relay server hosting one room
//!
//! Peers connect, present the room name and join token, and from then on
//! every data packet a peer sends is stamped with its identity and relayed to
//! all other peers. The relay keeps no message state.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Message, PeerInfo};
use crate::room_url::RoomUrl;

/// Maximum number of connected peers
pub const MAX_PEERS: usize = 32;

/// Per-peer outgoing queue
const PEER_QUEUE_CAPACITY: usize = 64;

/// Peers silent for longer than this are dropped
const PEER_SILENCE_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a reliable relay waits on a full peer queue before giving the
/// peer up as stuck
const SLOW_PEER_GRACE: Duration = Duration::from_secs(1);

/// Time allowed to flush a departing peer's queue
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Length of generated join tokens
const TOKEN_LEN: usize = 16;

#[derive(Clone)]
struct Peer {
    info: PeerInfo,
    /// Distinguishes reconnects under the same identity
    conn: u64,
    tx: mpsc::Sender<Message>,
    kick: Arc<Notify>,
}

struct ServerState {
    room: String,
    token: String,
    peers: HashMap<String, Peer>,
}

impl ServerState {
    fn participants(&self) -> Vec<PeerInfo> {
        self.peers.values().map(|p| p.info.clone()).collect()
    }

    fn others(&self, except: Option<&str>) -> Vec<Peer> {
        self.peers
            .values()
            .filter(|p| except != Some(p.info.identity.as_str()))
            .cloned()
            .collect()
    }
}

/// Relay server handle
pub struct RelayServer {
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Start a relay for `room` on the given port (0 picks a free one)
    pub async fn start(port: u16, room: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let room = room.into();
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, room = %room, "Relay started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(ServerState {
            room,
            token: token.into(),
            peers: HashMap::new(),
        }));

        tokio::spawn(accept_loop(
            listener,
            state.clone(),
            shutdown_tx.clone(),
        ));

        Ok(Self {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// The server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Join URL for this relay as reachable at `host`
    pub async fn room_url(&self, host: IpAddr) -> RoomUrl {
        let state = self.state.read().await;
        RoomUrl::new(host, self.addr.port(), state.room.clone(), state.token.clone())
    }

    /// Currently connected peers
    pub async fn participants(&self) -> Vec<PeerInfo> {
        self.state.read().await.participants()
    }

    /// Notify peers and stop accepting connections
    pub async fn shutdown(&self) {
        broadcast_to_peers(&self.state, Message::ServerShutdown, None).await;
        let _ = self.shutdown_tx.send(());
        info!("Relay shutdown initiated");
    }

    /// Replace the join token; peers already in the room stay
    pub async fn regenerate_token(&self) -> String {
        let token = generate_token();
        self.state.write().await.token = token.clone();
        info!("Join token regenerated");
        token
    }
}

/// Random alphanumeric join token
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut next_conn: u64 = 0;
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        next_conn += 1;
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            next_conn,
                            state.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn: u64,
    state: Arc<RwLock<ServerState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (msg_tx, msg_rx) = mpsc::channel(PEER_QUEUE_CAPACITY);
    let kick = Arc::new(Notify::new());

    let peer = match handle_join(&mut reader, &state, conn, msg_tx, kick.clone()).await {
        Ok(peer) => peer,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Join failed");
            if matches!(e, Error::Rejected(_) | Error::ServerFull) {
                let reason = match e {
                    Error::Rejected(reason) => reason,
                    other => other.to_string(),
                };
                let _ = write_frame(&mut writer, &Message::JoinRejected { reason }).await;
            }
            return;
        }
    };
    let identity = peer.identity.clone();

    info!(addr = %addr, identity = %identity, "Peer joined");

    let mut writer_handle = tokio::spawn(writer_task(writer, msg_rx));
    broadcast_to_peers(
        &state,
        Message::ParticipantJoined { peer: peer.clone() },
        Some(&identity),
    )
    .await;

    let mut evicted = false;
    loop {
        tokio::select! {
            result = timeout(PEER_SILENCE_TIMEOUT, read_frame(&mut reader)) => {
                match result {
                    Ok(Ok(msg)) => handle_message(msg, &peer, &state).await,
                    Ok(Err(Error::ConnectionClosed)) => {
                        debug!(identity = %identity, "Connection closed");
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!(identity = %identity, error = %e, "Read error");
                        break;
                    }
                    Err(_) => {
                        warn!(identity = %identity, "Peer went silent");
                        break;
                    }
                }
            }
            _ = kick.notified() => {
                debug!(identity = %identity, "Closing evicted connection");
                evicted = true;
                break;
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    let removed = remove_peer(&state, &identity, conn).await;
    if removed || evicted {
        broadcast_to_peers(
            &state,
            Message::ParticipantLeft {
                identity: identity.clone(),
            },
            None,
        )
        .await;
    }
    // Queued frames (such as ServerShutdown) drain before the socket closes
    if timeout(DRAIN_TIMEOUT, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    info!(identity = %identity, "Peer disconnected");
}

async fn handle_join(
    reader: &mut ReadHalf<TcpStream>,
    state: &Arc<RwLock<ServerState>>,
    conn: u64,
    tx: mpsc::Sender<Message>,
    kick: Arc<Notify>,
) -> Result<PeerInfo> {
    let msg = timeout(PEER_SILENCE_TIMEOUT, read_frame(reader))
        .await
        .map_err(|_| Error::Protocol("Join timed out".into()))??;

    let Message::JoinRequest { room, token, peer } = msg else {
        return Err(Error::Protocol("Expected JoinRequest".into()));
    };

    let mut s = state.write().await;

    if room != s.room {
        return Err(Error::Rejected("Wrong room".into()));
    }
    if token != s.token {
        return Err(Error::Rejected("Invalid token".into()));
    }
    if peer.identity.is_empty() {
        return Err(Error::Rejected("Empty identity".into()));
    }
    if s.peers.len() >= MAX_PEERS {
        return Err(Error::ServerFull);
    }
    if s.peers.contains_key(&peer.identity) {
        return Err(Error::Rejected("Already connected".into()));
    }

    let accepted = Message::JoinAccepted {
        room: s.room.clone(),
        participants: s.participants(),
    };
    // Queue the acceptance first so it precedes any relayed traffic
    tx.try_send(accepted)
        .map_err(|_| Error::Protocol("Peer queue unavailable".into()))?;

    s.peers.insert(
        peer.identity.clone(),
        Peer {
            info: peer.clone(),
            conn,
            tx,
            kick,
        },
    );

    Ok(peer)
}

async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

async fn handle_message(msg: Message, sender: &PeerInfo, state: &Arc<RwLock<ServerState>>) {
    match msg {
        Message::Data {
            topic,
            payload,
            reliable,
            ..
        } => {
            debug!(
                identity = %sender.identity,
                topic = ?topic,
                bytes = payload.len(),
                reliable,
                "Relaying data"
            );
            let msg = Message::Data {
                topic,
                payload,
                reliable,
                from: Some(sender.clone()),
            };
            if reliable {
                broadcast_to_peers(state, msg, Some(&sender.identity)).await;
            } else {
                offer_to_peers(state, msg, &sender.identity).await;
            }
        }
        Message::Ping => {
            let tx = state
                .read()
                .await
                .peers
                .get(&sender.identity)
                .map(|p| p.tx.clone());
            // A peer too backed up for a pong will be evicted by the next relay
            if let Some(tx) = tx {
                let _ = tx.try_send(Message::Pong);
            }
        }
        Message::Pong => {}
        _ => {
            debug!(identity = %sender.identity, "Ignoring unexpected message type");
        }
    }
}

/// Remove `identity` if it still belongs to connection `conn`
async fn remove_peer(state: &Arc<RwLock<ServerState>>, identity: &str, conn: u64) -> bool {
    let mut s = state.write().await;
    if s.peers.get(identity).is_some_and(|p| p.conn == conn) {
        s.peers.remove(identity);
        true
    } else {
        false
    }
}

/// Queue to every peer, optionally excluding one
///
/// Targets are collected under the lock and sent to after it is released. A
/// peer whose queue stays full for [`SLOW_PEER_GRACE`] is evicted rather than
/// stalling the room.
async fn broadcast_to_peers(state: &Arc<RwLock<ServerState>>, msg: Message, except: Option<&str>) {
    let targets = state.read().await.others(except);
    let mut stuck = Vec::new();
    for peer in targets {
        match peer.tx.send_timeout(msg.clone(), SLOW_PEER_GRACE).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => stuck.push(peer),
            Err(SendTimeoutError::Closed(_)) => {
                debug!(identity = %peer.info.identity, "Failed to queue message for peer");
            }
        }
    }
    for peer in stuck {
        evict(state, &peer).await;
    }
}

/// Queue to every other peer, dropping where the queue is full
async fn offer_to_peers(state: &Arc<RwLock<ServerState>>, msg: Message, except: &str) {
    let targets = state.read().await.others(Some(except));
    for peer in targets {
        if let Err(TrySendError::Full(_)) = peer.tx.try_send(msg.clone()) {
            debug!(identity = %peer.info.identity, "Dropped unreliable packet for slow peer");
        }
    }
}

/// Take a stuck peer out of the room and wake its connection task, which
/// announces the departure
async fn evict(state: &Arc<RwLock<ServerState>>, peer: &Peer) {
    if remove_peer(state, &peer.info.identity, peer.conn).await {
        warn!(identity = %peer.info.identity, "Evicting peer with a full queue");
        peer.kick.notify_one();
    }
}
