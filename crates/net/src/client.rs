//! TCP client room
//!
//! [`RemoteRoom`] joins a room hosted by a [`crate::RelayServer`]. The join
//! handshake completes before `connect` returns; after that one connection
//! task owns the socket and splits into a reader and a writer half.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{DataPacket, Message, PeerInfo};
use crate::room::{PublishOptions, Room, RoomEvent, RoomId, ROOM_EVENT_CAPACITY};

/// Keep-alive ping interval
const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Server is considered gone after this long without any frame
const SILENCE_TIMEOUT: Duration = Duration::from_secs(15);

/// How long to wait for the join response
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Queued outgoing frames
const COMMAND_CAPACITY: usize = 64;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

struct ClientState {
    connection: ConnectionState,
    participants: Vec<PeerInfo>,
}

/// State shared between the handle and the connection task
struct Shared {
    room_id: RoomId,
    state: RwLock<ClientState>,
    connected: AtomicBool,
    events: broadcast::Sender<RoomEvent>,
}

impl Shared {
    /// Mark the connection finished; `Disconnected` is emitted once
    async fn finish(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.state.write().await.connection = ConnectionState::Disconnected;
            let _ = self.events.send(RoomEvent::Disconnected);
            info!(room_id = %self.room_id, "Disconnected from relay");
        }
    }
}

enum ClientCommand {
    Send {
        msg: Message,
        ack: Option<oneshot::Sender<Result<()>>>,
    },
    Disconnect,
}

/// Client session on a relay room
pub struct RemoteRoom {
    id: RoomId,
    peer: PeerInfo,
    room: String,
    shared: Arc<Shared>,
    cmd_tx: mpsc::Sender<ClientCommand>,
}

impl RemoteRoom {
    /// Connect to a relay and join `room`
    ///
    /// Returns [`Error::Rejected`] or [`Error::ServerFull`] if the relay turns
    /// the join down.
    pub async fn connect(
        addr: SocketAddr,
        peer: PeerInfo,
        room: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        let room = room.into();
        info!(addr = %addr, room = %room, identity = %peer.identity, "Connecting to relay");

        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        let join = Message::JoinRequest {
            room: room.clone(),
            token: token.into(),
            peer: peer.clone(),
        };
        write_frame(&mut writer, &join).await?;

        let response = timeout(HANDSHAKE_TIMEOUT, read_frame(&mut reader))
            .await
            .map_err(|_| Error::Protocol("Join timed out".into()))??;

        let participants = match response {
            Message::JoinAccepted { participants, .. } => participants,
            Message::JoinRejected { reason } => {
                warn!(reason = %reason, "Join rejected");
                return Err(rejection(reason));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Unexpected join response: {:?}",
                    other
                )))
            }
        };

        let id = RoomId::new();
        let (events, _) = broadcast::channel(ROOM_EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            room_id: id,
            state: RwLock::new(ClientState {
                connection: ConnectionState::Connected,
                participants,
            }),
            connected: AtomicBool::new(true),
            events,
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        tokio::spawn(connection_task(
            reader,
            writer,
            shared.clone(),
            cmd_tx.downgrade(),
            cmd_rx,
        ));

        info!(room_id = %id, room = %room, "Joined relay room");

        Ok(Self {
            id,
            peer,
            room,
            shared,
            cmd_tx,
        })
    }

    /// Name of the joined room
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Leave the room
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.state.read().await.connection
    }

    /// Other peers in the room, as last reported by the relay
    pub async fn participants(&self) -> Vec<PeerInfo> {
        self.shared.state.read().await.participants.clone()
    }
}

fn rejection(reason: String) -> Error {
    if reason == Error::ServerFull.to_string() {
        Error::ServerFull
    } else {
        Error::Rejected(reason)
    }
}

#[async_trait]
impl Room for RemoteRoom {
    fn id(&self) -> RoomId {
        self.id
    }

    fn local_participant(&self) -> PeerInfo {
        self.peer.clone()
    }

    async fn publish(&self, payload: Vec<u8>, options: PublishOptions) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let msg = Message::Data {
            topic: Some(options.topic),
            payload,
            reliable: options.reliable,
            from: None,
        };

        if !options.reliable {
            return match self.cmd_tx.try_send(ClientCommand::Send { msg, ack: None }) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    debug!(room_id = %self.id, "Dropping unreliable packet");
                    Err(Error::Dropped)
                }
                Err(TrySendError::Closed(_)) => Err(Error::NotConnected),
            };
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientCommand::Send {
                msg,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        ack_rx.await.map_err(|_| Error::NotConnected)?
    }

    fn events(&self) -> broadcast::Receiver<RoomEvent> {
        self.shared.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

/// Run the reader and writer until either ends, then report the disconnect
async fn connection_task(
    reader: ReadHalf<TcpStream>,
    writer: WriteHalf<TcpStream>,
    shared: Arc<Shared>,
    cmd_tx: mpsc::WeakSender<ClientCommand>,
    cmd_rx: mpsc::Receiver<ClientCommand>,
) {
    let mut reader_handle = tokio::spawn(reader_task(reader, shared.clone(), cmd_tx));
    let mut writer_handle = tokio::spawn(writer_task(writer, cmd_rx));

    tokio::select! {
        _ = &mut reader_handle => writer_handle.abort(),
        _ = &mut writer_handle => reader_handle.abort(),
    }

    shared.finish().await;
}

async fn reader_task(
    mut reader: ReadHalf<TcpStream>,
    shared: Arc<Shared>,
    cmd_tx: mpsc::WeakSender<ClientCommand>,
) {
    loop {
        let msg = match timeout(SILENCE_TIMEOUT, read_frame(&mut reader)).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(Error::ConnectionClosed)) => {
                debug!("Relay closed connection");
                break;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Read error");
                break;
            }
            Err(_) => {
                warn!(
                    timeout_secs = SILENCE_TIMEOUT.as_secs(),
                    "Relay went silent"
                );
                break;
            }
        };

        match msg {
            Message::Data {
                topic,
                payload,
                from,
                ..
            } => {
                let packet = DataPacket {
                    payload,
                    topic,
                    from,
                };
                let _ = shared.events.send(RoomEvent::Data(packet));
            }
            Message::ParticipantJoined { peer } => {
                debug!(identity = %peer.identity, "Participant joined");
                shared.state.write().await.participants.push(peer.clone());
                let _ = shared.events.send(RoomEvent::ParticipantJoined(peer));
            }
            Message::ParticipantLeft { identity } => {
                debug!(identity = %identity, "Participant left");
                shared
                    .state
                    .write()
                    .await
                    .participants
                    .retain(|p| p.identity != identity);
                let _ = shared.events.send(RoomEvent::ParticipantLeft { identity });
            }
            Message::Ping => {
                let pong = ClientCommand::Send {
                    msg: Message::Pong,
                    ack: None,
                };
                let queued = cmd_tx
                    .upgrade()
                    .is_some_and(|tx| tx.try_send(pong).is_ok());
                if !queued {
                    debug!("Could not queue pong");
                }
            }
            Message::Pong => {
                debug!("Received pong");
            }
            Message::ServerShutdown => {
                info!("Relay is shutting down");
                break;
            }
            _ => {
                debug!("Ignoring unexpected message");
            }
        }
    }
}

async fn writer_task(mut writer: WriteHalf<TcpStream>, mut cmd_rx: mpsc::Receiver<ClientCommand>) {
    let mut ping = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send { msg, ack }) => {
                        let result = write_frame(&mut writer, &msg).await;
                        let failed = result.is_err();
                        if let Err(e) = &result {
                            warn!(error = %e, "Write error");
                        }
                        if let Some(ack) = ack {
                            let _ = ack.send(result);
                        }
                        if failed {
                            break;
                        }
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if let Err(e) = write_frame(&mut writer, &Message::Ping).await {
                    warn!(error = %e, "Ping failed");
                    break;
                }
            }
        }
    }
}
