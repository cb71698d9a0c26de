//! Connection sessions.
//!
//! One session per accepted TCP stream, moving through
//! `Connecting -> Active -> Closing -> Closed`. While active, three tasks
//! share the session:
//! - inbound: reads frames, decodes commands, dispatches them (this task);
//! - writer: drains the bounded outbound queue onto the socket;
//! - publisher: feeds transform updates into the same queue.
//!
//! Teardown fires the publisher's stop handle exactly once, then lets the
//! writer drain. Nothing here can reach the simulation clock or another
//! session.

use std::{
    collections::BTreeMap,
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use simcast_shared::{
    command::{decode_command, Command},
    net::{split_stream, FrameReader, FrameWriter, Reply, ServerMsg, TransportError},
    physics::PhysicsEngine,
};
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    broadcast::BroadcastPublisher,
    commands::CommandProcessor,
    error::{CommandError, FatalReporter},
    world::WorldState,
};

/// How long a closing session waits for queued messages to reach the socket.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a session for logs and the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn new_unique() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub state: SessionState,
}

/// Live sessions, shared between the accept loop, the sessions and the console.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<BTreeMap<SessionId, SessionInfo>>>,
}

impl SessionRegistry {
    fn insert(&self, info: SessionInfo) {
        self.inner.lock().insert(info.id, info);
    }

    fn set_state(&self, id: SessionId, state: SessionState) {
        if let Some(info) = self.inner.lock().get_mut(&id) {
            info.state = state;
        }
    }

    fn remove(&self, id: SessionId) {
        self.inner.lock().remove(&id);
    }

    /// Number of sessions not yet closed.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All sessions in id order.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.inner.lock().values().copied().collect()
    }
}

/// Everything a session needs from the server.
pub struct SessionContext<E: PhysicsEngine> {
    pub world: Arc<WorldState<E>>,
    pub processor: CommandProcessor<E>,
    pub registry: SessionRegistry,
    pub fatal: FatalReporter,
    pub broadcast_interval: Duration,
    pub max_frame_len: usize,
    pub outbound_queue: usize,
}

/// Why a session left `Active`.
#[derive(Debug)]
enum CloseReason {
    PeerClosed,
    ClientRequest,
    Transport(TransportError),
    WriterGone,
    EngineFatal,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::ClientRequest => f.write_str("client requested disconnect"),
            CloseReason::Transport(e) => write!(f, "{e}"),
            CloseReason::WriterGone => f.write_str("outbound writer stopped"),
            CloseReason::EngineFatal => f.write_str("engine failure"),
        }
    }
}

/// One client connection.
pub struct ConnectionSession<E: PhysicsEngine + 'static> {
    id: SessionId,
    peer: SocketAddr,
    state: SessionState,
    ctx: Arc<SessionContext<E>>,
    out_tx: Option<mpsc::Sender<ServerMsg>>,
    broadcast_stop: Option<oneshot::Sender<()>>,
    broadcast: Option<JoinHandle<Result<(), TransportError>>>,
    writer: Option<JoinHandle<Result<(), TransportError>>>,
}

impl<E: PhysicsEngine + 'static> ConnectionSession<E> {
    /// Serves one accepted stream until it closes.
    pub async fn run(stream: TcpStream, peer: SocketAddr, ctx: Arc<SessionContext<E>>) {
        let mut session = Self::new(peer, ctx);
        let reason = match session.activate(stream) {
            Ok(reader) => session.inbound(reader).await,
            Err(e) => CloseReason::Transport(e),
        };
        session.close(reason).await;
    }

    fn new(peer: SocketAddr, ctx: Arc<SessionContext<E>>) -> Self {
        let id = SessionId::new_unique();
        ctx.registry.insert(SessionInfo {
            id,
            peer,
            state: SessionState::Connecting,
        });
        debug!(session = ?id, %peer, "session connecting");
        Self {
            id,
            peer,
            state: SessionState::Connecting,
            ctx,
            out_tx: None,
            broadcast_stop: None,
            broadcast: None,
            writer: None,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session = ?self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
        self.ctx.registry.set_state(self.id, next);
    }

    /// `Connecting -> Active`: splits the stream and starts writer and publisher.
    fn activate(&mut self, stream: TcpStream) -> Result<FrameReader<OwnedReadHalf>, TransportError> {
        stream.set_nodelay(true)?;
        let (reader, writer) = split_stream(stream, self.ctx.max_frame_len);
        let (out_tx, out_rx) = mpsc::channel(self.ctx.outbound_queue);

        self.writer = Some(tokio::spawn(write_loop(writer, out_rx)));

        let (stop_tx, stop_rx) = oneshot::channel();
        let publisher = BroadcastPublisher::new(self.ctx.world.clone(), self.ctx.broadcast_interval);
        self.broadcast = Some(tokio::spawn(publisher.run(self.id, out_tx.clone(), stop_rx)));
        self.broadcast_stop = Some(stop_tx);
        self.out_tx = Some(out_tx);

        self.transition(SessionState::Active);
        info!(session = ?self.id, peer = %self.peer, "session active");
        Ok(reader)
    }

    /// Inbound activity. Returns once the session has to close.
    async fn inbound(&mut self, mut reader: FrameReader<OwnedReadHalf>) -> CloseReason {
        let Some(out) = self.out_tx.clone() else {
            return CloseReason::WriterGone;
        };

        loop {
            let frame = tokio::select! {
                res = reader.recv_frame() => res,
                _ = out.closed() => return CloseReason::WriterGone,
            };
            let frame = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => return CloseReason::PeerClosed,
                Err(e) => return CloseReason::Transport(e),
            };

            let reply = match decode_command(&frame) {
                Ok(Command::Disconnect) => return CloseReason::ClientRequest,
                Ok(Command::CreateCylinder(cmd)) => {
                    match self.ctx.processor.handle_create_cylinder(&cmd) {
                        Ok(id) => {
                            info!(session = ?self.id, body = %id, "cylinder created");
                            Reply::CylinderCreated { id }
                        }
                        Err(CommandError::Validation(e)) => {
                            debug!(session = ?self.id, error = %e, "command rejected");
                            Reply::rejected(&e)
                        }
                        Err(CommandError::Fatal(e)) => {
                            error!(session = ?self.id, error = %e, "body creation failed");
                            self.ctx.fatal.report(e);
                            return CloseReason::EngineFatal;
                        }
                    }
                }
                Err(e) => {
                    debug!(session = ?self.id, error = %e, "undecodable command");
                    Reply::rejected(&e)
                }
            };

            if out.send(ServerMsg::Reply(reply)).await.is_err() {
                return CloseReason::WriterGone;
            }
        }
    }

    /// `Active -> Closing -> Closed`.
    async fn close(&mut self, reason: CloseReason) {
        self.transition(SessionState::Closing);

        if let Some(stop) = self.broadcast_stop.take() {
            // Err only means the publisher already ended on its own.
            let _ = stop.send(());
        }
        if let Some(task) = self.broadcast.take() {
            match task.await {
                Ok(Ok(())) | Ok(Err(TransportError::Closed)) => {}
                Ok(Err(e)) => debug!(session = ?self.id, error = %e, "broadcast ended with error"),
                Err(e) => warn!(session = ?self.id, error = %e, "broadcast task failed"),
            }
        }

        self.out_tx = None;
        if let Some(mut task) = self.writer.take() {
            match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => debug!(session = ?self.id, error = %e, "writer ended with error"),
                Ok(Err(e)) => warn!(session = ?self.id, error = %e, "writer task failed"),
                Err(_) => {
                    debug!(session = ?self.id, "writer did not drain in time");
                    task.abort();
                }
            }
        }

        self.transition(SessionState::Closed);
        self.ctx.registry.remove(self.id);
        info!(session = ?self.id, peer = %self.peer, %reason, "session closed");
    }
}

/// Outbound activity: queue to socket, until the queue closes or a write fails.
async fn write_loop(
    mut writer: FrameWriter<OwnedWriteHalf>,
    mut rx: mpsc::Receiver<ServerMsg>,
) -> Result<(), TransportError> {
    while let Some(msg) = rx.recv().await {
        writer.send(&msg).await?;
    }
    writer.shutdown().await
}
