//! Client implementation.
//!
//! The client maintains:
//! - One framed TCP stream to the server
//! - A background reader task, so receiving with a timeout never tears a frame
//! - A transform cache fed by the broadcast stream
//! - Console commands for the binary

use std::{collections::VecDeque, net::SocketAddr, time::Duration};

use anyhow::Context;
use serde::Serialize;
use simcast_shared::{
    command::{Command, CreateCylinder},
    config::ClientConfig,
    math::Vec3,
    net::{split_stream, BodyId, FrameWriter, Reply, ServerMsg, TransportError},
};
use thiserror::Error;
use tokio::{
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::mpsc,
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{cache::TransformCache, shape::CylinderShape};

/// Depth of the reader task's hand-off queue.
const INBOX_DEPTH: usize = 1024;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Disconnected,
}

/// The server answered a command with an error reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("server rejected command ({error}): {message}")]
pub struct Rejected {
    pub error: String,
    pub message: String,
}

/// Connection to a simulation server.
pub struct SimClient {
    pub state: ClientState,
    pub transforms: TransformCache,

    peer: SocketAddr,
    writer: FrameWriter<OwnedWriteHalf>,
    inbox: mpsc::Receiver<Result<ServerMsg, TransportError>>,
    reader: JoinHandle<()>,
    reply_timeout: Duration,
    /// Replies that arrived during `poll`, oldest first.
    pending_replies: VecDeque<Reply>,
    /// Commands given up on after a timeout. Their replies are dropped on
    /// arrival so later commands stay paired with their own answers.
    late_replies: usize,
}

impl SimClient {
    /// Connects to `cfg.server_addr`.
    pub async fn connect(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %server_addr, "Connecting to server");

        let stream = TcpStream::connect(server_addr)
            .await
            .context("tcp connect")?;
        stream.set_nodelay(true).context("set nodelay")?;
        let peer = stream.peer_addr().context("peer addr")?;
        let (mut reader, writer) = split_stream(stream, cfg.max_frame_len);

        let (tx, inbox) = mpsc::channel(INBOX_DEPTH);
        let reader = tokio::spawn(async move {
            loop {
                match reader.recv::<ServerMsg>().await {
                    Ok(Some(msg)) => {
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        info!(%peer, "Connected to server");
        Ok(Self {
            state: ClientState::Connected,
            transforms: TransformCache::new(),
            peer,
            writer,
            inbox,
            reader,
            reply_timeout: cfg.reply_timeout(),
            pending_replies: VecDeque::new(),
            late_replies: 0,
        })
    }

    pub fn server_peer(&self) -> SocketAddr {
        self.peer
    }

    /// Sends any serializable message as one frame.
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        self.writer.send(msg).await
    }

    pub async fn send_command(&mut self, cmd: &Command) -> Result<(), TransportError> {
        self.send(cmd).await
    }

    /// Creates a cylinder and waits for its id. Transforms that arrive in the
    /// meantime go to the cache.
    pub async fn create_cylinder(&mut self, cmd: CreateCylinder) -> anyhow::Result<BodyId> {
        self.send_command(&Command::CreateCylinder(cmd)).await?;
        match self.next_reply(self.reply_timeout).await? {
            Reply::CylinderCreated { id } => {
                debug!(body = %id, "cylinder created");
                Ok(id)
            }
            Reply::Error { error, message } => Err(Rejected { error, message }.into()),
        }
    }

    /// Next reply to a command, in the order commands were sent.
    ///
    /// On timeout the command counts as abandoned: its reply, if it ever
    /// comes, is discarded instead of being handed to the next caller.
    pub async fn next_reply(&mut self, timeout: Duration) -> anyhow::Result<Reply> {
        if let Some(reply) = self.pending_replies.pop_front() {
            return Ok(reply);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.late_replies += 1;
                anyhow::bail!("no reply within {timeout:?}");
            }
            if let Some(ServerMsg::Reply(reply)) = self.recv_timeout(remaining).await? {
                if let Some(reply) = self.claim_reply(reply) {
                    return Ok(reply);
                }
            }
        }
    }

    /// Drops `reply` if it answers an abandoned command.
    fn claim_reply(&mut self, reply: Reply) -> Option<Reply> {
        if self.late_replies > 0 {
            self.late_replies -= 1;
            debug!(?reply, "dropping late reply");
            return None;
        }
        Some(reply)
    }

    /// Receives one message, or `Ok(None)` if nothing arrived in time.
    /// Transforms are also pushed into the cache.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ServerMsg>, TransportError> {
        match tokio::time::timeout(timeout, self.inbox.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(Ok(msg))) => {
                if let ServerMsg::Transform(update) = &msg {
                    self.transforms.push(*update);
                }
                Ok(Some(msg))
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, "connection error");
                self.state = ClientState::Disconnected;
                Err(e)
            }
            Ok(None) => {
                self.state = ClientState::Disconnected;
                Err(TransportError::Closed)
            }
        }
    }

    /// Drains everything that arrives within `timeout`. Replies are kept for
    /// [`SimClient::next_reply`]. Returns the number of messages received.
    pub async fn poll(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut received = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv_timeout(remaining).await? {
                Some(ServerMsg::Reply(reply)) => {
                    if let Some(reply) = self.claim_reply(reply) {
                        self.pending_replies.push_back(reply);
                    }
                }
                Some(ServerMsg::Transform(_)) => {}
                None => break,
            }
            received += 1;
        }
        Ok(received)
    }

    /// Asks the server to close the session and waits for it to do so.
    pub async fn disconnect(mut self) -> anyhow::Result<()> {
        self.send_command(&Command::Disconnect).await?;
        self.writer.shutdown().await?;
        while let Ok(Some(msg)) = self.recv_timeout(self.reply_timeout).await {
            debug!(?msg, "discarding message during disconnect");
        }
        self.state = ClientState::Disconnected;
        info!(peer = %self.peer, "Disconnected from server");
        Ok(())
    }

    /// Executes a console command.
    pub async fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = tokens.first() else {
            return Ok(Vec::new());
        };

        match command {
            "cylinder" => {
                let args = tokens[1..]
                    .iter()
                    .map(|t| t.parse::<f32>())
                    .collect::<Result<Vec<_>, _>>();
                let args = match args {
                    Ok(args) if args.len() == 6 || args.len() == 9 => args,
                    _ => {
                        return Ok(vec![
                            "Usage: cylinder <rt> <rb> <h> <x> <y> <z> [rx ry rz]".to_string(),
                        ])
                    }
                };
                let mut shape = CylinderShape::new()
                    .radii(args[0], args[1])
                    .height(args[2])
                    .position(Vec3::new(args[3], args[4], args[5]));
                if args.len() == 9 {
                    shape = shape.rotation(Vec3::new(args[6], args[7], args[8]));
                }
                match self.create_cylinder(shape.build()).await {
                    Ok(id) => Ok(vec![format!("Created body {id}")]),
                    Err(e) => match e.downcast::<Rejected>() {
                        Ok(rejected) => Ok(vec![rejected.to_string()]),
                        Err(e) => Err(e),
                    },
                }
            }
            "status" => {
                let mut out = vec![
                    format!("State: {:?}", self.state),
                    format!("Server: {}", self.server_peer()),
                    format!("Bodies: {}", self.transforms.len()),
                    format!("Updates: {}", self.transforms.updates()),
                ];
                for id in self.transforms.ids() {
                    if let Some(t) = self.transforms.get(id) {
                        out.push(format!(
                            "  {id} pos=({:.3}, {:.3}, {:.3})",
                            t.position.x, t.position.y, t.position.z
                        ));
                    }
                }
                Ok(out)
            }
            other => Ok(vec![format!(
                "Unknown command: {other} (try cylinder, status, quit)"
            )]),
        }
    }
}

impl Drop for SimClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
