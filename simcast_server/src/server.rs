//! Server implementation.
//!
//! An authoritative physics server:
//! - one world, stepped by a [`SimulationClock`] on its own thread;
//! - one task per accepted connection, each with its own broadcast publisher;
//! - console commands (`status`, `bodies`) for the operator.
//!
//! The accept loop never touches the world; sessions and the clock share it
//! through [`WorldState`]'s lock.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use simcast_shared::{config::ServerConfig, physics::PhysicsEngine};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    clock::{ClockHandle, SimulationClock},
    commands::CommandProcessor,
    error::FatalReporter,
    session::{ConnectionSession, SessionContext, SessionRegistry},
    world::WorldState,
};

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listening server bound to one world.
pub struct SimServer<E: PhysicsEngine + 'static> {
    pub cfg: ServerConfig,
    listener: TcpListener,
    ctx: Arc<SessionContext<E>>,
}

impl<E: PhysicsEngine + 'static> SimServer<E> {
    /// Binds the listen socket from `cfg.server_addr`.
    pub async fn bind(
        cfg: ServerConfig,
        world: Arc<WorldState<E>>,
        fatal: FatalReporter,
    ) -> anyhow::Result<Self> {
        cfg.validate().context("invalid server config")?;
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;

        let ctx = Arc::new(SessionContext {
            processor: CommandProcessor::new(world.clone(), &cfg),
            world,
            registry: SessionRegistry::default(),
            fatal,
            broadcast_interval: cfg.broadcast_interval(),
            max_frame_len: cfg.max_frame_len,
            outbound_queue: cfg.outbound_queue,
        });

        Ok(Self { cfg, listener, ctx })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn world(&self) -> &Arc<WorldState<E>> {
        &self.ctx.world
    }

    /// Live sessions. Clone it before [`SimServer::run`] consumes the server.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.ctx.registry
    }

    /// Accepts connections forever, one task per session.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "accepting connections");
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(ConnectionSession::run(stream, peer, self.ctx.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Executes an operator console command.
    pub fn exec_console(&self, line: &str) -> Vec<String> {
        console_lines(&self.ctx.world, &self.ctx.registry, line)
    }
}

/// Console output for `line`. Separate from [`SimServer`] so the binary can
/// keep answering after `run` has taken the server.
pub fn console_lines<E: PhysicsEngine>(
    world: &WorldState<E>,
    sessions: &SessionRegistry,
    line: &str,
) -> Vec<String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&command) = tokens.first() else {
        return Vec::new();
    };

    match command {
        "status" => {
            let mut out = vec![
                format!("Tick: {}", world.ticks()),
                format!("Bodies: {}", world.len()),
                format!("Sessions: {}", sessions.len()),
            ];
            for s in sessions.snapshot() {
                out.push(format!("  {:?}: peer={} state={:?}", s.id, s.peer, s.state));
            }
            out
        }
        "bodies" => world
            .bodies()
            .iter()
            .map(|body| match world.pose(body.id) {
                Ok(pose) => format!(
                    "  {} {:?} seq={} tick={} pos=({:.3}, {:.3}, {:.3})",
                    body.id,
                    body.shape,
                    body.created_at,
                    body.created_tick,
                    pose.position.x,
                    pose.position.y,
                    pose.position.z
                ),
                Err(e) => format!("  {} {:?} pose unavailable: {e}", body.id, body.shape),
            })
            .collect(),
        other => vec![format!("Unknown command: {other} (try status, bodies, quit)")],
    }
}

/// Starts the simulation clock for `world` at the configured tick rate.
pub fn start_clock<E: PhysicsEngine + 'static>(
    cfg: &ServerConfig,
    world: Arc<WorldState<E>>,
    fatal: FatalReporter,
) -> anyhow::Result<ClockHandle> {
    SimulationClock::new(world, cfg.tick_interval())
        .spawn(fatal)
        .context("spawn simulation thread")
}

/// Helper for tests: bind to an ephemeral localhost port.
pub async fn bind_ephemeral<E: PhysicsEngine + 'static>(
    cfg: ServerConfig,
    world: Arc<WorldState<E>>,
    fatal: FatalReporter,
) -> anyhow::Result<(SimServer<E>, ServerConfig)> {
    let cfg = ServerConfig {
        server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        ..cfg
    };
    let mut server = SimServer::bind(cfg, world, fatal).await?;
    server.cfg.server_addr = server.local_addr()?.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use simcast_shared::{command::CreateCylinder, math::Vec3};

    use super::*;
    use crate::{error::fatal_channel, fake::FakeEngine};

    #[tokio::test]
    async fn binds_ephemeral_port() {
        let world = Arc::new(WorldState::new(FakeEngine::default()));
        let (fatal, _rx) = fatal_channel();
        let (server, cfg) = bind_ephemeral(ServerConfig::default(), world, fatal)
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(cfg.server_addr, server.local_addr().unwrap().to_string());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let world = Arc::new(WorldState::new(FakeEngine::default()));
        let (fatal, _rx) = fatal_channel();
        let cfg = ServerConfig {
            tick_hz: 0,
            ..Default::default()
        };
        assert!(bind_ephemeral(cfg, world, fatal).await.is_err());
    }

    #[tokio::test]
    async fn console_reports_world() {
        let world = Arc::new(WorldState::new(FakeEngine::default()));
        let (fatal, _rx) = fatal_channel();
        let (server, _) = bind_ephemeral(ServerConfig::default(), world.clone(), fatal)
            .await
            .unwrap();
        CommandProcessor::new(world.clone(), &server.cfg)
            .handle_create_cylinder(&CreateCylinder {
                radius_top: 1.0,
                radius_bottom: 1.0,
                height: 2.0,
                position: Vec3::new(0.0, 0.0, 5.0),
                rotation_euler: Vec3::ZERO,
            })
            .unwrap();
        world.step().unwrap();

        let status = server.exec_console("status");
        assert_eq!(status[0], "Tick: 1");
        assert_eq!(status[1], "Bodies: 1");
        assert_eq!(status[2], "Sessions: 0");
        assert_eq!(server.session_count(), 0);

        let bodies = server.exec_console("bodies");
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("seq=0 tick=0"), "{}", bodies[0]);
        assert!(bodies[0].contains("pos=(0.000, 0.000, 5.000)"));

        assert!(server.exec_console("").is_empty());
        assert!(server.exec_console("map de_dust2")[0].starts_with("Unknown command"));
    }
}
