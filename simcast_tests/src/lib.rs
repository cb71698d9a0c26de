//! Shared harness for the integration tests: a full server stack (world,
//! clock, accept loop) on an ephemeral localhost port.

use std::sync::Arc;

use simcast_client::SimClient;
use simcast_server::{
    clock::ClockHandle,
    error::{fatal_channel, EngineFatalError},
    server::{bind_ephemeral, start_clock},
    session::SessionRegistry,
    WorldState,
};
use simcast_shared::{
    config::{ClientConfig, ServerConfig},
    physics::PhysicsEngine,
};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Running server. Dropping it stops the clock and the accept loop.
pub struct TestStack<E: PhysicsEngine + 'static> {
    pub world: Arc<WorldState<E>>,
    pub cfg: ServerConfig,
    pub sessions: SessionRegistry,
    pub fatal_rx: mpsc::UnboundedReceiver<EngineFatalError>,
    clock: Option<ClockHandle>,
    accept: JoinHandle<anyhow::Result<()>>,
}

impl<E: PhysicsEngine + 'static> TestStack<E> {
    pub async fn start(engine: E, cfg: ServerConfig) -> anyhow::Result<Self> {
        init_tracing();
        let world = Arc::new(WorldState::new(engine));
        let (fatal, fatal_rx) = fatal_channel();

        let (server, cfg) = bind_ephemeral(cfg, world.clone(), fatal.clone()).await?;
        let sessions = server.sessions().clone();
        let clock = start_clock(&cfg, world.clone(), fatal)?;
        let accept = tokio::spawn(server.run());

        Ok(Self {
            world,
            cfg,
            sessions,
            fatal_rx,
            clock: Some(clock),
            accept,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_addr: self.cfg.server_addr.clone(),
            max_frame_len: self.cfg.max_frame_len,
            ..ClientConfig::default()
        }
    }

    pub async fn connect(&self) -> anyhow::Result<SimClient> {
        SimClient::connect(&self.client_config()).await
    }

    /// Plain socket, for talking to the server below the client library.
    pub async fn connect_raw(&self) -> anyhow::Result<TcpStream> {
        Ok(TcpStream::connect(&self.cfg.server_addr).await?)
    }

    pub fn clock_running(&self) -> bool {
        self.clock.as_ref().is_some_and(ClockHandle::is_running)
    }

    /// Waits until the registry holds exactly `n` sessions.
    pub async fn wait_for_sessions(&self, n: usize) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while self.sessions.len() != n {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("expected {n} sessions, have {}", self.sessions.len());
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        Ok(())
    }
}

impl<E: PhysicsEngine + 'static> Drop for TestStack<E> {
    fn drop(&mut self) {
        self.accept.abort();
        if let Some(clock) = self.clock.take() {
            clock.stop();
        }
    }
}
