//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p simcast_server -- [--config server.json] [--addr 127.0.0.1:8000]
//!       [--tick-hz 240] [--broadcast-hz 30] [--anchor fixed|free]
//!
//! The server steps a rapier world on a fixed clock, accepts framed TCP
//! clients, creates bodies on command and streams their transforms back.
//!
//! Console commands:
//!   status  - Show tick, body and session counts
//!   bodies  - List bodies with their current positions
//!   quit    - Shutdown server

use std::env;
use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use simcast_server::{
    error::fatal_channel,
    server::{console_lines, start_clock},
    RapierEngine, SimServer, WorldState,
};
use simcast_shared::config::ServerConfig;
use tokio::sync::mpsc;
use tracing::{error, info};

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            ServerConfig::from_file(path)?
        }
        None => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().context("parse --tick-hz")?;
                i += 2;
            }
            "--broadcast-hz" if i + 1 < args.len() => {
                cfg.broadcast_hz = args[i + 1].parse().context("parse --broadcast-hz")?;
                i += 2;
            }
            "--anchor" if i + 1 < args.len() => {
                cfg.anchor = args[i + 1].parse()?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    cfg.validate()?;
    info!(
        addr = %cfg.server_addr,
        tick_hz = cfg.tick_hz,
        broadcast_hz = cfg.broadcast_hz,
        anchor = ?cfg.anchor,
        "Starting server"
    );

    let world = Arc::new(WorldState::new(RapierEngine::from_config(&cfg)));
    let (fatal, mut fatal_rx) = fatal_channel();
    let clock = start_clock(&cfg, world.clone(), fatal.clone())?;

    let server = SimServer::bind(cfg, world.clone(), fatal)
        .await
        .context("create server")?;
    let local = server.local_addr()?;
    let sessions = server.sessions().clone();
    info!(%local, "Server listening");

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'bodies' to list bodies, 'quit' to exit.");
    println!();

    let accept = tokio::spawn(server.run());
    let result = loop {
        tokio::select! {
            Some(err) = fatal_rx.recv() => {
                error!(error = %err, "fatal engine error, shutting down");
                break Err(anyhow::Error::new(err));
            }
            Some(line) = console_rx.recv() => {
                if matches!(line.as_str(), "quit" | "exit") {
                    info!("Server shutting down");
                    break Ok(());
                }
                for out in console_lines(&world, &sessions, &line) {
                    println!("{out}");
                }
            }
        }
    };

    accept.abort();
    clock.stop();
    result
}
