//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p simcast_client -- [--addr 127.0.0.1:8000]
//!
//! The client connects to the server, keeps the transform cache up to date
//! and creates bodies from the console.
//!
//! Console commands:
//!   cylinder <rt> <rb> <h> <x> <y> <z> [rx ry rz] - Create a cylinder
//!   status                                        - Show cached bodies
//!   quit                                          - Disconnect and exit

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use simcast_client::client::{ClientState, SimClient};
use simcast_shared::config::ClientConfig;
use tokio::sync::mpsc;
use tracing::info;

/// How long each loop iteration waits for broadcasts.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn parse_args() -> ClientConfig {
    let mut cfg = ClientConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(server = %cfg.server_addr, "Starting client");

    let mut client = SimClient::connect(&cfg).await.context("connect")?;

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

    println!(
        "Connected to {}. Type 'cylinder 1 1 2 0 0 5' to drop one, 'quit' to exit.",
        client.server_peer()
    );
    println!();

    loop {
        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            if matches!(line.as_str(), "quit" | "exit") {
                return client.disconnect().await;
            }
            match client.exec_console(&line).await {
                Ok(output) => {
                    for line in output {
                        println!("{line}");
                    }
                }
                Err(e) => println!("Error: {e}"),
            }
        }

        if let Err(e) = client.poll(POLL_INTERVAL).await {
            println!("Connection error: {e}");
        }

        if client.state == ClientState::Disconnected {
            println!("Disconnected from server.");
            break;
        }
    }

    Ok(())
}
