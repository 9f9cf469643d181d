//! # Snapnet Server
//!
//! Runs the lobby game on a UDP port.
//!
//! ## Usage
//!
//! ```bash
//! snapnet_server --config server.toml
//! ```
//!
//! Lines typed on stdin are executed as console commands.

use crossbeam_channel::unbounded;
use snapnet_networking::{LobbyGame, Server, ServerConfig};
use std::io::BufRead;
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<String> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Usage: snapnet_server [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>    TOML configuration (default: built-in defaults)");
                println!("  -h, --help             Show this help");
                return ExitCode::SUCCESS;
            }
            _ => {}
        }
        i += 1;
    }

    let config = match config_path {
        Some(path) => match ServerConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!("failed to load {path}: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => ServerConfig::default(),
    };

    let (tx, rx) = unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut server = match Server::bind(config, LobbyGame::new()) {
        Ok(server) => server.with_console(rx),
        Err(err) => {
            tracing::error!("failed to start server: {err}");
            return ExitCode::FAILURE;
        }
    };
    server.run();
    ExitCode::SUCCESS
}
