mod db;
mod ipc;
mod placement;
mod repo;
mod settings;
mod sheet;
mod upload;

use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();
    info!(version = env!("CARGO_PKG_VERSION"), "classhubd started");

    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stdin closed with error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                warn!(error = %e, "unparseable request line");
                ipc::bad_json(e.to_string())
            }
        };

        // A closed stdout means the host is gone; nothing left to serve.
        if writeln!(stdout, "{}", resp).and_then(|_| stdout.flush()).is_err() {
            break;
        }
    }
    info!("classhubd stopped");
}

// stdout carries the IPC stream, so logs go to stderr.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
