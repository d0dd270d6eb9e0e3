//! pixmatchd: the near-duplicate image detection daemon.
//!
//! Two positional arguments: the store path and the TCP port to listen on.
//! Exits 0 after a clean `quit`, non-zero on startup failure.

use std::process::ExitCode;

use pixmatch_error::Result;
use pixmatch_server::Server;
use pixmatch_store::SqliteStore;
use pixmatch_types::Tunables;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn usage() {
    eprintln!();
    eprintln!("Usage: pixmatchd <store.db> <port>");
    eprintln!();
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("ERROR: Not enough arguments");
        usage();
        return ExitCode::FAILURE;
    }
    let store_path = &args[1];
    let port = match args[2].parse::<u16>() {
        Ok(port) if port != 0 => port,
        _ => {
            eprintln!("ERROR: Invalid port");
            usage();
            return ExitCode::FAILURE;
        }
    };

    match serve(store_path, port) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("startup failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn serve(store_path: &str, port: u16) -> Result<()> {
    let cpu_count = std::thread::available_parallelism().map_or(2, |n| n.get());
    let store = SqliteStore::open(store_path)?;
    let mut server = Server::bind(store, Tunables::default(), cpu_count, port)?;
    server.run()
}
