mod config;
mod driver;
mod error;
mod handlers;
mod pipe;
mod response;
mod session;
mod state;
mod tasks;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerSection;
use crate::driver::LocalDriver;
use crate::session::{STREAM_SESSION_TIMEOUT, SWEEP_INTERVAL};
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "sluice-server", version, about = "chunk-ingest upload server")]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8686")]
    listen: String,

    /// Root directory of the local backing store
    #[arg(short, long, default_value = "/var/lib/sluice/data")]
    data_dir: String,

    /// Directory for per-upload chunk staging areas
    #[arg(short, long, default_value = "/var/lib/sluice/temp")]
    temp_dir: String,

    /// Virtual root all request paths are jailed under
    #[arg(long, default_value = "/")]
    base_path: String,

    /// Log output format: "json" or "pretty"
    #[arg(long, default_value = "pretty")]
    log_format: String,

    /// Chunk size advertised for disk-staged uploads (MiB)
    #[arg(long, default_value_t = 95)]
    chunked_upload_chunk_size: u64,

    /// Chunk size advertised for pipe-streamed uploads (MiB)
    #[arg(long, default_value_t = 95)]
    stream_upload_chunk_size: u64,

    /// Reject uploads of OS metadata files (.DS_Store and friends)
    #[arg(long, default_value_t = false)]
    ignore_system_files: bool,

    /// Maximum number of blocking threads for file I/O (minimum 1)
    #[arg(long, default_value_t = 6, value_parser = parse_blocking_threads)]
    max_blocking_threads: usize,
}

fn parse_blocking_threads(s: &str) -> Result<usize, String> {
    let n: usize = s.parse().map_err(|e| format!("{e}"))?;
    if n == 0 {
        return Err("value must be at least 1".into());
    }
    Ok(n)
}

fn main() {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(cli.max_blocking_threads)
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Error: failed to build tokio runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(async_main(cli));
}

async fn async_main(cli: Cli) {
    // Read token from environment
    let token = std::env::var("SLUICE_TOKEN").unwrap_or_default();
    if token.is_empty() {
        eprintln!("Error: SLUICE_TOKEN environment variable must be set");
        std::process::exit(1);
    }

    let config = ServerSection {
        listen: cli.listen,
        data_dir: cli.data_dir,
        temp_dir: cli.temp_dir,
        token,
        base_path: cli.base_path,
        log_format: cli.log_format,
        chunked_upload_chunk_size: cli.chunked_upload_chunk_size,
        stream_upload_chunk_size: cli.stream_upload_chunk_size,
        ignore_system_files: cli.ignore_system_files,
    };

    // Initialize tracing
    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt().json().init();
        }
        _ => {
            tracing_subscriber::fmt().init();
        }
    }

    // Ensure working directories exist
    for dir in [&config.data_dir, &config.temp_dir] {
        std::fs::create_dir_all(dir).unwrap_or_else(|e| {
            eprintln!("Error: cannot create directory '{dir}': {e}");
            std::process::exit(1);
        });
    }

    let listen_addr = config.listen.clone();
    let driver = Arc::new(LocalDriver::new(&config.data_dir));
    let state = AppState::new(config, driver);

    // Spawn the stream-session sweeper
    let sweeper_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let evicted = sweeper_state.inner.sessions.sweep(STREAM_SESSION_TIMEOUT);
            if evicted > 0 {
                info!(evicted, "swept idle stream upload sessions");
            }
        }
    });

    let app = handlers::router(state);

    info!("sluice-server listening on {listen_addr}");
    let listener = TcpListener::bind(&listen_addr).await.unwrap_or_else(|e| {
        eprintln!("Error: cannot bind to {listen_addr}: {e}");
        std::process::exit(1);
    });
    axum::serve(listener, app).await.unwrap();
}
