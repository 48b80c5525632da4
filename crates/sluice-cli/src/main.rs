mod fingerprint;
mod format;
mod progress;
mod retry;
mod speed;
mod splitter;
mod upload;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::progress::UploadProgressRenderer;
use crate::upload::{UploadClient, UploadError, UploadMode, UploadRequest};

#[derive(Parser)]
#[command(
    name = "sluice",
    version,
    about = "Chunked upload client for the sluice ingest server",
    after_help = "\
Environment variables:
  SLUICE_SERVER   Server base URL (overridden by --server)
  SLUICE_TOKEN    Bearer token (overridden by --token)"
)]
struct Cli {
    /// Server base URL
    #[arg(
        long,
        env = "SLUICE_SERVER",
        default_value = "http://127.0.0.1:8686",
        global = true
    )]
    server: String,

    /// Bearer token for authentication
    #[arg(long, env = "SLUICE_TOKEN", default_value = "", global = true)]
    token: String,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file to the server
    Upload {
        /// Local file to upload
        file: PathBuf,

        /// Destination path on the server (e.g. /videos/raw.mkv)
        dest: String,

        /// Never replace an existing object
        #[arg(long)]
        no_overwrite: bool,

        /// Upload engine selection
        #[arg(long, value_enum, default_value = "auto")]
        mode: UploadMode,

        /// Chunk size override (e.g. "16M"; default comes from the server)
        #[arg(long, value_parser = format::parse_size)]
        chunk_size: Option<u64>,

        /// Suppress the progress line
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show the status of a background finalize task
    Task {
        /// Task id returned by an async merge
        id: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), UploadError> {
    let client = UploadClient::new(&cli.server, &cli.token);

    match cli.command {
        Commands::Upload {
            file,
            dest,
            no_overwrite,
            mode,
            chunk_size,
            quiet,
        } => {
            let request = UploadRequest {
                file,
                dest,
                overwrite: !no_overwrite,
                mode,
                chunk_size,
            };

            let mut renderer = UploadProgressRenderer::new(quiet);
            {
                let mut observer = |event| renderer.on_event(event);
                client.upload(&request, Some(&mut observer))?;
            }
            renderer.finish();
            info!("upload complete");
        }
        Commands::Task { id } => {
            let task = client.task_status(&id)?;
            println!("{}: {} ({})", task.id, task.status, task.message);
        }
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
