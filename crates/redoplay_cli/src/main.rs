//! playredo
//!
//! Command-line redo log player.
//!
//! # Commands
//!
//! - `play` - Replay committed operations from redo log segments
//! - `inspect` - List the segments a replay would read
//! - `dump` - Print the records of one segment for debugging

mod commands;
mod selection;
mod time;

use clap::{Parser, Subcommand};
use commands::play::PlayArgs;
use selection::SelectionArgs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Redo log replay tools.
#[derive(Parser)]
#[command(name = "playredo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay committed operations
    Play(PlayArgs),

    /// List the segments a replay would read
    Inspect {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the records of one segment
    Dump {
        /// Segment file
        path: PathBuf,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match execute(cli.command) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            tracing::error!(error = %e, "playredo failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Commands) -> Result<i32, Box<dyn std::error::Error>> {
    match command {
        Commands::Play(args) => commands::play::run(&args),
        Commands::Inspect { selection, format } => {
            commands::inspect::run(&selection, &format)?;
            Ok(0)
        }
        Commands::Dump {
            path,
            limit,
            format,
        } => {
            commands::dump::run(&path, limit, &format)?;
            Ok(0)
        }
        Commands::Version => {
            println!("playredo v{}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}
