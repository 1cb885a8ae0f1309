//! tilefetch CLI - Command-line interface
//!
//! Fetches map tiles from the source configured in ~/.tilefetch/config.ini
//! (or `--config`) and writes them to disk.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::region::RegionArgs;
use commands::tile::TileArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "tilefetch")]
#[command(version, about = "Resolve and fetch map tiles", long_about = None)]
struct Cli {
    /// Config file (default: ~/.tilefetch/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a single tile
    Tile(TileArgs),

    /// Fetch every tile covering a bounding box
    Region(RegionArgs),

    /// Describe the configured tile source
    Info,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let runner = CliRunner::new(cli.config, cli.debug)?;
    match cli.command {
        Commands::Tile(args) => commands::tile::run(&runner, args),
        Commands::Region(args) => commands::region::run(&runner, args),
        Commands::Info => commands::info::run(&runner),
    }
}
