//! Fetch a single tile and write it to disk.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use tracing::info;

use tilefetch::tile::Tile;

use crate::error::CliError;
use crate::runner::{write_file, CliRunner, Finished};

/// Arguments for the tile command.
#[derive(Debug, Args)]
pub struct TileArgs {
    /// Zoom level
    #[arg(long)]
    pub zoom: u8,

    /// Tile column
    #[arg(long, allow_hyphen_values = true)]
    pub x: i64,

    /// Tile row (XYZ, north at 0)
    #[arg(long, allow_hyphen_values = true)]
    pub y: i64,

    /// Output file path
    #[arg(long)]
    pub output: PathBuf,

    /// Bypass caches between here and the tile server
    #[arg(long)]
    pub force: bool,

    /// Seconds to wait for the tile
    #[arg(long, default_value = "60")]
    pub timeout: u64,
}

/// Run the tile command.
pub fn run(runner: &CliRunner, args: TileArgs) -> Result<(), CliError> {
    runner.log_startup("tile");
    let (controller, dispatcher, finished) = runner.controller()?;

    let tile = if args.force {
        controller.reload_tile(args.x, args.y, args.zoom)?
    } else {
        controller.get_tile(args.x, args.y, args.zoom)?
    };
    println!("Fetching {}", tile.key());

    let success = wait_for(&tile, &finished, Duration::from_secs(args.timeout))?;
    dispatcher.shutdown();

    if !success {
        return Err(CliError::Tile {
            tile: tile.key().to_string(),
            message: tile.error().unwrap_or_else(|| "unknown error".to_string()),
        });
    }

    let data = tile.payload().ok_or_else(|| CliError::Tile {
        tile: tile.key().to_string(),
        message: "tile has no payload".to_string(),
    })?;
    write_file(&args.output, &data)?;

    info!(tile = %tile.key(), bytes = data.len(), "Tile written");
    println!("Wrote {} bytes to {}", data.len(), args.output.display());
    if let Some(expires) = tile.expires() {
        println!("Expires at {} (epoch ms)", expires);
    }
    Ok(())
}

/// Block until the listener reports `tile`, or the timeout passes.
fn wait_for(tile: &Arc<Tile>, finished: &Receiver<Finished>, timeout: Duration) -> Result<bool, CliError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match finished.recv_timeout(remaining) {
            Ok((done, success)) if Arc::ptr_eq(&done, tile) => return Ok(success),
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                return Err(CliError::Timeout(1))
            }
        }
    }
}
