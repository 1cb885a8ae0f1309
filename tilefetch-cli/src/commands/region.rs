//! Fetch every tile covering a bounding box.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use tilefetch::coord::Coordinate;
use tilefetch::source::TileSource;
use tilefetch::tile::Tile;

use crate::error::CliError;
use crate::runner::{tile_extension, write_file, CliRunner};

const POLL: Duration = Duration::from_millis(100);

/// Arguments for the region command.
#[derive(Debug, Args)]
pub struct RegionArgs {
    /// Zoom level (clamped to the source's range)
    #[arg(long)]
    pub zoom: u8,

    /// Northern latitude of the box
    #[arg(long, allow_hyphen_values = true)]
    pub north: f64,

    /// Western longitude of the box
    #[arg(long, allow_hyphen_values = true)]
    pub west: f64,

    /// Southern latitude of the box
    #[arg(long, allow_hyphen_values = true)]
    pub south: f64,

    /// Eastern longitude of the box
    #[arg(long, allow_hyphen_values = true)]
    pub east: f64,

    /// Directory tiles are written to as z/x/y.ext
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Refuse regions with more tiles than this
    #[arg(long, default_value = "10000")]
    pub max_tiles: u64,

    /// Seconds to wait after the last finished tile
    #[arg(long, default_value = "120")]
    pub idle_timeout: u64,
}

/// Counts reported at the end of a region run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Summary {
    written: usize,
    failed: usize,
    cancelled: usize,
}

impl Summary {
    fn total(&self) -> usize {
        self.written + self.failed + self.cancelled
    }

    /// Write a finished tile, or count it as failed, and advance the bar.
    fn record(
        &mut self,
        dir: &Path,
        tile: &Tile,
        success: bool,
        extension: &str,
        bar: &ProgressBar,
    ) -> Result<(), CliError> {
        bar.inc(1);
        match tile.payload().filter(|_| success) {
            Some(data) => {
                write_file(&tile_path(dir, tile, extension), &data)?;
                self.written += 1;
            }
            None => {
                warn!(tile = %tile.key(), error = ?tile.error(), "Tile failed");
                self.failed += 1;
            }
        }
        Ok(())
    }
}

/// Run the region command.
pub fn run(runner: &CliRunner, args: RegionArgs) -> Result<(), CliError> {
    runner.log_startup("region");
    validate(&args)?;

    let (controller, dispatcher, finished) = runner.controller()?;
    let source = controller.tile_source();
    let extension = tile_extension(&source);

    let range = controller.tiles_in_view(
        Coordinate::new(args.north, args.west),
        Coordinate::new(args.south, args.east),
        args.zoom,
    );
    if range.size() > args.max_tiles {
        return Err(CliError::InvalidArgument(format!(
            "region needs {} tiles at zoom {}, more than --max-tiles {}",
            range.size(),
            range.zoom(),
            args.max_tiles
        )));
    }

    println!(
        "Fetching {} tiles at zoom {} from {}",
        range.size(),
        range.zoom(),
        source.name()
    );
    info!(tiles = range.size(), zoom = range.zoom(), source = source.id(), "Region fetch started");

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CliError::InvalidArgument(format!("Failed to set signal handler: {}", e)))?;

    let bar = progress_bar(range.size());
    let mut summary = Summary::default();
    let mut expected = 0usize;

    for address in range {
        let tile = controller.get_tile(address.x() as i64, address.y() as i64, address.zoom())?;
        if tile.is_loaded() {
            summary.record(&args.output_dir, &tile, true, &extension, &bar)?;
        } else {
            expected += 1;
        }
    }

    let mut last_progress = Instant::now();
    let idle_timeout = Duration::from_secs(args.idle_timeout);
    while summary.total() < range.size() as usize {
        if interrupted.swap(false, Ordering::SeqCst) {
            bar.println("Interrupted, cancelling queued tiles...");
            let cancelled = controller.cancel_outstanding_jobs();
            summary.cancelled += cancelled;
            bar.inc(cancelled as u64);
        }

        match finished.recv_timeout(POLL) {
            Ok((tile, success)) => {
                summary.record(&args.output_dir, &tile, success, &extension, &bar)?;
                last_progress = Instant::now();
            }
            Err(RecvTimeoutError::Timeout) => {
                if summary.cancelled > 0 && !dispatcher.has_outstanding_tasks() {
                    break;
                }
                if last_progress.elapsed() > idle_timeout {
                    bar.abandon();
                    dispatcher.shutdown();
                    let pending = (range.size() as usize).saturating_sub(summary.total());
                    return Err(CliError::Timeout(pending.min(expected)));
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Jobs that finished between the last poll and the idle check.
    for (tile, success) in finished.try_iter() {
        summary.record(&args.output_dir, &tile, success, &extension, &bar)?;
    }

    bar.finish_and_clear();
    dispatcher.shutdown();

    println!(
        "Done: {} written, {} failed, {} cancelled",
        summary.written, summary.failed, summary.cancelled
    );
    info!(
        written = summary.written,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "Region fetch finished"
    );

    if summary.cancelled > 0 {
        return Err(CliError::Interrupted);
    }
    Ok(())
}

fn validate(args: &RegionArgs) -> Result<(), CliError> {
    if args.north < args.south {
        return Err(CliError::InvalidArgument(format!(
            "north ({}) is below south ({})",
            args.north, args.south
        )));
    }
    if args.west > args.east {
        return Err(CliError::InvalidArgument(format!(
            "west ({}) is east of east ({})",
            args.west, args.east
        )));
    }
    Ok(())
}

fn progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template(
        "{wide_bar:0.white/dim.white} {pos:>7}/{len:7} {per_sec:>12} {elapsed_precise} {eta_precise}",
    ) {
        bar.set_style(style.progress_chars("██▁"));
    }
    bar
}

/// Path a tile is written to below `dir`.
fn tile_path(dir: &Path, tile: &Tile, extension: &str) -> PathBuf {
    dir.join(tile.zoom().to_string())
        .join(tile.x().to_string())
        .join(format!("{}.{}", tile.y(), extension))
}
