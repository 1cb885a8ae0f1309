//! CLI runner for common setup and operations.
//!
//! Encapsulates logging initialization, config loading, controller creation
//! and file output to reduce duplication across command handlers.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};

use tracing::info;

use tilefetch::config::{config_file_path, log_directory, TilefetchConfig};
use tilefetch::controller::TileController;
use tilefetch::dispatcher::JobDispatcher;
use tilefetch::logging::{init_logging, LoggingGuard, DEFAULT_LOG_FILE};
use tilefetch::source::{Source, TileSource, UNKNOWN};
use tilefetch::store::MemoryTileStore;
use tilefetch::tile::Tile;

use crate::error::CliError;

/// A finished tile job as reported by the controller's listener.
pub type Finished = (Arc<Tile>, bool);

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    config: TilefetchConfig,
    config_path: PathBuf,
}

impl CliRunner {
    /// Load the configuration and initialize logging.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Config file to use instead of ~/.tilefetch/config.ini
    /// * `debug` - Log at debug level unless RUST_LOG says otherwise
    pub fn new(config_path: Option<PathBuf>, debug: bool) -> Result<Self, CliError> {
        let level = if debug { "debug" } else { "info" };
        let logging_guard = init_logging(&log_directory(), DEFAULT_LOG_FILE, false, level)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        let config_path = config_path.unwrap_or_else(config_file_path);
        let config = TilefetchConfig::load_from(&config_path)?;

        Ok(Self {
            logging_guard,
            config,
            config_path,
        })
    }

    pub fn config(&self) -> &TilefetchConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("tilefetch v{}", env!("CARGO_PKG_VERSION"));
        info!(config = %self.config_path.display(), "tilefetch CLI: {} command", command);
    }

    pub fn source(&self) -> Result<Source, CliError> {
        Ok(self.config.build_source()?)
    }

    /// Build a controller for the configured source.
    ///
    /// Every finished job is forwarded to the returned receiver.
    pub fn controller(&self) -> Result<(TileController, JobDispatcher, Receiver<Finished>), CliError> {
        let source = self.source()?;
        let dispatcher = self.config.dispatcher();
        let context = self.config.loader_context(dispatcher.clone())?;

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let listener = Arc::new(move |tile: &Arc<Tile>, success: bool| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send((Arc::clone(tile), success));
            }
        });

        let controller =
            TileController::new(source, Arc::new(MemoryTileStore::new()), listener, context);
        Ok((controller, dispatcher, rx))
    }
}

/// File extension to use for tiles of `source`.
pub fn tile_extension(source: &Source) -> String {
    let ext = source.extension();
    if ext == UNKNOWN || ext.is_empty() {
        "bin".to_string()
    } else {
        ext.to_string()
    }
}

/// Write `data` to `path`, creating parent directories.
pub fn write_file(path: &Path, data: &[u8]) -> Result<(), CliError> {
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)
    };
    write().map_err(|error| CliError::FileWrite {
        path: path.display().to_string(),
        error,
    })
}
