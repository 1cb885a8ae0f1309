//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use tilefetch::config::ConfigFileError;
use tilefetch::TileError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(ConfigFileError),
    /// Invalid command-line input
    InvalidArgument(String),
    /// A tile could not be fetched
    Tile { tile: String, message: String },
    /// Addressing error raised before any fetch
    Address(TileError),
    /// Failed to write output file
    FileWrite { path: String, error: std::io::Error },
    /// Gave up waiting for outstanding tiles
    Timeout(usize),
    /// Stopped by Ctrl+C
    Interrupted,
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Config(ConfigFileError::MissingValue { .. }) = self {
            eprintln!();
            eprintln!("Create {} with a [source] section, e.g.:", tilefetch::config::config_file_path().display());
            eprintln!("  [source]");
            eprintln!("  name = OpenStreetMap");
            eprintln!("  url = https://tile.openstreetmap.org");
        }

        process::exit(self.exit_code())
    }

    /// 130 for Ctrl+C, 2 for bad input, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Interrupted => 130,
            CliError::InvalidArgument(_) | CliError::Address(_) => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Tile { tile, message } => write!(f, "Failed to fetch tile {}: {}", tile, message),
            CliError::Address(e) => write!(f, "Invalid tile: {}", e),
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path, error)
            }
            CliError::Timeout(pending) => {
                write!(f, "Timed out with {} tile(s) still loading", pending)
            }
            CliError::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Address(e) => Some(e),
            CliError::FileWrite { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<TileError> for CliError {
    fn from(e: TileError) -> Self {
        CliError::Address(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Interrupted.exit_code(), 130);
        assert_eq!(CliError::InvalidArgument("x".into()).exit_code(), 2);
        assert_eq!(CliError::Timeout(3).exit_code(), 1);
    }

    #[test]
    fn test_tile_error_display() {
        let err = CliError::Tile {
            tile: "osm/1/0/0".into(),
            message: "No tile at this zoom level".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to fetch tile osm/1/0/0: No tile at this zoom level"
        );
    }

    #[test]
    fn test_address_error_has_source() {
        let err = CliError::from(TileError::OutOfRange { x: 9, y: 0, zoom: 2 });
        assert!(std::error::Error::source(&err).is_some());
    }
}
