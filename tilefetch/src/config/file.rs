//! Loading the configuration file and locating the tilefetch directory.

use std::path::{Path, PathBuf};

use ini::{Ini, ParseOption};
use thiserror::Error;

use super::settings::TilefetchConfig;
use crate::error::{SourceError, TileError};

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to parse config text
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] ini::ParseError),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// A required key is absent
    #[error("Missing configuration: {section}.{key}")]
    MissingValue { section: String, key: String },

    /// The configured source could not be constructed
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The HTTP client could not be constructed
    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] TileError),
}

impl TilefetchConfig {
    /// Load configuration from the default path (~/.tilefetch/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file_opt(path, parse_option())?;
        super::parser::parse_ini(&ini)
    }

    /// Parse configuration from INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str_opt(text, parse_option())?;
        super::parser::parse_ini(&ini)
    }
}

/// Backslashes are kept verbatim: header patterns are regexes.
fn parse_option() -> ParseOption {
    ParseOption {
        enabled_escape: false,
        ..Default::default()
    }
}

/// Get the path to the tilefetch directory (~/.tilefetch).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tilefetch")
}

/// Get the path to the config file (~/.tilefetch/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

/// Get the path to the log directory (~/.tilefetch/logs).
pub fn log_directory() -> PathBuf {
    config_directory().join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_paths_share_directory() {
        let dir = config_directory();
        assert!(dir.ends_with(".tilefetch"));
        assert_eq!(config_file_path(), dir.join("config.ini"));
        assert_eq!(log_directory(), dir.join("logs"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let config = TilefetchConfig::load_from(&temp.path().join("absent.ini")).unwrap();
        assert_eq!(config, TilefetchConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.ini");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[source]\nname = Topo\nurl = https://topo.example.org").unwrap();
        drop(file);

        let config = TilefetchConfig::load_from(&path).unwrap();
        assert_eq!(config.source.name.as_deref(), Some("Topo"));
    }

    #[test]
    fn test_load_from_file_keeps_backslashes() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[no_tile_headers]\nX-Tile-Info = \\s*no-tile\\s*\n").unwrap();

        let config = TilefetchConfig::load_from(&path).unwrap();
        assert_eq!(
            config.no_tile_headers,
            vec![("X-Tile-Info".to_string(), r"\s*no-tile\s*".to_string())]
        );
    }

    #[test]
    fn test_unreadable_text_is_parse_error() {
        let err = TilefetchConfig::from_ini_str("[source\nname = x").unwrap_err();
        assert!(matches!(err, ConfigFileError::ParseError(_)));
    }
}
