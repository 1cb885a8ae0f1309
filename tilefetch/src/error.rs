//! Error types shared across the tile core.
//!
//! [`TileError`] covers everything that can go wrong while addressing or
//! fetching a single tile. Failures inside a job never escape it: they are
//! converted into the tile's error state and reported to the listener.
//!
//! [`SourceError`] covers construction-time failures of a tile source
//! (invalid header patterns, archives that cannot be opened).

use thiserror::Error;

/// Message stored on a tile when the backend reports there is no content.
pub const NO_TILE_MESSAGE: &str = "No tile at this zoom level";

/// Errors raised while addressing or loading a tile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
    /// Tile coordinates outside `[0, 2^zoom)` or zoom beyond the supported range.
    #[error("tile ({x}, {y}) is outside the grid at zoom {zoom}")]
    OutOfRange { x: i64, y: i64, zoom: u8 },

    /// The backend explicitly reported that no tile exists at this address.
    #[error("No tile at this zoom level")]
    NoTileAtZoom,

    /// Connection, status or read failure. Retryable by the caller.
    #[error("{0}")]
    Transport(String),

    /// The backend itself cannot be used (e.g. archive failed to open).
    #[error("tile backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A response detail could not be understood.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The archive has no entry for the requested address.
    #[error("Tile source does not contain tile for {zoom}/{x}/{y}")]
    NotInArchive { zoom: u8, x: u32, y: u32 },
}

impl TileError {
    /// Returns true if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Errors raised while constructing a tile source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A configured no-tile header pattern is not a valid regular expression.
    #[error("invalid no-tile pattern for header {header}: {source}")]
    InvalidPattern {
        header: String,
        #[source]
        source: regex::Error,
    },

    /// The tile archive could not be opened or queried.
    #[error("failed to open tile archive {path}: {reason}")]
    Archive { path: String, reason: String },

    /// The source was configured with a missing or unusable value.
    #[error("invalid source configuration: {0}")]
    InvalidConfig(String),
}
