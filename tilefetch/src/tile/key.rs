//! Tile identity and state types.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::coord::TileAddress;

/// Stable identity of a tile: the source it belongs to plus its address.
///
/// # Example
///
/// ```
/// use tilefetch::coord::TileAddress;
/// use tilefetch::tile::TileKey;
///
/// let key = TileKey::new("osm", TileAddress::new(3, 5, 4).unwrap());
/// assert_eq!(key.to_string(), "osm/4/3/5");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    source_id: Arc<str>,
    address: TileAddress,
}

impl TileKey {
    /// Create a key for `address` within the source identified by `source_id`.
    pub fn new(source_id: impl Into<Arc<str>>, address: TileAddress) -> Self {
        Self {
            source_id: source_id.into(),
            address,
        }
    }

    /// Identifier of the owning source.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Tile address.
    pub fn address(&self) -> TileAddress {
        self.address
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_id, self.address)
    }
}

/// Loading state of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileState {
    /// Never attempted, or reset for a reload.
    #[default]
    Empty,
    /// A job holds the exclusive claim.
    Loading,
    /// Payload present.
    Loaded,
    /// Last attempt failed; the message is kept on the tile.
    Error,
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// An ancestor's image shown in place of a tile that has no payload yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Address of the ancestor the image was taken from.
    pub address: TileAddress,
    /// The ancestor's payload.
    pub data: Bytes,
}
