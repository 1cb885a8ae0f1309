//! Tile store contract and the in-memory implementation.
//!
//! The controller only needs three operations from a store: look up a tile
//! by identity, register a new tile, and find an ancestor image to show while
//! a tile loads. Eviction policy and persistence are left to implementations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::coord::TileAddress;
use crate::tile::{Placeholder, Tile, TileKey};

/// Number of zoom levels searched upwards for a placeholder.
pub const MAX_PLACEHOLDER_DEPTH: u8 = 5;

/// Key-value contract between the controller and a tile cache.
///
/// Implementations must be safe to share between the caller's thread and the
/// dispatcher workers, and must not evict a tile while a job is loading it.
pub trait TileStore: Send + Sync {
    /// Look up the tile of `source_id` at the given address.
    fn get(&self, source_id: &str, x: u32, y: u32, zoom: u8) -> Option<Arc<Tile>>;

    /// Register a tile, replacing any tile with the same key.
    fn put(&self, tile: Arc<Tile>);

    /// Closest loaded ancestor image for `tile`, if one is cached.
    fn find_placeholder(&self, tile: &Tile) -> Option<Placeholder>;
}

/// Hit/miss counters of a [`MemoryTileStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Unbounded concurrent tile store.
///
/// Tiles are kept until removed or cleared; tiles that are loading are never
/// dropped by [`clear`](MemoryTileStore::clear).
#[derive(Debug, Default)]
pub struct MemoryTileStore {
    tiles: DashMap<TileKey, Arc<Tile>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Remove a tile unless a job is loading it.
    pub fn remove(&self, key: &TileKey) -> Option<Arc<Tile>> {
        self.tiles
            .remove_if(key, |_, tile| !tile.is_loading())
            .map(|(_, tile)| tile)
    }

    /// Drop every tile that is not loading. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let before = self.tiles.len();
        self.tiles.retain(|_, tile| tile.is_loading());
        let removed = before.saturating_sub(self.tiles.len());
        debug!(removed, "Cleared tile store");
        removed
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.tiles.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn loaded_image(&self, source_id: &str, address: TileAddress) -> Option<Placeholder> {
        let key = TileKey::new(source_id, address);
        let tile = self.tiles.get(&key)?;
        if !tile.is_loaded() {
            return None;
        }
        tile.payload().map(|data| Placeholder { address, data })
    }
}

impl TileStore for MemoryTileStore {
    fn get(&self, source_id: &str, x: u32, y: u32, zoom: u8) -> Option<Arc<Tile>> {
        let address = TileAddress::new(x as i64, y as i64, zoom).ok()?;
        let key = TileKey::new(source_id, address);
        match self.tiles.get(&key) {
            Some(tile) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(tile.value()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put(&self, tile: Arc<Tile>) {
        debug!(tile = %tile.key(), "Storing tile");
        self.tiles.insert(tile.key().clone(), tile);
    }

    fn find_placeholder(&self, tile: &Tile) -> Option<Placeholder> {
        let address = tile.address();
        let lowest = address.zoom().saturating_sub(MAX_PLACEHOLDER_DEPTH);
        (lowest..address.zoom())
            .rev()
            .filter_map(|zoom| address.ancestor(zoom))
            .find_map(|ancestor| self.loaded_image(tile.source_id(), ancestor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn loaded(source: &str, x: i64, y: i64, zoom: u8, data: &'static [u8]) -> Arc<Tile> {
        let tile = Arc::new(Tile::new(source, TileAddress::new(x, y, zoom).unwrap()));
        assert!(tile.init_loading());
        tile.load_image(Bytes::from_static(data));
        tile.finish_loading();
        tile
    }

    #[test]
    fn test_get_and_put() {
        let store = MemoryTileStore::new();
        assert!(store.get("osm", 1, 1, 1).is_none());

        store.put(loaded("osm", 1, 1, 1, b"a"));
        let tile = store.get("osm", 1, 1, 1).unwrap();
        assert_eq!(tile.payload().unwrap(), Bytes::from_static(b"a"));
        assert!(store.get("other", 1, 1, 1).is_none());

        let stats = store.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_get_out_of_range_is_miss() {
        let store = MemoryTileStore::new();
        assert!(store.get("osm", 4, 0, 2).is_none());
    }

    #[test]
    fn test_placeholder_prefers_closest_ancestor() {
        let store = MemoryTileStore::new();
        store.put(loaded("osm", 0, 0, 1, b"z1"));
        store.put(loaded("osm", 1, 1, 3, b"z3"));

        let tile = Tile::new("osm", TileAddress::new(2, 3, 4).unwrap());
        let placeholder = store.find_placeholder(&tile).unwrap();
        assert_eq!(placeholder.address, TileAddress::new(1, 1, 3).unwrap());
        assert_eq!(placeholder.data, Bytes::from_static(b"z3"));
    }

    #[test]
    fn test_placeholder_skips_unloaded_ancestors() {
        let store = MemoryTileStore::new();
        store.put(Arc::new(Tile::new("osm", TileAddress::new(1, 1, 3).unwrap())));
        store.put(loaded("osm", 0, 0, 2, b"z2"));

        let tile = Tile::new("osm", TileAddress::new(2, 3, 4).unwrap());
        let placeholder = store.find_placeholder(&tile).unwrap();
        assert_eq!(placeholder.address.zoom(), 2);
    }

    #[test]
    fn test_placeholder_depth_is_bounded() {
        let store = MemoryTileStore::new();
        store.put(loaded("osm", 0, 0, 0, b"root"));

        let near = Tile::new("osm", TileAddress::new(0, 0, 5).unwrap());
        assert!(store.find_placeholder(&near).is_some());

        let far = Tile::new("osm", TileAddress::new(0, 0, 6).unwrap());
        assert!(store.find_placeholder(&far).is_none());
    }

    #[test]
    fn test_placeholder_ignores_other_sources() {
        let store = MemoryTileStore::new();
        store.put(loaded("other", 0, 0, 0, b"root"));
        let tile = Tile::new("osm", TileAddress::new(1, 1, 1).unwrap());
        assert!(store.find_placeholder(&tile).is_none());
    }

    #[test]
    fn test_clear_keeps_loading_tiles() {
        let store = MemoryTileStore::new();
        let busy = Arc::new(Tile::new("osm", TileAddress::new(0, 0, 1).unwrap()));
        assert!(busy.init_loading());
        store.put(Arc::clone(&busy));
        store.put(loaded("osm", 1, 0, 1, b"x"));

        assert_eq!(store.clear(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.remove(busy.key()).is_none());

        busy.set_error("stop");
        busy.finish_loading();
        assert!(store.remove(busy.key()).is_some());
        assert!(store.is_empty());
    }
}
