//! Tile source abstraction
//!
//! A tile source is the per-backend policy: identity, zoom bounds, tile
//! size, tile addressing, attribution and the rules for interpreting backend
//! responses. It also acts as the factory for the matching loader.
//!
//! Two sources are provided and wrapped in the closed [`Source`] enum:
//!
//! - [`MapServiceSource`]: HTTP tile servers addressed by URL template
//! - [`MbTilesSource`]: local MBTiles archives
//!
//! # Example
//!
//! ```
//! use tilefetch::source::{MapServiceInfo, MapServiceSource, Source, TileSource};
//!
//! let info = MapServiceInfo::new("OSM", "https://tile.openstreetmap.org").with_max_zoom(19);
//! let source = Source::from(MapServiceSource::new(info).unwrap());
//! assert_eq!(source.max_zoom(), 19);
//! assert_eq!(source.server_crs(), "EPSG:3857");
//! ```

mod attribution;
mod map_service;
mod mbtiles;
mod rules;

pub use attribution::{Attribution, DEFAULT_TERMS_TEXT};
pub use map_service::{MapServiceInfo, MapServiceSource, DEFAULT_EXTENSION, DEFAULT_PATH};
pub use mbtiles::{MbTilesSource, UNKNOWN};
pub use rules::{
    ChecksumAlgorithm, MetadataRules, NoTileRules, CAPTURE_DATE_KEY, DEFAULT_METADATA_HEADERS,
    DEFAULT_NO_TILE_STATUS, NO_TILE_VALUE, TILE_INFO_KEY,
};

use std::sync::Arc;

use crate::coord::{
    Coordinate, Mercator, PixelXY, TileAddress, TileRange, TileXY, DEFAULT_TILE_SIZE, SERVER_CRS,
};
use crate::loader::{Loader, LoaderContext, MapServiceLoader};

/// Lowest zoom level a source supports unless it says otherwise.
pub const DEFAULT_MIN_ZOOM: u8 = 0;

/// Highest zoom level a source supports unless it says otherwise.
pub const DEFAULT_MAX_ZOOM: u8 = 21;

/// Per-backend tile policy.
///
/// Implementations supply identity, addressing and attribution; projection
/// and quad-tree helpers come with default implementations based on
/// [`tile_size`](TileSource::tile_size).
pub trait TileSource: Send + Sync {
    /// Name shown to users.
    fn name(&self) -> &str;

    /// Unique identifier, usable in file names and cache keys.
    fn id(&self) -> &str;

    fn min_zoom(&self) -> u8 {
        DEFAULT_MIN_ZOOM
    }

    fn max_zoom(&self) -> u8 {
        DEFAULT_MAX_ZOOM
    }

    /// Returns true if `zoom` is within this source's bounds.
    fn supports_zoom(&self, zoom: u8) -> bool {
        zoom >= self.min_zoom() && zoom <= self.max_zoom()
    }

    /// Tile edge length in pixels.
    fn tile_size(&self) -> u32 {
        DEFAULT_TILE_SIZE
    }

    /// File extension of the tile images.
    fn extension(&self) -> &str;

    fn attribution(&self) -> &Attribution;

    /// Location of a tile in the backend (URL or archive path).
    fn tile_url(&self, zoom: u8, x: u32, y: u32) -> String;

    /// Stable identifier of a tile across sessions.
    fn tile_id(&self, zoom: u8, x: u32, y: u32) -> String;

    fn projection(&self) -> Mercator {
        Mercator::new(self.tile_size())
    }

    /// Coordinate reference system of the backend.
    fn server_crs(&self) -> &'static str {
        SERVER_CRS
    }

    /// Nearest world pixel for a coordinate.
    fn lat_lon_to_xy(&self, lat: f64, lon: f64, zoom: u8) -> PixelXY {
        self.projection().lat_lon_to_pixel(lat, lon, zoom)
    }

    fn xy_to_lat_lon(&self, pixel: PixelXY, zoom: u8) -> Coordinate {
        self.projection().pixel_to_lat_lon(pixel, zoom)
    }

    /// Fractional tile coordinates for a coordinate.
    fn lat_lon_to_tile_xy(&self, lat: f64, lon: f64, zoom: u8) -> TileXY {
        self.projection().lat_lon_to_tile_xy(lat, lon, zoom)
    }

    /// North-west corner of a tile.
    fn tile_xy_to_lat_lon(&self, x: u32, y: u32, zoom: u8) -> Coordinate {
        self.projection()
            .tile_xy_to_lat_lon(x as f64, y as f64, zoom)
    }

    /// Great-circle distance in metres.
    fn distance(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        self.projection().distance(lat1, lon1, lat2, lon2)
    }

    /// Returns true if `inner` lies within `outer` in the quad-tree.
    fn is_inside(&self, inner: &TileAddress, outer: &TileAddress) -> bool {
        inner.is_inside(outer)
    }

    /// Tiles at `new_zoom` covering the area of `tile`.
    fn covering_tile_range(&self, tile: &TileAddress, new_zoom: u8) -> TileRange {
        tile.covering_range(new_zoom)
    }
}

/// The configured backend.
#[derive(Debug, Clone)]
pub enum Source {
    MapService(Arc<MapServiceSource>),
    MbTiles(Arc<MbTilesSource>),
}

impl Source {
    fn inner(&self) -> &dyn TileSource {
        match self {
            Self::MapService(source) => source.as_ref(),
            Self::MbTiles(source) => source.as_ref(),
        }
    }

    /// Build the loader for this backend.
    ///
    /// Archive sources hand out the same cached loader on every call.
    pub fn create_loader(&self, context: &LoaderContext) -> Loader {
        match self {
            Self::MapService(source) => Loader::Network(MapServiceLoader::new(
                Arc::clone(source),
                context.http_client(),
                context.network_options().clone(),
                context.dispatcher().clone(),
            )),
            Self::MbTiles(source) => Loader::Archive(source.loader(context.dispatcher())),
        }
    }

    pub fn as_map_service(&self) -> Option<&MapServiceSource> {
        match self {
            Self::MapService(source) => Some(source),
            Self::MbTiles(_) => None,
        }
    }

    pub fn as_mbtiles(&self) -> Option<&MbTilesSource> {
        match self {
            Self::MbTiles(source) => Some(source),
            Self::MapService(_) => None,
        }
    }
}

impl TileSource for Source {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn id(&self) -> &str {
        self.inner().id()
    }

    fn min_zoom(&self) -> u8 {
        self.inner().min_zoom()
    }

    fn max_zoom(&self) -> u8 {
        self.inner().max_zoom()
    }

    fn tile_size(&self) -> u32 {
        self.inner().tile_size()
    }

    fn extension(&self) -> &str {
        self.inner().extension()
    }

    fn attribution(&self) -> &Attribution {
        self.inner().attribution()
    }

    fn tile_url(&self, zoom: u8, x: u32, y: u32) -> String {
        self.inner().tile_url(zoom, x, y)
    }

    fn tile_id(&self, zoom: u8, x: u32, y: u32) -> String {
        self.inner().tile_id(zoom, x, y)
    }
}

impl From<MapServiceSource> for Source {
    fn from(source: MapServiceSource) -> Self {
        Self::MapService(Arc::new(source))
    }
}

impl From<MbTilesSource> for Source {
    fn from(source: MbTilesSource) -> Self {
        Self::MbTiles(Arc::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::JobDispatcher;
    use crate::loader::{MockHttpClient, MockResponse, NetworkOptions, TileLoader};

    fn osm() -> Source {
        let info = MapServiceInfo::new("OSM", "https://tile.example.org")
            .with_id("osm")
            .with_max_zoom(19)
            .with_tile_size(512);
        Source::from(MapServiceSource::new(info).unwrap())
    }

    #[test]
    fn test_delegates_to_inner() {
        let source = osm();
        assert_eq!(source.name(), "OSM");
        assert_eq!(source.id(), "osm");
        assert_eq!(source.max_zoom(), 19);
        assert_eq!(source.tile_size(), 512);
        assert_eq!(source.extension(), "png");
        assert_eq!(source.tile_url(1, 0, 1), "https://tile.example.org/1/0/1.png");
        assert!(source.as_map_service().is_some());
        assert!(source.as_mbtiles().is_none());
    }

    #[test]
    fn test_projection_uses_tile_size() {
        let source = osm();
        assert_eq!(source.projection().max_pixels(0), 512.0);
        let pixel = source.lat_lon_to_xy(0.0, 0.0, 1);
        assert_eq!(pixel, PixelXY { x: 512, y: 512 });

        let back = source.xy_to_lat_lon(pixel, 1);
        assert!(back.lat().abs() < 1e-9);
        assert!(back.lon().abs() < 1e-9);

        let nw = source.tile_xy_to_lat_lon(0, 0, 3);
        assert!((nw.lon() + 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_quad_tree_helpers() {
        let source = osm();
        let parent = TileAddress::new(1, 1, 1).unwrap();
        let child = TileAddress::new(3, 2, 2).unwrap();
        assert!(source.is_inside(&child, &parent));
        assert!(!source.is_inside(&parent, &child));

        let range = source.covering_tile_range(&parent, 3);
        assert_eq!(range.size(), 16);
        assert!(range.contains(&TileAddress::new(7, 7, 3).unwrap()));
    }

    #[test]
    fn test_create_network_loader() {
        let dispatcher = JobDispatcher::new(3);
        let context = LoaderContext::with_client(
            dispatcher,
            Arc::new(MockHttpClient::new(Ok(MockResponse::ok(b"x")))),
            NetworkOptions::default(),
        );
        let loader = osm().create_loader(&context);
        assert!(matches!(loader, Loader::Network(_)));
        assert_eq!(loader.dispatcher().concurrency(), 3);
        assert_eq!(loader.max_load_retries(), 2);
    }

    #[test]
    fn test_create_archive_loader() {
        let source = Source::from(MbTilesSource::open("/nonexistent/a.mbtiles"));
        let context = LoaderContext::with_client(
            JobDispatcher::new(1),
            Arc::new(MockHttpClient::new(Ok(MockResponse::ok(b"x")))),
            NetworkOptions::default(),
        );
        let loader = source.create_loader(&context);
        assert!(matches!(loader, Loader::Archive(_)));
        assert_eq!(loader.max_load_retries(), 0);
    }
}
