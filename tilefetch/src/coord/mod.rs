//! Coordinate conversion module
//!
//! Spherical (Web) Mercator math: conversions between geographic coordinates
//! (latitude/longitude), world pixel coordinates, fractional tile coordinates
//! and EPSG:3857 metres, for a given zoom level and tile size.
//!
//! Everything here is a pure function of its inputs. Latitudes outside the
//! Mercator range are clamped rather than rejected, so very large zooms or
//! polar inputs produce finite, degenerate values instead of panicking.
//!
//! # Example
//!
//! ```
//! use tilefetch::coord::Mercator;
//!
//! let mercator = Mercator::default();
//! let tile = mercator.lat_lon_to_tile_xy(40.7128, -74.0060, 16).to_address(16);
//! assert_eq!((tile.x(), tile.y()), (19295, 24640));
//! ```

mod types;

pub use types::{
    grid_size, Coordinate, PixelXY, Projected, TileAddress, TileRange, TileRangeIter, TileXY,
    MAX_LAT, MAX_LON, MAX_ZOOM, MIN_LAT, MIN_LON, MIN_ZOOM,
};

use std::f64::consts::PI;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Equatorial earth radius in metres, as used by EPSG:3857.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Coordinate reference system tile servers are addressed in.
pub const SERVER_CRS: &str = "EPSG:3857";

/// Spherical Mercator projector for a fixed tile size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mercator {
    tile_size: u32,
}

impl Default for Mercator {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

impl Mercator {
    /// Creates a projector. A tile size of 0 falls back to [`DEFAULT_TILE_SIZE`].
    pub fn new(tile_size: u32) -> Self {
        let tile_size = if tile_size == 0 {
            DEFAULT_TILE_SIZE
        } else {
            tile_size
        };
        Self { tile_size }
    }

    /// Tile edge length in pixels.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Width (and height) of the world in pixels at `zoom`.
    #[inline]
    pub fn max_pixels(&self, zoom: u8) -> f64 {
        self.tile_size as f64 * 2.0_f64.powi(zoom as i32)
    }

    /// Converts longitude to a world pixel X, clamped to `[0, max_pixels]`.
    #[inline]
    pub fn lon_to_x(&self, lon: f64, zoom: u8) -> f64 {
        let mp = self.max_pixels(zoom);
        let x = mp * (lon + 180.0) / 360.0;
        x.clamp(0.0, mp)
    }

    /// Converts latitude to a world pixel Y, clamped to `[0, max_pixels]`.
    ///
    /// Latitude is first clamped to [`MIN_LAT`]..=[`MAX_LAT`].
    #[inline]
    pub fn lat_to_y(&self, lat: f64, zoom: u8) -> f64 {
        let mp = self.max_pixels(zoom);
        let sin_lat = lat.clamp(MIN_LAT, MAX_LAT).to_radians().sin();
        let log = ((1.0 + sin_lat) / (1.0 - sin_lat)).ln();
        let y = mp * (0.5 - log / (4.0 * PI));
        y.clamp(0.0, mp)
    }

    /// Converts a world pixel X back to longitude.
    #[inline]
    pub fn x_to_lon(&self, x: f64, zoom: u8) -> f64 {
        let mp = self.max_pixels(zoom);
        360.0 / mp * x - 180.0
    }

    /// Converts a world pixel Y back to latitude.
    #[inline]
    pub fn y_to_lat(&self, y: f64, zoom: u8) -> f64 {
        let mp = self.max_pixels(zoom);
        let y = y - mp / 2.0;
        360.0 / PI * (-y / mp * 2.0 * PI).exp().atan() - 90.0
    }

    /// Projects a coordinate to the nearest integer world pixel.
    pub fn lat_lon_to_pixel(&self, lat: f64, lon: f64, zoom: u8) -> PixelXY {
        PixelXY {
            x: self.lon_to_x(lon, zoom).round() as i64,
            y: self.lat_to_y(lat, zoom).round() as i64,
        }
    }

    /// Inverse of [`lat_lon_to_pixel`](Self::lat_lon_to_pixel).
    pub fn pixel_to_lat_lon(&self, pixel: PixelXY, zoom: u8) -> Coordinate {
        Coordinate::new(
            self.y_to_lat(pixel.y as f64, zoom),
            self.x_to_lon(pixel.x as f64, zoom),
        )
    }

    /// Projects a coordinate to fractional tile coordinates.
    pub fn lat_lon_to_tile_xy(&self, lat: f64, lon: f64, zoom: u8) -> TileXY {
        let ts = self.tile_size as f64;
        TileXY::new(self.lon_to_x(lon, zoom) / ts, self.lat_to_y(lat, zoom) / ts)
    }

    /// North-west corner of the given tile.
    pub fn tile_xy_to_lat_lon(&self, x: f64, y: f64, zoom: u8) -> Coordinate {
        let ts = self.tile_size as f64;
        Coordinate::new(self.y_to_lat(y * ts, zoom), self.x_to_lon(x * ts, zoom))
    }

    /// Converts tile coordinates to EPSG:3857 metres.
    ///
    /// Tile (0, 0) at any zoom has its corner at the north-west extreme of the
    /// projected plane.
    pub fn tile_xy_to_projected(&self, x: f64, y: f64, zoom: u8) -> Projected {
        let f = 2.0 * PI * EARTH_RADIUS / 2.0_f64.powi(zoom as i32);
        Projected::new(x * f - PI * EARTH_RADIUS, PI * EARTH_RADIUS - y * f)
    }

    /// Converts EPSG:3857 metres to fractional tile coordinates.
    pub fn projected_to_tile_xy(&self, p: Projected, zoom: u8) -> TileXY {
        let f = 2.0 * PI * EARTH_RADIUS / 2.0_f64.powi(zoom as i32);
        TileXY::new(
            (p.east + PI * EARTH_RADIUS) / f,
            (PI * EARTH_RADIUS - p.north) / f,
        )
    }

    /// Great-circle distance in metres (haversine).
    pub fn distance(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
        let d_phi = (lat2 - lat1).to_radians();
        let d_lambda = (lon2 - lon1).to_radians();
        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS * a.sqrt().min(1.0).asin()
    }
}
