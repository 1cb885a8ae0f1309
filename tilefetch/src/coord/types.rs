//! Coordinate type definitions

use std::fmt;

use crate::error::TileError;

/// Web Mercator valid latitude range
pub const MIN_LAT: f64 = -85.05112877980659;
pub const MAX_LAT: f64 = 85.05112877980659;

/// Valid longitude range
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Zoom range accepted for tile addressing.
///
/// Coordinates are `u32`, so the grid `2^zoom` must fit.
pub const MIN_ZOOM: u8 = 0;
pub const MAX_ZOOM: u8 = 30;

/// A geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

impl Coordinate {
    /// Creates a coordinate from latitude and longitude in degrees.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Latitude in degrees.
    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in degrees.
    pub fn lon(&self) -> f64 {
        self.lon
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// Integer pixel position at a given zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelXY {
    pub x: i64,
    pub y: i64,
}

/// Fractional tile position at a given zoom.
///
/// The integer part is the tile index, the fraction the position inside it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileXY {
    pub x: f64,
    pub y: f64,
}

impl TileXY {
    /// Creates a fractional tile position.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Tile column containing this position.
    pub fn x_index(&self) -> i64 {
        self.x.floor() as i64
    }

    /// Tile row containing this position.
    pub fn y_index(&self) -> i64 {
        self.y.floor() as i64
    }

    /// Resolves the tile containing this position, clamped into the grid.
    ///
    /// Positions on the far east or south edge (exactly `2^zoom`) belong to
    /// the last column or row.
    pub fn to_address(&self, zoom: u8) -> TileAddress {
        let zoom = zoom.min(MAX_ZOOM);
        let max = grid_size(zoom) as i64 - 1;
        TileAddress {
            x: self.x_index().clamp(0, max) as u32,
            y: self.y_index().clamp(0, max) as u32,
            zoom,
        }
    }
}

/// Planar position in EPSG:3857 metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projected {
    pub east: f64,
    pub north: f64,
}

impl Projected {
    /// Creates a projected position.
    pub fn new(east: f64, north: f64) -> Self {
        Self { east, north }
    }
}

/// Number of tiles along one axis at `zoom`.
#[inline]
pub fn grid_size(zoom: u8) -> u64 {
    1u64 << zoom.min(63)
}

/// Address of a tile in the XYZ quad-tree.
///
/// X grows eastward, Y grows southward, both in `[0, 2^zoom)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddress {
    x: u32,
    y: u32,
    zoom: u8,
}

impl TileAddress {
    /// Validates and creates a tile address.
    ///
    /// Signed inputs let callers pass raw view arithmetic; anything outside
    /// the grid is rejected with [`TileError::OutOfRange`].
    pub fn new(x: i64, y: i64, zoom: u8) -> Result<Self, TileError> {
        let out_of_range = TileError::OutOfRange { x, y, zoom };
        if zoom > MAX_ZOOM {
            return Err(out_of_range);
        }
        let max = grid_size(zoom) as i64;
        if x < 0 || x >= max || y < 0 || y >= max {
            return Err(out_of_range);
        }
        Ok(Self {
            x: x as u32,
            y: y as u32,
            zoom,
        })
    }

    /// Tile column.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Tile row.
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Zoom level.
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Row in the TMS scheme, where row 0 is the southern edge.
    pub fn flipped_y(&self) -> u32 {
        (grid_size(self.zoom) - 1 - self.y as u64) as u32
    }

    /// The ancestor at `zoom`, or `None` if `zoom` is deeper than this tile.
    pub fn ancestor(&self, zoom: u8) -> Option<TileAddress> {
        let dz = self.zoom.checked_sub(zoom)?;
        Some(TileAddress {
            x: self.x >> dz,
            y: self.y >> dz,
            zoom,
        })
    }

    /// The parent tile, or `None` at zoom 0.
    pub fn parent(&self) -> Option<TileAddress> {
        self.zoom.checked_sub(1).and_then(|z| self.ancestor(z))
    }

    /// The four children at the next zoom level, or `None` at [`MAX_ZOOM`].
    pub fn children(&self) -> Option<[TileAddress; 4]> {
        if self.zoom >= MAX_ZOOM {
            return None;
        }
        let zoom = self.zoom + 1;
        let (x, y) = (self.x << 1, self.y << 1);
        Some([
            TileAddress { x, y, zoom },
            TileAddress { x: x + 1, y, zoom },
            TileAddress { x, y: y + 1, zoom },
            TileAddress {
                x: x + 1,
                y: y + 1,
                zoom,
            },
        ])
    }

    /// Returns true if this tile lies within (or is) `outer`.
    pub fn is_inside(&self, outer: &TileAddress) -> bool {
        self.ancestor(outer.zoom)
            .is_some_and(|ancestor| ancestor == *outer)
    }

    /// The range of tiles at `new_zoom` covering the same area as this tile.
    ///
    /// Zooming out yields the single ancestor; zooming in yields the full
    /// `2^dz x 2^dz` block of descendants. `new_zoom` is capped at
    /// [`MAX_ZOOM`].
    pub fn covering_range(&self, new_zoom: u8) -> TileRange {
        let new_zoom = new_zoom.min(MAX_ZOOM);
        if new_zoom <= self.zoom {
            let dz = self.zoom - new_zoom;
            let (x, y) = (self.x >> dz, self.y >> dz);
            TileRange::new((x, y), (x, y), new_zoom)
        } else {
            let dz = new_zoom - self.zoom;
            let (x, y) = (self.x << dz, self.y << dz);
            let span = (1u32 << dz) - 1;
            TileRange::new((x, y), (x + span, y + span), new_zoom)
        }
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Inclusive rectangle of tiles at a single zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRange {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    zoom: u8,
}

impl TileRange {
    /// Creates a range from two corners; the corners may be given in any order.
    pub fn new(a: (u32, u32), b: (u32, u32), zoom: u8) -> Self {
        Self {
            min_x: a.0.min(b.0),
            min_y: a.1.min(b.1),
            max_x: a.0.max(b.0),
            max_y: a.1.max(b.1),
            zoom,
        }
    }

    /// Zoom level of every tile in the range.
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// North-west corner tile.
    pub fn min(&self) -> TileAddress {
        TileAddress {
            x: self.min_x,
            y: self.min_y,
            zoom: self.zoom,
        }
    }

    /// South-east corner tile.
    pub fn max(&self) -> TileAddress {
        TileAddress {
            x: self.max_x,
            y: self.max_y,
            zoom: self.zoom,
        }
    }

    /// Number of columns.
    pub fn width(&self) -> u64 {
        (self.max_x - self.min_x) as u64 + 1
    }

    /// Number of rows.
    pub fn height(&self) -> u64 {
        (self.max_y - self.min_y) as u64 + 1
    }

    /// Total number of tiles.
    pub fn size(&self) -> u64 {
        self.width() * self.height()
    }

    /// Returns true if `tile` is at this zoom and within the rectangle.
    pub fn contains(&self, tile: &TileAddress) -> bool {
        tile.zoom == self.zoom
            && (self.min_x..=self.max_x).contains(&tile.x)
            && (self.min_y..=self.max_y).contains(&tile.y)
    }

    /// Iterates the tiles in row-major order.
    pub fn iter(&self) -> TileRangeIter {
        TileRangeIter {
            range: *self,
            next: Some((self.min_x, self.min_y)),
        }
    }
}

impl IntoIterator for TileRange {
    type Item = TileAddress;
    type IntoIter = TileRangeIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Row-major iterator over a [`TileRange`].
#[derive(Debug, Clone)]
pub struct TileRangeIter {
    range: TileRange,
    next: Option<(u32, u32)>,
}

impl Iterator for TileRangeIter {
    type Item = TileAddress;

    fn next(&mut self) -> Option<Self::Item> {
        let (x, y) = self.next?;
        self.next = if x < self.range.max_x {
            Some((x + 1, y))
        } else if y < self.range.max_y {
            Some((self.range.min_x, y + 1))
        } else {
            None
        };
        Some(TileAddress {
            x,
            y,
            zoom: self.range.zoom,
        })
    }
}
