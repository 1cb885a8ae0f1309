//! Tile source backed by a local MBTiles archive.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tracing::{debug, error};

use super::attribution::Attribution;
use super::{TileSource, DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM};
use crate::coord::{DEFAULT_TILE_SIZE, MAX_ZOOM};
use crate::dispatcher::JobDispatcher;
use crate::error::SourceError;
use crate::loader::{MbTilesArchive, MbTilesLoader};

/// Value reported for tileset type or MIME type the archive does not declare.
pub const UNKNOWN: &str = "???";

/// An MBTiles file as a tile source.
///
/// The archive is opened once at construction. A source whose archive failed
/// to open still exists; its loader fails every tile with
/// [`TileError::BackendUnavailable`](crate::TileError::BackendUnavailable).
#[derive(Debug)]
pub struct MbTilesSource {
    name: String,
    id: String,
    path: PathBuf,
    archive: Result<Arc<MbTilesArchive>, String>,
    flip_y: bool,
    min_zoom: u8,
    max_zoom: u8,
    tile_size: u32,
    attribution: Attribution,
    tileset_type: OnceLock<String>,
    mime_type: OnceLock<String>,
    loader: OnceLock<MbTilesLoader>,
}

impl MbTilesSource {
    /// Open the archive at `path`, logging (not returning) open failures.
    ///
    /// The id defaults to the file stem and the name to the id. Rows are
    /// flipped from XYZ to TMS, as the MBTiles format requires.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let archive = MbTilesArchive::open(path).map(Arc::new).map_err(|e| {
            error!(path = %path.display(), error = %e, "Could not read MBTiles file");
            e.to_string()
        });
        Self::from_archive(path, archive)
    }

    /// Open the archive at `path`, failing if it cannot be read.
    pub fn try_open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let archive = MbTilesArchive::open(path)?;
        Ok(Self::from_archive(path, Ok(Arc::new(archive))))
    }

    fn from_archive(path: &Path, archive: Result<Arc<MbTilesArchive>, String>) -> Self {
        let id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let (min_zoom, max_zoom) = match &archive {
            Ok(archive) => archive_zoom_range(archive),
            Err(_) => (DEFAULT_MIN_ZOOM, DEFAULT_MAX_ZOOM),
        };

        Self {
            name: id.clone(),
            id,
            path: path.to_path_buf(),
            archive,
            flip_y: true,
            min_zoom,
            max_zoom,
            tile_size: DEFAULT_TILE_SIZE,
            attribution: Attribution::default(),
            tileset_type: OnceLock::new(),
            mime_type: OnceLock::new(),
            loader: OnceLock::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Whether XYZ rows are flipped to TMS rows before lookup.
    pub fn with_flip_y(mut self, flip_y: bool) -> Self {
        self.flip_y = flip_y;
        self
    }

    /// Tile edge length; 0 keeps the default.
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        if tile_size != 0 {
            self.tile_size = tile_size;
        }
        self
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = attribution;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flip_y(&self) -> bool {
        self.flip_y
    }

    pub fn is_available(&self) -> bool {
        self.archive.is_ok()
    }

    /// `baselayer` or `overlay` as declared by the archive, or `???`.
    pub fn tileset_type(&self) -> &str {
        self.tileset_type
            .get_or_init(|| self.metadata_or_unknown("type"))
    }

    /// Tile format declared by the archive (e.g. `png`, `jpg`), or `???`.
    pub fn tile_mime_type(&self) -> &str {
        self.mime_type
            .get_or_init(|| self.metadata_or_unknown("format"))
    }

    /// The loader for this archive, created on first use and shared afterwards.
    pub fn loader(&self, dispatcher: &JobDispatcher) -> MbTilesLoader {
        self.loader
            .get_or_init(|| match &self.archive {
                Ok(archive) => MbTilesLoader::new(archive.clone(), self.flip_y, dispatcher.clone()),
                Err(reason) => MbTilesLoader::unavailable(reason.clone(), dispatcher.clone()),
            })
            .clone()
    }

    fn metadata_or_unknown(&self, key: &str) -> String {
        let Ok(archive) = &self.archive else {
            return UNKNOWN.to_string();
        };
        match archive.metadata(key) {
            Ok(Some(value)) if !value.trim().is_empty() => value,
            Ok(_) => UNKNOWN.to_string(),
            Err(e) => {
                debug!(key, error = %e, "Could not read MBTiles metadata");
                UNKNOWN.to_string()
            }
        }
    }
}

/// Zoom bounds from the tile table, then from `minzoom`/`maxzoom`
/// metadata, then the defaults. Both bounds are capped at [`MAX_ZOOM`] and an
/// inverted pair is swapped.
fn archive_zoom_range(archive: &MbTilesArchive) -> (u8, u8) {
    let (min, max) = match archive.zoom_range() {
        Ok(Some(range)) => range,
        Ok(None) => metadata_zoom_range(archive),
        Err(e) => {
            debug!(error = %e, "Could not read MBTiles zoom range");
            metadata_zoom_range(archive)
        }
    };
    normalize_zoom_range(min, max)
}

fn metadata_zoom_range(archive: &MbTilesArchive) -> (u8, u8) {
    let from_metadata = |key: &str, default: u8| {
        archive
            .metadata(key)
            .ok()
            .flatten()
            .and_then(|v| v.trim().parse::<u8>().ok())
            .unwrap_or(default)
    };
    (
        from_metadata("minzoom", DEFAULT_MIN_ZOOM),
        from_metadata("maxzoom", DEFAULT_MAX_ZOOM),
    )
}

fn normalize_zoom_range(min: u8, max: u8) -> (u8, u8) {
    let (min, max) = (min.min(MAX_ZOOM), max.min(MAX_ZOOM));
    if min > max {
        debug!(min, max, "MBTiles zoom range is inverted, swapping");
        (max, min)
    } else {
        (min, max)
    }
}

impl TileSource for MbTilesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn extension(&self) -> &str {
        self.tile_mime_type()
    }

    fn attribution(&self) -> &Attribution {
        &self.attribution
    }

    fn tile_url(&self, zoom: u8, x: u32, y: u32) -> String {
        format!("{}/{}/{}/{}", self.path.display(), zoom, x, y)
    }

    fn tile_id(&self, zoom: u8, x: u32, y: u32) -> String {
        format!("{}/{}/{}/{}", self.id, zoom, x, y)
    }
}
