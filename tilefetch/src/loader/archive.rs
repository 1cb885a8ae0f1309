//! Loader for local MBTiles archives.
//!
//! MBTiles stores tiles in the TMS scheme (row 0 at the south edge), while
//! the controller always addresses tiles in XYZ. With `flip_y` enabled the
//! loader converts the row as `y' = 2^zoom - y - 1` before the lookup.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use r2d2::Pool;
use r2d2_sqlite::rusqlite::{self, OpenFlags, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::debug;

use super::{run_claimed, LoadOutcome, TileJob, TileLoader, TileLoaderListener};
use crate::coord::grid_size;
use crate::dispatcher::{Job, JobDispatcher};
use crate::error::{SourceError, TileError};
use crate::tile::Tile;

/// Archive lookups are local, so failures are not retried.
pub const ARCHIVE_MAX_RETRIES: u32 = 0;

/// Read access to a tile archive addressed in the archive's own row scheme.
pub trait TileArchive: Send + Sync {
    /// Returns the stored tile, or `None` if the archive has no entry.
    ///
    /// # Arguments
    ///
    /// * `zoom` - Zoom level
    /// * `x` - Tile column
    /// * `row` - Tile row as stored in the archive
    fn read_tile(&self, zoom: u8, x: u32, row: u32) -> Result<Option<Vec<u8>>, TileError>;
}

// =============================================================================
// MBTiles archive
// =============================================================================

/// An MBTiles (SQLite) file opened read-only through a connection pool.
pub struct MbTilesArchive {
    path: PathBuf,
    pool: Pool<SqliteConnectionManager>,
}

impl MbTilesArchive {
    /// Open the archive at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Archive`] if the file is missing, cannot be
    /// opened as SQLite, or has no `tiles` table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let archive_error = |reason: String| SourceError::Archive {
            path: path.display().to_string(),
            reason,
        };

        if !path.is_file() {
            return Err(archive_error("file does not exist".to_string()));
        }

        let manager = SqliteConnectionManager::file(path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| archive_error(e.to_string()))?;

        let conn = pool.get().map_err(|e| archive_error(e.to_string()))?;
        let has_tiles: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'tiles'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| archive_error(e.to_string()))?;
        if has_tiles == 0 {
            return Err(archive_error("missing 'tiles' table".to_string()));
        }
        drop(conn);

        debug!(path = %path.display(), "Opened MBTiles archive");
        Ok(Self {
            path: path.to_path_buf(),
            pool,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value of `name` in the `metadata` table.
    pub fn metadata(&self, name: &str) -> Result<Option<String>, SourceError> {
        let conn = self.pool.get().map_err(|e| self.error(e.to_string()))?;
        conn.query_row(
            "SELECT value FROM metadata WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| self.error(e.to_string()))
    }

    /// Lowest and highest zoom level present in the `tiles` table.
    pub fn zoom_range(&self) -> Result<Option<(u8, u8)>, SourceError> {
        let conn = self.pool.get().map_err(|e| self.error(e.to_string()))?;
        let (min, max): (Option<i64>, Option<i64>) = conn
            .query_row(
                "SELECT MIN(zoom_level), MAX(zoom_level) FROM tiles",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| self.error(e.to_string()))?;

        Ok(match (min, max) {
            (Some(min), Some(max)) => Some((clamp_zoom(min), clamp_zoom(max))),
            _ => None,
        })
    }

    fn error(&self, reason: String) -> SourceError {
        SourceError::Archive {
            path: self.path.display().to_string(),
            reason,
        }
    }
}

fn clamp_zoom(zoom: i64) -> u8 {
    zoom.clamp(0, u8::MAX as i64) as u8
}

impl TileArchive for MbTilesArchive {
    fn read_tile(&self, zoom: u8, x: u32, row: u32) -> Result<Option<Vec<u8>>, TileError> {
        let conn = self
            .pool
            .get()
            .map_err(|e| TileError::BackendUnavailable(e.to_string()))?;
        conn.query_row(
            "SELECT tile_data FROM tiles WHERE tile_column = ?1 AND tile_row = ?2 AND zoom_level = ?3",
            rusqlite::params![x, row, zoom],
            |r| r.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| TileError::BackendUnavailable(format!("archive query failed: {}", e)))
    }
}

impl fmt::Debug for MbTilesArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MbTilesArchive")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Loader
// =============================================================================

struct ArchiveInner {
    archive: Result<Arc<dyn TileArchive>, String>,
    flip_y: bool,
    dispatcher: JobDispatcher,
}

/// Loads tiles from a [`TileArchive`].
#[derive(Clone)]
pub struct MbTilesLoader {
    inner: Arc<ArchiveInner>,
}

impl MbTilesLoader {
    pub fn new(archive: Arc<dyn TileArchive>, flip_y: bool, dispatcher: JobDispatcher) -> Self {
        Self {
            inner: Arc::new(ArchiveInner {
                archive: Ok(archive),
                flip_y,
                dispatcher,
            }),
        }
    }

    /// A loader whose archive failed to open. Every job fails the tile with
    /// [`TileError::BackendUnavailable`].
    pub fn unavailable(reason: impl Into<String>, dispatcher: JobDispatcher) -> Self {
        Self {
            inner: Arc::new(ArchiveInner {
                archive: Err(reason.into()),
                flip_y: false,
                dispatcher,
            }),
        }
    }

    pub fn flip_y(&self) -> bool {
        self.inner.flip_y
    }

    pub fn is_available(&self) -> bool {
        self.inner.archive.is_ok()
    }

    /// Row to look up in the archive for XYZ row `y`.
    pub fn archive_row(&self, zoom: u8, y: u32) -> u32 {
        if self.inner.flip_y {
            grid_size(zoom).saturating_sub(y as u64 + 1) as u32
        } else {
            y
        }
    }

    fn fetch(&self, tile: &Tile) -> LoadOutcome {
        let archive = match &self.inner.archive {
            Ok(archive) => archive,
            Err(reason) => return LoadOutcome::Failed(TileError::BackendUnavailable(reason.clone())),
        };

        let address = tile.address();
        let (zoom, x, y) = (address.zoom(), address.x(), address.y());
        let row = self.archive_row(zoom, y);
        debug!(tile = %tile.key(), row, "Reading tile from archive");

        match archive.read_tile(zoom, x, row) {
            Ok(Some(data)) => LoadOutcome::Loaded(Bytes::from(data)),
            Ok(None) => LoadOutcome::Failed(TileError::NotInArchive { zoom, x, y }),
            Err(e) => LoadOutcome::Failed(e),
        }
    }
}

impl TileLoader for MbTilesLoader {
    fn create_tile_loader_job(
        &self,
        tile: Arc<Tile>,
        listener: Arc<dyn TileLoaderListener>,
    ) -> Box<dyn TileJob> {
        Box::new(ArchiveJob {
            loader: self.clone(),
            tile,
            listener,
        })
    }

    fn max_load_retries(&self) -> u32 {
        ARCHIVE_MAX_RETRIES
    }

    fn dispatcher(&self) -> &JobDispatcher {
        &self.inner.dispatcher
    }
}

impl fmt::Debug for MbTilesLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MbTilesLoader")
            .field("flip_y", &self.inner.flip_y)
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

struct ArchiveJob {
    loader: MbTilesLoader,
    tile: Arc<Tile>,
    listener: Arc<dyn TileLoaderListener>,
}

impl Job for ArchiveJob {
    fn name(&self) -> String {
        format!("archive {}", self.tile.key())
    }

    fn run(self: Box<Self>) {
        run_claimed(&self.tile, &self.listener, || self.loader.fetch(&self.tile));
    }
}

impl TileJob for ArchiveJob {
    fn tile(&self) -> &Arc<Tile> {
        &self.tile
    }

    // Archives have no intermediate caches, so `force` changes nothing.
    fn start_tile_load(self: Box<Self>, _force: bool) {
        let dispatcher = self.loader.inner.dispatcher.clone();
        dispatcher.execute(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileAddress;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-memory archive that records the rows it was asked for.
    #[derive(Default)]
    struct MemoryArchive {
        tiles: HashMap<(u8, u32, u32), Vec<u8>>,
        lookups: Mutex<Vec<(u8, u32, u32)>>,
    }

    impl TileArchive for MemoryArchive {
        fn read_tile(&self, zoom: u8, x: u32, row: u32) -> Result<Option<Vec<u8>>, TileError> {
            self.lookups.lock().push((zoom, x, row));
            Ok(self.tiles.get(&(zoom, x, row)).cloned())
        }
    }

    fn run(loader: &MbTilesLoader, x: i64, y: i64, zoom: u8) -> (Arc<Tile>, Vec<bool>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let listener: Arc<dyn TileLoaderListener> =
            Arc::new(move |_: &Arc<Tile>, success: bool| sink.lock().push(success));
        let tile = Arc::new(Tile::new("a", TileAddress::new(x, y, zoom).unwrap()));
        loader
            .create_tile_loader_job(Arc::clone(&tile), listener)
            .run();
        let calls = calls.lock().clone();
        (tile, calls)
    }

    #[test]
    fn test_flip_reads_tms_row() {
        let mut archive = MemoryArchive::default();
        archive.tiles.insert((4, 3, 10), b"tile".to_vec());
        let archive = Arc::new(archive);
        let loader = MbTilesLoader::new(archive.clone(), true, JobDispatcher::new(1));

        let (tile, calls) = run(&loader, 3, 5, 4);
        assert_eq!(archive.lookups.lock().as_slice(), &[(4, 3, 10)]);
        assert_eq!(tile.payload(), Some(Bytes::from_static(b"tile")));
        assert_eq!(calls, vec![true]);
    }

    #[test]
    fn test_no_flip_reads_xyz_row() {
        let archive = Arc::new(MemoryArchive::default());
        let loader = MbTilesLoader::new(archive.clone(), false, JobDispatcher::new(1));
        assert_eq!(loader.archive_row(4, 5), 5);

        run(&loader, 3, 5, 4);
        assert_eq!(archive.lookups.lock().as_slice(), &[(4, 3, 5)]);
    }

    #[test]
    fn test_missing_tile_message() {
        let loader = MbTilesLoader::new(
            Arc::new(MemoryArchive::default()),
            true,
            JobDispatcher::new(1),
        );
        let (tile, calls) = run(&loader, 3, 5, 4);
        assert_eq!(
            tile.error().as_deref(),
            Some("Tile source does not contain tile for 4/3/5")
        );
        assert_eq!(calls, vec![false]);
    }

    #[test]
    fn test_unavailable_archive_fails_tile() {
        let loader = MbTilesLoader::unavailable("no such file", JobDispatcher::new(1));
        assert!(!loader.is_available());

        let (tile, calls) = run(&loader, 0, 0, 0);
        assert!(tile.has_error());
        assert!(tile.error().unwrap().contains("no such file"));
        assert_eq!(calls, vec![false]);
    }

    #[test]
    fn test_no_retries() {
        let loader = MbTilesLoader::unavailable("x", JobDispatcher::new(1));
        assert_eq!(loader.max_load_retries(), 0);
    }

    #[test]
    fn test_open_missing_file() {
        let err = MbTilesArchive::open("/nonexistent/world.mbtiles").unwrap_err();
        assert!(matches!(err, SourceError::Archive { .. }));
    }

    #[test]
    fn test_open_rejects_non_mbtiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mbtiles");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE other (id INTEGER);")
            .unwrap();

        let err = MbTilesArchive::open(&path).unwrap_err();
        assert!(err.to_string().contains("tiles"));
    }

    #[test]
    fn test_read_real_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.mbtiles");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE metadata (name TEXT, value TEXT);
             CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);
             INSERT INTO metadata VALUES ('format', 'png');",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tiles VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![2, 1, 3, vec![7u8, 8, 9]],
        )
        .unwrap();
        drop(conn);

        let archive = MbTilesArchive::open(&path).unwrap();
        assert_eq!(archive.read_tile(2, 1, 3).unwrap(), Some(vec![7, 8, 9]));
        assert_eq!(archive.read_tile(2, 1, 0).unwrap(), None);
        assert_eq!(archive.metadata("format").unwrap().as_deref(), Some("png"));
        assert_eq!(archive.metadata("type").unwrap(), None);
        assert_eq!(archive.zoom_range().unwrap(), Some((2, 2)));
    }
}
