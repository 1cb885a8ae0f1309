//! The tile controller: what map clients call to get tiles.
//!
//! [`TileController::get_tile`] never blocks on I/O. It hands back the cached
//! tile (or a fresh one seeded with an ancestor placeholder) and, when the
//! tile is not loaded yet, starts a job on the active loader. The listener
//! passed at construction hears about every finished job.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tilefetch::controller::TileController;
//! use tilefetch::dispatcher::JobDispatcher;
//! use tilefetch::loader::LoaderContext;
//! use tilefetch::source::{MapServiceInfo, MapServiceSource, Source};
//! use tilefetch::store::MemoryTileStore;
//! use tilefetch::tile::Tile;
//!
//! let context = LoaderContext::new(JobDispatcher::new(8)).unwrap();
//! let info = MapServiceInfo::new("OSM", "https://tile.openstreetmap.org");
//! let source = Source::from(MapServiceSource::new(info).unwrap());
//! let listener = Arc::new(|tile: &Arc<Tile>, ok: bool| println!("{} {}", tile.key(), ok));
//!
//! let controller = TileController::new(source, Arc::new(MemoryTileStore::new()), listener, context);
//! let tile = controller.get_tile(0, 0, 1).unwrap();
//! ```

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::coord::{Coordinate, TileAddress, TileRange, MAX_ZOOM};
use crate::error::TileError;
use crate::loader::{Loader, LoaderContext, TileLoader, TileLoaderListener};
use crate::source::{Source, TileSource};
use crate::store::TileStore;
use crate::tile::Tile;

/// Active source together with the loader it produced.
struct Active {
    source: Source,
    loader: Loader,
}

/// Coordinates the tile store with the active loader.
pub struct TileController {
    active: RwLock<Active>,
    store: Arc<dyn TileStore>,
    listener: Arc<dyn TileLoaderListener>,
    context: LoaderContext,
    /// Serializes lookup-or-create so one address never gets two tiles.
    create_lock: Mutex<()>,
}

impl TileController {
    /// Create a controller for `source`.
    ///
    /// # Arguments
    ///
    /// * `source` - The backend tiles are fetched from
    /// * `store` - Cache of tiles handed out so far
    /// * `listener` - Notified once per finished job
    /// * `context` - Dispatcher and network settings used to build loaders
    pub fn new(
        source: Source,
        store: Arc<dyn TileStore>,
        listener: Arc<dyn TileLoaderListener>,
        context: LoaderContext,
    ) -> Self {
        let loader = source.create_loader(&context);
        Self {
            active: RwLock::new(Active { source, loader }),
            store,
            listener,
            context,
            create_lock: Mutex::new(()),
        }
    }

    /// Get the tile at (x, y, zoom), starting a fetch if it is not loaded.
    ///
    /// Returns immediately. Out-of-range addresses are rejected before the
    /// store or the loader is touched.
    pub fn get_tile(&self, x: i64, y: i64, zoom: u8) -> Result<Arc<Tile>, TileError> {
        let address = TileAddress::new(x, y, zoom)?;
        let (source, loader) = self.snapshot();

        let tile = self.lookup_or_create(&source, address);
        if tile.has_error() {
            self.seed_placeholder(&tile);
        }

        if !tile.is_loaded() && !tile.is_loading() {
            loader
                .create_tile_loader_job(Arc::clone(&tile), Arc::clone(&self.listener))
                .start_tile_load(false);
        }
        Ok(tile)
    }

    /// Fetch the tile at (x, y, zoom) again, bypassing intermediate caches.
    ///
    /// A loaded tile keeps its payload visible until the new one arrives.
    /// A tile that is currently loading is returned untouched.
    pub fn reload_tile(&self, x: i64, y: i64, zoom: u8) -> Result<Arc<Tile>, TileError> {
        let address = TileAddress::new(x, y, zoom)?;
        let (source, loader) = self.snapshot();

        let tile = self.lookup_or_create(&source, address);
        if !tile.reset() {
            debug!(tile = %tile.key(), "Tile is loading, reload skipped");
            return Ok(tile);
        }
        loader
            .create_tile_loader_job(Arc::clone(&tile), Arc::clone(&self.listener))
            .start_tile_load(true);
        Ok(tile)
    }

    /// Switch to another backend. Jobs already queued keep running against
    /// the previous loader unless cancelled first.
    pub fn set_tile_source(&self, source: Source) {
        let loader = source.create_loader(&self.context);
        info!(source = source.id(), name = source.name(), "Switching tile source");
        *self.active.write() = Active { source, loader };
    }

    pub fn tile_source(&self) -> Source {
        self.active.read().source.clone()
    }

    pub fn loader(&self) -> Loader {
        self.active.read().loader.clone()
    }

    pub fn store(&self) -> &Arc<dyn TileStore> {
        &self.store
    }

    /// Drop queued jobs that have not started. Returns how many were dropped.
    pub fn cancel_outstanding_jobs(&self) -> usize {
        let cancelled = self.active.read().loader.cancel_outstanding_tasks();
        if cancelled > 0 {
            debug!(cancelled, "Cancelled outstanding tile jobs");
        }
        cancelled
    }

    pub fn has_outstanding_jobs(&self) -> bool {
        self.active.read().loader.has_outstanding_tasks()
    }

    /// Tiles needed to cover the box between `north_west` and `south_east`.
    ///
    /// The zoom is clamped to the source's bounds and the corners to the grid.
    pub fn tiles_in_view(&self, north_west: Coordinate, south_east: Coordinate, zoom: u8) -> TileRange {
        let source = self.tile_source();
        let (min, max) = (source.min_zoom(), source.max_zoom());
        let zoom = zoom.clamp(min.min(max), min.max(max)).min(MAX_ZOOM);
        let nw = source
            .lat_lon_to_tile_xy(north_west.lat(), north_west.lon(), zoom)
            .to_address(zoom);
        let se = source
            .lat_lon_to_tile_xy(south_east.lat(), south_east.lon(), zoom)
            .to_address(zoom);
        TileRange::new((nw.x(), nw.y()), (se.x(), se.y()), zoom)
    }

    fn snapshot(&self) -> (Source, Loader) {
        let active = self.active.read();
        (active.source.clone(), active.loader.clone())
    }

    fn lookup_or_create(&self, source: &Source, address: TileAddress) -> Arc<Tile> {
        let _guard = self.create_lock.lock();
        if let Some(tile) = self
            .store
            .get(source.id(), address.x(), address.y(), address.zoom())
        {
            return tile;
        }

        let tile = Arc::new(Tile::new(source.id(), address));
        self.store.put(Arc::clone(&tile));
        self.seed_placeholder(&tile);
        debug!(tile = %tile.key(), "Created tile");
        tile
    }

    fn seed_placeholder(&self, tile: &Tile) {
        if let Some(placeholder) = self.store.find_placeholder(tile) {
            tile.set_placeholder(placeholder);
        }
    }
}
