//! tilefetch - Tile addressing and asynchronous tile delivery
//!
//! This library resolves the map tiles a client needs for a region and zoom
//! level, hands back cached tiles immediately, and fetches missing tiles from
//! pluggable backends (HTTP tile servers, MBTiles archives) on a shared
//! worker pool without blocking the caller.
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
//! let info = MapServiceInfo::new("OpenStreetMap", "https://tile.openstreetmap.org")
//!     .with_max_zoom(19);
//! let source = Source::from(MapServiceSource::new(info).unwrap());
//! let store = Arc::new(MemoryTileStore::new());
//!
//! let listener = Arc::new(|tile: &Arc<Tile>, success: bool| {
//!     println!("{} finished (success: {})", tile.key(), success);
//! });
//! let controller = TileController::new(source, store, listener, context);
//!
//! // Returns immediately; the fetch runs on the dispatcher.
//! let tile = controller.get_tile(1, 2, 3).unwrap();
//! ```

pub mod config;
pub mod controller;
pub mod coord;
pub mod dispatcher;
pub mod error;
pub mod loader;
pub mod logging;
pub mod source;
pub mod store;
pub mod tile;

pub use error::{SourceError, TileError};
