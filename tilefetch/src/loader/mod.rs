//! Tile loaders and the jobs they produce.
//!
//! A loader turns a [`Tile`] into a [`TileJob`]. Starting the job queues it on
//! the shared [`JobDispatcher`]; when a worker runs it, the job claims the
//! tile, fetches the bytes from its backend, records the outcome on the tile
//! and notifies the [`TileLoaderListener`] exactly once.
//!
//! Two backends are provided:
//!
//! - [`MapServiceLoader`]: HTTP tile servers, through the [`HttpClient`] seam
//! - [`MbTilesLoader`]: local archives, through the [`TileArchive`] seam
//!
//! The closed [`Loader`] enum wraps both so the controller can swap backends
//! without caring which one is active.

mod archive;
mod http;
mod network;

pub use archive::{MbTilesArchive, MbTilesLoader, TileArchive, ARCHIVE_MAX_RETRIES};
pub use http::{read_body, HttpClient, HttpRequest, HttpResponse, ReqwestClient, ResponseHeaders};
pub use network::{
    expiry_from_headers, MapServiceLoader, NetworkOptions, DEFAULT_ACCEPT, DEFAULT_USER_AGENT,
    NETWORK_MAX_RETRIES,
};

#[cfg(test)]
pub use http::tests::{MockHttpClient, MockResponse};

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::dispatcher::{Job, JobDispatcher};
use crate::error::{TileError, NO_TILE_MESSAGE};
use crate::tile::Tile;

// =============================================================================
// Listener
// =============================================================================

/// Receives the result of every tile job, exactly once per job.
///
/// Closures of the form `Fn(&Arc<Tile>, bool)` implement this trait.
pub trait TileLoaderListener: Send + Sync {
    /// Called on a dispatcher worker when a job ends.
    ///
    /// # Arguments
    ///
    /// * `tile` - The tile the job worked on
    /// * `success` - True if the tile is now loaded
    fn tile_loading_finished(&self, tile: &Arc<Tile>, success: bool);
}

impl<F> TileLoaderListener for F
where
    F: Fn(&Arc<Tile>, bool) + Send + Sync,
{
    fn tile_loading_finished(&self, tile: &Arc<Tile>, success: bool) {
        self(tile, success)
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// Result of a single fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Payload retrieved.
    Loaded(Bytes),
    /// The backend reported that no tile exists at this address.
    NoTile,
    /// The fetch failed.
    Failed(TileError),
}

/// A fetch bound to one tile.
pub trait TileJob: Job {
    fn tile(&self) -> &Arc<Tile>;

    /// Queue the job on the dispatcher. With `force`, caches between the
    /// client and the backend are bypassed where the backend supports it.
    fn start_tile_load(self: Box<Self>, force: bool);
}

/// Releases the tile claim and notifies the listener when dropped.
///
/// Created right after a successful claim so the release also happens when
/// the fetch panics.
struct FinishGuard<'a> {
    tile: &'a Arc<Tile>,
    listener: &'a Arc<dyn TileLoaderListener>,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        let success = self.tile.finish_loading();
        let notified = panic::catch_unwind(AssertUnwindSafe(|| {
            self.listener.tile_loading_finished(self.tile, success)
        }));
        if notified.is_err() {
            error!(tile = %self.tile.key(), "Tile listener panicked");
        }
    }
}

/// Claim `tile`, run `fetch` and record its outcome.
///
/// Does nothing if the tile is already loading or loaded. Otherwise the
/// listener is notified exactly once, whatever `fetch` does.
pub(crate) fn run_claimed<F>(tile: &Arc<Tile>, listener: &Arc<dyn TileLoaderListener>, fetch: F)
where
    F: FnOnce() -> LoadOutcome,
{
    if !tile.init_loading() {
        debug!(tile = %tile.key(), "Tile already loading or loaded, skipping");
        return;
    }
    let _guard = FinishGuard { tile, listener };

    match fetch() {
        LoadOutcome::Loaded(data) => {
            debug!(tile = %tile.key(), bytes = data.len(), "Tile loaded");
            tile.load_image(data);
        }
        LoadOutcome::NoTile => {
            debug!(tile = %tile.key(), "No tile at this zoom level");
            tile.set_error(NO_TILE_MESSAGE);
        }
        LoadOutcome::Failed(err) => {
            warn!(tile = %tile.key(), error = %err, "Tile load failed");
            tile.set_error(err.to_string());
        }
    }
}

// =============================================================================
// Loaders
// =============================================================================

/// Produces jobs for one backend.
pub trait TileLoader: Send + Sync {
    /// Create (but do not start) a job for `tile`.
    fn create_tile_loader_job(
        &self,
        tile: Arc<Tile>,
        listener: Arc<dyn TileLoaderListener>,
    ) -> Box<dyn TileJob>;

    /// How often a caller may retry a transiently failed tile.
    fn max_load_retries(&self) -> u32;

    /// Pool the jobs run on.
    fn dispatcher(&self) -> &JobDispatcher;

    fn has_outstanding_tasks(&self) -> bool {
        self.dispatcher().has_outstanding_tasks()
    }

    /// Drop queued jobs that have not started. Returns how many were dropped.
    fn cancel_outstanding_tasks(&self) -> usize {
        self.dispatcher().cancel_outstanding_tasks()
    }
}

/// The loader of the active backend.
#[derive(Debug, Clone)]
pub enum Loader {
    Network(MapServiceLoader),
    Archive(MbTilesLoader),
}

impl Loader {
    fn inner(&self) -> &dyn TileLoader {
        match self {
            Self::Network(loader) => loader,
            Self::Archive(loader) => loader,
        }
    }
}

impl TileLoader for Loader {
    fn create_tile_loader_job(
        &self,
        tile: Arc<Tile>,
        listener: Arc<dyn TileLoaderListener>,
    ) -> Box<dyn TileJob> {
        self.inner().create_tile_loader_job(tile, listener)
    }

    fn max_load_retries(&self) -> u32 {
        self.inner().max_load_retries()
    }

    fn dispatcher(&self) -> &JobDispatcher {
        self.inner().dispatcher()
    }
}

impl From<MapServiceLoader> for Loader {
    fn from(loader: MapServiceLoader) -> Self {
        Self::Network(loader)
    }
}

impl From<MbTilesLoader> for Loader {
    fn from(loader: MbTilesLoader) -> Self {
        Self::Archive(loader)
    }
}

// =============================================================================
// Context
// =============================================================================

/// Everything a source needs to build its loader: the shared dispatcher, the
/// HTTP client and the network request options.
#[derive(Clone)]
pub struct LoaderContext {
    dispatcher: JobDispatcher,
    http_client: Arc<dyn HttpClient>,
    network: NetworkOptions,
}

impl LoaderContext {
    /// Context with default network options and a reqwest client.
    pub fn new(dispatcher: JobDispatcher) -> Result<Self, TileError> {
        Self::with_options(dispatcher, NetworkOptions::default())
    }

    /// Context with a reqwest client configured from `network`.
    pub fn with_options(dispatcher: JobDispatcher, network: NetworkOptions) -> Result<Self, TileError> {
        let client = ReqwestClient::with_timeouts(network.connect_timeout, network.read_timeout)?;
        Ok(Self::with_client(dispatcher, Arc::new(client), network))
    }

    /// Context with a caller-supplied HTTP client.
    pub fn with_client(
        dispatcher: JobDispatcher,
        http_client: Arc<dyn HttpClient>,
        network: NetworkOptions,
    ) -> Self {
        Self {
            dispatcher,
            http_client,
            network,
        }
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    pub fn http_client(&self) -> Arc<dyn HttpClient> {
        Arc::clone(&self.http_client)
    }

    pub fn network_options(&self) -> &NetworkOptions {
        &self.network
    }
}

impl fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderContext")
            .field("dispatcher", &self.dispatcher)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileAddress;
    use parking_lot::Mutex;

    type Calls = Arc<Mutex<Vec<(String, bool)>>>;

    fn recording_listener() -> (Arc<dyn TileLoaderListener>, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let listener: Arc<dyn TileLoaderListener> = Arc::new(move |tile: &Arc<Tile>, success: bool| {
            sink.lock().push((tile.key().to_string(), success));
        });
        (listener, calls)
    }

    fn tile() -> Arc<Tile> {
        Arc::new(Tile::new("t", TileAddress::new(0, 0, 1).unwrap()))
    }

    #[test]
    fn test_run_claimed_success() {
        let (listener, calls) = recording_listener();
        let tile = tile();
        run_claimed(&tile, &listener, || LoadOutcome::Loaded(Bytes::from_static(b"x")));

        assert!(tile.is_loaded());
        assert_eq!(calls.lock().as_slice(), &[("t/1/0/0".to_string(), true)]);
    }

    #[test]
    fn test_run_claimed_no_tile() {
        let (listener, calls) = recording_listener();
        let tile = tile();
        run_claimed(&tile, &listener, || LoadOutcome::NoTile);

        assert_eq!(tile.error().as_deref(), Some(NO_TILE_MESSAGE));
        assert_eq!(calls.lock().len(), 1);
        assert!(!calls.lock()[0].1);
    }

    #[test]
    fn test_run_claimed_failure_keeps_message() {
        let (listener, calls) = recording_listener();
        let tile = tile();
        run_claimed(&tile, &listener, || {
            LoadOutcome::Failed(TileError::Transport("connection reset".into()))
        });

        assert_eq!(tile.error().as_deref(), Some("connection reset"));
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn test_run_claimed_skips_claimed_tile() {
        let (listener, calls) = recording_listener();
        let tile = tile();
        assert!(tile.init_loading());

        let mut fetched = false;
        run_claimed(&tile, &listener, || {
            fetched = true;
            LoadOutcome::NoTile
        });

        assert!(!fetched);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_panicking_fetch_still_notifies() {
        let (listener, calls) = recording_listener();
        let tile = tile();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            run_claimed(&tile, &listener, || panic!("fetch exploded"));
        }));

        assert!(result.is_err());
        assert!(tile.has_error());
        assert!(!tile.is_loading());
        assert_eq!(calls.lock().as_slice(), &[("t/1/0/0".to_string(), false)]);
    }
}
