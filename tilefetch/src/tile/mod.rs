//! The tile entity and its loading state machine.
//!
//! A [`Tile`] is shared between the store, the controller and at most one
//! loading job. All mutable fields live behind a per-tile mutex, so readers
//! never observe a half-applied transition.
//!
//! ```text
//!   Empty ──init_loading──▶ Loading ──load_image──▶ Loaded
//!     ▲                       │
//!     │                       └──set_error──▶ Error ──init_loading──▶ Loading
//!     └────────── reset (explicit reload) ──────────┘
//! ```

mod key;

pub use key::{Placeholder, TileKey, TileState};

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::coord::TileAddress;

/// Metadata key holding the expiry time in epoch milliseconds.
pub const EXPIRES_KEY: &str = "expires";

/// Error recorded when a job ends without reaching a terminal state.
const INTERRUPTED_MESSAGE: &str = "tile loading was interrupted";

#[derive(Debug, Default)]
struct TileInner {
    state: TileState,
    payload: Option<Bytes>,
    placeholder: Option<Placeholder>,
    error: Option<String>,
    metadata: BTreeMap<String, String>,
    attempts: u32,
}

/// A single map tile.
#[derive(Debug)]
pub struct Tile {
    key: TileKey,
    inner: Mutex<TileInner>,
}

impl Tile {
    /// Create an empty tile.
    pub fn new(source_id: impl Into<Arc<str>>, address: TileAddress) -> Self {
        Self {
            key: TileKey::new(source_id, address),
            inner: Mutex::new(TileInner::default()),
        }
    }

    pub fn key(&self) -> &TileKey {
        &self.key
    }

    pub fn source_id(&self) -> &str {
        self.key.source_id()
    }

    pub fn address(&self) -> TileAddress {
        self.key.address()
    }

    pub fn x(&self) -> u32 {
        self.key.address().x()
    }

    pub fn y(&self) -> u32 {
        self.key.address().y()
    }

    pub fn zoom(&self) -> u8 {
        self.key.address().zoom()
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn state(&self) -> TileState {
        self.inner.lock().state
    }

    /// Returns true once a payload has been loaded without error.
    pub fn is_loaded(&self) -> bool {
        self.state() == TileState::Loaded
    }

    pub fn is_loading(&self) -> bool {
        self.state() == TileState::Loading
    }

    pub fn has_error(&self) -> bool {
        self.state() == TileState::Error
    }

    /// Error message of the last failed attempt.
    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    /// Number of times a job has claimed this tile.
    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    /// Claim the tile for a loading job.
    ///
    /// Returns `false` if another job holds the claim or the tile is already
    /// loaded; the caller must then leave the tile alone.
    pub fn init_loading(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            TileState::Loading | TileState::Loaded => false,
            TileState::Empty | TileState::Error => {
                inner.state = TileState::Loading;
                inner.error = None;
                inner.attempts += 1;
                true
            }
        }
    }

    /// Store a fetched payload and mark the tile loaded.
    pub fn load_image(&self, data: Bytes) {
        let mut inner = self.inner.lock();
        inner.state = TileState::Loaded;
        inner.payload = Some(data);
        inner.placeholder = None;
        inner.error = None;
    }

    /// Mark the tile failed with `message`.
    ///
    /// Any existing payload or placeholder stays visible.
    pub fn set_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.state = TileState::Error;
        inner.error = Some(message.into());
    }

    /// Release the loading claim and report whether the job succeeded.
    ///
    /// A tile still in `Loading` at this point lost its job without an
    /// outcome and is moved to `Error`.
    pub fn finish_loading(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == TileState::Loading {
            inner.state = TileState::Error;
            inner.error = Some(INTERRUPTED_MESSAGE.to_string());
        }
        inner.state == TileState::Loaded
    }

    /// Return a finished tile to `Empty` so it can be fetched again.
    ///
    /// The payload is kept so the old image stays visible during the reload.
    /// Returns `false` while a job holds the claim.
    pub fn reset(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == TileState::Loading {
            return false;
        }
        inner.state = TileState::Empty;
        inner.error = None;
        true
    }

    // =========================================================================
    // Images
    // =========================================================================

    /// The tile's own payload, if any.
    pub fn payload(&self) -> Option<Bytes> {
        self.inner.lock().payload.clone()
    }

    pub fn placeholder(&self) -> Option<Placeholder> {
        self.inner.lock().placeholder.clone()
    }

    /// Seed the tile with an ancestor image. Ignored once a payload exists.
    pub fn set_placeholder(&self, placeholder: Placeholder) {
        let mut inner = self.inner.lock();
        if inner.payload.is_none() {
            inner.placeholder = Some(placeholder);
        }
    }

    /// Best image available for display: the payload, else the placeholder.
    pub fn image(&self) -> Option<Bytes> {
        let inner = self.inner.lock();
        inner
            .payload
            .clone()
            .or_else(|| inner.placeholder.as_ref().map(|p| p.data.clone()))
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn put_value(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().metadata.insert(key.into(), value.into());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.inner.lock().metadata.get(key).cloned()
    }

    /// Snapshot of all metadata, ordered by key.
    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.inner.lock().metadata.clone()
    }

    /// Expiry time in epoch milliseconds, if the backend supplied one.
    pub fn expires(&self) -> Option<i64> {
        self.value(EXPIRES_KEY)?.parse().ok()
    }

    /// Returns true if the tile has an expiry at or before `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires().is_some_and(|expires| expires <= now_ms)
    }
}
