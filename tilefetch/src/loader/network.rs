//! Loader for networked tile services.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::http::{read_body, HttpClient, HttpRequest, HttpResponse, ResponseHeaders};
use super::{run_claimed, LoadOutcome, TileJob, TileLoader, TileLoaderListener};
use crate::dispatcher::{Job, JobDispatcher};
use crate::error::TileError;
use crate::source::MapServiceSource;
use crate::source::TileSource;
use crate::tile::{Tile, EXPIRES_KEY};

/// Retries a caller may attempt for a transiently failed network tile.
pub const NETWORK_MAX_RETRIES: u32 = 2;

/// Default `Accept` header.
pub const DEFAULT_ACCEPT: &str = "text/html, image/png, image/jpeg, image/gif, */*";

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str =
    concat!("tilefetch/", env!("CARGO_PKG_VERSION"), " (map tile loader)");

/// Request settings shared by every job of a network loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOptions {
    /// Headers sent with every request.
    pub headers: Vec<(String, String)>,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            headers: vec![
                ("Accept".to_string(), DEFAULT_ACCEPT.to_string()),
                ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
            ],
            connect_timeout: None,
            read_timeout: None,
        }
    }
}

impl NetworkOptions {
    /// Set a request header, replacing any header of the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Expiry time in epoch milliseconds announced by the response headers.
///
/// Uses the `Expires` HTTP date when it parses, otherwise the first valid
/// `max-age` directive of `Cache-Control` relative to `now_ms`. Malformed
/// values are ignored.
pub fn expiry_from_headers(headers: &ResponseHeaders, now_ms: i64) -> Option<i64> {
    if let Some(value) = headers.get("Expires") {
        match parse_expires(value) {
            Ok(ms) => return Some(ms),
            Err(e) => debug!(error = %e, "Ignoring Expires header"),
        }
    }

    headers
        .get_all("Cache-Control")
        .flat_map(|value| value.split(','))
        .find_map(|directive| match max_age_seconds(directive) {
            Ok(seconds) => seconds,
            Err(e) => {
                debug!(error = %e, "Ignoring max-age directive");
                None
            }
        })
        .map(|seconds| now_ms.saturating_add(seconds.saturating_mul(1000)))
}

fn parse_expires(value: &str) -> Result<i64, TileError> {
    DateTime::parse_from_rfc2822(value.trim())
        .map(|date| date.timestamp_millis())
        .map_err(|e| TileError::MalformedResponse(format!("Expires {:?}: {}", value, e)))
}

/// `Ok(None)` for directives other than `max-age`.
fn max_age_seconds(directive: &str) -> Result<Option<i64>, TileError> {
    let Some((name, value)) = directive.trim().split_once('=') else {
        return Ok(None);
    };
    if !name.trim().eq_ignore_ascii_case("max-age") {
        return Ok(None);
    }
    match value.trim().trim_matches('"').parse::<i64>() {
        Ok(seconds) if seconds >= 0 => Ok(Some(seconds)),
        _ => Err(TileError::MalformedResponse(format!(
            "Cache-Control directive {:?}",
            directive.trim()
        ))),
    }
}

struct NetworkInner {
    source: Arc<MapServiceSource>,
    client: Arc<dyn HttpClient>,
    options: NetworkOptions,
    dispatcher: JobDispatcher,
}

/// Loads tiles from a [`MapServiceSource`] over HTTP.
#[derive(Clone)]
pub struct MapServiceLoader {
    inner: Arc<NetworkInner>,
}

impl MapServiceLoader {
    pub fn new(
        source: Arc<MapServiceSource>,
        client: Arc<dyn HttpClient>,
        options: NetworkOptions,
        dispatcher: JobDispatcher,
    ) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                source,
                client,
                options,
                dispatcher,
            }),
        }
    }

    pub fn source(&self) -> &Arc<MapServiceSource> {
        &self.inner.source
    }

    pub fn options(&self) -> &NetworkOptions {
        &self.inner.options
    }

    /// Build the request for `url`. `force` adds cache-bypass headers.
    pub fn build_request(&self, url: String, force: bool) -> HttpRequest {
        let mut request = HttpRequest::new(url);
        request.headers = self.inner.options.headers.clone();
        request.read_timeout = self.inner.options.read_timeout;
        if force {
            request = request
                .with_header("Cache-Control", "no-cache")
                .with_header("Pragma", "no-cache");
        }
        request
    }

    fn fetch(&self, tile: &Tile, force: bool) -> LoadOutcome {
        let source = &self.inner.source;
        let address = tile.address();
        let url = source.tile_url(address.zoom(), address.x(), address.y());
        let request = self.build_request(url, force);
        debug!(tile = %tile.key(), url = %request.url, force, "Fetching tile");

        let HttpResponse {
            status,
            headers,
            body,
        } = match self.inner.client.get(&request) {
            Ok(response) => response,
            Err(e) => return LoadOutcome::Failed(e),
        };

        for (key, value) in source.metadata_from_headers(&headers) {
            tile.put_value(key, value);
        }
        if let Some(expires) = expiry_from_headers(&headers, Utc::now().timestamp_millis()) {
            tile.put_value(EXPIRES_KEY, expires.to_string());
        }

        if source.is_no_tile_at_zoom(status, &headers, None) {
            return LoadOutcome::NoTile;
        }
        if !(200..300).contains(&status) {
            return LoadOutcome::Failed(TileError::Transport(format!(
                "HTTP {} from {}",
                status, request.url
            )));
        }

        let data = match read_body(body) {
            Ok(data) => data,
            Err(e) => return LoadOutcome::Failed(e),
        };
        if source.is_no_tile_at_zoom(status, &headers, Some(&data)) {
            LoadOutcome::NoTile
        } else {
            LoadOutcome::Loaded(data)
        }
    }
}

impl TileLoader for MapServiceLoader {
    fn create_tile_loader_job(
        &self,
        tile: Arc<Tile>,
        listener: Arc<dyn TileLoaderListener>,
    ) -> Box<dyn TileJob> {
        Box::new(NetworkJob {
            loader: self.clone(),
            tile,
            listener,
            force: false,
        })
    }

    fn max_load_retries(&self) -> u32 {
        NETWORK_MAX_RETRIES
    }

    fn dispatcher(&self) -> &JobDispatcher {
        &self.inner.dispatcher
    }
}

impl fmt::Debug for MapServiceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapServiceLoader")
            .field("source", &self.inner.source.id())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

struct NetworkJob {
    loader: MapServiceLoader,
    tile: Arc<Tile>,
    listener: Arc<dyn TileLoaderListener>,
    force: bool,
}

impl Job for NetworkJob {
    fn name(&self) -> String {
        format!("network {}", self.tile.key())
    }

    fn run(self: Box<Self>) {
        run_claimed(&self.tile, &self.listener, || {
            self.loader.fetch(&self.tile, self.force)
        });
    }
}

impl TileJob for NetworkJob {
    fn tile(&self) -> &Arc<Tile> {
        &self.tile
    }

    fn start_tile_load(mut self: Box<Self>, force: bool) {
        self.force = force;
        let dispatcher = self.loader.inner.dispatcher.clone();
        dispatcher.execute(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileAddress;
    use crate::error::NO_TILE_MESSAGE;
    use crate::loader::{MockHttpClient, MockResponse};
    use crate::source::MapServiceInfo;
    use bytes::Bytes;
    use parking_lot::Mutex;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    struct Harness {
        loader: MapServiceLoader,
        client: Arc<MockHttpClient>,
        calls: Arc<Mutex<Vec<bool>>>,
        listener: Arc<dyn TileLoaderListener>,
    }

    impl Harness {
        fn new(info: MapServiceInfo, response: Result<MockResponse, TileError>) -> Self {
            Self::with_options(info, response, NetworkOptions::default())
        }

        fn with_options(
            info: MapServiceInfo,
            response: Result<MockResponse, TileError>,
            options: NetworkOptions,
        ) -> Self {
            let client = Arc::new(MockHttpClient::new(response));
            let source = Arc::new(MapServiceSource::new(info).unwrap());
            let loader = MapServiceLoader::new(
                source,
                client.clone(),
                options,
                JobDispatcher::new(1),
            );
            let calls = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&calls);
            let listener: Arc<dyn TileLoaderListener> =
                Arc::new(move |_: &Arc<Tile>, success: bool| sink.lock().push(success));
            Self {
                loader,
                client,
                calls,
                listener,
            }
        }

        /// Run a job for tile 4/3/5 on the current thread.
        fn run(&self, force: bool) -> Arc<Tile> {
            let tile = Arc::new(Tile::new("t", TileAddress::new(3, 5, 4).unwrap()));
            let job = NetworkJob {
                loader: self.loader.clone(),
                tile: Arc::clone(&tile),
                listener: Arc::clone(&self.listener),
                force,
            };
            Box::new(job).run();
            tile
        }

        fn calls(&self) -> Vec<bool> {
            self.calls.lock().clone()
        }
    }

    fn info() -> MapServiceInfo {
        MapServiceInfo::new("Test", "https://tiles.example.com")
    }

    #[test]
    fn test_loads_tile() {
        let h = Harness::new(info(), Ok(MockResponse::ok(b"png-bytes")));
        let tile = h.run(false);

        assert!(tile.is_loaded());
        assert_eq!(tile.payload(), Some(Bytes::from_static(b"png-bytes")));
        assert_eq!(h.calls(), vec![true]);

        let request = h.client.last_request().unwrap();
        assert_eq!(request.url, "https://tiles.example.com/4/3/5.png");
        assert_eq!(request.header("Accept"), Some(DEFAULT_ACCEPT));
        assert_eq!(request.header("User-Agent"), Some(DEFAULT_USER_AGENT));
        assert_eq!(request.header("Cache-Control"), None);
    }

    #[test]
    fn test_force_bypasses_caches() {
        let h = Harness::new(info(), Ok(MockResponse::ok(b"x")));
        h.run(true);

        let request = h.client.last_request().unwrap();
        assert_eq!(request.header("Cache-Control"), Some("no-cache"));
        assert_eq!(request.header("Pragma"), Some("no-cache"));
    }

    #[test]
    fn test_404_is_no_tile_without_reading_body() {
        let response = MockResponse::status(404).broken_body("must not be read");
        let h = Harness::new(info(), Ok(response));
        let tile = h.run(false);

        assert_eq!(tile.error().as_deref(), Some(NO_TILE_MESSAGE));
        assert_eq!(h.calls(), vec![false]);
    }

    #[test]
    fn test_server_error_is_transport_failure() {
        let h = Harness::new(info(), Ok(MockResponse::status(503)));
        let tile = h.run(false);

        let error = tile.error().unwrap();
        assert!(error.contains("503"), "unexpected error: {}", error);
        assert_eq!(h.calls(), vec![false]);
    }

    #[test]
    fn test_client_error_recorded() {
        let h = Harness::new(info(), Err(TileError::Transport("connection refused".into())));
        let tile = h.run(false);

        assert_eq!(tile.error().as_deref(), Some("connection refused"));
        assert_eq!(h.calls(), vec![false]);
    }

    #[test]
    fn test_broken_body_recorded() {
        let h = Harness::new(info(), Ok(MockResponse::ok(b"").broken_body("reset by peer")));
        let tile = h.run(false);

        assert!(tile.error().unwrap().contains("reset by peer"));
        assert_eq!(h.calls(), vec![false]);
    }

    #[test]
    fn test_metadata_headers_copied() {
        let response = MockResponse::ok(b"x")
            .with_header("X-VE-TILEMETA-CaptureDatesRange", "1/1/2019-6/1/2019")
            .with_header("X-Custom", "abc");
        let h = Harness::new(info().with_metadata_header("X-Custom", "custom"), Ok(response));
        let tile = h.run(false);

        assert!(tile.is_loaded());
        assert_eq!(tile.value("capture-date").as_deref(), Some("1/1/2019-6/1/2019"));
        assert_eq!(tile.value("custom").as_deref(), Some("abc"));
    }

    #[test]
    fn test_tile_info_no_tile() {
        let response = MockResponse::ok(b"x").with_header("X-VE-Tile-Info", "no-tile");
        let h = Harness::new(info(), Ok(response));
        let tile = h.run(false);

        assert_eq!(tile.error().as_deref(), Some(NO_TILE_MESSAGE));
        assert_eq!(tile.value("tile-info").as_deref(), Some("no-tile"));
    }

    #[test]
    fn test_checksum_no_tile() {
        let h = Harness::new(
            info().with_no_tile_checksum("sha-256", EMPTY_SHA256),
            Ok(MockResponse::ok(b"")),
        );
        let tile = h.run(false);
        assert_eq!(tile.error().as_deref(), Some(NO_TILE_MESSAGE));
    }

    #[test]
    fn test_header_pattern_no_tile() {
        let h = Harness::new(
            info().with_no_tile_header("X-Tile-Missing", "yes|true"),
            Ok(MockResponse::ok(b"x").with_header("x-tile-missing", "true")),
        );
        let tile = h.run(false);
        assert_eq!(tile.error().as_deref(), Some(NO_TILE_MESSAGE));
    }

    #[test]
    fn test_max_age_sets_expiry() {
        let before = Utc::now().timestamp_millis();
        let response = MockResponse::ok(b"x").with_header("Cache-Control", "public, max-age=60");
        let h = Harness::new(info(), Ok(response));
        let tile = h.run(false);
        let after = Utc::now().timestamp_millis();

        let expires = tile.expires().unwrap();
        assert!(expires >= before + 60_000);
        assert!(expires <= after + 60_000);
    }

    #[test]
    fn test_custom_headers_and_timeout() {
        let options = NetworkOptions::default()
            .with_header("user-agent", "my-app/1.0")
            .with_header("Referer", "https://example.com")
            .with_read_timeout(Duration::from_secs(7));
        let h = Harness::with_options(info(), Ok(MockResponse::ok(b"x")), options);
        h.run(false);

        let request = h.client.last_request().unwrap();
        assert_eq!(request.header("User-Agent"), Some("my-app/1.0"));
        assert_eq!(request.header("Referer"), Some("https://example.com"));
        assert_eq!(request.read_timeout, Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_loaded_tile_not_refetched() {
        let h = Harness::new(info(), Ok(MockResponse::ok(b"x")));
        let tile = Arc::new(Tile::new("t", TileAddress::new(0, 0, 0).unwrap()));
        tile.init_loading();
        tile.load_image(Bytes::from_static(b"cached"));
        tile.finish_loading();

        h.loader
            .create_tile_loader_job(Arc::clone(&tile), Arc::clone(&h.listener))
            .run();

        assert_eq!(h.client.request_count(), 0);
        assert!(h.calls().is_empty());
    }

    #[test]
    fn test_max_retries() {
        let h = Harness::new(info(), Ok(MockResponse::ok(b"x")));
        assert_eq!(h.loader.max_load_retries(), NETWORK_MAX_RETRIES);
    }

    mod expiry {
        use super::*;

        fn headers(pairs: &[(&str, &str)]) -> ResponseHeaders {
            pairs.iter().copied().collect()
        }

        #[test]
        fn test_expires_header() {
            let h = headers(&[("Expires", "Wed, 21 Oct 2015 07:28:00 GMT")]);
            assert_eq!(expiry_from_headers(&h, 0), Some(1_445_412_480_000));
        }

        #[test]
        fn test_expires_wins_over_max_age() {
            let h = headers(&[
                ("Expires", "Wed, 21 Oct 2015 07:28:00 GMT"),
                ("Cache-Control", "max-age=60"),
            ]);
            assert_eq!(expiry_from_headers(&h, 0), Some(1_445_412_480_000));
        }

        #[test]
        fn test_malformed_expires_falls_back() {
            let h = headers(&[("Expires", "0"), ("Cache-Control", "max-age=10")]);
            assert_eq!(expiry_from_headers(&h, 1_000), Some(11_000));
        }

        #[test]
        fn test_malformed_max_age_ignored() {
            let h = headers(&[("Cache-Control", "max-age=soon, max-age=5")]);
            assert_eq!(expiry_from_headers(&h, 0), Some(5_000));

            let h = headers(&[("Cache-Control", "no-store, max-age=-1")]);
            assert_eq!(expiry_from_headers(&h, 0), None);
        }

        #[test]
        fn test_malformed_values_are_reported() {
            assert!(matches!(
                parse_expires("yesterday"),
                Err(TileError::MalformedResponse(_))
            ));
            assert!(matches!(
                max_age_seconds(" max-age=soon"),
                Err(TileError::MalformedResponse(msg)) if msg.contains("max-age=soon")
            ));
            assert_eq!(max_age_seconds("no-cache").unwrap(), None);
            assert_eq!(max_age_seconds("public=1").unwrap(), None);
            assert_eq!(max_age_seconds("MAX-AGE=\"30\"").unwrap(), Some(30));
        }

        #[test]
        fn test_no_headers() {
            assert_eq!(expiry_from_headers(&ResponseHeaders::new(), 42), None);
        }
    }
}
