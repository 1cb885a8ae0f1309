//! Parsed configuration and the objects built from it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::file::ConfigFileError;
use crate::dispatcher::{JobDispatcher, DEFAULT_CONCURRENCY};
use crate::loader::{HttpClient, LoaderContext, NetworkOptions};
use crate::source::{Attribution, MapServiceInfo, MapServiceSource, MbTilesSource, Source};

/// Backend kind selected by `[source] type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    #[default]
    MapService,
    MbTiles,
}

/// `[source]` section.
///
/// Unset values fall back to the defaults of the selected backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceSettings {
    pub kind: SourceKind,
    pub name: Option<String>,
    pub id: Option<String>,
    pub url: Option<String>,
    pub extension: Option<String>,
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    pub tile_size: Option<u32>,
    pub mod_tile_features: bool,
    /// Extra status codes treated as "no tile", on top of 404.
    pub no_tile_status: Vec<u16>,
    pub path: Option<PathBuf>,
    pub flip_y: Option<bool>,
}

/// `[loader]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderSettings {
    pub concurrent_connections: usize,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            concurrent_connections: DEFAULT_CONCURRENCY,
            connect_timeout: None,
            read_timeout: None,
        }
    }
}

/// Contents of a tilefetch configuration file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TilefetchConfig {
    pub source: SourceSettings,
    pub attribution: Attribution,
    /// `[no_tile_headers]`: header name and whole-value pattern.
    pub no_tile_headers: Vec<(String, String)>,
    /// `[no_tile_checksums]`: algorithm and hex digest.
    pub no_tile_checksums: Vec<(String, String)>,
    /// `[metadata_headers]`: header name and metadata key.
    pub metadata_headers: Vec<(String, String)>,
    pub loader: LoaderSettings,
    /// `[headers]`: request headers sent with every tile request.
    pub headers: Vec<(String, String)>,
}

impl TilefetchConfig {
    /// Build the configured tile source.
    ///
    /// An MBTiles archive that cannot be opened still yields a source; its
    /// tiles fail with a backend-unavailable error.
    pub fn build_source(&self) -> Result<Source, ConfigFileError> {
        match self.source.kind {
            SourceKind::MapService => self.build_map_service(),
            SourceKind::MbTiles => self.build_mbtiles(),
        }
    }

    fn build_map_service(&self) -> Result<Source, ConfigFileError> {
        let settings = &self.source;
        let url = settings.url.clone().ok_or_else(|| missing("source", "url"))?;
        let name = settings.name.clone().unwrap_or_else(|| url.clone());

        let mut info = MapServiceInfo::new(name, url)
            .with_min_zoom(settings.min_zoom.unwrap_or(0))
            .with_max_zoom(settings.max_zoom.unwrap_or(0))
            .with_tile_size(settings.tile_size.unwrap_or(0))
            .with_mod_tile_features(settings.mod_tile_features)
            .with_attribution(self.attribution.clone());
        if let Some(id) = &settings.id {
            info = info.with_id(id.clone());
        }
        if let Some(extension) = &settings.extension {
            info = info.with_extension(extension.clone());
        }
        for status in &settings.no_tile_status {
            info = info.with_no_tile_status(*status);
        }
        for (header, pattern) in &self.no_tile_headers {
            info = info.with_no_tile_header(header.clone(), pattern.clone());
        }
        for (algorithm, digest) in &self.no_tile_checksums {
            info = info.with_no_tile_checksum(algorithm.clone(), digest.clone());
        }
        for (header, key) in &self.metadata_headers {
            info = info.with_metadata_header(header.clone(), key.clone());
        }

        Ok(Source::from(MapServiceSource::new(info)?))
    }

    fn build_mbtiles(&self) -> Result<Source, ConfigFileError> {
        let settings = &self.source;
        let path = settings.path.as_ref().ok_or_else(|| missing("source", "path"))?;

        let mut source = MbTilesSource::open(path).with_attribution(self.attribution.clone());
        if let Some(id) = &settings.id {
            source = source.with_id(id.clone());
        }
        if let Some(name) = settings.name.as_ref().or(settings.id.as_ref()) {
            source = source.with_name(name.clone());
        }
        if let Some(flip_y) = settings.flip_y {
            source = source.with_flip_y(flip_y);
        }
        if let Some(tile_size) = settings.tile_size {
            source = source.with_tile_size(tile_size);
        }
        Ok(Source::from(source))
    }

    /// Request headers and timeouts for the network loader.
    ///
    /// Configured headers replace the defaults with the same name.
    pub fn network_options(&self) -> NetworkOptions {
        let mut options = NetworkOptions::default();
        for (name, value) in &self.headers {
            options = options.with_header(name.clone(), value.clone());
        }
        if let Some(timeout) = self.loader.connect_timeout {
            options = options.with_connect_timeout(timeout);
        }
        if let Some(timeout) = self.loader.read_timeout {
            options = options.with_read_timeout(timeout);
        }
        options
    }

    /// Dispatcher sized to `[loader] concurrent_connections`.
    pub fn dispatcher(&self) -> JobDispatcher {
        JobDispatcher::new(self.loader.concurrent_connections)
    }

    /// Loader context with the configured network options on `dispatcher`.
    pub fn loader_context(&self, dispatcher: JobDispatcher) -> Result<LoaderContext, ConfigFileError> {
        Ok(LoaderContext::with_options(
            dispatcher,
            self.network_options(),
        )?)
    }

    /// Like [`loader_context`](Self::loader_context) with a caller-supplied client.
    pub fn loader_context_with_client(
        &self,
        dispatcher: JobDispatcher,
        client: Arc<dyn HttpClient>,
    ) -> LoaderContext {
        LoaderContext::with_client(dispatcher, client, self.network_options())
    }
}

fn missing(section: &str, key: &str) -> ConfigFileError {
    ConfigFileError::MissingValue {
        section: section.to_string(),
        key: key.to_string(),
    }
}
