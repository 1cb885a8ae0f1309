//! Networked tile services addressed by URL template.
//!
//! A map service is described by a [`MapServiceInfo`] (plain configuration,
//! built with `with_*` methods) and validated into a [`MapServiceSource`].
//!
//! # URL templates
//!
//! A base URL without placeholders gets the default path
//! `/{z}/{x}/{y}.{ext}` appended. A URL containing placeholders is used as
//! the full template. Supported placeholders:
//!
//! | Placeholder      | Value                         |
//! |------------------|-------------------------------|
//! | `{z}`, `{zoom}`  | zoom level                    |
//! | `{x}`            | tile column                   |
//! | `{y}`            | tile row (XYZ, north origin)  |
//! | `{-y}`           | tile row (TMS, south origin)  |
//! | `{ext}`          | file extension                |
//!
//! # Example
//!
//! ```
//! use tilefetch::source::{MapServiceInfo, MapServiceSource, TileSource};
//!
//! let info = MapServiceInfo::new("OSM", "https://tile.openstreetmap.org/");
//! let source = MapServiceSource::new(info).unwrap();
//! assert_eq!(source.tile_url(3, 1, 2), "https://tile.openstreetmap.org/3/1/2.png");
//! assert_eq!(source.max_zoom(), 21);
//! ```

use tracing::debug;

use super::attribution::Attribution;
use super::rules::{MetadataRules, NoTileRules, NO_TILE_VALUE, TILE_INFO_KEY};
use super::{TileSource, DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM};
use crate::coord::{grid_size, DEFAULT_TILE_SIZE};
use crate::error::SourceError;
use crate::loader::ResponseHeaders;

/// Path appended to base URLs that carry no placeholders.
pub const DEFAULT_PATH: &str = "/{z}/{x}/{y}.{ext}";

/// Default tile file extension.
pub const DEFAULT_EXTENSION: &str = "png";

const PLACEHOLDERS: [&str; 6] = ["{z}", "{zoom}", "{x}", "{y}", "{-y}", "{ext}"];

/// Configuration for a map service.
///
/// Zero values for zoom bounds and tile size mean "use the default".
#[derive(Debug, Clone)]
pub struct MapServiceInfo {
    pub name: String,
    pub id: Option<String>,
    pub url: String,
    pub extension: String,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub tile_size: u32,
    pub mod_tile_features: bool,
    pub attribution: Attribution,
    /// Status codes meaning "no tile". Defaults to `[404]`.
    pub no_tile_status: Vec<u16>,
    /// Header name and whole-value regex pairs meaning "no tile".
    pub no_tile_headers: Vec<(String, String)>,
    /// Hash algorithm and hex digest pairs meaning "no tile".
    pub no_tile_checksums: Vec<(String, String)>,
    pub metadata: MetadataRules,
}

impl MapServiceInfo {
    /// Create a service description with default settings.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            url: url.into(),
            extension: DEFAULT_EXTENSION.to_string(),
            min_zoom: 0,
            max_zoom: 0,
            tile_size: 0,
            mod_tile_features: false,
            attribution: Attribution::default(),
            no_tile_status: vec![super::rules::DEFAULT_NO_TILE_STATUS],
            no_tile_headers: Vec::new(),
            no_tile_checksums: Vec::new(),
            metadata: MetadataRules::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_min_zoom(mut self, zoom: u8) -> Self {
        self.min_zoom = zoom;
        self
    }

    pub fn with_max_zoom(mut self, zoom: u8) -> Self {
        self.max_zoom = zoom;
        self
    }

    pub fn with_tile_size(mut self, size: u32) -> Self {
        self.tile_size = size;
        self
    }

    pub fn with_mod_tile_features(mut self, enabled: bool) -> Self {
        self.mod_tile_features = enabled;
        self
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = attribution;
        self
    }

    pub fn with_no_tile_status(mut self, status: u16) -> Self {
        if !self.no_tile_status.contains(&status) {
            self.no_tile_status.push(status);
        }
        self
    }

    pub fn with_no_tile_header(
        mut self,
        header: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        self.no_tile_headers.push((header.into(), pattern.into()));
        self
    }

    pub fn with_no_tile_checksum(
        mut self,
        algorithm: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        self.no_tile_checksums
            .push((algorithm.into(), digest.into()));
        self
    }

    pub fn with_metadata_header(mut self, header: impl Into<String>, key: impl Into<String>) -> Self {
        self.metadata = self.metadata.with_mapping(header, key);
        self
    }

    pub fn with_metadata_rules(mut self, rules: MetadataRules) -> Self {
        self.metadata = rules;
        self
    }
}

/// A validated map service.
#[derive(Debug, Clone)]
pub struct MapServiceSource {
    name: String,
    id: String,
    base_url: String,
    template: String,
    extension: String,
    min_zoom: u8,
    max_zoom: u8,
    tile_size: u32,
    mod_tile_features: bool,
    attribution: Attribution,
    no_tile: NoTileRules,
    metadata: MetadataRules,
}

impl MapServiceSource {
    /// Validate `info` and compile its rules.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidConfig`] for an empty URL or inverted
    /// zoom bounds, and [`SourceError::InvalidPattern`] for a no-tile header
    /// pattern that does not compile.
    pub fn new(info: MapServiceInfo) -> Result<Self, SourceError> {
        let base_url = info.url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SourceError::InvalidConfig(format!(
                "map service '{}' has no URL",
                info.name
            )));
        }

        let template = if PLACEHOLDERS.iter().any(|p| base_url.contains(p)) {
            base_url.clone()
        } else {
            format!("{}{}", base_url, DEFAULT_PATH)
        };

        let min_zoom = if info.min_zoom == 0 {
            DEFAULT_MIN_ZOOM
        } else {
            info.min_zoom
        };
        let max_zoom = if info.max_zoom == 0 {
            DEFAULT_MAX_ZOOM
        } else {
            info.max_zoom
        };
        if min_zoom > max_zoom {
            return Err(SourceError::InvalidConfig(format!(
                "min zoom {} exceeds max zoom {}",
                min_zoom, max_zoom
            )));
        }

        let mut no_tile = NoTileRules::none();
        for status in &info.no_tile_status {
            no_tile = no_tile.with_status(*status);
        }
        for (header, pattern) in &info.no_tile_headers {
            no_tile = no_tile.with_header_pattern(header.clone(), pattern)?;
        }
        for (algorithm, digest) in &info.no_tile_checksums {
            no_tile = no_tile.with_checksum(algorithm.clone(), digest.clone());
        }

        let id = info.id.unwrap_or_else(|| base_url.clone());
        debug!(id = %id, template = %template, "Map service source created");

        Ok(Self {
            name: info.name,
            id,
            base_url,
            template,
            extension: info.extension,
            min_zoom,
            max_zoom,
            tile_size: if info.tile_size == 0 {
                DEFAULT_TILE_SIZE
            } else {
                info.tile_size
            },
            mod_tile_features: info.mod_tile_features,
            attribution: info.attribution,
            no_tile,
            metadata: info.metadata,
        })
    }

    /// Base URL with any trailing `/` removed.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL template.
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn mod_tile_features(&self) -> bool {
        self.mod_tile_features
    }

    pub fn no_tile_rules(&self) -> &NoTileRules {
        &self.no_tile
    }

    pub fn metadata_rules(&self) -> &MetadataRules {
        &self.metadata
    }

    /// Metadata entries the response headers carry for the tile.
    pub fn metadata_from_headers(&self, headers: &ResponseHeaders) -> Vec<(String, String)> {
        self.metadata.extract(headers)
    }

    /// Decide whether a response means "no tile at this zoom level".
    ///
    /// Without a body only the status, header and `tile-info` rules are
    /// checked; with a body only the checksum rules are.
    pub fn is_no_tile_at_zoom(
        &self,
        status: u16,
        headers: &ResponseHeaders,
        body: Option<&[u8]>,
    ) -> bool {
        match body {
            Some(body) => self.no_tile.matches_body(body),
            None => {
                self.no_tile.matches_status(status)
                    || self.no_tile.matches_headers(headers)
                    || self
                        .metadata_from_headers(headers)
                        .iter()
                        .any(|(key, value)| key == TILE_INFO_KEY && value == NO_TILE_VALUE)
            }
        }
    }
}

impl TileSource for MapServiceSource {
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
        &self.extension
    }

    fn attribution(&self) -> &Attribution {
        &self.attribution
    }

    fn tile_url(&self, zoom: u8, x: u32, y: u32) -> String {
        let tms_y = grid_size(zoom).saturating_sub(1 + y as u64);
        self.template
            .replace("{zoom}", &zoom.to_string())
            .replace("{z}", &zoom.to_string())
            .replace("{x}", &x.to_string())
            .replace("{-y}", &tms_y.to_string())
            .replace("{y}", &y.to_string())
            .replace("{ext}", &self.extension)
    }

    fn tile_id(&self, zoom: u8, x: u32, y: u32) -> String {
        format!("{}/{}/{}/{}", self.base_url, zoom, x, y)
    }
}
