//! INI parsing logic for converting `Ini` → `TilefetchConfig`.
//!
//! This is the single place where INI section and key names are mapped to
//! struct fields.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::{SourceKind, TilefetchConfig};
use crate::coord::MAX_ZOOM;
use crate::source::Attribution;

/// Parse an `Ini` object into a `TilefetchConfig`.
///
/// Starts from `TilefetchConfig::default()` and overlays any values found.
pub(super) fn parse_ini(ini: &Ini) -> Result<TilefetchConfig, ConfigFileError> {
    let mut config = TilefetchConfig::default();

    // [source] section
    if let Some(section) = ini.section(Some("source")) {
        let source = &mut config.source;
        if let Some(v) = section.get("type") {
            source.kind = match v.trim().to_lowercase().as_str() {
                "map_service" | "tms" => SourceKind::MapService,
                "mbtiles" => SourceKind::MbTiles,
                _ => {
                    return Err(invalid(
                        "source",
                        "type",
                        v,
                        "must be 'map_service' or 'mbtiles'",
                    ))
                }
            };
        }
        source.name = non_empty(section, "name");
        source.id = non_empty(section, "id");
        source.url = non_empty(section, "url");
        source.extension = non_empty(section, "extension");
        source.path = non_empty(section, "path").map(|v| expand_tilde(&v));

        if let Some(v) = section.get("min_zoom") {
            source.min_zoom = Some(parse_zoom("min_zoom", v)?);
        }
        if let Some(v) = section.get("max_zoom") {
            source.max_zoom = Some(parse_zoom("max_zoom", v)?);
        }
        if let Some(v) = section.get("tile_size") {
            source.tile_size = Some(parse("source", "tile_size", v, "must be a positive integer")?);
        }
        if let Some(v) = section.get("mod_tile_features") {
            source.mod_tile_features = parse_bool("source", "mod_tile_features", v)?;
        }
        if let Some(v) = section.get("flip_y") {
            source.flip_y = Some(parse_bool("source", "flip_y", v)?);
        }
        if let Some(v) = section.get("no_tile_status") {
            for code in v.split(',').map(str::trim).filter(|c| !c.is_empty()) {
                source.no_tile_status.push(parse(
                    "source",
                    "no_tile_status",
                    code,
                    "must be a comma-separated list of HTTP status codes",
                )?);
            }
        }
    }

    // [attribution] section
    if let Some(section) = ini.section(Some("attribution")) {
        let mut attribution = Attribution::new();
        if let Some(v) = section.get("text") {
            attribution = attribution.with_text(v);
        }
        if let Some(v) = section.get("link_url") {
            attribution = attribution.with_link_url(v);
        }
        if let Some(v) = section.get("image_url") {
            attribution = attribution.with_image_url(v);
        }
        if let Some(v) = section.get("terms_of_use_text") {
            attribution = attribution.with_terms_of_use_text(v);
        }
        if let Some(v) = section.get("terms_of_use_url") {
            attribution = attribution.with_terms_of_use_url(v);
        }
        config.attribution = attribution;
    }

    // Repeatable key/value sections
    config.no_tile_headers = pairs(ini, "no_tile_headers");
    config.no_tile_checksums = pairs(ini, "no_tile_checksums");
    config.metadata_headers = pairs(ini, "metadata_headers");
    config.headers = pairs(ini, "headers");

    // [loader] section
    if let Some(section) = ini.section(Some("loader")) {
        if let Some(v) = section.get("concurrent_connections") {
            let parsed: usize = parse("loader", "concurrent_connections", v, "must be a positive integer")?;
            if parsed == 0 {
                return Err(invalid("loader", "concurrent_connections", v, "must be at least 1"));
            }
            config.loader.concurrent_connections = parsed;
        }
        if let Some(v) = section.get("connect_timeout_ms") {
            config.loader.connect_timeout = parse_timeout("connect_timeout_ms", v)?;
        }
        if let Some(v) = section.get("read_timeout_ms") {
            config.loader.read_timeout = parse_timeout("read_timeout_ms", v)?;
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T: FromStr>(section: &str, key: &str, value: &str, reason: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(section, key, value, "must be true or false")),
    }
}

fn parse_zoom(key: &str, value: &str) -> Result<u8, ConfigFileError> {
    let zoom: u8 = parse("source", key, value, "must be a zoom level")?;
    if zoom > MAX_ZOOM {
        return Err(invalid("source", key, value, "zoom level too large"));
    }
    Ok(zoom)
}

/// `0` disables the timeout.
fn parse_timeout(key: &str, value: &str) -> Result<Option<Duration>, ConfigFileError> {
    let ms: u64 = parse("loader", key, value, "must be a positive integer (milliseconds)")?;
    Ok((ms > 0).then(|| Duration::from_millis(ms)))
}

fn non_empty(section: &Properties, key: &str) -> Option<String> {
    section
        .get(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Every key/value line of a section, repeated keys included, in file order.
fn pairs(ini: &Ini, name: &str) -> Vec<(String, String)> {
    ini.section(Some(name))
        .map(|section| {
            section
                .iter()
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
