//! Backend-specific response rules: "no tile at this zoom" detection and
//! metadata extraction from response headers.
//!
//! No-tile rules are OR-combined and evaluated cheapest first: status code,
//! then header patterns, then body checksums. The first match wins.

use std::collections::HashMap;
use std::fmt;

use regex::Regex;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use tracing::debug;

use crate::error::SourceError;
use crate::loader::ResponseHeaders;

/// Status code treated as "no tile" unless configured otherwise.
pub const DEFAULT_NO_TILE_STATUS: u16 = 404;

/// Metadata key for the backend's tile-info header.
pub const TILE_INFO_KEY: &str = "tile-info";

/// Metadata key for the backend's capture-date header.
pub const CAPTURE_DATE_KEY: &str = "capture-date";

/// `tile-info` value that marks a tile as absent.
pub const NO_TILE_VALUE: &str = "no-tile";

/// Header to metadata-key mappings applied to map services by default.
pub const DEFAULT_METADATA_HEADERS: [(&str, &str); 2] = [
    ("X-VE-TILEMETA-CaptureDatesRange", CAPTURE_DATE_KEY),
    ("X-VE-Tile-Info", TILE_INFO_KEY),
];

// =============================================================================
// Checksums
// =============================================================================

/// Hash algorithms accepted for no-tile checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Parse an algorithm name such as `SHA-256` or `sha256`.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "sha224" => Some(Self::Sha224),
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Lowercase hex digest of `data`.
    pub fn hex_digest(&self, data: &[u8]) -> String {
        match self {
            Self::Sha224 => to_hex(&Sha224::digest(data)),
            Self::Sha256 => to_hex(&Sha256::digest(data)),
            Self::Sha384 => to_hex(&Sha384::digest(data)),
            Self::Sha512 => to_hex(&Sha512::digest(data)),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        };
        f.write_str(name)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// =============================================================================
// No-tile rules
// =============================================================================

/// Rules deciding whether a response means "no tile at this zoom level".
#[derive(Debug, Clone)]
pub struct NoTileRules {
    status_codes: Vec<u16>,
    headers: Vec<(String, Regex)>,
    checksums: Vec<(String, String)>,
}

impl Default for NoTileRules {
    fn default() -> Self {
        Self {
            status_codes: vec![DEFAULT_NO_TILE_STATUS],
            headers: Vec::new(),
            checksums: Vec::new(),
        }
    }
}

impl NoTileRules {
    /// Rules with only the default 404 status check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules that match nothing.
    pub fn none() -> Self {
        Self {
            status_codes: Vec::new(),
            headers: Vec::new(),
            checksums: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        if !self.status_codes.contains(&status) {
            self.status_codes.push(status);
        }
        self
    }

    /// Add a header rule. `pattern` must match the whole header value.
    pub fn with_header_pattern(
        mut self,
        header: impl Into<String>,
        pattern: &str,
    ) -> Result<Self, SourceError> {
        let header = header.into();
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| {
            SourceError::InvalidPattern {
                header: header.clone(),
                source,
            }
        })?;
        self.headers.push((header, regex));
        Ok(self)
    }

    /// Add a checksum rule. Unknown algorithm names are kept and skipped at
    /// evaluation time.
    pub fn with_checksum(mut self, algorithm: impl Into<String>, digest: impl Into<String>) -> Self {
        self.checksums.push((algorithm.into(), digest.into()));
        self
    }

    pub fn status_codes(&self) -> &[u16] {
        &self.status_codes
    }

    pub fn has_checksums(&self) -> bool {
        !self.checksums.is_empty()
    }

    pub fn matches_status(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }

    /// Returns true if any configured header pattern matches any value of
    /// its header.
    pub fn matches_headers(&self, headers: &ResponseHeaders) -> bool {
        self.headers.iter().any(|(name, regex)| {
            headers.get_all(name).any(|value| {
                let matched = regex.is_match(value);
                if matched {
                    debug!(header = %name, value, "No-tile header matched");
                }
                matched
            })
        })
    }

    /// Returns true if the body's digest matches a configured checksum.
    pub fn matches_body(&self, body: &[u8]) -> bool {
        let mut digests: HashMap<ChecksumAlgorithm, String> = HashMap::new();
        for (name, expected) in &self.checksums {
            let Some(algorithm) = ChecksumAlgorithm::parse(name) else {
                debug!(algorithm = %name, "Skipping checksum with unknown algorithm");
                continue;
            };
            let actual = digests
                .entry(algorithm)
                .or_insert_with(|| algorithm.hex_digest(body));
            if actual.eq_ignore_ascii_case(expected.trim()) {
                debug!(%algorithm, "No-tile checksum matched");
                return true;
            }
        }
        false
    }
}

// =============================================================================
// Metadata extraction
// =============================================================================

/// Maps response header names to tile metadata keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRules {
    mappings: Vec<(String, String)>,
}

impl Default for MetadataRules {
    fn default() -> Self {
        Self {
            mappings: DEFAULT_METADATA_HEADERS
                .iter()
                .map(|(h, k)| (h.to_string(), k.to_string()))
                .collect(),
        }
    }
}

impl MetadataRules {
    /// The default map-service mappings.
    pub fn new() -> Self {
        Self::default()
    }

    /// No mappings.
    pub fn empty() -> Self {
        Self {
            mappings: Vec::new(),
        }
    }

    /// Map `header` to metadata `key`, replacing any existing mapping of
    /// that header.
    pub fn with_mapping(mut self, header: impl Into<String>, key: impl Into<String>) -> Self {
        let header = header.into();
        self.mappings.retain(|(h, _)| !h.eq_ignore_ascii_case(&header));
        self.mappings.push((header, key.into()));
        self
    }

    pub fn mappings(&self) -> &[(String, String)] {
        &self.mappings
    }

    /// Metadata entries found in `headers`, in application order.
    ///
    /// A repeated header yields one entry per value, so the last one wins
    /// when applied to a tile.
    pub fn extract(&self, headers: &ResponseHeaders) -> Vec<(String, String)> {
        self.mappings
            .iter()
            .flat_map(|(header, key)| {
                headers
                    .get_all(header)
                    .map(move |value| (key.clone(), value.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn headers(pairs: &[(&str, &str)]) -> ResponseHeaders {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(ChecksumAlgorithm::parse("SHA-256"), Some(ChecksumAlgorithm::Sha256));
        assert_eq!(ChecksumAlgorithm::parse("sha512"), Some(ChecksumAlgorithm::Sha512));
        assert_eq!(ChecksumAlgorithm::parse("Sha-224"), Some(ChecksumAlgorithm::Sha224));
        assert_eq!(ChecksumAlgorithm::parse("SHA384"), Some(ChecksumAlgorithm::Sha384));
        assert_eq!(ChecksumAlgorithm::parse("MD5"), None);
    }

    #[test]
    fn test_hex_digest() {
        assert_eq!(ChecksumAlgorithm::Sha256.hex_digest(b""), EMPTY_SHA256);
        assert_eq!(ChecksumAlgorithm::Sha224.hex_digest(b"").len(), 56);
        assert_eq!(ChecksumAlgorithm::Sha512.hex_digest(b"").len(), 128);
    }

    #[test]
    fn test_default_rules_match_404_only() {
        let rules = NoTileRules::new();
        assert!(rules.matches_status(404));
        assert!(!rules.matches_status(200));
        assert!(!rules.matches_status(500));
        assert!(!NoTileRules::none().matches_status(404));
    }

    #[test]
    fn test_header_pattern_is_whole_value() {
        let rules = NoTileRules::none()
            .with_header_pattern("X-Tile-Status", "empty|none")
            .unwrap();
        assert!(rules.matches_headers(&headers(&[("x-tile-status", "empty")])));
        assert!(rules.matches_headers(&headers(&[("X-Tile-Status", "none")])));
        assert!(!rules.matches_headers(&headers(&[("X-Tile-Status", "not-empty")])));
        assert!(!rules.matches_headers(&headers(&[("Other", "empty")])));
    }

    #[test]
    fn test_header_pattern_any_repeated_value() {
        let rules = NoTileRules::none().with_header_pattern("X-A", "b").unwrap();
        assert!(rules.matches_headers(&headers(&[("X-A", "a"), ("X-A", "b")])));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = NoTileRules::none()
            .with_header_pattern("X-A", "(")
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidPattern { .. }));
    }

    #[test]
    fn test_checksum_case_insensitive() {
        let rules = NoTileRules::none().with_checksum("SHA-256", EMPTY_SHA256.to_uppercase());
        assert!(rules.has_checksums());
        assert!(rules.matches_body(b""));
        assert!(!rules.matches_body(b"tile"));
    }

    #[test]
    fn test_unknown_algorithm_is_skipped() {
        let rules = NoTileRules::none()
            .with_checksum("MD5", "d41d8cd98f00b204e9800998ecf8427e")
            .with_checksum("sha256", EMPTY_SHA256);
        assert!(rules.matches_body(b""));

        let only_unknown = NoTileRules::none().with_checksum("CRC32", "00000000");
        assert!(!only_unknown.matches_body(b""));
    }

    #[test]
    fn test_default_metadata_mappings() {
        let rules = MetadataRules::new();
        let extracted = rules.extract(&headers(&[
            ("x-ve-tile-info", "no-tile"),
            ("X-VE-TILEMETA-CaptureDatesRange", "1/1/2020-2/1/2020"),
            ("Unrelated", "x"),
        ]));
        assert_eq!(
            extracted,
            vec![
                (CAPTURE_DATE_KEY.to_string(), "1/1/2020-2/1/2020".to_string()),
                (TILE_INFO_KEY.to_string(), NO_TILE_VALUE.to_string()),
            ]
        );
    }

    #[test]
    fn test_custom_mapping_replaces_header() {
        let rules = MetadataRules::empty()
            .with_mapping("X-Date", "date")
            .with_mapping("x-date", "captured");
        assert_eq!(rules.mappings().len(), 1);

        let extracted = rules.extract(&headers(&[("X-Date", "a"), ("X-Date", "b")]));
        assert_eq!(
            extracted,
            vec![
                ("captured".to_string(), "a".to_string()),
                ("captured".to_string(), "b".to_string()),
            ]
        );
    }
}
