//! Attribution data carried by a tile source.

/// Terms-of-use text used when only a terms-of-use URL is configured.
pub const DEFAULT_TERMS_TEXT: &str = "Background Terms of Use";

/// Attribution fields a client should display alongside the tiles.
///
/// The core only carries these values; rendering them is up to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribution {
    text: Option<String>,
    link_url: Option<String>,
    image_url: Option<String>,
    terms_of_use_text: Option<String>,
    terms_of_use_url: Option<String>,
}

impl Attribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = non_empty(text.into());
        self
    }

    pub fn with_link_url(mut self, url: impl Into<String>) -> Self {
        self.link_url = non_empty(url.into());
        self
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = non_empty(url.into());
        self
    }

    pub fn with_terms_of_use_text(mut self, text: impl Into<String>) -> Self {
        self.terms_of_use_text = non_empty(text.into());
        self
    }

    pub fn with_terms_of_use_url(mut self, url: impl Into<String>) -> Self {
        self.terms_of_use_url = non_empty(url.into());
        self
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn link_url(&self) -> Option<&str> {
        self.link_url.as_deref()
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    /// Terms-of-use text, defaulting to [`DEFAULT_TERMS_TEXT`] when only a
    /// URL is configured.
    pub fn terms_of_use_text(&self) -> Option<&str> {
        self.terms_of_use_text
            .as_deref()
            .or_else(|| self.terms_of_use_url.as_ref().map(|_| DEFAULT_TERMS_TEXT))
    }

    pub fn terms_of_use_url(&self) -> Option<&str> {
        self.terms_of_use_url.as_deref()
    }

    /// Returns true if any attribution field is set.
    pub fn requires_attribution(&self) -> bool {
        self.text.is_some()
            || self.link_url.is_some()
            || self.image_url.is_some()
            || self.terms_of_use_text.is_some()
            || self.terms_of_use_url.is_some()
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_requires_nothing() {
        let attribution = Attribution::new();
        assert!(!attribution.requires_attribution());
        assert!(attribution.terms_of_use_text().is_none());
    }

    #[test]
    fn test_terms_text_defaults_with_url() {
        let attribution = Attribution::new().with_terms_of_use_url("https://example.com/terms");
        assert!(attribution.requires_attribution());
        assert_eq!(attribution.terms_of_use_text(), Some(DEFAULT_TERMS_TEXT));
    }

    #[test]
    fn test_explicit_terms_text_wins() {
        let attribution = Attribution::new()
            .with_terms_of_use_url("https://example.com/terms")
            .with_terms_of_use_text("Terms");
        assert_eq!(attribution.terms_of_use_text(), Some("Terms"));
    }

    #[test]
    fn test_blank_values_are_unset() {
        let attribution = Attribution::new().with_text("  ").with_link_url("");
        assert!(!attribution.requires_attribution());

        let attribution = Attribution::new().with_text("© OpenStreetMap contributors");
        assert!(attribution.requires_attribution());
        assert_eq!(attribution.text(), Some("© OpenStreetMap contributors"));
    }
}
