//! HTTP client abstraction for testability

use std::fmt;
use std::io::Read;
use std::time::Duration;

use bytes::Bytes;

use crate::error::TileError;

/// A tile GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    /// Request headers in send order. Later entries win on duplicate names.
    pub headers: Vec<(String, String)>,
    /// Total time allowed for the response; `None` uses the client default.
    pub read_timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            read_timeout: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Last value set for `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response headers with case-insensitive lookup.
///
/// Repeated headers are kept in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    entries: Vec<(String, String)>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Last value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).last()
    }

    /// Every value of `name`, in arrival order.
    pub fn get_all<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a str> + 'b
    where
        'a: 'b,
    {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for ResponseHeaders
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// A response whose body has not been read yet.
///
/// Dropping the response releases the connection without reading the body.
pub struct HttpResponse {
    pub status: u16,
    pub headers: ResponseHeaders,
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: ResponseHeaders, body: Box<dyn Read + Send>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Returns true for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Read a response body to the end.
pub fn read_body(mut body: Box<dyn Read + Send>) -> Result<Bytes, TileError> {
    let mut buf = Vec::new();
    body.read_to_end(&mut buf)
        .map_err(|e| TileError::Transport(format!("Failed to read response: {}", e)))?;
    Ok(Bytes::from(buf))
}

/// Trait for HTTP client operations.
///
/// This abstraction allows for dependency injection and easier testing
/// by enabling mock HTTP clients in tests.
pub trait HttpClient: Send + Sync {
    /// Performs an HTTP GET request.
    ///
    /// Any status code is a successful response at this level; only
    /// connection and protocol failures are errors.
    ///
    /// # Arguments
    ///
    /// * `request` - URL, headers and timeout for the request
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TileError>;
}

/// Real HTTP client implementation using reqwest.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a new ReqwestClient with custom timeouts.
    ///
    /// # Arguments
    ///
    /// * `connect_timeout` - Time allowed to establish a connection
    /// * `read_timeout` - Default total time allowed per request
    pub fn with_timeouts(
        connect_timeout: Option<Duration>,
        read_timeout: Option<Duration>,
    ) -> Result<Self, TileError> {
        let mut builder = reqwest::blocking::Client::builder().timeout(read_timeout);
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            TileError::BackendUnavailable(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TileError> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.read_timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .map_err(|e| TileError::Transport(format!("Request failed: {}", e)))?;

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Ok(HttpResponse::new(
            response.status().as_u16(),
            headers,
            Box::new(response),
        ))
    }
}

impl fmt::Debug for ReqwestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestClient").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::{self, Cursor};

    /// Canned response returned by [`MockHttpClient`].
    #[derive(Clone)]
    pub struct MockResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: Result<Vec<u8>, String>,
    }

    impl MockResponse {
        pub fn ok(body: &[u8]) -> Self {
            Self {
                status: 200,
                headers: Vec::new(),
                body: Ok(body.to_vec()),
            }
        }

        pub fn status(status: u16) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body: Ok(Vec::new()),
            }
        }

        pub fn with_header(mut self, name: &str, value: &str) -> Self {
            self.headers.push((name.to_string(), value.to_string()));
            self
        }

        /// Body that fails with an I/O error when read.
        pub fn broken_body(mut self, message: &str) -> Self {
            self.body = Err(message.to_string());
            self
        }
    }

    struct FailingReader(String);

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, self.0.clone()))
        }
    }

    /// Mock HTTP client for testing. Records every request it receives.
    pub struct MockHttpClient {
        pub response: Result<MockResponse, TileError>,
        pub requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockHttpClient {
        pub fn new(response: Result<MockResponse, TileError>) -> Self {
            Self {
                response,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().len()
        }

        pub fn last_request(&self) -> Option<HttpRequest> {
            self.requests.lock().last().cloned()
        }
    }

    impl HttpClient for MockHttpClient {
        fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TileError> {
            self.requests.lock().push(request.clone());
            let canned = self.response.clone()?;
            let body: Box<dyn Read + Send> = match canned.body {
                Ok(bytes) => Box::new(Cursor::new(bytes)),
                Err(message) => Box::new(FailingReader(message)),
            };
            Ok(HttpResponse::new(
                canned.status,
                canned.headers.into_iter().collect(),
                body,
            ))
        }
    }

    #[test]
    fn test_headers_case_insensitive() {
        let headers: ResponseHeaders = vec![
            ("Content-Type", "image/png"),
            ("x-tile", "a"),
            ("X-Tile", "b"),
        ]
        .into_iter()
        .collect();

        assert_eq!(headers.get("content-type"), Some("image/png"));
        assert_eq!(headers.get("X-TILE"), Some("b"));
        assert_eq!(headers.get_all("x-tile").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(headers.get("missing"), None);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_request_header_last_wins() {
        let request = HttpRequest::new("http://example.com/1/2/3.png")
            .with_header("Accept", "*/*")
            .with_header("accept", "image/png");
        assert_eq!(request.header("ACCEPT"), Some("image/png"));
    }

    #[test]
    fn test_is_success() {
        let ok = HttpResponse::new(204, ResponseHeaders::new(), Box::new(io::empty()));
        let missing = HttpResponse::new(404, ResponseHeaders::new(), Box::new(io::empty()));
        assert!(ok.is_success());
        assert!(!missing.is_success());
    }

    #[test]
    fn test_mock_client_records_requests() {
        let mock = MockHttpClient::new(Ok(MockResponse::ok(&[1, 2, 3])));
        let response = mock.get(&HttpRequest::new("http://example.com")).unwrap();
        assert_eq!(read_body(response.body).unwrap(), Bytes::from_static(&[1, 2, 3]));
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn test_reqwest_client_builds_with_optional_timeouts() {
        assert!(ReqwestClient::with_timeouts(None, None).is_ok());
        assert!(
            ReqwestClient::with_timeouts(Some(Duration::from_secs(5)), Some(Duration::from_secs(30)))
                .is_ok()
        );
    }

    #[test]
    fn test_read_body_error_is_transport() {
        let mock = MockHttpClient::new(Ok(MockResponse::ok(b"").broken_body("reset")));
        let response = mock.get(&HttpRequest::new("http://example.com")).unwrap();
        let err = read_body(response.body).unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("reset"));
    }
}
