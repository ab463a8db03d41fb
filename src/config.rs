use crate::body::DEFAULT_CAPACITY;
use crate::redirect::RedirectAuthHeaders;

/// Engine configuration.
///
/// ```
/// use http_bridge::Config;
///
/// let config = Config::new()
///     .with_max_redirects(10)
///     .with_event_buffer_limit(256 * 1024);
///
/// assert!(config.follow_redirects());
/// assert_eq!(config.max_redirects(), 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    buffer_capacity: usize,
    read_size: usize,
    event_buffer_limit: usize,
    follow_redirects: bool,
    max_redirects: u32,
    redirect_auth_headers: RedirectAuthHeaders,
    pump_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            buffer_capacity: DEFAULT_CAPACITY,
            read_size: 64 * 1024,
            event_buffer_limit: 64 * 1024,
            follow_redirects: true,
            max_redirects: 5,
            redirect_auth_headers: RedirectAuthHeaders::Never,
            pump_chunk_size: 4096,
        }
    }
}

impl Config {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capacity in bytes of upload backpressure buffers.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Max bytes asked for in each native read.
    pub fn read_size(&self) -> usize {
        self.read_size
    }

    /// Queued response bytes above which the engine stops issuing reads until
    /// the consumer drains.
    pub fn event_buffer_limit(&self) -> usize {
        self.event_buffer_limit
    }

    /// Default for [`RequestSpec`][crate::request::RequestSpec] redirect following.
    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    /// Default bound on followed redirect hops.
    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    /// How `authorization` headers are treated when following redirects.
    pub fn redirect_auth_headers(&self) -> RedirectAuthHeaders {
        self.redirect_auth_headers
    }

    /// Chunk size used by blocking body readers.
    pub fn pump_chunk_size(&self) -> usize {
        self.pump_chunk_size
    }

    /// Set the upload buffer capacity. Clamped to at least 1.
    pub fn with_buffer_capacity(mut self, v: usize) -> Self {
        self.buffer_capacity = v.max(1);
        self
    }

    /// Set the native read size. Clamped to at least 1.
    pub fn with_read_size(mut self, v: usize) -> Self {
        self.read_size = v.max(1);
        self
    }

    /// Set the queued byte limit for response events. Clamped to at least 1.
    pub fn with_event_buffer_limit(mut self, v: usize) -> Self {
        self.event_buffer_limit = v.max(1);
        self
    }

    /// Set the default for following redirects.
    pub fn with_follow_redirects(mut self, v: bool) -> Self {
        self.follow_redirects = v;
        self
    }

    /// Set the default redirect bound.
    pub fn with_max_redirects(mut self, v: u32) -> Self {
        self.max_redirects = v;
        self
    }

    /// Set the `authorization` redirect strategy.
    pub fn with_redirect_auth_headers(mut self, v: RedirectAuthHeaders) -> Self {
        self.redirect_auth_headers = v;
        self
    }

    /// Set the blocking reader chunk size. Clamped to at least 1.
    pub fn with_pump_chunk_size(mut self, v: usize) -> Self {
        self.pump_chunk_size = v.max(1);
        self
    }
}
