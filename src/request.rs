//! Request description handed to the engine.

use std::fmt;

use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri};

use crate::body::UploadSource;
use crate::redirect::RedirectPolicy;
use crate::util::AuthorityExt;
use crate::{Config, Error};

/// Ordered header list.
///
/// Unlike [`http::HeaderMap`], this keeps the exact insertion order, including
/// the relative order of repeated names.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(HeaderName, HeaderValue)>);

impl Headers {
    /// Create an empty list.
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    /// Append a header, keeping any existing ones with the same name.
    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.0.push((name, value));
    }

    /// Append a header, converting name and value.
    pub fn try_append<K, V>(&mut self, key: K, value: V) -> Result<(), Error>
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let name = HeaderName::try_from(key).map_err(|e| Error::BadHeader(http_err(e)))?;
        let value = HeaderValue::try_from(value).map_err(|e| Error::BadHeader(http_err(e)))?;
        self.append(name, value);
        Ok(())
    }

    /// First value for `name`, compared case insensitively.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.0
            .iter()
            .find(|(k, _)| k.as_str().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Last value for `name`.
    pub fn get_last(&self, name: &str) -> Option<&HeaderValue> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k.as_str().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// All values for `name` in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderValue> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k.as_str().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Tell if there is at least one header with `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every header with `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|(k, _)| !k.as_str().eq_ignore_ascii_case(name));
        before - self.0.len()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    /// Number of headers, counting repeated names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Tell if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert to an `http` header map.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.0.len());
        for (k, v) in &self.0 {
            map.append(k.clone(), v.clone());
        }
        map
    }
}

impl FromIterator<(HeaderName, HeaderValue)> for Headers {
    fn from_iter<T: IntoIterator<Item = (HeaderName, HeaderValue)>>(iter: T) -> Self {
        Headers(iter.into_iter().collect())
    }
}

impl From<&HeaderMap> for Headers {
    fn from(value: &HeaderMap) -> Self {
        value.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

fn http_err<E: Into<http::Error>>(e: E) -> String {
    let e: http::Error = e.into();
    e.to_string()
}

/// Request body source.
pub enum RequestBody {
    /// No body.
    Empty,
    /// A fixed body sent in one go.
    Bytes(Vec<u8>),
    /// A body streamed through a backpressure channel, see [`crate::body::channel()`].
    Stream(UploadSource),
}

impl RequestBody {
    /// Tell if this is a streamed body.
    pub fn is_stream(&self) -> bool {
        matches!(self, RequestBody::Stream(_))
    }

    /// Body length, if known up front.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => None,
            RequestBody::Bytes(v) => Some(v.len() as u64),
            RequestBody::Stream(s) => s.content_length(),
        }
    }

    /// Media type declared by a streamed body.
    pub fn content_type(&self) -> Option<&str> {
        match self {
            RequestBody::Stream(s) => s.content_type(),
            _ => None,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "Empty"),
            RequestBody::Bytes(v) => write!(f, "Bytes({})", v.len()),
            RequestBody::Stream(s) => write!(f, "Stream({:?})", s.content_length()),
        }
    }
}

/// An HTTP exchange to perform. Immutable once handed to the engine.
#[derive(Debug)]
pub struct RequestSpec {
    uri: Uri,
    method: Method,
    headers: Headers,
    body: RequestBody,
    follow_redirects: bool,
    max_redirects: u32,
}

impl RequestSpec {
    /// Start building a request. Redirect defaults come from [`Config::default()`].
    pub fn builder<U>(method: Method, uri: U) -> RequestSpecBuilder
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        let config = Config::default();
        let uri = Uri::try_from(uri).map_err(|e| Error::BadUri(http_err(e)));

        RequestSpecBuilder {
            inner: uri.map(|uri| RequestSpec {
                uri,
                method,
                headers: Headers::new(),
                body: RequestBody::Empty,
                follow_redirects: config.follow_redirects(),
                max_redirects: config.max_redirects(),
            }),
        }
    }

    /// Shorthand for a GET builder.
    pub fn get<U>(uri: U) -> RequestSpecBuilder
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        Self::builder(Method::GET, uri)
    }

    /// Shorthand for a POST builder.
    pub fn post<U>(uri: U) -> RequestSpecBuilder
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        Self::builder(Method::POST, uri)
    }

    /// Request uri.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request headers as configured by the caller.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Request body.
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Whether redirects are followed.
    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    /// Max number of redirect hops that are followed.
    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    /// The redirect policy for this request.
    pub fn redirect_policy(&self) -> RedirectPolicy {
        RedirectPolicy::new(self.follow_redirects, self.max_redirects)
    }

    /// Split into the parts sent to the native client, adding the headers
    /// the caller left out.
    pub(crate) fn into_parts(self) -> Result<(Uri, Method, Headers, RequestBody), Error> {
        let RequestSpec {
            uri,
            method,
            mut headers,
            body,
            ..
        } = self;

        if let Some(auth) = uri.authority() {
            if auth.userinfo().is_some() && !headers.contains(header::AUTHORIZATION.as_str()) {
                let user = auth.username().unwrap_or_default();
                let pass = auth.password().unwrap_or_default();
                let creds = BASE64_STANDARD.encode(format!("{}:{}", user, pass));
                headers.try_append(header::AUTHORIZATION, format!("Basic {}", creds))?;
            }
        }

        let has_body_header = headers.contains(header::CONTENT_LENGTH.as_str())
            || headers.contains(header::TRANSFER_ENCODING.as_str());

        if !has_body_header {
            if let Some(len) = body.content_length() {
                headers.append(header::CONTENT_LENGTH, HeaderValue::from(len));
            }
        }

        if let Some(mime) = body.content_type() {
            if !headers.contains(header::CONTENT_TYPE.as_str()) {
                headers.try_append(header::CONTENT_TYPE, mime)?;
            }
        }

        Ok((uri, method, headers, body))
    }
}

/// Builder for [`RequestSpec`]. Errors are held until [`build()`][Self::build].
#[derive(Debug)]
pub struct RequestSpecBuilder {
    inner: Result<RequestSpec, Error>,
}

impl RequestSpecBuilder {
    /// Append a header.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        if let Ok(spec) = &mut self.inner {
            if let Err(e) = spec.headers.try_append(key, value) {
                self.inner = Err(e);
            }
        }
        self
    }

    /// Send a fixed body.
    pub fn body(self, body: impl Into<Vec<u8>>) -> Self {
        self.map(|s| s.body = RequestBody::Bytes(body.into()))
    }

    /// Stream the body through an upload channel.
    pub fn stream(self, source: UploadSource) -> Self {
        self.map(|s| s.body = RequestBody::Stream(source))
    }

    /// Set whether redirects are followed.
    pub fn follow_redirects(self, v: bool) -> Self {
        self.map(|s| s.follow_redirects = v)
    }

    /// Set the max number of redirect hops that are followed.
    pub fn max_redirects(self, v: u32) -> Self {
        self.map(|s| s.max_redirects = v)
    }

    /// Take redirect defaults from a config.
    pub fn config(self, config: &Config) -> Self {
        let follow = config.follow_redirects();
        let max = config.max_redirects();
        self.map(|s| {
            s.follow_redirects = follow;
            s.max_redirects = max;
        })
    }

    /// Finish the request.
    pub fn build(self) -> Result<RequestSpec, Error> {
        self.inner
    }

    fn map(mut self, f: impl FnOnce(&mut RequestSpec)) -> Self {
        if let Ok(spec) = &mut self.inner {
            f(spec);
        }
        self
    }
}
