//! Redirect policy.
//!
//! The decision itself is a pure function of the per-request
//! [`RedirectState`], the `follow` flag and the `max` bound. Redirect hop `k`
//! (counting from 1) is followed iff `k <= max`, so `max == 0` refuses the
//! very first redirect.
//!
//! ```
//! use http_bridge::redirect::{RedirectDecision, RedirectPolicy, RedirectState};
//! use http_bridge::http::Uri;
//!
//! let policy = RedirectPolicy::new(true, 1);
//! let mut state = RedirectState::default();
//! let next: Uri = "https://f.test/next".parse().unwrap();
//!
//! assert_eq!(policy.decide(&mut state, Some(&next)), RedirectDecision::Follow);
//! assert_eq!(policy.decide(&mut state, Some(&next)), RedirectDecision::TooMany);
//! assert_eq!(state.count(), 2);
//! ```

use http::uri::Scheme;
use http::{header, Method, StatusCode, Uri};

use crate::ext::{MethodExt, StatusExt};
use crate::request::Headers;
use crate::Error;

/// Outcome of evaluating a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectDecision {
    /// Follow the redirect to the new location.
    Follow,
    /// Do not follow. The redirect response is the final one.
    StopAsFinal,
    /// The bound is exceeded. The transport must be aborted.
    TooMany,
}

/// Redirect bookkeeping owned by exactly one in-flight request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectState {
    count: u32,
    last_location: Option<Uri>,
}

impl RedirectState {
    /// Number of redirect hops evaluated while following.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Location of the last followed redirect.
    pub fn last_location(&self) -> Option<&Uri> {
        self.last_location.as_ref()
    }
}

/// Whether and how far redirects are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPolicy {
    follow: bool,
    max: u32,
}

impl RedirectPolicy {
    /// Create a policy.
    pub fn new(follow: bool, max: u32) -> Self {
        RedirectPolicy { follow, max }
    }

    /// Whether redirects are followed at all.
    pub fn follows(&self) -> bool {
        self.follow
    }

    /// Max followed hops.
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Evaluate one redirect response.
    ///
    /// A redirect without a location is not a redirect. It is answered with
    /// `StopAsFinal` and does not count as a hop. When not following, the
    /// answer is always `StopAsFinal`; the caller is expected to surface the
    /// redirect response rather than swallow it.
    pub fn decide(&self, state: &mut RedirectState, location: Option<&Uri>) -> RedirectDecision {
        let Some(location) = location else {
            return RedirectDecision::StopAsFinal;
        };

        if !self.follow {
            return RedirectDecision::StopAsFinal;
        }

        state.count = state.count.saturating_add(1);

        if state.count <= self.max {
            state.last_location = Some(location.clone());
            RedirectDecision::Follow
        } else {
            RedirectDecision::TooMany
        }
    }
}

/// Strategy for keeping `authorization` headers during redirects.
///
/// * `Never` never preserves `authorization` header in redirects.
/// * `SameHost` keeps the header only if the redirect goes to the same host with
///   the same scheme, or upgrades from `http` to `https`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RedirectAuthHeaders {
    /// Never preserve the `authorization` header on redirect. This is the default.
    Never,
    /// Preserve the `authorization` header when the redirect is to the same host.
    SameHost,
}

/// The request to issue when following a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    /// New uri.
    pub uri: Uri,
    /// Method, possibly changed to GET.
    pub method: Method,
    /// Headers carried over from the previous hop.
    pub headers: Headers,
}

impl RedirectTarget {
    /// Build the follow-up request for a redirect response.
    ///
    /// * 307/308 keep the method, except POST/PUT/PATCH and DELETE which give
    ///   `None`. Request bodies are never replayed.
    /// * 301/302/303 keep GET and HEAD, everything else becomes GET.
    ///
    /// `None` means the redirect response must be treated as final.
    pub fn for_response(
        previous: &RedirectTarget,
        status: StatusCode,
        location: Uri,
        auth: RedirectAuthHeaders,
    ) -> Option<RedirectTarget> {
        let method = &previous.method;

        let new_method = if status.is_redirect_retaining_status() {
            if method.need_request_body() || *method == Method::DELETE {
                return None;
            }
            method.clone()
        } else if matches!(*method, Method::GET | Method::HEAD) {
            method.clone()
        } else {
            Method::GET
        };

        let keep_auth_header = match auth {
            RedirectAuthHeaders::Never => false,
            RedirectAuthHeaders::SameHost => can_redirect_auth_header(&previous.uri, &location),
        };

        let mut headers = previous.headers.clone();
        if !keep_auth_header {
            headers.remove(header::AUTHORIZATION.as_str());
        }
        headers.remove(header::COOKIE.as_str());
        headers.remove(header::CONTENT_LENGTH.as_str());
        headers.remove(header::TRANSFER_ENCODING.as_str());

        Some(RedirectTarget {
            uri: location,
            method: new_method,
            headers,
        })
    }
}

fn can_redirect_auth_header(prev: &Uri, next: &Uri) -> bool {
    let host_prev = prev.authority().map(|a| a.host());
    let host_next = next.authority().map(|a| a.host());
    let scheme_prev = prev.scheme();
    let scheme_next = next.scheme();
    host_prev == host_next && (scheme_prev == scheme_next || scheme_next == Some(&Scheme::HTTPS))
}

/// Resolve a `Location` header value against the uri that produced it.
///
/// Handles absolute, scheme relative (`//host/path`), absolute path and
/// relative path locations. Dot segments are removed and fragments dropped.
pub fn resolve_location(base: &Uri, location: &str) -> Result<Uri, Error> {
    let bad = || Error::BadLocationHeader(location.to_string());

    let location = location.trim();
    let location = location.split_once('#').map(|s| s.0).unwrap_or(location);

    if location.is_empty() {
        return Err(bad());
    }

    if let Ok(uri) = location.parse::<Uri>() {
        if uri.scheme().is_some() && uri.authority().is_some() {
            return Ok(uri);
        }
    }

    let scheme = base.scheme_str().unwrap_or("http");

    if let Some(rest) = location.strip_prefix("//") {
        return format!("{}://{}", scheme, rest).parse().map_err(|_| bad());
    }

    let authority = base.authority().ok_or_else(bad)?;

    let (path, query) = match location.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (location, None),
    };

    let joined = if path.starts_with('/') {
        path.to_string()
    } else if path.is_empty() {
        base.path().to_string()
    } else {
        let base_path = base.path();
        let dir = &base_path[..base_path.rfind('/').map(|i| i + 1).unwrap_or(0)];
        format!("{}{}", dir, path)
    };

    let path = remove_dot_segments(&joined);

    // An empty reference keeps the base query.
    let query = query.or(if path_is_same(location) {
        base.query()
    } else {
        None
    });

    let uri = match query {
        Some(q) => format!("{}://{}{}?{}", scheme, authority, path, q),
        None => format!("{}://{}{}", scheme, authority, path),
    };

    uri.parse().map_err(|_| bad())
}

fn path_is_same(location: &str) -> bool {
    location.is_empty() || location.starts_with('?')
}

fn remove_dot_segments(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let last = segments.len() - 1;
    let mut out: Vec<&str> = Vec::with_capacity(segments.len());

    // segments[0] is the empty string before the leading slash.
    for (i, seg) in segments.iter().enumerate().skip(1) {
        match *seg {
            "." => {
                if i == last {
                    out.push("");
                }
            }
            ".." => {
                out.pop();
                if i == last {
                    out.push("");
                }
            }
            s => out.push(s),
        }
    }

    format!("/{}", out.join("/"))
}
