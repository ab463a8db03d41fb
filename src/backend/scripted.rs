//! A [`Transport`] answering from a script of raw HTTP/1.1 responses.
//!
//! Responses are keyed by uri. Several responses for one uri are served in
//! order, and the last one repeats. Every request that reaches the transport
//! is recorded together with its uploaded body.
//!
//! ```
//! use http_bridge::backend::scripted::{ScriptedResponse, ScriptedTransport};
//!
//! let transport = ScriptedTransport::new()
//!     .route("http://f.test/a", ScriptedResponse::redirect(302, "/b"))
//!     .route(
//!         "http://f.test/b",
//!         ScriptedResponse::raw("HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n")
//!             .chunks(["hel", "lo"]),
//!     );
//!
//! assert!(transport.received().is_empty());
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use http::{Method, StatusCode, Uri};
use parking_lot::Mutex;

use super::blocking::{Transport, TransportRequest, TransportResponse};
use crate::parser::{try_parse_partial_redirect, try_parse_response, MAX_RESPONSE_HEADERS};
use crate::request::Headers;

/// A scripted response.
#[derive(Clone, PartialEq, Eq)]
pub struct ScriptedResponse {
    head: Vec<u8>,
    chunks: Vec<Vec<u8>>,
    fail: Option<String>,
    body_error: Option<String>,
}

impl ScriptedResponse {
    /// A response with the given raw head, status line up to the empty line.
    pub fn raw(head: impl Into<Vec<u8>>) -> Self {
        ScriptedResponse {
            head: head.into(),
            chunks: Vec::new(),
            fail: None,
            body_error: None,
        }
    }

    /// A response with a status and no headers.
    pub fn status(code: u16) -> Self {
        let reason = StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("");
        Self::raw(format!("HTTP/1.1 {} {}\r\n\r\n", code, reason))
    }

    /// `200 OK`.
    pub fn ok() -> Self {
        Self::status(200)
    }

    /// A redirect with a `location` header.
    pub fn redirect(code: u16, location: &str) -> Self {
        Self::status(code).header("location", location)
    }

    /// The transport fails before producing a response.
    pub fn failure(message: &str) -> Self {
        let mut r = Self::raw(Vec::new());
        r.fail = Some(message.to_string());
        r
    }

    /// Add a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.head.ends_with(b"\r\n\r\n") {
            self.head.truncate(self.head.len() - 2);
        }
        self.head
            .extend_from_slice(format!("{}: {}\r\n\r\n", name, value).as_bytes());
        self
    }

    /// Body, delivered as one read per chunk.
    pub fn chunks<I, C>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        self.chunks = chunks.into_iter().map(|c| c.as_ref().to_vec()).collect();
        self
    }

    /// Body in one chunk.
    pub fn body(self, body: impl AsRef<[u8]>) -> Self {
        self.chunks([body])
    }

    /// Reading the body fails with `message` after the chunks.
    pub fn body_error(mut self, message: &str) -> Self {
        self.body_error = Some(message.to_string());
        self
    }

    fn into_transport(self) -> io::Result<TransportResponse> {
        if let Some(message) = self.fail {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, message));
        }

        let parsed = match try_parse_response::<MAX_RESPONSE_HEADERS>(&self.head) {
            Ok(Some((_, head))) => Some(head),
            Ok(None) => try_parse_partial_redirect::<MAX_RESPONSE_HEADERS>(&self.head)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        };

        let head = parsed.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "incomplete response head")
        })?;

        Ok(TransportResponse {
            status: head.status,
            status_text: head.status_text,
            headers: head.headers,
            body: Box::new(ChunkReader {
                chunks: self.chunks.into(),
                error: self.body_error,
            }),
        })
    }
}

impl fmt::Debug for ScriptedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedResponse")
            .field("head", &String::from_utf8_lossy(&self.head))
            .field("chunks", &self.chunks.len())
            .field("fail", &self.fail)
            .finish()
    }
}

/// Reads one chunk per call, splitting chunks only if `buf` is too small.
struct ChunkReader {
    chunks: VecDeque<Vec<u8>>,
    error: Option<String>,
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while let Some(mut chunk) = self.chunks.pop_front() {
            if chunk.is_empty() {
                continue;
            }
            let n = buf.len().min(chunk.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                chunk.drain(..n);
                self.chunks.push_front(chunk);
            }
            return Ok(n);
        }

        match self.error.take() {
            Some(message) => Err(io::Error::new(io::ErrorKind::ConnectionReset, message)),
            None => Ok(0),
        }
    }
}

/// A request as it reached the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRequest {
    /// Method.
    pub method: Method,
    /// Target.
    pub uri: Uri,
    /// Headers.
    pub headers: Headers,
    /// Uploaded body.
    pub body: Vec<u8>,
}

/// Serves [`ScriptedResponse`]s. Clones share the script and the record.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Script>>,
}

#[derive(Default)]
struct Script {
    routes: HashMap<String, VecDeque<ScriptedResponse>>,
    received: Vec<ReceivedRequest>,
}

impl ScriptedTransport {
    /// An empty script. Every request fails until routes are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a response for `uri`.
    pub fn route(self, uri: &str, response: ScriptedResponse) -> Self {
        self.add_route(uri, response);
        self
    }

    /// Add a response for `uri` to a shared transport.
    pub fn add_route(&self, uri: &str, response: ScriptedResponse) {
        let key = route_key(uri);
        self.inner
            .lock()
            .routes
            .entry(key)
            .or_default()
            .push_back(response);
    }

    /// Requests received so far, oldest first.
    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.inner.lock().received.clone()
    }

    fn next_response(&self, uri: &Uri) -> Option<ScriptedResponse> {
        let mut script = self.inner.lock();
        let queue = script.routes.get_mut(&uri.to_string())?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn route_key(uri: &str) -> String {
    uri.parse::<Uri>()
        .map(|u| u.to_string())
        .unwrap_or_else(|_| uri.to_string())
}

impl Transport for ScriptedTransport {
    fn execute(
        &self,
        request: &TransportRequest,
        body: &mut dyn Read,
    ) -> io::Result<TransportResponse> {
        let mut uploaded = Vec::new();
        body.read_to_end(&mut uploaded)?;

        self.inner.lock().received.push(ReceivedRequest {
            method: request.method.clone(),
            uri: request.uri.clone(),
            headers: request.headers.clone(),
            body: uploaded,
        });

        let response = self.next_response(&request.uri).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no scripted response for {}", request.uri),
            )
        })?;

        response.into_transport()
    }
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let script = self.inner.lock();
        f.debug_struct("ScriptedTransport")
            .field("routes", &script.routes.len())
            .field("received", &script.received.len())
            .finish()
    }
}
