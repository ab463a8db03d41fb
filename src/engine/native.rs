//! The boundary to a native HTTP client.
//!
//! A native client is driven by the engine through [`NativeRequest`] and
//! reports back through [`RequestCallback`]. Callbacks may arrive on any
//! thread, but for a single request they must not overlap, and they must not
//! be made from inside a `NativeRequest` call.

use std::fmt;
use std::sync::Arc;

use http::{Method, StatusCode, Uri};

use crate::event::Failure;
use crate::redirect::RedirectTarget;
use crate::request::{Headers, RequestBody};
use crate::Error;

/// What a native client can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Request bodies can be streamed through an [`UploadSource`][crate::body::UploadSource].
    pub streaming_upload: bool,
    /// Callbacks can be bound to a single request.
    pub per_request_callbacks: bool,
}

impl Capabilities {
    /// Everything supported.
    pub fn full() -> Self {
        Capabilities {
            streaming_upload: true,
            per_request_callbacks: true,
        }
    }
}

/// The request handed to [`NativeClient::open()`].
#[derive(Debug)]
pub struct NativeRequestSpec {
    /// Target.
    pub uri: Uri,
    /// Method.
    pub method: Method,
    /// Headers, including any `authorization` and `content-length` the
    /// engine added.
    pub headers: Headers,
    /// Body for the first hop. Redirect hops never carry a body.
    pub body: RequestBody,
}

/// A redirect response reported by the native client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectInfo {
    /// Redirect status, 3xx.
    pub status: StatusCode,
    /// Reason phrase.
    pub status_text: Option<String>,
    /// Response headers.
    pub headers: Headers,
    /// The `location` as received. `None` if absent.
    ///
    /// Relative values are resolved against the uri of the current hop.
    pub location: Option<String>,
}

/// Final response head reported by the native client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    /// Uri of the hop that produced the response.
    pub uri: Uri,
    /// Status.
    pub status: StatusCode,
    /// Reason phrase.
    pub status_text: Option<String>,
    /// Response headers.
    pub headers: Headers,
}

/// Factory of native requests.
pub trait NativeClient: Send + Sync + 'static {
    /// What this client supports.
    fn capabilities(&self) -> Capabilities;

    /// Prepare a request. No network activity happens until
    /// [`NativeRequest::start()`].
    fn open(
        &self,
        spec: NativeRequestSpec,
        callback: Arc<dyn RequestCallback>,
    ) -> Result<Arc<dyn NativeRequest>, Error>;
}

/// One in-flight native request. All calls return without blocking.
pub trait NativeRequest: Send + Sync {
    /// Begin the exchange.
    fn start(&self);

    /// Continue to the target after [`RequestCallback::on_redirect_received()`].
    fn follow_redirect(&self, target: &RedirectTarget);

    /// Do not follow. Deliver the redirect response through
    /// [`RequestCallback::on_response_started()`] as the final response.
    fn stop_redirect(&self);

    /// Read up to `max` body bytes. Answered by
    /// [`RequestCallback::on_read_completed()`] or, at end of body,
    /// [`RequestCallback::on_succeeded()`].
    fn read(&self, max: usize);

    /// Abort. Answered by [`RequestCallback::on_canceled()`] unless the request
    /// already ended.
    fn cancel(&self);
}

/// Notifications from a native request.
pub trait RequestCallback: Send + Sync {
    /// A redirect response arrived. The request waits for
    /// [`NativeRequest::follow_redirect()`], [`NativeRequest::stop_redirect()`]
    /// or [`NativeRequest::cancel()`].
    fn on_redirect_received(&self, info: RedirectInfo);

    /// The final response head arrived.
    fn on_response_started(&self, info: ResponseInfo);

    /// A read finished.
    fn on_read_completed(&self, data: Vec<u8>);

    /// The body is fully read.
    fn on_succeeded(&self);

    /// The request failed.
    fn on_failed(&self, failure: Failure);

    /// The request was canceled.
    fn on_canceled(&self);
}

impl fmt::Debug for dyn NativeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeRequest")
    }
}
