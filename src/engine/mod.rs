//! Request lifecycle engine.
//!
//! The [`Engine`] turns the callbacks of a [`NativeClient`] into an ordered
//! stream of [`LifecycleEvent`]s. Each request is driven by an exchange that
//! moves through these phases:
//!
//! * **Idle** - Prepared, waiting for the consumer to start draining events
//! * **Started** - The native request is running
//! * **Redirecting** - A redirect arrived and is checked against the policy
//! * **HeadersReceived** - `ResponseStarted` was emitted
//! * **Streaming** - Body chunks are pulled one read at a time
//! * **Succeeded**, **Failed**, **TooManyRedirects** - Terminal
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │       Idle       │────────────────────────┐
//!                 └──────────────────┘                        │
//!                           │ first drain                     │
//!                           ▼                                 │
//!                 ┌──────────────────┐                        │
//!            ┌────│     Started      │───────────┐            │
//!            │    └──────────────────┘           │            │
//!            ▼                                   ▼            │
//!  ┌──────────────────┐  follow   ┌──────────────────┐        │
//!  │   Redirecting    │──────────▶│ HeadersReceived  │        │
//!  └──────────────────┘  or stop  └──────────────────┘        │
//!     │    ▲     │                          │                 │
//!     └────┘     │                          ▼                 │
//!     follow     │                ┌──────────────────┐        │
//!                │                │    Streaming     │──┐     │
//!                │                └──────────────────┘  │     │
//!                │                   │      ▲  read     │     │
//!                │                   │      └───────────┘     │
//!                ▼                   ▼                        ▼
//!  ┌────────────────────────────────────────────────────────────┐
//!  │           Succeeded | Failed | TooManyRedirects            │
//!  └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cancel and consumer disconnect lead from any non-terminal phase to
//! **Failed**. Exactly one terminal event is emitted per request, and reaching
//! a terminal phase releases the native request, aborts any upload and
//! removes the request from [`Engine::in_flight()`].
//!
//! # Example
//!
//! ```
//! use http_bridge::backend::scripted::{ScriptedResponse, ScriptedTransport};
//! use http_bridge::backend::BlockingClient;
//! use http_bridge::engine::Engine;
//! use http_bridge::event::LifecycleEvent;
//! use http_bridge::request::RequestSpec;
//! use http_bridge::Config;
//!
//! let transport = ScriptedTransport::new()
//!     .route("https://f.test/old", ScriptedResponse::redirect(301, "/new"))
//!     .route("https://f.test/new", ScriptedResponse::ok().chunks(["hel", "lo"]));
//!
//! let engine = Engine::new(BlockingClient::new(transport), Config::new());
//!
//! let spec = RequestSpec::get("https://f.test/old").build().unwrap();
//! let (_handle, events) = engine.start(spec);
//!
//! let mut body = Vec::new();
//! for event in events {
//!     match event {
//!         LifecycleEvent::ResponseStarted(r) => assert_eq!(r.status, 200),
//!         LifecycleEvent::ReadCompleted { data } => body.extend(data),
//!         LifecycleEvent::Succeeded => break,
//!         e => panic!("unexpected {:?}", e),
//!     }
//! }
//!
//! assert_eq!(body, b"hello");
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use http::Uri;
use parking_lot::Mutex;

mod exchange;
mod native;

#[cfg(test)]
mod test;

pub use native::{Capabilities, NativeClient, NativeRequest, NativeRequestSpec};
pub use native::{RedirectInfo, RequestCallback, ResponseInfo};

use exchange::{Exchange, Progress};

use crate::body::{self, StreamingBody, UploadSource};
use crate::event::{channel, EventChannel, EventSink, Failure, LifecycleEvent};
use crate::redirect::RedirectTarget;
use crate::registry::{Handle, Registry};
use crate::request::{RequestBody, RequestSpec};
use crate::{Config, Error};

/// Runs requests on a native client.
///
/// Cheap to clone. Clones share the native client and the table of in-flight
/// requests.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    client: Arc<dyn NativeClient>,
    config: Config,
    exchanges: Arc<Registry<Exchange>>,
}

impl Engine {
    /// Create an engine on top of `client`.
    pub fn new<C: NativeClient>(client: C, config: Config) -> Self {
        Self::with_client(Arc::new(client), config)
    }

    /// Create an engine sharing an already boxed client.
    pub fn with_client(client: Arc<dyn NativeClient>, config: Config) -> Self {
        Engine {
            inner: Arc::new(EngineInner {
                client,
                config,
                exchanges: Arc::new(Registry::new("req")),
            }),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Create an upload channel sized by this engine's configuration.
    pub fn body_channel(&self) -> Result<(StreamingBody, UploadSource), Error> {
        body::channel_with(&self.inner.config)
    }

    /// Prepare a request and return the channel its events arrive on.
    ///
    /// Nothing is sent until the channel is first drained. Problems found
    /// before the native request exists, such as a missing capability, are
    /// queued as a `Failed` event before this returns, and no native call is
    /// made.
    pub fn start(&self, spec: RequestSpec) -> (RequestHandle, EventChannel<LifecycleEvent>) {
        let (tx, rx) = channel(self.inner.config.event_buffer_limit());

        let (handle, exchange) = self.launch(spec, Arc::new(tx));

        if let Some(exchange) = &exchange {
            let weak = Arc::downgrade(exchange);
            rx.set_starter(Box::new(move || {
                if let Some(exchange) = weak.upgrade() {
                    exchange.start();
                }
            }));

            let weak = Arc::downgrade(exchange);
            rx.set_on_gone(Box::new(move || {
                if let Some(exchange) = weak.upgrade() {
                    exchange.consumer_gone();
                }
            }));
        }

        (RequestHandle::new(handle, exchange.as_ref()), rx)
    }

    /// Start a request right away, delivering events to `sink`.
    ///
    /// For hosts that already listen when they issue the request.
    pub fn start_with_sink(
        &self,
        spec: RequestSpec,
        sink: Arc<dyn EventSink<LifecycleEvent>>,
    ) -> RequestHandle {
        let (handle, exchange) = self.launch(spec, sink);

        if let Some(exchange) = &exchange {
            exchange.start();
        }

        RequestHandle::new(handle, exchange.as_ref())
    }

    /// Number of requests that have not reached a terminal event.
    pub fn in_flight(&self) -> usize {
        self.inner.exchanges.len()
    }

    /// Cancel every in-flight request.
    pub fn cancel_all(&self) {
        let all = self.inner.exchanges.values();
        if !all.is_empty() {
            debug!("Cancel {} in-flight requests", all.len());
        }
        for exchange in all {
            exchange.cancel();
        }
    }

    fn launch(
        &self,
        spec: RequestSpec,
        sink: Arc<dyn EventSink<LifecycleEvent>>,
    ) -> (Handle, Option<Arc<Exchange>>) {
        let handle = self.inner.exchanges.allocate();

        match self.prepare(handle, spec, sink.clone()) {
            Ok(exchange) => {
                debug!("{:?}", exchange);
                (handle, Some(exchange))
            }
            Err(failure) => {
                debug!("{} failed before start: {}", handle, failure);
                if sink.send(LifecycleEvent::Failed(failure)).is_err() {
                    debug!("{} consumer gone", handle);
                }
                (handle, None)
            }
        }
    }

    fn prepare(
        &self,
        handle: Handle,
        spec: RequestSpec,
        sink: Arc<dyn EventSink<LifecycleEvent>>,
    ) -> Result<Arc<Exchange>, Failure> {
        let caps = self.inner.client.capabilities();

        if !caps.per_request_callbacks {
            return Err(Error::CapabilityUnavailable("per-request callbacks").into());
        }

        if spec.body().is_stream() && !caps.streaming_upload {
            return Err(Error::CapabilityUnavailable("streaming upload").into());
        }

        let policy = spec.redirect_policy();
        let (uri, method, headers, body) = spec.into_parts()?;

        let upload = match &body {
            RequestBody::Stream(source) => Some(source.abort_handle()),
            _ => None,
        };

        let current = RedirectTarget {
            uri: uri.clone(),
            method: method.clone(),
            headers: headers.clone(),
        };

        let exchange = Exchange::new(
            handle,
            sink,
            Arc::downgrade(&self.inner.exchanges),
            &self.inner.config,
            policy,
            current,
            upload,
        );

        let native_spec = NativeRequestSpec {
            uri,
            method,
            headers,
            body,
        };

        let callback: Arc<dyn RequestCallback> = exchange.clone();
        let native = self.inner.client.open(native_spec, callback)?;

        exchange.attach(native);
        self.inner.exchanges.insert_at(handle, exchange.clone());

        Ok(exchange)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// The host's handle on one request.
#[derive(Clone)]
pub struct RequestHandle {
    handle: Handle,
    exchange: Weak<Exchange>,
    progress: Option<Arc<Mutex<Progress>>>,
}

impl RequestHandle {
    fn new(handle: Handle, exchange: Option<&Arc<Exchange>>) -> Self {
        RequestHandle {
            handle,
            exchange: exchange.map(Arc::downgrade).unwrap_or_default(),
            progress: exchange.map(|e| e.progress()),
        }
    }

    /// Identifier of the request, unique per engine.
    pub fn id(&self) -> Handle {
        self.handle
    }

    /// Cancel the request.
    ///
    /// Emits `Failed(Canceled)` unless the request already ended. Calling this
    /// any number of times yields at most one terminal event.
    pub fn cancel(&self) {
        if let Some(exchange) = self.exchange.upgrade() {
            exchange.cancel();
        }
    }

    /// Tell if the request has not yet reached a terminal event.
    pub fn is_active(&self) -> bool {
        self.exchange
            .upgrade()
            .map(|e| !e.phase().is_terminal())
            .unwrap_or(false)
    }

    /// Number of redirects followed so far.
    ///
    /// Stays readable after the request ended.
    pub fn redirect_count(&self) -> u32 {
        self.progress
            .as_ref()
            .map(|p| p.lock().redirects)
            .unwrap_or(0)
    }

    /// Uri of the latest hop, which is where the response came from once
    /// `ResponseStarted` was emitted. `None` if the request failed before it
    /// was opened.
    pub fn final_uri(&self) -> Option<Uri> {
        self.progress.as_ref().map(|p| p.lock().uri.clone())
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exchange.upgrade() {
            Some(e) => write!(f, "RequestHandle({:?})", e),
            None => write!(f, "RequestHandle({})", self.handle),
        }
    }
}
