use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::{Arc, Weak};

use http::{Method, StatusCode, Uri};
use parking_lot::Mutex;

use crate::body::ReadPump;
use crate::engine::{Capabilities, NativeClient, NativeRequest, NativeRequestSpec};
use crate::engine::{RedirectInfo, RequestCallback, ResponseInfo};
use crate::event::{Failure, FailureKind};
use crate::ext::StatusExt;
use crate::redirect::RedirectTarget;
use crate::request::{Headers, RequestBody};
use crate::util::Worker;
use crate::{Config, Error};

/// One request hop as seen by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// Target.
    pub uri: Uri,
    /// Method.
    pub method: Method,
    /// Headers.
    pub headers: Headers,
}

/// Response head and a reader for the body.
pub struct TransportResponse {
    /// Status.
    pub status: StatusCode,
    /// Reason phrase.
    pub status_text: Option<String>,
    /// Headers.
    pub headers: Headers,
    /// Body, read until `Ok(0)`.
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}

/// A blocking HTTP exchange. Does not follow redirects itself.
pub trait Transport: Send + Sync + 'static {
    /// Send one request and return the response head.
    ///
    /// `body` is read to the end for the upload. It is empty for redirect hops.
    fn execute(
        &self,
        request: &TransportRequest,
        body: &mut dyn Read,
    ) -> io::Result<TransportResponse>;
}

/// A [`NativeClient`] running a blocking [`Transport`] on one thread per request.
pub struct BlockingClient<T> {
    transport: Arc<T>,
    chunk_size: usize,
    capabilities: Capabilities,
}

impl<T: Transport> BlockingClient<T> {
    /// Create a client with the default read chunk size.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, &Config::default())
    }

    /// Create a client taking the read chunk size from `config`.
    pub fn with_config(transport: T, config: &Config) -> Self {
        BlockingClient {
            transport: Arc::new(transport),
            chunk_size: config.pump_chunk_size(),
            capabilities: Capabilities::full(),
        }
    }

    /// Report other capabilities than the full set.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> NativeClient for BlockingClient<T> {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn open(
        &self,
        spec: NativeRequestSpec,
        callback: Arc<dyn RequestCallback>,
    ) -> Result<Arc<dyn NativeRequest>, Error> {
        let worker = Worker::spawn("http-bridge-request")?;

        let request = TransportRequest {
            uri: spec.uri,
            method: spec.method,
            headers: spec.headers,
        };

        let native = Arc::new_cyclic(|me| BlockingRequest {
            me: me.clone(),
            transport: self.transport.clone(),
            worker,
            callback,
            chunk_size: self.chunk_size,
            state: Mutex::new(RequestState {
                request,
                body: Some(spec.body),
                pending_redirect: None,
                pump: None,
                canceled: false,
            }),
        });

        Ok(native)
    }
}

impl<T> fmt::Debug for BlockingClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingClient")
            .field("chunk_size", &self.chunk_size)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

struct BlockingRequest<T> {
    me: Weak<BlockingRequest<T>>,
    transport: Arc<T>,
    worker: Worker,
    callback: Arc<dyn RequestCallback>,
    chunk_size: usize,
    state: Mutex<RequestState>,
}

struct RequestState {
    request: TransportRequest,
    body: Option<RequestBody>,
    pending_redirect: Option<TransportResponse>,
    pump: Option<ReadPump>,
    canceled: bool,
}

impl<T: Transport> BlockingRequest<T> {
    fn submit<F>(&self, f: F)
    where
        F: FnOnce(&BlockingRequest<T>) + Send + 'static,
    {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        if !self.worker.submit(move || f(&me)) {
            debug!("Request worker is shut down");
        }
    }

    fn is_canceled(&self) -> bool {
        self.state.lock().canceled
    }

    fn execute(&self) {
        let (request, body) = {
            let mut state = self.state.lock();
            if state.canceled {
                return;
            }
            (state.request.clone(), state.body.take())
        };

        let mut reader: Box<dyn Read + Send> = match body {
            None | Some(RequestBody::Empty) => Box::new(io::empty()),
            Some(RequestBody::Bytes(v)) => Box::new(Cursor::new(v)),
            Some(RequestBody::Stream(source)) => Box::new(source),
        };

        debug!("Execute {} {}", request.method, request.uri);
        let result = self.transport.execute(&request, &mut *reader);
        drop(reader);

        if self.is_canceled() {
            return;
        }

        let response = match result {
            Ok(v) => v,
            Err(e) => {
                self.fail(Failure::transport(e.to_string()));
                return;
            }
        };

        let location = response
            .headers
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        if response.status.is_followable_redirect() && location.is_some() {
            let info = RedirectInfo {
                status: response.status,
                status_text: response.status_text.clone(),
                headers: response.headers.clone(),
                location,
            };

            self.state.lock().pending_redirect = Some(response);
            self.callback.on_redirect_received(info);
        } else {
            self.deliver(request.uri, response);
        }
    }

    fn deliver(&self, uri: Uri, response: TransportResponse) {
        let TransportResponse {
            status,
            status_text,
            headers,
            body,
        } = response;

        let pump = ReadPump::new(body, self.worker.clone(), self.chunk_size);

        {
            let mut state = self.state.lock();
            if state.canceled {
                return;
            }
            state.pump = Some(pump);
        }

        self.callback.on_response_started(ResponseInfo {
            uri,
            status,
            status_text,
            headers,
        });
    }

    fn on_read(&self, result: io::Result<Vec<u8>>) {
        if self.is_canceled() {
            return;
        }

        match result {
            Ok(data) if data.is_empty() => {
                let pump = self.state.lock().pump.take();
                if let Some(pump) = pump {
                    pump.close();
                }
                self.worker.shutdown();
                self.callback.on_succeeded();
            }
            Ok(data) => self.callback.on_read_completed(data),
            Err(e) => self.fail(Failure::transport(e.to_string())),
        }
    }

    fn fail(&self, failure: Failure) {
        debug!("Request failed: {}", failure);
        self.worker.shutdown();
        self.callback.on_failed(failure);
    }
}

impl<T: Transport> NativeRequest for BlockingRequest<T> {
    fn start(&self) {
        self.submit(|r| r.execute());
    }

    fn follow_redirect(&self, target: &RedirectTarget) {
        {
            let mut state = self.state.lock();
            if state.canceled {
                return;
            }
            state.pending_redirect = None;
            state.request = TransportRequest {
                uri: target.uri.clone(),
                method: target.method.clone(),
                headers: target.headers.clone(),
            };
        }
        self.submit(|r| r.execute());
    }

    fn stop_redirect(&self) {
        self.submit(|r| {
            let (uri, pending) = {
                let mut state = r.state.lock();
                (state.request.uri.clone(), state.pending_redirect.take())
            };

            match pending {
                Some(response) => r.deliver(uri, response),
                None => r.fail(Failure::new(
                    FailureKind::Protocol,
                    "no redirect response to deliver",
                )),
            }
        });
    }

    fn read(&self, max: usize) {
        let result = {
            let state = self.state.lock();
            if state.canceled {
                return;
            }
            match &state.pump {
                Some(pump) => {
                    let me = self.me.clone();
                    pump.read(max, move |result| {
                        if let Some(me) = me.upgrade() {
                            me.on_read(result);
                        }
                    })
                }
                None => Err(Error::Transport("read before response".to_string())),
            }
        };

        if let Err(e) = result {
            self.submit(move |r| r.fail(e.into()));
        }
    }

    fn cancel(&self) {
        {
            let mut state = self.state.lock();
            if state.canceled {
                return;
            }
            state.canceled = true;
            state.pending_redirect = None;
            state.body = None;
            // A read in progress keeps its own reference and ends on its own.
            state.pump = None;
        }

        let callback = self.callback.clone();
        self.worker.shutdown_with(move || callback.on_canceled());
    }
}

impl<T> Drop for BlockingRequest<T> {
    fn drop(&mut self) {
        self.worker.shutdown();
    }
}
