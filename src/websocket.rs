//! WebSocket lifecycle adapter.
//!
//! Only the lifecycle is covered: the connection opens, then either closes
//! or fails. Frames are exchanged directly with the native socket, see
//! [`WebSocketTask::native()`].
//!
//! A task emits [`WsEvent::Open`] at most once, followed by exactly one
//! terminal event. When the native socket reports both a close and a
//! completion, whichever comes first wins.

use std::fmt;
use std::sync::Arc;

use http::Uri;
use parking_lot::Mutex;

use crate::event::{channel, Event, EventChannel, EventSender, EventSink, Failure, FailureKind};
use crate::request::Headers;
use crate::Error;

/// Lifecycle of a WebSocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    /// The handshake completed.
    Open {
        /// Negotiated subprotocol.
        protocol: Option<String>,
    },
    /// The socket closed. Terminal.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason payload, as raw bytes. Usually UTF-8, not guaranteed.
        reason: Option<Vec<u8>>,
    },
    /// The socket failed or was canceled. Terminal.
    Failed(Failure),
}

impl Event for WsEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, WsEvent::Closed { .. } | WsEvent::Failed(_))
    }
}

/// Phase of a [`WebSocketTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsPhase {
    /// Waiting for the handshake.
    Connecting,
    /// Open.
    Open,
    /// Closed by either side.
    Closed,
    /// Failed or canceled.
    Failed,
}

impl WsPhase {
    fn is_terminal(&self) -> bool {
        matches!(self, WsPhase::Closed | WsPhase::Failed)
    }
}

/// WebSocket connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsRequest {
    uri: Uri,
    headers: Headers,
    protocols: Vec<String>,
}

impl WsRequest {
    /// Create a request for `uri`.
    pub fn new<U>(uri: U) -> Result<Self, Error>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<http::Error>,
    {
        let uri = Uri::try_from(uri).map_err(|e| {
            let e: http::Error = e.into();
            Error::BadUri(e.to_string())
        })?;

        Ok(WsRequest {
            uri,
            headers: Headers::new(),
            protocols: Vec::new(),
        })
    }

    /// Offer a subprotocol.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Add a handshake header.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, Error> {
        self.headers.try_append(name, value)?;
        Ok(self)
    }

    /// Target.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Handshake headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Offered subprotocols, in preference order.
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }
}

/// Notifications from a native WebSocket.
pub trait WebSocketCallback: Send + Sync {
    /// The handshake completed.
    fn on_open(&self, protocol: Option<String>);

    /// A close frame was exchanged.
    fn on_close(&self, code: u16, reason: Option<Vec<u8>>);

    /// The underlying task ended. `None` means without error.
    fn on_complete(&self, error: Option<Failure>);
}

/// A native WebSocket.
pub trait NativeWebSocket: Send + Sync {
    /// Begin the handshake.
    fn start(&self);

    /// Send a close frame.
    fn close(&self, code: u16, reason: Option<&[u8]>);

    /// Abort without a close handshake.
    fn cancel(&self);
}

/// Factory of native WebSockets.
pub trait NativeWebSocketClient: Send + Sync {
    /// Whether callbacks can be bound to a single socket.
    fn supports_task_callbacks(&self) -> bool;

    /// Create a socket. Nothing happens until [`NativeWebSocket::start()`].
    fn connect(
        &self,
        request: WsRequest,
        callback: Arc<dyn WebSocketCallback>,
    ) -> Result<Arc<dyn NativeWebSocket>, Error>;
}

/// The host's handle on one WebSocket.
#[derive(Clone)]
pub struct WebSocketTask {
    shared: Arc<Shared>,
}

struct Shared {
    sink: EventSender<WsEvent>,
    state: Mutex<WsState>,
}

struct WsState {
    phase: WsPhase,
    native: Option<Arc<dyn NativeWebSocket>>,
}

impl WebSocketTask {
    /// Connect and start right away.
    ///
    /// If the client cannot bind callbacks to a socket, a
    /// `Failed(CapabilityUnavailable)` event is queued before this returns.
    pub fn start(
        client: &dyn NativeWebSocketClient,
        request: WsRequest,
    ) -> (WebSocketTask, EventChannel<WsEvent>) {
        let (tx, rx) = channel(usize::MAX);

        let shared = Arc::new(Shared {
            sink: tx,
            state: Mutex::new(WsState {
                phase: WsPhase::Connecting,
                native: None,
            }),
        });
        let task = WebSocketTask { shared };

        if !client.supports_task_callbacks() {
            task.fail_early(Error::CapabilityUnavailable("websocket task callbacks").into());
            return (task, rx);
        }

        debug!("Connect websocket {}", request.uri());

        let callback: Arc<dyn WebSocketCallback> = task.shared.clone();
        let native = match client.connect(request, callback) {
            Ok(v) => v,
            Err(e) => {
                task.fail_early(e.into());
                return (task, rx);
            }
        };

        task.shared.state.lock().native = Some(native.clone());

        let weak = Arc::downgrade(&task.shared);
        rx.set_on_gone(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.consumer_gone();
            }
        }));

        native.start();

        (task, rx)
    }

    fn fail_early(&self, failure: Failure) {
        debug!("Websocket failed before start: {}", failure);
        self.shared.state.lock().phase = WsPhase::Failed;
        self.shared.sink.send(WsEvent::Failed(failure)).ok();
    }

    /// Current phase.
    pub fn phase(&self) -> WsPhase {
        self.shared.state.lock().phase
    }

    /// The native socket, until the task ends.
    pub fn native(&self) -> Option<Arc<dyn NativeWebSocket>> {
        self.shared.state.lock().native.clone()
    }

    /// Start a close handshake. The `Closed` event follows from the native socket.
    pub fn close(&self, code: u16, reason: Option<&[u8]>) {
        let native = {
            let state = self.shared.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            state.native.clone()
        };
        if let Some(native) = native {
            native.close(code, reason);
        }
    }

    /// Abort. Emits `Failed(Canceled)` unless the task already ended.
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        let native = {
            let mut state = self.shared.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            self.shared.transition(&mut state, WsPhase::Failed);
            let failure = Failure::canceled("websocket canceled");
            self.shared.sink.send(WsEvent::Failed(failure)).ok();
            state.native.take()
        };
        if let Some(native) = native {
            native.cancel();
        }
    }
}

impl Shared {
    fn transition(&self, state: &mut WsState, to: WsPhase) {
        debug!("Websocket {:?} -> {:?}", state.phase, to);
        state.phase = to;
    }

    fn consumer_gone(&self) {
        let native = {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            self.transition(&mut state, WsPhase::Failed);
            state.native.take()
        };
        if let Some(native) = native {
            native.cancel();
        }
    }

    fn end(&self, phase: WsPhase, event: WsEvent, name: &str) {
        let mut state = self.state.lock();
        if state.phase.is_terminal() {
            debug!("Websocket {} ignored in {:?}", name, state.phase);
            return;
        }
        self.transition(&mut state, phase);
        if self.sink.send(event).is_err() {
            debug!("Websocket consumer gone");
        }
        // Released outside the lock.
        let native = state.native.take();
        drop(state);
        drop(native);
    }
}

impl WebSocketCallback for Shared {
    fn on_open(&self, protocol: Option<String>) {
        let mut state = self.state.lock();
        if state.phase != WsPhase::Connecting {
            debug!("Websocket on_open ignored in {:?}", state.phase);
            return;
        }
        self.transition(&mut state, WsPhase::Open);
        if self.sink.send(WsEvent::Open { protocol }).is_err() {
            debug!("Websocket consumer gone");
        }
    }

    fn on_close(&self, code: u16, reason: Option<Vec<u8>>) {
        self.end(WsPhase::Closed, WsEvent::Closed { code, reason }, "on_close");
    }

    fn on_complete(&self, error: Option<Failure>) {
        let failure = error.unwrap_or_else(|| {
            Failure::new(FailureKind::Transport, "websocket completed without close")
        });
        self.end(WsPhase::Failed, WsEvent::Failed(failure), "on_complete");
    }
}

impl fmt::Debug for WebSocketTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTask")
            .field("phase", &self.phase())
            .finish()
    }
}
