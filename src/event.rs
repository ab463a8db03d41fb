//! Lifecycle events and the ordered sink they are delivered through.
//!
//! Native clients call back on threads they own. Every callback is turned into
//! at most one event, which is handed off to an [`EventSink`]. The built-in
//! sink is [`EventChannel`], an ordered single-consumer queue that the host
//! drains with [`EventChannel::recv()`] or by iterating.
//!
//! A stream of events always ends with exactly one terminal event
//! ([`LifecycleEvent::Succeeded`], [`LifecycleEvent::Failed`] or
//! [`LifecycleEvent::TooManyRedirects`]). Anything sent after the terminal
//! event is discarded.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{StatusCode, Uri};
use parking_lot::{Condvar, Mutex};

use crate::request::Headers;

/// Hook invoked once, used for lazy starts and resuming reads.
pub type Resume = Box<dyn FnOnce() + Send + 'static>;

/// Common behavior of events passing through an [`EventChannel`].
pub trait Event: Send + 'static {
    /// Whether no further events may follow this one.
    fn is_terminal(&self) -> bool;

    /// Number of body bytes carried. Counts towards the channel's buffer limit.
    fn payload_len(&self) -> usize {
        0
    }
}

/// One normalized step in the life of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Response headers arrived, either for the final response or for a
    /// redirect that is not being followed.
    ResponseStarted(ResponseStarted),

    /// A chunk of response body.
    ReadCompleted {
        /// The bytes, in arrival order.
        data: Vec<u8>,
    },

    /// The redirect chain exceeded the configured bound. Terminal.
    TooManyRedirects,

    /// The response body is fully delivered. Terminal.
    Succeeded,

    /// The request failed. Terminal.
    Failed(Failure),
}

/// Response status and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseStarted {
    /// Uri the response came from, after any followed redirects.
    pub uri: Uri,
    /// HTTP status code.
    pub status: StatusCode,
    /// Reason phrase, when the native client reports one.
    pub status_text: Option<String>,
    /// Response headers in the order received.
    pub headers: Headers,
    /// `true` only for a redirect surfaced instead of followed. A 3xx the
    /// native client delivers as the final response has this `false`.
    pub is_redirect: bool,
}

impl Event for LifecycleEvent {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::TooManyRedirects | LifecycleEvent::Succeeded | LifecycleEvent::Failed(_)
        )
    }

    fn payload_len(&self) -> usize {
        match self {
            LifecycleEvent::ReadCompleted { data } => data.len(),
            _ => 0,
        }
    }
}

/// Category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FailureKind {
    /// DNS, TLS, connection reset and other I/O faults.
    Transport,
    /// Malformed data from the peer, such as a broken redirect location.
    Protocol,
    /// The native client lacks a feature the request needs.
    CapabilityUnavailable,
    /// The request was canceled before reaching another terminal state.
    Canceled,
}

/// A failure delivered as data, never as a panic or an `Err` across the
/// event boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Category.
    pub kind: FailureKind,
    /// Human readable description.
    pub message: String,
}

impl Failure {
    /// Create a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Failure {
            kind,
            message: message.into(),
        }
    }

    /// A transport failure, as reported by native clients.
    pub fn transport(message: impl Into<String>) -> Self {
        Failure::new(FailureKind::Transport, message)
    }

    /// A cancellation.
    pub fn canceled(message: impl Into<String>) -> Self {
        Failure::new(FailureKind::Canceled, message)
    }
}

impl From<crate::Error> for Failure {
    fn from(value: crate::Error) -> Self {
        Failure::new(value.failure_kind(), value.to_string())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// The consumer of an event sink disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerGone;

impl fmt::Display for ConsumerGone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event consumer is gone")
    }
}

impl std::error::Error for ConsumerGone {}

/// Ordered destination for events of one request.
///
/// Implementations must not block in `send()`. The engine treats
/// `Err(ConsumerGone)` as a reason to cancel the transport.
pub trait EventSink<E>: Send + Sync {
    /// Hand off one event.
    fn send(&self, event: E) -> Result<(), ConsumerGone>;

    /// Ask for room to deliver more body data.
    ///
    /// `resume` is called exactly once, either right away or when the consumer
    /// has drained enough. It is dropped without being called if the consumer
    /// goes away. The default has no limit and calls `resume` immediately.
    fn request_capacity(&self, resume: Resume) {
        resume()
    }
}

/// Create an ordered single-consumer channel.
///
/// `limit` is the number of queued body bytes (see [`Event::payload_len()`])
/// above which [`EventSink::request_capacity()`] parks its resume hook.
pub fn channel<E: Event>(limit: usize) -> (EventSender<E>, EventChannel<E>) {
    let shared = Arc::new(Shared {
        limit,
        state: Mutex::new(State {
            queue: VecDeque::new(),
            queued_bytes: 0,
            starter: None,
            on_gone: None,
            parked: None,
            terminal_sent: false,
            terminal_seen: false,
            receiver_alive: true,
            senders: 1,
        }),
        cond: Condvar::new(),
    });

    (
        EventSender {
            shared: shared.clone(),
        },
        EventChannel { shared },
    )
}

struct Shared<E> {
    limit: usize,
    state: Mutex<State<E>>,
    cond: Condvar,
}

struct State<E> {
    queue: VecDeque<E>,
    queued_bytes: usize,
    starter: Option<Resume>,
    on_gone: Option<Resume>,
    parked: Option<Resume>,
    terminal_sent: bool,
    terminal_seen: bool,
    receiver_alive: bool,
    senders: usize,
}

/// Producing half of an [`EventChannel`].
pub struct EventSender<E> {
    shared: Arc<Shared<E>>,
}

impl<E: Event> EventSink<E> for EventSender<E> {
    fn send(&self, event: E) -> Result<(), ConsumerGone> {
        let mut state = self.shared.state.lock();

        if !state.receiver_alive {
            return Err(ConsumerGone);
        }

        if state.terminal_sent {
            warn!("Event after terminal event discarded");
            return Ok(());
        }

        state.terminal_sent = event.is_terminal();
        state.queued_bytes += event.payload_len();
        state.queue.push_back(event);

        self.shared.cond.notify_one();
        Ok(())
    }

    fn request_capacity(&self, resume: Resume) {
        {
            let mut state = self.shared.state.lock();

            if !state.receiver_alive {
                return;
            }

            if state.queued_bytes >= self.shared.limit {
                trace!(
                    "Park read, {} bytes queued (limit {})",
                    state.queued_bytes,
                    self.shared.limit
                );
                if state.parked.replace(resume).is_some() {
                    warn!("Replaced an already parked resume hook");
                }
                return;
            }
        }

        resume()
    }
}

impl<E> EventSender<E> {
    /// Whether the consumer is still attached.
    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().receiver_alive
    }
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        self.shared.state.lock().senders += 1;
        EventSender {
            shared: self.shared.clone(),
        }
    }
}

impl<E> Drop for EventSender<E> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.senders -= 1;
        if state.senders == 0 {
            self.shared.cond.notify_all();
        }
    }
}

/// Consuming half of an ordered event channel.
///
/// Draining is what starts a lazily started request: the first call to
/// [`recv()`][Self::recv], [`try_recv()`][Self::try_recv] or
/// [`recv_timeout()`][Self::recv_timeout] issues the native call.
///
/// Dropping the channel tells the producer the consumer is gone, which
/// cancels an in-flight request.
pub struct EventChannel<E> {
    shared: Arc<Shared<E>>,
}

impl<E: Event> EventChannel<E> {
    /// Register the hook run by the first drain call.
    pub(crate) fn set_starter(&self, starter: Resume) {
        self.shared.state.lock().starter = Some(starter);
    }

    /// Register the hook run when this channel is dropped.
    pub(crate) fn set_on_gone(&self, on_gone: Resume) {
        self.shared.state.lock().on_gone = Some(on_gone);
    }

    /// Block until the next event.
    ///
    /// Returns `None` once the terminal event has been received, or if every
    /// producer disappeared without sending one.
    pub fn recv(&mut self) -> Option<E> {
        self.do_recv(None)
    }

    /// Like [`recv()`][Self::recv], but gives up after `timeout`.
    ///
    /// Use [`is_finished()`][Self::is_finished] to tell a timeout from the end
    /// of the stream.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<E> {
        self.do_recv(Some(Instant::now() + timeout))
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<E> {
        self.maybe_start();
        let mut state = self.shared.state.lock();
        let event = state.queue.pop_front()?;
        let resume = self.on_taken(&mut state, &event);
        drop(state);

        if let Some(resume) = resume {
            resume();
        }
        Some(event)
    }

    /// Whether the terminal event has been received, or no producer is left.
    pub fn is_finished(&self) -> bool {
        let state = self.shared.state.lock();
        state.queue.is_empty() && (state.terminal_seen || state.senders == 0)
    }

    /// Number of body bytes currently queued.
    pub fn queued_bytes(&self) -> usize {
        self.shared.state.lock().queued_bytes
    }

    fn maybe_start(&self) {
        let starter = self.shared.state.lock().starter.take();
        if let Some(starter) = starter {
            trace!("First drain, starting");
            starter();
        }
    }

    fn do_recv(&mut self, deadline: Option<Instant>) -> Option<E> {
        self.maybe_start();

        let mut state = self.shared.state.lock();
        loop {
            if let Some(event) = state.queue.pop_front() {
                let resume = self.on_taken(&mut state, &event);
                drop(state);

                // Resuming calls into the native client; never under our lock.
                if let Some(resume) = resume {
                    resume();
                }
                return Some(event);
            }

            if state.terminal_seen || state.senders == 0 {
                return None;
            }

            match deadline {
                Some(deadline) => {
                    if self.shared.cond.wait_until(&mut state, deadline).timed_out()
                        && state.queue.is_empty()
                    {
                        return None;
                    }
                }
                None => self.shared.cond.wait(&mut state),
            }
        }
    }

    fn on_taken(&self, state: &mut State<E>, event: &E) -> Option<Resume> {
        state.queued_bytes -= event.payload_len();

        if event.is_terminal() {
            state.terminal_seen = true;
            // Nothing more will be read.
            return None;
        }

        if state.queued_bytes < self.shared.limit {
            state.parked.take()
        } else {
            None
        }
    }
}

impl<E: Event> Iterator for EventChannel<E> {
    type Item = E;

    fn next(&mut self) -> Option<E> {
        self.recv()
    }
}

impl<E> Drop for EventChannel<E> {
    fn drop(&mut self) {
        let (on_gone, leftovers) = {
            let mut state = self.shared.state.lock();
            state.receiver_alive = false;
            state.starter = None;
            state.parked = None;
            state.queued_bytes = 0;
            (state.on_gone.take(), std::mem::take(&mut state.queue))
        };
        drop(leftovers);

        if let Some(on_gone) = on_gone {
            on_gone();
        }
    }
}

impl<E> fmt::Debug for EventChannel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("EventChannel")
            .field("queued", &state.queue.len())
            .field("queued_bytes", &state.queued_bytes)
            .field("terminal_seen", &state.terminal_seen)
            .finish()
    }
}

impl<E> fmt::Debug for EventSender<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender").finish()
    }
}
