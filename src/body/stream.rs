use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::BackpressureBuffer;
use crate::util::Worker;
use crate::Error;

/// Notified once a chunk passed to [`StreamingBody::write()`] is buffered.
///
/// Implemented for any `FnOnce(Result<(), Error>)`.
pub trait WriteCallback: Send + 'static {
    /// The whole chunk is in the buffer.
    fn on_write_complete(self: Box<Self>);

    /// The chunk could not be buffered. Typically [`Error::BodyAborted`].
    fn on_error(self: Box<Self>, error: Error);
}

impl<F> WriteCallback for F
where
    F: FnOnce(Result<(), Error>) + Send + 'static,
{
    fn on_write_complete(self: Box<Self>) {
        (*self)(Ok(()))
    }

    fn on_error(self: Box<Self>, error: Error) {
        (*self)(Err(error))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProducerState {
    Open,
    Finished,
    Canceled,
}

struct Shared {
    buffer: Arc<BackpressureBuffer>,
    state: Mutex<ProducerState>,
    in_flight: AtomicBool,
}

/// Producer half of an upload channel, see [`channel()`][super::channel].
///
/// At most one write may be in flight. Issue the next write from (or after)
/// the callback of the previous one.
pub struct StreamingBody {
    shared: Arc<Shared>,
    worker: Worker,
}

impl StreamingBody {
    pub(crate) fn new(buffer: Arc<BackpressureBuffer>, worker: Worker) -> Self {
        StreamingBody {
            shared: Arc::new(Shared {
                buffer,
                state: Mutex::new(ProducerState::Open),
                in_flight: AtomicBool::new(false),
            }),
            worker,
        }
    }

    /// Queue `chunk` for the upload.
    ///
    /// Returns right away. The callback fires on the writer thread when the
    /// chunk is fully buffered, or with an error if the channel is canceled
    /// first.
    pub fn write<C: WriteCallback>(&self, chunk: Vec<u8>, callback: C) -> Result<(), Error> {
        let state = self.shared.state.lock();

        match *state {
            ProducerState::Open => {}
            ProducerState::Finished => return Err(Error::BodyContentAfterFinish),
            ProducerState::Canceled => return Err(Error::BodyAborted),
        }

        if self.shared.in_flight.swap(true, Ordering::AcqRel) {
            return Err(Error::WriteInFlight);
        }

        let shared = self.shared.clone();
        let callback = Box::new(callback);

        let accepted = self.worker.submit(move || {
            let result = shared.buffer.write_all(&chunk);
            shared.in_flight.store(false, Ordering::Release);

            match result {
                Ok(()) => callback.on_write_complete(),
                Err(e) => {
                    debug!("Body write failed: {}", e);
                    callback.on_error(e)
                }
            }
        });

        if !accepted {
            self.shared.in_flight.store(false, Ordering::Release);
            return Err(Error::WorkerGone);
        }

        Ok(())
    }

    /// Signal the end of the body once the pending write, if any, is buffered.
    ///
    /// Calling this more than once, or after [`cancel()`][Self::cancel], does nothing.
    pub fn finish(&self) {
        let mut state = self.shared.state.lock();
        if *state != ProducerState::Open {
            return;
        }
        *state = ProducerState::Finished;

        let buffer = self.shared.buffer.clone();
        self.worker.submit(move || buffer.close());
        self.worker.shutdown();
        trace!("Body finished");
    }

    /// Abort the upload. A pending write fails with [`Error::BodyAborted`].
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == ProducerState::Canceled {
                return;
            }
            *state = ProducerState::Canceled;
        }

        self.shared.buffer.cancel();
        // Draining lets a queued write report its error.
        self.worker.shutdown();
        debug!("Body canceled");
    }

    /// Tell if [`finish()`][Self::finish] was called.
    pub fn is_finished(&self) -> bool {
        *self.shared.state.lock() == ProducerState::Finished
    }

    /// Tell if the channel was canceled from either side.
    pub fn is_canceled(&self) -> bool {
        *self.shared.state.lock() == ProducerState::Canceled || self.shared.buffer.is_aborted()
    }

    /// Capacity of the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.shared.buffer.capacity()
    }
}

impl Drop for StreamingBody {
    fn drop(&mut self) {
        let open = *self.shared.state.lock() == ProducerState::Open;
        if open {
            debug!("StreamingBody dropped without finish()");
            self.cancel();
        }
    }
}

impl fmt::Debug for StreamingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingBody")
            .field("state", &*self.shared.state.lock())
            .field("buffered", &self.shared.buffer.len())
            .finish()
    }
}

/// Consumer half of an upload channel. Read by the native client.
pub struct UploadSource {
    buffer: Arc<BackpressureBuffer>,
    content_length: Option<u64>,
    content_type: Option<String>,
    done: bool,
}

impl UploadSource {
    pub(crate) fn new(buffer: Arc<BackpressureBuffer>) -> Self {
        UploadSource {
            buffer,
            content_length: None,
            content_type: None,
            done: false,
        }
    }

    /// Declare the total body length up front.
    pub fn with_content_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }

    /// Declared body length, `None` when unknown.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Declare the media type of the body, sent as `content-type` unless the
    /// request sets one itself.
    pub fn with_content_type(mut self, mime: impl Into<String>) -> Self {
        self.content_type = Some(mime.into());
        self
    }

    /// Declared media type.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// A handle that can abort the channel from elsewhere.
    pub fn abort_handle(&self) -> UploadAbort {
        UploadAbort(self.buffer.clone())
    }
}

impl io::Read for UploadSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        match self.buffer.read(buf) {
            Ok(0) => {
                self.done = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.done = true;
                Err(e.into())
            }
        }
    }
}

impl Drop for UploadSource {
    fn drop(&mut self) {
        if !self.done {
            // Unblock a producer waiting for room that will never come.
            self.buffer.cancel();
        }
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSource")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("done", &self.done)
            .finish()
    }
}

/// Aborts an upload channel, see [`UploadSource::abort_handle()`].
#[derive(Clone)]
pub struct UploadAbort(Arc<BackpressureBuffer>);

impl UploadAbort {
    /// Abort. Idempotent.
    pub fn abort(&self) {
        self.0.cancel();
    }

    /// Tell if the channel is aborted.
    pub fn is_aborted(&self) -> bool {
        self.0.is_aborted()
    }
}

impl fmt::Debug for UploadAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UploadAbort").field(&self.is_aborted()).finish()
    }
}
