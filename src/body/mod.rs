//! Request and response body plumbing.
//!
//! Outbound, a [`StreamingBody`] lets the host push request body chunks one
//! at a time. A dedicated writer thread moves each chunk into a
//! [`BackpressureBuffer`], from which the native client pulls through the
//! paired [`UploadSource`]. A slow network therefore stalls the writer, and
//! the host does not get its write callback until the chunk fits.
//!
//! ```text
//!  host ── write(chunk, cb) ──► writer thread ──► BackpressureBuffer ──► UploadSource ──► native
//!             ▲                      │
//!             └──── cb(Ok/Err) ──────┘
//! ```
//!
//! Inbound, [`ReadPump`] adapts a blocking response body reader to the
//! one-read-at-a-time model native clients use.

mod buffer;
mod pump;
mod stream;

pub use buffer::BackpressureBuffer;
pub use pump::ReadPump;
pub use stream::{StreamingBody, UploadAbort, UploadSource, WriteCallback};

use std::sync::Arc;

use crate::util::Worker;
use crate::{Config, Error};

/// Default upload buffer capacity, 64 KiB.
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Create a streaming upload channel with a buffer of `capacity` bytes.
///
/// ```
/// use std::io::Read;
/// use std::sync::mpsc;
///
/// let (body, mut source) = http_bridge::body::channel(1024).unwrap();
///
/// let (tx, rx) = mpsc::channel();
/// body.write(b"hello".to_vec(), move |r: Result<(), http_bridge::Error>| tx.send(r).unwrap())
///     .unwrap();
/// rx.recv().unwrap().unwrap();
/// body.finish();
///
/// let mut out = String::new();
/// source.read_to_string(&mut out).unwrap();
/// assert_eq!(out, "hello");
/// ```
pub fn channel(capacity: usize) -> Result<(StreamingBody, UploadSource), Error> {
    let buffer = Arc::new(BackpressureBuffer::new(capacity));
    let worker = Worker::spawn("http-bridge-body-writer")?;

    Ok((
        StreamingBody::new(buffer.clone(), worker),
        UploadSource::new(buffer),
    ))
}

/// Create a streaming upload channel sized by [`Config::buffer_capacity()`].
pub fn channel_with(config: &Config) -> Result<(StreamingBody, UploadSource), Error> {
    channel(config.buffer_capacity())
}
