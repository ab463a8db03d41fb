//! Native clients shipped with the crate.
//!
//! [`BlockingClient`] adapts any blocking [`Transport`] to the callback model
//! of [`NativeClient`][crate::engine::NativeClient]. Each request gets its own
//! worker thread, and every callback is made from that thread.
//! [`scripted::ScriptedTransport`] is a transport serving canned responses.

mod blocking;
pub mod scripted;

pub use blocking::{BlockingClient, Transport, TransportRequest, TransportResponse};
