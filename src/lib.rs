//! Event sequencing and flow control for callback-driven native HTTP clients.
//!
//! Native HTTP stacks report progress through callbacks on threads they own:
//! a redirect arrived, headers arrived, some bytes were read, the request
//! failed. This crate turns those callbacks into one ordered stream of
//! [`LifecycleEvent`][event::LifecycleEvent]s per request, with
//!
//! * a bounded [redirect policy][redirect::RedirectPolicy],
//! * exactly one terminal event per request, also under cancellation,
//! * pull-style body reads that stop while the consumer lags behind,
//! * a [streaming upload channel][body::channel] with a bounded buffer,
//! * a [WebSocket lifecycle adapter][websocket::WebSocketTask].
//!
//! The crate does not speak HTTP on the wire. The native client is reached
//! through the traits in [`engine`], and [`backend::BlockingClient`] adapts
//! any blocking [`Transport`][backend::Transport] to them.
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
//!     .route("https://f.test/loop", ScriptedResponse::redirect(301, "/loop"));
//!
//! let config = Config::new().with_max_redirects(2);
//! let engine = Engine::new(BlockingClient::new(transport), config.clone());
//!
//! let spec = RequestSpec::get("https://f.test/loop")
//!     .config(&config)
//!     .build()
//!     .unwrap();
//!
//! let (_handle, events) = engine.start(spec);
//! let events: Vec<_> = events.collect();
//!
//! assert_eq!(events, vec![LifecycleEvent::TooManyRedirects]);
//! ```
//!
//! # Logging
//!
//! The crate logs through the [`log`](https://docs.rs/log) facade. State
//! transitions are logged at `debug`, body bytes at `trace`.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(missing_docs)]

#[macro_use]
extern crate log;

mod config;
mod error;
mod ext;
mod parser;
mod util;

pub mod backend;
pub mod body;
pub mod engine;
pub mod event;
pub mod redirect;
pub mod registry;
pub mod request;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use config::Config;
pub use error::Error;

pub use http;
