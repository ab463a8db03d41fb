use std::fmt;
use std::io;

use crate::event::FailureKind;

/// Error type for http-bridge
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum Error {
    BadHeader(String),
    BadUri(String),
    BadLocationHeader(String),
    HttpParseFail(String),
    HttpParseTooManyHeaders,
    HttpParseIncomplete,
    CapabilityUnavailable(&'static str),
    WriteInFlight,
    ReadInFlight,
    BodyContentAfterFinish,
    BodyAborted,
    ConsumerGone,
    WorkerGone,
    Transport(String),
}

impl Error {
    /// The failure category reported in `Failed` events for this error.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::BadHeader(_)
            | Error::BadUri(_)
            | Error::BadLocationHeader(_)
            | Error::HttpParseFail(_)
            | Error::HttpParseTooManyHeaders
            | Error::HttpParseIncomplete => FailureKind::Protocol,
            Error::CapabilityUnavailable(_) => FailureKind::CapabilityUnavailable,
            Error::BodyAborted | Error::ConsumerGone => FailureKind::Canceled,
            Error::WriteInFlight
            | Error::ReadInFlight
            | Error::BodyContentAfterFinish
            | Error::WorkerGone
            | Error::Transport(_) => FailureKind::Transport,
        }
    }
}

impl From<httparse::Error> for Error {
    fn from(value: httparse::Error) -> Self {
        match value {
            httparse::Error::TooManyHeaders => Error::HttpParseTooManyHeaders,
            _ => Error::HttpParseFail(value.to_string()),
        }
    }
}

impl From<http::Error> for Error {
    fn from(value: http::Error) -> Self {
        Error::BadHeader(value.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Transport(value.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        let kind = match value {
            Error::BodyAborted => io::ErrorKind::ConnectionAborted,
            Error::WorkerGone => io::ErrorKind::BrokenPipe,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, value)
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadHeader(v) => write!(f, "bad header: {}", v),
            Error::BadUri(v) => write!(f, "bad uri: {}", v),
            Error::BadLocationHeader(v) => write!(f, "location header is malformed: {}", v),
            Error::HttpParseFail(v) => write!(f, "http parse fail: {}", v),
            Error::HttpParseTooManyHeaders => write!(f, "http parse resulted in too many headers"),
            Error::HttpParseIncomplete => write!(f, "http response head is incomplete"),
            Error::CapabilityUnavailable(v) => write!(f, "capability unavailable: {}", v),
            Error::WriteInFlight => write!(f, "a body write is already in flight"),
            Error::ReadInFlight => write!(f, "a body read is already in flight"),
            Error::BodyContentAfterFinish => {
                write!(f, "attempt to stream body after calling finish()")
            }
            Error::BodyAborted => write!(f, "body stream was canceled"),
            Error::ConsumerGone => write!(f, "event consumer is gone"),
            Error::WorkerGone => write!(f, "worker thread is shut down"),
            Error::Transport(v) => write!(f, "transport error: {}", v),
        }
    }
}
