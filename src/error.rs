// ABOUTME: Error taxonomy for the wire protocol — fatal protocol errors, non-fatal
// ABOUTME: per-request errors, and the client-side error type surfaced to callers

use thiserror::Error;

/// Errors that are fatal for a connection: once one of these is observed,
/// the connection is no longer on a frame boundary and must be closed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic number")]
    InvalidMagic,

    #[error("invalid type kind: {0}")]
    InvalidKind(u16),

    #[error("invalid request line")]
    BadRequestLine,

    #[error("short read")]
    ShortRead,

    #[error("unrecognized stream type: {0}")]
    BadStreamType(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors scoped to a single request: the connection survives these, the
/// server reports them to the caller as an `Error` wire frame.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request non-existent service: {0}")]
    UnknownService(String),

    #[error("request non-existent method: {service}.{method}")]
    UnknownMethod { service: String, method: String },

    #[error("request argument count does not conform to method signature: expected {expected}, got {got}")]
    ArgCountMismatch { expected: usize, got: usize },

    #[error("unrecognized request message: {0}")]
    UnknownMessage(String),

    #[error("unrecognized request builtin type: {0}")]
    UnknownBuiltinType(String),

    #[error("{0}")]
    Message(String),
}

/// Errors returned from registering a service or method descriptor.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("method {0:?} declares more than one stream argument")]
    MultipleStreamArgs(String),

    #[error("service {0:?} already registered")]
    DuplicateService(String),
}

/// Errors surfaced to a `Client::call` caller.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("call on a closed client")]
    Closed,

    #[error("at most one stream argument is allowed per call")]
    MultipleStream,

    /// An application-level error reported by the server. The connection is
    /// *not* poisoned when this variant is returned.
    #[error("{0}")]
    NonSerious(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unexpected response sequence number: expected {expected}, got {got}")]
    SequenceMismatch { expected: u64, got: u64 },
}

impl ClientError {
    /// Mirrors `original_source/client.go`'s `IsNonSeriousError`: a
    /// `NonSerious` error is an application error, not a transport fault,
    /// and does not poison the client connection.
    pub fn is_non_serious(&self) -> bool {
        matches!(self, ClientError::NonSerious(_))
    }
}
