//! Error types for calls in both directions.

use crate::types::TypeMismatch;
use thiserror::Error;

/// Failures seen by the side that issued a call.
#[derive(Debug, Error)]
pub enum CallError {
    /// The channel was not open when the call was issued. Nothing was sent.
    #[error("not connected")]
    NotConnected,

    /// The remote side replied with an error.
    #[error("{0}")]
    Remote(String),

    /// Outbound arguments do not fit the method signature. Nothing was sent.
    #[error("argument encoding: {0}")]
    ArgumentEncoding(#[from] MarshalError),

    /// The reply's result does not decode to the expected return type.
    #[error("result decoding: {0}")]
    ResultDecoding(#[from] TypeMismatch),

    #[error("no reply within {0:?}")]
    Timeout(std::time::Duration),

    /// The dispatcher was disposed while the call was pending, or was used
    /// after dispose over a transport that is still open.
    #[error("dispatcher disposed")]
    Disposed,

    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// Failures on the receiving side. Their text is what travels back in a reply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("offline: not accepting calls")]
    Offline,

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("argument decoding: {0}")]
    ArgumentDecoding(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Forwarded verbatim; the original error type does not cross the wire.
    #[error("{0}")]
    Invocation(String),
}

/// Argument binding failures, in either direction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarshalError {
    #[error("missing argument {name:?}")]
    Missing { name: String },

    #[error("argument {name:?}: {reason}")]
    Type { name: String, reason: String },

    #[error("{given} arguments given but only {max} can be sent")]
    TooMany { given: usize, max: usize },

    #[error("argument list is not a list: {0}")]
    NotAList(String),

    #[error("no service for parameter {name:?} ({service})")]
    Unresolved { name: String, service: &'static str },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,

    #[error("{0}")]
    Io(String),
}
