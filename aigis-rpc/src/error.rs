use serde_json::Value;
use std::fmt;

/// An error occurring in the course of sending an RPC. Because these are
/// reused across both the broker's TCP transport and (in testing) a plain
/// pipe, this intentionally knows nothing about sockets specifically.
#[derive(Debug)]
pub enum Error {
    /// The peer disconnected, or the underlying transport is no longer usable.
    PeerDisconnect,
    /// The peer returned an error in response to a request.
    RemoteError(RemoteError),
    /// A transport-level IO error.
    Io(std::io::Error),
    /// The peer sent a value that did not round-trip through JSON.
    InvalidResponse,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::PeerDisconnect => write!(f, "peer disconnected"),
            Error::RemoteError(e) => write!(f, "remote error: {}", e),
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// An error raised by a `Handler` in response to a request, sent back to the
/// caller as the RPC's `error` field.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// A request referred to a method the handler does not recognize.
    InvalidRequest(Option<Value>),
    /// An application-defined error, identified by a numeric code.
    Custom {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl RemoteError {
    pub fn custom<S: Into<String>>(code: i64, message: S, data: Option<Value>) -> Self {
        RemoteError::Custom { code, message: message.into(), data }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RemoteError::InvalidRequest(data) => write!(f, "invalid request: {:?}", data),
            RemoteError::Custom { code, message, .. } => write!(f, "[{}] {}", code, message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// An error that terminates the read loop entirely: the peer's framing is
/// unrecoverable, or the underlying stream failed.
#[derive(Debug)]
pub enum ReadError {
    Io(std::io::Error),
    Disconnect,
    UnknownRequest(Value),
    Json(serde_json::Error),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadError::Io(e) => write!(f, "io error: {}", e),
            ReadError::Disconnect => write!(f, "peer disconnected"),
            ReadError::UnknownRequest(v) => write!(f, "unrecognized message: {}", v),
            ReadError::Json(e) => write!(f, "malformed json: {}", e),
        }
    }
}

impl std::error::Error for ReadError {}

impl From<std::io::Error> for ReadError {
    fn from(e: std::io::Error) -> Self {
        ReadError::Io(e)
    }
}
