use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;

use crate::names::NamesError;
use crate::object_path::ObjectPathError;
use crate::router::RouterState;
use crate::signature::SignatureError;

/// Result alias using an [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Self { kind }
    }
}

impl From<SignatureError> for Error {
    #[inline]
    fn from(error: SignatureError) -> Self {
        Self::new(ErrorKind::Signature(error))
    }
}

impl From<NamesError> for Error {
    #[inline]
    fn from(error: NamesError) -> Self {
        Self::new(ErrorKind::Names(error))
    }
}

impl From<ObjectPathError> for Error {
    #[inline]
    fn from(error: ObjectPathError) -> Self {
        Self::new(ErrorKind::ObjectPath(error))
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        Self::new(ErrorKind::Io(error))
    }
}

impl From<Utf8Error> for Error {
    #[inline]
    fn from(error: Utf8Error) -> Self {
        Self::new(ErrorKind::Utf8Error(error))
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Io(error) => error.fmt(f),
            ErrorKind::Signature(error) => error.fmt(f),
            ErrorKind::Names(error) => error.fmt(f),
            ErrorKind::ObjectPath(error) => error.fmt(f),
            ErrorKind::Utf8Error(error) => error.fmt(f),
            ErrorKind::BufferUnderflow => write!(f, "buffer underflow"),
            ErrorKind::MissingBus => write!(f, "missing session bus address"),
            ErrorKind::InvalidAddress => write!(f, "invalid d-bus address"),
            ErrorKind::SaslRejected(line) => write!(f, "SASL authentication rejected: {line}"),
            ErrorKind::InvalidState(state) => write!(f, "invalid router state `{state:?}`"),
            ErrorKind::InvalidProtocol => write!(f, "invalid protocol version"),
            ErrorKind::InvalidMessageType => write!(f, "invalid message type"),
            ErrorKind::MissingPath => write!(f, "missing required PATH header"),
            ErrorKind::MissingInterface => write!(f, "missing required INTERFACE header"),
            ErrorKind::MissingMember => write!(f, "missing required MEMBER header"),
            ErrorKind::MissingReplySerial => write!(f, "missing required REPLY_SERIAL header"),
            ErrorKind::MissingErrorName => write!(f, "missing required ERROR_NAME header"),
            ErrorKind::ZeroSerial => write!(f, "zero serial in outgoing message"),
            ErrorKind::SignatureBodyMismatch => {
                write!(f, "signature header does not match encoded body")
            }
            ErrorKind::InvalidBoolean(value) => {
                write!(f, "invalid boolean value {value} (must be 0 or 1)")
            }
            ErrorKind::NotNullTerminated => write!(f, "string is not nul terminated"),
            ErrorKind::ArrayTooLong(length) => {
                write!(f, "array of length {length} is too long (max is 67108864)")
            }
            ErrorKind::BodyTooLong(length) => {
                write!(f, "body of length {length} is too long (max is 134217728)")
            }
            ErrorKind::ConnectionClosed => write!(f, "connection closed"),
            ErrorKind::Timeout => write!(f, "method call timed out"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(error) => Some(error),
            ErrorKind::Signature(error) => Some(error),
            ErrorKind::Names(error) => Some(error),
            ErrorKind::ObjectPath(error) => Some(error),
            ErrorKind::Utf8Error(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Io(io::Error),
    Signature(SignatureError),
    Names(NamesError),
    ObjectPath(ObjectPathError),
    Utf8Error(Utf8Error),
    BufferUnderflow,
    MissingBus,
    InvalidAddress,
    SaslRejected(String),
    InvalidState(RouterState),
    InvalidProtocol,
    InvalidMessageType,
    MissingPath,
    MissingInterface,
    MissingMember,
    MissingReplySerial,
    MissingErrorName,
    ZeroSerial,
    SignatureBodyMismatch,
    InvalidBoolean(u32),
    NotNullTerminated,
    ArrayTooLong(u32),
    BodyTooLong(u32),
    ConnectionClosed,
    Timeout,
}
