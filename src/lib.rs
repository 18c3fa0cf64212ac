//! A pure, I/O-free D-Bus protocol implementation.
//!
//! The signature parser, type codec, message codec, message constructors,
//! address parser, and SASL handshake never touch a socket: they operate
//! entirely over in-memory buffers. The one exception is [`router`], which
//! multiplexes a live connection on top of `tokio`'s [`AsyncRead`]/
//! [`AsyncWrite`] and is gated behind the `tokio` feature.
//!
//! [`AsyncRead`]: tokio::io::AsyncRead
//! [`AsyncWrite`]: tokio::io::AsyncWrite

#[macro_use]
mod macros;

#[doc(inline)]
pub use self::protocol::{Endianness, Flags, HeaderField, MessageType};
pub mod protocol;

#[doc(inline)]
pub use self::signature::{SigType, SignatureError};
pub mod signature;

mod codec;

pub use self::value::{StringMap, Value};
mod value;

#[doc(inline)]
pub use self::object_path::{ObjectPath, ObjectPathError};
mod object_path;

#[doc(inline)]
pub use self::names::{BusName, ErrorName, InterfaceName, MemberName, NamesError};
mod names;

#[doc(inline)]
pub use self::error::{Error, Result};
mod error;

pub use self::message::{DBusAddress, Header, HeaderFields, Message, Parser};
mod message;

pub use self::sasl::{Mechanism, SaslParser};
pub mod sasl;

pub use self::address::{BusAddress, Transport, DEFAULT_SYSTEM_BUS_PATH};
mod address;

pub use self::match_rule::MatchRule;
mod match_rule;

pub use self::generator::{MessageGenerator, NameFlag, NameReply};
pub mod generator;

#[cfg(feature = "tokio")]
pub use self::router::{FilterStream, Router, RouterState};
#[cfg(feature = "tokio")]
pub mod router;
