//! Low level details of the D-Bus wire protocol: endianness, message types,
//! flags, and header-field tags.

use std::fmt;

raw_enum! {
    /// The endianness of a message, as declared by the first byte on the
    /// wire.
    #[repr(u8)]
    pub enum Endianness {
        /// Little endian (`'l'`).
        LITTLE = b'l',
        /// Big endian (`'B'`).
        BIG = b'B',
    }
}

impl Endianness {
    /// The endianness native to this host.
    #[cfg(target_endian = "little")]
    pub const NATIVE: Self = Self::LITTLE;
    /// The endianness native to this host.
    #[cfg(target_endian = "big")]
    pub const NATIVE: Self = Self::BIG;
}

raw_enum! {
    /// The type of a message.
    #[repr(u8)]
    pub enum MessageType {
        /// Method call. This message type may prompt a reply.
        METHOD_CALL = 1,
        /// Method reply with returned data.
        METHOD_RETURN = 2,
        /// Error reply. The first body argument, if present, is a string
        /// describing the error.
        ERROR = 3,
        /// Signal emission.
        SIGNAL = 4,
    }
}

raw_set! {
    /// Bitmask of flags carried by a message header.
    #[repr(u8)]
    pub enum Flags {
        /// An empty set of flags.
        EMPTY = 0,
        /// This message does not expect a reply, even if it is of a type
        /// that can have one.
        NO_REPLY_EXPECTED = 1,
        /// The bus must not launch an owner for the destination name in
        /// response to this message.
        NO_AUTO_START = 2,
        /// The caller is prepared to wait for interactive authorization.
        ALLOW_INTERACTIVE_AUTHORIZATION = 4,
    }
}

raw_enum! {
    /// Small-integer tag identifying a header field in the `a(yv)` array.
    #[repr(u8)]
    pub enum HeaderField {
        PATH = 1,
        INTERFACE = 2,
        MEMBER = 3,
        ERROR_NAME = 4,
        REPLY_SERIAL = 5,
        DESTINATION = 6,
        SENDER = 7,
        SIGNATURE = 8,
        UNIX_FDS = 9,
    }
}
