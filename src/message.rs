//! Composition and parsing of whole D-Bus frames: the fixed header, the
//! header-fields array, and the aligned body.

use crate::codec::reader::Reader;
use crate::codec::writer::Writer;
use crate::error::{Error, ErrorKind, Result};
use crate::names::{BusName, ErrorName, InterfaceName, MemberName};
use crate::object_path::ObjectPath;
use crate::protocol::{Endianness, Flags, HeaderField, MessageType};
use crate::signature::{self, SigType};
use crate::value::Value;

/// The hard cap on a frame's body length (2²⁷, 128 MiB).
const MAX_BODY_LEN: u32 = 1 << 27;

/// The 12 leading bytes of every frame: endianness, type, flags, version,
/// body length, serial.
const FIXED_HEADER_LEN: usize = 12;

/// The typed header fields carried by every message, keyed by the small
/// integer tags in [`HeaderField`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    pub path: Option<ObjectPath>,
    pub interface: Option<InterfaceName>,
    pub member: Option<MemberName>,
    pub error_name: Option<ErrorName>,
    pub reply_serial: Option<u32>,
    pub destination: Option<BusName>,
    pub sender: Option<BusName>,
    pub signature: Option<String>,
    pub unix_fds: Option<u32>,
}

/// The full message header, minus the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub message_type: MessageType,
    pub flags: Flags,
    pub serial: u32,
    pub fields: HeaderFields,
}

/// A complete D-Bus message: header plus body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: Header,
    pub body: Vec<Value>,
}

impl Message {
    /// The declared signature of this message's body (empty if absent).
    pub fn body_signature(&self) -> String {
        self.header.fields.signature.clone().unwrap_or_default()
    }

    /// Validate that the header's `signature` field (or its absence) agrees
    /// with the actual body, per invariant 5.
    ///
    /// Checked structurally against the *declared* signature's parsed types
    /// rather than by regenerating a signature from the body's values: a
    /// value-derived signature can't distinguish an empty `as` from an empty
    /// `ai` (see [`Value::sig_type`]), which would otherwise reject valid
    /// messages carrying an empty array of anything but bytes.
    fn check_signature_coherence(&self) -> Result<()> {
        check_body_signature(self.header.fields.signature.as_deref(), &self.body)
    }

    /// Validate the required-header-field invariants for this message's
    /// declared [`MessageType`].
    fn check_required_fields(&self) -> Result<()> {
        match self.header.message_type {
            MessageType::METHOD_CALL => {
                if self.header.fields.path.is_none() {
                    return Err(Error::new(ErrorKind::MissingPath));
                }
                if self.header.fields.member.is_none() {
                    return Err(Error::new(ErrorKind::MissingMember));
                }
            }
            MessageType::SIGNAL => {
                if self.header.fields.path.is_none() {
                    return Err(Error::new(ErrorKind::MissingPath));
                }
                if self.header.fields.interface.is_none() {
                    return Err(Error::new(ErrorKind::MissingInterface));
                }
                if self.header.fields.member.is_none() {
                    return Err(Error::new(ErrorKind::MissingMember));
                }
            }
            MessageType::METHOD_RETURN => {
                if self.header.fields.reply_serial.is_none() {
                    return Err(Error::new(ErrorKind::MissingReplySerial));
                }
            }
            MessageType::ERROR => {
                if self.header.fields.reply_serial.is_none() {
                    return Err(Error::new(ErrorKind::MissingReplySerial));
                }
                if self.header.fields.error_name.is_none() {
                    return Err(Error::new(ErrorKind::MissingErrorName));
                }
            }
            _ => return Err(Error::new(ErrorKind::InvalidMessageType)),
        }

        Ok(())
    }

    /// Serialise this message to a contiguous byte buffer in the given
    /// endianness, assigning no serial of its own (the caller, typically the
    /// router, is responsible for having set `header.serial` already).
    pub fn encode(&self, endianness: Endianness) -> Result<Vec<u8>> {
        self.check_required_fields()?;
        self.check_signature_coherence()?;

        if self.header.serial == 0 {
            return Err(Error::new(ErrorKind::ZeroSerial));
        }

        let mut buf = Vec::new();
        let mut w = Writer::new(&mut buf, endianness);

        w.buf.push(match endianness {
            Endianness::LITTLE => b'l',
            _ => b'B',
        });
        w.buf.push(self.header.message_type.0);
        w.buf.push(self.header.flags.0);
        w.buf.push(1); // protocol version

        let body_len_pos = w.buf.len();
        w.buf.extend_from_slice(&[0; 4]); // body length, patched below

        write_u32(&mut w, self.header.serial);

        write_header_fields(&mut w, &self.header.fields)?;
        w.pad_to(8);

        let mut body_buf = Vec::new();
        let mut body_w = Writer::new(&mut body_buf, endianness);

        // Walk the *declared* signature's types, not ones re-derived from
        // the values: an empty array only carries its real element type
        // here, via the signature `check_signature_coherence` just verified
        // the body against.
        let declared = self.header.fields.signature.as_deref().unwrap_or("");
        let types = if declared.is_empty() {
            Vec::new()
        } else {
            signature::parse(declared)?
        };

        for (ty, value) in types.iter().zip(&self.body) {
            body_w.write_value(ty, value)?;
        }

        let body_len = body_buf.len() as u32;

        if body_len > MAX_BODY_LEN {
            return Err(Error::new(ErrorKind::BodyTooLong(body_len)));
        }

        buf.extend_from_slice(&body_buf);

        let body_len_bytes = match endianness {
            Endianness::LITTLE => body_len.to_le_bytes(),
            _ => body_len.to_be_bytes(),
        };
        buf[body_len_pos..body_len_pos + 4].copy_from_slice(&body_len_bytes);

        Ok(buf)
    }

    /// Decode a single complete frame from `buf`. The caller is responsible
    /// for having already established (via [`Parser`]) that `buf` holds
    /// exactly one frame.
    fn decode(buf: &[u8]) -> Result<Message> {
        let endianness = match buf.first() {
            Some(b'l') => Endianness::LITTLE,
            Some(b'B') => Endianness::BIG,
            _ => return Err(Error::new(ErrorKind::InvalidProtocol)),
        };

        let mut r = Reader::new(buf, endianness);
        let _endianness_byte = r.read_value(&SigType::Byte)?;
        let message_type = read_message_type(&mut r)?;
        let flags = read_flags(&mut r)?;

        let version = match r.read_value(&SigType::Byte)? {
            Value::Byte(1) => 1u8,
            _ => return Err(Error::new(ErrorKind::InvalidProtocol)),
        };
        let _ = version;

        let body_len = r.read_u32()?;

        if body_len > MAX_BODY_LEN {
            return Err(Error::new(ErrorKind::BodyTooLong(body_len)));
        }

        let serial = r.read_u32()?;
        let fields = read_header_fields(&mut r)?;

        r.pad_to(8)?;

        let body_start = r_pos(&r);
        let body_end = body_start
            .checked_add(body_len as usize)
            .ok_or_else(|| Error::new(ErrorKind::BufferUnderflow))?;

        if body_end > buf.len() {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        }

        let signature = fields.signature.clone().unwrap_or_default();
        let types = if signature.is_empty() {
            Vec::new()
        } else {
            signature::parse(&signature)?
        };

        let mut body = Vec::with_capacity(types.len());
        let mut br = Reader::new(&buf[..body_end], endianness);
        br.pos = body_start;

        for ty in &types {
            body.push(br.read_value(ty)?);
        }

        if br.pos != body_end {
            return Err(Error::new(ErrorKind::SignatureBodyMismatch));
        }

        let header = Header {
            message_type,
            flags,
            serial,
            fields,
        };

        let message = Message { header, body };
        message.check_required_fields()?;
        message.check_signature_coherence()?;

        Ok(message)
    }
}

fn r_pos(r: &Reader<'_>) -> usize {
    r.pos
}

fn write_u32(w: &mut Writer<'_>, value: u32) {
    w.write_value(&SigType::Uint32, &Value::Uint32(value))
        .expect("u32 write cannot fail");
}

fn read_message_type(r: &mut Reader<'_>) -> Result<MessageType> {
    match r.read_value(&SigType::Byte)? {
        Value::Byte(1) => Ok(MessageType::METHOD_CALL),
        Value::Byte(2) => Ok(MessageType::METHOD_RETURN),
        Value::Byte(3) => Ok(MessageType::ERROR),
        Value::Byte(4) => Ok(MessageType::SIGNAL),
        _ => Err(Error::new(ErrorKind::InvalidMessageType)),
    }
}

fn read_flags(r: &mut Reader<'_>) -> Result<Flags> {
    match r.read_value(&SigType::Byte)? {
        Value::Byte(raw) => Ok(Flags(raw)),
        _ => unreachable!("byte read always yields Value::Byte"),
    }
}

/// Encode the `a(yv)` header-fields array.
fn write_header_fields(w: &mut Writer<'_>, fields: &HeaderFields) -> Result<()> {
    let mut entries = Vec::new();

    if let Some(path) = &fields.path {
        entries.push((
            HeaderField::PATH,
            "o",
            Value::ObjectPath(path.clone()),
        ));
    }
    if let Some(interface) = &fields.interface {
        entries.push((
            HeaderField::INTERFACE,
            "s",
            Value::String(interface.as_str().to_string()),
        ));
    }
    if let Some(member) = &fields.member {
        entries.push((
            HeaderField::MEMBER,
            "s",
            Value::String(member.as_str().to_string()),
        ));
    }
    if let Some(error_name) = &fields.error_name {
        entries.push((
            HeaderField::ERROR_NAME,
            "s",
            Value::String(error_name.as_str().to_string()),
        ));
    }
    if let Some(reply_serial) = fields.reply_serial {
        entries.push((HeaderField::REPLY_SERIAL, "u", Value::Uint32(reply_serial)));
    }
    if let Some(destination) = &fields.destination {
        entries.push((
            HeaderField::DESTINATION,
            "s",
            Value::String(destination.as_str().to_string()),
        ));
    }
    if let Some(sender) = &fields.sender {
        entries.push((
            HeaderField::SENDER,
            "s",
            Value::String(sender.as_str().to_string()),
        ));
    }
    if let Some(signature) = &fields.signature {
        entries.push((
            HeaderField::SIGNATURE,
            "g",
            Value::Signature(signature.clone()),
        ));
    }
    if let Some(unix_fds) = fields.unix_fds {
        entries.push((HeaderField::UNIX_FDS, "u", Value::Uint32(unix_fds)));
    }

    let array_ty = SigType::Struct(vec![SigType::Byte, SigType::Variant]);

    w.pad_to(4);
    let len_pos = w.buf.len();
    w.buf.extend_from_slice(&[0; 4]);
    w.pad_to(8);
    let start = w.buf.len();

    for (tag, sig, value) in entries {
        w.write_value(
            &array_ty,
            &Value::Struct(vec![
                Value::Byte(tag.0),
                Value::Variant(sig.to_string(), Box::new(value)),
            ]),
        )?;
    }

    let len = (w.buf.len() - start) as u32;
    let bytes = match w.endianness {
        Endianness::LITTLE => len.to_le_bytes(),
        _ => len.to_be_bytes(),
    };
    w.buf[len_pos..len_pos + 4].copy_from_slice(&bytes);

    Ok(())
}

/// Decode the `a(yv)` header-fields array.
fn read_header_fields(r: &mut Reader<'_>) -> Result<HeaderFields> {
    let entry_ty = SigType::Struct(vec![SigType::Byte, SigType::Variant]);
    let array = r.read_value(&SigType::Array(Box::new(entry_ty)))?;

    let Value::Array(entries) = array else {
        unreachable!("array read always yields Value::Array");
    };

    let mut fields = HeaderFields::default();

    for entry in entries {
        let Value::Struct(mut parts) = entry else {
            continue;
        };
        if parts.len() != 2 {
            continue;
        }
        let variant = parts.pop().unwrap();
        let tag_value = parts.pop().unwrap();

        let (Value::Byte(tag), Value::Variant(_, inner)) = (tag_value, variant) else {
            continue;
        };

        match HeaderField(tag) {
            HeaderField::PATH => {
                if let Value::ObjectPath(path) = *inner {
                    fields.path = Some(path);
                }
            }
            HeaderField::INTERFACE => {
                if let Value::String(s) = *inner {
                    fields.interface = InterfaceName::new(s).ok();
                }
            }
            HeaderField::MEMBER => {
                if let Value::String(s) = *inner {
                    fields.member = MemberName::new(s).ok();
                }
            }
            HeaderField::ERROR_NAME => {
                if let Value::String(s) = *inner {
                    fields.error_name = ErrorName::new(s).ok();
                }
            }
            HeaderField::REPLY_SERIAL => {
                if let Value::Uint32(v) = *inner {
                    fields.reply_serial = Some(v);
                }
            }
            HeaderField::DESTINATION => {
                if let Value::String(s) = *inner {
                    fields.destination = BusName::new(s).ok();
                }
            }
            HeaderField::SENDER => {
                if let Value::String(s) = *inner {
                    fields.sender = BusName::new(s).ok();
                }
            }
            HeaderField::SIGNATURE => {
                if let Value::Signature(s) = *inner {
                    fields.signature = Some(s);
                }
            }
            HeaderField::UNIX_FDS => {
                if let Value::Uint32(v) = *inner {
                    fields.unix_fds = Some(v);
                }
            }
            _ => {}
        }
    }

    Ok(fields)
}

/// A streaming message parser.
///
/// Bytes are fed in incrementally as they arrive from the host's I/O layer;
/// [`Parser::next_message`] yields whole frames as soon as they are fully
/// buffered, and never partially consumes the buffer on failure, per §4.C.
#[derive(Debug, Default)]
pub struct Parser {
    buf: Vec<u8>,
}

impl Parser {
    /// Construct an empty parser.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append freshly received bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Attempt to decode the next whole message from the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Any error is fatal to
    /// this parser instance: further calls will re-encounter the same
    /// malformed prefix.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        // The fixed prefix plus the header-fields array length (§4.C step 1):
        // anything short of that and `read_u32_at` for the fields length
        // below would read past the buffer.
        if self.buf.len() < FIXED_HEADER_LEN + 4 {
            return Ok(None);
        }

        let endianness = match self.buf[0] {
            b'l' => Endianness::LITTLE,
            b'B' => Endianness::BIG,
            _ => return Err(Error::new(ErrorKind::InvalidProtocol)),
        };

        let body_len = read_u32_at(&self.buf, 4, endianness);
        let fields_len = read_u32_at(&self.buf, 12, endianness);

        if body_len > MAX_BODY_LEN {
            return Err(Error::new(ErrorKind::BodyTooLong(body_len)));
        }

        let header_fields_start = FIXED_HEADER_LEN + 4;
        let after_fields = header_fields_start
            .checked_add(fields_len as usize)
            .ok_or_else(|| Error::new(ErrorKind::BufferUnderflow))?;
        let body_start = align_up(after_fields, 8);
        let total = body_start
            .checked_add(body_len as usize)
            .ok_or_else(|| Error::new(ErrorKind::BufferUnderflow))?;

        if self.buf.len() < total {
            return Ok(None);
        }

        let frame = &self.buf[..total];
        let message = Message::decode(frame)?;
        self.buf.drain(..total);

        Ok(Some(message))
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

fn read_u32_at(buf: &[u8], pos: usize, endianness: Endianness) -> u32 {
    let bytes: [u8; 4] = buf[pos..pos + 4].try_into().expect("4 bytes in range");
    match endianness {
        Endianness::LITTLE => u32::from_le_bytes(bytes),
        _ => u32::from_be_bytes(bytes),
    }
}

/// A `(object_path, bus_name?, interface?)` record used to fill in the
/// `path`, `destination`, and `interface` header fields of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DBusAddress {
    pub object_path: ObjectPath,
    pub bus_name: Option<BusName>,
    pub interface: Option<InterfaceName>,
}

impl DBusAddress {
    /// Address a peer connection (no well-known/unique bus name, used for
    /// direct peer-to-peer connections rather than calls through a bus).
    pub fn for_peer(object_path: ObjectPath, interface: Option<InterfaceName>) -> Self {
        Self {
            object_path,
            bus_name: None,
            interface,
        }
    }

    /// Address a named destination on a bus.
    pub fn for_bus(
        object_path: ObjectPath,
        bus_name: BusName,
        interface: Option<InterfaceName>,
    ) -> Self {
        Self {
            object_path,
            bus_name: Some(bus_name),
            interface,
        }
    }
}

fn check_body_signature(signature: Option<&str>, body: &[Value]) -> Result<()> {
    let declared = signature.unwrap_or("");

    let types = if declared.is_empty() {
        Vec::new()
    } else {
        signature::parse(declared)?
    };

    let matches = types.len() == body.len()
        && types.iter().zip(body).all(|(ty, value)| value.matches_type(ty));

    if !matches {
        return Err(Error::new(ErrorKind::SignatureBodyMismatch));
    }

    Ok(())
}

/// Build a `method_call` message. The serial is left at 0 and is filled in
/// by the router at send time.
pub fn method_call(
    address: &DBusAddress,
    member: MemberName,
    signature: Option<String>,
    body: Vec<Value>,
    flags: Flags,
) -> Result<Message> {
    check_body_signature(signature.as_deref(), &body)?;

    Ok(Message {
        header: Header {
            message_type: MessageType::METHOD_CALL,
            flags,
            serial: 0,
            fields: HeaderFields {
                path: Some(address.object_path.clone()),
                interface: address.interface.clone(),
                member: Some(member),
                destination: address.bus_name.clone(),
                signature,
                ..Default::default()
            },
        },
        body,
    })
}

/// Build a `method_return` message replying to `parent`.
pub fn method_return(
    parent: &Message,
    signature: Option<String>,
    body: Vec<Value>,
) -> Result<Message> {
    check_body_signature(signature.as_deref(), &body)?;

    Ok(Message {
        header: Header {
            message_type: MessageType::METHOD_RETURN,
            flags: Flags::EMPTY,
            serial: 0,
            fields: HeaderFields {
                reply_serial: Some(parent.header.serial),
                destination: parent.header.fields.sender.clone(),
                signature,
                ..Default::default()
            },
        },
        body,
    })
}

/// Build an `error` message replying to `parent`.
pub fn error(
    parent: &Message,
    error_name: ErrorName,
    signature: Option<String>,
    body: Vec<Value>,
) -> Result<Message> {
    check_body_signature(signature.as_deref(), &body)?;

    Ok(Message {
        header: Header {
            message_type: MessageType::ERROR,
            flags: Flags::EMPTY,
            serial: 0,
            fields: HeaderFields {
                error_name: Some(error_name),
                reply_serial: Some(parent.header.serial),
                destination: parent.header.fields.sender.clone(),
                signature,
                ..Default::default()
            },
        },
        body,
    })
}

/// Build a `signal` message.
pub fn signal(
    path: ObjectPath,
    interface: InterfaceName,
    member: MemberName,
    signature: Option<String>,
    body: Vec<Value>,
) -> Result<Message> {
    check_body_signature(signature.as_deref(), &body)?;

    Ok(Message {
        header: Header {
            message_type: MessageType::SIGNAL,
            flags: Flags::EMPTY,
            serial: 0,
            fields: HeaderFields {
                path: Some(path),
                interface: Some(interface),
                member: Some(member),
                signature,
                ..Default::default()
            },
        },
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_call() -> Message {
        method_call(
            &DBusAddress::for_bus(
                ObjectPath::new("/org/freedesktop/DBus").unwrap(),
                BusName::new("org.freedesktop.DBus").unwrap(),
                Some(InterfaceName::new("org.freedesktop.DBus").unwrap()),
            ),
            MemberName::new("Hello").unwrap(),
            None,
            Vec::new(),
            Flags::EMPTY,
        )
        .unwrap()
    }

    #[test]
    fn hello_frame_matches_wire_fixture() {
        let mut message = hello_call();
        message.header.serial = 1;

        let encoded = message.encode(Endianness::LITTLE).unwrap();

        assert_eq!(encoded[0], b'l');
        assert_eq!(encoded[1], 1); // METHOD_CALL
        assert_eq!(encoded[2], 0); // flags
        assert_eq!(encoded[3], 1); // protocol version
        assert_eq!(&encoded[4..8], &[0, 0, 0, 0]); // body length, empty body
        assert_eq!(&encoded[8..12], &[1, 0, 0, 0]); // serial
    }

    #[test]
    fn message_round_trips_through_parser() {
        let mut message = hello_call();
        message.header.serial = 7;

        let encoded = message.encode(Endianness::LITTLE).unwrap();

        let mut parser = Parser::new();
        parser.feed(&encoded);

        let decoded = parser.next_message().unwrap().expect("one full frame");
        assert_eq!(decoded, message);
        assert!(parser.next_message().unwrap().is_none());
    }

    #[test]
    fn parser_waits_on_a_partial_fixed_prefix() {
        // A feed landing between 12 and 15 bytes must not panic trying to
        // read the header-fields length at offset 12..16.
        let mut message = hello_call();
        message.header.serial = 7;
        let encoded = message.encode(Endianness::LITTLE).unwrap();

        let mut parser = Parser::new();
        parser.feed(&encoded[..14]);
        assert!(parser.next_message().unwrap().is_none());

        parser.feed(&encoded[14..]);
        let decoded = parser.next_message().unwrap().expect("one full frame");
        assert_eq!(decoded, message);
    }

    #[test]
    fn method_call_requires_path_and_member() {
        let err = Message {
            header: Header {
                message_type: MessageType::METHOD_CALL,
                flags: Flags::EMPTY,
                serial: 1,
                fields: HeaderFields::default(),
            },
            body: Vec::new(),
        }
        .encode(Endianness::LITTLE)
        .unwrap_err();

        assert_eq!(err.to_string(), "missing required PATH header");
    }

    #[test]
    fn signature_body_mismatch_is_rejected() {
        let result = method_call(
            &DBusAddress::for_peer(ObjectPath::root(), None),
            MemberName::new("Ping").unwrap(),
            Some("s".to_string()),
            Vec::new(),
            Flags::EMPTY,
        );

        assert!(result.is_err());
    }

    #[test]
    fn big_endian_round_trips() {
        let mut message = hello_call();
        message.header.serial = 42;

        let encoded = message.encode(Endianness::BIG).unwrap();
        assert_eq!(encoded[0], b'B');

        let mut parser = Parser::new();
        parser.feed(&encoded);
        let decoded = parser.next_message().unwrap().unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn empty_array_of_strings_round_trips() {
        // An empty `as` body used to be misclassified as `ay` by a
        // value-derived signature, which made a well-formed frame look
        // signature-mismatched.
        let mut message = method_return(&hello_call(), Some("as".to_string()), vec![Value::Array(Vec::new())])
            .unwrap();
        message.header.serial = 3;

        let encoded = message.encode(Endianness::LITTLE).unwrap();

        let mut parser = Parser::new();
        parser.feed(&encoded);
        let decoded = parser.next_message().unwrap().expect("one full frame");
        assert_eq!(decoded, message);
    }

    #[test]
    fn empty_dict_body_round_trips() {
        let dict_sig = SigType::Array(Box::new(SigType::DictEntry(
            Box::new(SigType::String),
            Box::new(SigType::Variant),
        )))
        .to_signature_string();

        let mut message =
            method_return(&hello_call(), Some(dict_sig), vec![Value::Array(Vec::new())]).unwrap();
        message.header.serial = 4;

        let encoded = message.encode(Endianness::LITTLE).unwrap();

        let mut parser = Parser::new();
        parser.feed(&encoded);
        let decoded = parser.next_message().unwrap().expect("one full frame");
        assert_eq!(decoded, message);
    }
}
