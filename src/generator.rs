//! Reusable, partially-applied message templates.
//!
//! A [`MessageGenerator`] binds an object path and interface once and then
//! produces well-formed `method_call` messages for named operations, input
//! signature and all. The standard interfaces every D-Bus peer implements —
//! `Properties`, `Introspectable`, `Peer` — and the bus's own
//! `org.freedesktop.DBus` interface are provided as ready-made generators.

use std::fmt;

use crate::error::Result;
use crate::message::{self, DBusAddress, Message};
use crate::names::{BusName, InterfaceName, MemberName};
use crate::object_path::ObjectPath;
use crate::protocol::Flags;
use crate::value::Value;

/// Well known bus destination name.
pub const BUS_DESTINATION: &str = "org.freedesktop.DBus";
/// Well known bus interface name.
pub const BUS_INTERFACE: &str = "org.freedesktop.DBus";
/// Well known bus object path.
pub const BUS_PATH: &str = "/org/freedesktop/DBus";

raw_set! {
    /// Flags to a `RequestName` call.
    #[repr(u32)]
    pub enum NameFlag {
        /// Allow another caller to replace us if it requests with
        /// [`NameFlag::REPLACE_EXISTING`].
        ALLOW_REPLACEMENT = 1,
        /// Try to replace the current owner, if they allow it.
        REPLACE_EXISTING = 2,
        /// Fail immediately rather than queue if the name is already owned.
        DO_NOT_QUEUE = 4,
    }
}

raw_enum! {
    /// The reply to a `RequestName` call.
    #[repr(u32)]
    pub enum NameReply {
        /// The caller became the primary owner of the name.
        PRIMARY_OWNER = 1,
        /// The caller has been placed in the queue.
        IN_QUEUE = 2,
        /// The name is owned and queueing was declined.
        EXISTS = 3,
        /// The caller already owns the name.
        ALREADY_OWNER = 4,
    }
}

/// A reusable `(object_path, interface)` binding that produces method-call
/// messages for named operations.
#[derive(Debug, Clone)]
pub struct MessageGenerator {
    address: DBusAddress,
    interface: InterfaceName,
}

impl MessageGenerator {
    /// Bind a generator to a destination bus name, object path, and
    /// interface.
    pub fn new(destination: BusName, path: ObjectPath, interface: InterfaceName) -> Self {
        Self {
            address: DBusAddress::for_bus(path, destination, Some(interface.clone())),
            interface,
        }
    }

    /// Bind a generator for a direct peer connection with no bus name.
    pub fn for_peer(path: ObjectPath, interface: InterfaceName) -> Self {
        Self {
            address: DBusAddress::for_peer(path, Some(interface.clone())),
            interface,
        }
    }

    /// The interface this generator is bound to.
    pub fn interface(&self) -> &InterfaceName {
        &self.interface
    }

    /// Produce a `method_call` for `member` with the given signature and
    /// body.
    pub fn call(
        &self,
        member: &str,
        signature: Option<String>,
        body: Vec<Value>,
    ) -> Result<Message> {
        message::method_call(
            &self.address,
            MemberName::new(member)?,
            signature,
            body,
            Flags::EMPTY,
        )
    }
}

/// Build a generator bound to `org.freedesktop.DBus.Properties` on `path`
/// at `destination`.
pub fn properties(destination: BusName, path: ObjectPath) -> MessageGenerator {
    MessageGenerator::new(
        destination,
        path,
        InterfaceName::new("org.freedesktop.DBus.Properties").expect("valid interface name"),
    )
}

/// Build a `Properties.Get` call.
pub fn properties_get(generator: &MessageGenerator, interface: &str, property: &str) -> Result<Message> {
    generator.call(
        "Get",
        Some("ss".to_string()),
        vec![
            Value::String(interface.to_string()),
            Value::String(property.to_string()),
        ],
    )
}

/// Build a `Properties.GetAll` call.
pub fn properties_get_all(generator: &MessageGenerator, interface: &str) -> Result<Message> {
    generator.call(
        "GetAll",
        Some("s".to_string()),
        vec![Value::String(interface.to_string())],
    )
}

/// Build a `Properties.Set` call. `value` must already be the `(signature,
/// value)` pair the variant codec expects.
pub fn properties_set(
    generator: &MessageGenerator,
    interface: &str,
    property: &str,
    value: Value,
) -> Result<Message> {
    generator.call(
        "Set",
        Some("ssv".to_string()),
        vec![
            Value::String(interface.to_string()),
            Value::String(property.to_string()),
            value,
        ],
    )
}

/// Build a generator bound to `org.freedesktop.DBus.Introspectable` on
/// `path` at `destination`.
pub fn introspectable(destination: BusName, path: ObjectPath) -> MessageGenerator {
    MessageGenerator::new(
        destination,
        path,
        InterfaceName::new("org.freedesktop.DBus.Introspectable").expect("valid interface name"),
    )
}

/// Build an `Introspectable.Introspect` call.
pub fn introspect(generator: &MessageGenerator) -> Result<Message> {
    generator.call("Introspect", None, Vec::new())
}

/// Build a generator bound to `org.freedesktop.DBus.Peer` on `path` at
/// `destination`.
pub fn peer(destination: BusName, path: ObjectPath) -> MessageGenerator {
    MessageGenerator::new(
        destination,
        path,
        InterfaceName::new("org.freedesktop.DBus.Peer").expect("valid interface name"),
    )
}

/// Build a `Peer.Ping` call.
pub fn ping(generator: &MessageGenerator) -> Result<Message> {
    generator.call("Ping", None, Vec::new())
}

/// Build a `Peer.GetMachineId` call.
pub fn get_machine_id(generator: &MessageGenerator) -> Result<Message> {
    generator.call("GetMachineId", None, Vec::new())
}

/// Build a generator bound to the bus's own `org.freedesktop.DBus`
/// interface.
pub fn bus() -> MessageGenerator {
    MessageGenerator::new(
        BusName::new(BUS_DESTINATION).expect("valid bus name"),
        ObjectPath::new(BUS_PATH).expect("valid object path"),
        InterfaceName::new(BUS_INTERFACE).expect("valid interface name"),
    )
}

/// Build the bootstrap `Hello` call every connection issues once
/// authenticated.
pub fn hello(generator: &MessageGenerator) -> Result<Message> {
    generator.call("Hello", None, Vec::new())
}

/// Build an `AddMatch` call for the given match-rule string.
pub fn add_match(generator: &MessageGenerator, rule: &str) -> Result<Message> {
    generator.call("AddMatch", Some("s".to_string()), vec![Value::String(rule.to_string())])
}

/// Build a `RemoveMatch` call for the given match-rule string.
pub fn remove_match(generator: &MessageGenerator, rule: &str) -> Result<Message> {
    generator.call(
        "RemoveMatch",
        Some("s".to_string()),
        vec![Value::String(rule.to_string())],
    )
}

/// Build a `RequestName` call.
pub fn request_name(generator: &MessageGenerator, name: &str, flags: NameFlag) -> Result<Message> {
    generator.call(
        "RequestName",
        Some("su".to_string()),
        vec![Value::String(name.to_string()), Value::Uint32(flags.0)],
    )
}

/// Build a `ReleaseName` call.
pub fn release_name(generator: &MessageGenerator, name: &str) -> Result<Message> {
    generator.call(
        "ReleaseName",
        Some("s".to_string()),
        vec![Value::String(name.to_string())],
    )
}

/// Build a `ListNames` call.
pub fn list_names(generator: &MessageGenerator) -> Result<Message> {
    generator.call("ListNames", None, Vec::new())
}

/// Build a `GetNameOwner` call.
pub fn get_name_owner(generator: &MessageGenerator, name: &str) -> Result<Message> {
    generator.call(
        "GetNameOwner",
        Some("s".to_string()),
        vec![Value::String(name.to_string())],
    )
}

impl fmt::Display for NameReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_call_targets_the_bus() {
        let generator = bus();
        let message = hello(&generator).unwrap();

        assert_eq!(message.header.fields.path.as_deref(), Some(BUS_PATH));
        assert_eq!(
            message.header.fields.interface.as_deref(),
            Some(BUS_INTERFACE)
        );
        assert_eq!(message.header.fields.member.as_deref(), Some("Hello"));
        assert_eq!(
            message.header.fields.destination.as_deref(),
            Some(BUS_DESTINATION)
        );
    }

    #[test]
    fn request_name_encodes_flags_as_u32() {
        let generator = bus();
        let message = request_name(&generator, "org.example.App", NameFlag::DO_NOT_QUEUE).unwrap();

        assert_eq!(message.body_signature(), "su");
        assert_eq!(message.body[1], Value::Uint32(4));
    }

    #[test]
    fn properties_get_has_two_string_arguments() {
        let generator = properties(
            BusName::new("org.example.App").unwrap(),
            ObjectPath::new("/org/example/App").unwrap(),
        );
        let message = properties_get(&generator, "org.example.App", "Count").unwrap();

        assert_eq!(message.body_signature(), "ss");
    }
}
