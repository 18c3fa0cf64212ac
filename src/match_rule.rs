//! Signal/call match rules, as sent to the bus's `AddMatch` method and used
//! locally by the router to decide which filter a message is delivered to.

use crate::message::Message;
use crate::protocol::MessageType;

/// A single `key='value'` match rule, built incrementally.
///
/// Comparing a [`Message`] against a rule with [`MatchRule::matches`] is
/// purely local bookkeeping for the router's own filter dispatch; rendering
/// with [`MatchRule::to_string`] additionally lets a caller register the
/// same rule with the bus via `AddMatch`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    message_type: Option<MessageType>,
    sender: Option<String>,
    interface: Option<String>,
    member: Option<String>,
    path: Option<String>,
    path_namespace: Option<String>,
    destination: Option<String>,
    args: Vec<(u8, String)>,
    arg0_path: Option<String>,
}

impl MatchRule {
    /// Start building an empty rule that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn path_namespace(mut self, path_namespace: impl Into<String>) -> Self {
        self.path_namespace = Some(path_namespace.into());
        self
    }

    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Match on a string-valued body argument at index `index` (0..=63).
    pub fn arg(mut self, index: u8, value: impl Into<String>) -> Self {
        self.args.push((index, value.into()));
        self
    }

    /// Match on `arg0` interpreted as an object-path prefix.
    pub fn arg0_path(mut self, prefix: impl Into<String>) -> Self {
        self.arg0_path = Some(prefix.into());
        self
    }

    /// Whether `message` satisfies every constraint set on this rule.
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(message_type) = self.message_type {
            if message.header.message_type != message_type {
                return false;
            }
        }

        if let Some(sender) = &self.sender {
            if message.header.fields.sender.as_deref() != Some(sender.as_str()) {
                return false;
            }
        }

        if let Some(interface) = &self.interface {
            if message.header.fields.interface.as_deref() != Some(interface.as_str()) {
                return false;
            }
        }

        if let Some(member) = &self.member {
            if message.header.fields.member.as_deref() != Some(member.as_str()) {
                return false;
            }
        }

        if let Some(path) = &self.path {
            if message.header.fields.path.as_deref() != Some(path.as_str()) {
                return false;
            }
        }

        if let Some(namespace) = &self.path_namespace {
            let Some(actual) = message.header.fields.path.as_deref() else {
                return false;
            };
            if !(actual == namespace.as_str() || actual.starts_with(&format!("{namespace}/"))) {
                return false;
            }
        }

        if let Some(destination) = &self.destination {
            if message.header.fields.destination.as_deref() != Some(destination.as_str()) {
                return false;
            }
        }

        for (index, expected) in &self.args {
            match message.body.get(*index as usize) {
                Some(crate::value::Value::String(actual)) if actual == expected => {}
                _ => return false,
            }
        }

        if let Some(prefix) = &self.arg0_path {
            let actual = match message.body.first() {
                Some(crate::value::Value::String(s)) => s.as_str(),
                Some(crate::value::Value::ObjectPath(p)) => p.as_str(),
                _ => return false,
            };

            if !(actual == prefix.as_str() || actual.starts_with(&format!("{prefix}/"))) {
                return false;
            }
        }

        true
    }
}

impl std::fmt::Display for MatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();

        if let Some(message_type) = self.message_type {
            let name = match message_type {
                MessageType::METHOD_CALL => "method_call",
                MessageType::METHOD_RETURN => "method_return",
                MessageType::ERROR => "error",
                _ => "signal",
            };
            parts.push(format!("type='{name}'"));
        }
        if let Some(sender) = &self.sender {
            parts.push(format!("sender='{sender}'"));
        }
        if let Some(interface) = &self.interface {
            parts.push(format!("interface='{interface}'"));
        }
        if let Some(member) = &self.member {
            parts.push(format!("member='{member}'"));
        }
        if let Some(path) = &self.path {
            parts.push(format!("path='{path}'"));
        }
        if let Some(path_namespace) = &self.path_namespace {
            parts.push(format!("path_namespace='{path_namespace}'"));
        }
        if let Some(destination) = &self.destination {
            parts.push(format!("destination='{destination}'"));
        }
        for (index, value) in &self.args {
            parts.push(format!("arg{index}='{value}'"));
        }
        if let Some(prefix) = &self.arg0_path {
            parts.push(format!("arg0path='{prefix}'"));
        }

        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message;
    use crate::names::{InterfaceName, MemberName};
    use crate::object_path::ObjectPath;

    fn name_owner_changed() -> Message {
        message::signal(
            ObjectPath::new("/org/freedesktop/DBus").unwrap(),
            InterfaceName::new("org.freedesktop.DBus").unwrap(),
            MemberName::new("NameOwnerChanged").unwrap(),
            None,
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn renders_to_bus_addmatch_syntax() {
        let rule = MatchRule::new()
            .message_type(MessageType::SIGNAL)
            .interface("org.freedesktop.DBus")
            .member("NameOwnerChanged");

        assert_eq!(
            rule.to_string(),
            "type='signal',interface='org.freedesktop.DBus',member='NameOwnerChanged'"
        );
    }

    #[test]
    fn matches_on_interface_and_member() {
        let rule = MatchRule::new()
            .interface("org.freedesktop.DBus")
            .member("NameOwnerChanged");

        assert!(rule.matches(&name_owner_changed()));

        let other = MatchRule::new().member("SomethingElse");
        assert!(!other.matches(&name_owner_changed()));
    }

    #[test]
    fn path_namespace_matches_prefix() {
        let rule = MatchRule::new().path_namespace("/org/freedesktop");
        assert!(rule.matches(&name_owner_changed()));

        let too_specific = MatchRule::new().path_namespace("/org/freedesktop/DBus/Other");
        assert!(!too_specific.matches(&name_owner_changed()));
    }
}
