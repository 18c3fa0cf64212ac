//! Validated newtypes for the bus, interface, member, and error name
//! grammars used throughout the header-field encoding.

use std::error;
use std::fmt;
use std::ops::Deref;

const MAX_NAME_LEN: usize = 255;

/// Error raised when a name fails to validate against its grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum NamesError {
    Empty,
    TooLong,
    InvalidElement,
    TooFewElements,
}

impl fmt::Display for NamesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name must not be empty"),
            Self::TooLong => write!(f, "name exceeds {MAX_NAME_LEN} bytes"),
            Self::InvalidElement => write!(f, "name contains an invalid element"),
            Self::TooFewElements => write!(f, "name must have at least two dot-separated elements"),
        }
    }
}

impl error::Error for NamesError {}

fn valid_element(element: &str, allow_leading_digit: bool) -> bool {
    if element.is_empty() {
        return false;
    }

    for (i, b) in element.bytes().enumerate() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => {}
            b'0'..=b'9' if i > 0 || allow_leading_digit => {}
            _ => return false,
        }
    }

    true
}

fn validate_dotted(name: &str, allow_unique: bool) -> Result<(), NamesError> {
    if name.is_empty() {
        return Err(NamesError::Empty);
    }

    if name.len() > MAX_NAME_LEN {
        return Err(NamesError::TooLong);
    }

    if allow_unique && name.starts_with(':') {
        let rest = &name[1..];

        if rest.is_empty() || !rest.split('.').all(|e| valid_element(e, true)) {
            return Err(NamesError::InvalidElement);
        }

        return Ok(());
    }

    let elements: Vec<&str> = name.split('.').collect();

    if elements.len() < 2 {
        return Err(NamesError::TooFewElements);
    }

    if !elements.iter().all(|e| valid_element(e, false)) {
        return Err(NamesError::InvalidElement);
    }

    Ok(())
}

fn validate_member(name: &str) -> Result<(), NamesError> {
    if name.is_empty() {
        return Err(NamesError::Empty);
    }

    if name.len() > MAX_NAME_LEN {
        return Err(NamesError::TooLong);
    }

    if name.contains('.') || !valid_element(name, false) {
        return Err(NamesError::InvalidElement);
    }

    Ok(())
}

macro_rules! dotted_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(String);

        impl $name {
            /// Validate and construct a new name.
            pub fn new(name: impl Into<String>) -> Result<Self, NamesError> {
                let name = name.into();
                validate_dotted(&name, true)?;
                Ok(Self(name))
            }

            /// Borrow the name as a plain string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether this is a unique (bus-assigned) connection name.
            pub fn is_unique(&self) -> bool {
                self.0.starts_with(':')
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = NamesError;

            fn try_from(name: &str) -> Result<Self, Self::Error> {
                Self::new(name)
            }
        }

        impl TryFrom<String> for $name {
            type Error = NamesError;

            fn try_from(name: String) -> Result<Self, Self::Error> {
                Self::new(name)
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }
    };
}

dotted_name! {
    /// A well-known or unique bus name, e.g. `org.freedesktop.DBus` or
    /// `:1.42`.
    BusName
}

dotted_name! {
    /// An interface name, e.g. `org.freedesktop.DBus.Properties`.
    InterfaceName
}

dotted_name! {
    /// An error name, e.g. `org.freedesktop.DBus.Error.UnknownMethod`.
    ErrorName
}

/// A member name (method or signal), e.g. `Hello`. Unlike the other names,
/// members are a single element and never contain a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberName(String);

impl MemberName {
    /// Validate and construct a new member name.
    pub fn new(name: impl Into<String>) -> Result<Self, NamesError> {
        let name = name.into();
        validate_member(&name)?;
        Ok(Self(name))
    }

    /// Borrow the name as a plain string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for MemberName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for MemberName {
    type Error = NamesError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl PartialEq<str> for MemberName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_bus_names_validate() {
        assert!(BusName::new("org.freedesktop.DBus").is_ok());
        assert!(BusName::new("org").is_err());
    }

    #[test]
    fn unique_bus_names_validate() {
        assert!(BusName::new(":1.42").is_ok());
        assert!(BusName::new(":").is_err());
    }

    #[test]
    fn interface_names_require_two_elements() {
        assert!(InterfaceName::new("org.freedesktop.DBus.Properties").is_ok());
        assert!(InterfaceName::new("NoDot").is_err());
    }

    #[test]
    fn member_names_reject_dots() {
        assert!(MemberName::new("Hello").is_ok());
        assert!(MemberName::new("org.Hello").is_err());
        assert!(MemberName::new("1Hello").is_err());
    }

    #[test]
    fn names_enforce_length_cap() {
        let long = "a".repeat(300);
        assert_eq!(MemberName::new(long.clone()), Err(NamesError::TooLong));
        assert_eq!(ErrorName::new(format!("a.{long}")), Err(NamesError::TooLong));
    }
}
