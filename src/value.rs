//! The in-memory representation of a D-Bus value.

use std::collections::BTreeMap;

use crate::object_path::ObjectPath;
use crate::signature::{self, SigType};

/// A single D-Bus value, tagged by the [`SigType`] it was built from.
///
/// Dicts are represented as an array of `DictEntry` values rather than a
/// native map, since the wire format preserves entry order and a map only
/// ever appears nested inside an array in the first place; see
/// [`Value::Array`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(u64),
    String(String),
    ObjectPath(ObjectPath),
    Signature(String),
    UnixFd(u32),
    Array(Vec<Value>),
    Struct(Vec<Value>),
    DictEntry(Box<Value>, Box<Value>),
    /// A variant: the signature of the inner single complete type, plus the
    /// inner value.
    Variant(String, Box<Value>),
}

impl Value {
    /// Construct a double-precision float value.
    ///
    /// Stored as its raw bits so that [`Value`] can implement bit-exact
    /// `PartialEq`, matching the round-trip law the codec is held to (NaN
    /// payloads included).
    pub fn double(value: f64) -> Value {
        Value::Double(value.to_bits())
    }

    /// Read back a double-precision float value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    /// Compute the [`SigType`] this value was constructed with.
    ///
    /// For an empty array this has to guess an element type (`y`), since
    /// nothing in the value itself records one; callers that need the real
    /// element type of a possibly-empty array — message body validation and
    /// encoding chief among them — should walk the *declared* signature with
    /// [`Value::matches_type`] instead of relying on this.
    pub fn sig_type(&self) -> SigType {
        match self {
            Value::Byte(_) => SigType::Byte,
            Value::Boolean(_) => SigType::Boolean,
            Value::Int16(_) => SigType::Int16,
            Value::Uint16(_) => SigType::Uint16,
            Value::Int32(_) => SigType::Int32,
            Value::Uint32(_) => SigType::Uint32,
            Value::Int64(_) => SigType::Int64,
            Value::Uint64(_) => SigType::Uint64,
            Value::Double(_) => SigType::Double,
            Value::String(_) => SigType::String,
            Value::ObjectPath(_) => SigType::ObjectPath,
            Value::Signature(_) => SigType::Signature,
            Value::UnixFd(_) => SigType::UnixFd,
            Value::Array(items) => {
                let inner = items.first().map(Value::sig_type).unwrap_or(SigType::Byte);
                SigType::Array(Box::new(inner))
            }
            Value::Struct(fields) => SigType::Struct(fields.iter().map(Value::sig_type).collect()),
            Value::DictEntry(key, value) => {
                SigType::DictEntry(Box::new(key.sig_type()), Box::new(value.sig_type()))
            }
            Value::Variant(..) => SigType::Variant,
        }
    }

    /// Whether this value could have been constructed against `ty`.
    ///
    /// Unlike comparing [`Value::sig_type`] strings, this walks into arrays
    /// and dict-entries using `ty`'s own element type rather than guessing
    /// one from the value's contents, so an empty `as` or `a{sv}` correctly
    /// matches its declared signature.
    pub fn matches_type(&self, ty: &SigType) -> bool {
        match (self, ty) {
            (Value::Byte(_), SigType::Byte) => true,
            (Value::Boolean(_), SigType::Boolean) => true,
            (Value::Int16(_), SigType::Int16) => true,
            (Value::Uint16(_), SigType::Uint16) => true,
            (Value::Int32(_), SigType::Int32) => true,
            (Value::Uint32(_), SigType::Uint32) => true,
            (Value::Int64(_), SigType::Int64) => true,
            (Value::Uint64(_), SigType::Uint64) => true,
            (Value::Double(_), SigType::Double) => true,
            (Value::String(_), SigType::String) => true,
            (Value::ObjectPath(_), SigType::ObjectPath) => true,
            (Value::Signature(_), SigType::Signature) => true,
            (Value::UnixFd(_), SigType::UnixFd) => true,
            (Value::Array(items), SigType::Array(elem)) => {
                items.iter().all(|item| item.matches_type(elem))
            }
            (Value::Struct(fields), SigType::Struct(types)) => {
                fields.len() == types.len()
                    && fields.iter().zip(types).all(|(f, t)| f.matches_type(t))
            }
            (Value::DictEntry(k, v), SigType::DictEntry(kt, vt)) => {
                k.matches_type(kt) && v.matches_type(vt)
            }
            (Value::Variant(..), SigType::Variant) => true,
            _ => false,
        }
    }

    /// Build a dict (array of dict-entries) from an insertion-ordered map.
    pub fn dict(entries: Vec<(Value, Value)>) -> Value {
        Value::Array(
            entries
                .into_iter()
                .map(|(k, v)| Value::DictEntry(Box::new(k), Box::new(v)))
                .collect(),
        )
    }

    /// Collect a dict's entries into a `BTreeMap` keyed by the debug
    /// representation of the key, for callers that don't care about
    /// preserving wire order.
    pub fn as_dict_entries(&self) -> Option<Vec<(&Value, &Value)>> {
        let Value::Array(items) = self else {
            return None;
        };

        items
            .iter()
            .map(|item| match item {
                Value::DictEntry(k, v) => Some((k.as_ref(), v.as_ref())),
                _ => None,
            })
            .collect()
    }
}

/// Compute the concatenated signature string of a tuple of values.
///
/// This is a best-effort rendering for display/logging: it derives each
/// value's type from its own contents via [`Value::sig_type`], so an empty
/// array's element type is guessed rather than known. It is not suitable for
/// validating a message body against a declared signature; see
/// [`Value::matches_type`] for that.
pub fn body_signature(values: &[Value]) -> String {
    signature::join(&values.iter().map(Value::sig_type).collect::<Vec<_>>())
}

/// A helper alias for callers building up dicts keyed by plain strings.
pub type StringMap = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_signature_concatenates_each_value() {
        let body = vec![Value::String("hi".to_string()), Value::Int32(1)];
        assert_eq!(body_signature(&body), "si");
    }

    #[test]
    fn empty_body_has_empty_signature() {
        assert_eq!(body_signature(&[]), "");
    }

    #[test]
    fn dict_round_trips_through_as_dict_entries() {
        let dict = Value::dict(vec![(
            Value::String("k".to_string()),
            Value::Int32(1),
        )]);

        let entries = dict.as_dict_entries().unwrap();
        assert_eq!(entries, vec![(&Value::String("k".to_string()), &Value::Int32(1))]);
    }

    #[test]
    fn double_preserves_nan_bit_pattern() {
        let value = Value::double(f64::NAN);
        assert_eq!(value.as_f64().unwrap().to_bits(), f64::NAN.to_bits());
    }

    #[test]
    fn empty_array_matches_its_declared_element_type() {
        let empty = Value::Array(Vec::new());
        assert!(empty.matches_type(&SigType::Array(Box::new(SigType::String))));
        assert!(empty.matches_type(&SigType::Array(Box::new(SigType::Struct(vec![
            SigType::String,
            SigType::Variant,
        ])))));
        assert!(!empty.matches_type(&SigType::String));
    }

    #[test]
    fn non_empty_array_rejects_mismatched_element_type() {
        let array = Value::Array(vec![Value::Int32(1)]);
        assert!(array.matches_type(&SigType::Array(Box::new(SigType::Int32))));
        assert!(!array.matches_type(&SigType::Array(Box::new(SigType::String))));
    }
}
