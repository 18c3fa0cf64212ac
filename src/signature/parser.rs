use super::SignatureError;

/// Maximum nesting depth for both arrays and structs, per the D-Bus spec.
pub(crate) const MAX_DEPTH: usize = 32;

/// Maximum length in bytes of a signature string.
pub(crate) const MAX_SIGNATURE_LEN: usize = 255;

/// A single complete type, recursively built up from the D-Bus type-code
/// alphabet.
///
/// This is the tree the type codec (see [`crate::codec`]) walks in lock-step
/// with a [`Value`](crate::value::Value) to serialise or deserialise it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigType {
    Byte,
    Boolean,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    String,
    ObjectPath,
    Signature,
    UnixFd,
    Array(Box<SigType>),
    Struct(Vec<SigType>),
    DictEntry(Box<SigType>, Box<SigType>),
    Variant,
}

impl SigType {
    /// The alignment in bytes required before a value of this type.
    pub fn alignment(&self) -> usize {
        match self {
            Self::Byte | Self::Signature | Self::Variant => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Boolean
            | Self::Int32
            | Self::Uint32
            | Self::UnixFd
            | Self::String
            | Self::ObjectPath
            | Self::Array(_) => 4,
            Self::Int64 | Self::Uint64 | Self::Double | Self::Struct(_) | Self::DictEntry(..) => 8,
        }
    }

    /// Whether this is one of the basic (non-container, non-variant) types
    /// that may be used as a dict-entry key.
    pub fn is_basic(&self) -> bool {
        matches!(
            self,
            Self::Byte
                | Self::Boolean
                | Self::Int16
                | Self::Uint16
                | Self::Int32
                | Self::Uint32
                | Self::Int64
                | Self::Uint64
                | Self::Double
                | Self::String
                | Self::ObjectPath
                | Self::Signature
                | Self::UnixFd
        )
    }

    /// Render this type back into its signature string form.
    pub fn to_signature_string(&self) -> String {
        let mut out = String::new();
        self.write_signature(&mut out);
        out
    }

    fn write_signature(&self, out: &mut String) {
        match self {
            Self::Byte => out.push('y'),
            Self::Boolean => out.push('b'),
            Self::Int16 => out.push('n'),
            Self::Uint16 => out.push('q'),
            Self::Int32 => out.push('i'),
            Self::Uint32 => out.push('u'),
            Self::Int64 => out.push('x'),
            Self::Uint64 => out.push('t'),
            Self::Double => out.push('d'),
            Self::String => out.push('s'),
            Self::ObjectPath => out.push('o'),
            Self::Signature => out.push('g'),
            Self::UnixFd => out.push('h'),
            Self::Variant => out.push('v'),
            Self::Array(inner) => {
                out.push('a');
                inner.write_signature(out);
            }
            Self::Struct(fields) => {
                out.push('(');
                for field in fields {
                    field.write_signature(out);
                }
                out.push(')');
            }
            Self::DictEntry(key, value) => {
                out.push('{');
                key.write_signature(out);
                value.write_signature(out);
                out.push('}');
            }
        }
    }
}

/// Parse a signature string into an ordered sequence of single complete
/// types.
///
/// Parsing is total: there is no partial recovery, and any violation of the
/// grammar is reported immediately.
pub fn parse(signature: &str) -> Result<Vec<SigType>, SignatureError> {
    if signature.len() > MAX_SIGNATURE_LEN {
        return Err(SignatureError::SignatureTooLong);
    }

    let bytes = signature.as_bytes();
    let mut pos = 0;
    let mut types = Vec::new();

    while pos < bytes.len() {
        let (ty, next) = parse_one(bytes, pos, 0, 0, false)?;
        types.push(ty);
        pos = next;
    }

    Ok(types)
}

/// Parse a signature that must consist of exactly one complete type, as
/// required for the inner signature of a variant.
pub fn parse_single(signature: &str) -> Result<SigType, SignatureError> {
    if signature.len() > MAX_SIGNATURE_LEN {
        return Err(SignatureError::SignatureTooLong);
    }

    let bytes = signature.as_bytes();
    let (ty, next) = parse_one(bytes, 0, 0, 0, false)?;

    if next != bytes.len() {
        return Err(SignatureError::VariantSignatureMustBeSingleCompleteType);
    }

    Ok(ty)
}

/// Parse a single complete type starting at `pos`, returning the type and
/// the offset just past it.
fn parse_one(
    bytes: &[u8],
    pos: usize,
    array_depth: usize,
    struct_depth: usize,
    in_array: bool,
) -> Result<(SigType, usize), SignatureError> {
    let Some(&b) = bytes.get(pos) else {
        return Err(SignatureError::MissingArrayElementType);
    };

    let pos = pos + 1;

    let ty = match b {
        b'y' => SigType::Byte,
        b'b' => SigType::Boolean,
        b'n' => SigType::Int16,
        b'q' => SigType::Uint16,
        b'i' => SigType::Int32,
        b'u' => SigType::Uint32,
        b'x' => SigType::Int64,
        b't' => SigType::Uint64,
        b'd' => SigType::Double,
        b's' => SigType::String,
        b'o' => SigType::ObjectPath,
        b'g' => SigType::Signature,
        b'h' => SigType::UnixFd,
        b'v' => SigType::Variant,
        b'a' => {
            if array_depth >= MAX_DEPTH {
                return Err(SignatureError::ExceededMaximumArrayRecursion);
            }

            let (inner, next) = parse_one(bytes, pos, array_depth + 1, struct_depth, true)?;
            return Ok((SigType::Array(Box::new(inner)), next));
        }
        b'(' => {
            if !in_array && struct_depth >= MAX_DEPTH {
                return Err(SignatureError::ExceededMaximumStructRecursion);
            }

            let mut fields = Vec::new();
            let mut cursor = pos;

            loop {
                match bytes.get(cursor) {
                    Some(b')') => break,
                    Some(_) => {
                        let (field, next) =
                            parse_one(bytes, cursor, array_depth, struct_depth + 1, false)?;
                        fields.push(field);
                        cursor = next;
                    }
                    None => return Err(SignatureError::StructStartedButNotEnded),
                }
            }

            if fields.is_empty() {
                return Err(SignatureError::StructHasNoFields);
            }

            return Ok((SigType::Struct(fields), cursor + 1));
        }
        b')' => return Err(SignatureError::StructEndedButNotStarted),
        b'{' => {
            if !in_array {
                return Err(SignatureError::DictEntryNotInsideArray);
            }

            let (key, next) = parse_one(bytes, pos, array_depth, struct_depth + 1, false)?;

            if !key.is_basic() {
                return Err(SignatureError::DictKeyMustBeBasicType);
            }

            match bytes.get(next) {
                Some(b'}') => return Err(SignatureError::DictEntryMustHaveExactlyTwoFields),
                Some(_) => {}
                None => return Err(SignatureError::DictStartedButNotEnded),
            }

            let (value, next) = parse_one(bytes, next, array_depth, struct_depth + 1, false)?;

            return match bytes.get(next) {
                Some(b'}') => Ok((SigType::DictEntry(Box::new(key), Box::new(value)), next + 1)),
                Some(_) => Err(SignatureError::DictEntryMustHaveExactlyTwoFields),
                None => Err(SignatureError::DictStartedButNotEnded),
            };
        }
        b'}' => return Err(SignatureError::DictEndedButNotStarted),
        other => return Err(SignatureError::UnknownTypeCode(other)),
    };

    Ok((ty, pos))
}
