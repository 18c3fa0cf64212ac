use crate::error::{Error, ErrorKind, Result};
use crate::object_path::{self, ObjectPath};
use crate::protocol::Endianness;
use crate::signature::{self, SigType};
use crate::value::Value;

/// An alignment-tracking byte-buffer reader.
///
/// See [`super::writer::Writer`] for the alignment-anchor invariant this
/// relies on.
pub(crate) struct Reader<'a> {
    pub(crate) buf: &'a [u8],
    pub(crate) pos: usize,
    pub(crate) endianness: Endianness,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8], endianness: Endianness) -> Self {
        Self {
            buf,
            pos: 0,
            endianness,
        }
    }

    pub(crate) fn pad_to(&mut self, align: usize) -> Result<()> {
        while self.pos % align != 0 {
            self.read_u8()?;
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or_else(|| Error::new(ErrorKind::BufferUnderflow))?;

        if end > self.buf.len() {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        }

        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes: [u8; 2] = self.take(2)?.try_into().expect("exactly 2 bytes");
        Ok(match self.endianness {
            Endianness::LITTLE => u16::from_le_bytes(bytes),
            _ => u16::from_be_bytes(bytes),
        })
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().expect("exactly 4 bytes");
        Ok(match self.endianness {
            Endianness::LITTLE => u32::from_le_bytes(bytes),
            _ => u32::from_be_bytes(bytes),
        })
    }

    fn read_u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("exactly 8 bytes");
        Ok(match self.endianness {
            Endianness::LITTLE => u64::from_le_bytes(bytes),
            _ => u64::from_be_bytes(bytes),
        })
    }

    fn read_string_body(&mut self) -> Result<String> {
        self.pad_to(4)?;
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes)?.to_string();

        if self.read_u8()? != 0 {
            return Err(Error::new(ErrorKind::NotNullTerminated));
        }

        Ok(s)
    }

    fn read_signature_body(&mut self) -> Result<String> {
        let len = self.read_u8()? as usize;
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes)?.to_string();

        if self.read_u8()? != 0 {
            return Err(Error::new(ErrorKind::NotNullTerminated));
        }

        // Validate the grammar eagerly, matching how the writer validates a
        // variant's inner signature before trusting it.
        signature::parse(&s)?;
        Ok(s)
    }

    /// Decode a value of type `ty`.
    pub(crate) fn read_value(&mut self, ty: &SigType) -> Result<Value> {
        self.pad_to(ty.alignment())?;

        Ok(match ty {
            SigType::Byte => Value::Byte(self.read_u8()?),
            SigType::Boolean => {
                let raw = self.read_u32()?;
                match raw {
                    0 => Value::Boolean(false),
                    1 => Value::Boolean(true),
                    other => return Err(Error::new(ErrorKind::InvalidBoolean(other))),
                }
            }
            SigType::Int16 => Value::Int16(self.read_u16()? as i16),
            SigType::Uint16 => Value::Uint16(self.read_u16()?),
            SigType::Int32 => Value::Int32(self.read_u32()? as i32),
            SigType::Uint32 => Value::Uint32(self.read_u32()?),
            SigType::UnixFd => Value::UnixFd(self.read_u32()?),
            SigType::Int64 => Value::Int64(self.read_u64()? as i64),
            SigType::Uint64 => Value::Uint64(self.read_u64()?),
            SigType::Double => Value::Double(self.read_u64()?),
            SigType::String => Value::String(self.read_string_body()?),
            SigType::ObjectPath => {
                let s = self.read_string_body()?;
                Value::ObjectPath(ObjectPath::new(s)?)
            }
            SigType::Signature => Value::Signature(self.read_signature_body()?),
            SigType::Array(elem) => Value::Array(self.read_array(elem)?),
            SigType::Struct(fields) => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push(self.read_value(field)?);
                }
                Value::Struct(values)
            }
            SigType::DictEntry(kt, vt) => {
                let key = self.read_value(kt)?;
                let value = self.read_value(vt)?;
                Value::DictEntry(Box::new(key), Box::new(value))
            }
            SigType::Variant => {
                let sig = self.read_signature_body()?;
                let inner_ty = signature::parse_single(&sig)?;
                let inner = self.read_value(&inner_ty)?;
                Value::Variant(sig, Box::new(inner))
            }
        })
    }

    fn read_array(&mut self, elem: &SigType) -> Result<Vec<Value>> {
        self.pad_to(4)?;
        let byte_len = self.read_u32()? as usize;
        self.pad_to(elem.alignment())?;

        let end = self
            .pos
            .checked_add(byte_len)
            .ok_or_else(|| Error::new(ErrorKind::BufferUnderflow))?;

        if end > self.buf.len() {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        }

        let mut items = Vec::new();

        while self.pos < end {
            items.push(self.read_value(elem)?);
        }

        if self.pos != end {
            return Err(Error::new(ErrorKind::SignatureBodyMismatch));
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_boolean_values_other_than_zero_or_one() {
        let bytes = [2, 0, 0, 0];
        let mut r = Reader::new(&bytes, Endianness::LITTLE);
        let err = r.read_value(&SigType::Boolean).unwrap_err();
        assert_eq!(err.to_string(), "invalid boolean value 2 (must be 0 or 1)");
    }

    #[test]
    fn truncated_string_length_is_a_buffer_underflow() {
        // Declares a 10-byte string but only 2 bytes follow.
        let bytes = [10, 0, 0, 0, b'h', b'i'];
        let mut r = Reader::new(&bytes, Endianness::LITTLE);
        let err = r.read_value(&SigType::String).unwrap_err();
        assert_eq!(err.to_string(), "buffer underflow");
    }

    #[test]
    fn rejects_non_utf8_string_bodies() {
        let mut bytes = vec![2, 0, 0, 0];
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        bytes.push(0);
        let mut r = Reader::new(&bytes, Endianness::LITTLE);
        assert!(r.read_value(&SigType::String).is_err());
    }

    #[test]
    fn array_declared_byte_length_must_match_consumed_bytes() {
        // Array of `i` claiming 8 bytes but the buffer only holds one
        // element's worth (4 bytes) before running out.
        let mut bytes = vec![8, 0, 0, 0];
        bytes.extend_from_slice(&1i32.to_le_bytes());
        let mut r = Reader::new(&bytes, Endianness::LITTLE);
        let ty = SigType::Array(Box::new(SigType::Int32));
        assert!(r.read_value(&ty).is_err());
    }
}
