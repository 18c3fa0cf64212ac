use crate::error::{Error, ErrorKind, Result};
use crate::protocol::Endianness;
use crate::signature::{self, SigType};
use crate::value::Value;

/// The hard cap on a single array's encoded byte length (2²⁶).
const MAX_ARRAY_LEN: u32 = 1 << 26;

/// An alignment-tracking byte-buffer writer.
///
/// All padding is computed relative to the absolute length of `buf`. This is
/// only correct as an alignment anchor for values appended to a buffer whose
/// current length is already a multiple of 8 (true for both the very start
/// of a message and the start of its body, since the body always begins
/// 8-aligned) — see [`crate::message`] for where that invariant is upheld.
pub(crate) struct Writer<'a> {
    pub(crate) buf: &'a mut Vec<u8>,
    pub(crate) endianness: Endianness,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(buf: &'a mut Vec<u8>, endianness: Endianness) -> Self {
        Self { buf, endianness }
    }

    pub(crate) fn pad_to(&mut self, align: usize) {
        while self.buf.len() % align != 0 {
            self.buf.push(0);
        }
    }

    fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn write_u16(&mut self, value: u16) {
        let bytes = match self.endianness {
            Endianness::LITTLE => value.to_le_bytes(),
            _ => value.to_be_bytes(),
        };
        self.buf.extend_from_slice(&bytes);
    }

    fn write_u32(&mut self, value: u32) {
        let bytes = match self.endianness {
            Endianness::LITTLE => value.to_le_bytes(),
            _ => value.to_be_bytes(),
        };
        self.buf.extend_from_slice(&bytes);
    }

    fn write_u64(&mut self, value: u64) {
        let bytes = match self.endianness {
            Endianness::LITTLE => value.to_le_bytes(),
            _ => value.to_be_bytes(),
        };
        self.buf.extend_from_slice(&bytes);
    }

    fn write_string_body(&mut self, value: &str) {
        self.pad_to(4);
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    fn write_signature_body(&mut self, value: &str) {
        self.write_u8(value.len() as u8);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    /// Encode `value`, which must have been constructed with type `ty`.
    pub(crate) fn write_value(&mut self, ty: &SigType, value: &Value) -> Result<()> {
        self.pad_to(ty.alignment());

        match (ty, value) {
            (SigType::Byte, Value::Byte(v)) => self.write_u8(*v),
            (SigType::Boolean, Value::Boolean(v)) => self.write_u32(if *v { 1 } else { 0 }),
            (SigType::Int16, Value::Int16(v)) => self.write_u16(*v as u16),
            (SigType::Uint16, Value::Uint16(v)) => self.write_u16(*v),
            (SigType::Int32, Value::Int32(v)) => self.write_u32(*v as u32),
            (SigType::Uint32, Value::Uint32(v)) => self.write_u32(*v),
            (SigType::UnixFd, Value::UnixFd(v)) => self.write_u32(*v),
            (SigType::Int64, Value::Int64(v)) => self.write_u64(*v as u64),
            (SigType::Uint64, Value::Uint64(v)) => self.write_u64(*v),
            (SigType::Double, Value::Double(bits)) => self.write_u64(*bits),
            (SigType::String, Value::String(v)) => self.write_string_body(v),
            (SigType::ObjectPath, Value::ObjectPath(v)) => self.write_string_body(v.as_str()),
            (SigType::Signature, Value::Signature(v)) => self.write_signature_body(v),
            (SigType::Array(elem), Value::Array(items)) => self.write_array(elem, items)?,
            (SigType::Struct(fields), Value::Struct(values)) => {
                for (field, value) in fields.iter().zip(values) {
                    self.write_value(field, value)?;
                }
            }
            (SigType::DictEntry(kt, vt), Value::DictEntry(k, v)) => {
                self.write_value(kt, k)?;
                self.write_value(vt, v)?;
            }
            (SigType::Variant, Value::Variant(sig, inner)) => {
                let inner_ty = signature::parse_single(sig)?;
                self.write_signature_body(sig);
                self.write_value(&inner_ty, inner)?;
            }
            _ => return Err(Error::new(ErrorKind::SignatureBodyMismatch)),
        }

        Ok(())
    }

    fn write_array(&mut self, elem: &SigType, items: &[Value]) -> Result<()> {
        self.pad_to(4);
        let len_pos = self.buf.len();
        self.write_u32(0);

        // Alignment padding before the first element is mandatory even for
        // an empty array.
        self.pad_to(elem.alignment());
        let start = self.buf.len();

        for item in items {
            self.write_value(elem, item)?;
        }

        let array_len = (self.buf.len() - start) as u32;

        if array_len > MAX_ARRAY_LEN {
            return Err(Error::new(ErrorKind::ArrayTooLong(array_len)));
        }

        let bytes = match self.endianness {
            Endianness::LITTLE => array_len.to_le_bytes(),
            _ => array_len.to_be_bytes(),
        };
        self.buf[len_pos..len_pos + 4].copy_from_slice(&bytes);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::reader::Reader;

    fn encode(ty: &SigType, value: &Value, endianness: Endianness) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = Writer::new(&mut buf, endianness);
        w.write_value(ty, value).unwrap();
        buf
    }

    #[test]
    fn struct_of_string_and_int32_matches_wire_fixture() {
        // S2: `(si)` holding ("foo", 42).
        let ty = SigType::Struct(vec![SigType::String, SigType::Int32]);
        let value = Value::Struct(vec![Value::String("foo".to_string()), Value::Int32(42)]);

        let bytes = encode(&ty, &value, Endianness::LITTLE);

        assert_eq!(
            bytes,
            vec![0x03, 0x00, 0x00, 0x00, 0x66, 0x6F, 0x6F, 0x00, 0x2A, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn variant_of_u32_matches_wire_fixture() {
        // S3: a variant wrapping a u32 `7`.
        let ty = SigType::Variant;
        let value = Value::Variant("u".to_string(), Box::new(Value::Uint32(7)));

        let bytes = encode(&ty, &value, Endianness::LITTLE);

        assert_eq!(bytes, vec![0x01, 0x75, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn empty_array_still_pads_to_element_alignment() {
        // Invariant 4: empty array of `x` (8-aligned) still gets its length
        // prefix padded out to the element alignment.
        let ty = SigType::Array(Box::new(SigType::Int64));
        let value = Value::Array(Vec::new());

        let bytes = encode(&ty, &value, Endianness::LITTLE);

        // 4-byte length (0) then 4 bytes of padding up to the 8-alignment.
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn array_of_struct_round_trips_in_both_endiannesses() {
        let ty = SigType::Array(Box::new(SigType::Struct(vec![SigType::String, SigType::Int32])));
        let value = Value::Array(vec![
            Value::Struct(vec![Value::String("a".to_string()), Value::Int32(1)]),
            Value::Struct(vec![Value::String("bb".to_string()), Value::Int32(-2)]),
        ]);

        for endianness in [Endianness::LITTLE, Endianness::BIG] {
            let bytes = encode(&ty, &value, endianness);
            let mut r = Reader::new(&bytes, endianness);
            assert_eq!(r.read_value(&ty).unwrap(), value);
        }
    }

    #[test]
    fn dict_round_trips() {
        let ty = SigType::Array(Box::new(SigType::DictEntry(
            Box::new(SigType::String),
            Box::new(SigType::Variant),
        )));
        let value = Value::dict(vec![(
            Value::String("answer".to_string()),
            Value::Variant("i".to_string(), Box::new(Value::Int32(42))),
        )]);

        let bytes = encode(&ty, &value, Endianness::LITTLE);
        let mut r = Reader::new(&bytes, Endianness::LITTLE);
        assert_eq!(r.read_value(&ty).unwrap(), value);
    }

    #[test]
    fn every_element_lands_on_its_required_alignment() {
        // Invariant 3, exercised on a struct mixing every alignment class:
        // y (1) then x (8) then n (2) then a (4), all after a leading byte
        // that forces real padding in front of each field.
        let ty = SigType::Struct(vec![
            SigType::Byte,
            SigType::Int64,
            SigType::Int16,
            SigType::Array(Box::new(SigType::Byte)),
        ]);
        let value = Value::Struct(vec![
            Value::Byte(1),
            Value::Int64(2),
            Value::Int16(3),
            Value::Array(vec![Value::Byte(4)]),
        ]);

        let mut buf = vec![0u8]; // one byte so the struct itself needs padding to 8
        let mut w = Writer::new(&mut buf, Endianness::LITTLE);
        w.write_value(&ty, &value).unwrap();

        // struct padded to offset 8; y at 8; pad to 16 for x; x at 16..24;
        // n at 24..26 (already 2-aligned); pad to 28 for the array's u32
        // length prefix; one byte element follows.
        assert_eq!(buf.len(), 1 + 7 /* pad to 8 */ + 1 /* y */ + 7 /* pad to 16 */ + 8 /* x */ + 2 /* n */ + 2 /* pad to 4 */ + 4 /* array len */ + 1 /* array elem */);
        assert_eq!(&buf[16..24], &2i64.to_le_bytes());
        assert_eq!(&buf[24..26], &3i16.to_le_bytes());
    }

    #[test]
    fn double_round_trips_bit_exactly() {
        let ty = SigType::Double;
        let value = Value::double(f64::NAN);

        let bytes = encode(&ty, &value, Endianness::BIG);
        let mut r = Reader::new(&bytes, Endianness::BIG);
        let decoded = r.read_value(&ty).unwrap();

        assert_eq!(decoded, value);
    }
}
