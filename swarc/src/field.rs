use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder};
use swcore::buf::fill_buf;
use swcore::hash::Accumulator;

use crate::error::{ArcError, Result};
use crate::sink::Sink;

// Digest read-back buffer
const DIGEST_CHUNK: usize = 8 * 1024;

/// Binary encoding of a field, all integers are big endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    U16,
    U32,
    U64,
    Bytes,
    // Payload written straight into the sink, only the length is tracked
    Opaque,
}

impl Encoding {
    pub fn width(self) -> Option<u64> {
        match self {
            Encoding::U16 => Some(2),
            Encoding::U32 => Some(4),
            Encoding::U64 => Some(8),
            Encoding::Bytes | Encoding::Opaque => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoding::U16 => "u16",
            Encoding::U32 => "u32",
            Encoding::U64 => "u64",
            Encoding::Bytes => "bytes",
            Encoding::Opaque => "opaque",
        }
    }

    fn max(self) -> u64 {
        match self {
            Encoding::U16 => u16::MAX as u64,
            Encoding::U32 => u32::MAX as u64,
            _ => u64::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Uint(u64),
    Bytes(Vec<u8>),
    Opaque(u64),
}

/// A typed unit of binary data with a tracked position in the sink.
#[derive(Debug, Clone)]
pub struct Field {
    encoding: Encoding,
    value: Value,
    position: Option<u64>,
    dirty: bool,
}

impl Field {
    fn with(encoding: Encoding, value: Value) -> Field {
        Field {
            encoding,
            value,
            position: None,
            dirty: true,
        }
    }

    pub fn u16() -> Field {
        Field::with(Encoding::U16, Value::Uint(0))
    }

    pub fn u32() -> Field {
        Field::with(Encoding::U32, Value::Uint(0))
    }

    pub fn u64() -> Field {
        Field::with(Encoding::U64, Value::Uint(0))
    }

    pub fn bytes(value: Vec<u8>) -> Field {
        Field::with(Encoding::Bytes, Value::Bytes(value))
    }

    pub fn opaque(len: u64) -> Field {
        Field::with(Encoding::Opaque, Value::Opaque(len))
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn size(&self) -> u64 {
        match &self.value {
            Value::Uint(_) => self.encoding.width().unwrap_or(0),
            Value::Bytes(b) => b.len() as u64,
            Value::Opaque(len) => *len,
        }
    }

    pub fn position(&self) -> Option<u64> {
        self.position
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self.value {
            Value::Uint(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn set_uint(&mut self, value: u64) -> Result<()> {
        if self.encoding.width().is_none() || value > self.encoding.max() {
            return Err(ArcError::EncodingMismatch {
                value: value.to_string(),
                encoding: self.encoding.name(),
            });
        }
        if self.value != Value::Uint(value) {
            self.value = Value::Uint(value);
            self.dirty = true;
        }
        Ok(())
    }

    /// Returns true when the new value changed the field size, which
    /// invalidates the position of everything laid out after it.
    pub fn set_bytes(&mut self, value: Vec<u8>) -> Result<bool> {
        match &self.value {
            Value::Bytes(old) => {
                let resized = old.len() != value.len();
                if *old != value {
                    self.value = Value::Bytes(value);
                    self.dirty = true;
                }
                Ok(resized)
            }
            _ => Err(ArcError::EncodingMismatch {
                value: format!("{} bytes", value.len()),
                encoding: self.encoding.name(),
            }),
        }
    }

    /// Bytes fields are zero filled to the new length, fixed width fields
    /// derive their size from the encoding and refuse.
    pub fn resize(&mut self, len: u64) -> Result<()> {
        if len == self.size() {
            return Ok(());
        }
        match &mut self.value {
            Value::Bytes(b) => *b = vec![0; len as usize],
            Value::Opaque(old) => *old = len,
            Value::Uint(_) => {
                return Err(ArcError::Layout(format!(
                    "size of a {} field is fixed",
                    self.encoding.name()
                )))
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Assign a position if none is set yet, returns the end of the field.
    pub fn layout(&mut self, cursor: u64) -> u64 {
        match self.position {
            Some(pos) => pos + self.size(),
            None => self.place(cursor),
        }
    }

    /// Explicitly move the field, returns the end of the field.
    pub fn place(&mut self, position: u64) -> u64 {
        if self.position != Some(position) {
            self.position = Some(position);
            self.dirty = true;
        }
        position + self.size()
    }

    pub fn encode(&self) -> Vec<u8> {
        match &self.value {
            Value::Uint(v) => {
                let mut out = vec![0u8; self.size() as usize];
                match self.encoding {
                    Encoding::U16 => BigEndian::write_u16(&mut out, *v as u16),
                    Encoding::U32 => BigEndian::write_u32(&mut out, *v as u32),
                    _ => BigEndian::write_u64(&mut out, *v),
                }
                out
            }
            Value::Bytes(b) => b.clone(),
            Value::Opaque(_) => Vec::new(),
        }
    }

    fn require_position(&self) -> Result<u64> {
        self.position.ok_or_else(|| {
            ArcError::Layout(format!("{} field has not been laid out", self.encoding.name()))
        })
    }

    /// Serialize the value at its position if it changed since the last commit.
    pub fn commit<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let position = self.require_position()?;

        if self.encoding != Encoding::Opaque {
            sink.seek(SeekFrom::Start(position))?;
            sink.write_all(&self.encode())?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Feed the serialized bytes of this field back into `acc`.
    pub fn digest<S: Read + Seek + ?Sized>(&self, sink: &mut S, acc: &mut Accumulator) -> Result<()> {
        let position = self.require_position()?;
        let size = self.size();
        sink.seek(SeekFrom::Start(position))?;

        let mut buf = vec![0u8; DIGEST_CHUNK.min(size as usize)];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let (_, got) = fill_buf(sink, &mut buf[..want])?;
            if got < want {
                return Err(ArcError::IncompleteWrite {
                    position,
                    expected: size,
                    found: size - remaining + got as u64,
                });
            }
            acc.update(&buf[..got]);
            remaining -= got as u64;
        }
        Ok(())
    }

    /// Read the serialized bytes of this field from the sink.
    pub fn read_back<R: Read + Seek + ?Sized>(&self, source: &mut R) -> Result<Vec<u8>> {
        let position = self.require_position()?;
        let size = self.size();
        source.seek(SeekFrom::Start(position))?;

        let mut buf = vec![0u8; size as usize];
        let (_, got) = fill_buf(source, &mut buf)?;
        if (got as u64) < size {
            return Err(ArcError::IncompleteWrite {
                position,
                expected: size,
                found: got as u64,
            });
        }
        Ok(buf)
    }

    /// Replace the in-memory value with what the source holds at this position.
    ///
    /// Opaque payloads keep their length and are left in the source.
    pub fn load<R: Read + Seek + ?Sized>(&mut self, source: &mut R) -> Result<()> {
        if self.encoding == Encoding::Opaque {
            self.require_position()?;
            self.dirty = false;
            return Ok(());
        }
        let raw = self.read_back(source)?;
        self.value = match self.encoding {
            Encoding::U16 => Value::Uint(BigEndian::read_u16(&raw) as u64),
            Encoding::U32 => Value::Uint(BigEndian::read_u32(&raw) as u64),
            Encoding::U64 => Value::Uint(BigEndian::read_u64(&raw)),
            Encoding::Bytes | Encoding::Opaque => Value::Bytes(raw),
        };
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod test_field_value {
    use super::*;

    #[test]
    fn fixed_width_sizes() {
        assert_eq!(Field::u16().size(), 2);
        assert_eq!(Field::u32().size(), 4);
        assert_eq!(Field::u64().size(), 8);
    }

    #[test]
    fn out_of_range() {
        let mut field = Field::u16();

        assert!(field.set_uint(0xffff).is_ok());
        assert!(matches!(
            field.set_uint(0x1_0000),
            Err(ArcError::EncodingMismatch { encoding: "u16", .. })
        ));
        assert_eq!(field.as_uint(), Some(0xffff));
    }

    #[test]
    fn uint_into_bytes_field() {
        let mut field = Field::bytes(vec![1, 2]);

        assert!(matches!(field.set_uint(1), Err(ArcError::EncodingMismatch { .. })));
        assert!(matches!(Field::u32().set_bytes(vec![1]), Err(ArcError::EncodingMismatch { .. })));
    }

    #[test]
    fn bytes_resize_reported() {
        let mut field = Field::bytes(vec![1, 2]);

        assert!(!field.set_bytes(vec![3, 4]).unwrap());
        assert!(field.set_bytes(vec![3, 4, 5]).unwrap());
        assert_eq!(field.size(), 3);
    }

    #[test]
    fn resize_fixed_width_is_layout_error() {
        let mut field = Field::u32();

        assert!(field.resize(4).is_ok());
        assert!(matches!(field.resize(8), Err(ArcError::Layout(_))));

        let mut bytes = Field::bytes(vec![9; 3]);
        bytes.resize(5).unwrap();
        assert_eq!(bytes.as_bytes().unwrap(), &[0; 5]);
    }

    #[test]
    fn big_endian_encoding() {
        let mut field = Field::u32();
        field.set_uint(0x0102_0304).unwrap();

        assert_eq!(field.encode(), vec![1, 2, 3, 4]);
    }
}
