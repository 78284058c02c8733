//! Provides functionality to read primitives from JFR byte stream.
//!
//! Integers are either fixed-width big-endian or, when the chunk header sets the
//! compressed-integers feature bit, LEB128-style varints. Related JMC code:
//! [SeekableInputStream.java](https://github.com/openjdk/jmc/blob/8.2.0-ga/core/org.openjdk.jmc.flightrecorder/src/main/java/org/openjdk/jmc/flightrecorder/internal/parser/v1/SeekableInputStream.java)

use crate::reader::{Error, Result};
use byteorder::{ReadBytesExt, BE};
use std::io::{self, Cursor, ErrorKind, Read, Seek, SeekFrom};

pub(crate) const STRING_ENCODING_NULL: i8 = 0;
pub(crate) const STRING_ENCODING_EMPTY_STRING: i8 = 1;
pub(crate) const STRING_ENCODING_CONSTANT_POOL: i8 = 2;
pub(crate) const STRING_ENCODING_UTF8_BYTE_ARRAY: i8 = 3;
pub(crate) const STRING_ENCODING_CHAR_ARRAY: i8 = 4;
pub(crate) const STRING_ENCODING_LATIN1_BYTE_ARRAY: i8 = 5;

/// Upper bound on capacity reserved up front for a length read from the stream.
/// Larger collections grow as their elements are actually read.
pub(crate) const MAX_PREALLOCATION: usize = 4096;

#[derive(Debug, Eq, PartialEq)]
pub enum StringType {
    Null,
    Empty,
    Raw(String),
    ConstantPool(i64),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IntEncoding {
    Raw,
    Compressed, // varint encoding, but not ZigZag
}

/// Chunk body buffered in memory. Seeking is pure offset arithmetic.
pub type HeapByteStream = ByteStream<Cursor<Vec<u8>>>;

#[macro_use]
mod macros {
    macro_rules! read_num {
        ($self:ident, $ty:ty) => {
            return $self.read_exact().map(<$ty>::from_be_bytes)
        };
    }
}

pub struct ByteStream<T> {
    inner: T,
    int_encoding: IntEncoding,
}

impl<T: Read> ByteStream<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            int_encoding: IntEncoding::Raw,
        }
    }

    pub fn with_int_encoding(inner: T, int_encoding: IntEncoding) -> Self {
        Self {
            inner,
            int_encoding,
        }
    }

    pub fn set_int_encoding(&mut self, encoding: IntEncoding) {
        self.int_encoding = encoding;
    }

    pub fn int_encoding(&self) -> IntEncoding {
        self.int_encoding
    }

    pub fn read_exact<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.inner.read_u8()?)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.inner.read_i8()?)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_i8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        match self.int_encoding {
            IntEncoding::Raw => Ok(self.inner.read_i16::<BE>()?),
            IntEncoding::Compressed => self.read_var_u64(3, u16::MAX as u64).map(|v| v as u16 as i16),
        }
    }

    /// Java `char`: a UTF-16 code unit encoded like a short. A lone surrogate
    /// reads as U+FFFD.
    pub fn read_char(&mut self) -> Result<char> {
        let unit = self.read_i16()? as u16;
        Ok(char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        match self.int_encoding {
            IntEncoding::Raw => Ok(self.inner.read_i32::<BE>()?),
            IntEncoding::Compressed => self.read_var_u64(5, u32::MAX as u64).map(|v| v as u32 as i32),
        }
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        match self.int_encoding {
            IntEncoding::Raw => Ok(self.inner.read_i64::<BE>()?),
            IntEncoding::Compressed => self.read_var_i64(),
        }
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        read_num!(self, f32);
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        read_num!(self, f64);
    }

    /// Narrow varint: at most `max_bytes` bytes and a value no larger than `max`.
    fn read_var_u64(&mut self, max_bytes: u32, max: u64) -> Result<u64> {
        let bits = 64 - max.leading_zeros();
        let mut ret = 0u64;
        for i in 0..max_bytes {
            let b = self.read_u8()? as u64;
            ret |= (b & 0x7f) << (7 * i);
            if b & 0x80 == 0 {
                return if ret > max {
                    Err(Error::VarIntOverflow { bits })
                } else {
                    Ok(ret)
                };
            }
        }
        Err(Error::VarIntOverflow { bits })
    }

    /// 64-bit varint: eight 7-bit groups, then a ninth byte carrying a full 8 bits.
    fn read_var_i64(&mut self) -> Result<i64> {
        let mut ret = 0u64;
        for i in 0..8 {
            let b = self.read_u8()? as u64;
            ret |= (b & 0x7f) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(ret as i64);
            }
        }
        Ok((ret | ((self.read_u8()? as u64) << 56)) as i64)
    }

    pub fn read_string(&mut self) -> Result<StringType> {
        let encoding = self.read_i8()?;
        match encoding {
            STRING_ENCODING_NULL => Ok(StringType::Null),
            STRING_ENCODING_EMPTY_STRING => Ok(StringType::Empty),
            STRING_ENCODING_CONSTANT_POOL => self.read_i64().map(StringType::ConstantPool),
            STRING_ENCODING_UTF8_BYTE_ARRAY => {
                let buf = self.read_byte_array()?;
                String::from_utf8(buf)
                    .map(StringType::Raw)
                    .map_err(|_| Error::InvalidString)
            }
            STRING_ENCODING_CHAR_ARRAY => {
                let size = self.read_length()?;
                let mut units = Vec::with_capacity(size.min(MAX_PREALLOCATION));
                for _ in 0..size {
                    units.push(self.read_i16()? as u16);
                }
                Ok(StringType::Raw(String::from_utf16_lossy(&units)))
            }
            STRING_ENCODING_LATIN1_BYTE_ARRAY => {
                let buf = self.read_byte_array()?;
                Ok(StringType::Raw(buf.iter().map(|&c| c as char).collect()))
            }
            _ => Err(Error::InvalidStringEncoding(encoding)),
        }
    }

    fn read_length(&mut self) -> Result<usize> {
        let size = self.read_i32()?;
        usize::try_from(size).map_err(|_| Error::InvalidLength(size as i64))
    }

    fn read_byte_array(&mut self) -> Result<Vec<u8>> {
        let size = self.read_length()?;
        let mut buf = Vec::with_capacity(size.min(MAX_PREALLOCATION));
        self.inner.by_ref().take(size as u64).read_to_end(&mut buf)?;
        if buf.len() < size {
            return Err(io::Error::from(ErrorKind::UnexpectedEof).into());
        }
        Ok(buf)
    }
}

impl<T: Read + Seek> ByteStream<T> {
    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::test_util::Writer;
    use assert_matches::assert_matches;

    fn compressed(bytes: Vec<u8>) -> HeapByteStream {
        ByteStream::with_int_encoding(Cursor::new(bytes), IntEncoding::Compressed)
    }

    #[test]
    fn test_read_i64_compressed() {
        let mut s = compressed(vec![0x85u8, 0xb0, 0x3]);
        assert_eq!(55301, s.read_i64().unwrap());
    }

    #[test]
    fn test_read_padded_int() {
        // sizes are written as fixed four byte varints
        let mut s = compressed(vec![0x85, 0x80, 0x80, 0x00]);
        assert_eq!(5, s.read_i32().unwrap());
        assert_eq!(4, s.position().unwrap());
    }

    #[test]
    fn test_varint_boundaries() {
        for encoding in [IntEncoding::Raw, IntEncoding::Compressed] {
            let longs = [0, 1, -1, 127, 128, i32::MIN as i64, i32::MAX as i64, i64::MIN, i64::MAX];
            let ints = [0, 1, -1, 63, 64, i32::MIN, i32::MAX];
            let shorts = [0, -1, i16::MIN, i16::MAX];

            let mut w = Writer::new(encoding);
            longs.iter().for_each(|&v| w.i64(v));
            ints.iter().for_each(|&v| w.i32(v));
            shorts.iter().for_each(|&v| w.i16(v));

            let mut s = ByteStream::with_int_encoding(Cursor::new(w.into_bytes()), encoding);
            for &v in longs.iter() {
                assert_eq!(v, s.read_i64().unwrap());
            }
            for &v in ints.iter() {
                assert_eq!(v, s.read_i32().unwrap());
            }
            for &v in shorts.iter() {
                assert_eq!(v, s.read_i16().unwrap());
            }
        }
    }

    #[test]
    fn test_read_i64_uses_ninth_byte_fully() {
        let mut bytes = vec![0xff; 8];
        bytes.push(0xff);
        assert_eq!(-1, compressed(bytes).read_i64().unwrap());
    }

    #[test]
    fn test_read_i32_overflow() {
        // six continuation bytes can never be a 32-bit value
        let mut s = compressed(vec![0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert_matches!(s.read_i32(), Err(Error::VarIntOverflow { bits: 32 }));

        // five bytes, but more than 32 bits of payload
        let mut s = compressed(vec![0xff, 0xff, 0xff, 0xff, 0x7f]);
        assert_matches!(s.read_i32(), Err(Error::VarIntOverflow { bits: 32 }));
    }

    #[test]
    fn test_read_i16_overflow() {
        let mut s = compressed(vec![0xff, 0xff, 0x04]);
        assert_matches!(s.read_i16(), Err(Error::VarIntOverflow { bits: 16 }));
    }

    #[test]
    fn test_read_truncated() {
        let mut s = compressed(vec![0x80, 0x80]);
        assert_matches!(s.read_i64(), Err(Error::Io(_)));
    }

    #[test]
    fn test_read_string_null() {
        let mut s = compressed(vec![STRING_ENCODING_NULL as u8]);
        assert_eq!(StringType::Null, s.read_string().unwrap());
    }

    #[test]
    fn test_read_string_empty() {
        let mut s = compressed(vec![STRING_ENCODING_EMPTY_STRING as u8]);
        assert_eq!(StringType::Empty, s.read_string().unwrap());
    }

    #[test]
    fn test_read_string_constant_pool() {
        let mut bytes = vec![STRING_ENCODING_CONSTANT_POOL as u8];
        bytes.append(&mut vec![0x85, 0xb0, 0x3]);
        let mut s = compressed(bytes);
        assert_eq!(StringType::ConstantPool(55301), s.read_string().unwrap());
    }

    #[test]
    fn test_read_string_utf8() {
        let mut bytes = vec![STRING_ENCODING_UTF8_BYTE_ARRAY as u8];
        bytes.push(11); // length of "hello,world" in varint encoding
        bytes.extend_from_slice("hello,world".as_bytes());
        let mut s = compressed(bytes);
        assert_eq!(
            StringType::Raw("hello,world".to_string()),
            s.read_string().unwrap()
        );
    }

    #[test]
    fn test_read_string_char_array_and_latin1() {
        let mut bytes = vec![STRING_ENCODING_CHAR_ARRAY as u8, 2, b'o', b'k'];
        bytes.extend_from_slice(&[STRING_ENCODING_LATIN1_BYTE_ARRAY as u8, 2, 0x63, 0xe9]);
        let mut s = compressed(bytes);
        assert_eq!(StringType::Raw("ok".to_string()), s.read_string().unwrap());
        assert_eq!(StringType::Raw("cé".to_string()), s.read_string().unwrap());
    }

    #[test]
    fn test_read_string_unknown_encoding() {
        let mut s = compressed(vec![9]);
        assert_matches!(s.read_string(), Err(Error::InvalidStringEncoding(9)));
    }

    #[test]
    fn test_read_lone_surrogate() {
        let mut w = Writer::new(IntEncoding::Compressed);
        w.i16(0xd800u16 as i16);
        w.i16(0x41);
        let mut s = compressed(w.into_bytes());
        assert_eq!(char::REPLACEMENT_CHARACTER, s.read_char().unwrap());
        assert_eq!('A', s.read_char().unwrap());

        let mut w = Writer::new(IntEncoding::Compressed);
        w.i8(STRING_ENCODING_CHAR_ARRAY);
        w.i32(2);
        w.i16(0x61);
        w.i16(0xdc00u16 as i16);
        let mut s = compressed(w.into_bytes());
        assert_eq!(StringType::Raw("a\u{fffd}".to_string()), s.read_string().unwrap());
    }

    #[test]
    fn test_read_string_huge_length() {
        for encoding in [
            STRING_ENCODING_UTF8_BYTE_ARRAY,
            STRING_ENCODING_CHAR_ARRAY,
            STRING_ENCODING_LATIN1_BYTE_ARRAY,
        ] {
            let mut w = Writer::new(IntEncoding::Compressed);
            w.i8(encoding);
            w.i32(i32::MAX);
            w.bytes(b"abc");
            let mut s = compressed(w.into_bytes());
            assert_matches!(s.read_string(), Err(Error::Io(e)) if e.kind() == ErrorKind::UnexpectedEof);
        }
    }

    #[test]
    fn test_read_string_invalid_utf8() {
        let mut s = compressed(vec![STRING_ENCODING_UTF8_BYTE_ARRAY as u8, 1, 0xff]);
        assert_matches!(s.read_string(), Err(Error::InvalidString));
    }
}
