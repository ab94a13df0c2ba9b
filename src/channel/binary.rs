//! Generic fixed-width binary channel.
//!
//! All values are stored at their native width in little-endian order with
//! no transformation.  24-bit integers are plain two's complement.  Arrays
//! carry a signed length prefix of the element's own width (32-bit for
//! float, double and string arrays).
//!
//! Strings are read up to a NUL terminator, but written *without* one unless
//! [`BinaryWriter::terminate_strings`] is enabled.  Files produced with the
//! default setting cannot be read back when they contain strings.

use std::io::{BufRead, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{element_count, prefix_len, ChannelError, EntryBudget, Reader, Result, Writer};

const U24_MASK: u32 = 0x00FF_FFFF;

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct BinaryReader<R: BufRead> {
    reader: R,
    budget: EntryBudget,
}

impl<R: BufRead> BinaryReader<R> {
    /// `reader` must already be positioned at the first entry.
    pub fn new(reader: R, entry_count: Option<u64>) -> Self {
        Self { reader, budget: EntryBudget::new(entry_count) }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_array<T>(
        &mut self,
        count: i64,
        mut read: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let count = element_count(count)?;
        let mut values = Vec::new();
        for _ in 0..count {
            values.push(read(self)?);
        }
        Ok(values)
    }
}

impl<R: BufRead> Reader for BinaryReader<R> {
    fn read_int8(&mut self)  -> Result<i8>  { Ok(self.reader.read_i8()?) }
    fn read_int16(&mut self) -> Result<i16> { Ok(self.reader.read_i16::<LittleEndian>()?) }
    fn read_int24(&mut self) -> Result<i32> { Ok(self.reader.read_i24::<LittleEndian>()?) }
    fn read_int32(&mut self) -> Result<i32> { Ok(self.reader.read_i32::<LittleEndian>()?) }

    fn read_uint8(&mut self)  -> Result<u8>  { Ok(self.reader.read_u8()?) }
    fn read_uint16(&mut self) -> Result<u16> { Ok(self.reader.read_u16::<LittleEndian>()?) }
    fn read_uint24(&mut self) -> Result<u32> { Ok(self.reader.read_u24::<LittleEndian>()?) }
    fn read_uint32(&mut self) -> Result<u32> { Ok(self.reader.read_u32::<LittleEndian>()?) }

    fn read_float(&mut self)  -> Result<f32> { Ok(self.reader.read_f32::<LittleEndian>()?) }
    fn read_double(&mut self) -> Result<f64> { Ok(self.reader.read_f64::<LittleEndian>()?) }

    fn read_string(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        self.reader.read_until(0, &mut bytes)?;
        if bytes.pop() != Some(0) {
            return Err(ChannelError::Truncated);
        }
        Ok(String::from_utf8(bytes)?)
    }

    fn read_int8_array(&mut self) -> Result<Vec<i8>> {
        let count = self.read_int8()?;
        self.read_array(count.into(), Self::read_int8)
    }
    fn read_int16_array(&mut self) -> Result<Vec<i16>> {
        let count = self.read_int16()?;
        self.read_array(count.into(), Self::read_int16)
    }
    fn read_int24_array(&mut self) -> Result<Vec<i32>> {
        let count = self.read_int24()?;
        self.read_array(count.into(), Self::read_int24)
    }
    fn read_int32_array(&mut self) -> Result<Vec<i32>> {
        let count = self.read_int32()?;
        self.read_array(count.into(), Self::read_int32)
    }
    fn read_uint8_array(&mut self) -> Result<Vec<u8>> {
        let count = self.read_int8()?;
        self.read_array(count.into(), Self::read_uint8)
    }
    fn read_uint16_array(&mut self) -> Result<Vec<u16>> {
        let count = self.read_int16()?;
        self.read_array(count.into(), Self::read_uint16)
    }
    fn read_uint24_array(&mut self) -> Result<Vec<u32>> {
        let count = self.read_int24()?;
        self.read_array(count.into(), Self::read_uint24)
    }
    fn read_uint32_array(&mut self) -> Result<Vec<u32>> {
        let count = self.read_int32()?;
        self.read_array(count.into(), Self::read_uint32)
    }
    fn read_float_array(&mut self) -> Result<Vec<f32>> {
        let count = self.read_int32()?;
        self.read_array(count.into(), Self::read_float)
    }
    /// Elements are decoded with the *float* reader and widened, matching
    /// the files this format was designed against.
    fn read_double_array(&mut self) -> Result<Vec<f64>> {
        let count = self.read_int32()?;
        self.read_array(count.into(), |r| r.read_float().map(f64::from))
    }
    fn read_string_array(&mut self) -> Result<Vec<String>> {
        let count = self.read_int32()?;
        self.read_array(count.into(), Self::read_string)
    }

    fn has_next(&mut self) -> Result<bool> {
        if !self.budget.spend() {
            return Ok(false);
        }
        Ok(!self.reader.fill_buf()?.is_empty())
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct BinaryWriter<W: Write> {
    writer:            W,
    terminate_strings: bool,
}

impl<W: Write> BinaryWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, terminate_strings: false }
    }

    /// Append a NUL after every string so the output can be read back.
    pub fn terminate_strings(mut self, enabled: bool) -> Self {
        self.terminate_strings = enabled;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Writer for BinaryWriter<W> {
    fn write_int8(&mut self, _: &str, value: i8) -> Result<()> {
        Ok(self.writer.write_i8(value)?)
    }
    fn write_int16(&mut self, _: &str, value: i16) -> Result<()> {
        Ok(self.writer.write_i16::<LittleEndian>(value)?)
    }
    fn write_int24(&mut self, _: &str, value: i32) -> Result<()> {
        // Low three bytes of the two's-complement word.
        Ok(self.writer.write_u24::<LittleEndian>(value as u32 & U24_MASK)?)
    }
    fn write_int32(&mut self, _: &str, value: i32) -> Result<()> {
        Ok(self.writer.write_i32::<LittleEndian>(value)?)
    }

    fn write_uint8(&mut self, _: &str, value: u8) -> Result<()> {
        Ok(self.writer.write_u8(value)?)
    }
    fn write_uint16(&mut self, _: &str, value: u16) -> Result<()> {
        Ok(self.writer.write_u16::<LittleEndian>(value)?)
    }
    fn write_uint24(&mut self, _: &str, value: u32) -> Result<()> {
        Ok(self.writer.write_u24::<LittleEndian>(value & U24_MASK)?)
    }
    fn write_uint32(&mut self, _: &str, value: u32) -> Result<()> {
        Ok(self.writer.write_u32::<LittleEndian>(value)?)
    }

    fn write_float(&mut self, _: &str, value: f32) -> Result<()> {
        Ok(self.writer.write_f32::<LittleEndian>(value)?)
    }
    fn write_double(&mut self, _: &str, value: f64) -> Result<()> {
        Ok(self.writer.write_f64::<LittleEndian>(value)?)
    }
    fn write_string(&mut self, _: &str, value: String) -> Result<()> {
        self.writer.write_all(value.as_bytes())?;
        if self.terminate_strings {
            self.writer.write_u8(0)?;
        }
        Ok(())
    }

    fn write_int8_array(&mut self, name: &str, values: Vec<i8>) -> Result<()> {
        self.write_int8(name, prefix_len(values.len(), 8)? as i8)?;
        values.into_iter().try_for_each(|v| self.write_int8(name, v))
    }
    fn write_int16_array(&mut self, name: &str, values: Vec<i16>) -> Result<()> {
        self.write_int16(name, prefix_len(values.len(), 16)? as i16)?;
        values.into_iter().try_for_each(|v| self.write_int16(name, v))
    }
    fn write_int24_array(&mut self, name: &str, values: Vec<i32>) -> Result<()> {
        self.write_int24(name, prefix_len(values.len(), 24)? as i32)?;
        values.into_iter().try_for_each(|v| self.write_int24(name, v))
    }
    fn write_int32_array(&mut self, name: &str, values: Vec<i32>) -> Result<()> {
        self.write_int32(name, prefix_len(values.len(), 32)? as i32)?;
        values.into_iter().try_for_each(|v| self.write_int32(name, v))
    }
    fn write_uint8_array(&mut self, name: &str, values: Vec<u8>) -> Result<()> {
        self.write_int8(name, prefix_len(values.len(), 8)? as i8)?;
        values.into_iter().try_for_each(|v| self.write_uint8(name, v))
    }
    fn write_uint16_array(&mut self, name: &str, values: Vec<u16>) -> Result<()> {
        self.write_int16(name, prefix_len(values.len(), 16)? as i16)?;
        values.into_iter().try_for_each(|v| self.write_uint16(name, v))
    }
    fn write_uint24_array(&mut self, name: &str, values: Vec<u32>) -> Result<()> {
        self.write_int24(name, prefix_len(values.len(), 24)? as i32)?;
        values.into_iter().try_for_each(|v| self.write_uint24(name, v))
    }
    fn write_uint32_array(&mut self, name: &str, values: Vec<u32>) -> Result<()> {
        self.write_int32(name, prefix_len(values.len(), 32)? as i32)?;
        values.into_iter().try_for_each(|v| self.write_uint32(name, v))
    }
    fn write_float_array(&mut self, name: &str, values: Vec<f32>) -> Result<()> {
        self.write_int32(name, prefix_len(values.len(), 32)? as i32)?;
        values.into_iter().try_for_each(|v| self.write_float(name, v))
    }
    fn write_double_array(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        self.write_int32(name, prefix_len(values.len(), 32)? as i32)?;
        values.into_iter().try_for_each(|v| self.write_double(name, v))
    }
    fn write_string_array(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        self.write_int32(name, prefix_len(values.len(), 32)? as i32)?;
        values.into_iter().try_for_each(|v| self.write_string(name, v))
    }

    fn finish_file(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(bytes: Vec<u8>) -> BinaryReader<Cursor<Vec<u8>>> {
        BinaryReader::new(Cursor::new(bytes), None)
    }

    #[test]
    fn int24_is_sign_extended() {
        let mut r = reader(vec![0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x80]);
        assert_eq!(r.read_int24().unwrap(), -1);
        assert_eq!(r.read_int24().unwrap(), -0x80_0000);
    }

    #[test]
    fn int24_write_keeps_low_bytes() {
        let mut w = BinaryWriter::new(Vec::new());
        w.write_int24("x", -2).unwrap();
        w.write_uint24("y", 0x0123_4567).unwrap();
        assert_eq!(w.into_inner(), vec![0xFE, 0xFF, 0xFF, 0x67, 0x45, 0x23]);
    }

    #[test]
    fn array_prefix_matches_element_width() {
        let mut w = BinaryWriter::new(Vec::new());
        w.write_int24_array("a", vec![1, -1]).unwrap();
        w.write_uint8_array("b", vec![7]).unwrap();
        let bytes = w.into_inner();
        assert_eq!(&bytes[..3], &[2, 0, 0]);
        assert_eq!(&bytes[9..], &[1, 7]);

        let mut r = reader(bytes);
        assert_eq!(r.read_int24_array().unwrap(), vec![1, -1]);
        assert_eq!(r.read_uint8_array().unwrap(), vec![7]);
    }

    #[test]
    fn uint8_array_too_long_for_prefix() {
        let mut w = BinaryWriter::new(Vec::new());
        let err = w.write_uint8_array("b", vec![0; 200]).unwrap_err();
        assert!(matches!(err, ChannelError::ArrayTooLong { len: 200, bits: 8 }));
    }

    #[test]
    fn negative_count_is_rejected() {
        let mut r = reader((-3i32).to_le_bytes().to_vec());
        assert!(matches!(r.read_int32_array(), Err(ChannelError::InvalidLength(-3))));
    }

    #[test]
    fn string_write_has_no_terminator_by_default() {
        let mut w = BinaryWriter::new(Vec::new());
        w.write_string("s", "abc".into()).unwrap();
        assert_eq!(w.into_inner(), b"abc");
    }

    #[test]
    fn terminated_strings_read_back() {
        let mut w = BinaryWriter::new(Vec::new()).terminate_strings(true);
        w.write_string("s", "abc".into()).unwrap();
        w.write_string("s", String::new()).unwrap();
        let mut r = reader(w.into_inner());
        assert_eq!(r.read_string().unwrap(), "abc");
        assert_eq!(r.read_string().unwrap(), "");
    }

    #[test]
    fn unterminated_string_is_truncated() {
        let mut r = reader(b"abc".to_vec());
        assert!(matches!(r.read_string(), Err(ChannelError::Truncated)));
    }

    #[test]
    fn invalid_utf8_string_is_rejected() {
        let mut r = reader(vec![0x43, 0xE9, 0x70, 0x00]);
        assert!(matches!(r.read_string(), Err(ChannelError::InvalidUtf8(_))));
    }

    #[test]
    fn double_array_reads_floats() {
        let mut bytes = 2i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&1.5f32.to_le_bytes());
        bytes.extend_from_slice(&(-2.25f32).to_le_bytes());
        let mut r = reader(bytes);
        assert_eq!(r.read_double_array().unwrap(), vec![1.5, -2.25]);
    }

    #[test]
    fn has_next_stops_at_eof() {
        let mut r = reader(vec![1, 2]);
        assert!(r.has_next().unwrap());
        r.read_uint16().unwrap();
        assert!(!r.has_next().unwrap());
    }

    #[test]
    fn has_next_honours_cap() {
        let mut r = BinaryReader::new(Cursor::new(vec![1, 2, 3, 4, 5]), Some(3));
        let mut seen = Vec::new();
        while r.has_next().unwrap() {
            seen.push(r.read_uint8().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn truncated_read_errors() {
        let mut r = reader(vec![1]);
        assert!(matches!(r.read_int32(), Err(ChannelError::Truncated)));
    }
}
