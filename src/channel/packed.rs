//! Packed "Survive" channel.
//!
//! # Layout
//!
//! | Kind | Encoding |
//! |------|----------|
//! | 8/16/32-bit integers | big-endian (byte-reversed w.r.t. the binary channel) |
//! | `int24`  | big-endian 24-bit sign-magnitude: bit 23 sign, bits 0–22 magnitude |
//! | `uint24` | big-endian 24-bit |
//! | `float`  | big-endian 24-bit packed decimal, see [`PackedFloat`] |
//! | `double` | narrowed to `f32`, then as `float` |
//! | `string` | big-endian 16-bit index into the [`StringPool`] |
//! | arrays   | `int24` count prefix, except `int32`/`uint32` arrays: 32-bit count |
//!
//! The mixed array prefixes are part of the file format and must stay as
//! they are.
//!
//! # Sidecar
//! The reader receives a fully loaded pool.  The writer accumulates the pool
//! in memory and dumps it once in [`Writer::finish_file`]; a run that fails
//! earlier leaves no sidecar behind.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use super::{element_count, prefix_len, ChannelError, EntryBudget, Reader, Result, StringPool, Writer};

const U24_MASK:       u32 = 0x00FF_FFFF;
const SIGN_BIT:       u32 = 0x0080_0000;
const MAGNITUDE_MASK: u32 = 0x007F_FFFF;

// ── Numeric codecs ───────────────────────────────────────────────────────────

/// Largest magnitude a sign-magnitude `int24` can carry.
pub const INT24_MAX_MAGNITUDE: u32 = MAGNITUDE_MASK;

/// Encode a signed value as a 24-bit sign-magnitude word.
pub fn encode_int24(value: i32) -> Result<u32> {
    let magnitude = value.unsigned_abs();
    if magnitude > INT24_MAX_MAGNITUDE {
        return Err(ChannelError::MagnitudeOverflow(value.into()));
    }
    Ok(if value < 0 { magnitude | SIGN_BIT } else { magnitude })
}

/// Decode a 24-bit sign-magnitude word.  Bits above 23 are ignored.
pub fn decode_int24(word: u32) -> i32 {
    let magnitude = (word & MAGNITUDE_MASK) as i32;
    if word & SIGN_BIT != 0 { -magnitude } else { magnitude }
}

/// 24-bit packed decimal: `(-1)^negative * magnitude / 10^shift`.
///
/// ```text
///  23   22..20   19..0
/// sign  shift   magnitude
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedFloat {
    pub negative:  bool,
    /// Number of decimal digits after the point, 0–7.
    pub shift:     u32,
    /// Unsigned 20-bit magnitude.
    pub magnitude: u32,
}

impl PackedFloat {
    /// Distance to the nearest integer under which scaling stops.
    pub const EPSILON:   f32 = 0.005;
    pub const MAX_SHIFT: u32 = 7;

    const SHIFT_POS:      u32 = 20;
    const SHIFT_MASK:     u32 = 0x7;
    const MAGNITUDE_MASK: u32 = 0x000F_FFFF;

    /// Scale `value` by ten until it lies within [`Self::EPSILON`] of an
    /// integer, at most [`Self::MAX_SHIFT`] times.  Magnitudes wider than
    /// 20 bits are truncated.
    pub fn from_f32(value: f32) -> Self {
        let mut scaled = value.abs();
        let mut shift  = 0;
        while shift < Self::MAX_SHIFT && (scaled - scaled.round()).abs() >= Self::EPSILON {
            scaled *= 10.0;
            shift  += 1;
        }
        let magnitude = (scaled.round() as i32) as u32 & Self::MAGNITUDE_MASK;
        Self { negative: value < 0.0, shift, magnitude }
    }

    /// Divide by ten `shift` times.  The repeated `f32` division is what
    /// existing files were produced against; `magnitude / 10^shift` rounds
    /// differently.
    pub fn to_f32(self) -> f32 {
        let mut value = self.magnitude as f32;
        for _ in 0..self.shift {
            value /= 10.0;
        }
        if self.negative { -value } else { value }
    }

    pub fn from_word(word: u32) -> Self {
        Self {
            negative:  word & SIGN_BIT != 0,
            shift:     (word >> Self::SHIFT_POS) & Self::SHIFT_MASK,
            magnitude: word & Self::MAGNITUDE_MASK,
        }
    }

    pub fn to_word(self) -> u32 {
        let mut word = self.magnitude & Self::MAGNITUDE_MASK;
        word |= (self.shift & Self::SHIFT_MASK) << Self::SHIFT_POS;
        if self.negative {
            word |= SIGN_BIT;
        }
        word
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct PackedReader<R: BufRead> {
    reader: R,
    pool:   StringPool,
    budget: EntryBudget,
}

impl<R: BufRead> PackedReader<R> {
    pub fn new(reader: R, pool: StringPool, entry_count: Option<u64>) -> Self {
        Self { reader, pool, budget: EntryBudget::new(entry_count) }
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

impl<R: BufRead> Reader for PackedReader<R> {
    fn read_int8(&mut self)  -> Result<i8>  { Ok(self.reader.read_i8()?) }
    fn read_int16(&mut self) -> Result<i16> { Ok(self.reader.read_i16::<BigEndian>()?) }
    fn read_int24(&mut self) -> Result<i32> { Ok(decode_int24(self.reader.read_u24::<BigEndian>()?)) }
    fn read_int32(&mut self) -> Result<i32> { Ok(self.reader.read_i32::<BigEndian>()?) }

    fn read_uint8(&mut self)  -> Result<u8>  { Ok(self.reader.read_u8()?) }
    fn read_uint16(&mut self) -> Result<u16> { Ok(self.reader.read_u16::<BigEndian>()?) }
    fn read_uint24(&mut self) -> Result<u32> { Ok(self.reader.read_u24::<BigEndian>()?) }
    fn read_uint32(&mut self) -> Result<u32> { Ok(self.reader.read_u32::<BigEndian>()?) }

    fn read_float(&mut self) -> Result<f32> {
        let word = self.reader.read_u24::<BigEndian>()?;
        Ok(PackedFloat::from_word(word).to_f32())
    }
    fn read_double(&mut self) -> Result<f64> {
        self.read_float().map(f64::from)
    }

    fn read_string(&mut self) -> Result<String> {
        let index = self.reader.read_u16::<BigEndian>()?;
        Ok(self.pool.get(index.into())?.to_owned())
    }

    fn read_int8_array(&mut self) -> Result<Vec<i8>> {
        let count = self.read_int24()?;
        self.read_array(count.into(), Self::read_int8)
    }
    fn read_int16_array(&mut self) -> Result<Vec<i16>> {
        let count = self.read_int24()?;
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
        let count = self.read_int24()?;
        self.read_array(count.into(), Self::read_uint8)
    }
    fn read_uint16_array(&mut self) -> Result<Vec<u16>> {
        let count = self.read_int24()?;
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
        let count = self.read_int24()?;
        self.read_array(count.into(), Self::read_float)
    }
    fn read_double_array(&mut self) -> Result<Vec<f64>> {
        let count = self.read_int24()?;
        self.read_array(count.into(), |r| r.read_float().map(f64::from))
    }
    fn read_string_array(&mut self) -> Result<Vec<String>> {
        let count = self.read_int24()?;
        self.read_array(count.into(), Self::read_string)
    }

    fn read_hex8(&mut self) -> Result<u8> {
        Err(ChannelError::Unimplemented("PackedReader::read_hex8"))
    }
    fn read_hex16(&mut self) -> Result<u16> {
        Err(ChannelError::Unimplemented("PackedReader::read_hex16"))
    }
    fn read_hex32(&mut self) -> Result<u32> {
        Err(ChannelError::Unimplemented("PackedReader::read_hex32"))
    }

    fn has_next(&mut self) -> Result<bool> {
        if !self.budget.spend() {
            return Ok(false);
        }
        // Peek without consuming.
        Ok(!self.reader.fill_buf()?.is_empty())
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct PackedWriter<W: Write> {
    writer:    W,
    pool:      StringPool,
    text_path: Option<PathBuf>,
}

impl<W: Write> PackedWriter<W> {
    /// `text_path` is where the string pool is dumped on `finish_file`.
    /// Without it strings are still indexed but the pool is discarded.
    pub fn new(writer: W, text_path: Option<PathBuf>) -> Self {
        Self { writer, pool: StringPool::default(), text_path }
    }

    pub fn pool(&self) -> &StringPool {
        &self.pool
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_int24_count(&mut self, name: &str, len: usize) -> Result<()> {
        self.write_int24(name, prefix_len(len, 24)? as i32)
    }

    fn write_int32_count(&mut self, name: &str, len: usize) -> Result<()> {
        self.write_int32(name, prefix_len(len, 32)? as i32)
    }
}

impl<W: Write> Writer for PackedWriter<W> {
    fn write_int8(&mut self, _: &str, value: i8) -> Result<()> {
        Ok(self.writer.write_i8(value)?)
    }
    fn write_int16(&mut self, _: &str, value: i16) -> Result<()> {
        Ok(self.writer.write_i16::<BigEndian>(value)?)
    }
    fn write_int24(&mut self, _: &str, value: i32) -> Result<()> {
        Ok(self.writer.write_u24::<BigEndian>(encode_int24(value)?)?)
    }
    fn write_int32(&mut self, _: &str, value: i32) -> Result<()> {
        Ok(self.writer.write_i32::<BigEndian>(value)?)
    }

    fn write_uint8(&mut self, _: &str, value: u8) -> Result<()> {
        Ok(self.writer.write_u8(value)?)
    }
    fn write_uint16(&mut self, _: &str, value: u16) -> Result<()> {
        Ok(self.writer.write_u16::<BigEndian>(value)?)
    }
    fn write_uint24(&mut self, _: &str, value: u32) -> Result<()> {
        Ok(self.writer.write_u24::<BigEndian>(value & U24_MASK)?)
    }
    fn write_uint32(&mut self, _: &str, value: u32) -> Result<()> {
        Ok(self.writer.write_u32::<BigEndian>(value)?)
    }

    fn write_float(&mut self, _: &str, value: f32) -> Result<()> {
        Ok(self.writer.write_u24::<BigEndian>(PackedFloat::from_f32(value).to_word())?)
    }
    fn write_double(&mut self, name: &str, value: f64) -> Result<()> {
        self.write_float(name, value as f32)
    }

    fn write_string(&mut self, _: &str, value: String) -> Result<()> {
        let index = self.pool.intern(value)?;
        Ok(self.writer.write_u16::<BigEndian>(index)?)
    }

    fn write_int8_array(&mut self, name: &str, values: Vec<i8>) -> Result<()> {
        self.write_int24_count(name, values.len())?;
        values.into_iter().try_for_each(|v| self.write_int8(name, v))
    }
    fn write_int16_array(&mut self, name: &str, values: Vec<i16>) -> Result<()> {
        self.write_int24_count(name, values.len())?;
        values.into_iter().try_for_each(|v| self.write_int16(name, v))
    }
    fn write_int24_array(&mut self, name: &str, values: Vec<i32>) -> Result<()> {
        self.write_int24_count(name, values.len())?;
        values.into_iter().try_for_each(|v| self.write_int24(name, v))
    }
    fn write_int32_array(&mut self, name: &str, values: Vec<i32>) -> Result<()> {
        self.write_int32_count(name, values.len())?;
        values.into_iter().try_for_each(|v| self.write_int32(name, v))
    }
    fn write_uint8_array(&mut self, name: &str, values: Vec<u8>) -> Result<()> {
        self.write_int24_count(name, values.len())?;
        values.into_iter().try_for_each(|v| self.write_uint8(name, v))
    }
    fn write_uint16_array(&mut self, name: &str, values: Vec<u16>) -> Result<()> {
        self.write_int24_count(name, values.len())?;
        values.into_iter().try_for_each(|v| self.write_uint16(name, v))
    }
    fn write_uint24_array(&mut self, name: &str, values: Vec<u32>) -> Result<()> {
        self.write_int24_count(name, values.len())?;
        values.into_iter().try_for_each(|v| self.write_uint24(name, v))
    }
    fn write_uint32_array(&mut self, name: &str, values: Vec<u32>) -> Result<()> {
        self.write_int32_count(name, values.len())?;
        values.into_iter().try_for_each(|v| self.write_uint32(name, v))
    }
    fn write_float_array(&mut self, name: &str, values: Vec<f32>) -> Result<()> {
        self.write_int24_count(name, values.len())?;
        values.into_iter().try_for_each(|v| self.write_float(name, v))
    }
    fn write_double_array(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        self.write_int24_count(name, values.len())?;
        values.into_iter().try_for_each(|v| self.write_double(name, v))
    }
    fn write_string_array(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        self.write_int24_count(name, values.len())?;
        values.into_iter().try_for_each(|v| self.write_string(name, v))
    }

    fn write_hex8(&mut self, _: &str, _: u8) -> Result<()> {
        Err(ChannelError::Unimplemented("PackedWriter::write_hex8"))
    }
    fn write_hex16(&mut self, _: &str, _: u16) -> Result<()> {
        Err(ChannelError::Unimplemented("PackedWriter::write_hex16"))
    }
    fn write_hex32(&mut self, _: &str, _: u32) -> Result<()> {
        Err(ChannelError::Unimplemented("PackedWriter::write_hex32"))
    }

    fn finish_file(&mut self) -> Result<()> {
        self.writer.flush()?;
        match &self.text_path {
            Some(path) if !self.pool.is_empty() => self.pool.save(path),
            Some(_) => Ok(()),
            None => {
                if !self.pool.is_empty() {
                    debug!(strings = self.pool.len(), "no sidecar path configured, string pool dropped");
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(bytes: Vec<u8>, pool: StringPool) -> PackedReader<Cursor<Vec<u8>>> {
        PackedReader::new(Cursor::new(bytes), pool, None)
    }

    #[test]
    fn int24_sign_magnitude() {
        assert_eq!(encode_int24(-1).unwrap(), 0x80_0001);
        assert_eq!(decode_int24(0x80_0001), -1);
        assert_eq!(encode_int24(0).unwrap(), 0);
        assert_eq!(decode_int24(0), 0);
        assert_eq!(encode_int24(0x7F_FFFF).unwrap(), 0x7F_FFFF);
        assert_eq!(decode_int24(0xFF_FFFF), -0x7F_FFFF);
        assert!(matches!(encode_int24(0x80_0000), Err(ChannelError::MagnitudeOverflow(_))));
        assert!(matches!(encode_int24(i32::MIN), Err(ChannelError::MagnitudeOverflow(_))));
    }

    #[test]
    fn int24_bytes_are_big_endian() {
        let mut w = PackedWriter::new(Vec::new(), None);
        w.write_int24("x", -2).unwrap();
        assert_eq!(w.into_inner(), vec![0x80, 0x00, 0x02]);

        let mut r = reader(vec![0x80, 0x00, 0x02, 0x00, 0x01, 0x00], StringPool::default());
        assert_eq!(r.read_int24().unwrap(), -2);
        assert_eq!(r.read_int24().unwrap(), 256);
    }

    #[test]
    fn integers_are_byte_reversed() {
        let mut w = PackedWriter::new(Vec::new(), None);
        w.write_uint16("a", 0x1234).unwrap();
        w.write_int32("b", 0x0102_0304).unwrap();
        w.write_uint24("c", 0xAB_CDEF).unwrap();
        assert_eq!(w.into_inner(), vec![0x12, 0x34, 0x01, 0x02, 0x03, 0x04, 0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn packed_float_one_and_a_half() {
        let packed = PackedFloat::from_f32(1.5);
        assert_eq!(packed, PackedFloat { negative: false, shift: 1, magnitude: 15 });
        assert_eq!(packed.to_word(), 0x10_000F);
        assert_eq!(PackedFloat::from_word(0x10_000F).to_f32(), 1.5);
    }

    #[test]
    fn packed_float_negative_and_integral() {
        let packed = PackedFloat::from_f32(-42.0);
        assert_eq!(packed, PackedFloat { negative: true, shift: 0, magnitude: 42 });
        assert_eq!(packed.to_word(), 0x80_002A);
        assert_eq!(PackedFloat::from_word(packed.to_word()).to_f32(), -42.0);
    }

    #[test]
    fn packed_float_caps_shift_at_seven() {
        let packed = PackedFloat::from_f32(0.123_456_78);
        assert_eq!(packed.shift, PackedFloat::MAX_SHIFT);
        assert!(packed.to_word() & SIGN_BIT == 0);
    }

    #[test]
    fn packed_float_decode_uses_repeated_division() {
        let packed = PackedFloat { negative: false, shift: 3, magnitude: 1234 };
        let expected = 1234.0f32 / 10.0 / 10.0 / 10.0;
        assert_eq!(packed.to_f32().to_bits(), expected.to_bits());
    }

    #[test]
    fn packed_float_magnitude_wraps_past_twenty_bits() {
        // 861.78 never lands within EPSILON of an integer in f32, so scaling
        // runs on and the magnitude is masked to 20 bits.
        let packed = PackedFloat::from_f32(861.78);
        assert_eq!(packed, PackedFloat { negative: false, shift: 4, magnitude: 229_193 });
        assert!(packed.magnitude <= 0xF_FFFF);
        assert_ne!(packed.to_f32(), 861.78);
    }

    #[test]
    fn doubles_go_through_the_float_codec() {
        let mut w = PackedWriter::new(Vec::new(), None);
        w.write_double("d", 1.5).unwrap();
        w.write_double_array("ds", vec![-2.25]).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes, vec![0x10, 0x00, 0x0F, 0x00, 0x00, 0x01, 0xA0, 0x00, 0xE1]);

        let mut r = reader(bytes, StringPool::default());
        assert_eq!(r.read_double().unwrap(), 1.5);
        assert_eq!(r.read_double_array().unwrap(), vec![-2.25]);
        assert!(!r.has_next().unwrap());
    }

    #[test]
    fn strings_are_interned_without_dedup() {
        let mut w = PackedWriter::new(Vec::new(), None);
        w.write_string("name", "Alice".into()).unwrap();
        w.write_string("name", "Alice".into()).unwrap();
        assert_eq!(w.pool().len(), 2);
        assert_eq!(w.into_inner(), vec![0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn string_index_must_be_in_pool() {
        let mut r = reader(vec![0x00, 0x01, 0x00, 0x02], StringPool::parse("a,b"));
        assert_eq!(r.read_string().unwrap(), "b");
        assert!(matches!(r.read_string(), Err(ChannelError::StringIndex { index: 2, pool_size: 2 })));
    }

    #[test]
    fn array_prefixes_follow_format() {
        let mut w = PackedWriter::new(Vec::new(), None);
        w.write_int32_array("a", vec![7]).unwrap();
        w.write_float_array("b", vec![1.5]).unwrap();
        w.write_uint24_array("c", vec![]).unwrap();
        let bytes = w.into_inner();
        assert_eq!(
            bytes,
            vec![
                0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07, // int32 array: 32-bit count
                0x00, 0x00, 0x01, 0x10, 0x00, 0x0F,             // float array: 24-bit count
                0x00, 0x00, 0x00,                               // empty uint24 array
            ]
        );

        let mut r = reader(bytes, StringPool::default());
        assert_eq!(r.read_int32_array().unwrap(), vec![7]);
        assert_eq!(r.read_float_array().unwrap(), vec![1.5]);
        assert!(r.read_uint24_array().unwrap().is_empty());
        assert!(!r.has_next().unwrap());
    }

    #[test]
    fn negative_array_count_is_rejected() {
        let mut r = reader(vec![0x80, 0x00, 0x01], StringPool::default());
        assert!(matches!(r.read_int24_array(), Err(ChannelError::InvalidLength(-1))));
    }

    #[test]
    fn hex_accessors_are_unimplemented() {
        let mut r = reader(vec![0xFF; 4], StringPool::default());
        assert!(matches!(r.read_hex8(), Err(ChannelError::Unimplemented(_))));
        assert!(matches!(r.read_hex16(), Err(ChannelError::Unimplemented(_))));
        assert!(matches!(r.read_hex32(), Err(ChannelError::Unimplemented(_))));
        let mut w = PackedWriter::new(Vec::new(), None);
        assert!(matches!(w.write_hex32("h", 1), Err(ChannelError::Unimplemented(_))));
    }

    #[test]
    fn sidecar_written_once_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("strings.txt");
        let mut w = PackedWriter::new(Vec::new(), Some(sidecar.clone()));
        w.write_string("n", "a".into()).unwrap();
        w.write_string("n", "b".into()).unwrap();
        assert!(!sidecar.exists());
        w.finish_file().unwrap();
        assert_eq!(std::fs::read_to_string(&sidecar).unwrap(), "a,b,");
    }

    #[test]
    fn empty_pool_writes_no_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("strings.txt");
        let mut w = PackedWriter::new(Vec::new(), Some(sidecar.clone()));
        w.write_uint8("n", 1).unwrap();
        w.finish_file().unwrap();
        assert!(!sidecar.exists());
    }
}
