//! Type registry: binds every [`TypeTag`] to a matched read/write pair.
//!
//! This is the only place where "what a field means" meets "how a channel
//! encodes it".  Channels know nothing about tags and the driver knows
//! nothing about byte layout.
//!
//! A [`Binding<T>`] pairs a read over `&mut dyn Reader` with a write over
//! `&mut dyn Writer`, both on the same value type `T`, so a value decoded by
//! one channel is handed unchanged to the other.  The registry is built once
//! with [`Registry::new`] and passed by reference into the driver.

use std::collections::HashMap;

use crate::channel::{Reader, Result, Writer};
use crate::schema::TypeTag;

pub type ReadFn<T>  = fn(&mut dyn Reader) -> Result<T>;
pub type WriteFn<T> = fn(&mut dyn Writer, &str, T) -> Result<()>;

// ── Transcode trait ──────────────────────────────────────────────────────────

/// Move one field from a source to a destination.
pub trait Transcode {
    fn transcode(&self, name: &str, src: &mut dyn Reader, dst: &mut dyn Writer) -> Result<()>;
}

/// Read/write pair sharing one value type.
pub struct Binding<T> {
    read:  ReadFn<T>,
    write: WriteFn<T>,
}

impl<T> Binding<T> {
    pub fn new(read: ReadFn<T>, write: WriteFn<T>) -> Self {
        Self { read, write }
    }
}

impl<T> Transcode for Binding<T> {
    fn transcode(&self, name: &str, src: &mut dyn Reader, dst: &mut dyn Writer) -> Result<()> {
        let value = (self.read)(src)?;
        (self.write)(dst, name, value)
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

pub struct Registry {
    table: HashMap<TypeTag, Box<dyn Transcode>>,
}

impl Registry {
    pub fn new() -> Self {
        let table = TypeTag::ALL.into_iter().map(|tag| (tag, bind(tag))).collect();
        Self { table }
    }

    pub fn get(&self, tag: TypeTag) -> Option<&dyn Transcode> {
        self.table.get(&tag).map(|binding| &**binding)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Exhaustive tag → binding table.
fn bind(tag: TypeTag) -> Box<dyn Transcode> {
    match tag {
        TypeTag::Int8   => Box::new(Binding::<i8>::new(|r| r.read_int8(), |w, n, v| w.write_int8(n, v))),
        TypeTag::Int16  => Box::new(Binding::<i16>::new(|r| r.read_int16(), |w, n, v| w.write_int16(n, v))),
        TypeTag::Int24  => Box::new(Binding::<i32>::new(|r| r.read_int24(), |w, n, v| w.write_int24(n, v))),
        TypeTag::Int32  => Box::new(Binding::<i32>::new(|r| r.read_int32(), |w, n, v| w.write_int32(n, v))),
        TypeTag::Uint8  => Box::new(Binding::<u8>::new(|r| r.read_uint8(), |w, n, v| w.write_uint8(n, v))),
        TypeTag::Uint16 => Box::new(Binding::<u16>::new(|r| r.read_uint16(), |w, n, v| w.write_uint16(n, v))),
        TypeTag::Uint24 => Box::new(Binding::<u32>::new(|r| r.read_uint24(), |w, n, v| w.write_uint24(n, v))),
        TypeTag::Uint32 => Box::new(Binding::<u32>::new(|r| r.read_uint32(), |w, n, v| w.write_uint32(n, v))),
        TypeTag::Float  => Box::new(Binding::<f32>::new(|r| r.read_float(), |w, n, v| w.write_float(n, v))),
        TypeTag::Double => Box::new(Binding::<f64>::new(|r| r.read_double(), |w, n, v| w.write_double(n, v))),
        TypeTag::String => Box::new(Binding::<String>::new(|r| r.read_string(), |w, n, v| w.write_string(n, v))),
        TypeTag::Hex8   => Box::new(Binding::<u8>::new(|r| r.read_hex8(), |w, n, v| w.write_hex8(n, v))),
        TypeTag::Hex16  => Box::new(Binding::<u16>::new(|r| r.read_hex16(), |w, n, v| w.write_hex16(n, v))),
        TypeTag::Hex32  => Box::new(Binding::<u32>::new(|r| r.read_hex32(), |w, n, v| w.write_hex32(n, v))),

        TypeTag::Int8Array => Box::new(Binding::<Vec<i8>>::new(
            |r| r.read_int8_array(),
            |w, n, v| w.write_int8_array(n, v),
        )),
        TypeTag::Int16Array => Box::new(Binding::<Vec<i16>>::new(
            |r| r.read_int16_array(),
            |w, n, v| w.write_int16_array(n, v),
        )),
        TypeTag::Int24Array => Box::new(Binding::<Vec<i32>>::new(
            |r| r.read_int24_array(),
            |w, n, v| w.write_int24_array(n, v),
        )),
        TypeTag::Int32Array => Box::new(Binding::<Vec<i32>>::new(
            |r| r.read_int32_array(),
            |w, n, v| w.write_int32_array(n, v),
        )),
        TypeTag::Uint8Array => Box::new(Binding::<Vec<u8>>::new(
            |r| r.read_uint8_array(),
            |w, n, v| w.write_uint8_array(n, v),
        )),
        TypeTag::Uint16Array => Box::new(Binding::<Vec<u16>>::new(
            |r| r.read_uint16_array(),
            |w, n, v| w.write_uint16_array(n, v),
        )),
        TypeTag::Uint24Array => Box::new(Binding::<Vec<u32>>::new(
            |r| r.read_uint24_array(),
            |w, n, v| w.write_uint24_array(n, v),
        )),
        TypeTag::Uint32Array => Box::new(Binding::<Vec<u32>>::new(
            |r| r.read_uint32_array(),
            |w, n, v| w.write_uint32_array(n, v),
        )),
        TypeTag::FloatArray => Box::new(Binding::<Vec<f32>>::new(
            |r| r.read_float_array(),
            |w, n, v| w.write_float_array(n, v),
        )),
        TypeTag::DoubleArray => Box::new(Binding::<Vec<f64>>::new(
            |r| r.read_double_array(),
            |w, n, v| w.write_double_array(n, v),
        )),
        TypeTag::StringArray => Box::new(Binding::<Vec<String>>::new(
            |r| r.read_string_array(),
            |w, n, v| w.write_string_array(n, v),
        )),
    }
}
