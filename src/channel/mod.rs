//! Channel layer: the read/write capability traits every file format
//! implements, plus the factories that pick an implementation from a
//! [`ChannelConfig`].
//!
//! # Roles
//! A [`Reader`] is the *source* side of a run and a [`Writer`] the
//! *destination* side.  Both expose one operation per type tag.  Channels
//! never see type tags themselves; the binding between a tag and a
//! read/write pair lives in [`crate::registry`].
//!
//! # Formats
//!
//! | Format | Reader | Writer |
//! |--------|--------|--------|
//! | `binary` | [`BinaryReader`] | [`BinaryWriter`] |
//! | `text`   | [`TextReader`]   | [`TextWriter`]   |
//! | `packed` | [`PackedReader`] | [`PackedWriter`] |
//!
//! The format is selected once when the channel is opened and never changes
//! for the rest of the run.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ChannelConfig, Format};
use crate::schema::Schema;

pub mod binary;
pub mod packed;
pub mod pool;
pub mod text;

pub use binary::{BinaryReader, BinaryWriter};
pub use packed::{PackedReader, PackedWriter};
pub use pool::StringPool;
pub use text::{TextReader, TextWriter};

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("IO error: {0}")]
    Io(io::Error),
    /// The stream ended in the middle of a value.
    #[error("Unexpected end of stream")]
    Truncated,
    #[error("Input file does not exist: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("Cannot parse '{token}' as {expected}")]
    Parse { token: String, expected: &'static str },
    #[error("Row has no column {column}")]
    MissingColumn { column: usize },
    #[error("Invalid array length: {0}")]
    InvalidLength(i64),
    #[error("Array of {len} elements does not fit a {bits}-bit length prefix")]
    ArrayTooLong { len: usize, bits: u32 },
    #[error("String index {index} out of range for a pool of {pool_size}")]
    StringIndex { index: usize, pool_size: usize },
    #[error("String pool is full ({0} entries)")]
    StringPoolFull(usize),
    #[error("String {0:?} contains a separator and cannot be pooled")]
    UnpoolableString(String),
    #[error("String is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("Value {0} exceeds the 23-bit sign-magnitude range")]
    MagnitudeOverflow(i64),
    #[error("Unimplemented feature: {0}")]
    Unimplemented(&'static str),
}

impl From<io::Error> for ChannelError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ChannelError::Truncated
        } else {
            ChannelError::Io(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;

// ── Capability traits ────────────────────────────────────────────────────────

/// Source role: decodes one value per call, in stream order.
pub trait Reader {
    fn read_int8(&mut self)   -> Result<i8>;
    fn read_int16(&mut self)  -> Result<i16>;
    fn read_int24(&mut self)  -> Result<i32>;
    fn read_int32(&mut self)  -> Result<i32>;

    fn read_uint8(&mut self)  -> Result<u8>;
    fn read_uint16(&mut self) -> Result<u16>;
    fn read_uint24(&mut self) -> Result<u32>;
    fn read_uint32(&mut self) -> Result<u32>;

    fn read_float(&mut self)  -> Result<f32>;
    fn read_double(&mut self) -> Result<f64>;
    fn read_string(&mut self) -> Result<String>;

    fn read_int8_array(&mut self)   -> Result<Vec<i8>>;
    fn read_int16_array(&mut self)  -> Result<Vec<i16>>;
    fn read_int24_array(&mut self)  -> Result<Vec<i32>>;
    fn read_int32_array(&mut self)  -> Result<Vec<i32>>;
    fn read_uint8_array(&mut self)  -> Result<Vec<u8>>;
    fn read_uint16_array(&mut self) -> Result<Vec<u16>>;
    fn read_uint24_array(&mut self) -> Result<Vec<u32>>;
    fn read_uint32_array(&mut self) -> Result<Vec<u32>>;
    fn read_float_array(&mut self)  -> Result<Vec<f32>>;
    fn read_double_array(&mut self) -> Result<Vec<f64>>;
    fn read_string_array(&mut self) -> Result<Vec<String>>;

    // Reserved for formats with hexadecimal-width fields.
    fn read_hex8(&mut self)  -> Result<u8>  { Err(ChannelError::Unimplemented("read_hex8")) }
    fn read_hex16(&mut self) -> Result<u16> { Err(ChannelError::Unimplemented("read_hex16")) }
    fn read_hex32(&mut self) -> Result<u32> { Err(ChannelError::Unimplemented("read_hex32")) }

    /// Whether another entry should be read.
    ///
    /// With an entry-count cap, every call spends one unit of the budget and
    /// the answer is `false` once it is exhausted, whatever the stream still
    /// holds.  Without one, `false` means end of stream.
    fn has_next(&mut self) -> Result<bool>;
}

/// Destination role: encodes one value per call.  `name` is the schema field
/// name; formats that do not store names ignore it.
pub trait Writer {
    fn write_int8(&mut self, name: &str, value: i8)   -> Result<()>;
    fn write_int16(&mut self, name: &str, value: i16) -> Result<()>;
    fn write_int24(&mut self, name: &str, value: i32) -> Result<()>;
    fn write_int32(&mut self, name: &str, value: i32) -> Result<()>;

    fn write_uint8(&mut self, name: &str, value: u8)   -> Result<()>;
    fn write_uint16(&mut self, name: &str, value: u16) -> Result<()>;
    fn write_uint24(&mut self, name: &str, value: u32) -> Result<()>;
    fn write_uint32(&mut self, name: &str, value: u32) -> Result<()>;

    fn write_float(&mut self, name: &str, value: f32)     -> Result<()>;
    fn write_double(&mut self, name: &str, value: f64)    -> Result<()>;
    fn write_string(&mut self, name: &str, value: String) -> Result<()>;

    fn write_int8_array(&mut self, name: &str, values: Vec<i8>)       -> Result<()>;
    fn write_int16_array(&mut self, name: &str, values: Vec<i16>)     -> Result<()>;
    fn write_int24_array(&mut self, name: &str, values: Vec<i32>)     -> Result<()>;
    fn write_int32_array(&mut self, name: &str, values: Vec<i32>)     -> Result<()>;
    fn write_uint8_array(&mut self, name: &str, values: Vec<u8>)      -> Result<()>;
    fn write_uint16_array(&mut self, name: &str, values: Vec<u16>)    -> Result<()>;
    fn write_uint24_array(&mut self, name: &str, values: Vec<u32>)    -> Result<()>;
    fn write_uint32_array(&mut self, name: &str, values: Vec<u32>)    -> Result<()>;
    fn write_float_array(&mut self, name: &str, values: Vec<f32>)     -> Result<()>;
    fn write_double_array(&mut self, name: &str, values: Vec<f64>)    -> Result<()>;
    fn write_string_array(&mut self, name: &str, values: Vec<String>) -> Result<()>;

    fn write_hex8(&mut self, _name: &str, _value: u8) -> Result<()> {
        Err(ChannelError::Unimplemented("write_hex8"))
    }
    fn write_hex16(&mut self, _name: &str, _value: u16) -> Result<()> {
        Err(ChannelError::Unimplemented("write_hex16"))
    }
    fn write_hex32(&mut self, _name: &str, _value: u32) -> Result<()> {
        Err(ChannelError::Unimplemented("write_hex32"))
    }

    // ── Structure hooks ─────────────────────────────────────────────────────

    fn start_file(&mut self, _schema: &Schema) -> Result<()> { Ok(()) }
    fn start_entry(&mut self) -> Result<()> { Ok(()) }
    fn finish_entry(&mut self) -> Result<()> { Ok(()) }
    /// Flush everything.  Only called after the last entry of a successful run.
    fn finish_file(&mut self) -> Result<()>;
}

// ── Entry budget ─────────────────────────────────────────────────────────────

/// Countdown behind the entry-count cap shared by all readers.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryBudget {
    remaining: Option<u64>,
}

impl EntryBudget {
    /// `None` and `Some(0)` both mean "uncapped".
    pub fn new(cap: Option<u64>) -> Self {
        Self { remaining: cap.filter(|&n| n > 0) }
    }

    /// Spend one unit.  Returns `false` once the cap has been reached.
    pub fn spend(&mut self) -> bool {
        match self.remaining.as_mut() {
            None         => true,
            Some(0)      => false,
            Some(n)      => { *n -= 1; true }
        }
    }
}

// ── Factories ────────────────────────────────────────────────────────────────

/// Open the source side of a run.
pub fn open_reader(config: &ChannelConfig) -> Result<Box<dyn Reader>> {
    let file = open_input(&config.path)?;
    debug!(format = config.format.name(), path = %config.path.display(), "opening source");
    Ok(match config.format {
        Format::Binary => Box::new(BinaryReader::new(
            seek_input(file, config.offset)?,
            config.entry_count,
        )),
        Format::Text => {
            if config.offset.is_some() {
                warn!(path = %config.path.display(), "offset ignored for text channels");
            }
            Box::new(TextReader::new(BufReader::new(file), config.entry_count)?)
        }
        Format::Packed => {
            let pool = match &config.text_path {
                Some(path) => StringPool::load(path)?,
                None       => StringPool::default(),
            };
            Box::new(PackedReader::new(
                seek_input(file, config.offset)?,
                pool,
                config.entry_count,
            ))
        }
    })
}

/// Create the destination side of a run.
pub fn create_writer(config: &ChannelConfig) -> Result<Box<dyn Writer>> {
    debug!(format = config.format.name(), path = %config.path.display(), "opening destination");
    Ok(match config.format {
        Format::Binary => Box::new(
            BinaryWriter::new(create_output(&config.path, config.offset)?)
                .terminate_strings(config.terminate_strings),
        ),
        Format::Text => {
            if config.offset.is_some() {
                warn!(path = %config.path.display(), "offset ignored for text channels");
            }
            Box::new(TextWriter::new(BufWriter::new(File::create(&config.path)?)))
        }
        Format::Packed => Box::new(PackedWriter::new(
            create_output(&config.path, config.offset)?,
            config.text_path.clone(),
        )),
    })
}

pub(crate) fn open_input(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(ChannelError::MissingInput(path.to_owned()));
    }
    Ok(File::open(path)?)
}

fn seek_input(mut file: File, offset: Option<u64>) -> Result<BufReader<File>> {
    if let Some(offset) = offset {
        file.seek(SeekFrom::Start(offset))?;
    }
    Ok(BufReader::new(file))
}

/// Without an offset the destination is truncated.  With one, bytes before
/// the offset are kept and the records are written in place.
fn create_output(path: &Path, offset: Option<u64>) -> Result<BufWriter<File>> {
    let file = match offset {
        None => File::create(path)?,
        Some(offset) => {
            let mut f = OpenOptions::new().write(true).create(true).truncate(false).open(path)?;
            f.seek(SeekFrom::Start(offset))?;
            f
        }
    };
    Ok(BufWriter::new(file))
}

// ── Shared helpers ───────────────────────────────────────────────────────────

/// Convert a decoded length prefix into an element count.
pub(crate) fn element_count(count: i64) -> Result<usize> {
    usize::try_from(count).map_err(|_| ChannelError::InvalidLength(count))
}

/// Check that `len` fits a signed length prefix of `bits` bits.
pub(crate) fn prefix_len(len: usize, bits: u32) -> Result<i64> {
    let max = (1i64 << (bits - 1)) - 1;
    match i64::try_from(len) {
        Ok(n) if n <= max => Ok(n),
        _                 => Err(ChannelError::ArrayTooLong { len, bits }),
    }
}
