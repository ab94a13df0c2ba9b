//! Structure files and per-side channel configuration.
//!
//! A structure file describes one conversion:
//!
//! ```json
//! {
//!   "input":  { "format": "packed", "path": "items.bin", "textPath": "items.txt" },
//!   "output": { "format": "text",   "path": "items.csv" },
//!   "structure": { "id": "uint16", "name": "string", "price": "float" }
//! }
//! ```
//!
//! `input` is the packed game-side file and `output` the user-side file.
//! Unpacking reads `input` and writes `output`; packing swaps the two.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::{Schema, SchemaError};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Structure file does not exist: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid structure file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("Unknown format '{0}' (expected binary, text or packed)")]
    UnknownFormat(String),
    #[error("No path configured for the {0} side")]
    MissingPath(&'static str),
}

// ── Format ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Format {
    Binary,
    Text,
    Packed,
}

impl Format {
    pub fn name(self) -> &'static str {
        match self {
            Format::Binary => "binary",
            Format::Text   => "text",
            Format::Packed => "packed",
        }
    }

    /// Case-insensitive.  Also accepts the legacy names `csv` and
    /// `survivebinary`.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binary"                               => Some(Format::Binary),
            "text" | "csv"                         => Some(Format::Text),
            "packed" | "survive" | "survivebinary" => Some(Format::Packed),
            _                                      => None,
        }
    }
}

impl TryFrom<String> for Format {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Format::from_name(&s).ok_or(ConfigError::UnknownFormat(s))
    }
}

// ── ChannelConfig ────────────────────────────────────────────────────────────

/// One side of a conversion.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub format:      Format,
    #[serde(default)]
    pub path:        PathBuf,
    /// Byte position of the first entry.
    pub offset:      Option<u64>,
    /// Hard cap on entries read from this side; `0` means no cap.
    pub entry_count: Option<u64>,
    /// String-pool sidecar, packed format only.
    pub text_path:   Option<PathBuf>,
    /// Terminate strings written by the binary channel with a NUL.
    #[serde(default)]
    pub terminate_strings: bool,
}

impl ChannelConfig {
    pub fn new<P: Into<PathBuf>>(format: Format, path: P) -> Self {
        Self {
            format,
            path:              path.into(),
            offset:            None,
            entry_count:       None,
            text_path:         None,
            terminate_strings: false,
        }
    }

    pub fn with_text_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.text_path = Some(path.into());
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_entry_count(mut self, count: u64) -> Self {
        self.entry_count = Some(count);
        self
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(path) = overrides.path { self.path = path; }
        if let Some(text_path) = overrides.text_path { self.text_path = Some(text_path); }
        if let Some(offset) = overrides.offset { self.offset = Some(offset); }
        if let Some(count) = overrides.entry_count { self.entry_count = Some(count); }
    }
}

/// Command-line replacements for one side's settings.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub path:        Option<PathBuf>,
    pub text_path:   Option<PathBuf>,
    pub offset:      Option<u64>,
    pub entry_count: Option<u64>,
}

// ── Job ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Read `input`, write `output`.
    #[default]
    Unpack,
    /// Read `output`, write `input`.
    Pack,
}

#[derive(Deserialize)]
struct RawJob {
    input:     ChannelConfig,
    output:    ChannelConfig,
    structure: Map<String, Value>,
}

/// A parsed structure file.
#[derive(Debug, Clone)]
pub struct Job {
    pub input:  ChannelConfig,
    pub output: ChannelConfig,
    pub schema: Schema,
}

impl Job {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::MissingFile(path.to_owned()));
        }
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: RawJob = serde_json::from_str(text)?;
        Ok(Self {
            input:  raw.input,
            output: raw.output,
            schema: Schema::from_json(&raw.structure)?,
        })
    }

    /// Both sides need a path once overrides have been applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingPath("input"));
        }
        if self.output.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingPath("output"));
        }
        Ok(())
    }

    /// `(source, destination)` for `direction`.
    pub fn endpoints(&self, direction: Direction) -> (&ChannelConfig, &ChannelConfig) {
        match direction {
            Direction::Unpack => (&self.input, &self.output),
            Direction::Pack   => (&self.output, &self.input),
        }
    }
}
