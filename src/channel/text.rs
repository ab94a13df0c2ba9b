//! Comma-delimited text channel.
//!
//! ```text
//! id,name,price,tags
//! 1,"Sword",12.5,3 4 5
//! 2,"Shield",8,
//! ```
//!
//! One header line with the field names, then one line per entry.  Strings
//! are wrapped in double quotes with no escaping; arrays are a single
//! unquoted field of space-separated tokens.

use std::fmt::Display;
use std::io::{BufRead, Write};
use std::mem;
use std::str::FromStr;

use tracing::debug;

use super::{ChannelError, EntryBudget, Reader, Result, Writer};
use crate::schema::Schema;

const DELIMITER:       char = ',';
const QUOTE:           char = '"';
const ARRAY_SEPARATOR: char = ' ';

/// Split one line into fields.  Delimiters inside quotes do not split and
/// the quotes themselves are dropped.
fn split_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field  = String::new();
    let mut quoted = false;
    for c in line.chars() {
        match c {
            QUOTE                 => quoted = !quoted,
            DELIMITER if !quoted  => fields.push(mem::take(&mut field)),
            _                     => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn parse<T: FromStr>(token: &str, expected: &'static str) -> Result<T> {
    token.trim().parse().map_err(|_| ChannelError::Parse { token: token.to_owned(), expected })
}

/// Fold into 24 bits, sign-extending.
fn fold_int24(value: i32) -> i32 {
    (value << 8) >> 8
}

fn fold_uint24(value: u32) -> u32 {
    value & 0x00FF_FFFF
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct TextReader<R: BufRead> {
    reader: R,
    row:    Vec<String>,
    column: usize,
    line:   String,
    budget: EntryBudget,
}

impl<R: BufRead> TextReader<R> {
    /// Consumes the header line.  Columns are read in schema order; header
    /// names are not checked.
    pub fn new(mut reader: R, entry_count: Option<u64>) -> Result<Self> {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let head = line.trim_end_matches(['\r', '\n']);
        if !head.is_empty() {
            debug!(columns = split_row(head).len(), "read text header");
        }
        Ok(Self {
            reader,
            row: Vec::new(),
            column: 0,
            line,
            budget: EntryBudget::new(entry_count),
        })
    }

    fn next_field(&mut self) -> Result<String> {
        let column = self.column;
        let field = self.row.get_mut(column).ok_or(ChannelError::MissingColumn { column })?;
        self.column += 1;
        Ok(mem::take(field))
    }

    fn parse_next<T: FromStr>(&mut self, expected: &'static str) -> Result<T> {
        let field = self.next_field()?;
        parse(&field, expected)
    }

    /// An empty field is an empty array.
    fn parse_array<T: FromStr>(&mut self, expected: &'static str) -> Result<Vec<T>> {
        let field = self.next_field()?;
        let mut values = Vec::new();
        if field.is_empty() {
            return Ok(values);
        }
        for token in field.split(ARRAY_SEPARATOR) {
            values.push(parse(token, expected)?);
        }
        Ok(values)
    }
}

impl<R: BufRead> Reader for TextReader<R> {
    fn read_int8(&mut self)  -> Result<i8>  { self.parse_next("int8") }
    fn read_int16(&mut self) -> Result<i16> { self.parse_next("int16") }
    fn read_int24(&mut self) -> Result<i32> { self.parse_next("int24").map(fold_int24) }
    fn read_int32(&mut self) -> Result<i32> { self.parse_next("int32") }

    fn read_uint8(&mut self)  -> Result<u8>  { self.parse_next("uint8") }
    fn read_uint16(&mut self) -> Result<u16> { self.parse_next("uint16") }
    fn read_uint24(&mut self) -> Result<u32> { self.parse_next("uint24").map(fold_uint24) }
    fn read_uint32(&mut self) -> Result<u32> { self.parse_next("uint32") }

    fn read_float(&mut self)  -> Result<f32> { self.parse_next("float") }
    fn read_double(&mut self) -> Result<f64> { self.parse_next("double") }
    fn read_string(&mut self) -> Result<String> { self.next_field() }

    fn read_int8_array(&mut self)  -> Result<Vec<i8>>  { self.parse_array("int8") }
    fn read_int16_array(&mut self) -> Result<Vec<i16>> { self.parse_array("int16") }
    fn read_int24_array(&mut self) -> Result<Vec<i32>> {
        let values: Vec<i32> = self.parse_array("int24")?;
        Ok(values.into_iter().map(fold_int24).collect())
    }
    fn read_int32_array(&mut self) -> Result<Vec<i32>> { self.parse_array("int32") }
    fn read_uint8_array(&mut self)  -> Result<Vec<u8>>  { self.parse_array("uint8") }
    fn read_uint16_array(&mut self) -> Result<Vec<u16>> { self.parse_array("uint16") }
    fn read_uint24_array(&mut self) -> Result<Vec<u32>> {
        let values: Vec<u32> = self.parse_array("uint24")?;
        Ok(values.into_iter().map(fold_uint24).collect())
    }
    fn read_uint32_array(&mut self) -> Result<Vec<u32>> { self.parse_array("uint32") }
    fn read_float_array(&mut self)  -> Result<Vec<f32>> { self.parse_array("float") }
    fn read_double_array(&mut self) -> Result<Vec<f64>> { self.parse_array("double") }
    fn read_string_array(&mut self) -> Result<Vec<String>> {
        let field = self.next_field()?;
        if field.is_empty() {
            return Ok(Vec::new());
        }
        Ok(field.split(ARRAY_SEPARATOR).map(str::to_owned).collect())
    }

    fn has_next(&mut self) -> Result<bool> {
        if !self.budget.spend() {
            return Ok(false);
        }
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(false);
            }
            let line = self.line.trim_end_matches(['\r', '\n']);
            if !line.is_empty() {
                self.row    = split_row(line);
                self.column = 0;
                return Ok(true);
            }
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct TextWriter<W: Write> {
    writer:       W,
    start_of_row: bool,
}

impl<W: Write> TextWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, start_of_row: true }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_field(&mut self, value: impl Display) -> Result<()> {
        if !self.start_of_row {
            write!(self.writer, "{DELIMITER}")?;
        }
        self.start_of_row = false;
        write!(self.writer, "{value}")?;
        Ok(())
    }

    fn write_array<T: Display>(&mut self, values: &[T]) -> Result<()> {
        let joined = values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(&ARRAY_SEPARATOR.to_string());
        self.write_field(joined)
    }
}

impl<W: Write> Writer for TextWriter<W> {
    fn write_int8(&mut self, _: &str, value: i8)   -> Result<()> { self.write_field(value) }
    fn write_int16(&mut self, _: &str, value: i16) -> Result<()> { self.write_field(value) }
    fn write_int24(&mut self, _: &str, value: i32) -> Result<()> { self.write_field(value) }
    fn write_int32(&mut self, _: &str, value: i32) -> Result<()> { self.write_field(value) }

    fn write_uint8(&mut self, _: &str, value: u8)   -> Result<()> { self.write_field(value) }
    fn write_uint16(&mut self, _: &str, value: u16) -> Result<()> { self.write_field(value) }
    fn write_uint24(&mut self, _: &str, value: u32) -> Result<()> { self.write_field(value) }
    fn write_uint32(&mut self, _: &str, value: u32) -> Result<()> { self.write_field(value) }

    fn write_float(&mut self, _: &str, value: f32)  -> Result<()> { self.write_field(value) }
    fn write_double(&mut self, _: &str, value: f64) -> Result<()> { self.write_field(value) }
    fn write_string(&mut self, _: &str, value: String) -> Result<()> {
        self.write_field(format_args!("{QUOTE}{value}{QUOTE}"))
    }

    fn write_int8_array(&mut self, _: &str, values: Vec<i8>)       -> Result<()> { self.write_array(&values) }
    fn write_int16_array(&mut self, _: &str, values: Vec<i16>)     -> Result<()> { self.write_array(&values) }
    fn write_int24_array(&mut self, _: &str, values: Vec<i32>)     -> Result<()> { self.write_array(&values) }
    fn write_int32_array(&mut self, _: &str, values: Vec<i32>)     -> Result<()> { self.write_array(&values) }
    fn write_uint8_array(&mut self, _: &str, values: Vec<u8>)      -> Result<()> { self.write_array(&values) }
    fn write_uint16_array(&mut self, _: &str, values: Vec<u16>)    -> Result<()> { self.write_array(&values) }
    fn write_uint24_array(&mut self, _: &str, values: Vec<u32>)    -> Result<()> { self.write_array(&values) }
    fn write_uint32_array(&mut self, _: &str, values: Vec<u32>)    -> Result<()> { self.write_array(&values) }
    fn write_float_array(&mut self, _: &str, values: Vec<f32>)     -> Result<()> { self.write_array(&values) }
    fn write_double_array(&mut self, _: &str, values: Vec<f64>)    -> Result<()> { self.write_array(&values) }
    fn write_string_array(&mut self, _: &str, values: Vec<String>) -> Result<()> { self.write_array(&values) }

    /// Header line, emitted even when no entry follows.
    fn start_file(&mut self, schema: &Schema) -> Result<()> {
        for field in schema.fields() {
            self.write_field(&field.name)?;
        }
        self.finish_entry()
    }

    fn finish_entry(&mut self) -> Result<()> {
        writeln!(self.writer)?;
        self.start_of_row = true;
        Ok(())
    }

    fn finish_file(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeTag;
    use std::io::Cursor;

    fn reader(text: &str) -> TextReader<Cursor<Vec<u8>>> {
        TextReader::new(Cursor::new(text.as_bytes().to_vec()), None).unwrap()
    }

    fn schema() -> Schema {
        Schema::new(vec![
            ("id".into(), TypeTag::Uint16),
            ("name".into(), TypeTag::String),
            ("tags".into(), TypeTag::Int24Array),
        ])
        .unwrap()
    }

    #[test]
    fn header_written_for_empty_file() {
        let mut w = TextWriter::new(Vec::new());
        w.start_file(&schema()).unwrap();
        w.finish_file().unwrap();
        assert_eq!(String::from_utf8(w.into_inner()).unwrap(), "id,name,tags\n");
    }

    #[test]
    fn writes_quoted_strings_and_space_joined_arrays() {
        let mut w = TextWriter::new(Vec::new());
        w.start_file(&schema()).unwrap();
        w.start_entry().unwrap();
        w.write_uint16("id", 7).unwrap();
        w.write_string("name", "Iron, Sword".into()).unwrap();
        w.write_int24_array("tags", vec![1, -2, 3]).unwrap();
        w.finish_entry().unwrap();
        assert_eq!(
            String::from_utf8(w.into_inner()).unwrap(),
            "id,name,tags\n7,\"Iron, Sword\",1 -2 3\n"
        );
    }

    #[test]
    fn reads_rows_after_header() {
        let mut r = reader("id,name,tags\n7,\"Iron, Sword\",1 -2 3\n8,\"Shield\",\n");

        assert!(r.has_next().unwrap());
        assert_eq!(r.read_uint16().unwrap(), 7);
        assert_eq!(r.read_string().unwrap(), "Iron, Sword");
        assert_eq!(r.read_int24_array().unwrap(), vec![1, -2, 3]);

        assert!(r.has_next().unwrap());
        assert_eq!(r.read_uint16().unwrap(), 8);
        assert_eq!(r.read_string().unwrap(), "Shield");
        assert!(r.read_int24_array().unwrap().is_empty());

        assert!(!r.has_next().unwrap());
    }

    #[test]
    fn header_only_input_has_no_entries() {
        let mut r = reader("id,name\n");
        assert!(!r.has_next().unwrap());
        let mut r = reader("");
        assert!(!r.has_next().unwrap());
    }

    #[test]
    fn blank_lines_and_crlf_are_skipped() {
        let mut r = reader("a\r\n\r\n5\r\n\n6\n");
        assert!(r.has_next().unwrap());
        assert_eq!(r.read_int8().unwrap(), 5);
        assert!(r.has_next().unwrap());
        assert_eq!(r.read_int8().unwrap(), 6);
        assert!(!r.has_next().unwrap());
    }

    #[test]
    fn malformed_number_is_a_parse_error() {
        let mut r = reader("a\nabc\n");
        assert!(r.has_next().unwrap());
        let err = r.read_int32().unwrap_err();
        assert!(matches!(err, ChannelError::Parse { expected: "int32", .. }));
    }

    #[test]
    fn out_of_range_number_is_a_parse_error() {
        let mut r = reader("a\n300\n");
        assert!(r.has_next().unwrap());
        assert!(matches!(r.read_int8(), Err(ChannelError::Parse { .. })));
    }

    #[test]
    fn missing_column_is_reported() {
        let mut r = reader("a,b\n1\n");
        assert!(r.has_next().unwrap());
        r.read_int8().unwrap();
        assert!(matches!(r.read_int8(), Err(ChannelError::MissingColumn { column: 1 })));
    }

    #[test]
    fn int24_values_fold_into_24_bits() {
        let mut r = reader("a,b\n16777215,16777217\n");
        assert!(r.has_next().unwrap());
        assert_eq!(r.read_int24().unwrap(), -1);
        assert_eq!(r.read_uint24().unwrap(), 1);
    }

    #[test]
    fn floats_round_trip_through_text() {
        let mut w = TextWriter::new(Vec::new());
        w.write_float("f", 0.1).unwrap();
        w.write_double_array("d", vec![1.5, -0.25]).unwrap();
        w.finish_entry().unwrap();
        let text = String::from_utf8(w.into_inner()).unwrap();
        assert_eq!(text, "0.1,1.5 -0.25\n");

        let mut r = reader(&format!("f,d\n{text}"));
        assert!(r.has_next().unwrap());
        assert_eq!(r.read_float().unwrap(), 0.1);
        assert_eq!(r.read_double_array().unwrap(), vec![1.5, -0.25]);
    }

    #[test]
    fn entry_cap_applies_to_text() {
        let mut r = TextReader::new(Cursor::new(b"a\n1\n2\n3\n".to_vec()), Some(2)).unwrap();
        let mut seen = Vec::new();
        while r.has_next().unwrap() {
            seen.push(r.read_uint8().unwrap());
        }
        assert_eq!(seen, vec![1, 2]);
    }
}
