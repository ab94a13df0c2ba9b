//! Append-only string table backing the packed channel.
//!
//! The packed format never stores strings inline.  Each string field holds a
//! 16-bit index into a pool kept in a *sidecar* text file: one line, every
//! string followed by a comma.  The sidecar is read in full before the first
//! entry and written in full once, after the last.

use std::fs;
use std::path::Path;

use tracing::debug;

use super::{ChannelError, Result};

/// Highest index representable in the 16-bit reference.
pub const MAX_POOL_SIZE: usize = u16::MAX as usize + 1;

const SEPARATOR: char = ',';

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    /// Load a sidecar.  Only the first line is used.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ChannelError::MissingInput(path.to_owned()));
        }
        let contents = fs::read_to_string(path)?;
        let pool = Self::parse(contents.lines().next().unwrap_or(""));
        debug!(path = %path.display(), strings = pool.len(), "loaded string pool");
        Ok(pool)
    }

    /// Split one sidecar line.  The trailing separator written by
    /// [`Self::to_sidecar`] yields a final empty entry, which is kept.
    pub fn parse(line: &str) -> Self {
        Self { strings: line.split(SEPARATOR).map(str::to_owned).collect() }
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Append `value` and return its index.  Identical strings are not
    /// deduplicated; each call gets the next index.  The sidecar has no
    /// escaping, so strings holding a comma or a line break are refused.
    pub fn intern(&mut self, value: String) -> Result<u16> {
        if value.contains([SEPARATOR, '\n', '\r']) {
            return Err(ChannelError::UnpoolableString(value));
        }
        let index = self.strings.len();
        if index >= MAX_POOL_SIZE {
            return Err(ChannelError::StringPoolFull(index));
        }
        self.strings.push(value);
        Ok(index as u16)
    }

    pub fn get(&self, index: usize) -> Result<&str> {
        self.strings
            .get(index)
            .map(String::as_str)
            .ok_or(ChannelError::StringIndex { index, pool_size: self.strings.len() })
    }

    pub fn to_sidecar(&self) -> String {
        let mut out = String::new();
        for s in &self.strings {
            out.push_str(s);
            out.push(SEPARATOR);
        }
        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_sidecar())?;
        debug!(path = %path.display(), strings = self.len(), "wrote string pool");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_strings_get_distinct_indices() {
        let mut pool = StringPool::default();
        assert_eq!(pool.intern("Alice".into()).unwrap(), 0);
        assert_eq!(pool.intern("Alice".into()).unwrap(), 1);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(1).unwrap(), "Alice");
    }

    #[test]
    fn out_of_range_lookup_fails() {
        let pool = StringPool::parse("a,b");
        assert_eq!(pool.get(1).unwrap(), "b");
        assert!(matches!(pool.get(2), Err(ChannelError::StringIndex { index: 2, pool_size: 2 })));
    }

    #[test]
    fn sidecar_has_trailing_separator() {
        let mut pool = StringPool::default();
        pool.intern("sword".into()).unwrap();
        pool.intern("shield".into()).unwrap();
        assert_eq!(pool.to_sidecar(), "sword,shield,");

        let reloaded = StringPool::parse(&pool.to_sidecar());
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.get(0).unwrap(), "sword");
        assert_eq!(reloaded.get(1).unwrap(), "shield");
        assert_eq!(reloaded.get(2).unwrap(), "");
    }

    #[test]
    fn separator_in_string_is_refused() {
        let mut pool = StringPool::default();
        assert!(matches!(pool.intern("Iron, Sword".into()), Err(ChannelError::UnpoolableString(_))));
        assert!(matches!(pool.intern("two\nlines".into()), Err(ChannelError::UnpoolableString(_))));
        assert!(matches!(pool.intern("crlf\r".into()), Err(ChannelError::UnpoolableString(_))));
        assert!(pool.is_empty());
        assert_eq!(pool.intern("Shield".into()).unwrap(), 0);
    }

    #[test]
    fn pool_is_bounded_by_index_width() {
        let mut pool = StringPool::default();
        for _ in 0..MAX_POOL_SIZE {
            pool.intern(String::new()).unwrap();
        }
        assert!(matches!(pool.intern(String::new()), Err(ChannelError::StringPoolFull(_))));
    }

    #[test]
    fn load_missing_sidecar_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = StringPool::load(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, ChannelError::MissingInput(_)));
    }
}
