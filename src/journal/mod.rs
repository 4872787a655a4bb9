//! Journal Format
//!
//! Append-only text log of entry lifecycle events, replayed on open to
//! rebuild the in-memory entry table.
//!
//! # Layout
//!
//! ```text
//! libcore.io.DiskLruCache      magic
//! 1                            format version
//! 3                            app version
//! 2                            value count
//!                              blank
//! DIRTY 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! CLEAN 3400330d1dfc7f3f7f4b8d4d803dfcf6 832 21054
//! READ 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! REMOVE 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! ```
//!
//! Each line is parsed into a [`JournalRecord`] before it touches the entry
//! table. A final line without a trailing newline was cut short by a crash;
//! the reader stops there and reports the journal as truncated.

mod reader;
mod writer;

pub use reader::JournalReader;
pub use writer::{write_journal_file, JournalWriter};

use std::fmt;

use crate::error::{Error, Result};

/// Current journal file name
pub const JOURNAL_FILE: &str = "journal";

/// Journal being rewritten
pub const JOURNAL_FILE_TMP: &str = "journal.tmp";

/// Previous journal, kept until the rewritten one is installed
pub const JOURNAL_FILE_BACKUP: &str = "journal.bkp";

/// First header line
pub const MAGIC: &str = "libcore.io.DiskLruCache";

/// Journal format version
pub const VERSION: &str = "1";

const CLEAN: &str = "CLEAN";
const DIRTY: &str = "DIRTY";
const REMOVE: &str = "REMOVE";
const READ: &str = "READ";

/// Header fields that must match the engine's configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
    /// Application version stamped by the owner of the cache
    pub app_version: u32,
    /// Number of value slots per entry
    pub value_count: usize,
}

impl JournalHeader {
    /// Create a header
    pub fn new(app_version: u32, value_count: usize) -> Self {
        Self {
            app_version,
            value_count,
        }
    }

    /// Check the five header lines read from disk
    pub fn validate(&self, lines: &[String]) -> Result<()> {
        let expected = [
            MAGIC.to_string(),
            VERSION.to_string(),
            self.app_version.to_string(),
            self.value_count.to_string(),
            String::new(),
        ];
        if lines != expected {
            return Err(Error::CorruptJournal(format!(
                "unexpected journal header: [{}]",
                lines.join(", ")
            )));
        }
        Ok(())
    }
}

impl fmt::Display for JournalHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{}\n{}\n{}\n\n",
            MAGIC, VERSION, self.app_version, self.value_count
        )
    }
}

/// Lifecycle event recorded for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOp {
    /// An edit was opened
    Dirty,
    /// An edit was published with these slot lengths
    Clean(Vec<u64>),
    /// The entry was deleted
    Remove,
    /// A snapshot was opened
    Read,
}

/// One journal line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub key: String,
    pub op: JournalOp,
}

impl JournalRecord {
    pub fn dirty(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: JournalOp::Dirty,
        }
    }

    pub fn clean(key: impl Into<String>, lengths: &[u64]) -> Self {
        Self {
            key: key.into(),
            op: JournalOp::Clean(lengths.to_vec()),
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: JournalOp::Remove,
        }
    }

    pub fn read(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: JournalOp::Read,
        }
    }

    /// Parse a journal line (without its newline).
    ///
    /// `CLEAN` must carry exactly `value_count` lengths; the other operations
    /// carry only the key.
    pub fn parse(line: &str, value_count: usize) -> Result<Self> {
        let corrupt = || Error::CorruptJournal(format!("unexpected journal line: {}", line));

        let mut parts = line.split(' ');
        let tag = parts.next().ok_or_else(corrupt)?;
        let key = parts.next().filter(|k| !k.is_empty()).ok_or_else(corrupt)?;
        let rest: Vec<&str> = parts.collect();

        let op = match (tag, rest.is_empty()) {
            (CLEAN, false) => {
                if rest.len() != value_count {
                    return Err(corrupt());
                }
                let lengths = rest
                    .iter()
                    .map(|s| s.parse::<u64>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|_| corrupt())?;
                JournalOp::Clean(lengths)
            }
            (DIRTY, true) => JournalOp::Dirty,
            (REMOVE, true) => JournalOp::Remove,
            (READ, true) => JournalOp::Read,
            _ => return Err(corrupt()),
        };

        Ok(Self {
            key: key.to_string(),
            op,
        })
    }
}

impl fmt::Display for JournalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            JournalOp::Dirty => write!(f, "{} {}", DIRTY, self.key),
            JournalOp::Remove => write!(f, "{} {}", REMOVE, self.key),
            JournalOp::Read => write!(f, "{} {}", READ, self.key),
            JournalOp::Clean(lengths) => {
                write!(f, "{} {}", CLEAN, self.key)?;
                for length in lengths {
                    write!(f, " {}", length)?;
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
