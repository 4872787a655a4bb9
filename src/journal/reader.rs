//! Journal replay reader

use std::io::{BufRead, BufReader, ErrorKind, Read};

use super::{JournalHeader, JournalRecord};
use crate::error::{Error, Result};

/// Streams [`JournalRecord`]s out of a journal file.
pub struct JournalReader<R: Read> {
    reader: BufReader<R>,
    value_count: usize,
    line_count: usize,
    truncated: bool,
    buf: String,
}

impl<R: Read> JournalReader<R> {
    /// Read and validate the header, leaving the reader at the first record.
    pub fn open(source: R, header: &JournalHeader) -> Result<Self> {
        let mut reader = Self {
            reader: BufReader::new(source),
            value_count: header.value_count,
            line_count: 0,
            truncated: false,
            buf: String::new(),
        };

        let mut lines = Vec::with_capacity(5);
        for _ in 0..5 {
            match reader.next_line()? {
                Some(line) => lines.push(line),
                None => {
                    return Err(Error::CorruptJournal(format!(
                        "journal header ends after {} lines",
                        lines.len()
                    )))
                }
            }
        }
        header.validate(&lines)?;
        reader.line_count = 0;
        Ok(reader)
    }

    /// Next record, or `None` at end of file (including a truncated last line).
    pub fn next_record(&mut self) -> Result<Option<JournalRecord>> {
        match self.next_line()? {
            Some(line) => {
                let record = JournalRecord::parse(&line, self.value_count)?;
                self.line_count += 1;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Number of records read so far
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// Whether the journal ended in a partial line
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let n = self.reader.read_line(&mut self.buf).map_err(|e| {
            if e.kind() == ErrorKind::InvalidData {
                Error::CorruptJournal("journal is not valid UTF-8".to_string())
            } else {
                Error::Io(e)
            }
        })?;

        if n == 0 {
            return Ok(None);
        }
        match self.buf.strip_suffix('\n') {
            Some(line) => Ok(Some(line.to_string())),
            None => {
                self.truncated = true;
                Ok(None)
            }
        }
    }
}
