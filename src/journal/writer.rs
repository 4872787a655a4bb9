//! Journal appender and full-journal writer

use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::warn;

use super::{JournalHeader, JournalRecord};
use crate::fs::{FileSystem, FileWriter};
use crate::sink::FaultHidingSink;

/// Appends records to the live journal.
///
/// Writes never fail: the underlying file sits behind a [`FaultHidingSink`],
/// and callers check [`JournalWriter::has_errors`] where durability matters.
/// A writer created with [`JournalWriter::blackhole`] discards everything.
#[derive(Debug)]
pub struct JournalWriter {
    sink: Option<BufWriter<FaultHidingSink<FileWriter>>>,
}

impl JournalWriter {
    /// Open `path` for appending.
    pub fn append_to(fs: &dyn FileSystem, path: &Path) -> io::Result<Self> {
        let file = fs.open_append(path)?;
        let journal_path = path.display().to_string();
        let sink = FaultHidingSink::new(file, move |e| {
            warn!(journal = %journal_path, error = %e, "Journal write failed, discarding further writes");
        });
        Ok(Self {
            sink: Some(BufWriter::new(sink)),
        })
    }

    /// Writer that accepts and drops every record
    pub fn blackhole() -> Self {
        Self { sink: None }
    }

    /// Buffer one record.
    pub fn append(&mut self, record: &JournalRecord) {
        if let Some(sink) = self.sink.as_mut() {
            // The sink below never reports errors.
            let _ = writeln!(sink, "{}", record);
        }
    }

    /// Buffer one record and push it to the file.
    pub fn append_and_flush(&mut self, record: &JournalRecord) {
        self.append(record);
        self.flush();
    }

    /// Push buffered records to the file.
    pub fn flush(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.flush();
        }
    }

    /// Whether any write to the underlying file has failed
    pub fn has_errors(&self) -> bool {
        self.sink
            .as_ref()
            .map(|sink| sink.get_ref().has_errors())
            .unwrap_or(false)
    }

    /// Flush and release the file.
    pub fn close(self) {
        if let Some(sink) = self.sink {
            match sink.into_inner() {
                Ok(inner) => inner.close(),
                Err(e) => warn!(error = %e.error(), "Failed to flush journal on close"),
            }
        }
    }
}

/// Write a complete journal (header plus `records`) to `path`, replacing it.
///
/// Unlike [`JournalWriter`], failures here propagate: this is the rebuild
/// path and the caller decides what a failed rebuild means.
pub fn write_journal_file<'a>(
    fs: &dyn FileSystem,
    path: &Path,
    header: &JournalHeader,
    records: impl IntoIterator<Item = &'a JournalRecord>,
) -> io::Result<()> {
    let mut out = BufWriter::new(fs.open_write(path)?);
    write!(out, "{}", header)?;
    for record in records {
        writeln!(out, "{}", record)?;
    }
    out.flush()?;
    Ok(())
}
