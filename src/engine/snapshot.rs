//! Read handle over an entry's published values

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use super::{Editor, Inner};
use crate::error::{Error, Result};

/// Pins an entry's clean files while open.
///
/// The entry cannot be edited until every snapshot of it is closed. If the
/// entry is removed in the meantime its files stay on disk until the last
/// snapshot goes away. Dropping a snapshot closes it.
pub struct Snapshot {
    inner: Arc<Inner>,
    key: String,
    files: Vec<PathBuf>,
    closed: bool,
}

impl Snapshot {
    pub(super) fn new(inner: Arc<Inner>, key: String, files: Vec<PathBuf>) -> Self {
        Self {
            inner,
            key,
            files,
            closed: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Path of the published file for `index`.
    pub fn file(&self, index: usize) -> Result<&Path> {
        if self.closed {
            return Err(Error::HandleClosed("snapshot"));
        }
        self.files
            .get(index)
            .map(PathBuf::as_path)
            .ok_or(Error::InvalidSlot {
                index,
                value_count: self.files.len(),
            })
    }

    /// Read the whole value in `index`.
    pub fn read(&self, index: usize) -> Result<Bytes> {
        let path = self.file(index)?;
        let mut source = self.inner.fs.open_read(path)?;
        let mut buf = Vec::new();
        source.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Release the pin. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut st = self.inner.lock();
        self.inner.release_snapshot(&mut st, &self.key)
    }

    /// Close this snapshot and open an editor for the same key without
    /// letting another caller in between.
    pub fn close_and_edit(mut self) -> Result<Option<Editor>> {
        if self.closed {
            return Err(Error::HandleClosed("snapshot"));
        }
        self.closed = true;
        let inner = Arc::clone(&self.inner);
        let mut st = inner.lock();
        inner.release_snapshot(&mut st, &self.key)?;
        inner.edit_locked(&mut st, &self.key)
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(key = %self.key, error = %e, "Failed to release snapshot");
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("key", &self.key)
            .field("files", &self.files)
            .field("closed", &self.closed)
            .finish()
    }
}
