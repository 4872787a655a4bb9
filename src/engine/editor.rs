//! Write handle for one entry

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use super::{Inner, Snapshot};
use crate::error::{Error, Result};

/// Exclusive writer for an entry.
///
/// Values are written to dirty files and published together on
/// [`commit`](Editor::commit). Slots never handed out keep their previous
/// value, or become empty if the entry is new. Dropping an editor that was
/// neither committed nor aborted aborts it.
pub struct Editor {
    inner: Arc<Inner>,
    key: String,
    id: u64,
    written: Vec<bool>,
    closed: bool,
}

impl Editor {
    pub(super) fn new(inner: Arc<Inner>, key: String, id: u64, value_count: usize) -> Self {
        Self {
            inner,
            key,
            id,
            written: vec![false; value_count],
            closed: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Path of the dirty file for `index`, created empty if missing.
    ///
    /// Write the new value there; it becomes visible on commit.
    pub fn file(&mut self, index: usize) -> Result<PathBuf> {
        self.check_slot(index)?;
        let path = self.inner.dirty_file(&self.key, index);
        self.inner.fs.create_file(&path)?;
        self.written[index] = true;
        Ok(path)
    }

    /// Replace the pending value in `index` with `data`.
    pub fn write(&mut self, index: usize, data: &[u8]) -> Result<()> {
        let path = self.file(index)?;
        let mut out = self.inner.fs.open_write(&path)?;
        out.write_all(data)?;
        out.flush()?;
        Ok(())
    }

    /// Publish the written values.
    ///
    /// If the entry was removed or the cache closed while this editor was
    /// open, the values are discarded instead.
    pub fn commit(&mut self) -> Result<()> {
        self.complete(true)
    }

    /// Discard the written values.
    pub fn abort(&mut self) -> Result<()> {
        self.complete(false)
    }

    /// Commit and open a snapshot of the result under the same lock.
    pub fn commit_and_get(mut self) -> Result<Option<Snapshot>> {
        if self.closed {
            return Err(Error::HandleClosed("editor"));
        }
        self.closed = true;
        let inner = Arc::clone(&self.inner);
        let mut st = inner.lock();
        inner.complete_edit(&mut st, &self.key, self.id, &self.written, true)?;
        if st.closed {
            return Ok(None);
        }
        inner.get_locked(&mut st, &self.key)
    }

    fn complete(&mut self, success: bool) -> Result<()> {
        if self.closed {
            return Err(Error::HandleClosed("editor"));
        }
        self.closed = true;
        let mut st = self.inner.lock();
        self.inner
            .complete_edit(&mut st, &self.key, self.id, &self.written, success)
    }

    fn check_slot(&self, index: usize) -> Result<()> {
        if self.closed {
            return Err(Error::HandleClosed("editor"));
        }
        if index >= self.written.len() {
            return Err(Error::InvalidSlot {
                index,
                value_count: self.written.len(),
            });
        }
        Ok(())
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.abort() {
            warn!(key = %self.key, error = %e, "Failed to abort abandoned edit");
        }
    }
}

impl fmt::Debug for Editor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Editor")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}
