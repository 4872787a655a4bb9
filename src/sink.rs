//! Fault-tolerant byte sink
//!
//! The journal writer must never fail mid-mutation: by the time a record is
//! appended the in-memory entry table has already changed. This wrapper turns
//! the first I/O failure into a silent no-op for every later call and reports
//! the failure exactly once through a callback.

use std::fmt;
use std::io::{self, Write};

/// Callback invoked with the first I/O error seen by a [`FaultHidingSink`]
pub type FaultCallback = Box<dyn FnMut(&io::Error) + Send>;

/// Writer that swallows I/O errors after reporting the first one
pub struct FaultHidingSink<W: Write> {
    inner: W,
    has_errors: bool,
    on_error: Option<FaultCallback>,
}

impl<W: Write> FaultHidingSink<W> {
    /// Wrap `inner`, calling `on_error` once on its first failure
    pub fn new(inner: W, on_error: impl FnMut(&io::Error) + Send + 'static) -> Self {
        Self {
            inner,
            has_errors: false,
            on_error: Some(Box::new(on_error)),
        }
    }

    /// Whether a failure has been observed
    pub fn has_errors(&self) -> bool {
        self.has_errors
    }

    /// Close the sink: flush whatever can still be flushed and drop the inner writer.
    pub fn close(mut self) {
        if !self.has_errors {
            if let Err(e) = self.inner.flush() {
                self.fail(&e);
            }
        }
    }

    fn fail(&mut self, error: &io::Error) {
        self.has_errors = true;
        if let Some(mut callback) = self.on_error.take() {
            callback(error);
        }
    }
}

impl<W: Write> Write for FaultHidingSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.has_errors {
            return Ok(buf.len());
        }
        match self.inner.write_all(buf) {
            Ok(()) => Ok(buf.len()),
            Err(e) => {
                self.fail(&e);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.has_errors {
            return Ok(());
        }
        if let Err(e) = self.inner.flush() {
            self.fail(&e);
        }
        Ok(())
    }
}

impl<W: Write> fmt::Debug for FaultHidingSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultHidingSink")
            .field("has_errors", &self.has_errors)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
