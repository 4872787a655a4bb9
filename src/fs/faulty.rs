//! Fault-injecting filesystem wrapper
//!
//! Wraps another [`FileSystem`] and fails writes, deletes or renames on
//! selected paths. Write faults are checked on every `write`/`flush`, so a
//! writer opened before the fault was armed starts failing as soon as it is.

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{FileReader, FileSystem, FileWriter};

#[derive(Debug, Default)]
struct Faults {
    writes: HashSet<PathBuf>,
    deletes: HashSet<PathBuf>,
    renames: HashSet<PathBuf>,
}

/// [`FileSystem`] that injects I/O failures on demand
#[derive(Debug, Clone)]
pub struct FaultyFileSystem {
    inner: Arc<dyn FileSystem>,
    faults: Arc<RwLock<Faults>>,
}

impl FaultyFileSystem {
    /// Wrap another filesystem with no faults armed
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            faults: Arc::new(RwLock::new(Faults::default())),
        }
    }

    /// Fail (or stop failing) writes to `path`
    pub fn write_fault(&self, path: impl Into<PathBuf>, fault: bool) {
        toggle(&mut self.faults.write().writes, path.into(), fault);
    }

    /// Fail (or stop failing) deletes of `path`
    pub fn delete_fault(&self, path: impl Into<PathBuf>, fault: bool) {
        toggle(&mut self.faults.write().deletes, path.into(), fault);
    }

    /// Fail (or stop failing) renames from or to `path`
    pub fn rename_fault(&self, path: impl Into<PathBuf>, fault: bool) {
        toggle(&mut self.faults.write().renames, path.into(), fault);
    }

    fn check(&self, kind: FaultKind, path: &Path) -> io::Result<()> {
        let faults = self.faults.read();
        let armed = match kind {
            FaultKind::Write => faults.writes.contains(path),
            FaultKind::Delete => faults.deletes.contains(path),
            FaultKind::Rename => faults.renames.contains(path),
        };
        if armed {
            return Err(fault_error(path));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum FaultKind {
    Write,
    Delete,
    Rename,
}

fn toggle(set: &mut HashSet<PathBuf>, path: PathBuf, fault: bool) {
    if fault {
        set.insert(path);
    } else {
        set.remove(&path);
    }
}

fn fault_error(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("boom! {}", path.display()))
}

struct FaultyWriter {
    inner: FileWriter,
    path: PathBuf,
    faults: Arc<RwLock<Faults>>,
}

impl FaultyWriter {
    fn check(&self) -> io::Result<()> {
        if self.faults.read().writes.contains(&self.path) {
            return Err(fault_error(&self.path));
        }
        Ok(())
    }
}

impl Write for FaultyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.inner.flush()
    }
}

impl FileSystem for FaultyFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn size(&self, path: &Path) -> io::Result<Option<u64>> {
        self.inner.size(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        self.check(FaultKind::Write, path)?;
        self.inner.create_file(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        self.check(FaultKind::Delete, path)?;
        self.inner.delete(path)
    }

    fn delete_contents(&self, dir: &Path) -> io::Result<()> {
        self.check(FaultKind::Delete, dir)?;
        self.inner.delete_contents(dir)
    }

    fn atomic_move(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check(FaultKind::Rename, from)?;
        self.check(FaultKind::Rename, to)?;
        self.inner.atomic_move(from, to)
    }

    fn open_read(&self, path: &Path) -> io::Result<FileReader> {
        self.inner.open_read(path)
    }

    fn open_write(&self, path: &Path) -> io::Result<FileWriter> {
        Ok(Box::new(FaultyWriter {
            inner: self.inner.open_write(path)?,
            path: path.to_path_buf(),
            faults: Arc::clone(&self.faults),
        }))
    }

    fn open_append(&self, path: &Path) -> io::Result<FileWriter> {
        Ok(Box::new(FaultyWriter {
            inner: self.inner.open_append(path)?,
            path: path.to_path_buf(),
            faults: Arc::clone(&self.faults),
        }))
    }

    fn free_space(&self, path: &Path) -> io::Result<u64> {
        self.inner.free_space(path)
    }
}
