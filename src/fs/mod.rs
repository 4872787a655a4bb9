//! Filesystem Port
//!
//! The engine never calls `std::fs` directly. Every file operation goes
//! through the [`FileSystem`] trait so the cache can run against the real
//! disk ([`StdFileSystem`]) or a fault-injecting wrapper ([`FaultyFileSystem`]).
//!
//! # Semantics
//!
//! - `delete` of a missing file is not an error
//! - `create_file` creates parent directories and leaves existing files intact
//! - `atomic_move` replaces the target if it exists

mod faulty;

pub use faulty::FaultyFileSystem;

use std::fmt::Debug;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;

/// Boxed reader returned by [`FileSystem::open_read`]
pub type FileReader = Box<dyn Read + Send>;

/// Boxed writer returned by [`FileSystem::open_write`] / [`FileSystem::open_append`]
pub type FileWriter = Box<dyn Write + Send>;

/// Filesystem operations the cache depends on.
pub trait FileSystem: Send + Sync + Debug {
    /// Check whether a file exists
    fn exists(&self, path: &Path) -> bool;

    /// Size of a regular file in bytes, `None` if it does not exist
    fn size(&self, path: &Path) -> io::Result<Option<u64>>;

    /// Create an empty file if absent (creating parent directories)
    fn create_file(&self, path: &Path) -> io::Result<()>;

    /// Create a directory and all of its parents
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Delete a file; missing files are ignored
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Recursively delete everything inside `dir`, keeping `dir` itself
    fn delete_contents(&self, dir: &Path) -> io::Result<()>;

    /// Rename `from` over `to`
    fn atomic_move(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Open a file for reading
    fn open_read(&self, path: &Path) -> io::Result<FileReader>;

    /// Open a file for writing, truncating it
    fn open_write(&self, path: &Path) -> io::Result<FileWriter>;

    /// Open a file for appending, creating it if needed
    fn open_append(&self, path: &Path) -> io::Result<FileWriter>;

    /// Free bytes available on the volume holding `path`
    fn free_space(&self, path: &Path) -> io::Result<u64>;
}

/// [`FileSystem`] backed by `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl StdFileSystem {
    /// Create the real filesystem adapter
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn size(&self, path: &Path) -> io::Result<Option<u64>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn delete_contents(&self, dir: &Path) -> io::Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        // Keep going past individual failures, report the first one.
        let mut first_error = None;
        for entry in entries {
            let result = entry.and_then(|entry| {
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                }
            });
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn atomic_move(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn open_read(&self, path: &Path) -> io::Result<FileReader> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn open_write(&self, path: &Path) -> io::Result<FileWriter> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Box::new(fs::File::create(path)?))
    }

    fn open_append(&self, path: &Path) -> io::Result<FileWriter> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(file))
    }

    fn free_space(&self, path: &Path) -> io::Result<u64> {
        // The query needs an existing path; walk up until one exists.
        let mut probe = path;
        while !probe.exists() {
            probe = probe
                .parent()
                .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "no existing ancestor"))?;
        }
        fs2::available_space(probe)
    }
}

// =============================================================================
// Tests
// =============================================================================
