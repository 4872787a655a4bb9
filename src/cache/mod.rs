//! Image Disk Cache
//!
//! Thin layer over [`DiskLruCache`] for an image pipeline: every entry holds
//! two values, a metadata stream and a data stream, and callers use arbitrary
//! strings as keys.
//!
//! # Keys
//!
//! Caller keys are hashed with SHA-256 and hex-encoded before they reach the
//! engine, so any string is accepted and always maps to a legal engine key.

mod builder;

pub use builder::DiskCacheBuilder;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::engine::{self, CacheStats, DiskLruCache};
use crate::error::Result;
use crate::fs::FileSystem;

/// Slot holding entry metadata
pub const ENTRY_METADATA: usize = 0;
/// Slot holding entry data
pub const ENTRY_DATA: usize = 1;
/// Values per entry
pub const ENTRY_COUNT: usize = 2;
/// Journal app version written by this layer
pub const APP_VERSION: u32 = 3;

/// Map a caller key to an engine key.
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Metadata-plus-data disk cache
#[derive(Debug, Clone)]
pub struct DiskCache {
    engine: DiskLruCache,
    fs: Arc<dyn FileSystem>,
}

impl DiskCache {
    pub fn builder() -> DiskCacheBuilder {
        DiskCacheBuilder::new()
    }

    pub(crate) fn from_engine(engine: DiskLruCache, fs: Arc<dyn FileSystem>) -> Self {
        Self { engine, fs }
    }

    /// Open a snapshot of `key`, or `None` on a miss.
    pub fn open_snapshot(&self, key: &str) -> Result<Option<Snapshot>> {
        Ok(self.engine.get(&hash_key(key))?.map(Snapshot))
    }

    /// Open an editor for `key`, or `None` if the entry is busy or edits are
    /// currently refused.
    pub fn open_editor(&self, key: &str) -> Result<Option<Editor>> {
        Ok(self.engine.edit(&hash_key(key))?.map(Editor))
    }

    /// Remove `key`; false if it was not cached.
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.engine.remove(&hash_key(key))
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<()> {
        self.engine.evict_all()
    }

    /// Bytes currently cached
    pub fn size(&self) -> Result<u64> {
        self.engine.size()
    }

    /// Byte budget
    pub fn max_size(&self) -> u64 {
        self.engine.max_size()
    }

    pub fn directory(&self) -> &Path {
        self.engine.directory()
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn stats(&self) -> CacheStats {
        self.engine.stats()
    }

    /// Trim to size and flush the journal now.
    pub fn flush(&self) -> Result<()> {
        self.engine.flush()
    }

    /// Close the underlying engine.
    pub fn shutdown(&self) -> Result<()> {
        self.engine.close()
    }
}

/// Read handle on one cached image
#[derive(Debug)]
pub struct Snapshot(engine::Snapshot);

impl Snapshot {
    pub fn metadata_path(&self) -> Result<PathBuf> {
        Ok(self.0.file(ENTRY_METADATA)?.to_path_buf())
    }

    pub fn data_path(&self) -> Result<PathBuf> {
        Ok(self.0.file(ENTRY_DATA)?.to_path_buf())
    }

    pub fn read_metadata(&self) -> Result<Bytes> {
        self.0.read(ENTRY_METADATA)
    }

    pub fn read_data(&self) -> Result<Bytes> {
        self.0.read(ENTRY_DATA)
    }

    pub fn close(&mut self) -> Result<()> {
        self.0.close()
    }

    /// Close and reopen the same entry for writing.
    pub fn close_and_open_editor(self) -> Result<Option<Editor>> {
        Ok(self.0.close_and_edit()?.map(Editor))
    }
}

/// Write handle on one cached image
#[derive(Debug)]
pub struct Editor(engine::Editor);

impl Editor {
    pub fn metadata_path(&mut self) -> Result<PathBuf> {
        self.0.file(ENTRY_METADATA)
    }

    pub fn data_path(&mut self) -> Result<PathBuf> {
        self.0.file(ENTRY_DATA)
    }

    pub fn write_metadata(&mut self, bytes: &[u8]) -> Result<()> {
        self.0.write(ENTRY_METADATA, bytes)
    }

    pub fn write_data(&mut self, bytes: &[u8]) -> Result<()> {
        self.0.write(ENTRY_DATA, bytes)
    }

    pub fn commit(&mut self) -> Result<()> {
        self.0.commit()
    }

    /// Commit and reopen the same entry for reading.
    pub fn commit_and_open_snapshot(self) -> Result<Option<Snapshot>> {
        Ok(self.0.commit_and_get()?.map(Snapshot))
    }

    pub fn abort(&mut self) -> Result<()> {
        self.0.abort()
    }
}
