//! [`DiskCache`] construction and size budgeting

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{DiskCache, APP_VERSION, ENTRY_COUNT};
use crate::engine::{CleanupDispatcher, DiskLruCache, DiskLruCacheConfig};
use crate::error::{Error, Result};
use crate::fs::{FileSystem, StdFileSystem};

/// Default share of free space used as the budget
pub const DEFAULT_MAX_SIZE_PERCENT: f64 = 0.02;
/// Lower clamp for percent-based budgets
pub const DEFAULT_MINIMUM_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024;
/// Upper clamp for percent-based budgets
pub const DEFAULT_MAXIMUM_MAX_SIZE_BYTES: u64 = 250 * 1024 * 1024;

/// Builder for [`DiskCache`].
///
/// The budget is either an explicit byte count or a share of the free space
/// on the cache's volume, clamped to `[minimum, maximum]`. Setting one mode
/// switches the other off.
#[derive(Debug, Clone)]
pub struct DiskCacheBuilder {
    directory: Option<PathBuf>,
    file_system: Option<Arc<dyn FileSystem>>,
    max_size_percent: f64,
    minimum_max_size_bytes: u64,
    maximum_max_size_bytes: u64,
    max_size_bytes: u64,
    cleanup_dispatcher: Option<Arc<dyn CleanupDispatcher>>,
}

impl Default for DiskCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskCacheBuilder {
    pub fn new() -> Self {
        Self {
            directory: None,
            file_system: None,
            max_size_percent: DEFAULT_MAX_SIZE_PERCENT,
            minimum_max_size_bytes: DEFAULT_MINIMUM_MAX_SIZE_BYTES,
            maximum_max_size_bytes: DEFAULT_MAXIMUM_MAX_SIZE_BYTES,
            max_size_bytes: 0,
            cleanup_dispatcher: None,
        }
    }

    /// Directory the cache owns exclusively (required)
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Filesystem to operate on; the real one by default
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Budget as a share (`0.0..=1.0`) of the volume's free space
    pub fn max_size_percent(mut self, percent: f64) -> Self {
        self.max_size_percent = percent;
        self.max_size_bytes = 0;
        self
    }

    pub fn minimum_max_size_bytes(mut self, bytes: u64) -> Self {
        self.minimum_max_size_bytes = bytes;
        self
    }

    pub fn maximum_max_size_bytes(mut self, bytes: u64) -> Self {
        self.maximum_max_size_bytes = bytes;
        self
    }

    /// Fixed budget in bytes
    pub fn max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_percent = 0.0;
        self.max_size_bytes = bytes;
        self
    }

    /// Where background trims run; a dedicated thread by default
    pub fn cleanup_dispatcher(mut self, dispatcher: Arc<dyn CleanupDispatcher>) -> Self {
        self.cleanup_dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> Result<DiskCache> {
        let directory = self
            .directory
            .clone()
            .ok_or_else(|| Error::Config("directory is required".into()))?;
        self.validate()?;

        let fs = self
            .file_system
            .clone()
            .unwrap_or_else(|| Arc::new(StdFileSystem::new()));
        let max_size = self.resolve_max_size(&*fs, &directory);

        let config = DiskLruCacheConfig::new(directory, max_size)
            .with_app_version(APP_VERSION)
            .with_value_count(ENTRY_COUNT);
        let engine = match self.cleanup_dispatcher {
            Some(dispatcher) => DiskLruCache::new(config, Arc::clone(&fs), dispatcher)?,
            None => DiskLruCache::with_file_system(config, Arc::clone(&fs))?,
        };

        debug!(
            directory = %engine.directory().display(),
            max_size,
            "Disk cache built"
        );
        Ok(DiskCache::from_engine(engine, fs))
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_size_percent) {
            return Err(Error::Config(format!(
                "max_size_percent must be in 0.0..=1.0, got {}",
                self.max_size_percent
            )));
        }
        if self.minimum_max_size_bytes > self.maximum_max_size_bytes {
            return Err(Error::Config(format!(
                "minimum_max_size_bytes ({}) exceeds maximum_max_size_bytes ({})",
                self.minimum_max_size_bytes, self.maximum_max_size_bytes
            )));
        }
        if self.max_size_percent == 0.0 && self.max_size_bytes == 0 {
            return Err(Error::Config("max size must be greater than zero".into()));
        }
        Ok(())
    }

    fn resolve_max_size(&self, fs: &dyn FileSystem, directory: &std::path::Path) -> u64 {
        if self.max_size_percent <= 0.0 {
            return self.max_size_bytes;
        }
        match fs.free_space(directory) {
            Ok(free) => {
                let budget = (self.max_size_percent * free as f64) as u64;
                budget.clamp(self.minimum_max_size_bytes, self.maximum_max_size_bytes)
            }
            Err(e) => {
                warn!(
                    directory = %directory.display(),
                    error = %e,
                    "Cannot determine free space, using minimum cache size"
                );
                self.minimum_max_size_bytes
            }
        }
    }
}
