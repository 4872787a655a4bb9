//! disklru - Journaled LRU Disk Cache
//!
//! A size-bounded, crash-safe cache of byte values stored as files in one
//! directory. Entry lifecycles are recorded in an append-only journal that is
//! replayed on startup and compacted in the background.
//!
//! # Architecture
//!
//! ```text
//! DiskCache (hashed keys, metadata + data)
//!     └── DiskLruCache (entry table, LRU trim, editors, snapshots)
//!             ├── journal (text log: DIRTY / CLEAN / REMOVE / READ)
//!             │       └── FaultHidingSink (absorbs write failures)
//!             └── FileSystem (std or fault-injecting)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Public façade for image metadata and data
//! - [`engine`] - Journaled LRU engine and background cleanup
//! - [`error`] - Error types
//! - [`fs`] - Filesystem port
//! - [`journal`] - Journal format, replay and writing
//! - [`sink`] - Fault-tolerant writer

pub mod cache;
pub mod engine;
pub mod error;
pub mod fs;
pub mod journal;
pub mod sink;

// Re-export commonly used types
pub use cache::{DiskCache, DiskCacheBuilder};
pub use engine::{
    CacheStats, CleanupDispatcher, DiskLruCache, DiskLruCacheConfig, Editor, ManualDispatcher,
    Snapshot, TokioDispatcher, WorkerThread,
};
pub use error::{Error, Result};
pub use fs::{FaultyFileSystem, FileSystem, StdFileSystem};
