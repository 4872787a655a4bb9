//! Journaled LRU Disk Cache Engine
//!
//! Size-bounded cache of entries, each holding a fixed number of byte values
//! stored as files in one directory. Every lifecycle change is appended to a
//! journal so the entry table can be rebuilt after a crash.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         DiskLruCache                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Mutex<State>                                                    │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │  EntryTable  │  │ JournalWriter│  │ trim / rebuild flags   │  │
//! │  │ (LRU order)  │  │ (fault-safe) │  │ (fail-closed edits)    │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────────┘  │
//! │         │                                        │               │
//! │   Editor / Snapshot handles            CleanupDispatcher         │
//! │   (pin entries, do file I/O            (one trim/rebuild job     │
//! │    outside the lock)                    queued or running)       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Files
//!
//! - `journal`, `journal.tmp`, `journal.bkp`
//! - `<key>.<slot>` published values, `<key>.<slot>.tmp` values being edited
//!
//! # Concurrency
//!
//! Every bookkeeping operation runs under one engine-wide lock. The lock is
//! never held while a caller reads or writes value files through a handle.
//! An entry with an open editor cannot be read, and an entry pinned by a
//! snapshot cannot be edited.

mod cleanup;
mod editor;
mod entry;
mod metrics;
mod snapshot;

#[cfg(test)]
mod proptest;

pub use cleanup::{CleanupDispatcher, CleanupJob, ManualDispatcher, TokioDispatcher, WorkerThread};
pub use editor::Editor;
pub use metrics::CacheStats;
pub use snapshot::Snapshot;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use regex::Regex;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::fs::{FileSystem, StdFileSystem};
use crate::journal::{
    write_journal_file, JournalHeader, JournalOp, JournalReader, JournalRecord, JournalWriter,
    JOURNAL_FILE, JOURNAL_FILE_BACKUP, JOURNAL_FILE_TMP,
};

use entry::{clean_file, dirty_file, EntryTable, REPLAYED_EDIT};
use metrics::CacheMetrics;

/// Journal operations since the last rewrite that trigger a rebuild
pub const REBUILD_THRESHOLD: usize = 2000;

static LEGAL_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-z0-9_-]{1,120}$").expect("key pattern is valid"));

/// Check a key against `[a-z0-9_-]{1,120}`.
pub fn validate_key(key: &str) -> Result<()> {
    if LEGAL_KEY.is_match(key) {
        Ok(())
    } else {
        Err(Error::InvalidKey(key.to_string()))
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct DiskLruCacheConfig {
    /// Directory owned exclusively by this cache
    pub directory: PathBuf,
    /// Byte budget
    pub max_size: u64,
    /// Stamped into the journal header; a mismatch discards the cache
    pub app_version: u32,
    /// Values per entry
    pub value_count: usize,
}

impl DiskLruCacheConfig {
    /// Config with app version 1 and two values per entry
    pub fn new(directory: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            directory: directory.into(),
            max_size,
            app_version: 1,
            value_count: 2,
        }
    }

    pub fn with_app_version(mut self, app_version: u32) -> Self {
        self.app_version = app_version;
        self
    }

    pub fn with_value_count(mut self, value_count: usize) -> Self {
        self.value_count = value_count;
        self
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::Config("max_size must be greater than zero".into()));
        }
        if self.value_count == 0 {
            return Err(Error::Config("value_count must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Mutable engine state, guarded by the engine lock
#[derive(Debug)]
struct State {
    table: EntryTable,
    size: u64,
    operations_since_rewrite: usize,
    journal: Option<JournalWriter>,
    initialized: bool,
    closed: bool,
    most_recent_trim_failed: bool,
    most_recent_rebuild_failed: bool,
    cleanup_scheduled: bool,
    next_editor_id: u64,
}

impl State {
    fn new() -> Self {
        Self {
            table: EntryTable::new(),
            size: 0,
            operations_since_rewrite: 0,
            journal: None,
            initialized: false,
            closed: false,
            most_recent_trim_failed: false,
            most_recent_rebuild_failed: false,
            cleanup_scheduled: false,
            next_editor_id: REPLAYED_EDIT + 1,
        }
    }

    fn append(&mut self, record: &JournalRecord) {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(record);
        }
    }

    fn append_and_flush(&mut self, record: &JournalRecord) {
        if let Some(journal) = self.journal.as_mut() {
            journal.append_and_flush(record);
        }
    }

    fn journal_has_errors(&self) -> bool {
        self.journal.as_ref().map(|j| j.has_errors()).unwrap_or(false)
    }

    fn rebuild_required(&self) -> bool {
        self.operations_since_rewrite >= REBUILD_THRESHOLD
    }

    fn check_not_closed(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

/// Shared engine core; handles keep it alive through an `Arc`.
pub(crate) struct Inner {
    directory: PathBuf,
    max_size: u64,
    header: JournalHeader,
    fs: Arc<dyn FileSystem>,
    dispatcher: Arc<dyn CleanupDispatcher>,
    owns_dispatcher: bool,
    journal_file: PathBuf,
    journal_file_tmp: PathBuf,
    journal_file_backup: PathBuf,
    metrics: CacheMetrics,
    state: Mutex<State>,
    weak_self: Weak<Inner>,
}

/// Journaled, size-bounded LRU cache over a directory.
///
/// Cloning is cheap and yields another handle to the same engine.
#[derive(Clone)]
pub struct DiskLruCache {
    inner: Arc<Inner>,
}

impl DiskLruCache {
    /// Open the cache in `config.directory` on the real filesystem,
    /// with its own cleanup thread, and replay the journal.
    pub fn open(config: DiskLruCacheConfig) -> Result<Self> {
        let cache = Self::with_file_system(config, Arc::new(StdFileSystem::new()))?;
        cache.initialize()?;
        Ok(cache)
    }

    /// Create an engine with its own cleanup thread. The directory is not
    /// touched until the first operation.
    pub fn with_file_system(config: DiskLruCacheConfig, fs: Arc<dyn FileSystem>) -> Result<Self> {
        config.validate()?;
        let worker = WorkerThread::spawn("disklru-cleanup")?;
        Ok(Self::build(config, fs, Arc::new(worker), true))
    }

    /// Create an engine that schedules cleanup on `dispatcher`. The
    /// dispatcher is shared, so closing the cache does not shut it down.
    pub fn new(
        config: DiskLruCacheConfig,
        fs: Arc<dyn FileSystem>,
        dispatcher: Arc<dyn CleanupDispatcher>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, fs, dispatcher, false))
    }

    fn build(
        config: DiskLruCacheConfig,
        fs: Arc<dyn FileSystem>,
        dispatcher: Arc<dyn CleanupDispatcher>,
        owns_dispatcher: bool,
    ) -> Self {
        let directory = config.directory;
        let inner = Arc::new_cyclic(|weak_self| Inner {
            journal_file: directory.join(JOURNAL_FILE),
            journal_file_tmp: directory.join(JOURNAL_FILE_TMP),
            journal_file_backup: directory.join(JOURNAL_FILE_BACKUP),
            directory,
            max_size: config.max_size,
            header: JournalHeader::new(config.app_version, config.value_count),
            fs,
            dispatcher,
            owns_dispatcher,
            metrics: CacheMetrics::default(),
            state: Mutex::new(State::new()),
            weak_self: weak_self.clone(),
        });
        Self { inner }
    }

    /// Replay the journal, or create a fresh one. Idempotent; every other
    /// operation calls it first.
    pub fn initialize(&self) -> Result<()> {
        let mut st = self.inner.state.lock();
        self.inner.initialize_locked(&mut st)
    }

    /// Open a snapshot of `key`'s published values.
    ///
    /// `None` if the key is absent, being written for the first time,
    /// being edited, or removed while pinned.
    pub fn get(&self, key: &str) -> Result<Option<Snapshot>> {
        validate_key(key)?;
        let mut st = self.inner.state.lock();
        self.inner.get_locked(&mut st, key)
    }

    /// Open an editor for `key`.
    ///
    /// `None` if another editor or any snapshot holds the key, or if the
    /// last trim, journal rebuild or journal write failed.
    pub fn edit(&self, key: &str) -> Result<Option<Editor>> {
        validate_key(key)?;
        let mut st = self.inner.state.lock();
        self.inner.edit_locked(&mut st, key)
    }

    /// Remove `key`. Pinned entries are removed once their last handle
    /// is released. Returns false if the key is absent.
    pub fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut st = self.inner.state.lock();
        st.check_not_closed()?;
        self.inner.initialize_locked(&mut st)?;

        if !st.table.contains(key) {
            return Ok(false);
        }
        let removed = self.inner.remove_entry(&mut st, key)?;
        if removed && st.size <= self.inner.max_size {
            st.most_recent_trim_failed = false;
        }
        Ok(removed)
    }

    /// Bytes held by published values. May exceed [`max_size`](Self::max_size)
    /// while a trim is pending.
    pub fn size(&self) -> Result<u64> {
        let mut st = self.inner.state.lock();
        if st.closed {
            return Ok(st.size);
        }
        self.inner.initialize_locked(&mut st)?;
        Ok(st.size)
    }

    /// Byte budget
    pub fn max_size(&self) -> u64 {
        self.inner.max_size
    }

    /// Cache directory
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// Values per entry
    pub fn value_count(&self) -> usize {
        self.inner.header.value_count
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Counters and current size
    pub fn stats(&self) -> CacheStats {
        let st = self.inner.state.lock();
        self.inner
            .metrics
            .snapshot(st.table.len(), st.size, self.inner.max_size)
    }

    /// Trim to size and flush the journal, synchronously.
    pub fn flush(&self) -> Result<()> {
        let mut st = self.inner.state.lock();
        if !st.initialized {
            return Ok(());
        }
        st.check_not_closed()?;
        self.inner.trim_to_size(&mut st)?;
        if let Some(journal) = st.journal.as_mut() {
            journal.flush();
        }
        Ok(())
    }

    /// Close the cache. Open editors are detached: committing them later
    /// discards their values. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut st = self.inner.state.lock();
        self.inner.close_locked(&mut st)
    }

    /// Close the cache and delete everything in its directory.
    pub fn delete(&self) -> Result<()> {
        let mut st = self.inner.state.lock();
        self.inner.close_locked(&mut st)?;
        self.inner.fs.delete_contents(&self.inner.directory)?;
        Ok(())
    }

    /// Remove every entry. Pinned entries become zombies.
    pub fn evict_all(&self) -> Result<()> {
        let mut st = self.inner.state.lock();
        st.check_not_closed()?;
        self.inner.initialize_locked(&mut st)?;

        for key in st.table.keys() {
            self.inner.remove_entry(&mut st, &key)?;
        }
        st.most_recent_trim_failed = false;
        info!(directory = %self.inner.directory.display(), "Evicted all entries");
        Ok(())
    }
}

impl fmt::Debug for DiskLruCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskLruCache")
            .field("directory", &self.inner.directory)
            .field("max_size", &self.inner.max_size)
            .field("value_count", &self.inner.header.value_count)
            .finish()
    }
}

// =============================================================================
// Locked operations
// =============================================================================

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    fn arc(&self) -> Result<Arc<Inner>> {
        self.weak_self.upgrade().ok_or(Error::Closed)
    }

    fn value_count(&self) -> usize {
        self.header.value_count
    }

    fn clean_file(&self, key: &str, slot: usize) -> PathBuf {
        clean_file(&self.directory, key, slot)
    }

    fn dirty_file(&self, key: &str, slot: usize) -> PathBuf {
        dirty_file(&self.directory, key, slot)
    }

    fn initialize_locked(&self, st: &mut State) -> Result<()> {
        if st.initialized {
            return Ok(());
        }

        let fs = &*self.fs;
        fs.create_dir_all(&self.directory)?;
        fs.delete(&self.journal_file_tmp)?;

        // A backup without a journal means a rebuild was interrupted
        // between the two renames.
        if fs.exists(&self.journal_file_backup) {
            if fs.exists(&self.journal_file) {
                fs.delete(&self.journal_file_backup)?;
            } else {
                fs.atomic_move(&self.journal_file_backup, &self.journal_file)?;
            }
        }

        if fs.exists(&self.journal_file) {
            match self.read_journal(st).and_then(|()| self.process_journal(st)) {
                Ok(()) => {
                    st.initialized = true;
                    info!(
                        directory = %self.directory.display(),
                        entries = st.table.len(),
                        size = st.size,
                        "Disk cache recovered from journal"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        directory = %self.directory.display(),
                        error = %e,
                        "Disk cache journal is unusable, wiping directory"
                    );
                }
            }
            self.wipe(st)?;
        }

        self.rebuild_journal(st)?;
        st.initialized = true;
        info!(directory = %self.directory.display(), "Disk cache initialized with a fresh journal");
        Ok(())
    }

    fn read_journal(&self, st: &mut State) -> Result<()> {
        let source = self.fs.open_read(&self.journal_file)?;
        let mut reader = JournalReader::open(source, &self.header)?;

        while let Some(record) = reader.next_record()? {
            self.apply_record(st, record);
        }
        st.operations_since_rewrite = reader.line_count().saturating_sub(st.table.len());

        if reader.truncated() {
            debug!("Journal ends in a partial line, rebuilding");
            self.rebuild_journal(st)?;
        } else {
            st.journal = Some(JournalWriter::append_to(&*self.fs, &self.journal_file)?);
        }
        Ok(())
    }

    fn apply_record(&self, st: &mut State, record: JournalRecord) {
        let value_count = self.value_count();
        match record.op {
            JournalOp::Remove => {
                st.table.remove(&record.key);
            }
            JournalOp::Read => st.table.touch(&record.key),
            JournalOp::Dirty => {
                st.table.get_or_insert(&record.key, value_count).current_editor =
                    Some(REPLAYED_EDIT);
            }
            JournalOp::Clean(lengths) => {
                let entry = st.table.get_or_insert(&record.key, value_count);
                entry.readable = true;
                entry.current_editor = None;
                entry.lengths = lengths;
            }
        }
    }

    /// Compute the size and drop entries whose last record was `DIRTY`.
    fn process_journal(&self, st: &mut State) -> Result<()> {
        let mut size: u64 = 0;
        for key in st.table.keys() {
            let Some(entry) = st.table.get_mut(&key) else {
                continue;
            };
            if entry.current_editor.is_none() {
                size = entry
                    .total_length()
                    .and_then(|len| size.checked_add(len))
                    .ok_or_else(|| {
                        Error::CorruptJournal(format!("lengths of {} overflow", key))
                    })?;
                continue;
            }

            entry.current_editor = None;
            for slot in 0..self.value_count() {
                self.fs.delete(&self.clean_file(&key, slot))?;
                self.fs.delete(&self.dirty_file(&key, slot))?;
            }
            st.table.remove(&key);
            debug!(key = %key, "Dropped entry left mid-edit");
        }
        st.size = size;
        Ok(())
    }

    /// Rewrite the journal with one line per entry and install it.
    fn rebuild_journal(&self, st: &mut State) -> io::Result<()> {
        if let Some(journal) = st.journal.take() {
            journal.close();
        }

        let records: Vec<JournalRecord> = st
            .table
            .iter()
            .filter_map(|entry| {
                if entry.current_editor.is_some() {
                    Some(JournalRecord::dirty(&entry.key))
                } else if entry.readable {
                    Some(JournalRecord::clean(&entry.key, &entry.lengths))
                } else {
                    None
                }
            })
            .collect();

        let fs = &*self.fs;
        write_journal_file(fs, &self.journal_file_tmp, &self.header, &records)?;
        if fs.exists(&self.journal_file) {
            fs.atomic_move(&self.journal_file, &self.journal_file_backup)?;
            fs.atomic_move(&self.journal_file_tmp, &self.journal_file)?;
            fs.delete(&self.journal_file_backup)?;
        } else {
            fs.atomic_move(&self.journal_file_tmp, &self.journal_file)?;
        }

        st.journal = Some(JournalWriter::append_to(fs, &self.journal_file)?);
        st.operations_since_rewrite = 0;
        st.most_recent_rebuild_failed = false;
        debug!(entries = records.len(), "Journal rebuilt");
        Ok(())
    }

    /// Forget all state and delete the directory contents.
    fn wipe(&self, st: &mut State) -> Result<()> {
        if let Some(journal) = st.journal.take() {
            journal.close();
        }
        st.table.clear();
        st.size = 0;
        st.operations_since_rewrite = 0;
        self.fs.delete_contents(&self.directory)?;
        Ok(())
    }

    fn get_locked(&self, st: &mut State, key: &str) -> Result<Option<Snapshot>> {
        st.check_not_closed()?;
        self.initialize_locked(st)?;

        let Some(entry) = st.table.get(key) else {
            self.metrics.record_miss();
            return Ok(None);
        };
        if !entry.readable || entry.current_editor.is_some() || entry.zombie {
            self.metrics.record_miss();
            return Ok(None);
        }

        // Published files can vanish underneath us; drop the entry lazily.
        let files: Vec<PathBuf> = (0..self.value_count())
            .map(|slot| self.clean_file(key, slot))
            .collect();
        if let Some(missing) = files.iter().find(|f| !self.fs.exists(f)) {
            warn!(key = %key, file = %missing.display(), "Cached file is missing, removing entry");
            if let Err(e) = self.remove_entry(st, key) {
                warn!(key = %key, error = %e, "Failed to remove entry with missing files");
            }
            self.metrics.record_miss();
            return Ok(None);
        }

        if let Some(entry) = st.table.get_mut(key) {
            entry.locking_snapshot_count += 1;
        }
        st.table.touch(key);
        st.operations_since_rewrite += 1;
        st.append(&JournalRecord::read(key));
        if st.rebuild_required() {
            self.launch_cleanup(st);
        }

        self.metrics.record_hit();
        trace!(key = %key, "Snapshot opened");
        Ok(Some(Snapshot::new(self.arc()?, key.to_string(), files)))
    }

    fn edit_locked(&self, st: &mut State, key: &str) -> Result<Option<Editor>> {
        st.check_not_closed()?;
        self.initialize_locked(st)?;

        if let Some(entry) = st.table.get(key) {
            if entry.current_editor.is_some() {
                debug!(key = %key, "Edit refused, another edit is in progress");
                self.metrics.record_edit_refused();
                return Ok(None);
            }
            if entry.locking_snapshot_count != 0 {
                debug!(key = %key, "Edit refused, entry is being read");
                self.metrics.record_edit_refused();
                return Ok(None);
            }
        }

        // Fail closed: no new data until a cleanup pass has succeeded.
        if st.most_recent_trim_failed || st.most_recent_rebuild_failed || st.journal_has_errors() {
            debug!(
                key = %key,
                trim_failed = st.most_recent_trim_failed,
                rebuild_failed = st.most_recent_rebuild_failed,
                "Edit refused until cleanup succeeds"
            );
            self.metrics.record_edit_refused();
            self.launch_cleanup(st);
            return Ok(None);
        }

        // Flush before handing out the editor so a crash leaves a trace.
        st.append_and_flush(&JournalRecord::dirty(key));
        if st.journal_has_errors() {
            self.metrics.record_edit_refused();
            self.launch_cleanup(st);
            return Ok(None);
        }

        let id = st.next_editor_id;
        st.next_editor_id += 1;
        st.table
            .get_or_insert(key, self.value_count())
            .current_editor = Some(id);

        Ok(Some(Editor::new(
            self.arc()?,
            key.to_string(),
            id,
            self.value_count(),
        )))
    }

    /// Publish (or discard) an editor's dirty files.
    fn complete_edit(
        &self,
        st: &mut State,
        key: &str,
        editor_id: u64,
        written: &[bool],
        success: bool,
    ) -> Result<()> {
        let value_count = self.value_count();
        let Some(entry) = st.table.get(key) else {
            return Ok(());
        };
        if entry.current_editor != Some(editor_id) {
            return Ok(());
        }

        let mut success = success && !entry.zombie;
        if success {
            // A slot handed out for writing must have a file behind it.
            if let Some(slot) =
                (0..value_count).find(|&slot| written[slot] && !self.fs.exists(&self.dirty_file(key, slot)))
            {
                debug!(key = %key, slot, "Written slot has no dirty file, aborting edit");
                success = false;
            }
        }

        let readable = entry.readable;
        let mut failure = None;
        if success {
            if let Err(e) = self.publish_edit(st, key, readable) {
                warn!(key = %key, error = %e, "Failed to publish edit, discarding it");
                success = false;
                failure = Some(e);
            }
        }
        if !success {
            for slot in 0..value_count {
                if let Err(e) = self.fs.delete(&self.dirty_file(key, slot)) {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        let Some(entry) = st.table.get_mut(key) else {
            return finish(failure);
        };
        entry.current_editor = None;

        if entry.zombie {
            self.remove_entry(st, key)?;
            return finish(failure);
        }

        st.operations_since_rewrite += 1;
        if success || entry.readable {
            entry.readable = true;
            let record = JournalRecord::clean(key, &entry.lengths);
            st.table.touch(key);
            st.append_and_flush(&record);
        } else {
            if failure.is_some() {
                // A failed publish may have moved some slots into place.
                for slot in 0..value_count {
                    if let Err(e) = self.fs.delete(&self.clean_file(key, slot)) {
                        if failure.is_none() {
                            failure = Some(e);
                        }
                    }
                    st.size = st.size.saturating_sub(entry.lengths[slot]);
                }
            }
            st.table.remove(key);
            st.append_and_flush(&JournalRecord::remove(key));
        }

        if st.size > self.max_size || st.rebuild_required() {
            self.launch_cleanup(st);
        }
        finish(failure)
    }

    /// Move every dirty file of `key` over its clean file and update sizes.
    fn publish_edit(&self, st: &mut State, key: &str, readable: bool) -> io::Result<()> {
        for slot in 0..self.value_count() {
            let dirty = self.dirty_file(key, slot);
            let clean = self.clean_file(key, slot);
            if self.fs.exists(&dirty) {
                self.fs.atomic_move(&dirty, &clean)?;
            } else if !readable || !self.fs.exists(&clean) {
                // Published entries always have a complete file set.
                self.fs.create_file(&clean)?;
            }

            let new_length = self.fs.size(&clean)?.unwrap_or(0);
            if let Some(entry) = st.table.get_mut(key) {
                let old_length = std::mem::replace(&mut entry.lengths[slot], new_length);
                st.size = st.size.saturating_sub(old_length).saturating_add(new_length);
            }
        }
        Ok(())
    }

    /// Delete `key`'s files, or mark it a zombie while it is pinned.
    fn remove_entry(&self, st: &mut State, key: &str) -> io::Result<bool> {
        let Some(entry) = st.table.get_mut(key) else {
            return Ok(false);
        };

        if entry.is_pinned() {
            let read_locked = entry.locking_snapshot_count > 0;
            entry.zombie = true;
            if read_locked {
                // If we crash now the entry must not come back.
                st.append_and_flush(&JournalRecord::dirty(key));
            }
            debug!(key = %key, "Entry is pinned, deferring removal");
            return Ok(true);
        }

        for slot in 0..self.value_count() {
            self.fs.delete(&self.clean_file(key, slot))?;
            st.size = st.size.saturating_sub(entry.lengths[slot]);
            entry.lengths[slot] = 0;
        }

        st.operations_since_rewrite += 1;
        st.append(&JournalRecord::remove(key));
        st.table.remove(key);

        if st.rebuild_required() {
            self.launch_cleanup(st);
        }
        Ok(true)
    }

    /// Release one snapshot pin, deleting a zombie's files on the last one.
    fn release_snapshot(&self, st: &mut State, key: &str) -> Result<()> {
        let Some(entry) = st.table.get_mut(key) else {
            return Ok(());
        };
        entry.locking_snapshot_count = entry.locking_snapshot_count.saturating_sub(1);
        if entry.locking_snapshot_count == 0 && entry.zombie {
            self.remove_entry(st, key)?;
        }
        trace!(key = %key, "Snapshot closed");
        Ok(())
    }

    fn trim_to_size(&self, st: &mut State) -> io::Result<()> {
        while st.size > self.max_size {
            let Some(key) = st.table.eldest_evictable().map(str::to_string) else {
                // Only zombies left; they go when released.
                return Ok(());
            };
            self.remove_entry(st, &key)?;
            self.metrics.record_eviction();
            debug!(key = %key, size = st.size, max_size = self.max_size, "Evicted entry");
        }
        st.most_recent_trim_failed = false;
        Ok(())
    }

    fn close_locked(&self, st: &mut State) -> Result<()> {
        if !st.initialized || st.closed {
            st.closed = true;
            return Ok(());
        }

        // Detach editors: their commits will find a zombie and be dropped.
        for key in st.table.keys() {
            if let Some(entry) = st.table.get_mut(&key) {
                if entry.current_editor.is_some() {
                    entry.zombie = true;
                }
            }
        }

        let trimmed = self.trim_to_size(st);
        if let Some(journal) = st.journal.take() {
            journal.close();
        }
        st.closed = true;
        if self.owns_dispatcher {
            self.dispatcher.shutdown();
        }
        info!(directory = %self.directory.display(), size = st.size, "Disk cache closed");
        trimmed?;
        Ok(())
    }

    fn launch_cleanup(&self, st: &mut State) {
        if st.cleanup_scheduled {
            return;
        }
        st.cleanup_scheduled = true;

        let weak = self.weak_self.clone();
        self.dispatcher.dispatch(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.run_cleanup();
            }
        }));
    }

    /// Background pass: trim, then rebuild the journal if it is due or broken.
    fn run_cleanup(&self) {
        let mut st = self.lock();
        st.cleanup_scheduled = false;
        if !st.initialized || st.closed {
            return;
        }

        if let Err(e) = self.trim_to_size(&mut st) {
            warn!(error = %e, "Trim failed, refusing edits until cleanup succeeds");
            st.most_recent_trim_failed = true;
        }

        if st.rebuild_required() || st.journal_has_errors() || st.most_recent_rebuild_failed {
            if let Err(e) = self.rebuild_journal(&mut st) {
                warn!(error = %e, "Journal rebuild failed, refusing edits until cleanup succeeds");
                st.most_recent_rebuild_failed = true;
                st.journal = Some(JournalWriter::blackhole());
            }
        }
    }
}

/// Report the first I/O failure of an edit completion, if any.
fn finish(failure: Option<io::Error>) -> Result<()> {
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FaultyFileSystem;
    use assert_matches::assert_matches;
    use std::fs;
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        fs: FaultyFileSystem,
        dispatcher: Arc<ManualDispatcher>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                fs: FaultyFileSystem::new(Arc::new(StdFileSystem::new())),
                dispatcher: Arc::new(ManualDispatcher::new()),
            }
        }

        fn open(&self, max_size: u64) -> DiskLruCache {
            let config = DiskLruCacheConfig::new(self.dir.path(), max_size);
            let cache = DiskLruCache::new(config, Arc::new(self.fs.clone()), self.dispatcher.clone())
                .unwrap();
            cache.initialize().unwrap();
            cache
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn journal(&self) -> String {
            fs::read_to_string(self.path(JOURNAL_FILE)).unwrap()
        }

        fn journal_body(&self) -> Vec<String> {
            self.journal().lines().skip(5).map(str::to_string).collect()
        }

        fn write_journal(&self, body: &str) {
            let text = format!("libcore.io.DiskLruCache\n1\n1\n2\n\n{}", body);
            fs::write(self.path(JOURNAL_FILE), text).unwrap();
        }
    }

    fn set(cache: &DiskLruCache, key: &str, a: &str, b: &str) {
        let mut editor = cache.edit(key).unwrap().expect("editor");
        editor.write(0, a.as_bytes()).unwrap();
        editor.write(1, b.as_bytes()).unwrap();
        editor.commit().unwrap();
    }

    fn read(cache: &DiskLruCache, key: &str) -> Option<(String, String)> {
        let snapshot = cache.get(key).unwrap()?;
        let a = String::from_utf8(snapshot.read(0).unwrap().to_vec()).unwrap();
        let b = String::from_utf8(snapshot.read(1).unwrap().to_vec()).unwrap();
        Some((a, b))
    }

    #[test]
    fn test_fresh_journal_header() {
        let h = Harness::new();
        let _cache = h.open(100);
        assert_eq!(h.journal(), "libcore.io.DiskLruCache\n1\n1\n2\n\n");
    }

    #[test]
    fn test_config_validation() {
        let h = Harness::new();
        let zero_size = DiskLruCacheConfig::new(h.dir.path(), 0);
        assert_matches!(
            DiskLruCache::new(zero_size, Arc::new(h.fs.clone()), h.dispatcher.clone()),
            Err(Error::Config(_))
        );
        let zero_values = DiskLruCacheConfig::new(h.dir.path(), 10).with_value_count(0);
        assert_matches!(
            DiskLruCache::new(zero_values, Arc::new(h.fs.clone()), h.dispatcher.clone()),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let h = Harness::new();
        let cache = h.open(100);
        let long = "a".repeat(121);
        for key in ["", "has space", "UPPER", "new\nline", "dot.ted", long.as_str()] {
            assert_matches!(cache.get(key), Err(Error::InvalidKey(_)));
            assert_matches!(cache.edit(key), Err(Error::InvalidKey(_)));
            assert_matches!(cache.remove(key), Err(Error::InvalidKey(_)));
        }
        assert!(validate_key(&"a".repeat(120)).is_ok());
        assert!(validate_key("a-b_c-0123").is_ok());
    }

    #[test]
    fn test_write_and_read() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "k1", "ABC", "DE");

        assert_eq!(read(&cache, "k1"), Some(("ABC".into(), "DE".into())));
        assert_eq!(cache.size().unwrap(), 5);
        cache.flush().unwrap();
        assert_eq!(h.journal_body(), vec!["DIRTY k1", "CLEAN k1 3 2", "READ k1"]);
    }

    #[test]
    fn test_partial_update_keeps_untouched_slot() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "a", "1", "2");
        assert_eq!(cache.size().unwrap(), 2);

        let mut editor = cache.edit("a").unwrap().unwrap();
        editor.write(0, b"33").unwrap();
        editor.commit().unwrap();

        assert_eq!(read(&cache, "a"), Some(("33".into(), "2".into())));
        assert_eq!(cache.size().unwrap(), 3);
    }

    #[test]
    fn test_unwritten_slots_of_new_entry_are_empty() {
        let h = Harness::new();
        let cache = h.open(100);

        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.write(1, b"data").unwrap();
        editor.commit().unwrap();

        assert_eq!(read(&cache, "k"), Some(("".into(), "data".into())));
        assert!(h.path("k.0").exists());
    }

    #[test]
    fn test_abort_of_new_entry_removes_it() {
        let h = Harness::new();
        let cache = h.open(100);

        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.write(0, b"abc").unwrap();
        editor.abort().unwrap();

        assert!(cache.get("k").unwrap().is_none());
        assert!(!h.path("k.0.tmp").exists());
        assert_eq!(h.journal_body(), vec!["DIRTY k", "REMOVE k"]);
    }

    #[test]
    fn test_abort_of_existing_entry_keeps_old_values() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "k", "old", "vals");

        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.write(0, b"new").unwrap();
        editor.abort().unwrap();

        assert_eq!(read(&cache, "k"), Some(("old".into(), "vals".into())));
    }

    #[test]
    fn test_written_slot_without_file_aborts_commit() {
        let h = Harness::new();
        let cache = h.open(100);

        let mut editor = cache.edit("k").unwrap().unwrap();
        let path = editor.file(0).unwrap();
        fs::remove_file(&path).unwrap();
        editor.commit().unwrap();

        assert!(cache.get("k").unwrap().is_none());
        assert_eq!(h.journal_body(), vec!["DIRTY k", "REMOVE k"]);
    }

    #[test]
    fn test_failed_publish_releases_new_entry() {
        let h = Harness::new();
        let cache = h.open(100);

        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.write(0, b"abc").unwrap();
        h.fs.rename_fault(h.path("k.0"), true);
        assert_matches!(editor.commit(), Err(Error::Io(_)));
        h.fs.rename_fault(h.path("k.0"), false);

        assert!(!h.path("k.0.tmp").exists());
        assert!(cache.get("k").unwrap().is_none());
        assert_eq!(cache.size().unwrap(), 0);
        cache.flush().unwrap();
        assert_eq!(h.journal_body(), vec!["DIRTY k", "REMOVE k"]);

        // The key is free to edit again.
        set(&cache, "k", "a", "b");
        assert_eq!(read(&cache, "k"), Some(("a".into(), "b".into())));
    }

    #[test]
    fn test_failed_publish_keeps_partially_moved_existing_entry() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "k", "old", "vals");

        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.write(0, b"new").unwrap();
        editor.write(1, b"data").unwrap();
        h.fs.rename_fault(h.path("k.1"), true);
        assert_matches!(editor.commit(), Err(Error::Io(_)));
        h.fs.rename_fault(h.path("k.1"), false);

        // Slot 0 was already moved into place; slot 1 keeps its old value.
        assert!(!h.path("k.1.tmp").exists());
        assert_eq!(read(&cache, "k"), Some(("new".into(), "vals".into())));
        assert_eq!(cache.size().unwrap(), 7);

        cache.close().unwrap();
        let reopened = h.open(100);
        assert_eq!(read(&reopened, "k"), Some(("new".into(), "vals".into())));
        assert!(reopened.edit("k").unwrap().is_some());
    }

    #[test]
    fn test_editor_is_exclusive() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "k", "a", "b");

        let mut editor = cache.edit("k").unwrap().unwrap();
        assert!(cache.edit("k").unwrap().is_none());
        assert!(cache.get("k").unwrap().is_none());
        editor.abort().unwrap();

        assert!(cache.edit("k").unwrap().is_some());
    }

    #[test]
    fn test_snapshot_blocks_edit() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "k", "a", "b");

        let mut snapshot = cache.get("k").unwrap().unwrap();
        let second = cache.get("k").unwrap().unwrap();
        assert!(cache.edit("k").unwrap().is_none());

        snapshot.close().unwrap();
        assert!(cache.edit("k").unwrap().is_none());
        drop(second);

        assert!(cache.edit("k").unwrap().is_some());
    }

    #[test]
    fn test_double_commit_rejected() {
        let h = Harness::new();
        let cache = h.open(100);
        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.write(0, b"a").unwrap();
        editor.commit().unwrap();

        assert_matches!(editor.commit(), Err(Error::HandleClosed("editor")));
        assert_matches!(editor.abort(), Err(Error::HandleClosed("editor")));
        assert_matches!(editor.file(0), Err(Error::HandleClosed("editor")));
    }

    #[test]
    fn test_snapshot_use_after_close() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "k", "a", "b");

        let mut snapshot = cache.get("k").unwrap().unwrap();
        snapshot.close().unwrap();
        snapshot.close().unwrap();
        assert_matches!(snapshot.file(0), Err(Error::HandleClosed("snapshot")));
    }

    #[test]
    fn test_slot_out_of_range() {
        let h = Harness::new();
        let cache = h.open(100);
        let mut editor = cache.edit("k").unwrap().unwrap();
        assert_matches!(
            editor.file(2),
            Err(Error::InvalidSlot {
                index: 2,
                value_count: 2
            })
        );
    }

    #[test]
    fn test_remove_unpinned() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "k", "a", "bc");

        assert!(cache.remove("k").unwrap());
        assert!(!cache.remove("k").unwrap());
        assert!(!h.path("k.0").exists());
        assert!(!h.path("k.1").exists());
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn test_remove_while_reading_defers_deletion() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "k", "abc", "de");

        let snapshot = cache.get("k").unwrap().unwrap();
        assert!(cache.remove("k").unwrap());

        // Still readable through the open snapshot, invisible to new readers.
        assert_eq!(&snapshot.read(0).unwrap()[..], b"abc");
        assert!(cache.get("k").unwrap().is_none());
        assert!(h.path("k.0").exists());

        drop(snapshot);
        assert!(!h.path("k.0").exists());
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn test_remove_while_editing_discards_commit() {
        let h = Harness::new();
        let cache = h.open(100);

        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.write(0, b"abc").unwrap();
        assert!(cache.remove("k").unwrap());
        editor.commit().unwrap();

        assert!(cache.get("k").unwrap().is_none());
        assert!(!h.path("k.0").exists());
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn test_missing_clean_file_drops_entry_on_lookup() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "k", "a", "b");

        fs::remove_file(h.path("k.1")).unwrap();
        assert!(cache.get("k").unwrap().is_none());
        assert_eq!(cache.size().unwrap(), 0);
        assert!(cache.edit("k").unwrap().is_some());
    }

    #[test]
    fn test_trim_evicts_least_recently_used() {
        let h = Harness::new();
        let cache = h.open(10);
        set(&cache, "a", "a", "aaa"); // 4
        set(&cache, "b", "b", "bbb"); // 4
        set(&cache, "c", "c", "c"); // 2

        cache.get("a").unwrap();
        set(&cache, "d", "d", "d"); // 12 > 10
        cache.flush().unwrap();

        assert!(cache.get("b").unwrap().is_none());
        assert!(cache.get("a").unwrap().is_some());
        assert!(cache.get("c").unwrap().is_some());
        assert!(cache.get("d").unwrap().is_some());
        assert_eq!(cache.size().unwrap(), 8);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_background_trim_after_commit() {
        let h = Harness::new();
        let cache = h.open(10);
        set(&cache, "a", "aaaa", "aaaa");
        set(&cache, "b", "bbbb", "bbbb");

        assert_eq!(cache.size().unwrap(), 16);
        assert_eq!(h.dispatcher.pending(), 1);

        h.dispatcher.run_pending();
        assert_eq!(cache.size().unwrap(), 8);
        assert!(cache.get("a").unwrap().is_none());
    }

    #[test]
    fn test_cleanup_requests_coalesce() {
        let h = Harness::new();
        let cache = h.open(1);
        set(&cache, "a", "aa", "aa");
        set(&cache, "b", "bb", "bb");
        set(&cache, "c", "cc", "cc");

        assert_eq!(h.dispatcher.pending(), 1);
    }

    #[test]
    fn test_trim_stops_at_zombies() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "a", "aaaa", "aaaa");

        let snapshot = cache.get("a").unwrap().unwrap();
        cache.evict_all().unwrap();
        // The zombie still counts until released.
        assert_eq!(cache.size().unwrap(), 8);
        cache.flush().unwrap();
        drop(snapshot);
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn test_evict_all() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "a", "a", "a");
        set(&cache, "b", "b", "b");

        cache.evict_all().unwrap();
        assert_eq!(cache.size().unwrap(), 0);
        assert!(cache.get("a").unwrap().is_none());
        assert!(!h.path("b.1").exists());
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_operations() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "a", "a", "a");

        cache.close().unwrap();
        cache.close().unwrap();
        assert!(cache.is_closed());
        assert_matches!(cache.get("a"), Err(Error::Closed));
        assert_matches!(cache.edit("a"), Err(Error::Closed));
        assert_matches!(cache.remove("a"), Err(Error::Closed));
        assert_matches!(cache.flush(), Err(Error::Closed));
    }

    #[test]
    fn test_size_of_closed_uninitialized_cache() {
        let h = Harness::new();
        let directory = h.path("never-opened");
        let config = DiskLruCacheConfig::new(&directory, 100);
        let cache =
            DiskLruCache::new(config, Arc::new(h.fs.clone()), h.dispatcher.clone()).unwrap();

        cache.close().unwrap();
        assert_eq!(cache.size().unwrap(), 0);
        assert!(!directory.exists());
    }

    #[test]
    fn test_commit_after_close_is_discarded() {
        let h = Harness::new();
        let cache = h.open(100);

        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.write(0, b"abc").unwrap();
        cache.close().unwrap();
        editor.commit().unwrap();

        assert!(!h.path("k.0").exists());
        let reopened = h.open(100);
        assert!(reopened.get("k").unwrap().is_none());
    }

    #[test]
    fn test_reopen_restores_entries() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "a", "a1", "a2");
        set(&cache, "b", "b1", "b2");
        let mut pending = cache.edit("c").unwrap().unwrap();
        pending.write(0, b"never committed").unwrap();
        cache.close().unwrap();
        drop(pending);

        let reopened = h.open(100);
        assert_eq!(read(&reopened, "a"), Some(("a1".into(), "a2".into())));
        assert_eq!(read(&reopened, "b"), Some(("b1".into(), "b2".into())));
        assert!(reopened.get("c").unwrap().is_none());
        assert_eq!(reopened.size().unwrap(), 8);
    }

    #[test]
    fn test_reopen_drops_dirty_entries_and_their_files() {
        let h = Harness::new();
        h.write_journal("CLEAN a 1 1\nDIRTY b\n");
        fs::write(h.path("a.0"), "x").unwrap();
        fs::write(h.path("a.1"), "y").unwrap();
        fs::write(h.path("b.0.tmp"), "partial").unwrap();

        let cache = h.open(100);
        assert_eq!(read(&cache, "a"), Some(("x".into(), "y".into())));
        assert!(cache.get("b").unwrap().is_none());
        assert!(!h.path("b.0.tmp").exists());
        assert_eq!(cache.size().unwrap(), 2);
    }

    #[test]
    fn test_reopen_preserves_lru_order() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "a", "a", "a");
        set(&cache, "b", "b", "b");
        set(&cache, "c", "c", "c");
        cache.get("a").unwrap();
        cache.close().unwrap();

        // Replayed order is b, c, a; a budget of 2 keeps only a.
        let reopened = h.open(2);
        reopened.flush().unwrap();

        assert!(reopened.get("b").unwrap().is_none());
        assert!(reopened.get("c").unwrap().is_none());
        assert!(reopened.get("a").unwrap().is_some());
    }

    #[test]
    fn test_corrupt_journal_wipes_directory() {
        let h = Harness::new();
        h.write_journal("CLEAN a 1 1\nGARBAGE\n");
        fs::write(h.path("a.0"), "x").unwrap();
        fs::write(h.path("stray"), "junk").unwrap();

        let cache = h.open(100);
        assert!(cache.get("a").unwrap().is_none());
        assert!(!h.path("a.0").exists());
        assert!(!h.path("stray").exists());
        assert_eq!(h.journal(), "libcore.io.DiskLruCache\n1\n1\n2\n\n");
    }

    #[test]
    fn test_overflowing_lengths_wipe_directory() {
        let h = Harness::new();
        h.write_journal("CLEAN a 18446744073709551615 1\n");
        fs::write(h.path("a.0"), "x").unwrap();

        let cache = h.open(100);
        assert!(cache.get("a").unwrap().is_none());
        assert!(!h.path("a.0").exists());
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn test_overflowing_total_size_wipes_directory() {
        let h = Harness::new();
        h.write_journal("CLEAN a 18446744073709551615 0\nCLEAN b 1 0\n");

        let cache = h.open(100);
        assert!(cache.get("a").unwrap().is_none());
        assert!(cache.get("b").unwrap().is_none());
        assert_eq!(h.journal(), "libcore.io.DiskLruCache\n1\n1\n2\n\n");
    }

    #[test]
    fn test_header_mismatch_wipes_directory() {
        let h = Harness::new();
        fs::write(
            h.path(JOURNAL_FILE),
            "libcore.io.DiskLruCache\n1\n1\n3\n\nCLEAN a 1 1 1\n",
        )
        .unwrap();
        let cache = h.open(100);
        assert_eq!(cache.size().unwrap(), 0);
        assert!(cache.get("a").unwrap().is_none());
    }

    #[test]
    fn test_truncated_journal_is_rebuilt() {
        let h = Harness::new();
        h.write_journal("CLEAN a 1 1\nCLEAN b 1");
        fs::write(h.path("a.0"), "x").unwrap();
        fs::write(h.path("a.1"), "y").unwrap();

        let cache = h.open(100);
        assert!(cache.get("a").unwrap().is_some());
        assert_eq!(h.journal_body()[0], "CLEAN a 1 1");
        assert!(h.journal().ends_with('\n'));
    }

    #[test]
    fn test_backup_promoted_when_journal_missing() {
        let h = Harness::new();
        h.write_journal("CLEAN a 1 1\n");
        fs::rename(h.path(JOURNAL_FILE), h.path(JOURNAL_FILE_BACKUP)).unwrap();
        fs::write(h.path("a.0"), "x").unwrap();
        fs::write(h.path("a.1"), "y").unwrap();

        let cache = h.open(100);
        assert!(cache.get("a").unwrap().is_some());
        assert!(!h.path(JOURNAL_FILE_BACKUP).exists());
        assert!(h.path(JOURNAL_FILE).exists());
    }

    #[test]
    fn test_backup_discarded_when_journal_present() {
        let h = Harness::new();
        fs::write(h.path(JOURNAL_FILE_BACKUP), "stale").unwrap();
        h.write_journal("");
        let _cache = h.open(100);
        assert!(!h.path(JOURNAL_FILE_BACKUP).exists());
    }

    #[test]
    fn test_stale_tmp_journal_deleted() {
        let h = Harness::new();
        fs::write(h.path(JOURNAL_FILE_TMP), "half written").unwrap();
        let _cache = h.open(100);
        assert!(!h.path(JOURNAL_FILE_TMP).exists());
    }

    #[test]
    fn test_journal_rebuilt_after_threshold() {
        let h = Harness::new();
        let cache = h.open(1000);
        set(&cache, "a", "a", "a");

        for _ in 0..REBUILD_THRESHOLD {
            cache.get("a").unwrap();
        }
        cache.flush().unwrap();
        assert!(h.journal_body().len() > REBUILD_THRESHOLD);

        h.dispatcher.run_pending();
        assert_eq!(h.journal_body(), vec!["CLEAN a 1 1"]);
    }

    #[test]
    fn test_journal_write_failure_refuses_edits_until_cleanup() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "a", "a", "a");

        h.fs.write_fault(h.path(JOURNAL_FILE), true);
        assert!(cache.edit("x").unwrap().is_none());
        assert!(cache.edit("y").unwrap().is_none());
        assert_eq!(cache.stats().edits_refused, 2);

        h.fs.write_fault(h.path(JOURNAL_FILE), false);
        h.dispatcher.run_pending();

        let mut editor = cache.edit("z").unwrap().expect("edits accepted after cleanup");
        editor.write(0, b"z").unwrap();
        editor.commit().unwrap();
        assert!(cache.get("a").unwrap().is_some());
        assert!(cache.get("z").unwrap().is_some());
    }

    #[test]
    fn test_rebuild_failure_refuses_edits_until_rebuild_succeeds() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "a", "a", "a");

        h.fs.write_fault(h.path(JOURNAL_FILE), true);
        assert!(cache.edit("x").unwrap().is_none());
        // Rebuild writes the tmp journal; fail that too.
        h.fs.write_fault(h.path(JOURNAL_FILE_TMP), true);
        h.dispatcher.run_pending();
        assert!(cache.edit("y").unwrap().is_none());

        h.fs.write_fault(h.path(JOURNAL_FILE), false);
        h.fs.write_fault(h.path(JOURNAL_FILE_TMP), false);
        h.dispatcher.run_pending();
        assert!(cache.edit("y").unwrap().is_some());
    }

    #[test]
    fn test_trim_failure_refuses_edits_until_trim_succeeds() {
        let h = Harness::new();
        let cache = h.open(4);
        set(&cache, "a", "aa", "aa");
        h.fs.delete_fault(h.path("a.0"), true);
        set(&cache, "b", "bb", "bb");

        h.dispatcher.run_pending();
        assert!(cache.edit("c").unwrap().is_none());

        h.fs.delete_fault(h.path("a.0"), false);
        h.dispatcher.run_pending();
        assert!(cache.edit("c").unwrap().is_some());
        assert!(cache.get("a").unwrap().is_none());
    }

    #[test]
    fn test_delete_clears_directory() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "a", "a", "a");
        cache.delete().unwrap();

        assert!(cache.is_closed());
        assert_eq!(fs::read_dir(h.dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_snapshot_close_and_edit() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "k", "a", "b");

        let snapshot = cache.get("k").unwrap().unwrap();
        let mut editor = snapshot.close_and_edit().unwrap().expect("editor");
        editor.write(0, b"c").unwrap();
        editor.commit().unwrap();
        assert_eq!(read(&cache, "k"), Some(("c".into(), "b".into())));
    }

    #[test]
    fn test_editor_commit_and_get() {
        let h = Harness::new();
        let cache = h.open(100);

        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.write(0, b"meta").unwrap();
        editor.write(1, b"data").unwrap();
        let snapshot = editor.commit_and_get().unwrap().expect("snapshot");
        assert_eq!(&snapshot.read(1).unwrap()[..], b"data");
        assert!(cache.edit("k").unwrap().is_none());
    }

    #[test]
    fn test_dropped_editor_aborts() {
        let h = Harness::new();
        let cache = h.open(100);
        {
            let mut editor = cache.edit("k").unwrap().unwrap();
            editor.write(0, b"abc").unwrap();
        }
        assert!(!h.path("k.0.tmp").exists());
        assert!(cache.edit("k").unwrap().is_some());
    }

    #[test]
    fn test_read_records_hits_and_misses() {
        let h = Harness::new();
        let cache = h.open(100);
        set(&cache, "k", "a", "b");
        cache.get("k").unwrap();
        cache.get("missing").unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.size, 2);
        assert_eq!(stats.max_size, 100);
    }
}
