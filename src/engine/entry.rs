//! Entry bookkeeping
//!
//! [`Entry`] is the in-memory record for one key; [`EntryTable`] keys them
//! by name and keeps them in access order so the eldest entry is always
//! first in line for eviction.

use std::collections::{hash_map, BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Editor id recorded for entries whose journal ends in `DIRTY` during replay
pub(crate) const REPLAYED_EDIT: u64 = 0;

/// Per-key state shared by the engine, its editors and its snapshots.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub key: String,
    /// Byte length of each value slot
    pub lengths: Vec<u64>,
    /// Published at least once
    pub readable: bool,
    /// Removed while pinned; files go when the last pin is released
    pub zombie: bool,
    /// Id of the open editor, if any
    pub current_editor: Option<u64>,
    /// Open snapshots pinning the clean files
    pub locking_snapshot_count: u32,
    /// Position in the access order
    access: u64,
}

impl Entry {
    fn new(key: &str, value_count: usize, access: u64) -> Self {
        Self {
            key: key.to_string(),
            lengths: vec![0; value_count],
            readable: false,
            zombie: false,
            current_editor: None,
            locking_snapshot_count: 0,
            access,
        }
    }

    /// Sum of all slot lengths, `None` if it does not fit in a `u64`
    pub fn total_length(&self) -> Option<u64> {
        self.lengths
            .iter()
            .try_fold(0u64, |total, &len| total.checked_add(len))
    }

    /// Whether an editor or a snapshot currently holds this entry
    pub fn is_pinned(&self) -> bool {
        self.current_editor.is_some() || self.locking_snapshot_count > 0
    }
}

/// Published file for `slot` of `key`
pub(crate) fn clean_file(directory: &Path, key: &str, slot: usize) -> PathBuf {
    directory.join(format!("{}.{}", key, slot))
}

/// In-progress file for `slot` of `key`
pub(crate) fn dirty_file(directory: &Path, key: &str, slot: usize) -> PathBuf {
    directory.join(format!("{}.{}.tmp", key, slot))
}

/// Entries keyed by name, ordered from least to most recently used.
#[derive(Debug, Default)]
pub(crate) struct EntryTable {
    entries: HashMap<String, Entry>,
    order: BTreeMap<u64, String>,
    clock: u64,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.entries.get_mut(key)
    }

    /// Fetch `key`, creating it if absent, and mark it most recently used.
    pub fn get_or_insert(&mut self, key: &str, value_count: usize) -> &mut Entry {
        let access = self.tick();
        self.order.insert(access, key.to_string());
        match self.entries.entry(key.to_string()) {
            hash_map::Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                self.order.remove(&entry.access);
                entry.access = access;
                entry
            }
            hash_map::Entry::Vacant(vacant) => vacant.insert(Entry::new(key, value_count, access)),
        }
    }

    /// Mark `key` most recently used.
    pub fn touch(&mut self, key: &str) {
        let access = self.tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.access);
            entry.access = access;
            self.order.insert(access, key.to_string());
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.access);
        Some(entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> Vec<String> {
        self.order.values().cloned().collect()
    }

    /// Entries from least to most recently used
    pub fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.order.values().filter_map(move |key| self.entries.get(key))
    }

    /// Least recently used entry that is not a zombie
    pub fn eldest_evictable(&self) -> Option<&str> {
        self.iter().find(|e| !e.zombie).map(|e| e.key.as_str())
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

// =============================================================================
// Tests
// =============================================================================
