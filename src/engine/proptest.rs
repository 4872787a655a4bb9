//! Property-Based Tests for the Cache Engine
//!
//! Drives the engine with random operation sequences and checks it against
//! a plain map model.
//!
//! # Test Properties
//!
//! 1. **Model Agreement**: committed values read back exactly; removed keys miss
//! 2. **Size Accounting**: `size()` equals the sum of the model's value lengths
//! 3. **Durability**: a reopened cache holds the same entries
//! 4. **Bounded Size**: after `flush`, `size() <= max_size`

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use super::{DiskLruCache, DiskLruCacheConfig, ManualDispatcher};
use crate::fs::StdFileSystem;

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Set(String, Vec<u8>, Vec<u8>),
    Update(String, Vec<u8>),
    Remove(String),
    Get(String),
}

/// Small key space so operations collide often.
fn key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(str::to_string)
}

fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (key_strategy(), value_strategy(), value_strategy())
            .prop_map(|(k, a, b)| Op::Set(k, a, b)),
        1 => (key_strategy(), value_strategy()).prop_map(|(k, a)| Op::Update(k, a)),
        1 => key_strategy().prop_map(Op::Remove),
        2 => key_strategy().prop_map(Op::Get),
    ]
}

fn open(dir: &std::path::Path, max_size: u64) -> DiskLruCache {
    let config = DiskLruCacheConfig::new(dir, max_size);
    DiskLruCache::new(
        config,
        Arc::new(StdFileSystem::new()),
        Arc::new(ManualDispatcher::new()),
    )
    .unwrap()
}

type Model = HashMap<String, (Vec<u8>, Vec<u8>)>;

fn apply(cache: &DiskLruCache, model: &mut Model, op: &Op) -> Result<(), TestCaseError> {
    match op {
        Op::Set(key, a, b) => {
            let mut editor = cache.edit(key)?.expect("no competing handles");
            editor.write(0, a)?;
            editor.write(1, b)?;
            editor.commit()?;
            model.insert(key.clone(), (a.clone(), b.clone()));
        }
        Op::Update(key, a) => {
            let mut editor = cache.edit(key)?.expect("no competing handles");
            editor.write(0, a)?;
            editor.commit()?;
            let old_b = model.get(key).map(|(_, b)| b.clone()).unwrap_or_default();
            model.insert(key.clone(), (a.clone(), old_b));
        }
        Op::Remove(key) => {
            let removed = cache.remove(key)?;
            prop_assert_eq!(removed, model.remove(key).is_some());
        }
        Op::Get(key) => check_key(cache, model, key)?,
    }
    Ok(())
}

fn check_key(cache: &DiskLruCache, model: &Model, key: &str) -> Result<(), TestCaseError> {
    let snapshot = cache.get(key)?;
    match (snapshot, model.get(key)) {
        (Some(snapshot), Some((a, b))) => {
            prop_assert_eq!(&snapshot.read(0)?[..], &a[..]);
            prop_assert_eq!(&snapshot.read(1)?[..], &b[..]);
        }
        (None, None) => {}
        (found, expected) => {
            return Err(TestCaseError::fail(format!(
                "key {}: cache has entry = {}, model has entry = {}",
                key,
                found.is_some(),
                expected.is_some()
            )))
        }
    }
    Ok(())
}

fn model_size(model: &Model) -> u64 {
    model
        .values()
        .map(|(a, b)| (a.len() + b.len()) as u64)
        .sum()
}

// =============================================================================
// Model Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: Without eviction pressure the cache behaves like a map.
    #[test]
    fn prop_matches_model(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let dir = tempfile::tempdir()?;
        let cache = open(dir.path(), u64::MAX);
        let mut model = Model::new();

        for op in &ops {
            apply(&cache, &mut model, op)?;
            prop_assert_eq!(cache.size()?, model_size(&model));
        }
        for key in ["a", "b", "c", "d", "e"] {
            check_key(&cache, &model, key)?;
        }
    }

    /// Property: Closing and reopening preserves every committed entry.
    #[test]
    fn prop_reopen_preserves_entries(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let dir = tempfile::tempdir()?;
        let mut model = Model::new();
        {
            let cache = open(dir.path(), u64::MAX);
            for op in &ops {
                apply(&cache, &mut model, op)?;
            }
            cache.close()?;
        }

        let reopened = open(dir.path(), u64::MAX);
        prop_assert_eq!(reopened.size()?, model_size(&model));
        for key in ["a", "b", "c", "d", "e"] {
            check_key(&reopened, &model, key)?;
        }
    }
}

// =============================================================================
// Eviction Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: Flush always brings the cache within budget.
    #[test]
    fn prop_flush_respects_budget(
        max_size in 1u64..200,
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let dir = tempfile::tempdir()?;
        let cache = open(dir.path(), max_size);

        for op in &ops {
            if let Op::Set(key, a, b) = op {
                if let Some(mut editor) = cache.edit(key)? {
                    editor.write(0, a)?;
                    editor.write(1, b)?;
                    editor.commit()?;
                }
            }
            cache.flush()?;
            prop_assert!(cache.size()? <= max_size);
        }
    }
}
