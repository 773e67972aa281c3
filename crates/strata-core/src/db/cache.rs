use crate::value::Value;
use std::{
    any::{Any, TypeId},
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

///
/// CacheKey
///
/// (entity type, field, value). The identity field produces the canonical
/// key; other indexed fields produce alias keys pointing at it.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) struct CacheKey {
    type_id: TypeId,
    field: String,
    value: Value,
}

impl CacheKey {
    pub(crate) fn new<T: 'static>(field: &str, value: Value) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            field: field.to_string(),
            value,
        }
    }
}

///
/// EntityCache
///
/// Identity-keyed entity cache with alias lookup on indexed fields. One
/// coarse lock; entries are `Arc`s so hits hand back shared snapshots.
///
/// Hydration protocol: a miss marks the canonical key in-flight before
/// loading, so a converter that re-enters the cache during materialization
/// reads through instead of deadlocking on its own load. A failed load
/// rolls the marker back and leaves no entry behind.
///

#[derive(Default)]
pub(crate) struct EntityCache {
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    canonical: HashMap<CacheKey, Arc<dyn Any + Send + Sync>>,
    aliases: HashMap<CacheKey, CacheKey>,
    // canonical key -> its alias keys, for invalidation
    links: HashMap<CacheKey, Vec<CacheKey>>,
    hydrating: HashSet<CacheKey>,
}

impl EntityCache {
    pub(crate) fn get<T: Send + Sync + 'static>(&self, key: &CacheKey) -> Option<Arc<T>> {
        let state = self.state.lock().ok()?;

        let canonical = state.aliases.get(key).unwrap_or(key);
        let entry = state.canonical.get(canonical)?;
        Arc::clone(entry).downcast::<T>().ok()
    }

    /// Mark a canonical key as loading. Returns false when the same key is
    /// already mid-hydration; the caller then loads without caching.
    pub(crate) fn begin_hydration(&self, key: &CacheKey) -> bool {
        self.state
            .lock()
            .map(|mut state| state.hydrating.insert(key.clone()))
            .unwrap_or(false)
    }

    /// Roll back a failed load; the key vanishes as if never requested.
    pub(crate) fn abort_hydration(&self, key: &CacheKey) {
        if let Ok(mut state) = self.state.lock() {
            state.hydrating.remove(key);
        }
    }

    /// Publish a loaded entity under its canonical key and alias keys.
    pub(crate) fn complete_hydration(
        &self,
        key: CacheKey,
        aliases: Vec<CacheKey>,
        entry: Arc<dyn Any + Send + Sync>,
    ) {
        if let Ok(mut state) = self.state.lock() {
            state.hydrating.remove(&key);
            for alias in &aliases {
                state.aliases.insert(alias.clone(), key.clone());
            }
            state.links.insert(key.clone(), aliases);
            state.canonical.insert(key, entry);
        }
    }

    /// Drop the entry and every alias pointing at it.
    pub(crate) fn invalidate(&self, key: &CacheKey) {
        if let Ok(mut state) = self.state.lock() {
            state.canonical.remove(key);
            if let Some(aliases) = state.links.remove(key) {
                for alias in aliases {
                    state.aliases.remove(&alias);
                }
            }
        }
    }

    /// Drop every entry of one entity type.
    pub(crate) fn invalidate_type(&self, type_id: TypeId) {
        if let Ok(mut state) = self.state.lock() {
            state.canonical.retain(|k, _| k.type_id != type_id);
            state.aliases.retain(|k, _| k.type_id != type_id);
            state.links.retain(|k, _| k.type_id != type_id);
        }
    }

    /// Drop every cached entry across all types.
    pub(crate) fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.canonical.clear();
            state.aliases.clear();
            state.links.clear();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().map(|s| s.canonical.len()).unwrap_or(0)
    }
}
