use crate::{
    db::{Database, StoreError, command::ReadWindow},
    item::{Item, ItemCollection},
    schema::{Field, Record},
    value::Value,
};
use std::{collections::BTreeMap, fmt, sync::Arc};

///
/// Related
///
/// A lazily-loaded many-relation: the rows of `T` whose foreign-key field
/// matches the owning entity's identity. Never serialized; the schema binds
/// the owner identity when the owning entity is materialized.
///
/// Two read modes:
/// - `load` pulls the whole relation into a local identity-keyed map for
///   random access and iteration.
/// - `next_page` streams windowed pages without retaining them; the cursor
///   is forward-only until `restart`.
///
/// `add` and `remove` write through to the backend and keep the local map
/// coherent when one is loaded.
///

pub struct Related<T: Record> {
    foreign_key: &'static str,
    owner: Option<Value>,
    loaded: Option<BTreeMap<Value, T>>,
    cursor: u64,
    exhausted: bool,
}

impl<T: Record> Related<T> {
    #[must_use]
    pub const fn new(foreign_key: &'static str) -> Self {
        Self {
            foreign_key,
            owner: None,
            loaded: None,
            cursor: 0,
            exhausted: false,
        }
    }

    /// Attach to an owner identity; called by the schema at materialization.
    /// Resets any loaded state from a previous owner.
    pub fn bind(&mut self, owner: Value) {
        self.owner = if owner.is_null() { None } else { Some(owner) };
        self.loaded = None;
        self.cursor = 0;
        self.exhausted = false;
    }

    #[must_use]
    pub const fn owner(&self) -> Option<&Value> {
        self.owner.as_ref()
    }

    #[must_use]
    pub const fn foreign_key(&self) -> &'static str {
        self.foreign_key
    }

    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.loaded.as_ref().map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filter(&self, db: &Database) -> Result<ItemCollection, StoreError> {
        let owner = self.owner.clone().ok_or(StoreError::Backend {
            message: "relation is not bound to an owner".to_string(),
        })?;

        let schema = db.registry().get::<T>()?;
        let field = schema
            .field(self.foreign_key)
            .map_or_else(
                || Arc::new(Field::bare(self.foreign_key, owner.kind())),
                Arc::clone,
            );

        let mut params = ItemCollection::new();
        params.add(Item::new(field, owner))?;

        Ok(params)
    }

    /// Bulk mode: fetch every related row into the local identity-keyed map.
    /// Returns the number of rows loaded.
    pub fn load(&mut self, db: &Database) -> Result<usize, StoreError> {
        let schema = db.registry().get::<T>()?;
        let params = self.filter(db)?;
        let rows = db.select_rows::<T>(Some(&params))?;

        let mut map = BTreeMap::new();
        for row in &rows {
            let entity = db.materialize::<T>(&schema, row)?;
            let identity = db.identity_of(&entity)?;
            map.insert(identity, entity);
        }

        let count = map.len();
        self.loaded = Some(map);

        Ok(count)
    }

    #[must_use]
    pub fn get(&self, identity: &Value) -> Option<&T> {
        self.loaded.as_ref()?.get(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.loaded.iter().flat_map(BTreeMap::values)
    }

    /// Paged mode: the next window of related rows. Returns an empty page
    /// once exhausted; `restart` rewinds the cursor.
    pub fn next_page(&mut self, db: &Database) -> Result<Vec<T>, StoreError> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let schema = db.registry().get::<T>()?;
        let params = self.filter(db)?;
        let limit = db.config().page_size;

        let rows = db.select_page::<T>(Some(&params), ReadWindow::new(self.cursor, limit))?;

        if (rows.len() as u64) < limit {
            self.exhausted = true;
        }
        self.cursor += rows.len() as u64;

        rows.iter()
            .map(|row| db.materialize::<T>(&schema, row))
            .collect()
    }

    pub const fn restart(&mut self) {
        self.cursor = 0;
        self.exhausted = false;
    }

    /// Write-through insert: persists the entity and, when the relation is
    /// loaded, mirrors it into the local map.
    pub fn add(&mut self, db: &Database, entity: &T) -> Result<(), StoreError> {
        db.insert(entity)?;

        if let Some(map) = &mut self.loaded {
            let identity = db.identity_of(entity)?;
            map.insert(identity, entity.clone());
        }

        Ok(())
    }

    /// Write-through delete by identity.
    pub fn remove(&mut self, db: &Database, identity: &Value) -> Result<(), StoreError> {
        db.delete::<T>(identity)?;

        if let Some(map) = &mut self.loaded {
            map.remove(identity);
        }

        Ok(())
    }
}

impl<T: Record> Clone for Related<T> {
    fn clone(&self) -> Self {
        Self {
            foreign_key: self.foreign_key,
            owner: self.owner.clone(),
            loaded: self.loaded.clone(),
            cursor: self.cursor,
            exhausted: self.exhausted,
        }
    }
}

impl<T: Record> fmt::Debug for Related<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Related")
            .field("foreign_key", &self.foreign_key)
            .field("owner", &self.owner)
            .field("loaded", &self.loaded.as_ref().map(BTreeMap::len))
            .finish_non_exhaustive()
    }
}

///
/// Ref
///
/// A lazily-resolved single relation. The wire carries only the target
/// identity; the first `resolve` fetches the entity and caches it on this
/// handle.
///

pub struct Ref<T: Record> {
    target: Option<Value>,
    cached: Option<T>,
}

impl<T: Record> Ref<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            target: None,
            cached: None,
        }
    }

    /// Point at a target identity, dropping any cached entity.
    pub fn set_identity(&mut self, identity: Option<Value>) {
        self.target = identity.filter(|v| !v.is_null());
        self.cached = None;
    }

    #[must_use]
    pub const fn identity(&self) -> Option<&Value> {
        self.target.as_ref()
    }

    /// Resolve the target through the facade, caching the result.
    pub fn resolve(&mut self, db: &Database) -> Result<Option<&T>, StoreError> {
        let Some(target) = &self.target else {
            return Ok(None);
        };

        if self.cached.is_none() {
            self.cached = Some(db.select::<T>(target)?);
        }

        Ok(self.cached.as_ref())
    }

    /// Drop the cached entity so the next `resolve` re-fetches.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

impl<T: Record> Default for Ref<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            cached: self.cached.clone(),
        }
    }
}

impl<T: Record> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("target", &self.target)
            .field("resolved", &self.cached.is_some())
            .finish_non_exhaustive()
    }
}
