use crate::schema::{
    Schema, SchemaError,
    builder::{DescribeFn, Record, SchemaBuilder},
    convert::Converter,
};
use std::{
    any::{Any, TypeId},
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
};
use tracing::{debug, warn};

///
/// DeriveState
///
/// Per-call derivation tracking. Types currently being derived further up
/// the same call stack are provisionally registered here; a re-entrant
/// request for one of them returns without recursing, and validation
/// finalizes only after the initial build completes.
///

#[derive(Default)]
pub(crate) struct DeriveState {
    in_flight: HashSet<TypeId>,
}

///
/// SchemaRegistry
///
/// Derives and caches one `Schema` per type. First access derives through
/// the type's `Record::describe` (or a registered override strategy),
/// validates, and publishes; concurrent first access races are resolved
/// first-wins so every caller observes the same published instance.
/// Validation failures are recorded and replayed — schemas are derived
/// once and must be correct.
///

pub struct SchemaRegistry {
    cache: RwLock<HashMap<TypeId, Arc<Schema>>>,
    failed: RwLock<HashMap<TypeId, SchemaError>>,
    overrides: RwLock<HashMap<TypeId, HashMap<String, Vec<Converter>>>>,
    describers: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            failed: RwLock::new(HashMap::new()),
            overrides: RwLock::new(HashMap::new()),
            describers: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the schema for `T`, deriving it on first access.
    /// Idempotent and thread-safe; every caller sees the same instance.
    pub fn get<T: Record>(&self) -> Result<Arc<Schema>, SchemaError> {
        let type_id = TypeId::of::<T>();

        if let Some(schema) = self.lookup(type_id) {
            return Ok(schema);
        }
        if let Some(err) = self.lookup_failed(type_id) {
            return Err(err);
        }

        let mut state = DeriveState::default();
        self.derive_in::<T>(&mut state)?;

        self.lookup(type_id).ok_or_else(|| SchemaError::Internal {
            schema: T::NAME.to_string(),
            message: "derivation finished without publishing".to_string(),
        })
    }

    /// Resolve a schema that must already be published.
    #[must_use]
    pub fn lookup(&self, type_id: TypeId) -> Option<Arc<Schema>> {
        self.cache
            .read()
            .ok()?
            .get(&type_id)
            .cloned()
    }

    /// Register a describe strategy override for `T`. Must happen before
    /// the schema is first derived; a published schema is never changed.
    pub fn register_describer<T: Record>(&self, describe: DescribeFn<T>) {
        let type_id = TypeId::of::<T>();
        if self.lookup(type_id).is_some() {
            warn!(
                schema = T::NAME,
                "describer registered after schema publication; ignored"
            );
            return;
        }

        if let Ok(mut describers) = self.describers.write() {
            describers.insert(type_id, Box::new(describe));
        }
    }

    /// Register a converter-chain override for one (type, field) pair.
    /// Must happen before the schema is first derived.
    pub fn register_converters<T: Record>(&self, field: &'static str, chain: Vec<Converter>) {
        let type_id = TypeId::of::<T>();
        if self.lookup(type_id).is_some() {
            warn!(
                schema = T::NAME,
                field, "converter override registered after schema publication; ignored"
            );
            return;
        }

        if let Ok(mut overrides) = self.overrides.write() {
            overrides
                .entry(type_id)
                .or_default()
                .insert(field.to_string(), chain);
        }
    }

    pub(crate) fn overrides_for(&self, type_id: TypeId) -> Option<HashMap<String, Vec<Converter>>> {
        self.overrides.read().ok()?.get(&type_id).cloned()
    }

    // Derive `T` within an in-flight derivation scope. Inner schemas are
    // derived eagerly through the same scope; a re-entrant request for an
    // in-flight type is the provisional path and returns immediately.
    pub(crate) fn derive_in<T: Record>(&self, state: &mut DeriveState) -> Result<(), SchemaError> {
        let type_id = TypeId::of::<T>();

        if self.lookup(type_id).is_some() || state.in_flight.contains(&type_id) {
            return Ok(());
        }
        if let Some(err) = self.lookup_failed(type_id) {
            return Err(err);
        }

        state.in_flight.insert(type_id);
        let result = self.build_schema::<T>(state);
        state.in_flight.remove(&type_id);

        match result {
            Ok(schema) => {
                let mut cache = self
                    .cache
                    .write()
                    .map_err(|_| Self::poisoned(T::NAME))?;
                // first derivation wins; losers observe the published entry
                cache.entry(type_id).or_insert_with(|| {
                    debug!(schema = T::NAME, "schema derived");
                    Arc::new(schema)
                });

                Ok(())
            }
            Err(err) => {
                warn!(schema = T::NAME, error = %err, "schema validation failed");
                if let Ok(mut failed) = self.failed.write() {
                    failed.entry(type_id).or_insert_with(|| err.clone());
                }

                Err(err)
            }
        }
    }

    fn build_schema<T: Record>(&self, state: &mut DeriveState) -> Result<Schema, SchemaError> {
        let describe = self.describer_for::<T>();

        let mut builder = SchemaBuilder::<T>::new(self, state);
        match describe {
            Some(custom) => custom(&mut builder),
            None => T::describe(&mut builder),
        }

        builder.finish()
    }

    fn describer_for<T: Record>(&self) -> Option<DescribeFn<T>> {
        self.describers
            .read()
            .ok()?
            .get(&TypeId::of::<T>())
            .and_then(|erased| erased.downcast_ref::<DescribeFn<T>>())
            .copied()
    }

    fn lookup_failed(&self, type_id: TypeId) -> Option<SchemaError> {
        self.failed.read().ok()?.get(&type_id).cloned()
    }

    fn poisoned(schema: &str) -> SchemaError {
        SchemaError::Internal {
            schema: schema.to_string(),
            message: "registry lock poisoned".to_string(),
        }
    }
}
