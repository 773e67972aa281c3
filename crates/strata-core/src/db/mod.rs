pub mod batch;
pub mod command;
pub mod flush;
pub mod memory;
pub mod relation;

mod cache;

#[cfg(test)]
mod tests;

use crate::{
    cancel::CancelToken,
    codec::{CodecError, binary},
    config::DatabaseConfig,
    db::{
        batch::Batch,
        cache::{CacheKey, EntityCache},
        command::{
            CommandKind, Connection, ConnectionProvider, DatabaseCommand, GenericSqlDialect,
            ReadWindow, SqlDialect,
        },
        flush::{FlushError, FlushQueue, QueuedAction},
    },
    error::{Error, ErrorClass, ErrorOrigin},
    item::{Item, ItemCollection, ItemError},
    schema::{ConvertContext, ConvertError, Record, Schema, SchemaError, SchemaRegistry, convert},
    value::Value,
};
use std::{
    any::TypeId,
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};
use thiserror::Error as ThisError;

pub use memory::MemoryBackend;
pub use relation::{Ref, Related};

///
/// StoreError
///

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("'{entity}' with identity {identity:?} not found")]
    NotFound {
        entity: &'static str,
        identity: Value,
    },

    #[error("'{entity}' declares no identity field; {operation:?} needs one")]
    NoIdentity {
        entity: &'static str,
        operation: CommandKind,
    },

    #[error("'{entity}' already contains identity {identity:?}")]
    Duplicate {
        entity: &'static str,
        identity: Value,
    },

    #[error("delete-all on '{entity}' is disabled by configuration")]
    DeleteAllDisabled { entity: &'static str },

    #[error("'{entity}' has no field '{field}'")]
    UnknownField {
        entity: &'static str,
        field: String,
    },

    #[error("storage backend error: {message}")]
    Backend { message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Schema(Box<SchemaError>),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Item(#[from] ItemError),

    #[error(transparent)]
    Codec(Box<CodecError>),
}

impl StoreError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::NoIdentity { .. }
            | Self::DeleteAllDisabled { .. }
            | Self::UnknownField { .. }
            | Self::Cancelled => ErrorClass::Usage,
            Self::Duplicate { .. } | Self::Item(_) => ErrorClass::Conflict,
            Self::Backend { .. } => ErrorClass::Internal,
            Self::Schema(_) => ErrorClass::Validation,
            Self::Convert(_) => ErrorClass::Conversion,
            Self::Codec(_) => ErrorClass::Corruption,
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<SchemaError> for StoreError {
    fn from(err: SchemaError) -> Self {
        Self::Schema(Box::new(err))
    }
}

impl From<CodecError> for StoreError {
    fn from(err: CodecError) -> Self {
        Self::Codec(Box::new(err))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::new(err.class(), ErrorOrigin::Store, err.to_string())
    }
}

///
/// Event
///
/// Change notification fired after a mutation lands, batched or not.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventKind {
    Added,
    Updated,
    Removed,
}

#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub entity: &'static str,
    pub identity: Value,
}

pub(crate) type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriberId(u64);

///
/// Database
///
/// The persistence facade: schema-driven CRUD against a pluggable backend,
/// with a prepared-command cache, an entity cache, explicit batches, and a
/// timer-driven delayed flush queue. Cheap to clone; all clones share state.
///

#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
    pub(crate) registry: Arc<SchemaRegistry>,
    pub(crate) provider: Arc<dyn ConnectionProvider>,
    pub(crate) dialect: Arc<dyn SqlDialect>,
    pub(crate) config: DatabaseConfig,
    pub(crate) commands: Mutex<HashMap<(TypeId, CommandKind), Arc<DatabaseCommand>>>,
    pub(crate) cache: EntityCache,
    pub(crate) flush: FlushQueue,
    pub(crate) shutdown: CancelToken,
    subscribers: Mutex<HashMap<SubscriberId, EventCallback>>,
    next_subscriber: AtomicU64,
}

impl DatabaseInner {
    pub(crate) fn emit(&self, event: &Event) {
        let callbacks: Vec<EventCallback> = match self.subscribers.lock() {
            Ok(subscribers) => subscribers.values().cloned().collect(),
            Err(_) => return,
        };

        for callback in callbacks {
            callback(event);
        }
    }

    /// Post-mutation bookkeeping shared by immediate, batched, and flushed
    /// actions: cache invalidation plus the change event.
    pub(crate) fn settle(&self, action: &QueuedAction) {
        match action.kind {
            CommandKind::Update | CommandKind::Delete => {
                if let Some(key) = &action.cache_key {
                    self.cache.invalidate(key);
                }
            }
            CommandKind::DeleteAll => self.cache.invalidate_type(action.type_id),
            _ => {}
        }

        if let Some(event) = action.event() {
            self.emit(&event);
        }
    }
}

impl Database {
    #[must_use]
    pub fn new(
        registry: Arc<SchemaRegistry>,
        provider: Arc<dyn ConnectionProvider>,
        config: DatabaseConfig,
    ) -> Self {
        Self::with_dialect(registry, provider, Arc::new(GenericSqlDialect), config)
    }

    #[must_use]
    pub fn with_dialect(
        registry: Arc<SchemaRegistry>,
        provider: Arc<dyn ConnectionProvider>,
        dialect: Arc<dyn SqlDialect>,
        config: DatabaseConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                registry,
                provider,
                dialect,
                config,
                commands: Mutex::new(HashMap::new()),
                cache: EntityCache::default(),
                flush: FlushQueue::default(),
                shutdown: CancelToken::new(),
                subscribers: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.inner.registry
    }

    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Prepared command for one (entity, kind) pair; built once and cached.
    pub(crate) fn command<T: Record>(
        &self,
        kind: CommandKind,
    ) -> Result<Arc<DatabaseCommand>, StoreError> {
        let key = (TypeId::of::<T>(), kind);

        if let Ok(commands) = self.inner.commands.lock()
            && let Some(command) = commands.get(&key)
        {
            return Ok(Arc::clone(command));
        }

        let schema = self.inner.registry.get::<T>()?;
        let command = Arc::new(DatabaseCommand::build(
            &schema,
            kind,
            self.inner.dialect.as_ref(),
        )?);

        if let Ok(mut commands) = self.inner.commands.lock() {
            commands.entry(key).or_insert_with(|| Arc::clone(&command));
        }

        Ok(command)
    }

    pub(crate) fn connect(&self) -> Result<Box<dyn Connection>, StoreError> {
        self.inner.provider.connect()
    }

    // ------------------------------------------------------------------
    // immediate operations
    // ------------------------------------------------------------------

    /// Create a row; the new entity is published to the cache under its
    /// identity key, with its many-relation fields bound.
    pub fn insert<T: Record>(&self, entity: &T) -> Result<(), StoreError> {
        let action = self.action_insert(entity, false)?;
        let schema = self.inner.registry.get::<T>()?;

        let cached = match action.identity.as_ref() {
            Some(identity) => {
                let mut cached = entity.clone();
                self.bind_relations(&schema, &mut cached, identity)?;
                Some(cached)
            }
            None => None,
        };

        let mut conn = self.connect()?;
        action.apply(conn.as_mut())?;
        self.inner.settle(&action);

        if let (Some(cached), Some(row)) = (cached, action.params.as_ref()) {
            self.publish_row::<T>(&schema, row, &cached);
        }

        Ok(())
    }

    /// Load by identity, cache first. A miss hydrates the cache; a failed
    /// load leaves the cache untouched.
    pub fn select<T: Record>(&self, identity: &Value) -> Result<T, StoreError> {
        let schema = self.inner.registry.get::<T>()?;
        let id_field = schema.identity_field().ok_or(StoreError::NoIdentity {
            entity: schema.name(),
            operation: CommandKind::Select,
        })?;

        let key = CacheKey::new::<T>(id_field.name(), identity.clone());
        if let Some(hit) = self.inner.cache.get::<T>(&key) {
            return Ok((*hit).clone());
        }

        let caching = self.inner.cache.begin_hydration(&key);
        match self.load::<T>(&schema, identity) {
            Ok((entity, aliases)) => {
                if caching {
                    self.inner
                        .cache
                        .complete_hydration(key, aliases, Arc::new(entity.clone()));
                }

                Ok(entity)
            }
            Err(err) => {
                if caching {
                    self.inner.cache.abort_hydration(&key);
                }

                Err(err)
            }
        }
    }

    /// Load by an indexed field value. Alias cache keys are consulted
    /// first; a backend hit is published under its canonical identity key.
    pub fn select_by<T: Record>(&self, field: &str, value: &Value) -> Result<T, StoreError> {
        let schema = self.inner.registry.get::<T>()?;
        let lookup = schema
            .field(field)
            .ok_or_else(|| StoreError::UnknownField {
                entity: schema.name(),
                field: field.to_string(),
            })?;

        let key = CacheKey::new::<T>(lookup.name(), value.clone());
        if let Some(hit) = self.inner.cache.get::<T>(&key) {
            return Ok((*hit).clone());
        }

        let mut params = ItemCollection::new();
        params.add(Item::new(Arc::clone(lookup), value.clone()))?;

        let rows = self.select_rows::<T>(Some(&params))?;
        let row = rows.into_iter().next().ok_or_else(|| StoreError::NotFound {
            entity: schema.name(),
            identity: value.clone(),
        })?;
        let entity = self.materialize::<T>(&schema, &row)?;
        self.publish_row::<T>(&schema, &row, &entity);

        Ok(entity)
    }

    pub fn select_all<T: Record>(&self) -> Result<Vec<T>, StoreError> {
        let schema = self.inner.registry.get::<T>()?;
        let rows = self.select_rows::<T>(None)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let entity = self.materialize::<T>(&schema, row)?;
            self.publish_row::<T>(&schema, row, &entity);
            out.push(entity);
        }

        Ok(out)
    }

    /// One ordered window of a whole entity table.
    pub fn select_range<T: Record>(
        &self,
        offset: u64,
        count: u64,
        order_by: Option<&str>,
        descending: bool,
    ) -> Result<Vec<T>, StoreError> {
        let schema = self.inner.registry.get::<T>()?;

        let mut window = ReadWindow::new(offset, count);
        if let Some(field) = order_by {
            if schema.field(field).is_none() {
                return Err(StoreError::UnknownField {
                    entity: schema.name(),
                    field: field.to_string(),
                });
            }
            window = window.ordered_by(field, descending);
        }

        let rows = self.select_page::<T>(None, window)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let entity = self.materialize::<T>(&schema, row)?;
            self.publish_row::<T>(&schema, row, &entity);
            out.push(entity);
        }

        Ok(out)
    }

    pub fn update<T: Record>(&self, entity: &T) -> Result<(), StoreError> {
        let action = self.action_update(entity, false)?;
        let mut conn = self.connect()?;
        action.apply(conn.as_mut())?;
        self.inner.settle(&action);

        Ok(())
    }

    /// Write only the named columns of an existing row; other columns keep
    /// their stored values.
    pub fn update_fields<T: Record>(
        &self,
        entity: &T,
        fields: &[&str],
    ) -> Result<(), StoreError> {
        let schema = self.inner.registry.get::<T>()?;
        for name in fields {
            if schema.field(name).is_none() {
                return Err(StoreError::UnknownField {
                    entity: schema.name(),
                    field: (*name).to_string(),
                });
            }
        }

        let mut action = self.action_update(entity, false)?;
        if let Some(full) = action.params.take() {
            let mut partial = ItemCollection::new();
            for item in &full {
                if item.field.is_identity() || fields.contains(&item.name()) {
                    partial.add(item.clone())?;
                }
            }
            action.params = Some(partial);
        }

        let mut conn = self.connect()?;
        action.apply(conn.as_mut())?;
        self.inner.settle(&action);

        Ok(())
    }

    pub fn delete<T: Record>(&self, identity: &Value) -> Result<(), StoreError> {
        let action = self.action_delete::<T>(identity.clone(), false)?;
        let mut conn = self.connect()?;
        action.apply(conn.as_mut())?;
        self.inner.settle(&action);

        Ok(())
    }

    /// Delete every row whose `field` equals `value`. Returns the number of
    /// rows removed; zero matches is not an error.
    pub fn delete_by<T: Record>(&self, field: &str, value: &Value) -> Result<u64, StoreError> {
        let schema = self.inner.registry.get::<T>()?;
        let lookup = schema
            .field(field)
            .ok_or_else(|| StoreError::UnknownField {
                entity: schema.name(),
                field: field.to_string(),
            })?;
        let id_field = schema.identity_field().ok_or(StoreError::NoIdentity {
            entity: schema.name(),
            operation: CommandKind::Delete,
        })?;
        let id_name = id_field.name().to_string();

        let mut filter = ItemCollection::new();
        filter.add(Item::new(Arc::clone(lookup), value.clone()))?;

        let rows = self.select_rows::<T>(Some(&filter))?;
        let mut removed = 0;
        for row in rows {
            let Some(identity) = row
                .try_get(&id_name)
                .map(|item| item.value.clone())
                .filter(|v| !v.is_null())
            else {
                continue;
            };
            self.delete::<T>(&identity)?;
            removed += 1;
        }

        Ok(removed)
    }

    /// Whole-table delete; refused unless the configuration allows it.
    pub fn delete_all<T: Record>(&self) -> Result<u64, StoreError> {
        let schema = self.inner.registry.get::<T>()?;
        if !self.inner.config.allow_delete_all {
            return Err(StoreError::DeleteAllDisabled {
                entity: schema.name(),
            });
        }

        let command = self.command::<T>(CommandKind::DeleteAll)?;
        let mut conn = self.connect()?;
        let removed = conn.execute(&command, None)?;
        self.inner.cache.invalidate_type(TypeId::of::<T>());

        Ok(removed)
    }

    pub fn count<T: Record>(&self) -> Result<u64, StoreError> {
        let command = self.command::<T>(CommandKind::Count)?;
        let mut conn = self.connect()?;
        let rows = conn.query(&command, None, None)?;

        rows.first()
            .and_then(|row| row.try_get("count"))
            .and_then(|item| item.value.as_u64())
            .ok_or_else(|| StoreError::Backend {
                message: "count query returned no count row".to_string(),
            })
    }

    /// Drop every cached entity across all types.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    // ------------------------------------------------------------------
    // events
    // ------------------------------------------------------------------

    pub fn subscribe(
        &self,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriberId {
        let id = SubscriberId(self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.insert(id, Arc::new(callback));
        }

        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.remove(&id);
        }
    }

    // ------------------------------------------------------------------
    // batching and delayed flush
    // ------------------------------------------------------------------

    /// Open an explicit batch; its actions apply in one transaction on
    /// commit.
    #[must_use]
    pub fn begin_batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    pub fn queue_insert<T: Record>(
        &self,
        entity: &T,
        break_on_error: bool,
    ) -> Result<(), StoreError> {
        let action = self.action_insert(entity, break_on_error)?;
        flush::enqueue(&self.inner, action);

        Ok(())
    }

    pub fn queue_update<T: Record>(
        &self,
        entity: &T,
        break_on_error: bool,
    ) -> Result<(), StoreError> {
        let action = self.action_update(entity, break_on_error)?;
        flush::enqueue(&self.inner, action);

        Ok(())
    }

    pub fn queue_delete<T: Record>(
        &self,
        identity: Value,
        break_on_error: bool,
    ) -> Result<(), StoreError> {
        let action = self.action_delete::<T>(identity, break_on_error)?;
        flush::enqueue(&self.inner, action);

        Ok(())
    }

    /// Drain the flush queue on the calling thread.
    pub fn flush_now(&self) {
        self.inner.flush_pending();
    }

    #[must_use]
    pub fn pending_flush(&self) -> usize {
        self.inner
            .flush
            .pending
            .lock()
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Errors collected by background flushes since the last call.
    #[must_use]
    pub fn take_flush_errors(&self) -> Vec<FlushError> {
        self.inner
            .flush
            .errors
            .lock()
            .map(|mut errors| std::mem::take(&mut *errors))
            .unwrap_or_default()
    }

    /// Drain pending work, then stop the flush timer and cancel in-flight
    /// cooperative operations.
    pub fn shutdown(&self) {
        self.inner.flush_pending();
        self.inner.shutdown.cancel();
    }

    // ------------------------------------------------------------------
    // internals shared with batch, flush, and relations
    // ------------------------------------------------------------------

    pub(crate) fn action_insert<T: Record>(
        &self,
        entity: &T,
        break_on_error: bool,
    ) -> Result<QueuedAction, StoreError> {
        self.action_write(entity, CommandKind::Insert, break_on_error)
    }

    pub(crate) fn action_update<T: Record>(
        &self,
        entity: &T,
        break_on_error: bool,
    ) -> Result<QueuedAction, StoreError> {
        self.action_write(entity, CommandKind::Update, break_on_error)
    }

    fn action_write<T: Record>(
        &self,
        entity: &T,
        kind: CommandKind,
        break_on_error: bool,
    ) -> Result<QueuedAction, StoreError> {
        let schema = self.inner.registry.get::<T>()?;
        let cx = ConvertContext::new(self.inner.registry.as_ref());

        let items = convert::to_items(&cx, entity)?;
        let flat = binary::ungroup(&self.inner.registry, &schema, &items, &self.inner.shutdown)?;

        let (identity, cache_key) = match schema.identity_field() {
            Some(field) => {
                let value = flat
                    .try_get(field.name())
                    .map_or(Value::Null, |item| item.value.clone());
                if value.is_null() {
                    return Err(StoreError::NoIdentity {
                        entity: schema.name(),
                        operation: kind,
                    });
                }

                let key = CacheKey::new::<T>(field.name(), value.clone());
                (Some(value), Some(key))
            }
            None => (None, None),
        };

        Ok(QueuedAction {
            label: format!("{kind:?} {}({identity:?})", schema.name()),
            entity: schema.name(),
            type_id: TypeId::of::<T>(),
            kind,
            command: self.command::<T>(kind)?,
            params: Some(flat),
            identity,
            cache_key,
            break_on_error,
            can_batch: true,
        })
    }

    pub(crate) fn action_delete<T: Record>(
        &self,
        identity: Value,
        break_on_error: bool,
    ) -> Result<QueuedAction, StoreError> {
        let schema = self.inner.registry.get::<T>()?;
        let id_field = schema.identity_field().ok_or(StoreError::NoIdentity {
            entity: schema.name(),
            operation: CommandKind::Delete,
        })?;

        let mut params = ItemCollection::new();
        params.add(Item::new(Arc::clone(id_field), identity.clone()))?;

        Ok(QueuedAction {
            label: format!("Delete {}({identity:?})", schema.name()),
            entity: schema.name(),
            type_id: TypeId::of::<T>(),
            kind: CommandKind::Delete,
            command: self.command::<T>(CommandKind::Delete)?,
            params: Some(params),
            identity: Some(identity.clone()),
            cache_key: Some(CacheKey::new::<T>(id_field.name(), identity)),
            break_on_error,
            can_batch: true,
        })
    }

    // Backend load by identity, returning the entity plus the alias cache
    // keys read off its indexed fields.
    fn load<T: Record>(
        &self,
        schema: &Schema,
        identity: &Value,
    ) -> Result<(T, Vec<CacheKey>), StoreError> {
        let id_field = schema.identity_field().ok_or(StoreError::NoIdentity {
            entity: schema.name(),
            operation: CommandKind::Select,
        })?;

        let mut params = ItemCollection::new();
        params.add(Item::new(Arc::clone(id_field), identity.clone()))?;

        let command = self.command::<T>(CommandKind::Select)?;
        let mut conn = self.connect()?;
        let rows = conn.query(&command, Some(&params), None)?;
        let row = rows.into_iter().next().ok_or_else(|| StoreError::NotFound {
            entity: schema.name(),
            identity: identity.clone(),
        })?;

        let structured =
            binary::group(&self.inner.registry, schema, &row, &self.inner.shutdown)?;
        let entity = self.materialize::<T>(schema, &structured)?;

        Ok((entity, alias_keys::<T>(schema, &structured)))
    }

    /// Windowed, optionally filtered read returning structured rows.
    pub(crate) fn select_rows<T: Record>(
        &self,
        filter: Option<&ItemCollection>,
    ) -> Result<Vec<ItemCollection>, StoreError> {
        let schema = self.inner.registry.get::<T>()?;
        let command = self.command::<T>(CommandKind::SelectAll)?;
        let page = self.inner.config.page_size;
        let mut conn = self.connect()?;

        let mut out = Vec::new();
        let mut offset = 0;
        loop {
            let rows = conn.query(
                &command,
                filter,
                Some(ReadWindow::new(offset, page)),
            )?;
            let fetched = rows.len() as u64;

            for row in rows {
                out.push(binary::group(
                    &self.inner.registry,
                    &schema,
                    &row,
                    &self.inner.shutdown,
                )?);
            }

            if fetched < page {
                break;
            }
            offset += page;
        }

        Ok(out)
    }

    /// One windowed page of structured rows; used by paged relation
    /// iteration.
    pub(crate) fn select_page<T: Record>(
        &self,
        filter: Option<&ItemCollection>,
        window: ReadWindow,
    ) -> Result<Vec<ItemCollection>, StoreError> {
        let schema = self.inner.registry.get::<T>()?;
        let command = self.command::<T>(CommandKind::SelectAll)?;
        let mut conn = self.connect()?;

        let rows = conn.query(&command, filter, Some(window))?;
        rows.into_iter()
            .map(|row| {
                binary::group(&self.inner.registry, &schema, &row, &self.inner.shutdown)
                    .map_err(StoreError::from)
            })
            .collect()
    }

    /// Rebuild an entity from a structured row and bind its many-relation
    /// fields to the owner identity.
    pub(crate) fn materialize<T: Record>(
        &self,
        schema: &Schema,
        items: &ItemCollection,
    ) -> Result<T, StoreError> {
        let cx = ConvertContext::new(self.inner.registry.as_ref());
        let mut entity: T = convert::from_items(&cx, items)?;

        if let Some(id_field) = schema.identity_field() {
            let owner = items
                .try_get(id_field.name())
                .map_or(Value::Null, |item| item.value.clone());
            self.bind_relations(schema, &mut entity, &owner)?;
        }

        Ok(entity)
    }

    fn bind_relations<T: Record>(
        &self,
        schema: &Schema,
        entity: &mut T,
        owner: &Value,
    ) -> Result<(), StoreError> {
        let cx = ConvertContext::new(self.inner.registry.as_ref());
        for field in schema.fields().iter().filter(|f| f.is_relation_many()) {
            if let Some(accessor) = field.accessor() {
                accessor.set(entity, &cx, owner.clone())?;
            }
        }

        Ok(())
    }

    // Publish a freshly created or materialized entity under its identity
    // key; indexed fields on the row become alias keys.
    fn publish_row<T: Record>(&self, schema: &Schema, row: &ItemCollection, entity: &T) {
        let Some(id_field) = schema.identity_field() else {
            return;
        };
        let Some(identity) = row
            .try_get(id_field.name())
            .map(|item| item.value.clone())
            .filter(|v| !v.is_null())
        else {
            return;
        };

        let canonical = CacheKey::new::<T>(id_field.name(), identity);
        if self.inner.cache.begin_hydration(&canonical) {
            let aliases = alias_keys::<T>(schema, row);
            self.inner
                .cache
                .complete_hydration(canonical, aliases, Arc::new(entity.clone()));
        }
    }

    /// Identity value read off an instance.
    pub(crate) fn identity_of<T: Record>(&self, entity: &T) -> Result<Value, StoreError> {
        let schema = self.inner.registry.get::<T>()?;
        let cx = ConvertContext::new(self.inner.registry.as_ref());

        schema
            .identity_value(&cx, entity)?
            .ok_or(StoreError::NoIdentity {
                entity: schema.name(),
                operation: CommandKind::Select,
            })
    }
}

// Alias cache keys read off a structured row's indexed, non-identity
// fields. Null values never key an alias.
fn alias_keys<T: Record>(schema: &Schema, structured: &ItemCollection) -> Vec<CacheKey> {
    schema
        .index_fields()
        .filter(|f| !f.is_identity())
        .filter_map(|f| {
            structured
                .try_get(f.name())
                .filter(|item| !item.value.is_null())
                .map(|item| CacheKey::new::<T>(f.name(), item.value.clone()))
        })
        .collect()
}
