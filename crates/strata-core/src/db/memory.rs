use crate::{
    db::{
        StoreError,
        command::{CommandKind, Connection, ConnectionProvider, DatabaseCommand, ReadWindow},
    },
    item::{Item, ItemCollection},
    schema::Field,
    value::{Value, ValueKind},
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
};

type Tables = HashMap<String, BTreeMap<Value, ItemCollection>>;

///
/// MemoryBackend
///
/// In-process storage backend: one ordered map of rows per entity, keyed by
/// identity. Transactions snapshot the whole store and restore it on
/// rollback. Intended for tests and embedded use; it ignores statement text
/// and acts on command metadata.
///

#[derive(Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<Mutex<Tables>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write against `entity` fail until cleared. Test hook for
    /// exercising rollback and flush-error paths.
    pub fn fail_writes(&self, entity: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(entity.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    /// Row count for one entity, bypassing the command layer.
    #[must_use]
    pub fn raw_len(&self, entity: &str) -> usize {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.get(entity).map(BTreeMap::len))
            .unwrap_or(0)
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Backend {
            message: "memory store lock poisoned".to_string(),
        })
    }
}

impl ConnectionProvider for MemoryBackend {
    fn connect(&self) -> Result<Box<dyn Connection>, StoreError> {
        Ok(Box::new(MemoryConnection {
            backend: self.clone(),
            snapshot: None,
        }))
    }
}

struct MemoryConnection {
    backend: MemoryBackend,
    snapshot: Option<Tables>,
}

impl MemoryConnection {
    fn check_failpoint(&self, entity: &str) -> Result<(), StoreError> {
        let failing = self
            .backend
            .failing
            .lock()
            .map(|f| f.contains(entity))
            .unwrap_or(false);

        if failing {
            return Err(StoreError::Backend {
                message: format!("injected write failure for '{entity}'"),
            });
        }

        Ok(())
    }

    fn identity_of(
        command: &DatabaseCommand,
        params: &ItemCollection,
    ) -> Result<Value, StoreError> {
        let id_name = command.identity().ok_or(StoreError::NoIdentity {
            entity: command.entity(),
            operation: command.kind(),
        })?;

        params
            .try_get(id_name)
            .map(|item| item.value.clone())
            .filter(|v| !v.is_null())
            .ok_or_else(|| StoreError::Backend {
                message: format!(
                    "row for '{}' carries no identity value",
                    command.entity()
                ),
            })
    }

    fn require_params<'a>(
        command: &DatabaseCommand,
        params: Option<&'a ItemCollection>,
    ) -> Result<&'a ItemCollection, StoreError> {
        params.ok_or_else(|| StoreError::Backend {
            message: format!(
                "{:?} on '{}' requires a parameter row",
                command.kind(),
                command.entity()
            ),
        })
    }
}

impl Connection for MemoryConnection {
    fn execute(
        &mut self,
        command: &DatabaseCommand,
        params: Option<&ItemCollection>,
    ) -> Result<u64, StoreError> {
        self.check_failpoint(command.entity())?;
        let mut tables = self.backend.locked()?;
        let table = tables.entry(command.entity().to_string()).or_default();

        match command.kind() {
            CommandKind::Insert => {
                let row = Self::require_params(command, params)?;
                let identity = Self::identity_of(command, row)?;

                if table.contains_key(&identity) {
                    return Err(StoreError::Duplicate {
                        entity: command.entity(),
                        identity,
                    });
                }
                table.insert(identity, row.clone());

                Ok(1)
            }
            CommandKind::Update => {
                let row = Self::require_params(command, params)?;
                let identity = Self::identity_of(command, row)?;

                // merge item by item so partial rows update only the
                // columns they carry
                match table.get_mut(&identity) {
                    Some(existing) => {
                        for item in row {
                            if existing.set_value(item.name(), item.value.clone()).is_err() {
                                existing.add(item.clone())?;
                            }
                        }
                        Ok(1)
                    }
                    None => Ok(0),
                }
            }
            CommandKind::Delete => {
                let row = Self::require_params(command, params)?;
                let identity = Self::identity_of(command, row)?;

                Ok(u64::from(table.remove(&identity).is_some()))
            }
            CommandKind::DeleteAll => {
                let removed = table.len() as u64;
                table.clear();

                Ok(removed)
            }
            kind => Err(StoreError::Backend {
                message: format!("{kind:?} is not a mutating command"),
            }),
        }
    }

    fn query(
        &mut self,
        command: &DatabaseCommand,
        params: Option<&ItemCollection>,
        window: Option<ReadWindow>,
    ) -> Result<Vec<ItemCollection>, StoreError> {
        let tables = self.backend.locked()?;
        let empty = BTreeMap::new();
        let table = tables.get(command.entity()).unwrap_or(&empty);

        let matches = |row: &ItemCollection| {
            params.is_none_or(|filter| {
                filter
                    .iter()
                    .all(|item| row.try_get(item.name()).map(|r| &r.value) == Some(&item.value))
            })
        };

        match command.kind() {
            CommandKind::Count => {
                let count = table.values().filter(|r| matches(r)).count() as u64;
                let mut row = ItemCollection::new();
                row.add(Item::new(
                    Arc::new(Field::bare("count", ValueKind::U64)),
                    Value::U64(count),
                ))?;

                Ok(vec![row])
            }
            CommandKind::Select | CommandKind::SelectAll => {
                let mut rows: Vec<ItemCollection> =
                    table.values().filter(|r| matches(r)).cloned().collect();

                if let Some(window) = window {
                    if let Some(order_by) = &window.order_by {
                        rows.sort_by(|a, b| {
                            let left = a.try_get(order_by).map(|item| &item.value);
                            let right = b.try_get(order_by).map(|item| &item.value);
                            left.cmp(&right)
                        });
                        if window.descending {
                            rows.reverse();
                        }
                    }

                    rows = rows
                        .into_iter()
                        .skip(window.offset as usize)
                        .take(window.limit as usize)
                        .collect();
                }

                Ok(rows)
            }
            kind => Err(StoreError::Backend {
                message: format!("{kind:?} is not a reading command"),
            }),
        }
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::Backend {
                message: "transaction already open".to_string(),
            });
        }
        self.snapshot = Some(self.backend.locked()?.clone());

        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.snapshot.take().is_none() {
            return Err(StoreError::Backend {
                message: "commit without an open transaction".to_string(),
            });
        }

        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let snapshot = self.snapshot.take().ok_or_else(|| StoreError::Backend {
            message: "rollback without an open transaction".to_string(),
        })?;
        *self.backend.locked()? = snapshot;

        Ok(())
    }
}
