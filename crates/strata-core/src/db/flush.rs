use crate::{
    db::{
        DatabaseInner, Event, EventKind, StoreError,
        cache::CacheKey,
        command::{CommandKind, Connection, DatabaseCommand},
    },
    item::ItemCollection,
    value::Value,
};
use std::{
    any::TypeId,
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};
use thiserror::Error as ThisError;
use tracing::{debug, warn};

///
/// QueuedAction
///
/// One deferred mutation: the prepared command, its bound row or parameters,
/// and the flags controlling batched application.
///

#[derive(Clone)]
pub(crate) struct QueuedAction {
    pub(crate) label: String,
    pub(crate) entity: &'static str,
    pub(crate) type_id: TypeId,
    pub(crate) kind: CommandKind,
    pub(crate) command: Arc<DatabaseCommand>,
    pub(crate) params: Option<ItemCollection>,
    pub(crate) identity: Option<Value>,
    pub(crate) cache_key: Option<CacheKey>,
    /// A failure in this action aborts the transaction it runs in and
    /// abandons the rest of its chunk.
    pub(crate) break_on_error: bool,
    /// Whether this action may share a transaction with its neighbours.
    pub(crate) can_batch: bool,
}

impl QueuedAction {
    /// Apply against a live connection. Update and delete misses surface as
    /// `NotFound` rather than silent zero-row successes.
    pub(crate) fn apply(&self, conn: &mut dyn Connection) -> Result<u64, StoreError> {
        let affected = conn.execute(&self.command, self.params.as_ref())?;

        if affected == 0 && matches!(self.kind, CommandKind::Update | CommandKind::Delete) {
            return Err(StoreError::NotFound {
                entity: self.entity,
                identity: self.identity.clone().unwrap_or(Value::Null),
            });
        }

        Ok(affected)
    }

    pub(crate) fn event(&self) -> Option<Event> {
        let kind = match self.kind {
            CommandKind::Insert => EventKind::Added,
            CommandKind::Update => EventKind::Updated,
            CommandKind::Delete => EventKind::Removed,
            _ => return None,
        };

        Some(Event {
            kind,
            entity: self.entity,
            identity: self.identity.clone()?,
        })
    }
}

///
/// FlushError
///
/// One failed or abandoned delayed action, kept for the host to collect.
///

#[derive(Debug, ThisError)]
#[error("flush action '{label}' on '{entity}' failed: {source}")]
pub struct FlushError {
    pub label: String,
    pub entity: &'static str,
    pub source: StoreError,
}

///
/// FlushQueue
///
/// Pending delayed actions plus the worker coordination flags. The timer
/// thread is spawned lazily on first enqueue and exits once the queue
/// drains; `in_flight` keeps concurrent sweeps from interleaving.
///

#[derive(Default)]
pub(crate) struct FlushQueue {
    pub(crate) pending: Mutex<VecDeque<QueuedAction>>,
    pub(crate) in_flight: AtomicBool,
    pub(crate) timer_running: AtomicBool,
    pub(crate) errors: Mutex<Vec<FlushError>>,
}

/// Queue a delayed action and make sure the timer is ticking.
pub(crate) fn enqueue(inner: &Arc<DatabaseInner>, action: QueuedAction) {
    match inner.flush.pending.lock() {
        Ok(mut pending) => pending.push_back(action),
        Err(_) => {
            warn!(
                action = %action.label,
                entity = action.entity,
                "flush queue lock poisoned; dropping queued action"
            );

            return;
        }
    }

    ensure_timer(inner);
}

impl DatabaseInner {
    /// Drain the queue in chunks of at most `flush_chunk_size` actions.
    /// Re-entrant calls return immediately.
    pub(crate) fn flush_pending(&self) {
        if self.flush.in_flight.swap(true, Ordering::AcqRel) {
            return;
        }

        loop {
            let chunk: Vec<QueuedAction> = {
                let Ok(mut pending) = self.flush.pending.lock() else {
                    break;
                };
                let take = self.config.flush_chunk_size.min(pending.len());
                pending.drain(..take).collect()
            };

            if chunk.is_empty() {
                break;
            }
            self.flush_chunk(chunk);
        }

        self.flush.in_flight.store(false, Ordering::Release);
    }

    // One chunk is one transaction when every action allows batching. On a
    // transaction failure the chunk is replayed individually so one bad
    // action does not sink its neighbours, unless that action carries
    // break_on_error.
    fn flush_chunk(&self, chunk: Vec<QueuedAction>) {
        if chunk.len() > 1 && chunk.iter().all(|a| a.can_batch) {
            match self.try_transaction(&chunk) {
                Ok(()) => {
                    debug!(actions = chunk.len(), "flush transaction committed");
                    for action in &chunk {
                        self.settle(action);
                    }

                    return;
                }
                Err((pos, err)) if chunk[pos].break_on_error => {
                    // the rollback also undid the actions ahead of the
                    // failing one; replay them so their writes survive
                    for action in &chunk[..pos] {
                        match self.apply_single(action) {
                            Ok(()) => self.settle(action),
                            Err(replay_err) => self.record_error(action, replay_err),
                        }
                    }

                    self.record_error(&chunk[pos], err);
                    self.abandon(&chunk[pos + 1..]);

                    return;
                }
                Err((pos, err)) => {
                    debug!(
                        action = %chunk[pos].label,
                        error = %err,
                        "flush transaction rolled back; replaying individually"
                    );
                }
            }
        }

        for (pos, action) in chunk.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                for rest in &chunk[pos..] {
                    self.record_error(rest, StoreError::Cancelled);
                }

                return;
            }

            match self.apply_single(action) {
                Ok(()) => self.settle(action),
                Err(err) => {
                    let abandon_rest = action.break_on_error;
                    self.record_error(action, err);

                    if abandon_rest {
                        self.abandon(&chunk[pos + 1..]);
                        return;
                    }
                }
            }
        }
    }

    fn try_transaction(&self, chunk: &[QueuedAction]) -> Result<(), (usize, StoreError)> {
        let mut conn = self.provider.connect().map_err(|e| (0, e))?;
        conn.begin().map_err(|e| (0, e))?;

        for (pos, action) in chunk.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                let _ = conn.rollback();
                return Err((pos, StoreError::Cancelled));
            }

            if let Err(err) = action.apply(conn.as_mut()) {
                let _ = conn.rollback();
                return Err((pos, err));
            }
        }

        conn.commit().map_err(|e| (chunk.len() - 1, e))
    }

    fn apply_single(&self, action: &QueuedAction) -> Result<(), StoreError> {
        let mut conn = self.provider.connect()?;
        action.apply(conn.as_mut())?;

        Ok(())
    }

    fn record_error(&self, action: &QueuedAction, source: StoreError) {
        warn!(
            action = %action.label,
            entity = action.entity,
            error = %source,
            "delayed flush action failed"
        );

        if let Ok(mut errors) = self.flush.errors.lock() {
            errors.push(FlushError {
                label: action.label.clone(),
                entity: action.entity,
                source,
            });
        }
    }

    fn abandon(&self, rest: &[QueuedAction]) {
        for action in rest {
            self.record_error(
                action,
                StoreError::Backend {
                    message: "abandoned after an earlier break-on-error failure".to_string(),
                },
            );
        }
    }
}

// Spawn the flush timer if it is not already running. The thread holds only
// a weak handle; dropping the last `Database` clone stops it on its next
// tick.
pub(crate) fn ensure_timer(inner: &Arc<DatabaseInner>) {
    if inner.flush.timer_running.swap(true, Ordering::AcqRel) {
        return;
    }

    let weak = Arc::downgrade(inner);
    let interval = inner.config.flush_interval();

    let spawned = thread::Builder::new()
        .name("strata-flush".to_string())
        .spawn(move || {
            loop {
                thread::sleep(interval);

                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.shutdown.is_cancelled() {
                    inner.flush.timer_running.store(false, Ordering::Release);
                    return;
                }

                inner.flush_pending();

                let drained = inner
                    .flush
                    .pending
                    .lock()
                    .map(|q| q.is_empty())
                    .unwrap_or(true);
                if drained {
                    inner.flush.timer_running.store(false, Ordering::Release);

                    // a racing enqueue between the drain check and the flag
                    // reset restarts the timer here
                    let refill = inner
                        .flush
                        .pending
                        .lock()
                        .map(|q| !q.is_empty())
                        .unwrap_or(false);
                    if refill {
                        ensure_timer(&inner);
                    }

                    return;
                }
            }
        });

    if spawned.is_err() {
        inner.flush.timer_running.store(false, Ordering::Release);
        warn!("flush timer thread could not be spawned; relying on explicit flushes");
    }
}
