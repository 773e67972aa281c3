use crate::{
    db::{Database, StoreError, flush::QueuedAction},
    error::{Error, ErrorClass, ErrorOrigin},
    schema::Record,
    value::Value,
};
use thiserror::Error as ThisError;
use tracing::warn;

///
/// BatchError
///

#[derive(Debug, ThisError)]
pub enum BatchError {
    #[error("batch is not open")]
    NotOpen,

    #[error("batch ended with {count} uncommitted actions")]
    PendingActions { count: usize },

    #[error("batch action '{label}' failed: {source}")]
    Action {
        label: String,
        #[source]
        source: StoreError,
    },

    #[error("batch commit cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<BatchError> for Error {
    fn from(err: BatchError) -> Self {
        let class = match &err {
            BatchError::NotOpen | BatchError::PendingActions { .. } | BatchError::Cancelled => {
                ErrorClass::Usage
            }
            BatchError::Action { source, .. } | BatchError::Store(source) => source.class(),
        };

        Self::new(class, ErrorOrigin::Batch, err.to_string())
    }
}

#[derive(Debug, Eq, PartialEq)]
enum BatchState {
    Open,
    Committed,
}

///
/// Batch
///
/// An explicit unit of work. Mutations queue locally until `commit` applies
/// them in a single transaction; the first failure rolls the whole
/// transaction back and reports the failing action. A batch must be either
/// committed or discarded before `end`.
///

pub struct Batch {
    db: Database,
    actions: Vec<QueuedAction>,
    state: BatchState,
}

impl Batch {
    pub(crate) fn new(db: Database) -> Self {
        Self {
            db,
            actions: Vec::new(),
            state: BatchState::Open,
        }
    }

    const fn ensure_open(&self) -> Result<(), BatchError> {
        match self.state {
            BatchState::Open => Ok(()),
            BatchState::Committed => Err(BatchError::NotOpen),
        }
    }

    pub fn insert<T: Record>(&mut self, entity: &T) -> Result<(), BatchError> {
        self.ensure_open()?;
        self.actions.push(self.db.action_insert(entity, false)?);

        Ok(())
    }

    pub fn update<T: Record>(&mut self, entity: &T) -> Result<(), BatchError> {
        self.ensure_open()?;
        self.actions.push(self.db.action_update(entity, false)?);

        Ok(())
    }

    pub fn delete<T: Record>(&mut self, identity: Value) -> Result<(), BatchError> {
        self.ensure_open()?;
        self.actions.push(self.db.action_delete::<T>(identity, false)?);

        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Apply every queued action in one transaction. On failure the
    /// transaction rolls back, the queued actions stay in place, and the
    /// failing action is named in the error.
    pub fn commit(&mut self) -> Result<(), BatchError> {
        self.ensure_open()?;
        if self.actions.is_empty() {
            self.state = BatchState::Committed;
            return Ok(());
        }

        let mut conn = self.db.connect()?;
        conn.begin()?;

        for action in &self.actions {
            // checked between actions, never mid-action
            if self.db.inner.shutdown.is_cancelled() {
                let _ = conn.rollback();
                return Err(BatchError::Cancelled);
            }

            if let Err(source) = action.apply(conn.as_mut()) {
                let _ = conn.rollback();
                return Err(BatchError::Action {
                    label: action.label.clone(),
                    source,
                });
            }
        }

        conn.commit()?;

        for action in self.actions.drain(..) {
            self.db.inner.settle(&action);
        }
        self.state = BatchState::Committed;

        Ok(())
    }

    /// Drop every queued action without applying it.
    pub fn discard(&mut self) {
        self.actions.clear();
    }

    /// Close the batch; refuses while uncommitted actions are pending.
    pub fn end(self) -> Result<(), BatchError> {
        if !self.actions.is_empty() {
            return Err(BatchError::PendingActions {
                count: self.actions.len(),
            });
        }

        Ok(())
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            warn!(
                pending = self.actions.len(),
                "batch dropped with uncommitted actions"
            );
        }
    }
}
