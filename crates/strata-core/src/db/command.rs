use crate::{
    db::StoreError,
    item::ItemCollection,
    schema::Schema,
};

///
/// CommandKind
///
/// The closed set of storage operations the facade issues. One prepared
/// command per (entity, kind) pair is built lazily and cached for the
/// lifetime of the facade.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CommandKind {
    Count,
    Insert,
    Select,
    SelectAll,
    Update,
    Delete,
    DeleteAll,
}

///
/// SqlStatement
///
/// Dialect-rendered statement text plus the ordered parameter column names
/// the backend binds from a row.
///

#[derive(Clone, Debug)]
pub struct SqlStatement {
    pub text: String,
    pub params: Vec<String>,
}

///
/// DatabaseCommand
///
/// A prepared operation against one entity: the rendered statement and the
/// schema facts a backend needs to apply it without re-deriving the schema.
///

#[derive(Debug)]
pub struct DatabaseCommand {
    kind: CommandKind,
    entity: &'static str,
    identity: Option<String>,
    columns: Vec<String>,
    statement: SqlStatement,
}

impl DatabaseCommand {
    pub(crate) fn build(
        schema: &Schema,
        kind: CommandKind,
        dialect: &dyn SqlDialect,
    ) -> Result<Self, StoreError> {
        let columns: Vec<String> = schema
            .fields()
            .iter()
            .filter(|f| !f.is_relation_many())
            .map(|f| f.name().to_string())
            .collect();

        Ok(Self {
            kind,
            entity: schema.name(),
            identity: schema.identity_field().map(|f| f.name().to_string()),
            columns,
            statement: dialect.render(schema, kind)?,
        })
    }

    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        self.kind
    }

    #[must_use]
    pub const fn entity(&self) -> &'static str {
        self.entity
    }

    /// Identity column name, if the entity declares one.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub const fn statement(&self) -> &SqlStatement {
        &self.statement
    }
}

///
/// SqlDialect
///
/// Renders a schema operation into statement text. Backends that do not
/// speak SQL may ignore the text and act on the command metadata alone.
///

pub trait SqlDialect: Send + Sync {
    fn render(&self, schema: &Schema, kind: CommandKind) -> Result<SqlStatement, StoreError>;
}

///
/// GenericSqlDialect
///
/// Plain double-quoted identifiers and `?` placeholders.
///

#[derive(Debug, Default)]
pub struct GenericSqlDialect;

impl SqlDialect for GenericSqlDialect {
    fn render(&self, schema: &Schema, kind: CommandKind) -> Result<SqlStatement, StoreError> {
        let table = schema.name();
        let columns: Vec<&str> = schema
            .fields()
            .iter()
            .filter(|f| !f.is_relation_many())
            .map(|f| f.name())
            .collect();
        let identity = schema
            .identity_field()
            .map(|f| f.name());

        let need_identity = |kind: CommandKind| {
            identity.ok_or(StoreError::NoIdentity {
                entity: schema.name(),
                operation: kind,
            })
        };

        let quoted = |names: &[&str]| {
            names
                .iter()
                .map(|n| format!("\"{n}\""))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let statement = match kind {
            CommandKind::Count => SqlStatement {
                text: format!("SELECT COUNT(*) FROM \"{table}\""),
                params: Vec::new(),
            },
            CommandKind::Insert => SqlStatement {
                text: format!(
                    "INSERT INTO \"{table}\" ({}) VALUES ({})",
                    quoted(&columns),
                    vec!["?"; columns.len()].join(", ")
                ),
                params: columns.iter().map(ToString::to_string).collect(),
            },
            CommandKind::Select => {
                let id = need_identity(kind)?;
                SqlStatement {
                    text: format!(
                        "SELECT {} FROM \"{table}\" WHERE \"{id}\" = ?",
                        quoted(&columns)
                    ),
                    params: vec![id.to_string()],
                }
            }
            CommandKind::SelectAll => SqlStatement {
                text: format!("SELECT {} FROM \"{table}\"", quoted(&columns)),
                params: Vec::new(),
            },
            CommandKind::Update => {
                let id = need_identity(kind)?;
                let assignments = columns
                    .iter()
                    .filter(|c| **c != id)
                    .map(|c| format!("\"{c}\" = ?"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut params: Vec<String> = columns
                    .iter()
                    .filter(|c| **c != id)
                    .map(ToString::to_string)
                    .collect();
                params.push(id.to_string());

                SqlStatement {
                    text: format!("UPDATE \"{table}\" SET {assignments} WHERE \"{id}\" = ?"),
                    params,
                }
            }
            CommandKind::Delete => {
                let id = need_identity(kind)?;
                SqlStatement {
                    text: format!("DELETE FROM \"{table}\" WHERE \"{id}\" = ?"),
                    params: vec![id.to_string()],
                }
            }
            CommandKind::DeleteAll => SqlStatement {
                text: format!("DELETE FROM \"{table}\""),
                params: Vec::new(),
            },
        };

        Ok(statement)
    }
}

///
/// ReadWindow
///
/// Offset/limit window applied by the backend after any filtering, with an
/// optional ordering field applied before the window.
///

#[derive(Clone, Debug)]
pub struct ReadWindow {
    pub offset: u64,
    pub limit: u64,
    pub order_by: Option<String>,
    pub descending: bool,
}

impl ReadWindow {
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit,
            order_by: None,
            descending: false,
        }
    }

    /// Order rows by a field before windowing.
    #[must_use]
    pub fn ordered_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(field.into());
        self.descending = descending;
        self
    }
}

///
/// Connection
///
/// One live backend session. Transactions bracket `execute` calls; `query`
/// rows come back as flat wire rows the codec layer regroups.
///

pub trait Connection: Send {
    /// Apply a mutating command; returns the affected row count.
    fn execute(
        &mut self,
        command: &DatabaseCommand,
        params: Option<&ItemCollection>,
    ) -> Result<u64, StoreError>;

    /// Run a reading command. `params` filters by exact field match; the
    /// window applies after filtering.
    fn query(
        &mut self,
        command: &DatabaseCommand,
        params: Option<&ItemCollection>,
        window: Option<ReadWindow>,
    ) -> Result<Vec<ItemCollection>, StoreError>;

    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;
}

///
/// ConnectionProvider
///
/// Hands out connections; shared by the facade and the flush worker.
///

pub trait ConnectionProvider: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Connection>, StoreError>;
}
