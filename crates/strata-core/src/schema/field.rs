use crate::{
    schema::convert::{ConvertContext, ConvertError, Converter},
    value::{Value, ValueKind},
};
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// Type-erased getter; receives the entity as `&dyn Any`.
type GetFn = Arc<dyn Fn(&dyn Any, &ConvertContext<'_>) -> Result<Value, ConvertError> + Send + Sync>;

/// Type-erased setter; receives the entity as `&mut dyn Any`.
type SetFn =
    Arc<dyn Fn(&mut dyn Any, &ConvertContext<'_>, Value) -> Result<(), ConvertError> + Send + Sync>;

///
/// Accessor
///
/// Get/set against an instance. The closures are erased over `dyn Any`;
/// the typed shims are produced by `SchemaBuilder`, so a mismatched
/// downcast indicates a registration bug and surfaces as a conversion
/// error, never a panic.
///

#[derive(Clone)]
pub struct Accessor {
    get_fn: GetFn,
    set_fn: SetFn,
}

impl Accessor {
    pub(crate) fn new(get_fn: GetFn, set_fn: SetFn) -> Self {
        Self { get_fn, set_fn }
    }

    pub fn get<T: Any>(&self, entity: &T, cx: &ConvertContext<'_>) -> Result<Value, ConvertError> {
        (self.get_fn)(entity, cx)
    }

    pub fn set<T: Any>(
        &self,
        entity: &mut T,
        cx: &ConvertContext<'_>,
        value: Value,
    ) -> Result<(), ConvertError> {
        (self.set_fn)(entity, cx, value)
    }

    pub(crate) fn get_erased(
        &self,
        entity: &dyn Any,
        cx: &ConvertContext<'_>,
    ) -> Result<Value, ConvertError> {
        (self.get_fn)(entity, cx)
    }

    pub(crate) fn set_erased(
        &self,
        entity: &mut dyn Any,
        cx: &ConvertContext<'_>,
        value: Value,
    ) -> Result<(), ConvertError> {
        (self.set_fn)(entity, cx, value)
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Accessor")
    }
}

///
/// Field
///
/// One logical column/property descriptor: name, semantic kind, flags, the
/// ordered converter chain, and the accessor. Identity fields are the
/// primary cache key and the default ordering field.
///

#[derive(Clone, Debug)]
pub struct Field {
    name: String,
    kind: ValueKind,
    identity: bool,
    read_only: bool,
    indexed: bool,
    /// Inner field name → outer wire name, for flattening nested schemas
    /// into a different outer namespace.
    renames: HashMap<String, String>,
    chain: Vec<Converter>,
    accessor: Option<Accessor>,
}

impl Field {
    /// A detached field with a pass-through chain and no accessor. Used for
    /// ad-hoc collections (positional collection elements, wire rows); not
    /// valid inside a schema.
    #[must_use]
    pub fn bare(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            identity: false,
            read_only: false,
            indexed: false,
            renames: HashMap::new(),
            chain: vec![Converter::scalar(kind)],
            accessor: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        kind: ValueKind,
        identity: bool,
        read_only: bool,
        indexed: bool,
        renames: HashMap<String, String>,
        chain: Vec<Converter>,
        accessor: Option<Accessor>,
    ) -> Self {
        Self {
            name,
            kind,
            identity,
            read_only,
            indexed,
            renames,
            chain,
            accessor,
        }
    }

    /// Copy of this field under a different name; converter chain and flags
    /// are shared. Used when rename tables flatten nested rows.
    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        let mut field = self.clone();
        field.name = name.into();
        field
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }

    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.identity
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub const fn is_indexed(&self) -> bool {
        self.indexed
    }

    #[must_use]
    pub const fn renames(&self) -> &HashMap<String, String> {
        &self.renames
    }

    #[must_use]
    pub fn chain(&self) -> &[Converter] {
        &self.chain
    }

    #[must_use]
    pub const fn accessor(&self) -> Option<&Accessor> {
        self.accessor.as_ref()
    }

    /// True for fields whose converter chain contains the many-relation
    /// stage; these never serialize and are bound at materialization time.
    #[must_use]
    pub fn is_relation_many(&self) -> bool {
        self.chain
            .iter()
            .any(|c| matches!(c, Converter::RelationMany))
    }

    /// Schema handle of the nested record carried by this field, if any.
    #[must_use]
    pub fn inner_schema(&self) -> Option<crate::schema::SchemaHandle> {
        self.chain.iter().find_map(|c| match c {
            Converter::InnerSchema { handle, .. } => Some(*handle),
            _ => None,
        })
    }

    /// Element kind (and element schema for nested elements) of a
    /// collection-typed field. `None` for generic serialize-only
    /// collections, whose decode is unsupported by contract.
    #[must_use]
    pub fn list_element(&self) -> Option<(ValueKind, Option<crate::schema::SchemaHandle>)> {
        self.chain.iter().find_map(|c| match c {
            Converter::TypedCollection { element, schema } => Some((*element, *schema)),
            _ => None,
        })
    }

    /// Wire → instance: converters applied in ascending declared order.
    /// A null input or a null stage result short-circuits the chain.
    pub fn to_instance(
        &self,
        cx: &ConvertContext<'_>,
        value: Value,
    ) -> Result<Value, ConvertError> {
        let mut current = value;
        for converter in &self.chain {
            if current.is_null() {
                return Ok(Value::Null);
            }
            current = converter.to_instance(cx, self, current)?;
        }

        Ok(current)
    }

    /// Instance → wire: the same converters applied in descending order.
    pub fn to_source(&self, cx: &ConvertContext<'_>, value: Value) -> Result<Value, ConvertError> {
        let mut current = value;
        for converter in self.chain.iter().rev() {
            if current.is_null() {
                return Ok(Value::Null);
            }
            current = converter.to_source(cx, self, current)?;
        }

        Ok(current)
    }
}
