use crate::{
    error::{Error, ErrorClass, ErrorOrigin},
    item::{Item, ItemCollection, ItemError},
    schema::{Field, Record, SchemaError, SchemaHandle, registry::SchemaRegistry},
    value::{
        Value, ValueKind,
        wire::{self, WireError},
    },
};
use std::{fmt, sync::Arc};
use thiserror::Error as ThisError;

///
/// ConvertError
///
/// A converter failed to interpret wire data, or a value violated its
/// declared shape. Propagated to the immediate caller of the field's
/// convert operation, never swallowed.
///

#[derive(Debug, ThisError)]
pub enum ConvertError {
    #[error("expected {expected} value, found {found}")]
    Shape {
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("conversion not supported: {0}")]
    UnsupportedDirection(&'static str),

    #[error("entity is not a '{expected}'")]
    WrongEntityType { expected: &'static str },

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Schema(Box<SchemaError>),

    #[error(transparent)]
    Item(#[from] ItemError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl ConvertError {
    pub(crate) fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) const fn shape(expected: ValueKind, found: ValueKind) -> Self {
        Self::Shape { expected, found }
    }
}

impl From<SchemaError> for ConvertError {
    fn from(err: SchemaError) -> Self {
        Self::Schema(Box::new(err))
    }
}

impl From<ConvertError> for Error {
    fn from(err: ConvertError) -> Self {
        let class = match &err {
            ConvertError::UnsupportedDirection(_) => ErrorClass::Unsupported,
            ConvertError::Schema(_) => ErrorClass::Validation,
            _ => ErrorClass::Conversion,
        };

        Self::new(class, ErrorOrigin::Convert, err.to_string())
    }
}

// Shape-checked scalar reads for accessor closures and tests.

pub fn expect_bool(value: &Value) -> Result<bool, ConvertError> {
    value
        .as_bool()
        .ok_or_else(|| ConvertError::shape(ValueKind::Bool, value.kind()))
}

pub fn expect_i32(value: &Value) -> Result<i32, ConvertError> {
    match value {
        Value::I32(v) => Ok(*v),
        other => Err(ConvertError::shape(ValueKind::I32, other.kind())),
    }
}

pub fn expect_i64(value: &Value) -> Result<i64, ConvertError> {
    value
        .as_i64()
        .ok_or_else(|| ConvertError::shape(ValueKind::I64, value.kind()))
}

pub fn expect_u32(value: &Value) -> Result<u32, ConvertError> {
    match value {
        Value::U32(v) => Ok(*v),
        other => Err(ConvertError::shape(ValueKind::U32, other.kind())),
    }
}

pub fn expect_u64(value: &Value) -> Result<u64, ConvertError> {
    value
        .as_u64()
        .ok_or_else(|| ConvertError::shape(ValueKind::U64, value.kind()))
}

pub fn expect_text(value: &Value) -> Result<String, ConvertError> {
    value
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| ConvertError::shape(ValueKind::Text, value.kind()))
}

pub fn expect_bytes(value: &Value) -> Result<Vec<u8>, ConvertError> {
    value
        .as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| ConvertError::shape(ValueKind::Bytes, value.kind()))
}

///
/// ConvertContext
///
/// Explicit context threaded through every conversion; carries the
/// registry so nested and relation stages can resolve schemas without
/// reaching for global state.
///

#[derive(Clone, Copy)]
pub struct ConvertContext<'a> {
    pub registry: &'a SchemaRegistry,
}

impl<'a> ConvertContext<'a> {
    #[must_use]
    pub const fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }
}

///
/// ValueConverter
///
/// One custom conversion stage. Stages compose into a chain on a field;
/// `to_instance` runs stages in ascending declared order, `to_source` in
/// descending order, so a stage's two directions always see the same
/// neighbour on the wire side.
///

pub trait ValueConverter: Send + Sync {
    fn to_instance(
        &self,
        cx: &ConvertContext<'_>,
        field: &Field,
        value: Value,
    ) -> Result<Value, ConvertError>;

    fn to_source(
        &self,
        cx: &ConvertContext<'_>,
        field: &Field,
        value: Value,
    ) -> Result<Value, ConvertError>;
}

///
/// Converter
///
/// The closed set of conversion stages a field chain is built from.
///

#[derive(Clone)]
pub enum Converter {
    /// Pass-through with a kind check.
    Scalar { kind: ValueKind },

    /// User-supplied stage (mask, encode, encrypt-then-encode, ...).
    Custom(Arc<dyn ValueConverter>),

    /// Nested entity flattened into the outer namespace via the field's
    /// rename table; optionally collapses an all-null record to null.
    InnerSchema {
        handle: SchemaHandle,
        collapse_empty: bool,
    },

    /// Generic sequence: one positional item per element on the way out;
    /// the decode direction must come from a concrete strategy.
    Collection,

    /// Concrete collection strategy for uniformly-typed elements; supports
    /// both directions. Elements of kind `Nested` carry the element type's
    /// schema handle so codecs can drive positional decode.
    TypedCollection {
        element: ValueKind,
        schema: Option<SchemaHandle>,
    },

    /// "Any"-typed field: wire form is a kind tag plus the tagged value so
    /// reads reconstruct the original concrete kind.
    Dynamic,

    /// Stores only the related entity's identity on the wire; resolution
    /// goes back through the storage facade.
    RelationSingle { target: SchemaHandle },

    /// Never serializes; a lazily-loaded collection is bound to the owning
    /// entity at materialization time.
    RelationMany,
}

impl Converter {
    #[must_use]
    pub const fn scalar(kind: ValueKind) -> Self {
        Self::Scalar { kind }
    }

    #[must_use]
    pub fn custom(converter: Arc<dyn ValueConverter>) -> Self {
        Self::Custom(converter)
    }

    #[must_use]
    pub fn inner<U: Record>(collapse_empty: bool) -> Self {
        Self::InnerSchema {
            handle: SchemaHandle::of::<U>(),
            collapse_empty,
        }
    }

    #[must_use]
    pub const fn typed_collection(element: ValueKind) -> Self {
        Self::TypedCollection {
            element,
            schema: None,
        }
    }

    /// Collection of nested records of type `U`.
    #[must_use]
    pub fn nested_collection<U: Record>() -> Self {
        Self::TypedCollection {
            element: ValueKind::Nested,
            schema: Some(SchemaHandle::of::<U>()),
        }
    }

    #[must_use]
    pub fn relation<U: Record>() -> Self {
        Self::RelationSingle {
            target: SchemaHandle::of::<U>(),
        }
    }

    pub(crate) fn to_instance(
        &self,
        cx: &ConvertContext<'_>,
        field: &Field,
        value: Value,
    ) -> Result<Value, ConvertError> {
        match self {
            Self::Scalar { kind } => check_kind(*kind, value),
            Self::Custom(converter) => converter.to_instance(cx, field, value),
            Self::InnerSchema { collapse_empty, .. } => {
                let nested = expect_nested(value)?;
                let nested = rename_items(&nested, field, RenameDirection::OuterToInner)?;

                if *collapse_empty && nested.all_null() {
                    return Ok(Value::Null);
                }

                Ok(Value::from(nested))
            }
            Self::Collection => Err(ConvertError::UnsupportedDirection(
                "generic collection fields cannot rebuild instances; pick a concrete \
                 collection strategy",
            )),
            Self::TypedCollection { element, .. } => check_elements(*element, value),
            Self::Dynamic => {
                let bytes = expect_bytes(&value)?;
                Ok(wire::decode_tagged(&bytes)?)
            }
            Self::RelationSingle { target } => check_relation_identity(cx, *target, value),
            Self::RelationMany => Ok(Value::Null),
        }
    }

    pub(crate) fn to_source(
        &self,
        cx: &ConvertContext<'_>,
        field: &Field,
        value: Value,
    ) -> Result<Value, ConvertError> {
        match self {
            Self::Scalar { kind } => check_kind(*kind, value),
            Self::Custom(converter) => converter.to_source(cx, field, value),
            Self::InnerSchema { collapse_empty, .. } => {
                let nested = expect_nested(value)?;

                if *collapse_empty && nested.all_null() {
                    return Ok(Value::Null);
                }

                let nested = rename_items(&nested, field, RenameDirection::InnerToOuter)?;

                Ok(Value::from(nested))
            }
            Self::Collection => match value {
                Value::List(_) => Ok(value),
                other => Err(ConvertError::shape(ValueKind::List, other.kind())),
            },
            Self::TypedCollection { element, .. } => check_elements(*element, value),
            Self::Dynamic => match value {
                Value::Nested(_) => Err(ConvertError::UnsupportedDirection(
                    "dynamic fields cannot carry schema-bound nested records",
                )),
                other => Ok(Value::Bytes(wire::encode_tagged(&other)?)),
            },
            Self::RelationSingle { target } => check_relation_identity(cx, *target, value),
            Self::RelationMany => Ok(Value::Null),
        }
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar { kind } => write!(f, "Scalar({kind})"),
            Self::Custom(_) => f.write_str("Custom"),
            Self::InnerSchema { handle, .. } => write!(f, "InnerSchema({})", handle.name()),
            Self::Collection => f.write_str("Collection"),
            Self::TypedCollection { element, .. } => write!(f, "TypedCollection({element})"),
            Self::Dynamic => f.write_str("Dynamic"),
            Self::RelationSingle { target } => write!(f, "RelationSingle({})", target.name()),
            Self::RelationMany => f.write_str("RelationMany"),
        }
    }
}

fn check_kind(expected: ValueKind, value: Value) -> Result<Value, ConvertError> {
    if expected == ValueKind::Dynamic || value.kind() == expected {
        Ok(value)
    } else {
        Err(ConvertError::shape(expected, value.kind()))
    }
}

fn check_elements(element: ValueKind, value: Value) -> Result<Value, ConvertError> {
    let Value::List(elements) = &value else {
        return Err(ConvertError::shape(ValueKind::List, value.kind()));
    };

    for candidate in elements {
        if !candidate.is_null() && candidate.kind() != element {
            return Err(ConvertError::shape(element, candidate.kind()));
        }
    }

    Ok(value)
}

fn expect_nested(value: Value) -> Result<ItemCollection, ConvertError> {
    match value {
        Value::Nested(inner) => Ok(*inner),
        other => Err(ConvertError::shape(ValueKind::Nested, other.kind())),
    }
}

// The wire value of a single relation is the related identity; shape-check
// it against the target schema's identity kind.
fn check_relation_identity(
    cx: &ConvertContext<'_>,
    target: SchemaHandle,
    value: Value,
) -> Result<Value, ConvertError> {
    let schema = target.resolve(cx.registry)?;
    let identity = schema.identity_field().ok_or_else(|| {
        ConvertError::message(format!(
            "relation target '{}' has no identity field",
            target.name()
        ))
    })?;

    check_kind(identity.kind(), value)
}

enum RenameDirection {
    InnerToOuter,
    OuterToInner,
}

// Apply the field's name-override table to a nested record, in either
// direction. Unmapped fields keep their names.
fn rename_items(
    nested: &ItemCollection,
    field: &Field,
    direction: RenameDirection,
) -> Result<ItemCollection, ConvertError> {
    if field.renames().is_empty() {
        return Ok(nested.clone());
    }

    let mut out = ItemCollection::with_capacity(nested.len());
    for item in nested {
        let mapped = match direction {
            RenameDirection::InnerToOuter => field.renames().get(item.name()).cloned(),
            RenameDirection::OuterToInner => field
                .renames()
                .iter()
                .find(|(_, outer)| outer.as_str() == item.name())
                .map(|(inner, _)| inner.clone()),
        };

        let renamed = match mapped {
            Some(name) => Item::new(Arc::new(item.field.with_name(name)), item.value.clone()),
            None => item.clone(),
        };
        out.add(renamed)?;
    }

    Ok(out)
}

/// Convert an entity into its structured intermediate representation by
/// running every field's accessor and source-direction chain.
pub fn to_items<T: Record>(
    cx: &ConvertContext<'_>,
    entity: &T,
) -> Result<ItemCollection, ConvertError> {
    let schema = cx.registry.get::<T>()?;

    let mut items = ItemCollection::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let accessor = field.accessor().ok_or_else(|| {
            ConvertError::message(format!("field '{}' has no accessor", field.name()))
        })?;

        let instance = accessor.get(entity, cx)?;
        let source = field.to_source(cx, instance)?;
        items.add(Item::new(Arc::clone(field), source))?;
    }

    Ok(items)
}

/// Rebuild an entity from its structured intermediate representation:
/// bare instance from the schema factory, then every field's
/// instance-direction chain and setter. Missing items read as null.
pub fn from_items<T: Record>(
    cx: &ConvertContext<'_>,
    items: &ItemCollection,
) -> Result<T, ConvertError> {
    let schema = cx.registry.get::<T>()?;
    let mut instance = schema.new_instance();

    for field in schema.fields() {
        if field.is_relation_many() {
            // bound by the persistence layer at materialization time
            continue;
        }

        let accessor = field.accessor().ok_or_else(|| {
            ConvertError::message(format!("field '{}' has no accessor", field.name()))
        })?;

        let source = items
            .try_get(field.name())
            .map_or(Value::Null, |item| item.value.clone());
        let value = field.to_instance(cx, source)?;

        accessor.set_erased(instance.as_mut(), cx, value)?;
    }

    instance
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| ConvertError::WrongEntityType {
            expected: std::any::type_name::<T>(),
        })
}
