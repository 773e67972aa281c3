pub mod builder;
pub mod convert;
pub mod field;
pub mod registry;

#[cfg(test)]
mod tests;

use crate::{
    error::{Error, ErrorClass, ErrorOrigin},
    value::{Value, ValueKind},
};
use std::{any::TypeId, fmt, sync::Arc};
use thiserror::Error as ThisError;

pub use builder::{Record, SchemaBuilder};
pub use convert::{ConvertContext, ConvertError, Converter, ValueConverter};
pub use field::{Accessor, Field};
pub use registry::SchemaRegistry;

///
/// SchemaError
///
/// Validation failures raised while deriving a schema. Fatal at first use:
/// the registry records the failure and returns it unchanged on every
/// subsequent request for the same type.
///

#[derive(Clone, Debug, ThisError)]
pub enum SchemaError {
    #[error("schema '{schema}': duplicate field name '{field}'")]
    DuplicateFieldName { schema: String, field: String },

    #[error("schema '{schema}': more than one identity field")]
    MultipleIdentityFields { schema: String },

    #[error("schema '{schema}': field '{field}' has no accessor")]
    MissingAccessor { schema: String, field: String },

    #[error("schema '{schema}': field '{field}' has an empty converter chain")]
    EmptyConverterChain { schema: String, field: String },

    #[error("schema '{schema}' declares no fields and is not self-serializing")]
    NoFields { schema: String },

    #[error("schema '{schema}': field '{field}' of kind {kind} cannot be indexed")]
    NotIndexable {
        schema: String,
        field: String,
        kind: ValueKind,
    },

    #[error("schema '{schema}': identity field '{field}' of kind {kind} cannot key the cache")]
    IdentityNotIndexable {
        schema: String,
        field: String,
        kind: ValueKind,
    },

    #[error("schema '{schema}': {message}")]
    Internal { schema: String, message: String },
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Self::new(ErrorClass::Validation, ErrorOrigin::Schema, err.to_string())
    }
}

///
/// SchemaHandle
///
/// Deferred reference to another type's schema. Fields hold handles rather
/// than `Arc<Schema>` so self-referential schemas terminate; resolution goes
/// back through the registry, which is a cache hit after first derivation.
///

#[derive(Clone, Copy)]
pub struct SchemaHandle {
    type_id: TypeId,
    name: &'static str,
    resolve: fn(&SchemaRegistry) -> Result<Arc<Schema>, SchemaError>,
}

impl SchemaHandle {
    #[must_use]
    pub fn of<T: Record>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: T::NAME,
            resolve: SchemaRegistry::get::<T>,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn resolve(&self, registry: &SchemaRegistry) -> Result<Arc<Schema>, SchemaError> {
        (self.resolve)(registry)
    }
}

impl fmt::Debug for SchemaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

///
/// Schema
///
/// Per-type metadata: ordered fields, optional identity field, and a bare
/// instance factory. Immutable once validated; published into the registry
/// for the process lifetime.
///

pub struct Schema {
    type_id: TypeId,
    type_name: &'static str,
    name: &'static str,
    fields: Vec<Arc<Field>>,
    identity: Option<usize>,
    self_serializing: bool,
    factory: fn() -> Box<dyn std::any::Any + Send + Sync>,
}

impl Schema {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Fully-qualified Rust type path, for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub fn fields(&self) -> &[Arc<Field>] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Arc<Field>> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// The distinguished identity field, if one was declared.
    #[must_use]
    pub fn identity_field(&self) -> Option<&Arc<Field>> {
        self.identity.map(|idx| &self.fields[idx])
    }

    #[must_use]
    pub const fn is_self_serializing(&self) -> bool {
        self.self_serializing
    }

    /// Build a bare, type-erased instance via the registered factory.
    #[must_use]
    pub fn new_instance(&self) -> Box<dyn std::any::Any + Send + Sync> {
        (self.factory)()
    }

    /// Fields that participate in secondary cache lookup, identity included.
    pub fn index_fields(&self) -> impl Iterator<Item = &Arc<Field>> {
        self.fields
            .iter()
            .filter(|f| f.is_identity() || f.is_indexed())
    }

    pub(crate) fn new(
        type_id: TypeId,
        type_name: &'static str,
        name: &'static str,
        fields: Vec<Arc<Field>>,
        identity: Option<usize>,
        self_serializing: bool,
        factory: fn() -> Box<dyn std::any::Any + Send + Sync>,
    ) -> Result<Self, SchemaError> {
        let schema = Self {
            type_id,
            type_name,
            name,
            fields,
            identity,
            self_serializing,
            factory,
        };
        schema.validate()?;

        Ok(schema)
    }

    // Runs once, before publication; a schema that fails here is never
    // observable by callers.
    fn validate(&self) -> Result<(), SchemaError> {
        let schema = || self.name.to_string();

        if self.fields.is_empty() && !self.self_serializing {
            return Err(SchemaError::NoFields { schema: schema() });
        }

        for (pos, field) in self.fields.iter().enumerate() {
            if self.fields[..pos].iter().any(|f| f.name() == field.name()) {
                return Err(SchemaError::DuplicateFieldName {
                    schema: schema(),
                    field: field.name().to_string(),
                });
            }

            if field.chain().is_empty() {
                return Err(SchemaError::EmptyConverterChain {
                    schema: schema(),
                    field: field.name().to_string(),
                });
            }

            if field.accessor().is_none() {
                return Err(SchemaError::MissingAccessor {
                    schema: schema(),
                    field: field.name().to_string(),
                });
            }

            if field.is_indexed() && !field.kind().is_indexable() {
                return Err(SchemaError::NotIndexable {
                    schema: schema(),
                    field: field.name().to_string(),
                    kind: field.kind(),
                });
            }
        }

        let identity_count = self.fields.iter().filter(|f| f.is_identity()).count();
        if identity_count > 1 {
            return Err(SchemaError::MultipleIdentityFields { schema: schema() });
        }

        if let Some(identity) = self.identity_field()
            && !identity.kind().is_indexable()
        {
            return Err(SchemaError::IdentityNotIndexable {
                schema: schema(),
                field: identity.name().to_string(),
                kind: identity.kind(),
            });
        }

        Ok(())
    }

    /// Read the identity value off an instance.
    pub fn identity_value<T: Record>(
        &self,
        cx: &ConvertContext<'_>,
        entity: &T,
    ) -> Result<Option<Value>, ConvertError> {
        let Some(field) = self.identity_field() else {
            return Ok(None);
        };

        let accessor = field
            .accessor()
            .ok_or_else(|| ConvertError::message("identity field has no accessor"))?;

        accessor.get(entity, cx).map(Some)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("fields", &self.fields.len())
            .field("identity", &self.identity_field().map(|f| f.name()))
            .finish_non_exhaustive()
    }
}
