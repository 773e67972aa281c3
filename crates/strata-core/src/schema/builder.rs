use crate::{
    schema::{
        Accessor, Field, Schema, SchemaError,
        convert::{ConvertError, Converter, from_items, to_items},
        registry::{DeriveState, SchemaRegistry},
    },
    value::{Value, ValueKind},
};
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    marker::PhantomData,
    sync::Arc,
};

///
/// Record
///
/// The capability every persistable/serializable type implements. Instead
/// of runtime member introspection, a type statically describes its own
/// field list, accessors, and converter choices through the builder.
///

pub trait Record: Any + Clone + Send + Sync + Sized + 'static {
    /// Stable logical entity name used in schemas, cache keys, and SQL.
    const NAME: &'static str;

    /// Declare fields, accessors, and converters for this type.
    fn describe(schema: &mut SchemaBuilder<'_, Self>);

    /// Build a bare instance for the decode path to populate.
    fn new_record() -> Self;
}

/// Registry-storable describe strategy override; higher-ranked so it can be
/// stored erased and recovered per type.
pub type DescribeFn<T> = for<'a> fn(&mut SchemaBuilder<'a, T>);

fn factory_shim<T: Record>() -> Box<dyn Any + Send + Sync> {
    Box::new(T::new_record())
}

///
/// SchemaBuilder
///
/// Collects field declarations for one type during derivation. The builder
/// borrows the registry (for eager inner-schema derivation) and the
/// in-flight derivation state (so self-references terminate).
///

pub struct SchemaBuilder<'a, T: Record> {
    registry: &'a SchemaRegistry,
    state: &'a mut DeriveState,
    fields: Vec<FieldBuilder<T>>,
    self_serializing: bool,
    deferred_error: Option<SchemaError>,
}

impl<'a, T: Record> SchemaBuilder<'a, T> {
    pub(crate) fn new(registry: &'a SchemaRegistry, state: &'a mut DeriveState) -> Self {
        Self {
            registry,
            state,
            fields: Vec::new(),
            self_serializing: false,
            deferred_error: None,
        }
    }

    /// Declare a scalar field. Attach accessors and flags on the returned
    /// field builder.
    pub fn field(&mut self, name: &'static str, kind: ValueKind) -> &mut FieldBuilder<T> {
        self.push(FieldBuilder::new(name, kind, vec![Converter::scalar(kind)]))
    }

    /// Declare an "any"-typed field carrying a kind tag on the wire.
    pub fn dynamic_field(&mut self, name: &'static str) -> &mut FieldBuilder<T> {
        self.push(FieldBuilder::new(
            name,
            ValueKind::Dynamic,
            vec![Converter::Dynamic],
        ))
    }

    /// Declare a list field with uniformly-typed scalar elements.
    pub fn list_field(&mut self, name: &'static str, element: ValueKind) -> &mut FieldBuilder<T> {
        self.push(FieldBuilder::new(
            name,
            ValueKind::List,
            vec![Converter::typed_collection(element)],
        ))
    }

    /// Declare a serialize-only sequence field; decoding it is an explicit
    /// error until a concrete collection strategy replaces the chain.
    pub fn collection_field(&mut self, name: &'static str) -> &mut FieldBuilder<T> {
        self.push(FieldBuilder::new(
            name,
            ValueKind::List,
            vec![Converter::Collection],
        ))
    }

    /// Declare a nested-entity field serialized through the inner type's
    /// own schema. The inner schema is derived (and validated) eagerly.
    pub fn nested_field<U: Record>(
        &mut self,
        name: &'static str,
        get: impl Fn(&T) -> Option<U> + Send + Sync + 'static,
        set: impl Fn(&mut T, Option<U>) + Send + Sync + 'static,
    ) -> &mut FieldBuilder<T> {
        self.ensure_schema::<U>();

        let field = FieldBuilder::new(name, ValueKind::Nested, vec![Converter::inner::<U>(false)])
            .with_get(move |entity, cx| match get(entity) {
                Some(inner) => Ok(Value::from(to_items::<U>(cx, &inner)?)),
                None => Ok(Value::Null),
            })
            .with_set(move |entity, cx, value| match value {
                Value::Null => {
                    set(entity, None);
                    Ok(())
                }
                Value::Nested(items) => {
                    set(entity, Some(from_items::<U>(cx, &items)?));
                    Ok(())
                }
                other => Err(ConvertError::shape(ValueKind::Nested, other.kind())),
            });

        self.push(field)
    }

    /// Declare a list-of-entities field, one nested record per element.
    pub fn nested_list_field<U: Record>(
        &mut self,
        name: &'static str,
        get: impl Fn(&T) -> Vec<U> + Send + Sync + 'static,
        set: impl Fn(&mut T, Vec<U>) + Send + Sync + 'static,
    ) -> &mut FieldBuilder<T> {
        self.ensure_schema::<U>();

        let field = FieldBuilder::new(
            name,
            ValueKind::List,
            vec![Converter::nested_collection::<U>()],
        )
        .with_get(move |entity, cx| {
            let mut elements = Vec::new();
            for inner in get(entity) {
                elements.push(Value::from(to_items::<U>(cx, &inner)?));
            }
            Ok(Value::List(elements))
        })
        .with_set(move |entity, cx, value| match value {
            Value::Null => {
                set(entity, Vec::new());
                Ok(())
            }
            Value::List(elements) => {
                let mut decoded = Vec::with_capacity(elements.len());
                for element in elements {
                    match element {
                        Value::Nested(items) => decoded.push(from_items::<U>(cx, &items)?),
                        other => return Err(ConvertError::shape(ValueKind::Nested, other.kind())),
                    }
                }
                set(entity, decoded);
                Ok(())
            }
            other => Err(ConvertError::shape(ValueKind::List, other.kind())),
        });

        self.push(field)
    }

    /// Declare a single-relation field; the wire carries only the related
    /// identity, declared here as `id_kind`.
    pub fn relation_field<U: Record>(
        &mut self,
        name: &'static str,
        id_kind: ValueKind,
    ) -> &mut FieldBuilder<T> {
        self.ensure_schema::<U>();

        self.push(FieldBuilder::new(
            name,
            id_kind,
            vec![Converter::relation::<U>()],
        ))
    }

    /// Declare a many-relation field. It never serializes; `bind` attaches
    /// the lazily-loaded collection when the persistence layer materializes
    /// an instance, receiving the owner's identity value.
    pub fn relation_many_field<U: Record>(
        &mut self,
        name: &'static str,
        bind: impl Fn(&mut T, Value) + Send + Sync + 'static,
    ) -> &mut FieldBuilder<T> {
        self.ensure_schema::<U>();

        let field = FieldBuilder::new(name, ValueKind::List, vec![Converter::RelationMany])
            .with_get(|_, _| Ok(Value::Null))
            .with_set(move |entity, _cx, owner_identity| {
                bind(entity, owner_identity);
                Ok(())
            });

        self.push(field)
    }

    /// Mark this type as carrying its own wire representation; a schema
    /// with no fields is only valid with this set.
    pub fn self_serializing(&mut self) -> &mut Self {
        self.self_serializing = true;
        self
    }

    // Derive the inner type's schema now so its validation failures surface
    // at the outer type's first use. A type already being derived further
    // up the stack is provisionally registered and skipped here.
    fn ensure_schema<U: Record>(&mut self) {
        if self.deferred_error.is_some() {
            return;
        }

        if let Err(err) = self.registry.derive_in::<U>(self.state) {
            self.deferred_error = Some(err);
        }
    }

    fn push(&mut self, field: FieldBuilder<T>) -> &mut FieldBuilder<T> {
        self.fields.push(field);
        self.fields.last_mut().expect("just pushed")
    }

    pub(crate) fn finish(self) -> Result<Schema, SchemaError> {
        if let Some(err) = self.deferred_error {
            return Err(err);
        }

        let overrides = self.registry.overrides_for(TypeId::of::<T>());

        let mut fields = Vec::with_capacity(self.fields.len());
        let mut identity = None;
        for (pos, builder) in self.fields.into_iter().enumerate() {
            let field = builder.finish(overrides.as_ref());
            if field.is_identity() && identity.is_none() {
                identity = Some(pos);
            }
            fields.push(Arc::new(field));
        }

        Schema::new(
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            T::NAME,
            fields,
            identity,
            self.self_serializing,
            factory_shim::<T>,
        )
    }
}

///
/// FieldBuilder
///
/// Per-field declaration state; finalized into an immutable `Field`.
///

pub struct FieldBuilder<T: Record> {
    name: &'static str,
    kind: ValueKind,
    identity: bool,
    read_only: bool,
    indexed: bool,
    renames: HashMap<String, String>,
    chain: Vec<Converter>,
    get_part: Option<
        Arc<dyn Fn(&dyn Any, &super::ConvertContext<'_>) -> Result<Value, ConvertError> + Send + Sync>,
    >,
    set_part: Option<
        Arc<
            dyn Fn(&mut dyn Any, &super::ConvertContext<'_>, Value) -> Result<(), ConvertError>
                + Send
                + Sync,
        >,
    >,
    _marker: PhantomData<fn(T)>,
}

impl<T: Record> FieldBuilder<T> {
    fn new(name: &'static str, kind: ValueKind, chain: Vec<Converter>) -> Self {
        Self {
            name,
            kind,
            identity: false,
            read_only: false,
            indexed: false,
            renames: HashMap::new(),
            chain,
            get_part: None,
            set_part: None,
            _marker: PhantomData,
        }
    }

    /// Mark this field as the identity (primary cache key).
    pub fn identity(&mut self) -> &mut Self {
        self.identity = true;
        self.indexed = true;
        self
    }

    pub fn read_only(&mut self) -> &mut Self {
        self.read_only = true;
        self
    }

    /// Participate in secondary cache lookup.
    pub fn indexed(&mut self) -> &mut Self {
        self.indexed = true;
        self
    }

    /// Map an inner field name onto a different outer wire name when this
    /// nested field is flattened into the parent row.
    pub fn rename(&mut self, inner: &'static str, outer: &'static str) -> &mut Self {
        self.renames.insert(inner.to_string(), outer.to_string());
        self
    }

    /// Collapse an all-null nested record to null (and back) on this field.
    pub fn collapse_empty(&mut self) -> &mut Self {
        for converter in &mut self.chain {
            if let Converter::InnerSchema { collapse_empty, .. } = converter {
                *collapse_empty = true;
            }
        }
        self
    }

    /// Append a conversion stage; instances are built in declared order,
    /// wire values in reverse order.
    pub fn converter(&mut self, converter: Converter) -> &mut Self {
        self.chain.push(converter);
        self
    }

    /// Replace the whole converter chain.
    pub fn chain(&mut self, chain: Vec<Converter>) -> &mut Self {
        self.chain = chain;
        self
    }

    /// Typed getter; the closure reads the field off the instance.
    pub fn get(&mut self, get: impl Fn(&T) -> Value + Send + Sync + 'static) -> &mut Self {
        self.get_part = Some(erase_get::<T>(move |entity, _cx| Ok(get(entity))));
        self
    }

    /// Typed setter; the closure writes a converted value back.
    pub fn set(
        &mut self,
        set: impl Fn(&mut T, Value) -> Result<(), ConvertError> + Send + Sync + 'static,
    ) -> &mut Self {
        self.set_part = Some(erase_set::<T>(move |entity, _cx, value| set(entity, value)));
        self
    }

    // Context-aware accessor halves used by the nested/relation helpers.

    fn with_get(
        mut self,
        get: impl Fn(&T, &super::ConvertContext<'_>) -> Result<Value, ConvertError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.get_part = Some(erase_get::<T>(get));
        self
    }

    fn with_set(
        mut self,
        set: impl Fn(&mut T, &super::ConvertContext<'_>, Value) -> Result<(), ConvertError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.set_part = Some(erase_set::<T>(set));
        self
    }

    fn finish(self, overrides: Option<&HashMap<String, Vec<Converter>>>) -> Field {
        let chain = overrides
            .and_then(|map| map.get(self.name))
            .cloned()
            .unwrap_or(self.chain);

        let accessor = match (self.get_part, self.set_part) {
            (Some(get_fn), Some(set_fn)) => Some(Accessor::new(get_fn, set_fn)),
            _ => None,
        };

        Field::new(
            self.name.to_string(),
            self.kind,
            self.identity,
            self.read_only,
            self.indexed,
            self.renames,
            chain,
            accessor,
        )
    }
}

fn erase_get<T: Record>(
    get: impl Fn(&T, &super::ConvertContext<'_>) -> Result<Value, ConvertError> + Send + Sync + 'static,
) -> Arc<dyn Fn(&dyn Any, &super::ConvertContext<'_>) -> Result<Value, ConvertError> + Send + Sync> {
    Arc::new(move |any, cx| {
        let entity = any
            .downcast_ref::<T>()
            .ok_or(ConvertError::WrongEntityType {
                expected: std::any::type_name::<T>(),
            })?;
        get(entity, cx)
    })
}

fn erase_set<T: Record>(
    set: impl Fn(&mut T, &super::ConvertContext<'_>, Value) -> Result<(), ConvertError>
    + Send
    + Sync
    + 'static,
) -> Arc<
    dyn Fn(&mut dyn Any, &super::ConvertContext<'_>, Value) -> Result<(), ConvertError>
        + Send
        + Sync,
> {
    Arc::new(move |any, cx, value| {
        let entity = any.downcast_mut::<T>().ok_or(ConvertError::WrongEntityType {
            expected: std::any::type_name::<T>(),
        })?;
        set(entity, cx, value)
    })
}
