use crate::{
    cancel::CancelToken,
    codec::{
        CodecError, Serializer,
        buffer::{Reader, Writer},
    },
    item::{Item, ItemCollection},
    schema::{ConvertContext, Field, Record, Schema, SchemaHandle, SchemaRegistry, convert},
    value::{Float32, Float64, Value, ValueKind},
};
use chrono::DateTime;
use std::{
    io::{Cursor, Read, Write},
    sync::Arc,
};

///
/// BinarySerializer
///
/// The positional binary wire format. No field names are embedded for
/// record containers; field identity is positional, driven by the schema
/// field order the reader supplies. Layout per field, in declared order:
///
/// - one presence byte (1 = value follows)
/// - fixed scalars in their natural width, little-endian
/// - text/bytes as a u32 length prefix plus the raw bytes
/// - a nested record recursively, with no outer length prefix
/// - a list as a u32 element count, then per element one presence byte
///   followed by the recursively encoded element
///
/// Many-relation fields never appear on the wire in either direction.
///

pub struct BinarySerializer {
    registry: Arc<SchemaRegistry>,
}

impl BinarySerializer {
    #[must_use]
    pub const fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    fn write_container(
        &self,
        fields: &[Arc<Field>],
        items: &ItemCollection,
        w: &mut Writer<'_>,
        cancel: &CancelToken,
    ) -> Result<(), CodecError> {
        for field in fields {
            if field.is_relation_many() {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(CodecError::Cancelled);
            }

            let value = items.try_get(field.name()).map(|item| &item.value);
            match value {
                None | Some(Value::Null) => w.write_u8(0)?,
                Some(value) => {
                    w.write_u8(1)?;
                    self.write_value(value, w, cancel)?;
                }
            }
        }

        Ok(())
    }

    fn write_value(
        &self,
        value: &Value,
        w: &mut Writer<'_>,
        cancel: &CancelToken,
    ) -> Result<(), CodecError> {
        match value {
            Value::Null => {
                // presence flags are owned by the container layer
                return Err(CodecError::invalid("null value reached the value writer"));
            }
            Value::Bool(v) => w.write_u8(u8::from(*v))?,
            Value::I8(v) => w.write_i8(*v)?,
            Value::I16(v) => w.write_i16(*v)?,
            Value::I32(v) => w.write_i32(*v)?,
            Value::I64(v) => w.write_i64(*v)?,
            Value::U8(v) => w.write_u8(*v)?,
            Value::U16(v) => w.write_u16(*v)?,
            Value::U32(v) => w.write_u32(*v)?,
            Value::U64(v) => w.write_u64(*v)?,
            Value::F32(v) => w.write_f32(v.get())?,
            Value::F64(v) => w.write_f64(v.get())?,
            Value::Timestamp(v) => w.write_i64(v.timestamp_micros())?,
            Value::Text(v) => w.write_len_prefixed(v.as_bytes())?,
            Value::Bytes(v) => w.write_len_prefixed(v)?,
            Value::Nested(nested) => {
                // nested records carry no outer length prefix; writing is
                // driven by the items themselves, reading by the schema
                for item in nested.as_ref() {
                    if item.field.is_relation_many() {
                        continue;
                    }
                    if cancel.is_cancelled() {
                        return Err(CodecError::Cancelled);
                    }
                    match &item.value {
                        Value::Null => w.write_u8(0)?,
                        value => {
                            w.write_u8(1)?;
                            self.write_value(value, w, cancel)?;
                        }
                    }
                }
            }
            Value::List(elements) => {
                w.write_u32(elements.len() as u32)?;
                for element in elements {
                    if cancel.is_cancelled() {
                        return Err(CodecError::Cancelled);
                    }
                    match element {
                        Value::Null => w.write_u8(0)?,
                        value => {
                            w.write_u8(1)?;
                            self.write_value(value, w, cancel)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn read_container(
        &self,
        fields: &[Arc<Field>],
        r: &mut Reader<'_>,
        cancel: &CancelToken,
    ) -> Result<ItemCollection, CodecError> {
        let mut items = ItemCollection::with_capacity(fields.len());

        for field in fields {
            if field.is_relation_many() {
                items.add(Item::new(Arc::clone(field), Value::Null))?;
                continue;
            }
            if cancel.is_cancelled() {
                return Err(CodecError::Cancelled);
            }

            let present = r.read_u8()? != 0;
            let value = if present {
                self.read_value(&slot_for(field)?, r, cancel)?
            } else {
                Value::Null
            };

            items.add(Item::new(Arc::clone(field), value))?;
        }

        Ok(items)
    }

    fn read_value(
        &self,
        slot: &Slot,
        r: &mut Reader<'_>,
        cancel: &CancelToken,
    ) -> Result<Value, CodecError> {
        match slot {
            Slot::Scalar(kind) => read_scalar(*kind, r),
            Slot::Nested(handle) => {
                let schema = handle.resolve(&self.registry)?;
                let nested = self.read_container(schema.fields(), r, cancel)?;
                Ok(Value::from(nested))
            }
            Slot::List { element, schema } => {
                let count = r.read_u32()? as usize;
                let mut elements = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    if cancel.is_cancelled() {
                        return Err(CodecError::Cancelled);
                    }

                    let present = r.read_u8()? != 0;
                    if !present {
                        elements.push(Value::Null);
                        continue;
                    }

                    let value = if *element == ValueKind::Nested {
                        let handle = schema.as_ref().ok_or_else(|| {
                            CodecError::invalid("nested list element has no schema")
                        })?;
                        let inner = handle.resolve(&self.registry)?;
                        Value::from(self.read_container(inner.fields(), r, cancel)?)
                    } else {
                        read_scalar(*element, r)?
                    };
                    elements.push(value);
                }

                Ok(Value::List(elements))
            }
        }
    }
}

impl Serializer for BinarySerializer {
    fn file_extension(&self) -> &'static str {
        "bin"
    }

    fn serialize(
        &self,
        schema: &Schema,
        items: &ItemCollection,
        out: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<(), CodecError> {
        let mut w = Writer::new(out);
        self.write_container(schema.fields(), items, &mut w, cancel)
    }

    fn deserialize(
        &self,
        schema: &Schema,
        input: &mut dyn Read,
        cancel: &CancelToken,
    ) -> Result<ItemCollection, CodecError> {
        let mut r = Reader::new(input);
        self.read_container(schema.fields(), &mut r, cancel)
    }
}

// Wire slot descriptor for one readable position.
enum Slot {
    Scalar(ValueKind),
    Nested(SchemaHandle),
    List {
        element: ValueKind,
        schema: Option<SchemaHandle>,
    },
}

fn slot_for(field: &Field) -> Result<Slot, CodecError> {
    match field.kind() {
        ValueKind::Nested => field
            .inner_schema()
            .map(Slot::Nested)
            .ok_or_else(|| CodecError::invalid("nested field has no inner schema")),
        ValueKind::List => field.list_element().map_or_else(
            || {
                Err(CodecError::Unsupported {
                    message: format!(
                        "collection field '{}' has no decode strategy",
                        field.name()
                    ),
                })
            },
            |(element, schema)| Ok(Slot::List { element, schema }),
        ),
        // dynamic fields travel as tagged opaque bytes
        ValueKind::Dynamic => Ok(Slot::Scalar(ValueKind::Bytes)),
        kind => Ok(Slot::Scalar(kind)),
    }
}

fn read_scalar(kind: ValueKind, r: &mut Reader<'_>) -> Result<Value, CodecError> {
    let value = match kind {
        ValueKind::Bool => Value::Bool(r.read_u8()? != 0),
        ValueKind::I8 => Value::I8(r.read_i8()?),
        ValueKind::I16 => Value::I16(r.read_i16()?),
        ValueKind::I32 => Value::I32(r.read_i32()?),
        ValueKind::I64 => Value::I64(r.read_i64()?),
        ValueKind::U8 => Value::U8(r.read_u8()?),
        ValueKind::U16 => Value::U16(r.read_u16()?),
        ValueKind::U32 => Value::U32(r.read_u32()?),
        ValueKind::U64 => Value::U64(r.read_u64()?),
        ValueKind::F32 => Value::F32(
            Float32::try_new(r.read_f32()?)
                .ok_or_else(|| CodecError::invalid("non-finite f32 on the wire"))?,
        ),
        ValueKind::F64 => Value::F64(
            Float64::try_new(r.read_f64()?)
                .ok_or_else(|| CodecError::invalid("non-finite f64 on the wire"))?,
        ),
        ValueKind::Timestamp => {
            let micros = r.read_i64()?;
            Value::Timestamp(
                DateTime::from_timestamp_micros(micros)
                    .ok_or_else(|| CodecError::invalid("timestamp out of range"))?,
            )
        }
        ValueKind::Text => {
            let raw = r.read_len_prefixed()?;
            Value::Text(
                String::from_utf8(raw)
                    .map_err(|_| CodecError::invalid("invalid utf-8 text on the wire"))?,
            )
        }
        ValueKind::Bytes => Value::Bytes(r.read_len_prefixed()?),
        ValueKind::Null | ValueKind::Nested | ValueKind::List | ValueKind::Dynamic => {
            return Err(CodecError::invalid(format!(
                "kind {kind} is not a wire scalar"
            )));
        }
    };

    Ok(value)
}

/// Serialize an entity: field model first, then the positional format.
pub fn encode_entity<T: Record>(
    registry: &Arc<SchemaRegistry>,
    entity: &T,
    out: &mut dyn Write,
    cancel: &CancelToken,
) -> Result<(), CodecError> {
    let cx = ConvertContext::new(registry.as_ref());
    let schema = registry.get::<T>()?;
    let items = convert::to_items(&cx, entity)?;

    BinarySerializer::new(Arc::clone(registry)).serialize(&schema, &items, out, cancel)
}

/// Decode an entity: positional format first, then the field model.
pub fn decode_entity<T: Record>(
    registry: &Arc<SchemaRegistry>,
    input: &mut dyn Read,
    cancel: &CancelToken,
) -> Result<T, CodecError> {
    let cx = ConvertContext::new(registry.as_ref());
    let schema = registry.get::<T>()?;
    let items = BinarySerializer::new(Arc::clone(registry)).deserialize(&schema, input, cancel)?;

    Ok(convert::from_items(&cx, &items)?)
}

/// Flatten a structured representation into a wire row: scalar columns pass
/// through, nested and collection columns are pre-encoded as opaque blobs.
/// This translation is what lets a single relational row carry nested data.
pub fn ungroup(
    registry: &Arc<SchemaRegistry>,
    schema: &Schema,
    items: &ItemCollection,
    cancel: &CancelToken,
) -> Result<ItemCollection, CodecError> {
    let codec = BinarySerializer::new(Arc::clone(registry));

    let mut flat = ItemCollection::with_capacity(items.len());
    for field in schema.fields() {
        if field.is_relation_many() {
            continue;
        }

        let value = items
            .try_get(field.name())
            .map_or(Value::Null, |item| item.value.clone());

        let flat_value = if matches!(value, Value::Nested(_) | Value::List(_)) {
            let mut blob = Vec::new();
            let mut w = Writer::new(&mut blob);
            codec.write_value(&value, &mut w, cancel)?;
            drop(w);

            Value::Bytes(blob)
        } else {
            value
        };

        flat.add(Item::new(Arc::clone(field), flat_value))?;
    }

    Ok(flat)
}

/// Inverse of [`ungroup`]: rebuild nested items from their blob columns
/// using the schema's field metadata.
pub fn group(
    registry: &Arc<SchemaRegistry>,
    schema: &Schema,
    flat: &ItemCollection,
    cancel: &CancelToken,
) -> Result<ItemCollection, CodecError> {
    let codec = BinarySerializer::new(Arc::clone(registry));

    let mut structured = ItemCollection::with_capacity(schema.fields().len());
    for field in schema.fields() {
        if field.is_relation_many() {
            structured.add(Item::new(Arc::clone(field), Value::Null))?;
            continue;
        }

        let value = flat
            .try_get(field.name())
            .map_or(Value::Null, |item| item.value.clone());

        let structured_value = match (field.kind(), value) {
            (ValueKind::Nested | ValueKind::List, Value::Bytes(blob)) => {
                let mut cursor = Cursor::new(blob);
                let mut r = Reader::new(&mut cursor);
                codec.read_value(&slot_for(field)?, &mut r, cancel)?
            }
            (_, value) => value,
        };

        structured.add(Item::new(Arc::clone(field), structured_value))?;
    }

    Ok(structured)
}
