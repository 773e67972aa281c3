use crate::{
    cancel::CancelToken,
    codec::{
        BinarySerializer, CodecError, Serializer, SerializerProvider,
        binary::{self, decode_entity, encode_entity},
    },
    schema::{
        Record, SchemaBuilder, SchemaRegistry,
        convert::{self, ConvertContext, expect_i32},
    },
    value::{Value, ValueKind},
};
use proptest::prelude::*;
use std::{io::Cursor, sync::Arc};

#[derive(Clone, Debug, Default, PartialEq)]
struct Doc {
    id: i32,
    name: Option<String>,
    tags: Vec<String>,
}

impl Record for Doc {
    const NAME: &'static str = "Doc";

    fn describe(schema: &mut SchemaBuilder<'_, Self>) {
        schema
            .field("Id", ValueKind::I32)
            .identity()
            .get(|d| Value::from(d.id))
            .set(|d, v| {
                d.id = match v {
                    Value::Null => 0,
                    other => expect_i32(&other)?,
                };
                Ok(())
            });

        schema
            .field("Name", ValueKind::Text)
            .get(|d| Value::from(d.name.clone()))
            .set(|d, v| {
                d.name = v.as_str().map(ToString::to_string);
                Ok(())
            });

        schema
            .list_field("Tags", ValueKind::Text)
            .get(|d| Value::List(d.tags.iter().map(|t| Value::from(t.clone())).collect()))
            .set(|d, v| {
                d.tags = match v {
                    Value::Null => Vec::new(),
                    Value::List(elements) => elements
                        .iter()
                        .filter_map(|e| e.as_str().map(ToString::to_string))
                        .collect(),
                    _ => Vec::new(),
                };
                Ok(())
            });
    }

    fn new_record() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Inner {
    a: i32,
    b: Option<String>,
}

impl Record for Inner {
    const NAME: &'static str = "Inner";

    fn describe(schema: &mut SchemaBuilder<'_, Self>) {
        schema
            .field("A", ValueKind::I32)
            .get(|i| Value::from(i.a))
            .set(|i, v| {
                i.a = match v {
                    Value::Null => 0,
                    other => expect_i32(&other)?,
                };
                Ok(())
            });

        schema
            .field("B", ValueKind::Text)
            .get(|i| Value::from(i.b.clone()))
            .set(|i, v| {
                i.b = v.as_str().map(ToString::to_string);
                Ok(())
            });
    }

    fn new_record() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Outer {
    id: i32,
    inner: Option<Inner>,
}

impl Record for Outer {
    const NAME: &'static str = "Outer";

    fn describe(schema: &mut SchemaBuilder<'_, Self>) {
        schema
            .field("Id", ValueKind::I32)
            .identity()
            .get(|o| Value::from(o.id))
            .set(|o, v| {
                o.id = match v {
                    Value::Null => 0,
                    other => expect_i32(&other)?,
                };
                Ok(())
            });

        schema.nested_field::<Inner>(
            "Inner",
            |o| o.inner.clone(),
            |o, inner| o.inner = inner,
        );
    }

    fn new_record() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, Default)]
struct WriteOnlySeq {
    values: Vec<i32>,
}

impl Record for WriteOnlySeq {
    const NAME: &'static str = "WriteOnlySeq";

    fn describe(schema: &mut SchemaBuilder<'_, Self>) {
        schema
            .collection_field("Values")
            .get(|s| Value::List(s.values.iter().map(|v| Value::from(*v)).collect()))
            .set(|_, _| Ok(()));
    }

    fn new_record() -> Self {
        Self::default()
    }
}

fn registry() -> Arc<SchemaRegistry> {
    Arc::new(SchemaRegistry::new())
}

#[test]
fn exact_wire_layout() {
    let registry = registry();
    let doc = Doc {
        id: 42,
        name: Some("abc".to_string()),
        tags: vec!["a".to_string(), "b".to_string()],
    };

    let mut out = Vec::new();
    encode_entity(&registry, &doc, &mut out, &CancelToken::new()).unwrap();

    #[rustfmt::skip]
    let expected: Vec<u8> = vec![
        // Id: present, i32 LE
        1, 42, 0, 0, 0,
        // Name: present, u32 length, bytes
        1, 3, 0, 0, 0, b'a', b'b', b'c',
        // Tags: present, u32 count, then per element presence + payload
        1, 2, 0, 0, 0,
        1, 1, 0, 0, 0, b'a',
        1, 1, 0, 0, 0, b'b',
    ];
    assert_eq!(out, expected);
}

#[test]
fn entity_round_trip() {
    let registry = registry();
    let doc = Doc {
        id: -7,
        name: Some("x".to_string()),
        tags: vec!["one".to_string(), "two".to_string()],
    };

    let mut out = Vec::new();
    encode_entity(&registry, &doc, &mut out, &CancelToken::new()).unwrap();

    let mut cursor = Cursor::new(out);
    let back: Doc = decode_entity(&registry, &mut cursor, &CancelToken::new()).unwrap();

    assert_eq!(back, doc);
}

#[test]
fn absent_value_is_one_presence_byte() {
    let registry = registry();
    let doc = Doc {
        id: 1,
        name: None,
        tags: Vec::new(),
    };

    let mut out = Vec::new();
    encode_entity(&registry, &doc, &mut out, &CancelToken::new()).unwrap();

    // Id present, Name absent, Tags present but empty
    assert_eq!(out, vec![1, 1, 0, 0, 0, 0, 1, 0, 0, 0, 0]);

    let mut cursor = Cursor::new(out);
    let back: Doc = decode_entity(&registry, &mut cursor, &CancelToken::new()).unwrap();
    assert_eq!(back, doc);
}

#[test]
fn nested_record_has_no_outer_length_prefix() {
    let registry = registry();
    let outer = Outer {
        id: 1,
        inner: Some(Inner {
            a: 2,
            b: Some("q".to_string()),
        }),
    };

    let mut out = Vec::new();
    encode_entity(&registry, &outer, &mut out, &CancelToken::new()).unwrap();

    #[rustfmt::skip]
    let expected: Vec<u8> = vec![
        // Id
        1, 1, 0, 0, 0,
        // Inner: presence, then the inner container inline
        1,
        1, 2, 0, 0, 0,
        1, 1, 0, 0, 0, b'q',
    ];
    assert_eq!(out, expected);

    let mut cursor = Cursor::new(out);
    let back: Outer = decode_entity(&registry, &mut cursor, &CancelToken::new()).unwrap();
    assert_eq!(back, outer);
}

#[test]
fn truncated_stream_is_fatal() {
    let registry = registry();
    let doc = Doc {
        id: 42,
        name: Some("abc".to_string()),
        tags: Vec::new(),
    };

    let mut out = Vec::new();
    encode_entity(&registry, &doc, &mut out, &CancelToken::new()).unwrap();
    out.truncate(out.len() - 2);

    let mut cursor = Cursor::new(out);
    let err = decode_entity::<Doc>(&registry, &mut cursor, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, CodecError::InsufficientStream { .. }));
}

#[test]
fn cancellation_stops_serialization() {
    let registry = registry();
    let doc = Doc::default();

    let cancel = CancelToken::new();
    cancel.cancel();

    let mut out = Vec::new();
    let err = encode_entity(&registry, &doc, &mut out, &cancel).unwrap_err();
    assert!(matches!(err, CodecError::Cancelled));
}

#[test]
fn generic_collection_decode_is_unsupported() {
    let registry = registry();
    let seq = WriteOnlySeq {
        values: vec![1, 2, 3],
    };

    let mut out = Vec::new();
    encode_entity(&registry, &seq, &mut out, &CancelToken::new()).unwrap();

    let schema = registry.get::<WriteOnlySeq>().unwrap();
    let codec = BinarySerializer::new(Arc::clone(&registry));

    let mut cursor = Cursor::new(out);
    let err = codec
        .deserialize(&schema, &mut cursor, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, CodecError::Unsupported { .. }));
}

#[test]
fn ungroup_flattens_nested_to_blob_and_group_restores() {
    let registry = registry();
    let cx = ConvertContext::new(registry.as_ref());
    let outer = Outer {
        id: 9,
        inner: Some(Inner {
            a: 4,
            b: None,
        }),
    };

    let schema = registry.get::<Outer>().unwrap();
    let items = convert::to_items(&cx, &outer).unwrap();

    let flat = binary::ungroup(&registry, &schema, &items, &CancelToken::new()).unwrap();
    assert_eq!(flat.value("Inner").unwrap().kind(), ValueKind::Bytes);

    let restored = binary::group(&registry, &schema, &flat, &CancelToken::new()).unwrap();
    assert_eq!(restored, items);
}

#[test]
fn provider_resolves_by_extension() {
    let registry = registry();
    let provider = SerializerProvider::with_binary(Arc::clone(&registry));

    assert!(provider.get("bin").is_some());
    assert!(provider.get("json").is_none());
}

proptest! {
    #[test]
    fn arbitrary_docs_round_trip(
        id in any::<i32>(),
        name in proptest::option::of(".{0,16}"),
        tags in proptest::collection::vec("[a-z]{0,8}", 0..8),
    ) {
        let registry = registry();
        let doc = Doc { id, name, tags };

        let mut out = Vec::new();
        encode_entity(&registry, &doc, &mut out, &CancelToken::new()).unwrap();

        let mut cursor = Cursor::new(out);
        let back: Doc = decode_entity(&registry, &mut cursor, &CancelToken::new()).unwrap();

        prop_assert_eq!(back, doc);
    }
}
