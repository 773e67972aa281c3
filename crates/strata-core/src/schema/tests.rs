use crate::{
    schema::{
        Converter, Record, SchemaBuilder, SchemaError, SchemaRegistry, ValueConverter,
        convert::{self, ConvertContext, ConvertError, expect_u32},
    },
    value::{Value, ValueKind},
};
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq)]
struct Player {
    id: u32,
    name: String,
    score: Option<i64>,
}

impl Record for Player {
    const NAME: &'static str = "Player";

    fn describe(schema: &mut SchemaBuilder<'_, Self>) {
        schema
            .field("Id", ValueKind::U32)
            .identity()
            .get(|p| Value::from(p.id))
            .set(|p, v| {
                p.id = match v {
                    Value::Null => 0,
                    other => expect_u32(&other)?,
                };
                Ok(())
            });

        schema
            .field("Name", ValueKind::Text)
            .get(|p| Value::from(p.name.clone()))
            .set(|p, v| {
                p.name = v.as_str().unwrap_or_default().to_string();
                Ok(())
            });

        schema
            .field("Score", ValueKind::I64)
            .get(|p| Value::from(p.score))
            .set(|p, v| {
                p.score = v.as_i64();
                Ok(())
            });
    }

    fn new_record() -> Self {
        Self::default()
    }
}

// Self-referential: the child field points back at the same schema.
#[derive(Clone, Debug, Default, PartialEq)]
struct TreeNode {
    id: u32,
    child: Option<Box<TreeNode>>,
}

impl Record for TreeNode {
    const NAME: &'static str = "TreeNode";

    fn describe(schema: &mut SchemaBuilder<'_, Self>) {
        schema
            .field("Id", ValueKind::U32)
            .identity()
            .get(|n| Value::from(n.id))
            .set(|n, v| {
                n.id = match v {
                    Value::Null => 0,
                    other => expect_u32(&other)?,
                };
                Ok(())
            });

        schema.nested_field::<Self>(
            "Child",
            |n| n.child.as_deref().cloned(),
            |n, child| n.child = child.map(Box::new),
        );
    }

    fn new_record() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, Default)]
struct BrokenDuplicate;

impl Record for BrokenDuplicate {
    const NAME: &'static str = "BrokenDuplicate";

    fn describe(schema: &mut SchemaBuilder<'_, Self>) {
        schema
            .field("A", ValueKind::I32)
            .get(|_| Value::I32(0))
            .set(|_, _| Ok(()));
        schema
            .field("A", ValueKind::I32)
            .get(|_| Value::I32(0))
            .set(|_, _| Ok(()));
    }

    fn new_record() -> Self {
        Self
    }
}

#[derive(Clone, Debug, Default)]
struct MissingAccessor;

impl Record for MissingAccessor {
    const NAME: &'static str = "MissingAccessor";

    fn describe(schema: &mut SchemaBuilder<'_, Self>) {
        schema.field("Orphan", ValueKind::I32);
    }

    fn new_record() -> Self {
        Self
    }
}

// Appends a direction marker so chain ordering is observable.
struct Tag(&'static str);

impl ValueConverter for Tag {
    fn to_instance(
        &self,
        _cx: &ConvertContext<'_>,
        _field: &crate::schema::Field,
        value: Value,
    ) -> Result<Value, ConvertError> {
        let text = value.as_str().unwrap_or_default();
        Ok(Value::from(format!("{text}>{}", self.0)))
    }

    fn to_source(
        &self,
        _cx: &ConvertContext<'_>,
        _field: &crate::schema::Field,
        value: Value,
    ) -> Result<Value, ConvertError> {
        let text = value.as_str().unwrap_or_default();
        Ok(Value::from(format!("{text}<{}", self.0)))
    }
}

#[derive(Clone, Debug, Default)]
struct Chained {
    v: String,
}

impl Record for Chained {
    const NAME: &'static str = "Chained";

    fn describe(schema: &mut SchemaBuilder<'_, Self>) {
        schema
            .field("V", ValueKind::Text)
            .chain(vec![
                Converter::custom(Arc::new(Tag("a"))),
                Converter::custom(Arc::new(Tag("b"))),
            ])
            .get(|c| Value::from(c.v.clone()))
            .set(|c, v| {
                c.v = v.as_str().unwrap_or_default().to_string();
                Ok(())
            });
    }

    fn new_record() -> Self {
        Self::default()
    }
}

#[test]
fn derivation_is_cached_and_shared() {
    let registry = SchemaRegistry::new();

    let first = registry.get::<Player>().unwrap();
    let second = registry.get::<Player>().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name(), "Player");
    assert_eq!(first.identity_field().unwrap().name(), "Id");
}

#[test]
fn concurrent_first_access_observes_one_schema() {
    let registry = Arc::new(SchemaRegistry::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.get::<Player>().unwrap())
        })
        .collect();

    let schemas: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for schema in &schemas {
        assert!(Arc::ptr_eq(schema, &schemas[0]));
    }
}

#[test]
fn validation_failure_is_fatal_and_replayed() {
    let registry = SchemaRegistry::new();

    let first = registry.get::<BrokenDuplicate>().unwrap_err();
    assert!(matches!(first, SchemaError::DuplicateFieldName { .. }));

    // same failure again, never re-derived into something else
    let second = registry.get::<BrokenDuplicate>().unwrap_err();
    assert!(matches!(second, SchemaError::DuplicateFieldName { .. }));
}

#[test]
fn field_without_accessor_fails_validation() {
    let registry = SchemaRegistry::new();

    let err = registry.get::<MissingAccessor>().unwrap_err();
    assert!(matches!(err, SchemaError::MissingAccessor { .. }));
}

#[test]
fn self_referential_schema_terminates() {
    let registry = SchemaRegistry::new();

    let schema = registry.get::<TreeNode>().unwrap();
    let child = schema.field("Child").unwrap();
    assert_eq!(child.inner_schema().unwrap().name(), "TreeNode");
}

#[test]
fn self_referential_round_trip() {
    let registry = SchemaRegistry::new();
    let cx = ConvertContext::new(&registry);

    let node = TreeNode {
        id: 1,
        child: Some(Box::new(TreeNode { id: 2, child: None })),
    };

    let items = convert::to_items(&cx, &node).unwrap();
    let back: TreeNode = convert::from_items(&cx, &items).unwrap();

    assert_eq!(back, node);
}

#[test]
fn chain_runs_ascending_in_and_descending_out() {
    let registry = SchemaRegistry::new();
    let cx = ConvertContext::new(&registry);

    let schema = registry.get::<Chained>().unwrap();
    let field = schema.field("V").unwrap();

    let instance = field.to_instance(&cx, Value::from("x")).unwrap();
    assert_eq!(instance, Value::from("x>a>b"));

    let source = field.to_source(&cx, Value::from("x")).unwrap();
    assert_eq!(source, Value::from("x<b<a"));
}

#[test]
fn null_short_circuits_the_chain() {
    let registry = SchemaRegistry::new();
    let cx = ConvertContext::new(&registry);

    let schema = registry.get::<Chained>().unwrap();
    let field = schema.field("V").unwrap();

    assert_eq!(field.to_instance(&cx, Value::Null).unwrap(), Value::Null);
    assert_eq!(field.to_source(&cx, Value::Null).unwrap(), Value::Null);
}

#[test]
fn entity_round_trip_through_items() {
    let registry = SchemaRegistry::new();
    let cx = ConvertContext::new(&registry);

    let player = Player {
        id: 7,
        name: "ada".to_string(),
        score: Some(42),
    };

    let items = convert::to_items(&cx, &player).unwrap();
    assert_eq!(items.value("Id").unwrap(), &Value::U32(7));
    assert_eq!(items.value("Score").unwrap(), &Value::I64(42));

    let back: Player = convert::from_items(&cx, &items).unwrap();
    assert_eq!(back, player);
}

#[test]
fn absent_items_read_as_null() {
    let registry = SchemaRegistry::new();
    let cx = ConvertContext::new(&registry);

    // only the identity is present
    let mut partial = crate::item::ItemCollection::new();
    let schema = registry.get::<Player>().unwrap();
    partial
        .add(crate::item::Item::new(
            Arc::clone(schema.field("Id").unwrap()),
            Value::U32(3),
        ))
        .unwrap();

    let player: Player = convert::from_items(&cx, &partial).unwrap();
    assert_eq!(player.id, 3);
    assert_eq!(player.name, "");
    assert_eq!(player.score, None);
}

#[test]
fn converter_override_applies_before_first_derivation() {
    let registry = SchemaRegistry::new();

    registry.register_converters::<Chained>(
        "V",
        vec![Converter::custom(Arc::new(Tag("override")))],
    );

    let cx = ConvertContext::new(&registry);
    let schema = registry.get::<Chained>().unwrap();
    let field = schema.field("V").unwrap();

    let instance = field.to_instance(&cx, Value::from("x")).unwrap();
    assert_eq!(instance, Value::from("x>override"));
}

#[test]
fn override_after_publication_is_ignored() {
    let registry = SchemaRegistry::new();

    let before = registry.get::<Chained>().unwrap();
    registry.register_converters::<Chained>(
        "V",
        vec![Converter::custom(Arc::new(Tag("late")))],
    );
    let after = registry.get::<Chained>().unwrap();

    assert!(Arc::ptr_eq(&before, &after));
}
