use crate::{
    error::{Error, ErrorClass, ErrorOrigin},
    schema::Field,
    value::Value,
};
use serde::{Serialize, Serializer as SerdeSerializer, ser::SerializeMap};
use std::{cmp::Ordering, collections::HashMap, hash::Hash, sync::Arc};
use thiserror::Error as ThisError;

///
/// ItemError
///

#[derive(Debug, ThisError)]
pub enum ItemError {
    #[error("field '{name}' already present in collection")]
    DuplicateField { name: String },

    #[error("field '{name}' not found in collection")]
    FieldNotFound { name: String },
}

impl ItemError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateField { .. } => ErrorClass::Conflict,
            Self::FieldNotFound { .. } => ErrorClass::NotFound,
        }
    }
}

impl From<ItemError> for Error {
    fn from(err: ItemError) -> Self {
        Self::new(err.class(), ErrorOrigin::Item, err.to_string())
    }
}

///
/// Item
///
/// One (field, value) pair. The field is shared metadata from the schema;
/// the value is owned by the collection.
///

#[derive(Clone, Debug)]
pub struct Item {
    pub field: Arc<Field>,
    pub value: Value,
}

impl Item {
    #[must_use]
    pub fn new(field: Arc<Field>, value: Value) -> Self {
        Self { field, value }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.field.name()
    }
}

// Item identity for IR comparison is (name, value); the converter chain and
// accessor behind the field do not participate.
impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name() && self.value == other.value
    }
}

impl Eq for Item {}

impl Hash for Item {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name().hash(state);
        self.value.hash(state);
    }
}

impl Ord for Item {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name()
            .cmp(other.name())
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

///
/// ItemCollection
///
/// The canonical intermediate representation: insertion-ordered (field,
/// value) pairs with a unique-name index. Every codec and every persistence
/// operation exchanges this type and nothing else.
///

#[derive(Clone, Debug, Default)]
pub struct ItemCollection {
    items: Vec<Item>,
    by_name: HashMap<String, usize>,
}

impl ItemCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            by_name: HashMap::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an item; duplicate names are rejected, not overwritten.
    pub fn add(&mut self, item: Item) -> Result<(), ItemError> {
        if self.by_name.contains_key(item.name()) {
            return Err(ItemError::DuplicateField {
                name: item.name().to_string(),
            });
        }

        self.by_name.insert(item.name().to_string(), self.items.len());
        self.items.push(item);

        Ok(())
    }

    /// Remove an item by name, keeping insertion order for the rest.
    pub fn remove(&mut self, name: &str) -> Result<Item, ItemError> {
        let pos = self
            .by_name
            .remove(name)
            .ok_or_else(|| ItemError::FieldNotFound {
                name: name.to_string(),
            })?;

        let item = self.items.remove(pos);
        for idx in self.by_name.values_mut() {
            if *idx > pos {
                *idx -= 1;
            }
        }

        Ok(item)
    }

    /// Indexed lookup; absence is an error (the `this[name]` contract).
    pub fn get(&self, name: &str) -> Result<&Item, ItemError> {
        self.try_get(name).ok_or_else(|| ItemError::FieldNotFound {
            name: name.to_string(),
        })
    }

    /// Indexed lookup; absence is `None`.
    #[must_use]
    pub fn try_get(&self, name: &str) -> Option<&Item> {
        self.by_name.get(name).map(|&idx| &self.items[idx])
    }

    /// Value lookup shorthand; absence is an error.
    pub fn value(&self, name: &str) -> Result<&Value, ItemError> {
        self.get(name).map(|item| &item.value)
    }

    /// Replace the value of an existing item in place.
    pub fn set_value(&mut self, name: &str, value: Value) -> Result<(), ItemError> {
        let pos = *self
            .by_name
            .get(name)
            .ok_or_else(|| ItemError::FieldNotFound {
                name: name.to_string(),
            })?;
        self.items[pos].value = value;

        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Deep copy: nested collections are cloned recursively, field metadata
    /// stays shared.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        let mut out = Self::with_capacity(self.items.len());
        for item in &self.items {
            // names are already unique in self
            let _ = out.add(Item::new(Arc::clone(&item.field), item.value.deep_clone()));
        }

        out
    }

    /// True when every value in the collection is null.
    #[must_use]
    pub fn all_null(&self) -> bool {
        self.items.iter().all(|item| item.value.is_null())
    }
}

impl PartialEq for ItemCollection {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl Eq for ItemCollection {}

impl Hash for ItemCollection {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.items.hash(state);
    }
}

impl Ord for ItemCollection {
    fn cmp(&self, other: &Self) -> Ordering {
        self.items.cmp(&other.items)
    }
}

impl PartialOrd for ItemCollection {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> IntoIterator for &'a ItemCollection {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

// Serializes as an ordered name→value map; used by diagnostics and the
// JSON-facing surfaces, never by the binary wire format.
impl Serialize for ItemCollection {
    fn serialize<S: SerdeSerializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.items.len()))?;
        for item in &self.items {
            map.serialize_entry(item.name(), &item.value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{schema::Field, value::ValueKind};

    fn field(name: &str) -> Arc<Field> {
        Arc::new(Field::bare(name, ValueKind::I32))
    }

    #[test]
    fn add_rejects_duplicate_names() {
        let mut items = ItemCollection::new();
        items.add(Item::new(field("a"), Value::I32(1))).unwrap();

        let err = items.add(Item::new(field("a"), Value::I32(2))).unwrap_err();
        assert!(matches!(err, ItemError::DuplicateField { .. }));

        // original value untouched
        assert_eq!(items.value("a").unwrap(), &Value::I32(1));
    }

    #[test]
    fn get_absent_is_error_try_get_is_none() {
        let items = ItemCollection::new();
        assert!(matches!(
            items.get("missing"),
            Err(ItemError::FieldNotFound { .. })
        ));
        assert!(items.try_get("missing").is_none());
    }

    #[test]
    fn remove_keeps_index_consistent() {
        let mut items = ItemCollection::new();
        for name in ["a", "b", "c"] {
            items.add(Item::new(field(name), Value::I32(0))).unwrap();
        }

        items.remove("b").unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items.items()[0].name(), "a");
        assert_eq!(items.items()[1].name(), "c");
        assert!(items.try_get("c").is_some());
    }

    #[test]
    fn deep_clone_copies_nested_collections() {
        let mut inner = ItemCollection::new();
        inner.add(Item::new(field("x"), Value::I32(7))).unwrap();

        let mut outer = ItemCollection::new();
        outer
            .add(Item::new(field("inner"), Value::from(inner)))
            .unwrap();

        let mut copy = outer.deep_clone();
        assert_eq!(copy, outer);

        copy.set_value("inner", Value::Null).unwrap();
        assert_ne!(copy, outer);
    }

    #[test]
    fn serializes_as_ordered_map() {
        let mut items = ItemCollection::new();
        items.add(Item::new(field("id"), Value::I32(42))).unwrap();
        items
            .add(Item::new(field("name"), Value::from("abc")))
            .unwrap();

        let json = serde_json::to_string(&items).unwrap();
        assert_eq!(json, r#"{"id":{"I32":42},"name":{"Text":"abc"}}"#);
    }
}
