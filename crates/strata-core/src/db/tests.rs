use crate::{
    config::DatabaseConfig,
    db::{
        Database, EventKind, MemoryBackend, Ref, Related, StoreError, batch::BatchError,
    },
    schema::{Record, SchemaBuilder, SchemaRegistry, convert::expect_u32},
    value::{Value, ValueKind},
};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Default, PartialEq)]
struct Account {
    id: u32,
    name: String,
    email: Option<String>,
}

impl Record for Account {
    const NAME: &'static str = "Account";

    fn describe(schema: &mut SchemaBuilder<'_, Self>) {
        schema
            .field("Id", ValueKind::U32)
            .identity()
            .get(|a| Value::from(a.id))
            .set(|a, v| {
                a.id = match v {
                    Value::Null => 0,
                    other => expect_u32(&other)?,
                };
                Ok(())
            });

        schema
            .field("Name", ValueKind::Text)
            .get(|a| Value::from(a.name.clone()))
            .set(|a, v| {
                a.name = v.as_str().unwrap_or_default().to_string();
                Ok(())
            });

        schema
            .field("Email", ValueKind::Text)
            .indexed()
            .get(|a| Value::from(a.email.clone()))
            .set(|a, v| {
                a.email = v.as_str().map(ToString::to_string);
                Ok(())
            });
    }

    fn new_record() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Pet {
    id: u32,
    owner_id: u32,
    name: String,
}

impl Record for Pet {
    const NAME: &'static str = "Pet";

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
            .relation_field::<Owner>("OwnerId", ValueKind::U32)
            .get(|p| Value::from(p.owner_id))
            .set(|p, v| {
                p.owner_id = match v {
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
    }

    fn new_record() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug)]
struct Owner {
    id: u32,
    name: String,
    pets: Related<Pet>,
}

impl Record for Owner {
    const NAME: &'static str = "Owner";

    fn describe(schema: &mut SchemaBuilder<'_, Self>) {
        schema
            .field("Id", ValueKind::U32)
            .identity()
            .get(|o| Value::from(o.id))
            .set(|o, v| {
                o.id = match v {
                    Value::Null => 0,
                    other => expect_u32(&other)?,
                };
                Ok(())
            });

        schema
            .field("Name", ValueKind::Text)
            .get(|o| Value::from(o.name.clone()))
            .set(|o, v| {
                o.name = v.as_str().unwrap_or_default().to_string();
                Ok(())
            });

        schema.relation_many_field::<Pet>("Pets", |o, owner| o.pets.bind(owner));
    }

    fn new_record() -> Self {
        Self {
            id: 0,
            name: String::new(),
            pets: Related::new("OwnerId"),
        }
    }
}

fn setup() -> (Database, MemoryBackend) {
    setup_with(DatabaseConfig::default())
}

fn setup_with(config: DatabaseConfig) -> (Database, MemoryBackend) {
    let registry = Arc::new(SchemaRegistry::new());
    let backend = MemoryBackend::new();
    let db = Database::new(registry, Arc::new(backend.clone()), config);

    (db, backend)
}

fn account(id: u32, name: &str) -> Account {
    Account {
        id,
        name: name.to_string(),
        email: Some(format!("{name}@example.com")),
    }
}

#[test]
fn insert_and_select_round_trip() {
    let (db, backend) = setup();

    let a = account(1, "ada");
    db.insert(&a).unwrap();
    assert_eq!(backend.raw_len("Account"), 1);

    let loaded: Account = db.select(&Value::U32(1)).unwrap();
    assert_eq!(loaded, a);
}

#[test]
fn duplicate_insert_is_a_conflict() {
    let (db, _) = setup();

    db.insert(&account(1, "ada")).unwrap();
    let err = db.insert(&account(1, "bob")).unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { .. }));
}

#[test]
fn select_hits_cache_until_invalidated() {
    let (db, backend) = setup();
    let registry = Arc::clone(db.registry());

    db.insert(&account(1, "ada")).unwrap();
    let _warm: Account = db.select(&Value::U32(1)).unwrap();
    assert_eq!(db.inner.cache.len(), 1);

    // remove the row behind this facade's back; its cache still serves
    let other = Database::new(
        registry,
        Arc::new(backend.clone()),
        DatabaseConfig::default(),
    );
    other.delete::<Account>(&Value::U32(1)).unwrap();
    assert_eq!(backend.raw_len("Account"), 0);

    let cached: Account = db.select(&Value::U32(1)).unwrap();
    assert_eq!(cached.name, "ada");

    // a local delete invalidates, and the miss now surfaces
    let err = db.delete::<Account>(&Value::U32(1)).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn update_invalidates_cache() {
    let (db, _) = setup();

    db.insert(&account(1, "ada")).unwrap();
    let _warm: Account = db.select(&Value::U32(1)).unwrap();

    let mut changed = account(1, "ada");
    changed.name = "grace".to_string();
    db.update(&changed).unwrap();

    let loaded: Account = db.select(&Value::U32(1)).unwrap();
    assert_eq!(loaded.name, "grace");
}

#[test]
fn update_of_missing_row_is_not_found() {
    let (db, _) = setup();

    let err = db.update(&account(9, "ghost")).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn failed_load_leaves_cache_empty() {
    let (db, _) = setup();

    let err = db.select::<Account>(&Value::U32(404)).unwrap_err();
    assert!(err.is_not_found());

    db.insert(&account(404, "late")).unwrap();
    let loaded: Account = db.select(&Value::U32(404)).unwrap();
    assert_eq!(loaded.name, "late");
}

#[test]
fn count_and_select_all() {
    let (db, _) = setup();

    for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
        db.insert(&account(id, name)).unwrap();
    }

    assert_eq!(db.count::<Account>().unwrap(), 3);
    assert_eq!(db.select_all::<Account>().unwrap().len(), 3);
}

#[test]
fn select_by_indexed_field_and_caches_the_hit() {
    let (db, _) = setup();

    db.insert(&account(1, "ada")).unwrap();
    db.insert(&account(2, "bob")).unwrap();
    db.clear_cache();

    let found: Account = db
        .select_by("Email", &Value::from("ada@example.com".to_string()))
        .unwrap();
    assert_eq!(found.id, 1);
    assert_eq!(db.inner.cache.len(), 1);

    // second lookup is served from the alias entry
    let again: Account = db
        .select_by("Email", &Value::from("ada@example.com".to_string()))
        .unwrap();
    assert_eq!(again, found);

    let miss = db
        .select_by::<Account>("Email", &Value::from("nobody@example.com".to_string()))
        .unwrap_err();
    assert!(miss.is_not_found());

    let err = db
        .select_by::<Account>("Emial", &Value::from("ada@example.com".to_string()))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownField { .. }));
}

#[test]
fn select_range_orders_before_windowing() {
    let (db, _) = setup();

    for (id, name) in [(1, "carol"), (2, "ada"), (3, "bob")] {
        db.insert(&account(id, name)).unwrap();
    }

    let ascending: Vec<Account> = db.select_range(0, 2, Some("Name"), false).unwrap();
    assert_eq!(
        ascending.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
        vec!["ada", "bob"]
    );

    let descending: Vec<Account> = db.select_range(0, 2, Some("Name"), true).unwrap();
    assert_eq!(
        descending.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
        vec!["carol", "bob"]
    );

    // unordered windows walk identity order
    let tail: Vec<Account> = db.select_range(2, 10, None, false).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].id, 3);

    let err = db
        .select_range::<Account>(0, 1, Some("Nmae"), false)
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownField { .. }));
}

#[test]
fn update_fields_touches_only_named_columns() {
    let (db, _) = setup();

    db.insert(&account(1, "ada")).unwrap();

    let mut changed = account(1, "grace");
    changed.email = Some("other@example.com".to_string());
    db.update_fields(&changed, &["Name"]).unwrap();

    let loaded: Account = db.select(&Value::U32(1)).unwrap();
    assert_eq!(loaded.name, "grace");
    assert_eq!(loaded.email.as_deref(), Some("ada@example.com"));

    let err = db.update_fields(&changed, &["Nope"]).unwrap_err();
    assert!(matches!(err, StoreError::UnknownField { .. }));
}

#[test]
fn delete_by_removes_every_match() {
    let (db, _) = setup();

    for (id, owner_id) in [(1, 1), (2, 1), (3, 2)] {
        db.insert(&Pet {
            id,
            owner_id,
            name: format!("pet{id}"),
        })
        .unwrap();
    }

    assert_eq!(db.delete_by::<Pet>("OwnerId", &Value::U32(1)).unwrap(), 2);
    assert_eq!(db.count::<Pet>().unwrap(), 1);

    // zero matches is not an error
    assert_eq!(db.delete_by::<Pet>("OwnerId", &Value::U32(9)).unwrap(), 0);
}

#[test]
fn insert_publishes_under_the_identity_key() {
    let (db, backend) = setup();
    let registry = Arc::clone(db.registry());

    db.insert(&account(1, "ada")).unwrap();
    assert_eq!(db.inner.cache.len(), 1);

    // remove the row behind this facade's back; the created entity is
    // still served from its cache entry
    let other = Database::new(
        registry,
        Arc::new(backend.clone()),
        DatabaseConfig::default(),
    );
    other.delete::<Account>(&Value::U32(1)).unwrap();

    let cached: Account = db.select(&Value::U32(1)).unwrap();
    assert_eq!(cached.name, "ada");
}

#[test]
fn bulk_reads_hydrate_the_cache() {
    let (db, _) = setup();

    db.insert(&account(1, "ada")).unwrap();
    db.insert(&account(2, "bob")).unwrap();
    db.clear_cache();

    let all: Vec<Account> = db.select_all().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(db.inner.cache.len(), 2);

    db.clear_cache();
    let window: Vec<Account> = db.select_range(0, 1, Some("Name"), false).unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(db.inner.cache.len(), 1);
}

#[test]
fn clear_cache_drops_every_entry() {
    let (db, _) = setup();

    db.insert(&account(1, "ada")).unwrap();
    let _warm: Account = db.select(&Value::U32(1)).unwrap();
    assert_eq!(db.inner.cache.len(), 1);

    db.clear_cache();
    assert_eq!(db.inner.cache.len(), 0);
}

#[test]
fn delete_all_is_gated_by_config() {
    let (db, _) = setup();
    db.insert(&account(1, "ada")).unwrap();

    let err = db.delete_all::<Account>().unwrap_err();
    assert!(matches!(err, StoreError::DeleteAllDisabled { .. }));

    let (open, _) = setup_with(DatabaseConfig {
        allow_delete_all: true,
        ..DatabaseConfig::default()
    });
    open.insert(&account(1, "ada")).unwrap();
    open.insert(&account(2, "bob")).unwrap();

    assert_eq!(open.delete_all::<Account>().unwrap(), 2);
    assert_eq!(open.count::<Account>().unwrap(), 0);
}

#[test]
fn batch_commit_applies_everything() {
    let (db, backend) = setup();

    let mut batch = db.begin_batch();
    batch.insert(&account(1, "a")).unwrap();
    batch.insert(&account(2, "b")).unwrap();
    assert_eq!(backend.raw_len("Account"), 0);

    batch.commit().unwrap();
    assert_eq!(backend.raw_len("Account"), 2);
    batch.end().unwrap();
}

#[test]
fn batch_rolls_back_as_one_transaction() {
    let (db, backend) = setup();

    let mut batch = db.begin_batch();
    batch.insert(&account(1, "a")).unwrap();
    batch.insert(&account(1, "dup")).unwrap();

    let err = batch.commit().unwrap_err();
    assert!(matches!(err, BatchError::Action { .. }));

    // nothing from the failed transaction is visible
    assert_eq!(backend.raw_len("Account"), 0);

    batch.discard();
    batch.end().unwrap();
}

#[test]
fn batch_end_refuses_pending_actions() {
    let (db, _) = setup();

    let mut batch = db.begin_batch();
    batch.insert(&account(1, "a")).unwrap();

    let err = batch.end().unwrap_err();
    assert!(matches!(err, BatchError::PendingActions { count: 1 }));
}

#[test]
fn flush_queue_drains_on_flush_now() {
    let (db, backend) = setup();

    db.queue_insert(&account(1, "a"), false).unwrap();
    db.queue_insert(&account(2, "b"), false).unwrap();
    assert_eq!(db.pending_flush(), 2);

    db.flush_now();
    assert_eq!(db.pending_flush(), 0);
    assert_eq!(backend.raw_len("Account"), 2);
    assert!(db.take_flush_errors().is_empty());
}

#[test]
fn flush_errors_are_collected_not_raised() {
    let (db, backend) = setup();
    backend.fail_writes("Account");

    db.queue_insert(&account(1, "a"), false).unwrap();
    db.flush_now();

    let errors = db.take_flush_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].entity, "Account");

    // collected once, then gone
    assert!(db.take_flush_errors().is_empty());
}

#[test]
fn break_on_error_abandons_the_rest_of_the_chunk() {
    let (db, backend) = setup();
    backend.fail_writes("Account");

    db.queue_insert(&account(1, "a"), true).unwrap();
    db.queue_insert(
        &Pet {
            id: 1,
            owner_id: 1,
            name: "rex".to_string(),
        },
        false,
    )
    .unwrap();

    db.flush_now();

    let errors = db.take_flush_errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(backend.raw_len("Pet"), 0);
}

#[test]
fn break_on_error_replays_the_actions_before_the_failure() {
    let (db, backend) = setup();
    backend.fail_writes("Account");

    db.queue_insert(
        &Pet {
            id: 1,
            owner_id: 1,
            name: "rex".to_string(),
        },
        false,
    )
    .unwrap();
    db.queue_insert(&account(1, "a"), true).unwrap();
    db.queue_insert(
        &Pet {
            id: 2,
            owner_id: 1,
            name: "tom".to_string(),
        },
        false,
    )
    .unwrap();

    db.flush_now();

    // the leading insert was rolled back with the transaction and must
    // land again; only the failure and the abandoned tail are reported
    assert_eq!(backend.raw_len("Pet"), 1);

    let errors = db.take_flush_errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].entity, "Account");
    assert_eq!(errors[1].entity, "Pet");
}

#[test]
fn flush_replays_neighbours_around_a_nonbreak_failure() {
    let (db, backend) = setup();
    backend.fail_writes("Account");

    for id in [1, 2] {
        db.queue_insert(
            &Pet {
                id,
                owner_id: 1,
                name: format!("pet{id}"),
            },
            false,
        )
        .unwrap();
    }
    db.queue_insert(&account(1, "a"), false).unwrap();
    for id in [3, 4] {
        db.queue_insert(
            &Pet {
                id,
                owner_id: 1,
                name: format!("pet{id}"),
            },
            false,
        )
        .unwrap();
    }

    db.flush_now();

    // every neighbour lands; only the failing action is reported
    assert_eq!(backend.raw_len("Pet"), 4);

    let errors = db.take_flush_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].entity, "Account");
}

#[test]
fn events_fire_after_mutations_land() {
    let (db, _) = setup();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = db.subscribe(move |event| {
        sink.lock().unwrap().push((event.kind, event.identity.clone()));
    });

    db.insert(&account(1, "a")).unwrap();
    let mut changed = account(1, "a");
    changed.name = "b".to_string();
    db.update(&changed).unwrap();
    db.delete::<Account>(&Value::U32(1)).unwrap();

    db.unsubscribe(id);
    db.insert(&account(2, "silent")).unwrap();

    let events = seen.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            (EventKind::Added, Value::U32(1)),
            (EventKind::Updated, Value::U32(1)),
            (EventKind::Removed, Value::U32(1)),
        ]
    );
}

#[test]
fn related_bulk_load_is_keyed_by_identity() {
    let (db, _) = setup();

    db.insert(&Owner {
        id: 1,
        name: "ada".to_string(),
        pets: Related::new("OwnerId"),
    })
    .unwrap();

    for (id, owner_id, name) in [(1, 1, "rex"), (2, 1, "tom"), (3, 2, "ray")] {
        db.insert(&Pet {
            id,
            owner_id,
            name: name.to_string(),
        })
        .unwrap();
    }

    let mut owner: Owner = db.select(&Value::U32(1)).unwrap();
    assert_eq!(owner.pets.owner(), Some(&Value::U32(1)));
    assert!(!owner.pets.is_loaded());

    assert_eq!(owner.pets.load(&db).unwrap(), 2);
    assert_eq!(owner.pets.get(&Value::U32(2)).unwrap().name, "tom");
    assert!(owner.pets.get(&Value::U32(3)).is_none());
}

#[test]
fn related_paged_iteration_is_forward_only() {
    let (db, _) = setup_with(DatabaseConfig {
        page_size: 2,
        ..DatabaseConfig::default()
    });

    db.insert(&Owner {
        id: 1,
        name: "ada".to_string(),
        pets: Related::new("OwnerId"),
    })
    .unwrap();
    for id in 1..=3 {
        db.insert(&Pet {
            id,
            owner_id: 1,
            name: format!("pet{id}"),
        })
        .unwrap();
    }

    let mut owner: Owner = db.select(&Value::U32(1)).unwrap();

    assert_eq!(owner.pets.next_page(&db).unwrap().len(), 2);
    assert_eq!(owner.pets.next_page(&db).unwrap().len(), 1);
    assert!(owner.pets.next_page(&db).unwrap().is_empty());

    owner.pets.restart();
    assert_eq!(owner.pets.next_page(&db).unwrap().len(), 2);
}

#[test]
fn related_write_through_keeps_local_map_coherent() {
    let (db, _) = setup();

    db.insert(&Owner {
        id: 1,
        name: "ada".to_string(),
        pets: Related::new("OwnerId"),
    })
    .unwrap();

    let mut owner: Owner = db.select(&Value::U32(1)).unwrap();
    owner.pets.load(&db).unwrap();

    owner
        .pets
        .add(
            &db,
            &Pet {
                id: 5,
                owner_id: 1,
                name: "rex".to_string(),
            },
        )
        .unwrap();
    assert_eq!(owner.pets.len(), 1);
    assert_eq!(db.count::<Pet>().unwrap(), 1);

    owner.pets.remove(&db, &Value::U32(5)).unwrap();
    assert!(owner.pets.is_empty());
    assert_eq!(db.count::<Pet>().unwrap(), 0);
}

#[test]
fn ref_resolves_lazily_and_invalidates() {
    let (db, _) = setup();

    db.insert(&Owner {
        id: 1,
        name: "ada".to_string(),
        pets: Related::new("OwnerId"),
    })
    .unwrap();

    let mut link: Ref<Owner> = Ref::new();
    assert!(link.resolve(&db).unwrap().is_none());

    link.set_identity(Some(Value::U32(1)));
    assert_eq!(link.resolve(&db).unwrap().unwrap().name, "ada");

    let mut changed = Owner {
        id: 1,
        name: "grace".to_string(),
        pets: Related::new("OwnerId"),
    };
    changed.pets.bind(Value::U32(1));
    db.update(&changed).unwrap();

    // still the cached snapshot until invalidated
    assert_eq!(link.resolve(&db).unwrap().unwrap().name, "ada");
    link.invalidate();
    assert_eq!(link.resolve(&db).unwrap().unwrap().name, "grace");
}
