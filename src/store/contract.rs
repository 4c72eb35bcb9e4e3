//! Behaviour every [`Store`] backend must share. Backends run the whole
//! suite through [`store_contract_tests!`](crate::store_contract_tests).

use serde_json::json;

use crate::store::{ListOptions, Record, Store};

const MONSTERS: &str = "/monsters/";

fn monster(name: &str, arms: i64) -> Record {
    Record::new()
        .with("id", name)
        .with("name", name)
        .with("arms", arms)
        .with("meta", json!({ "home": format!("{} land", name) }))
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string())
        .collect()
}

pub(crate) fn create_then_get(store: &dyn Store) {
    let created = store.create(MONSTERS, monster("dragon", 0)).unwrap();
    assert_eq!(created.id(), Some("dragon"));
    assert!(created.created().is_some());
    assert_eq!(created.created(), created.modified());

    let fetched = store.get(MONSTERS, "dragon").unwrap();
    assert_eq!(fetched, created);
    assert_eq!(fetched.get("meta"), Some(&json!({ "home": "dragon land" })));
}

pub(crate) fn create_conflict_never_overwrites(store: &dyn Store) {
    store.create(MONSTERS, monster("foobar", 5)).unwrap();

    let err = store.create(MONSTERS, monster("foobar", 10)).unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {:?}", err);

    let stored = store.get(MONSTERS, "foobar").unwrap();
    assert_eq!(stored.get("arms"), Some(&json!(5)));
}

pub(crate) fn update_overwrites_existing_and_missing(store: &dyn Store) {
    let created = store.create(MONSTERS, monster("octo", 8)).unwrap();

    let updated = store
        .update(MONSTERS, "octo", created.clone().with("arms", 7))
        .unwrap();
    assert_eq!(updated.created(), created.created());
    assert!(updated.modified() >= created.modified());
    assert_eq!(store.get(MONSTERS, "octo").unwrap().get("arms"), Some(&json!(7)));

    // No existence check on update
    store.update(MONSTERS, "ghost", monster("ghost", 0)).unwrap();
    assert_eq!(store.get(MONSTERS, "ghost").unwrap().id(), Some("ghost"));
}

pub(crate) fn delete_removes_record(store: &dyn Store) {
    store.create(MONSTERS, monster("behold", 0)).unwrap();
    store.delete(MONSTERS, "behold").unwrap();

    assert!(store.get(MONSTERS, "behold").unwrap_err().is_not_found());
    // Deleting again is harmless
    store.delete(MONSTERS, "behold").unwrap();
    // And the key is free for a new create
    store.create(MONSTERS, monster("behold", 1)).unwrap();
}

pub(crate) fn get_missing_is_not_found(store: &dyn Store) {
    let err = store.get(MONSTERS, "nobody").unwrap_err();
    assert!(err.is_not_found(), "expected not found, got {:?}", err);
}

pub(crate) fn list_is_scoped_to_collection(store: &dyn Store) {
    store.create(MONSTERS, monster("dragon", 0)).unwrap();
    store.create(MONSTERS, monster("octo", 8)).unwrap();
    store.create("/monsters-extra/", monster("tails", 2)).unwrap();
    store.create("/heroes/", monster("link", 2)).unwrap();

    let mut listed = names(&store.list(MONSTERS, &ListOptions::default()).unwrap());
    listed.sort();
    assert_eq!(listed, vec!["dragon", "octo"]);
}

pub(crate) fn list_defaults_to_created_ascending(store: &dyn Store) {
    for (name, created) in [("b", 20), ("c", 30), ("a", 10)] {
        store
            .create(MONSTERS, monster(name, 2).with("created", created))
            .unwrap();
    }

    let listed = names(&store.list(MONSTERS, &ListOptions::default()).unwrap());
    assert_eq!(listed, vec!["a", "b", "c"]);
}

pub(crate) fn list_order_by_descending_with_limit(store: &dyn Store) {
    for (name, published) in [("one", 100), ("four", 400), ("two", 200), ("three", 300)] {
        store
            .create(MONSTERS, monster(name, 2).with("published", published))
            .unwrap();
    }

    let options = ListOptions::parse("orderBy:-published, limit:2").unwrap();
    let listed = names(&store.list(MONSTERS, &options).unwrap());
    assert_eq!(listed, vec!["four", "three"]);

    let ascending = ListOptions::new().order_by("published").limit(3);
    let listed = names(&store.list(MONSTERS, &ascending).unwrap());
    assert_eq!(listed, vec!["one", "two", "three"]);
}

pub(crate) fn batch_upsert_is_idempotent(store: &dyn Store) {
    let batch = || vec![monster("dragon", 0), monster("octo", 8), monster("tails", 2)];

    let first = store.batch_upsert(MONSTERS, batch()).unwrap();
    assert_eq!(first.successes.len(), 3);
    assert!(first.failures.is_empty());

    let mut changed = batch();
    changed[1] = monster("octo", 9);
    let second = store.batch_upsert(MONSTERS, changed).unwrap();
    assert!(second.successes.is_empty());
    assert_eq!(second.failures.len(), 3);

    // Existing records are not overwritten
    assert_eq!(store.get(MONSTERS, "octo").unwrap().get("arms"), Some(&json!(8)));
    assert_eq!(store.list(MONSTERS, &ListOptions::default()).unwrap().len(), 3);
}

pub(crate) fn batch_upsert_mixes_new_and_existing(store: &dyn Store) {
    store.create(MONSTERS, monster("dragon", 0)).unwrap();

    let outcome = store
        .batch_upsert(
            MONSTERS,
            vec![monster("dragon", 0), monster("kraken", 10), monster("kraken", 11)],
        )
        .unwrap();

    assert_eq!(names(&outcome.successes), vec!["kraken"]);
    assert_eq!(names(&outcome.failures), vec!["dragon", "kraken"]);
    assert_eq!(store.get(MONSTERS, "kraken").unwrap().get("arms"), Some(&json!(10)));
}

pub(crate) fn batch_upsert_generates_missing_ids(store: &dyn Store) {
    let outcome = store
        .batch_upsert(MONSTERS, vec![Record::new().with("name", "anon")])
        .unwrap();

    assert_eq!(outcome.successes.len(), 1);
    let id = outcome.successes[0].id().unwrap().to_string();
    assert_eq!(store.get(MONSTERS, &id).unwrap().get("name"), Some(&json!("anon")));
}

pub(crate) fn ids_with_slashes_stay_distinct(store: &dyn Store) {
    store.create(MONSTERS, monster("x", 1)).unwrap();
    store.create(MONSTERS, monster("x/", 2)).unwrap();
    assert_eq!(store.get(MONSTERS, "x").unwrap().get("arms"), Some(&json!(1)));
    assert_eq!(store.get(MONSTERS, "x/").unwrap().get("arms"), Some(&json!(2)));

    store.update(MONSTERS, "a//b", monster("a//b", 3)).unwrap();
    assert!(store.get(MONSTERS, "a/b").unwrap_err().is_not_found());
    assert_eq!(store.get(MONSTERS, "a//b").unwrap().get("arms"), Some(&json!(3)));

    assert_eq!(store.list(MONSTERS, &ListOptions::default()).unwrap().len(), 3);
}

#[macro_export]
macro_rules! store_contract_tests {
    ($dir:ident => $make:expr) => {
        $crate::store_contract_tests!(@cases $dir => $make;
            create_then_get,
            create_conflict_never_overwrites,
            update_overwrites_existing_and_missing,
            delete_removes_record,
            get_missing_is_not_found,
            list_is_scoped_to_collection,
            list_defaults_to_created_ascending,
            list_order_by_descending_with_limit,
            batch_upsert_is_idempotent,
            batch_upsert_mixes_new_and_existing,
            batch_upsert_generates_missing_ids,
            ids_with_slashes_stay_distinct,
        );
    };
    (@cases $dir:ident => $make:expr; $($case:ident),* $(,)?) => {
        mod contract {
            #[allow(unused_imports)]
            use super::*;

            $(
                #[test]
                fn $case() {
                    let $dir = tempfile::tempdir().unwrap();
                    let store = $make;
                    $crate::store::contract::$case(&store);
                }
            )*
        }
    };
}
