//! Storage sync layer.
//!
//! Every backend implements the small set of key/value primitives on
//! [`Store`] (`read`, `write`, `remove`, `scan`, optionally `insert` and
//! `insert_many`). The record-level contract (`create`, `update`, `get`,
//! `list`, `batch_upsert`, ...) is provided once on top of them, so all
//! backends behave the same way.

pub mod backend;
pub mod fs;
pub mod log;
pub mod memory;
pub mod record;
pub mod sqlite;

#[cfg(test)]
mod contract;

use chrono::Utc;

use crate::app::{FreshetError, Result};

pub use backend::Backend;
pub use fs::FsStore;
pub use log::LogStore;
pub use memory::MemoryStore;
pub use record::{BatchOutcome, ListOptions, Record};
pub use sqlite::SqliteStore;

/// Collection holding [`Resource`](crate::domain::Resource) records.
pub const RESOURCES: &str = "/resources/";
/// Collection holding [`FeedItem`](crate::domain::FeedItem) records.
pub const FEED_ITEMS: &str = "/items/";

/// Storage key of record `id` in `collection`: `<collection>/<id>`.
pub fn record_key(collection: &str, id: &str) -> String {
    format!("{}{}", collection_prefix(collection), id)
}

/// Key prefix shared by every record of `collection`.
pub fn collection_prefix(collection: &str) -> String {
    format!("{}/", collection.trim_end_matches('/'))
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub trait Store: Send + Sync {
    // Backend primitives
    fn read(&self, key: &str) -> Result<Option<Record>>;
    fn write(&self, key: &str, record: &Record) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    /// All records whose key starts with `prefix`, in any order.
    fn scan(&self, prefix: &str) -> Result<Vec<(String, Record)>>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.read(key)?.is_some())
    }

    /// Store `record` under `key` unless the key is taken, in which case
    /// [`FreshetError::Conflict`] is returned and nothing is written.
    fn insert(&self, key: &str, record: &Record) -> Result<()> {
        if self.contains(key)? {
            return Err(FreshetError::Conflict(key.to_string()));
        }
        self.write(key, record)
    }

    /// Bulk [`insert`](Self::insert). Returns, per entry, whether it was
    /// stored (`false` means the key already existed).
    fn insert_many(&self, entries: &[(String, Record)]) -> Result<Vec<bool>> {
        let mut inserted = Vec::with_capacity(entries.len());
        for (key, record) in entries {
            match self.insert(key, record) {
                Ok(()) => inserted.push(true),
                Err(e) if e.is_conflict() => inserted.push(false),
                Err(e) => return Err(e),
            }
        }
        Ok(inserted)
    }

    // Record contract

    fn create(&self, collection: &str, record: Record) -> Result<Record> {
        self.create_with(collection, record, &|_| None)
    }

    /// Like [`create`](Self::create), with `identity` deriving the id of
    /// records that do not carry one.
    fn create_with(
        &self,
        collection: &str,
        record: Record,
        identity: &dyn Fn(&Record) -> Option<String>,
    ) -> Result<Record> {
        let (key, record) = prepare_create(collection, record, identity, now_millis());
        self.insert(&key, &record)?;
        tracing::trace!("Created {}", key);
        Ok(record)
    }

    fn update(&self, collection: &str, id: &str, mut record: Record) -> Result<Record> {
        record.stamp(id, now_millis(), false);
        self.write(&record_key(collection, id), &record)?;
        Ok(record)
    }

    fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.remove(&record_key(collection, id))
    }

    fn get(&self, collection: &str, id: &str) -> Result<Record> {
        let key = record_key(collection, id);
        self.read(&key)?.ok_or(FreshetError::NotFound(key))
    }

    fn list(&self, collection: &str, options: &ListOptions) -> Result<Vec<Record>> {
        let mut entries = self.scan(&collection_prefix(collection))?;
        let (field, descending) = options.sort_key();

        entries.sort_by(|(key_a, a), (key_b, b)| {
            let ordering = record::compare_values(a.get(field), b.get(field))
                .then_with(|| key_a.cmp(key_b));
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        if let Some(limit) = options.limit {
            entries.truncate(limit);
        }

        Ok(entries.into_iter().map(|(_, record)| record).collect())
    }

    /// Create every record, collecting already-present keys as failures
    /// instead of aborting. Backend errors still abort the batch.
    fn batch_upsert(&self, collection: &str, records: Vec<Record>) -> Result<BatchOutcome> {
        let now = now_millis();
        let entries: Vec<(String, Record)> = records
            .into_iter()
            .map(|record| prepare_create(collection, record, &|_| None, now))
            .collect();

        let inserted = self.insert_many(&entries)?;

        let mut outcome = BatchOutcome::default();
        for ((_, record), stored) in entries.into_iter().zip(inserted) {
            if stored {
                outcome.successes.push(record);
            } else {
                outcome.failures.push(record);
            }
        }

        tracing::debug!(
            "Batch into {}: {} new, {} existing",
            collection,
            outcome.successes.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }
}

fn prepare_create(
    collection: &str,
    mut record: Record,
    identity: &dyn Fn(&Record) -> Option<String>,
    now: i64,
) -> (String, Record) {
    let id = record
        .id()
        .map(String::from)
        .or_else(|| identity(&record))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    record.stamp(&id, now, true);
    (record_key(collection, &id), record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_normalizes_trailing_slash() {
        assert_eq!(record_key("/resources/", "abc"), "/resources/abc");
        assert_eq!(record_key("/resources", "abc"), "/resources/abc");
        assert_eq!(collection_prefix("/items"), "/items/");
    }

    #[test]
    fn test_create_prefers_explicit_id_then_identity_then_uuid() {
        let store = MemoryStore::new();

        let explicit = store
            .create_with("/things/", Record::new().with("id", "given"), &|_| {
                Some("hashed".into())
            })
            .unwrap();
        assert_eq!(explicit.id(), Some("given"));

        let hashed = store
            .create_with("/things/", Record::new().with("name", "x"), &|r| {
                r.get("name").and_then(|v| v.as_str()).map(String::from)
            })
            .unwrap();
        assert_eq!(hashed.id(), Some("x"));

        let generated = store.create("/things/", Record::new()).unwrap();
        let id = generated.id().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn test_create_keeps_existing_created_timestamp() {
        let store = MemoryStore::new();
        let record = store
            .create("/things/", Record::new().with("created", 42))
            .unwrap();
        assert_eq!(record.created(), Some(42));
        assert!(record.modified().unwrap() >= 42);
    }
}
