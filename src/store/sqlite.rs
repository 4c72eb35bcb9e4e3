//! Document-table store on SQLite.
//!
//! Records live in a single `records(key, value)` table. Key uniqueness is
//! enforced by the database rather than checked up front: `insert` simply
//! tries the `INSERT` and turns the primary-key violation into a conflict,
//! and bulk inserts run as one transaction of `INSERT OR IGNORE`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::app::{FreshetError, Result};
use crate::store::{Record, Store};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-records/up.sql"
        ))]);

        let mut conn = self.lock()?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| FreshetError::Other(format!("Migration failed: {}", e)))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            FreshetError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn decode(value: &str) -> Result<Record> {
        Ok(serde_json::from_str(value)?)
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

impl Store for SqliteStore {
    fn read(&self, key: &str) -> Result<Option<Record>> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        value.as_deref().map(Self::decode).transpose()
    }

    fn write(&self, key: &str, record: &Record) -> Result<()> {
        let value = serde_json::to_string(record)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO records (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM records WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Record)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM records
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
        )?;

        let rows = stmt
            .query_map(params![prefix], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(key, value)| -> Result<(String, Record)> {
                Ok((key, Self::decode(&value)?))
            })
            .collect()
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn insert(&self, key: &str, record: &Record) -> Result<()> {
        let value = serde_json::to_string(record)?;
        let conn = self.lock()?;
        match conn.execute(
            "INSERT INTO records (key, value) VALUES (?1, ?2)",
            params![key, value],
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(FreshetError::Conflict(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn insert_many(&self, entries: &[(String, Record)]) -> Result<Vec<bool>> {
        let encoded = entries
            .iter()
            .map(|(key, record)| -> Result<(&String, String)> {
                Ok((key, serde_json::to_string(record)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(encoded.len());
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO records (key, value) VALUES (?1, ?2)")?;
            for (key, value) in &encoded {
                inserted.push(stmt.execute(params![key, value])? == 1);
            }
        }
        tx.commit()?;

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ListOptions, FEED_ITEMS};

    crate::store_contract_tests!(_dir => SqliteStore::in_memory().unwrap());

    mod on_disk {
        use super::*;

        crate::store_contract_tests!(dir => SqliteStore::new(dir.path().join("freshet.db")).unwrap());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("freshet.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store
                .batch_upsert(
                    FEED_ITEMS,
                    vec![Record::new().with("id", "a"), Record::new().with("id", "b")],
                )
                .unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.list(FEED_ITEMS, &ListOptions::default()).unwrap().len(), 2);
        assert!(store.create(FEED_ITEMS, Record::new().with("id", "a")).unwrap_err().is_conflict());
    }

    #[test]
    fn test_scan_prefix_is_literal() {
        let store = SqliteStore::in_memory().unwrap();
        store.write("/a_b/1", &Record::new()).unwrap();
        store.write("/axb/1", &Record::new()).unwrap();
        store.write("/a%b/1", &Record::new()).unwrap();

        assert_eq!(store.scan("/a_b/").unwrap().len(), 1);
        assert_eq!(store.scan("/a%b/").unwrap().len(), 1);
    }
}
