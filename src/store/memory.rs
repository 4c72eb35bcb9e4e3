use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::app::{FreshetError, Result};
use crate::store::{Record, Store};

/// Process-local map. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> FreshetError {
    FreshetError::Other(format!("Memory store lock poisoned: {}", e))
}

impl Store for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Record>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(key).cloned())
    }

    fn write(&self, key: &str, record: &Record) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(key.to_string(), record.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Record)>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect())
    }

    fn insert(&self, key: &str, record: &Record) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.contains_key(key) {
            return Err(FreshetError::Conflict(key.to_string()));
        }
        records.insert(key.to_string(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::store_contract_tests!(_dir => MemoryStore::new());

    #[test]
    fn test_scan_does_not_leak_into_sibling_prefixes() {
        let store = MemoryStore::new();
        store.write("/a/1", &Record::new()).unwrap();
        store.write("/ab/1", &Record::new()).unwrap();
        store.write("/a/2", &Record::new()).unwrap();

        let keys: Vec<String> = store.scan("/a/").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["/a/1", "/a/2"]);
        assert_eq!(store.len(), 3);
    }
}
