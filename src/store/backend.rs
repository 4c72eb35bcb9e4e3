use crate::app::{FreshetError, Result};
use crate::config::{BackendKind, StorageConfig};
use crate::store::{FsStore, LogStore, MemoryStore, Record, SqliteStore, Store};

/// The storage backend chosen by configuration.
pub enum Backend {
    Memory(MemoryStore),
    Log(LogStore),
    Fs(FsStore),
    Sqlite(SqliteStore),
}

impl Backend {
    pub fn open(config: &StorageConfig) -> Result<Self> {
        if config.backend == BackendKind::Memory {
            return Ok(Self::Memory(MemoryStore::new()));
        }

        let path = config
            .resolved_path()
            .map_err(|e| FreshetError::Config(e.to_string()))?;
        tracing::info!("Using {:?} storage at {}", config.backend, path.display());

        Ok(match config.backend {
            BackendKind::Memory => Self::Memory(MemoryStore::new()),
            BackendKind::Log => {
                Self::Log(LogStore::with_compact_threshold(&path, config.compact_threshold)?)
            }
            BackendKind::Fs => Self::Fs(FsStore::open(&path)?),
            BackendKind::Sqlite => Self::Sqlite(SqliteStore::new(&path)?),
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Memory(_) => BackendKind::Memory,
            Self::Log(_) => BackendKind::Log,
            Self::Fs(_) => BackendKind::Fs,
            Self::Sqlite(_) => BackendKind::Sqlite,
        }
    }

    fn inner(&self) -> &dyn Store {
        match self {
            Self::Memory(store) => store,
            Self::Log(store) => store,
            Self::Fs(store) => store,
            Self::Sqlite(store) => store,
        }
    }
}

// Only the primitives are forwarded; the record contract comes from the
// provided methods of `Store`.
impl Store for Backend {
    fn read(&self, key: &str) -> Result<Option<Record>> {
        self.inner().read(key)
    }

    fn write(&self, key: &str, record: &Record) -> Result<()> {
        self.inner().write(key, record)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner().remove(key)
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Record)>> {
        self.inner().scan(prefix)
    }

    fn contains(&self, key: &str) -> Result<bool> {
        self.inner().contains(key)
    }

    fn insert(&self, key: &str, record: &Record) -> Result<()> {
        self.inner().insert(key, record)
    }

    fn insert_many(&self, entries: &[(String, Record)]) -> Result<Vec<bool>> {
        self.inner().insert_many(entries)
    }
}
