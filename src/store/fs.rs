//! One-file-per-record store.
//!
//! A key such as `/items/abc` lives at `<root>/items/abc.json`. Every key
//! segment is percent-encoded, dots included, so a key can neither climb out
//! of the root nor collide with another key or another key's directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app::{FreshetError, Result};
use crate::store::{Record, Store};

const EXTENSION: &str = "json";

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    value: Record,
}

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        tracing::debug!("Opened filesystem store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Percent-encoding never yields a lone `%`, so it stands for an empty
    /// segment.
    fn encode_segment(segment: &str) -> String {
        if segment.is_empty() {
            return "%".to_string();
        }
        urlencoding::encode(segment).replace('.', "%2E")
    }

    /// Path of the file holding `key`. Keys are absolute (`/items/abc`);
    /// every segment maps to its own name, empty ones included.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rest = key
            .strip_prefix('/')
            .ok_or_else(|| FreshetError::Other(format!("Invalid record key: {:?}", key)))?;

        let mut path = self.root.clone();
        let mut segments = rest.split('/').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_some() {
                path.push(Self::encode_segment(segment));
            } else {
                path.push(format!("{}.{}", Self::encode_segment(segment), EXTENSION));
            }
        }
        Ok(path)
    }

    /// Deepest directory that can contain keys starting with `prefix`.
    fn dir_for_prefix(&self, prefix: &str) -> PathBuf {
        let mut dir = self.root.clone();
        let complete = prefix.rfind('/').map(|pos| &prefix[..pos]);
        if let Some(rest) = complete.and_then(|c| c.strip_prefix('/')) {
            for segment in rest.split('/') {
                dir.push(Self::encode_segment(segment));
            }
        }
        dir
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        PathBuf::from(name)
    }

    fn write_temp(path: &Path, key: &str, record: &Record) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let stored = StoredRecord {
            key: key.to_string(),
            value: record.clone(),
        };
        let tmp = Self::temp_path(path);
        fs::write(&tmp, serde_json::to_vec(&stored)?)?;
        Ok(tmp)
    }

    fn load(path: &Path) -> Result<Option<StoredRecord>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn collect(dir: &Path, prefix: &str, out: &mut Vec<(String, Record)>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();

            if entry.file_type()?.is_dir() {
                Self::collect(&path, prefix, out)?;
            } else if path.extension().is_some_and(|ext| ext == EXTENSION) {
                if let Some(stored) = Self::load(&path)? {
                    if stored.key.starts_with(prefix) {
                        out.push((stored.key, stored.value));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Store for FsStore {
    fn read(&self, key: &str) -> Result<Option<Record>> {
        Ok(Self::load(&self.path_for(key)?)?
            .filter(|stored| stored.key == key)
            .map(|stored| stored.value))
    }

    fn write(&self, key: &str, record: &Record) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = Self::write_temp(&path, key, record)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Record)>> {
        let mut out = Vec::new();
        Self::collect(&self.dir_for_prefix(prefix), prefix, &mut out)?;
        Ok(out)
    }

    fn insert(&self, key: &str, record: &Record) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = Self::write_temp(&path, key, record)?;

        // Linking fails if the target exists, so the first writer wins and
        // readers never observe a half-written file.
        let linked = fs::hard_link(&tmp, &path);
        fs::remove_file(&tmp)?;

        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(FreshetError::Conflict(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
