//! Append-only log store.
//!
//! Every change is appended to a JSON-lines file; the live state is an
//! in-memory index rebuilt by replaying the log on open. Once the log holds
//! many more lines than live records it is rewritten (compacted).

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::app::{FreshetError, Result};
use crate::store::{Record, Store};

pub const DEFAULT_COMPACT_THRESHOLD: usize = 1000;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Entry {
    Set { key: String, value: Record },
    Rm { key: String },
}

struct Inner {
    file: File,
    index: BTreeMap<String, Record>,
    lines: usize,
}

pub struct LogStore {
    path: PathBuf,
    compact_threshold: usize,
    inner: Mutex<Inner>,
}

impl LogStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_compact_threshold(path, DEFAULT_COMPACT_THRESHOLD)
    }

    pub fn with_compact_threshold<P: AsRef<Path>>(path: P, compact_threshold: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let (index, lines) = Self::replay(&path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        if Self::has_torn_tail(&mut file)? {
            file.write_all(b"\n")?;
        }

        tracing::debug!(
            "Opened log store {} ({} records, {} log lines)",
            path.display(),
            index.len(),
            lines
        );

        Ok(Self {
            path,
            compact_threshold,
            inner: Mutex::new(Inner { file, index, lines }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines currently in the log file.
    pub fn log_len(&self) -> Result<usize> {
        Ok(self.lock()?.lines)
    }

    /// Rewrite the log so it holds exactly one line per live record.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.lock()?;
        self.compact_locked(&mut inner)
    }

    fn replay(path: &Path) -> Result<(BTreeMap<String, Record>, usize)> {
        let mut index = BTreeMap::new();
        let mut lines = 0;

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((index, lines)),
            Err(e) => return Err(e.into()),
        };

        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Entry>(&line) {
                Ok(Entry::Set { key, value }) => {
                    index.insert(key, value);
                }
                Ok(Entry::Rm { key }) => {
                    index.remove(&key);
                }
                Err(e) => {
                    // A crash mid-append leaves a torn last line
                    tracing::warn!(
                        "Skipping unreadable line {} of {}: {}",
                        number + 1,
                        path.display(),
                        e
                    );
                    continue;
                }
            }
            lines += 1;
        }

        Ok((index, lines))
    }

    fn has_torn_tail(file: &mut File) -> Result<bool> {
        if file.metadata()?.len() == 0 {
            return Ok(false);
        }
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))?;
        file.read_exact(&mut last)?;
        Ok(last[0] != b'\n')
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| FreshetError::Other(format!("Log store lock poisoned: {}", e)))
    }

    fn append(&self, inner: &mut Inner, entry: Entry) -> Result<()> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        inner.file.write_all(&line)?;
        inner.file.flush()?;
        inner.lines += 1;

        match entry {
            Entry::Set { key, value } => {
                inner.index.insert(key, value);
            }
            Entry::Rm { key } => {
                inner.index.remove(&key);
            }
        }

        // The entry is durable at this point; a failed compaction is retried
        // on a later append
        if inner.lines > self.compact_threshold && inner.lines > 2 * inner.index.len() {
            if let Err(e) = self.compact_locked(inner) {
                tracing::warn!("Failed to compact {}: {}", self.path.display(), e);
            }
        }
        Ok(())
    }

    fn write_snapshot(path: &Path, index: &BTreeMap<String, Record>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for (key, value) in index {
            serde_json::to_writer(
                &mut writer,
                &Entry::Set {
                    key: key.clone(),
                    value: value.clone(),
                },
            )?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn compact_locked(&self, inner: &mut Inner) -> Result<()> {
        let tmp_path = self.path.with_extension("compact");
        let written = Self::write_snapshot(&tmp_path, &inner.index);
        if written.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        written?;

        fs::rename(&tmp_path, &self.path)?;
        inner.file = OpenOptions::new().append(true).open(&self.path)?;

        tracing::debug!(
            "Compacted {} from {} to {} lines",
            self.path.display(),
            inner.lines,
            inner.index.len()
        );
        inner.lines = inner.index.len();
        Ok(())
    }
}

impl Store for LogStore {
    fn read(&self, key: &str) -> Result<Option<Record>> {
        Ok(self.lock()?.index.get(key).cloned())
    }

    fn write(&self, key: &str, record: &Record) -> Result<()> {
        let mut inner = self.lock()?;
        self.append(
            &mut inner,
            Entry::Set {
                key: key.to_string(),
                value: record.clone(),
            },
        )
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.index.contains_key(key) {
            return Ok(());
        }
        self.append(&mut inner, Entry::Rm { key: key.to_string() })
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Record)>> {
        let inner = self.lock()?;
        Ok(inner
            .index
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect())
    }

    fn insert(&self, key: &str, record: &Record) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.index.contains_key(key) {
            return Err(FreshetError::Conflict(key.to_string()));
        }
        self.append(
            &mut inner,
            Entry::Set {
                key: key.to_string(),
                value: record.clone(),
            },
        )
    }
}
