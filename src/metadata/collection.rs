//! A generic, collection-per-entity document store. Each record lives as
//! its own JSON file on disk (mirroring the teacher's
//! `{repo}/os/{arch}/metadata/{name}.json` layout) and as an in-memory
//! copy behind an `RwLock` for fast reads; writes go to both.
//!
//! There is no query planner — `find`/`findOne` take a predicate closure
//! and scan the in-memory map. That's the right tradeoff at the record
//! counts this service deals with per tenant, and it keeps every
//! "secondary index" `MetadataStore` needs expressible as a plain
//! closure instead of a bespoke index structure per access pattern.

use crate::error::{Error, Result, ResultIoExt};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tokio::fs;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains('\0') || id == "." || id == ".." {
        return Err(Error::Validation {
            msg: format!("invalid record id: {id:?}"),
            context: Default::default(),
        });
    }
    Ok(())
}

pub struct Collection<T> {
    dir: PathBuf,
    entries: RwLock<HashMap<String, T>>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Loads every `*.json` file under `dir` into memory. Creates `dir` if
    /// it doesn't exist yet.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_io_err(&dir)?;

        let mut entries = HashMap::new();
        let mut read_dir = fs::read_dir(&dir).await.map_io_err(&dir)?;
        while let Some(entry) = read_dir.next_entry().await.map_io_err(&dir)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path).await.map_io_err(&path)?;
            match serde_json::from_str::<T>(&content) {
                Ok(value) => {
                    entries.insert(stem.to_string(), value);
                }
                Err(error) => {
                    tracing::error!(path = %path.display(), %error, "skipping unreadable record");
                }
            }
        }

        Ok(Self {
            dir,
            entries: RwLock::new(entries),
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Inserts a new record. Fails if `id` already exists, same as the
    /// teacher's atomic `create_new` package writes — this store has the
    /// same TOCTOU concern for concurrently-created records.
    pub async fn insert(&self, id: impl Into<String>, value: T) -> Result<()> {
        let id = id.into();
        validate_id(&id)?;

        {
            let entries = self.entries.read().expect("lock poisoned");
            if entries.contains_key(&id) {
                return Err(Error::Conflict {
                    msg: format!("record {id} already exists"),
                });
            }
        }

        let path = self.record_path(&id);
        let json = serde_json::to_vec_pretty(&value)
            .map_err(|e| Error::Internal { msg: e.to_string() })?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Error::Conflict { msg: format!("record {id} already exists") }
                } else {
                    Error::Storage { error: e.to_string(), path: path.display().to_string() }
                }
            })?;
        file.write_all(&json).await.map_io_err(&path)?;
        file.sync_all().await.map_io_err(&path)?;

        self.entries.write().expect("lock poisoned").insert(id, value);
        Ok(())
    }

    /// Overwrites an existing record. Fails with `NotFound` if it doesn't
    /// exist — callers that want upsert semantics should `insert` first.
    pub async fn update(&self, id: &str, value: T) -> Result<()> {
        validate_id(id)?;
        {
            let entries = self.entries.read().expect("lock poisoned");
            if !entries.contains_key(id) {
                return Err(Error::NotFound { msg: format!("record {id} not found") });
            }
        }

        let path = self.record_path(id);
        let json = serde_json::to_vec_pretty(&value)
            .map_err(|e| Error::Internal { msg: e.to_string() })?;
        fs::write(&path, json).await.map_io_err(&path)?;

        self.entries.write().expect("lock poisoned").insert(id.to_string(), value);
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let existed = self.entries.write().expect("lock poisoned").remove(id).is_some();
        if existed {
            let path = self.record_path(id);
            if path.exists() {
                fs::remove_file(&path).await.map_io_err(&path)?;
            }
        }
        Ok(existed)
    }

    pub fn find_one_by_id(&self, id: &str) -> Option<T> {
        self.entries.read().expect("lock poisoned").get(id).cloned()
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.entries
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|v| predicate(v))
            .cloned()
            .collect()
    }

    pub fn find_one(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.entries
            .read()
            .expect("lock poisoned")
            .values()
            .find(|v| predicate(v))
            .cloned()
    }

    pub fn aggregate_sum(&self, predicate: impl Fn(&T) -> bool, extract: impl Fn(&T) -> i64) -> i64 {
        self.entries
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|v| predicate(v))
            .map(extract)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
