//! Durable byte storage across two tiers plus a staging area for
//! in-flight upload chunks. The path layout, atomic-write discipline,
//! and path-traversal validation are carried over directly from the
//! teacher's package storage layer; what changes is the object being
//! stored (arbitrary tenant blobs instead of package archives) and the
//! addition of a streaming, hashing assembly step and tier migration.

use crate::error::{Error, Result, ResultIoExt};
use crate::models::StorageTier;
use bytes::Bytes;
use futures::Stream;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

fn validate_component(component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\')
        || component.contains('\0')
    {
        return Err(Error::Validation {
            msg: format!("invalid path component: {component:?}"),
            context: Default::default(),
        });
    }
    Ok(())
}

fn tier_dir_name(tier: StorageTier) -> &'static str {
    match tier {
        StorageTier::Hot => "hot",
        StorageTier::Cold => "cold",
    }
}

pub struct AssembleOutcome {
    pub size: u64,
    pub hash: String,
}

pub struct StorageStats {
    pub hot_bytes: u64,
    pub cold_bytes: u64,
    pub staging_bytes: u64,
}

/// Durable two-tier blob store plus chunk staging.
///
/// Layout: `<basePath>/<tier>/<first-2-of-key>/<storageKey>`; chunks at
/// `<basePath>/ssd/temp/<sessionId>/<chunkIndex>`.
pub struct StorageBackend {
    base_path: PathBuf,
}

impl StorageBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into() }
    }

    fn object_path(&self, storage_key: &str, tier: StorageTier) -> Result<PathBuf> {
        validate_component(storage_key)?;
        let prefix: String = storage_key.chars().take(2).collect();
        let path = self.base_path.join(tier_dir_name(tier)).join(prefix).join(storage_key);
        Ok(path)
    }

    fn staging_dir(&self, session_id: &str) -> Result<PathBuf> {
        validate_component(session_id)?;
        Ok(self.base_path.join("ssd").join("temp").join(session_id))
    }

    fn chunk_path(&self, session_id: &str, chunk_index: u32) -> Result<PathBuf> {
        Ok(self.staging_dir(session_id)?.join(chunk_index.to_string()))
    }

    /// Writes one chunk to staging, write-temp-then-rename so a crash
    /// mid-write never leaves a half-written chunk at its final name.
    pub async fn write_chunk(&self, session_id: &str, chunk_index: u32, bytes: &[u8]) -> Result<()> {
        let dir = self.staging_dir(session_id)?;
        fs::create_dir_all(&dir).await.map_io_err(&dir)?;

        let final_path = self.chunk_path(session_id, chunk_index)?;
        let tmp_path = dir.join(format!("{chunk_index}.tmp"));

        let mut file = fs::File::create(&tmp_path).await.map_io_err(&tmp_path)?;
        file.write_all(bytes).await.map_io_err(&tmp_path)?;
        file.sync_all().await.map_io_err(&tmp_path)?;
        drop(file);

        fs::rename(&tmp_path, &final_path).await.map_io_err(&final_path)?;
        Ok(())
    }

    /// Streams staged chunks `0..totalChunks` in order into the
    /// destination object, hashing as it writes. On any failure the
    /// partial destination is removed before the error propagates.
    pub async fn assemble_chunks(
        &self,
        session_id: &str,
        storage_key: &str,
        total_chunks: u32,
        tier: StorageTier,
    ) -> Result<AssembleOutcome> {
        let dest_path = self.object_path(storage_key, tier)?;
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).await.map_io_err(parent)?;
        }

        let result = self.assemble_chunks_inner(session_id, total_chunks, &dest_path).await;
        if result.is_err() && dest_path.exists() {
            let _ = fs::remove_file(&dest_path).await;
        }
        result
    }

    async fn assemble_chunks_inner(
        &self,
        session_id: &str,
        total_chunks: u32,
        dest_path: &Path,
    ) -> Result<AssembleOutcome> {
        let mut dest = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest_path)
            .await
            .map_io_err(dest_path)?;

        let mut hasher = Sha256::new();
        let mut total_size: u64 = 0;

        for index in 0..total_chunks {
            let chunk_path = self.chunk_path(session_id, index)?;
            let mut buf = Vec::new();
            fs::File::open(&chunk_path)
                .await
                .map_io_err(&chunk_path)?
                .read_to_end(&mut buf)
                .await
                .map_io_err(&chunk_path)?;

            hasher.update(&buf);
            total_size += buf.len() as u64;
            dest.write_all(&buf).await.map_io_err(dest_path)?;
        }

        dest.sync_all().await.map_io_err(dest_path)?;

        Ok(AssembleOutcome {
            size: total_size,
            hash: hex::encode(hasher.finalize()),
        })
    }

    /// Removes every staged chunk for a session (abort, or cleanup after
    /// a completed/failed assembly).
    pub async fn delete_chunks(&self, session_id: &str) -> Result<()> {
        let dir = self.staging_dir(session_id)?;
        if dir.exists() {
            fs::remove_dir_all(&dir).await.map_io_err(&dir)?;
        }
        Ok(())
    }

    /// Returns a bounded byte stream honoring inclusive `[start, end]`.
    /// `None` bounds mean "from the beginning" / "to the end".
    pub async fn open_range(
        &self,
        storage_key: &str,
        tier: StorageTier,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<(impl Stream<Item = std::io::Result<Bytes>>, u64)> {
        let path = self.object_path(storage_key, tier)?;
        let metadata = fs::metadata(&path).await.map_io_err(&path)?;
        let total_size = metadata.len();

        let start = start.unwrap_or(0);
        let end = end.unwrap_or(total_size.saturating_sub(1));
        if start > end || end >= total_size {
            return Err(Error::Validation {
                msg: format!("range {start}-{end} unsatisfiable for object of size {total_size}"),
                context: Default::default(),
            });
        }

        let mut file = fs::File::open(&path).await.map_io_err(&path)?;
        file.seek(std::io::SeekFrom::Start(start)).await.map_io_err(&path)?;
        let bounded = file.take(end - start + 1);
        Ok((ReaderStream::new(bounded), end - start + 1))
    }

    /// Lists every session directory currently staged under
    /// `ssd/temp`, with its last-modified time — the working set the
    /// cleanup worker scans for orphans (an absent or terminal session
    /// whose directory hasn't been touched recently).
    pub async fn staging_sessions(&self) -> Result<Vec<(String, std::time::SystemTime)>> {
        let dir = self.base_path.join("ssd").join("temp");
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&dir).await.map_io_err(&dir)?;
        while let Some(entry) = entries.next_entry().await.map_io_err(&dir)? {
            let path = entry.path();
            let meta = entry.metadata().await.map_io_err(&path)?;
            if !meta.is_dir() {
                continue;
            }
            let Some(session_id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            sessions.push((session_id.to_string(), meta.modified().map_io_err(&path)?));
        }
        Ok(sessions)
    }

    pub async fn delete(&self, storage_key: &str, tier: StorageTier) -> Result<()> {
        let path = self.object_path(storage_key, tier)?;
        if path.exists() {
            fs::remove_file(&path).await.map_io_err(&path)?;
        }
        Ok(())
    }

    /// Moves an object between tiers. Uses `rename` when both paths are
    /// under the same base directory tree (effectively always true
    /// here, since both tiers live under one `basePath`); the source is
    /// removed only after the destination's existence is confirmed, so
    /// a crash mid-migration never loses the object from both tiers at
    /// once.
    pub async fn migrate(&self, storage_key: &str, source_tier: StorageTier, target_tier: StorageTier) -> Result<()> {
        let source_path = self.object_path(storage_key, source_tier)?;
        let target_path = self.object_path(storage_key, target_tier)?;

        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent).await.map_io_err(parent)?;
        }

        match fs::rename(&source_path, &target_path).await {
            Ok(()) => {}
            Err(_) => {
                // Cross-device fallback: stream-copy then unlink only
                // after the destination is fsync-confirmed.
                fs::copy(&source_path, &target_path).await.map_io_err(&target_path)?;
                let dest_file = fs::File::open(&target_path).await.map_io_err(&target_path)?;
                dest_file.sync_all().await.map_io_err(&target_path)?;
                if !target_path.exists() {
                    return Err(Error::Storage {
                        error: "migration destination missing after copy".into(),
                        path: target_path.display().to_string(),
                    });
                }
                fs::remove_file(&source_path).await.map_io_err(&source_path)?;
            }
        }

        Ok(())
    }

    pub async fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            hot_bytes: dir_size(&self.base_path.join("hot")).await?,
            cold_bytes: dir_size(&self.base_path.join("cold")).await?,
            staging_bytes: dir_size(&self.base_path.join("ssd").join("temp")).await?,
        })
    }

    pub async fn health_check(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path).await.map_io_err(&self.base_path)?;
        let probe = self.base_path.join(".health");
        fs::write(&probe, b"ok").await.map_io_err(&probe)?;
        fs::remove_file(&probe).await.map_io_err(&probe)?;
        Ok(())
    }
}

async fn dir_size(dir: &Path) -> Result<u64> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut total = 0u64;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = fs::read_dir(&current).await.map_io_err(&current)?;
        while let Some(entry) = entries.next_entry().await.map_io_err(&current)? {
            let path = entry.path();
            let meta = entry.metadata().await.map_io_err(&path)?;
            if meta.is_dir() {
                stack.push(path);
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn assemble_concatenates_in_order_and_hashes() {
        let dir = TempDir::new().unwrap();
        let backend = StorageBackend::new(dir.path());

        backend.write_chunk("s1", 0, b"hello ").await.unwrap();
        backend.write_chunk("s1", 1, b"world").await.unwrap();

        let outcome = backend
            .assemble_chunks("s1", "key123.txt", 2, StorageTier::Hot)
            .await
            .unwrap();

        assert_eq!(outcome.size, 11);

        let mut expected = Sha256::new();
        expected.update(b"hello world");
        assert_eq!(outcome.hash, hex::encode(expected.finalize()));
    }

    #[tokio::test]
    async fn migrate_moves_object_between_tiers() {
        let dir = TempDir::new().unwrap();
        let backend = StorageBackend::new(dir.path());
        backend.write_chunk("s2", 0, b"payload").await.unwrap();
        backend.assemble_chunks("s2", "abcdef.bin", 1, StorageTier::Hot).await.unwrap();

        backend.migrate("abcdef.bin", StorageTier::Hot, StorageTier::Cold).await.unwrap();

        assert!(!backend.object_path("abcdef.bin", StorageTier::Hot).unwrap().exists());
        assert!(backend.object_path("abcdef.bin", StorageTier::Cold).unwrap().exists());
    }

    #[tokio::test]
    async fn open_range_returns_requested_bytes() {
        let dir = TempDir::new().unwrap();
        let backend = StorageBackend::new(dir.path());
        backend.write_chunk("s3", 0, b"0123456789").await.unwrap();
        backend.assemble_chunks("s3", "ranged.bin", 1, StorageTier::Hot).await.unwrap();

        let (_stream, len) = backend
            .open_range("ranged.bin", StorageTier::Hot, Some(2), Some(5))
            .await
            .unwrap();
        assert_eq!(len, 4);
    }
}
