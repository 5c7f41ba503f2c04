//! Single-file download path, spec.md §4.6: resolve metadata, check
//! access, compute a range, hand back a stream plus the headers an
//! adapter needs to render a response. The engine never writes to a
//! socket itself — see `DownloadOutcome`.

use crate::access_policy::AccessPolicy;
use crate::error::{Error, Result};
use crate::event::{Event, EventSink};
use crate::metadata::MetadataStore;
use crate::models::{File, UserId};
use crate::range::{RangeSpec, parse_range};
use crate::storage::StorageBackend;
use crate::volatile::{VolatileStore, keys};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;

pub struct DownloadEngineConfig {
    pub metadata_cache_ttl_secs: u64,
    pub expiry_extension_days: i64,
}

pub struct DownloadEngine {
    metadata: Arc<MetadataStore>,
    storage: Arc<StorageBackend>,
    volatile: Arc<dyn VolatileStore>,
    events: Arc<dyn EventSink>,
    config: DownloadEngineConfig,
}

/// What the adapter needs to render a response. `headers` is plain data
/// computed here, not bytes written to a socket — see SPEC_FULL.md §C.
pub struct DownloadOutcome {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub stream: std::pin::Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>,
    pub metadata: File,
}

impl DownloadEngine {
    pub fn new(
        metadata: Arc<MetadataStore>,
        storage: Arc<StorageBackend>,
        volatile: Arc<dyn VolatileStore>,
        events: Arc<dyn EventSink>,
        config: DownloadEngineConfig,
    ) -> Self {
        Self { metadata, storage, volatile, events, config }
    }

    /// Cache at `file:<fileId>` (TTL configurable, default 300s) then
    /// durable store. A cache miss on an absent/deleted/expired file
    /// always falls through to `NOT_FOUND` rather than being cached
    /// itself — only live files are worth caching.
    async fn get_file_metadata(&self, file_id: &str) -> Result<File> {
        let cache_key = keys::file(file_id);
        if let Ok(Some(json)) = self.volatile.get(&cache_key).await {
            if let Ok(file) = serde_json::from_str::<File>(&json) {
                return Ok(file);
            }
        }

        let file = self
            .metadata
            .files
            .find_one_by_id(file_id)
            .ok_or_else(|| not_found(file_id))?;

        if file.is_deleted || file.is_expired(Utc::now()) {
            return Err(not_found(file_id));
        }

        if let Ok(json) = serde_json::to_string(&file) {
            let ttl = Duration::from_secs(self.config.metadata_cache_ttl_secs);
            let _ = self.volatile.set(&cache_key, &json, Some(ttl)).await;
        }

        Ok(file)
    }

    async fn invalidate_cache(&self, file_id: &str) {
        let _ = self.volatile.delete(&keys::file(file_id)).await;
    }

    pub async fn prepare_download(
        &self,
        file_id: &str,
        user_id: Option<&UserId>,
        range_header: Option<&str>,
        password: Option<&str>,
    ) -> Result<DownloadOutcome> {
        let file = self.get_file_metadata(file_id).await?;

        AccessPolicy::new(&self.metadata).check(&file, user_id, password)?;

        let range = parse_range(range_header, file.size)?;

        let (start, end) = match range {
            Some(RangeSpec { start, end }) => (Some(start), Some(end)),
            None => (None, None),
        };

        let (stream, content_length) = self
            .storage
            .open_range(&file.storage_key, file.storage_tier, start, end)
            .await?;

        let status = if range.is_some() { 206 } else { 200 };
        let mut headers = vec![
            ("Content-Type".to_string(), file.mime_type.clone()),
            (
                "Content-Disposition".to_string(),
                format!("attachment; filename=\"{}\"", url_encode(&file.original_name)),
            ),
            ("Accept-Ranges".to_string(), "bytes".to_string()),
            ("Cache-Control".to_string(), "private, max-age=3600".to_string()),
            ("ETag".to_string(), format!("\"{}-{}\"", file.id, file.size)),
            ("Content-Length".to_string(), content_length.to_string()),
        ];

        if let Some(RangeSpec { start, end }) = range {
            headers.push(("Content-Range".to_string(), format!("bytes {start}-{end}/{}", file.size)));
        } else {
            self.record_non_range_download(file.clone());
        }

        if let Some(user_id) = user_id {
            self.record_bandwidth(user_id.clone(), content_length);
        }

        Ok(DownloadOutcome { status, headers, stream: Box::pin(stream), metadata: file })
    }

    /// Fire-and-forget: increments `downloads`, stamps `lastDownloadAt`,
    /// extends `expiresAt`, and invalidates the cache. Never blocks the
    /// response stream and never fails the request on its own error —
    /// only logs through `EventSink`, per spec.md §4.6.
    fn record_non_range_download(&self, mut file: File) {
        let metadata = self.metadata.clone();
        let events = self.events.clone();
        let volatile = self.volatile.clone();
        let extension_days = self.config.expiry_extension_days;
        let file_id = file.id.to_string();

        tokio::spawn(async move {
            file.record_download(Utc::now(), extension_days);
            if let Err(error) = metadata.files.update(&file_id, file).await {
                events.emit(Event::AsyncSideEffectFailed {
                    operation: "download_counter_update",
                    error: error.to_string(),
                });
            }
            let _ = volatile.delete(&keys::file(&file_id)).await;
        });
    }

    /// Fire-and-forget bandwidth accounting; same no-block, log-only
    /// failure policy as `record_non_range_download`.
    fn record_bandwidth(&self, user_id: UserId, bytes: u64) {
        let metadata = self.metadata.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let accountant =
                crate::quota_accountant::QuotaAccountant::new(metadata, events.clone(), crate::config::QuotaConfig::default());
            if let Err(error) = accountant.add_bandwidth(&user_id, bytes).await {
                events.emit(Event::AsyncSideEffectFailed {
                    operation: "bandwidth_accounting",
                    error: error.to_string(),
                });
            }
        });
    }
}

fn not_found(file_id: &str) -> Error {
    Error::NotFound { msg: format!("file {file_id} not found") }
}

/// Minimal percent-encoding for the `Content-Disposition` filename
/// parameter — escapes the characters that would otherwise break the
/// quoted-string header value.
fn url_encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'"' | b'\\' => {
                out.push('%');
                out.push_str(&format!("{byte:02X}"));
            }
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullEventSink;
    use crate::models::{FileId, MigrationStatus, StorageTier};
    use crate::volatile::InMemoryVolatileStore;
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn harness() -> (DownloadEngine, Arc<MetadataStore>, Arc<StorageBackend>, TempDir) {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(MetadataStore::open(dir.path()).await.unwrap());
        let storage = Arc::new(StorageBackend::new(dir.path().join("blobs")));
        let volatile: Arc<dyn VolatileStore> = Arc::new(InMemoryVolatileStore::new());
        let engine = DownloadEngine::new(
            metadata.clone(),
            storage.clone(),
            volatile,
            Arc::new(NullEventSink),
            DownloadEngineConfig { metadata_cache_ttl_secs: 300, expiry_extension_days: 5 },
        );
        (engine, metadata, storage, dir)
    }

    async fn seed_file(metadata: &MetadataStore, storage: &StorageBackend, bytes: &[u8], is_public: bool) -> File {
        let owner = UserId::generate();
        storage.write_chunk("seed", 0, bytes).await.unwrap();
        let outcome = storage.assemble_chunks("seed", "seeded.bin", 1, StorageTier::Hot).await.unwrap();

        let file = File {
            id: FileId::generate(),
            user_id: owner,
            folder_id: None,
            storage_key: "seeded.bin".to_string(),
            original_name: "seeded.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            size: outcome.size,
            hash: outcome.hash,
            storage_tier: StorageTier::Hot,
            downloads: 0,
            last_download_at: None,
            last_access_at: Utc::now(),
            expires_at: Some(Utc::now() + chrono::Duration::days(1)),
            is_public,
            password: None,
            is_deleted: false,
            deleted_at: None,
            migration_status: MigrationStatus::None,
            last_migration_at: None,
            metadata: HashMap::new(),
        };
        metadata.files.insert(file.id.as_str().to_string(), file.clone()).await.unwrap();
        file
    }

    #[tokio::test]
    async fn full_download_returns_200_and_full_body() {
        let (engine, metadata, storage, _dir) = harness().await;
        let file = seed_file(&metadata, &storage, b"0123456789", true).await;

        let outcome = engine.prepare_download(file.id.as_str(), None, None, None).await.unwrap();
        assert_eq!(outcome.status, 200);
        assert!(outcome.headers.iter().any(|(k, v)| k == "Content-Length" && v == "10"));
    }

    #[tokio::test]
    async fn range_download_returns_206_with_content_range() {
        let (engine, metadata, storage, _dir) = harness().await;
        let file = seed_file(&metadata, &storage, b"0123456789", true).await;

        let outcome = engine
            .prepare_download(file.id.as_str(), None, Some("bytes=2-5"), None)
            .await
            .unwrap();
        assert_eq!(outcome.status, 206);
        assert!(outcome
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Range" && v == "bytes 2-5/10"));
    }

    #[tokio::test]
    async fn private_file_requires_owner() {
        let (engine, metadata, storage, _dir) = harness().await;
        let file = seed_file(&metadata, &storage, b"secret", false).await;

        let denied = engine.prepare_download(file.id.as_str(), None, None, None).await;
        assert!(denied.is_err());

        let allowed = engine
            .prepare_download(file.id.as_str(), Some(&file.user_id), None, None)
            .await;
        assert!(allowed.is_ok());
    }

    #[tokio::test]
    async fn unknown_file_is_not_found() {
        let (engine, _metadata, _storage, _dir) = harness().await;
        let result = engine.prepare_download("missing", None, None, None).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }
}
