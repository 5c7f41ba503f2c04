//! Chunked upload session lifecycle, spec.md §4.5. The session's
//! durable record (`MetadataStore::upload_sessions`) and its volatile
//! cache entry are both written on every chunk; neither is locked
//! against the other, per spec.md's "no lock" shared-resource policy —
//! readers tolerate brief divergence, and the volatile copy is trusted
//! first because it's refreshed synchronously alongside the durable
//! write, never behind it.

use crate::error::{Error, Result};
use crate::event::{Event, EventSink};
use crate::metadata::MetadataStore;
use crate::models::{ChunkRecord, File, FileId, FolderId, MigrationStatus, QuotaOverride, Role, SessionId, StorageTier, UploadSession, UploadStatus, UserId};
use crate::quota_accountant::QuotaAccountant;
use crate::sanitize::{resolve_mime_type, sanitize_filename};
use crate::storage::StorageBackend;
use crate::storage_key;
use crate::util::constant_time_eq;
use crate::volatile::{VolatileStore, keys};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub struct UploadEngineConfig {
    pub chunk_size: u64,
    pub session_ttl_secs: i64,
    pub expiry_days_free: i64,
}

pub struct UploadEngine {
    metadata: Arc<MetadataStore>,
    storage: Arc<StorageBackend>,
    volatile: Arc<dyn VolatileStore>,
    quota: Arc<QuotaAccountant>,
    events: Arc<dyn EventSink>,
    config: UploadEngineConfig,
}

#[derive(Debug, Serialize)]
pub struct UploadInit {
    pub session_id: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub expires_at: DateTime<Utc>,
    pub upload_urls: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Accepted,
    AlreadyUploaded,
}

#[derive(Debug, Serialize)]
pub struct ChunkOutcome {
    pub status: ChunkStatus,
    pub completed_chunks: u32,
    pub total_chunks: u32,
    pub progress: f64,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusView {
    pub session_id: String,
    pub status: UploadStatus,
    pub total_chunks: u32,
    pub completed_chunks: u32,
    pub remaining_chunks: Vec<u32>,
    pub progress: f64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ResumeView {
    pub status: SessionStatusView,
    pub upload_urls: Vec<String>,
}

impl UploadEngine {
    pub fn new(
        metadata: Arc<MetadataStore>,
        storage: Arc<StorageBackend>,
        volatile: Arc<dyn VolatileStore>,
        quota: Arc<QuotaAccountant>,
        events: Arc<dyn EventSink>,
        config: UploadEngineConfig,
    ) -> Self {
        Self { metadata, storage, volatile, quota, events, config }
    }

    fn upload_urls(session_id: &str, total_chunks: u32) -> Vec<String> {
        (0..total_chunks).map(|i| format!("/api/uploads/{session_id}/chunks/{i}")).collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn init(
        &self,
        user_id: &UserId,
        role: Role,
        quota_override: &QuotaOverride,
        filename: &str,
        size: u64,
        expected_hash: Option<String>,
        mime_type: Option<&str>,
        folder_id: Option<FolderId>,
    ) -> Result<UploadInit> {
        if size == 0 {
            return Err(Error::Validation { msg: "file size must be greater than zero".to_string(), context: Default::default() });
        }

        let filename = sanitize_filename(filename)?;
        let mime_type = resolve_mime_type(mime_type, &filename);

        let check = self.quota.can_upload(user_id, role, quota_override, size);
        if !check.allowed {
            return Err(quota_denied(&check));
        }

        let chunk_size = self.config.chunk_size;
        let total_chunks = UploadSession::total_chunks_for(size, chunk_size);
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(self.config.session_ttl_secs);

        let session = UploadSession {
            session_id: SessionId::generate(),
            user_id: user_id.clone(),
            filename: filename.clone(),
            mime_type,
            total_size: size,
            expected_hash,
            folder_id,
            chunk_size,
            total_chunks,
            completed_chunks: Vec::new(),
            status: UploadStatus::Pending,
            error: None,
            file_id: None,
            storage_tier: None,
            started_at: now,
            last_activity_at: now,
            completed_at: None,
            expires_at,
        };

        self.metadata.upload_sessions.insert(session.session_id.as_str().to_string(), session.clone()).await?;
        self.cache_session(&session).await;

        Ok(UploadInit {
            session_id: session.session_id.to_string(),
            chunk_size,
            total_chunks,
            expires_at,
            upload_urls: Self::upload_urls(session.session_id.as_str(), total_chunks),
        })
    }

    async fn cache_session(&self, session: &UploadSession) {
        let key = keys::upload_session(session.session_id.as_str());
        let Ok(json) = serde_json::to_string(session) else { return };
        let ttl = (session.expires_at - Utc::now()).to_std().unwrap_or(std::time::Duration::from_secs(1));
        let _ = self.volatile.set(&key, &json, Some(ttl)).await;
    }

    async fn evict_session(&self, session_id: &str) {
        let _ = self.volatile.delete(&keys::upload_session(session_id)).await;
        let _ = self.volatile.delete(&keys::session_chunks(session_id)).await;
    }

    /// Resolves the session: cache then durable store, rehydrating the
    /// cache when found only durably. Absent/expired both surface as
    /// `SESSION_EXPIRED`, per spec.md §4.5.
    async fn load_session(&self, session_id: &str) -> Result<UploadSession> {
        let key = keys::upload_session(session_id);
        if let Ok(Some(json)) = self.volatile.get(&key).await {
            if let Ok(session) = serde_json::from_str::<UploadSession>(&json) {
                return Ok(session);
            }
        }

        let session = self
            .metadata
            .session_by_id(session_id)
            .ok_or_else(|| Error::SessionExpired { session_id: session_id.to_string() })?;

        self.cache_session(&session).await;
        Ok(session)
    }

    async fn chunk_already_recorded(&self, session: &UploadSession, chunk_index: u32) -> bool {
        let key = keys::session_chunks(session.session_id.as_str());
        match self.volatile.sismember(&key, &chunk_index.to_string()).await {
            Ok(present) => present,
            // Fail open to the durable record, which is written
            // synchronously alongside the volatile set.
            Err(_) => session.has_chunk(chunk_index),
        }
    }

    pub async fn chunk(&self, session_id: &str, chunk_index: u32, bytes: &[u8], provided_hash: Option<&str>) -> Result<ChunkOutcome> {
        let mut session = self.load_session(session_id).await?;
        let now = Utc::now();

        if session.is_expired(now) || session.status == UploadStatus::Expired {
            return Err(Error::SessionExpired { session_id: session_id.to_string() });
        }

        if chunk_index >= session.total_chunks {
            self.events.emit(Event::ChunkRejected {
                session_id: session_id.to_string(),
                chunk_index,
                reason: "index out of range",
            });
            return Err(Error::ChunkValidation {
                msg: format!("chunk index {chunk_index} out of range (0..{})", session.total_chunks),
                chunk_index: Some(chunk_index),
            });
        }

        if self.chunk_already_recorded(&session, chunk_index).await {
            return Ok(ChunkOutcome {
                status: ChunkStatus::AlreadyUploaded,
                completed_chunks: session.completed_chunks.len() as u32,
                total_chunks: session.total_chunks,
                progress: session.progress(),
            });
        }

        let expected_size = session.expected_chunk_size(chunk_index);
        if bytes.len() as u64 != expected_size {
            self.events.emit(Event::ChunkRejected {
                session_id: session_id.to_string(),
                chunk_index,
                reason: "size mismatch",
            });
            return Err(Error::ChunkValidation {
                msg: format!("chunk {chunk_index} size mismatch: expected {expected_size}, got {}", bytes.len()),
                chunk_index: Some(chunk_index),
            });
        }

        let hash = format!("{:x}", md5::compute(bytes));
        if let Some(provided) = provided_hash {
            if !provided.is_empty() && !constant_time_eq(provided, &hash) {
                self.events.emit(Event::ChunkRejected {
                    session_id: session_id.to_string(),
                    chunk_index,
                    reason: "hash mismatch",
                });
                return Err(Error::ChunkValidation {
                    msg: format!("chunk {chunk_index} hash mismatch"),
                    chunk_index: Some(chunk_index),
                });
            }
        }

        self.storage.write_chunk(session_id, chunk_index, bytes).await?;

        let chunks_key = keys::session_chunks(session_id);
        let _ = self.volatile.sadd(&chunks_key, &chunk_index.to_string()).await;
        let ttl = (session.expires_at - now).to_std().unwrap_or(std::time::Duration::from_secs(1));
        let _ = self.volatile.expire(&chunks_key, ttl).await;

        if !session.has_chunk(chunk_index) {
            session.completed_chunks.push(ChunkRecord { index: chunk_index, size: bytes.len() as u64, hash, completed_at: now });
        }
        session.last_activity_at = now;
        if session.status == UploadStatus::Pending {
            session.status = UploadStatus::Uploading;
        }

        self.metadata.upload_sessions.update(session.session_id.as_str(), session.clone()).await?;
        self.cache_session(&session).await;

        self.events.emit(Event::ChunkAccepted { session_id: session_id.to_string(), chunk_index, size: bytes.len() as u64 });

        Ok(ChunkOutcome {
            status: ChunkStatus::Accepted,
            completed_chunks: session.completed_chunks.len() as u32,
            total_chunks: session.total_chunks,
            progress: session.progress(),
        })
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionStatusView> {
        let session = self.load_session(session_id).await?;
        Ok(Self::status_view(&session))
    }

    fn status_view(session: &UploadSession) -> SessionStatusView {
        SessionStatusView {
            session_id: session.session_id.to_string(),
            status: session.status,
            total_chunks: session.total_chunks,
            completed_chunks: session.completed_chunks.len() as u32,
            remaining_chunks: session.missing_chunks(),
            progress: session.progress(),
            expires_at: session.expires_at,
        }
    }

    pub async fn complete(&self, session_id: &str, user_id: &UserId, role: Role, quota_override: &QuotaOverride) -> Result<File> {
        let mut session = self.load_session(session_id).await?;

        if &session.user_id != user_id {
            return Err(Error::Authorization { msg: "session does not belong to caller".to_string() });
        }

        if !session.is_complete() {
            return Err(Error::UploadIncomplete { missing: session.missing_chunks() });
        }

        let started_at = session.started_at;
        session.status = UploadStatus::Assembling;
        self.metadata.upload_sessions.update(session.session_id.as_str(), session.clone()).await?;

        let storage_key = storage_key::generate(user_id, &session.filename);
        let tier = Self::initial_tier(user_id);

        let assembled = match self.storage.assemble_chunks(session_id, &storage_key, session.total_chunks, tier).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.fail_session(&mut session, "assembly failed").await?;
                return Err(error);
            }
        };

        if let Some(expected) = &session.expected_hash {
            if !constant_time_eq(expected, &assembled.hash) {
                let _ = self.storage.delete(&storage_key, tier).await;
                self.fail_session(&mut session, "HASH_MISMATCH").await?;
                return Err(Error::HashMismatch { expected: expected.clone(), actual: assembled.hash });
            }
        }

        let now = Utc::now();
        let expires_at = if role.is_premium_or_admin() { None } else { Some(now + chrono::Duration::days(self.config.expiry_days_free)) };

        let file = File {
            id: FileId::generate(),
            user_id: user_id.clone(),
            folder_id: session.folder_id.clone(),
            storage_key,
            original_name: session.filename.clone(),
            mime_type: session.mime_type.clone(),
            size: assembled.size,
            hash: assembled.hash,
            storage_tier: tier,
            downloads: 0,
            last_download_at: None,
            last_access_at: now,
            expires_at,
            is_public: false,
            password: None,
            is_deleted: false,
            deleted_at: None,
            migration_status: MigrationStatus::None,
            last_migration_at: None,
            metadata: HashMap::new(),
        };

        self.metadata.files.insert(file.id.as_str().to_string(), file.clone()).await?;
        self.quota.add_file(user_id, role, quota_override, file.size).await?;

        session.status = UploadStatus::Completed;
        session.file_id = Some(file.id.clone());
        session.storage_tier = Some(tier);
        session.completed_at = Some(now);
        self.metadata.upload_sessions.update(session.session_id.as_str(), session.clone()).await?;
        self.evict_session(session_id).await;

        self.events.emit(Event::SessionCompleted {
            session_id: session_id.to_string(),
            file_id: file.id.to_string(),
            size: file.size,
            duration: (now - started_at).to_std().unwrap_or_default(),
        });

        Ok(file)
    }

    /// `StorageTierService.getInitialTier` in the source always returns
    /// hot regardless of `userId` — reserved for future per-user tier
    /// policy, so the signature is preserved even though it's unused
    /// today (spec.md Open Questions).
    fn initial_tier(_user_id: &UserId) -> StorageTier {
        StorageTier::Hot
    }

    async fn fail_session(&self, session: &mut UploadSession, reason: &str) -> Result<()> {
        session.status = UploadStatus::Failed;
        session.error = Some(reason.to_string());
        self.metadata.upload_sessions.update(session.session_id.as_str(), session.clone()).await?;
        self.evict_session(session.session_id.as_str()).await;
        self.events.emit(Event::SessionFailed { session_id: session.session_id.to_string(), reason: reason.to_string() });
        Ok(())
    }

    /// Idempotent: an unknown session is treated as already-aborted.
    pub async fn abort(&self, session_id: &str, user_id: &UserId) -> Result<()> {
        let Ok(mut session) = self.load_session(session_id).await else {
            return Ok(());
        };

        if &session.user_id != user_id {
            return Err(Error::Authorization { msg: "session does not belong to caller".to_string() });
        }

        self.storage.delete_chunks(session_id).await?;
        self.fail_session(&mut session, "ABORTED").await
    }

    pub async fn resume(&self, session_id: &str, user_id: &UserId) -> Result<ResumeView> {
        let session = self.load_session(session_id).await?;
        if &session.user_id != user_id {
            return Err(Error::Authorization { msg: "session does not belong to caller".to_string() });
        }

        Ok(ResumeView {
            status: Self::status_view(&session),
            upload_urls: Self::upload_urls(session_id, session.total_chunks),
        })
    }
}

fn quota_denied(check: &crate::quota_accountant::UploadCheck) -> Error {
    use crate::quota_accountant::DenialReason;
    if check.reasons.iter().any(|r| r.reason == DenialReason::FileTooLarge) {
        return Error::FileSizeLimit { msg: "file exceeds the maximum allowed size".to_string() };
    }
    Error::Validation {
        msg: "upload would exceed quota".to_string(),
        context: crate::error::ErrorContext {
            fields: Some(check.reasons.iter().map(|r| format!("{:?}", r.reason)).collect()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullEventSink;
    use crate::volatile::InMemoryVolatileStore;
    use sha2::Digest;
    use tempfile::TempDir;

    async fn harness() -> (UploadEngine, UserId, TempDir) {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(MetadataStore::open(dir.path()).await.unwrap());
        let storage = Arc::new(StorageBackend::new(dir.path().join("blobs")));
        let volatile: Arc<dyn VolatileStore> = Arc::new(InMemoryVolatileStore::new());
        let quota = Arc::new(QuotaAccountant::new(metadata.clone(), Arc::new(NullEventSink), crate::config::QuotaConfig::default()));
        let engine = UploadEngine::new(
            metadata,
            storage,
            volatile,
            quota,
            Arc::new(NullEventSink),
            UploadEngineConfig { chunk_size: 10 * 1024 * 1024, session_ttl_secs: 86400, expiry_days_free: 5 },
        );
        (engine, UserId::generate(), dir)
    }

    fn no_override() -> QuotaOverride {
        QuotaOverride::default()
    }

    #[tokio::test]
    async fn happy_path_upload_assembles_and_hashes() {
        let (engine, user_id, _dir) = harness().await;
        let size = 25 * 1024 * 1024u64;
        let bytes: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

        let init = engine
            .init(&user_id, Role::Free, &no_override(), "movie.mp4", size, None, None, None)
            .await
            .unwrap();
        assert_eq!(init.total_chunks, 3);

        // out-of-order: 1, 2, 0
        let chunk_size = init.chunk_size as usize;
        for index in [1u32, 2, 0] {
            let start = index as usize * chunk_size;
            let end = ((index as usize + 1) * chunk_size).min(bytes.len());
            engine.chunk(&init.session_id, index, &bytes[start..end], None).await.unwrap();
        }

        let file = engine.complete(&init.session_id, &user_id, Role::Free, &no_override()).await.unwrap();
        assert_eq!(file.size, size);

        let mut hasher = sha2::Sha256::new();
        hasher.update(&bytes);
        assert_eq!(file.hash, hex::encode(hasher.finalize()));
        assert!(file.expires_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_chunk_post_is_idempotent() {
        let (engine, user_id, _dir) = harness().await;
        let init = engine
            .init(&user_id, Role::Free, &no_override(), "a.bin", 10, None, None, None)
            .await
            .unwrap();

        let first = engine.chunk(&init.session_id, 0, b"0123456789", None).await.unwrap();
        assert_eq!(first.status, ChunkStatus::Accepted);

        let second = engine.chunk(&init.session_id, 0, b"0123456789", None).await.unwrap();
        assert_eq!(second.status, ChunkStatus::AlreadyUploaded);
        assert_eq!(second.completed_chunks, 1);
    }

    #[tokio::test]
    async fn hash_mismatch_fails_session_and_leaves_no_blob() {
        let (engine, user_id, _dir) = harness().await;
        let init = engine
            .init(&user_id, Role::Free, &no_override(), "a.bin", 5, Some("0".repeat(64)), None, None)
            .await
            .unwrap();
        engine.chunk(&init.session_id, 0, b"hello", None).await.unwrap();

        let result = engine.complete(&init.session_id, &user_id, Role::Free, &no_override()).await;
        assert!(matches!(result, Err(Error::HashMismatch { .. })));

        let status = engine.status(&init.session_id).await.unwrap();
        assert_eq!(status.status, UploadStatus::Failed);

        let summary = engine.quota.get_summary(&user_id);
        assert_eq!(summary.usage.files, 0);
    }

    #[tokio::test]
    async fn complete_with_missing_chunks_is_rejected() {
        let (engine, user_id, _dir) = harness().await;
        let init = engine
            .init(&user_id, Role::Free, &no_override(), "a.bin", 20, None, None, None)
            .await
            .unwrap();
        engine.chunk(&init.session_id, 0, &vec![0u8; init.chunk_size as usize], None).await.unwrap();

        let result = engine.complete(&init.session_id, &user_id, Role::Free, &no_override()).await;
        assert!(matches!(result, Err(Error::UploadIncomplete { .. })));
    }

    #[tokio::test]
    async fn premium_uploads_never_expire() {
        let (engine, user_id, _dir) = harness().await;
        let init = engine
            .init(&user_id, Role::Premium, &no_override(), "a.bin", 5, None, None, None)
            .await
            .unwrap();
        engine.chunk(&init.session_id, 0, b"hello", None).await.unwrap();
        let file = engine.complete(&init.session_id, &user_id, Role::Premium, &no_override()).await.unwrap();
        assert!(file.expires_at.is_none());
    }

    #[tokio::test]
    async fn zero_size_init_is_rejected() {
        let (engine, user_id, _dir) = harness().await;
        let result = engine.init(&user_id, Role::Free, &no_override(), "a.bin", 0, None, None, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn init_respects_a_per_user_storage_override() {
        let (engine, user_id, _dir) = harness().await;
        let tight_override = QuotaOverride { max_storage: Some(100), max_file_size: None };
        let result = engine.init(&user_id, Role::Free, &tight_override, "a.bin", 1000, None, None, None).await;
        assert!(result.is_err());
    }
}
