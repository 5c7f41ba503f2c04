use super::BatchSummary;
use crate::error::Result;
use crate::metadata::MetadataStore;
use crate::models::UploadStatus;
use crate::storage::StorageBackend;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Three sweeps: live sessions past `expiresAt` become `expired` (chunks
/// removed), orphaned staging directories are deleted, and old terminal
/// session records are purged from the durable store. Per spec.md §4.10.
pub struct CleanupWorker {
    metadata: Arc<MetadataStore>,
    storage: Arc<StorageBackend>,
    batch_size: usize,
    session_purge_days: i64,
    orphan_chunk_age_secs: i64,
}

impl CleanupWorker {
    pub fn new(
        metadata: Arc<MetadataStore>,
        storage: Arc<StorageBackend>,
        batch_size: usize,
        session_purge_days: i64,
        orphan_chunk_age_secs: i64,
    ) -> Self {
        Self { metadata, storage, batch_size, session_purge_days, orphan_chunk_age_secs }
    }

    pub async fn run_once(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();
        self.expire_live_sessions(&mut summary).await;
        self.remove_orphan_staging(&mut summary).await;
        self.purge_old_terminal_sessions(&mut summary).await;
        summary
    }

    async fn expire_live_sessions(&self, summary: &mut BatchSummary) {
        let now = Utc::now();
        let mut candidates = self.metadata.live_sessions_past_expiry(now);
        candidates.truncate(self.batch_size);

        for mut session in candidates {
            let result: Result<()> = async {
                self.storage.delete_chunks(session.session_id.as_str()).await?;
                session.status = UploadStatus::Expired;
                self.metadata.upload_sessions.update(session.session_id.as_str(), session).await?;
                Ok(())
            }
            .await;
            summary.record(result);
        }
    }

    async fn remove_orphan_staging(&self, summary: &mut BatchSummary) {
        let Ok(staged) = self.storage.staging_sessions().await else {
            return;
        };

        let age_threshold = Duration::from_secs(self.orphan_chunk_age_secs.max(0) as u64);

        for (session_id, modified_at) in staged.into_iter().take(self.batch_size) {
            let is_old = modified_at.elapsed().map(|elapsed| elapsed >= age_threshold).unwrap_or(false);
            if !is_old {
                continue;
            }

            let is_orphan = match self.metadata.session_by_id(&session_id) {
                None => true,
                Some(session) => session.status.is_terminal(),
            };

            if is_orphan {
                summary.record(self.storage.delete_chunks(&session_id).await);
            }
        }
    }

    async fn purge_old_terminal_sessions(&self, summary: &mut BatchSummary) {
        let cutoff = Utc::now() - chrono::Duration::days(self.session_purge_days);
        let mut candidates = self.metadata.terminal_sessions_before(cutoff);
        candidates.truncate(self.batch_size);

        for session in candidates {
            let result = self.metadata.upload_sessions.delete(session.session_id.as_str()).await.map(|_| ());
            summary.record(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FolderId, SessionId, UploadSession, UserId};
    use tempfile::TempDir;

    fn session(status: UploadStatus, expires_at: chrono::DateTime<Utc>, last_activity_at: chrono::DateTime<Utc>) -> UploadSession {
        UploadSession {
            session_id: SessionId::generate(),
            user_id: UserId::generate(),
            filename: "f.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            total_size: 10,
            expected_hash: None,
            folder_id: None::<FolderId>,
            chunk_size: 10,
            total_chunks: 1,
            completed_chunks: Vec::new(),
            status,
            error: None,
            file_id: None,
            storage_tier: None,
            started_at: Utc::now(),
            last_activity_at,
            completed_at: None,
            expires_at,
        }
    }

    #[tokio::test]
    async fn live_session_past_expiry_becomes_expired() {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(MetadataStore::open(dir.path()).await.unwrap());
        let storage = Arc::new(StorageBackend::new(dir.path().join("blobs")));

        let s = session(UploadStatus::Uploading, Utc::now() - chrono::Duration::seconds(1), Utc::now());
        metadata.upload_sessions.insert(s.session_id.as_str().to_string(), s.clone()).await.unwrap();

        let worker = CleanupWorker::new(metadata.clone(), storage, 100, 7, 3600);
        let summary = worker.run_once().await;

        assert!(summary.processed >= 1);
        let after = metadata.session_by_id(s.session_id.as_str()).unwrap();
        assert_eq!(after.status, UploadStatus::Expired);
    }

    #[tokio::test]
    async fn old_terminal_session_is_purged() {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(MetadataStore::open(dir.path()).await.unwrap());
        let storage = Arc::new(StorageBackend::new(dir.path().join("blobs")));

        let old_activity = Utc::now() - chrono::Duration::days(10);
        let s = session(UploadStatus::Completed, Utc::now() + chrono::Duration::days(1), old_activity);
        metadata.upload_sessions.insert(s.session_id.as_str().to_string(), s.clone()).await.unwrap();

        let worker = CleanupWorker::new(metadata.clone(), storage, 100, 7, 3600);
        worker.run_once().await;

        assert!(metadata.session_by_id(s.session_id.as_str()).is_none());
    }
}
