use super::BatchSummary;
use crate::metadata::MetadataStore;
use crate::quota_accountant::QuotaAccountant;
use crate::storage::StorageBackend;
use crate::volatile::{VolatileStore, keys};
use chrono::Utc;
use std::sync::Arc;

/// Sweeps files past `expiresAt`: removes the blob, soft-deletes the
/// record, decrements quota, invalidates the metadata cache. Processes
/// oldest-`expiresAt`-first, in batches of `batch_size`.
pub struct ExpiryWorker {
    metadata: Arc<MetadataStore>,
    storage: Arc<StorageBackend>,
    quota: Arc<QuotaAccountant>,
    volatile: Arc<dyn VolatileStore>,
    batch_size: usize,
}

impl ExpiryWorker {
    pub fn new(
        metadata: Arc<MetadataStore>,
        storage: Arc<StorageBackend>,
        quota: Arc<QuotaAccountant>,
        volatile: Arc<dyn VolatileStore>,
        batch_size: usize,
    ) -> Self {
        Self { metadata, storage, quota, volatile, batch_size }
    }

    pub async fn run_once(&self) -> BatchSummary {
        let now = Utc::now();
        let mut candidates = self.metadata.files_expiring_before(now);
        candidates.sort_by_key(|f| f.expires_at);
        candidates.truncate(self.batch_size);

        let mut summary = BatchSummary::default();
        for mut file in candidates {
            let result: crate::error::Result<()> = async {
                self.storage.delete(&file.storage_key, file.storage_tier).await?;
                file.soft_delete(now);
                self.metadata.files.update(file.id.as_str(), file.clone()).await?;
                self.quota.remove_file(&file.user_id, file.size).await?;
                let _ = self.volatile.delete(&keys::file(file.id.as_str())).await;
                Ok(())
            }
            .await;
            summary.record(result);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullEventSink;
    use crate::models::{File, FileId, MigrationStatus, Role, StorageTier, UserId};
    use crate::volatile::InMemoryVolatileStore;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn expired_file_is_soft_deleted_and_quota_released() {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(MetadataStore::open(dir.path()).await.unwrap());
        let storage = Arc::new(StorageBackend::new(dir.path().join("blobs")));
        let quota = Arc::new(QuotaAccountant::new(metadata.clone(), Arc::new(NullEventSink), crate::config::QuotaConfig::default()));
        let volatile: Arc<dyn VolatileStore> = Arc::new(InMemoryVolatileStore::new());

        let user_id = UserId::generate();
        storage.write_chunk("s", 0, b"payload").await.unwrap();
        storage.assemble_chunks("s", "key.bin", 1, StorageTier::Hot).await.unwrap();
        quota.add_file(&user_id, Role::Free, &crate::models::QuotaOverride::default(), 7).await.unwrap();

        let file = File {
            id: FileId::generate(),
            user_id: user_id.clone(),
            folder_id: None,
            storage_key: "key.bin".to_string(),
            original_name: "key.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            size: 7,
            hash: "h".to_string(),
            storage_tier: StorageTier::Hot,
            downloads: 0,
            last_download_at: None,
            last_access_at: Utc::now(),
            expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            is_public: false,
            password: None,
            is_deleted: false,
            deleted_at: None,
            migration_status: MigrationStatus::None,
            last_migration_at: None,
            metadata: HashMap::new(),
        };
        metadata.files.insert(file.id.as_str().to_string(), file.clone()).await.unwrap();

        let worker = ExpiryWorker::new(metadata.clone(), storage.clone(), quota.clone(), volatile, 100);
        let summary = worker.run_once().await;

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 0);

        let swept = metadata.files.find_one_by_id(file.id.as_str()).unwrap();
        assert!(swept.is_deleted);
        assert!(storage.open_range("key.bin", StorageTier::Hot, None, None).await.is_err());
        assert_eq!(quota.get_summary(&user_id).usage.storage, 0);
    }
}
