use super::BatchSummary;
use crate::error::Result;
use crate::metadata::MetadataStore;
use crate::models::{File, MigrationStatus, StorageTier};
use crate::storage::StorageBackend;
use chrono::Utc;
use std::sync::Arc;

/// Two passes per tick: demote idle hot files to cold, promote
/// frequently-downloaded cold files back to hot. Per spec.md §4.10.
pub struct MigrationWorker {
    metadata: Arc<MetadataStore>,
    storage: Arc<StorageBackend>,
    batch_size: usize,
    hot_to_cold_days: i64,
    cold_to_hot_downloads: u64,
}

impl MigrationWorker {
    pub fn new(
        metadata: Arc<MetadataStore>,
        storage: Arc<StorageBackend>,
        batch_size: usize,
        hot_to_cold_days: i64,
        cold_to_hot_downloads: u64,
    ) -> Self {
        Self { metadata, storage, batch_size, hot_to_cold_days, cold_to_hot_downloads }
    }

    pub async fn run_once(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();
        self.migrate_cold_candidates(&mut summary).await;
        self.migrate_hot_candidates(&mut summary).await;
        summary
    }

    async fn migrate_cold_candidates(&self, summary: &mut BatchSummary) {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::days(self.hot_to_cold_days);

        let candidates: Vec<File> = self
            .metadata
            .hot_files_idle_since(cutoff)
            .into_iter()
            .filter(|f| !matches!(f.migration_status, MigrationStatus::Pending | MigrationStatus::InProgress))
            .filter(|f| !self.owner_is_premium_or_admin(f))
            .take(self.batch_size)
            .collect();

        for file in candidates {
            summary.record(self.migrate_one(file, StorageTier::Hot, StorageTier::Cold).await);
        }
    }

    async fn migrate_hot_candidates(&self, summary: &mut BatchSummary) {
        let now = Utc::now();
        let recent_download_cutoff = now - chrono::Duration::days(7);

        let candidates: Vec<File> = self
            .metadata
            .cold_files_by_downloads(self.cold_to_hot_downloads)
            .into_iter()
            .filter(|f| f.last_download_at.is_some_and(|at| at >= recent_download_cutoff))
            .filter(|f| !matches!(f.migration_status, MigrationStatus::Pending | MigrationStatus::InProgress))
            .take(self.batch_size)
            .collect();

        for file in candidates {
            summary.record(self.migrate_one(file, StorageTier::Cold, StorageTier::Hot).await);
        }
    }

    fn owner_is_premium_or_admin(&self, file: &File) -> bool {
        self.metadata.user_by_id(&file.user_id).is_some_and(|u| u.role.is_premium_or_admin())
    }

    async fn migrate_one(&self, mut file: File, from: StorageTier, to: StorageTier) -> Result<()> {
        file.migration_status = MigrationStatus::InProgress;
        self.metadata.files.update(file.id.as_str(), file.clone()).await?;

        let outcome = self.storage.migrate(&file.storage_key, from, to).await;

        match outcome {
            Ok(()) => {
                file.storage_tier = to;
                file.migration_status = MigrationStatus::Completed;
                file.last_migration_at = Some(Utc::now());
                self.metadata.files.update(file.id.as_str(), file.clone()).await?;
                Ok(())
            }
            Err(error) => {
                file.migration_status = MigrationStatus::Failed;
                self.metadata.files.update(file.id.as_str(), file.clone()).await?;
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileId, UserId};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn sample(tier: StorageTier, last_access_at: chrono::DateTime<Utc>, downloads: u64, last_download_at: Option<chrono::DateTime<Utc>>) -> File {
        File {
            id: FileId::generate(),
            user_id: UserId::generate(),
            folder_id: None,
            storage_key: "key.bin".to_string(),
            original_name: "key.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            size: 4,
            hash: "h".to_string(),
            storage_tier: tier,
            downloads,
            last_download_at,
            last_access_at,
            expires_at: None,
            is_public: false,
            password: None,
            is_deleted: false,
            deleted_at: None,
            migration_status: MigrationStatus::None,
            last_migration_at: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn idle_hot_file_migrates_to_cold() {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(MetadataStore::open(dir.path()).await.unwrap());
        let storage = Arc::new(StorageBackend::new(dir.path().join("blobs")));
        storage.write_chunk("s", 0, b"data").await.unwrap();
        storage.assemble_chunks("s", "key.bin", 1, StorageTier::Hot).await.unwrap();

        let file = sample(StorageTier::Hot, Utc::now() - chrono::Duration::days(60), 0, None);
        metadata.files.insert(file.id.as_str().to_string(), file.clone()).await.unwrap();

        let worker = MigrationWorker::new(metadata.clone(), storage.clone(), 100, 30, 5);
        let summary = worker.run_once().await;

        assert_eq!(summary.processed, 1);
        let migrated = metadata.files.find_one_by_id(file.id.as_str()).unwrap();
        assert_eq!(migrated.storage_tier, StorageTier::Cold);
        assert!(matches!(migrated.migration_status, MigrationStatus::Completed));
    }

    #[tokio::test]
    async fn popular_cold_file_migrates_back_to_hot() {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(MetadataStore::open(dir.path()).await.unwrap());
        let storage = Arc::new(StorageBackend::new(dir.path().join("blobs")));
        storage.write_chunk("s", 0, b"data").await.unwrap();
        storage.assemble_chunks("s", "key.bin", 1, StorageTier::Cold).await.unwrap();

        let file = sample(StorageTier::Cold, Utc::now(), 10, Some(Utc::now()));
        metadata.files.insert(file.id.as_str().to_string(), file.clone()).await.unwrap();

        let worker = MigrationWorker::new(metadata.clone(), storage.clone(), 100, 30, 5);
        let summary = worker.run_once().await;

        assert_eq!(summary.processed, 1);
        let migrated = metadata.files.find_one_by_id(file.id.as_str()).unwrap();
        assert_eq!(migrated.storage_tier, StorageTier::Hot);
    }
}
