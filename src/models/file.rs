use super::{FileId, FolderId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Hot,
    Cold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    None,
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub user_id: UserId,
    pub folder_id: Option<FolderId>,
    pub storage_key: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    pub hash: String,
    pub storage_tier: StorageTier,
    pub downloads: u64,
    pub last_download_at: Option<DateTime<Utc>>,
    pub last_access_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_public: bool,
    pub password: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub migration_status: MigrationStatus,
    pub last_migration_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

impl File {
    /// `isExpired` is derived, never stored: a file past its `expiresAt`
    /// remains readable until the sweeper runs.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn record_download(&mut self, now: DateTime<Utc>, extension_days: i64) {
        self.downloads += 1;
        self.last_download_at = Some(now);
        self.last_access_at = now;
        if let Some(expires_at) = self.expires_at {
            let extended = now + chrono::Duration::days(extension_days);
            self.expires_at = Some(expires_at.max(extended));
        }
    }

    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.is_deleted = true;
        self.deleted_at = Some(now);
    }
}
