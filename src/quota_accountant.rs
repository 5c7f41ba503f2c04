//! Tracks per-user storage/file-count/bandwidth usage against role or
//! per-user override limits. Limits resolve per field as
//! `quotaOverride.<field>` if set, else the role default (`maxFiles` has
//! no override field, so it is always the role default); `-1` in any
//! limit bypasses that check entirely.

use crate::config::QuotaConfig;
use crate::error::Result;
use crate::event::{Event, EventSink};
use crate::metadata::MetadataStore;
use crate::models::quota::UNLIMITED;
use crate::models::{DefaultQuotas, Quota, QuotaLimits, QuotaOverride, Role, UserId};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    FileTooLarge,
    StorageExceeded,
    FileCountExceeded,
}

#[derive(Debug, Clone, Serialize)]
pub struct Denial {
    pub reason: DenialReason,
    pub limit: i64,
    pub current: i64,
    pub required: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadCheck {
    pub allowed: bool,
    pub reasons: Vec<Denial>,
}

pub struct QuotaAccountant {
    metadata: Arc<MetadataStore>,
    events: Arc<dyn EventSink>,
    quota_config: QuotaConfig,
}

impl QuotaAccountant {
    pub fn new(metadata: Arc<MetadataStore>, events: Arc<dyn EventSink>, quota_config: QuotaConfig) -> Self {
        Self { metadata, events, quota_config }
    }

    fn quota_or_default(&self, user_id: &UserId) -> Quota {
        self.metadata.quota_for_user(user_id).unwrap_or_else(|| Quota::new(user_id.clone()))
    }

    /// The role table, with the free tier's numbers sourced from
    /// `QuotaConfig` (so a deployment can change spec.md §3's table
    /// without a code change); premium/admin stay hardcoded unlimited.
    fn role_defaults(&self, role: Role) -> QuotaLimits {
        match role {
            Role::Free => QuotaLimits {
                max_storage: self.quota_config.free_max_storage,
                max_file_size: self.quota_config.free_max_file_size,
                max_files: self.quota_config.free_max_files,
            },
            Role::Premium | Role::Admin => DefaultQuotas::for_role(role),
        }
    }

    pub fn can_upload(&self, user_id: &UserId, role: Role, quota_override: &QuotaOverride, file_size: u64) -> UploadCheck {
        let quota = self.quota_or_default(user_id);
        let limits = quota.effective_limits(self.role_defaults(role), quota_override);
        let mut reasons = Vec::new();

        if limits.max_file_size != UNLIMITED && file_size as i64 > limits.max_file_size {
            reasons.push(Denial {
                reason: DenialReason::FileTooLarge,
                limit: limits.max_file_size,
                current: file_size as i64,
                required: None,
            });
        }

        if limits.max_storage != UNLIMITED {
            let projected = quota.usage.storage as i64 + file_size as i64;
            if projected > limits.max_storage {
                reasons.push(Denial {
                    reason: DenialReason::StorageExceeded,
                    limit: limits.max_storage,
                    current: quota.usage.storage as i64,
                    required: Some(projected),
                });
            }
        }

        if limits.max_files != UNLIMITED && quota.usage.files as i64 + 1 > limits.max_files {
            reasons.push(Denial {
                reason: DenialReason::FileCountExceeded,
                limit: limits.max_files,
                current: quota.usage.files as i64,
                required: None,
            });
        }

        UploadCheck { allowed: reasons.is_empty(), reasons }
    }

    /// Records a newly-completed upload against the user's usage.
    /// `isOverQuota` flips true the moment this pushes usage past
    /// `maxStorage` — a soft limit recorded after the fact; ingress
    /// gating happens earlier, in `can_upload`.
    pub async fn add_file(&self, user_id: &UserId, role: Role, quota_override: &QuotaOverride, size: u64) -> Result<()> {
        let mut quota = self.quota_or_default(user_id);
        quota.usage.storage += size;
        quota.usage.files += 1;

        let limits = quota.effective_limits(self.role_defaults(role), quota_override);
        if limits.max_storage != UNLIMITED && quota.usage.storage as i64 > limits.max_storage {
            if !quota.is_over_quota {
                quota.is_over_quota = true;
                quota.over_quota_since = Some(Utc::now());
                self.events.emit(Event::QuotaBreached {
                    user_id: user_id.to_string(),
                    usage: quota.usage.storage,
                    limit: limits.max_storage,
                });
            }
        } else {
            quota.is_over_quota = false;
            quota.over_quota_since = None;
        }

        self.persist(user_id, quota).await
    }

    pub async fn remove_file(&self, user_id: &UserId, size: u64) -> Result<()> {
        let mut quota = self.quota_or_default(user_id);
        quota.usage.storage = quota.usage.storage.saturating_sub(size);
        quota.usage.files = quota.usage.files.saturating_sub(1);
        self.persist(user_id, quota).await
    }

    pub async fn add_bandwidth(&self, user_id: &UserId, bytes: u64) -> Result<()> {
        let mut quota = self.quota_or_default(user_id);
        let now = Utc::now();
        quota.usage.bandwidth.roll_if_needed(now);
        quota.usage.bandwidth.daily += bytes;
        quota.usage.bandwidth.monthly += bytes;
        self.persist(user_id, quota).await
    }

    pub fn get_summary(&self, user_id: &UserId) -> Quota {
        self.quota_or_default(user_id)
    }

    /// Recomputes a user's `usage.storage`/`usage.files` from the
    /// authoritative `File` records, discarding any drift accumulated
    /// from lost `addFile`/`removeFile` calls (e.g. a crash between a
    /// storage write and its quota update).
    pub async fn sync_from_files(&self, user_id: &UserId) -> Result<()> {
        let storage = self.metadata.total_storage_for_user(user_id);
        let files = self.metadata.file_count_for_user(user_id);

        let mut quota = self.quota_or_default(user_id);
        quota.usage.storage = storage;
        quota.usage.files = files;
        self.persist(user_id, quota).await
    }

    async fn persist(&self, user_id: &UserId, quota: Quota) -> Result<()> {
        if self.metadata.quotas.find_one_by_id(user_id.as_str()).is_some() {
            self.metadata.quotas.update(user_id.as_str(), quota).await
        } else {
            self.metadata.quotas.insert(user_id.as_str(), quota).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullEventSink;
    use tempfile::TempDir;

    async fn harness() -> (QuotaAccountant, UserId, TempDir) {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(MetadataStore::open(dir.path()).await.unwrap());
        let accountant = QuotaAccountant::new(metadata, Arc::new(NullEventSink), QuotaConfig::default());
        (accountant, UserId::generate(), dir)
    }

    #[tokio::test]
    async fn denies_file_over_max_size() {
        let (accountant, user_id, _dir) = harness().await;
        let check = accountant.can_upload(&user_id, Role::Free, &QuotaOverride::default(), 20 * 1024 * 1024 * 1024);
        assert!(!check.allowed);
        assert_eq!(check.reasons[0].reason, DenialReason::FileTooLarge);
    }

    #[tokio::test]
    async fn premium_bypasses_all_limits() {
        let (accountant, user_id, _dir) = harness().await;
        let check = accountant.can_upload(&user_id, Role::Premium, &QuotaOverride::default(), 500 * 1024 * 1024 * 1024);
        assert!(check.allowed);
    }

    #[tokio::test]
    async fn per_user_override_tightens_the_role_default() {
        let (accountant, user_id, _dir) = harness().await;
        let over_ride = QuotaOverride { max_storage: Some(500), max_file_size: None };
        let check = accountant.can_upload(&user_id, Role::Free, &over_ride, 1000);
        assert!(!check.allowed);
        assert_eq!(check.reasons[0].reason, DenialReason::StorageExceeded);
        assert_eq!(check.reasons[0].limit, 500);
    }

    #[tokio::test]
    async fn add_file_then_remove_file_is_conservative() {
        let (accountant, user_id, _dir) = harness().await;
        accountant.add_file(&user_id, Role::Free, &QuotaOverride::default(), 1000).await.unwrap();
        accountant.add_file(&user_id, Role::Free, &QuotaOverride::default(), 2000).await.unwrap();
        let summary = accountant.get_summary(&user_id);
        assert_eq!(summary.usage.storage, 3000);
        assert_eq!(summary.usage.files, 2);

        accountant.remove_file(&user_id, 1000).await.unwrap();
        let summary = accountant.get_summary(&user_id);
        assert_eq!(summary.usage.storage, 2000);
        assert_eq!(summary.usage.files, 1);
    }
}
