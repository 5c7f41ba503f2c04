//! Durable storage of structural records: `File`, `Folder`, `User`,
//! `Quota`, `UploadSession`. Backed by [`collection::Collection`], one
//! per entity, each a JSON-file-per-record directory plus an in-memory
//! mirror.
//!
//! The "secondary indexes" this module is required to expose are plain
//! predicate queries over the in-memory collection rather than literal
//! index structures — see `collection` for why that's the right
//! tradeoff here. Transactions are not provided; callers maintain
//! cross-record invariants themselves via compensating updates, same as
//! the teacher's repo/package pairing.

mod collection;

use crate::error::Result;
use crate::models::{
    File, Folder, Quota, StorageTier, UploadSession, User, UserId,
};
use chrono::{DateTime, Utc};
use collection::Collection;
use std::path::Path;

pub use collection::Collection as RawCollection;

pub struct MetadataStore {
    pub files: Collection<File>,
    pub folders: Collection<Folder>,
    pub quotas: Collection<Quota>,
    pub upload_sessions: Collection<UploadSession>,
    pub users: Collection<User>,
}

impl MetadataStore {
    pub async fn open(base_dir: &Path) -> Result<Self> {
        Ok(Self {
            files: Collection::open(base_dir.join("files")).await?,
            folders: Collection::open(base_dir.join("folders")).await?,
            quotas: Collection::open(base_dir.join("quotas")).await?,
            upload_sessions: Collection::open(base_dir.join("upload_sessions")).await?,
            users: Collection::open(base_dir.join("users")).await?,
        })
    }

    /// `(email)` unique — case-insensitive, since `User::normalize_email`
    /// lowercases before storage.
    pub fn user_by_email(&self, email: &str) -> Option<User> {
        let normalized = User::normalize_email(email);
        self.users.find_one(|u| u.email == normalized)
    }

    pub fn user_by_id(&self, user_id: &UserId) -> Option<User> {
        self.users.find_one_by_id(user_id.as_str())
    }

    // -- File indexes -----------------------------------------------

    /// `(userId)`
    pub fn files_by_user(&self, user_id: &UserId) -> Vec<File> {
        self.files.find(|f| &f.user_id == user_id)
    }

    /// `(userId, isDeleted)`
    pub fn files_by_user_and_deleted(&self, user_id: &UserId, is_deleted: bool) -> Vec<File> {
        self.files
            .find(|f| &f.user_id == user_id && f.is_deleted == is_deleted)
    }

    /// `(expiresAt, isDeleted)` — candidates for the expiry sweeper.
    pub fn files_expiring_before(&self, cutoff: DateTime<Utc>) -> Vec<File> {
        self.files.find(|f| {
            !f.is_deleted && f.expires_at.is_some_and(|at| at <= cutoff)
        })
    }

    /// `(storageTier, lastAccessAt)` — candidates for cold migration:
    /// hot files untouched since `cutoff`.
    pub fn hot_files_idle_since(&self, cutoff: DateTime<Utc>) -> Vec<File> {
        self.files.find(|f| {
            !f.is_deleted && f.storage_tier == StorageTier::Hot && f.last_access_at <= cutoff
        })
    }

    /// `(downloads, storageTier)` — candidates for promotion back to hot,
    /// ordered by the caller once returned.
    pub fn cold_files_by_downloads(&self, min_downloads: u64) -> Vec<File> {
        self.files
            .find(|f| !f.is_deleted && f.storage_tier == StorageTier::Cold && f.downloads >= min_downloads)
    }

    /// `(userId, path)` unique — folder lookup by path within a user's tree.
    pub fn folder_by_user_and_path(&self, user_id: &UserId, path: &str) -> Option<Folder> {
        self.folders.find_one(|f| &f.user_id == user_id && f.path == path)
    }

    /// `(userId, parentId)` — direct children of a folder (or roots when
    /// `parent_id` is `None`).
    pub fn folders_by_parent(&self, user_id: &UserId, parent_id: Option<&crate::models::FolderId>) -> Vec<Folder> {
        self.folders
            .find(|f| &f.user_id == user_id && f.parent_id.as_ref() == parent_id)
    }

    /// Descendants of `path` within `user_id`'s tree — every folder whose
    /// path starts with `"<path>/"`, the cascade-update working set for
    /// `FolderTree::move`/`rename`.
    pub fn folders_under_path(&self, user_id: &UserId, path: &str) -> Vec<Folder> {
        let prefix = format!("{path}/");
        self.folders.find(|f| &f.user_id == user_id && f.path.starts_with(&prefix))
    }

    pub fn files_by_folder(&self, user_id: &UserId, folder_id: Option<&crate::models::FolderId>) -> Vec<File> {
        self.files
            .find(|f| !f.is_deleted && &f.user_id == user_id && f.folder_id.as_ref() == folder_id)
    }

    /// Aggregate sum of `size` over a user's non-deleted files.
    pub fn total_storage_for_user(&self, user_id: &UserId) -> u64 {
        self.files
            .aggregate_sum(|f| &f.user_id == user_id && !f.is_deleted, |f| f.size as i64)
            .max(0) as u64
    }

    pub fn file_count_for_user(&self, user_id: &UserId) -> u64 {
        self.files.find(|f| &f.user_id == user_id && !f.is_deleted).len() as u64
    }

    // -- UploadSession (sessionId unique via record id) --------------

    pub fn session_by_id(&self, session_id: &str) -> Option<UploadSession> {
        self.upload_sessions.find_one_by_id(session_id)
    }

    /// Live sessions (`pending`/`uploading`/`assembling`) whose
    /// `expiresAt` has already passed — the cleanup worker's expired-
    /// session sweep. These are marked `expired`, not deleted; the
    /// durable record is later removed by `terminal_sessions_before`
    /// once its grace period (`session_purge_days`) elapses.
    pub fn live_sessions_past_expiry(&self, now: DateTime<Utc>) -> Vec<UploadSession> {
        self.upload_sessions.find(|s| s.status.is_live() && s.is_expired(now))
    }

    /// Terminal sessions last touched before `cutoff` — the cleanup
    /// worker's durable-record purge.
    pub fn terminal_sessions_before(&self, cutoff: DateTime<Utc>) -> Vec<UploadSession> {
        self.upload_sessions.find(|s| s.status.is_terminal() && s.last_activity_at <= cutoff)
    }

    // -- Quota ---------------------------------------------------------

    pub fn quota_for_user(&self, user_id: &UserId) -> Option<Quota> {
        self.quotas.find_one_by_id(user_id.as_str())
    }
}
