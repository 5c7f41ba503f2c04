//! Unified download access decision, spec.md §4.8. Stateless — takes
//! the file record and caller context it needs and returns a yes/no,
//! so both `DownloadEngine` and any admin tooling can reuse it without
//! duplicating the branching.

use crate::error::{Error, Result};
use crate::metadata::MetadataStore;
use crate::models::{File, Role, UserId};
use crate::util::constant_time_eq;

pub struct AccessPolicy<'a> {
    metadata: &'a MetadataStore,
}

impl<'a> AccessPolicy<'a> {
    pub fn new(metadata: &'a MetadataStore) -> Self {
        Self { metadata }
    }

    /// `check` per spec.md §4.8: public+no-password always allows;
    /// a password-protected file requires a matching `password`
    /// regardless of public/private; a private file otherwise requires
    /// the caller to be the owner or an admin.
    pub fn check(&self, file: &File, user_id: Option<&UserId>, password: Option<&str>) -> Result<()> {
        if let Some(stored) = &file.password {
            let supplied = password.ok_or_else(access_denied)?;
            if !constant_time_eq(supplied, stored) {
                return Err(access_denied());
            }
            return Ok(());
        }

        if file.is_public {
            return Ok(());
        }

        let Some(user_id) = user_id else {
            return Err(access_denied());
        };

        if *user_id == file.user_id {
            return Ok(());
        }

        let is_admin = self.metadata.user_by_id(user_id).is_some_and(|u| u.role == Role::Admin);
        if is_admin {
            return Ok(());
        }

        Err(access_denied())
    }
}

fn access_denied() -> Error {
    Error::Authorization { msg: "not authorized to access this file".to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileId, MigrationStatus, StorageTier};
    use chrono::Utc;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn sample_file(owner: &UserId, is_public: bool, password: Option<&str>) -> File {
        File {
            id: FileId::generate(),
            user_id: owner.clone(),
            folder_id: None,
            storage_key: "key".into(),
            original_name: "f.txt".into(),
            mime_type: "text/plain".into(),
            size: 10,
            hash: "h".into(),
            storage_tier: StorageTier::Hot,
            downloads: 0,
            last_download_at: None,
            last_access_at: Utc::now(),
            expires_at: None,
            is_public,
            password: password.map(str::to_string),
            is_deleted: false,
            deleted_at: None,
            migration_status: MigrationStatus::None,
            last_migration_at: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn public_file_with_no_password_is_open() {
        let dir = TempDir::new().unwrap();
        let metadata = MetadataStore::open(dir.path()).await.unwrap();
        let policy = AccessPolicy::new(&metadata);
        let owner = UserId::generate();
        let file = sample_file(&owner, true, None);
        assert!(policy.check(&file, None, None).is_ok());
    }

    #[tokio::test]
    async fn password_protected_requires_match() {
        let dir = TempDir::new().unwrap();
        let metadata = MetadataStore::open(dir.path()).await.unwrap();
        let policy = AccessPolicy::new(&metadata);
        let owner = UserId::generate();
        let file = sample_file(&owner, true, Some("secret"));
        assert!(policy.check(&file, None, Some("secret")).is_ok());
        assert!(policy.check(&file, None, Some("wrong")).is_err());
        assert!(policy.check(&file, None, None).is_err());
    }

    #[tokio::test]
    async fn private_file_allows_owner_denies_stranger() {
        let dir = TempDir::new().unwrap();
        let metadata = MetadataStore::open(dir.path()).await.unwrap();
        let policy = AccessPolicy::new(&metadata);
        let owner = UserId::generate();
        let stranger = UserId::generate();
        let file = sample_file(&owner, false, None);

        assert!(policy.check(&file, Some(&owner), None).is_ok());
        assert!(policy.check(&file, Some(&stranger), None).is_err());
        assert!(policy.check(&file, None, None).is_err());
    }
}
