//! Hierarchy maintenance with path-string denormalization, spec.md §4.7.
//! `Folder.path` is kept denormalized (the full absolute slash path, not
//! just a parent pointer) so lookups and listings never need to walk
//! ancestors; the cost is that every move/rename must cascade the
//! update to all descendants, which is what most of this module does.

use crate::error::{Error, Result};
use crate::metadata::MetadataStore;
use crate::models::{File, Folder, FolderId, UserId};
use crate::quota_accountant::QuotaAccountant;
use crate::sanitize::sanitize_folder_name;
use crate::storage::StorageBackend;
use std::sync::Arc;

pub struct FolderTree {
    metadata: Arc<MetadataStore>,
    storage: Arc<StorageBackend>,
    quota: Arc<QuotaAccountant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    NameAsc,
    NewestFirst,
    OldestFirst,
}

pub struct ContentsPage {
    pub folders: Vec<Folder>,
    pub files: Vec<File>,
    pub page: u32,
    pub limit: u32,
    pub total: usize,
}

impl FolderTree {
    pub fn new(metadata: Arc<MetadataStore>, storage: Arc<StorageBackend>, quota: Arc<QuotaAccountant>) -> Self {
        Self { metadata, storage, quota }
    }

    fn parent_path(&self, user_id: &UserId, parent_id: Option<&FolderId>) -> Result<String> {
        match parent_id {
            None => Ok(String::new()),
            Some(id) => {
                let parent = self
                    .metadata
                    .folders
                    .find_one_by_id(id.as_str())
                    .ok_or_else(|| Error::NotFound { msg: "parent folder not found".to_string() })?;
                if &parent.user_id != user_id {
                    return Err(Error::NotFound { msg: "parent folder not found".to_string() });
                }
                Ok(parent.path)
            }
        }
    }

    pub async fn create(&self, user_id: &UserId, name: &str, parent_id: Option<FolderId>) -> Result<Folder> {
        let name = sanitize_folder_name(name);
        if name.is_empty() {
            return Err(Error::Validation { msg: "folder name is empty after sanitization".to_string(), context: Default::default() });
        }

        let parent_path = self.parent_path(user_id, parent_id.as_ref())?;
        let path = format!("{parent_path}/{name}");

        if self.metadata.folder_by_user_and_path(user_id, &path).is_some() {
            return Err(Error::Conflict { msg: format!("folder {path} already exists") });
        }

        let folder = Folder {
            id: FolderId::generate(),
            user_id: user_id.clone(),
            name,
            parent_id,
            depth: Folder::depth_for_path(&path),
            path,
        };

        self.metadata.folders.insert(folder.id.as_str().to_string(), folder.clone()).await?;
        Ok(folder)
    }

    /// Rejects a move if `new_parent_id` lies within `folder_id`'s own
    /// subtree (including `folder_id` itself) — walks from the
    /// candidate parent upward looking for `folder_id`.
    fn would_create_cycle(&self, folder_id: &FolderId, new_parent_id: &FolderId) -> bool {
        if folder_id == new_parent_id {
            return true;
        }
        let mut current = self.metadata.folders.find_one_by_id(new_parent_id.as_str());
        while let Some(folder) = current {
            match &folder.parent_id {
                Some(id) if id == folder_id => return true,
                Some(id) => current = self.metadata.folders.find_one_by_id(id.as_str()),
                None => return false,
            }
        }
        false
    }

    async fn cascade_path_update(&self, user_id: &UserId, old_path: &str, new_path: &str) -> Result<()> {
        for descendant in self.metadata.folders_under_path(user_id, old_path) {
            let suffix = descendant.path.strip_prefix(old_path).expect("checked by folders_under_path");
            let mut updated = descendant.clone();
            updated.path = format!("{new_path}{suffix}");
            updated.depth = Folder::depth_for_path(&updated.path);
            self.metadata.folders.update(updated.id.as_str(), updated).await?;
        }
        Ok(())
    }

    pub async fn move_folder(&self, user_id: &UserId, folder_id: &FolderId, new_parent_id: Option<FolderId>) -> Result<Folder> {
        let mut folder = self
            .metadata
            .folders
            .find_one_by_id(folder_id.as_str())
            .filter(|f| &f.user_id == user_id)
            .ok_or_else(|| Error::NotFound { msg: "folder not found".to_string() })?;

        if let Some(target) = &new_parent_id {
            if self.would_create_cycle(folder_id, target) {
                return Err(Error::Validation {
                    msg: "cannot move a folder into its own subtree".to_string(),
                    context: Default::default(),
                });
            }
        }

        let new_parent_path = self.parent_path(user_id, new_parent_id.as_ref())?;
        let new_path = format!("{new_parent_path}/{}", folder.name);

        if self.metadata.folder_by_user_and_path(user_id, &new_path).is_some() {
            return Err(Error::Conflict { msg: format!("folder {new_path} already exists") });
        }

        let old_path = folder.path.clone();
        folder.parent_id = new_parent_id;
        folder.path = new_path.clone();
        folder.depth = Folder::depth_for_path(&new_path);

        self.metadata.folders.update(folder.id.as_str(), folder.clone()).await?;
        self.cascade_path_update(user_id, &old_path, &new_path).await?;
        Ok(folder)
    }

    pub async fn rename(&self, user_id: &UserId, folder_id: &FolderId, new_name: &str) -> Result<Folder> {
        let new_name = sanitize_folder_name(new_name);
        let mut folder = self
            .metadata
            .folders
            .find_one_by_id(folder_id.as_str())
            .filter(|f| &f.user_id == user_id)
            .ok_or_else(|| Error::NotFound { msg: "folder not found".to_string() })?;

        let parent_path = self.parent_path(user_id, folder.parent_id.as_ref())?;
        let new_path = format!("{parent_path}/{new_name}");

        if new_path != folder.path && self.metadata.folder_by_user_and_path(user_id, &new_path).is_some() {
            return Err(Error::Conflict { msg: format!("folder {new_path} already exists") });
        }

        let old_path = folder.path.clone();
        folder.name = new_name;
        folder.path = new_path.clone();
        folder.depth = Folder::depth_for_path(&new_path);

        self.metadata.folders.update(folder.id.as_str(), folder.clone()).await?;
        self.cascade_path_update(user_id, &old_path, &new_path).await?;
        Ok(folder)
    }

    /// Recursive delete: children (depth-first) before the folder
    /// itself. Each file gets its blob removed then its record deleted;
    /// quota is only adjusted for files not already soft-deleted, to
    /// avoid double-accounting against files the expiry sweeper already
    /// subtracted.
    pub async fn delete(&self, user_id: &UserId, folder_id: &FolderId) -> Result<()> {
        let folder = self
            .metadata
            .folders
            .find_one_by_id(folder_id.as_str())
            .filter(|f| &f.user_id == user_id)
            .ok_or_else(|| Error::NotFound { msg: "folder not found".to_string() })?;

        let mut descendants = self.metadata.folders_under_path(user_id, &folder.path);
        // Deepest first so a child folder's files are gone before its
        // parent folder record is removed.
        descendants.sort_by_key(|f| std::cmp::Reverse(f.depth));

        for descendant in &descendants {
            self.delete_folder_files(user_id, &descendant.id).await?;
            self.metadata.folders.delete(descendant.id.as_str()).await?;
        }

        self.delete_folder_files(user_id, folder_id).await?;
        self.metadata.folders.delete(folder_id.as_str()).await?;
        Ok(())
    }

    async fn delete_folder_files(&self, user_id: &UserId, folder_id: &FolderId) -> Result<()> {
        for file in self.metadata.files_by_folder(user_id, Some(folder_id)) {
            let already_deleted = file.is_deleted;
            self.storage.delete(&file.storage_key, file.storage_tier).await?;
            self.metadata.files.delete(file.id.as_str()).await?;
            if !already_deleted {
                self.quota.remove_file(user_id, file.size).await?;
            }
        }
        Ok(())
    }

    pub fn list(&self, user_id: &UserId, parent_id: Option<&FolderId>) -> Vec<Folder> {
        self.metadata.folders_by_parent(user_id, parent_id)
    }

    pub fn contents(&self, user_id: &UserId, folder_id: Option<&FolderId>, page: u32, limit: u32, sort: SortOrder) -> ContentsPage {
        let mut folders = self.metadata.folders_by_parent(user_id, folder_id);
        let mut files = self.metadata.files_by_folder(user_id, folder_id);

        match sort {
            SortOrder::NameAsc => {
                folders.sort_by(|a, b| a.name.cmp(&b.name));
                files.sort_by(|a, b| a.original_name.cmp(&b.original_name));
            }
            SortOrder::NewestFirst => files.sort_by(|a, b| b.last_access_at.cmp(&a.last_access_at)),
            SortOrder::OldestFirst => files.sort_by(|a, b| a.last_access_at.cmp(&b.last_access_at)),
        }

        let total = folders.len() + files.len();
        let start = (page.saturating_sub(1) * limit) as usize;
        let end = (start + limit as usize).min(files.len());
        let files = if start < files.len() { files[start..end].to_vec() } else { Vec::new() };

        ContentsPage { folders, files, page, limit, total }
    }

    pub async fn move_file(&self, user_id: &UserId, file_id: &str, folder_id: Option<FolderId>) -> Result<File> {
        let mut file = self
            .metadata
            .files
            .find_one_by_id(file_id)
            .filter(|f| &f.user_id == user_id)
            .ok_or_else(|| Error::NotFound { msg: "file not found".to_string() })?;

        if let Some(target) = &folder_id {
            self.metadata
                .folders
                .find_one_by_id(target.as_str())
                .filter(|f| &f.user_id == user_id)
                .ok_or_else(|| Error::NotFound { msg: "target folder not found".to_string() })?;
        }

        file.folder_id = folder_id;
        self.metadata.files.update(file.id.as_str(), file.clone()).await?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullEventSink;
    use tempfile::TempDir;

    async fn harness() -> (FolderTree, UserId, TempDir) {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(MetadataStore::open(dir.path()).await.unwrap());
        let storage = Arc::new(StorageBackend::new(dir.path().join("blobs")));
        let quota = Arc::new(QuotaAccountant::new(metadata.clone(), Arc::new(NullEventSink), crate::config::QuotaConfig::default()));
        let tree = FolderTree::new(metadata, storage, quota);
        (tree, UserId::generate(), dir)
    }

    #[tokio::test]
    async fn create_sets_path_and_depth() {
        let (tree, user_id, _dir) = harness().await;
        let a = tree.create(&user_id, "a", None).await.unwrap();
        assert_eq!(a.path, "/a");
        assert_eq!(a.depth, 0);

        let b = tree.create(&user_id, "b", Some(a.id.clone())).await.unwrap();
        assert_eq!(b.path, "/a/b");
        assert_eq!(b.depth, 1);
    }

    #[tokio::test]
    async fn duplicate_name_under_same_parent_conflicts() {
        let (tree, user_id, _dir) = harness().await;
        tree.create(&user_id, "a", None).await.unwrap();
        let second = tree.create(&user_id, "a", None).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn move_cascades_descendant_paths() {
        let (tree, user_id, _dir) = harness().await;
        let a = tree.create(&user_id, "a", None).await.unwrap();
        let b = tree.create(&user_id, "b", Some(a.id.clone())).await.unwrap();
        let c = tree.create(&user_id, "c", Some(b.id.clone())).await.unwrap();
        let target = tree.create(&user_id, "target", None).await.unwrap();

        tree.move_folder(&user_id, &b.id, Some(target.id.clone())).await.unwrap();

        let moved_c = tree.metadata.folders.find_one_by_id(c.id.as_str()).unwrap();
        assert_eq!(moved_c.path, "/target/b/c");
        assert_eq!(moved_c.depth, 2);
    }

    #[tokio::test]
    async fn move_into_own_subtree_is_rejected() {
        let (tree, user_id, _dir) = harness().await;
        let a = tree.create(&user_id, "a", None).await.unwrap();
        let b = tree.create(&user_id, "b", Some(a.id.clone())).await.unwrap();

        let result = tree.move_folder(&user_id, &a.id, Some(b.id.clone())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rename_cascades_to_children() {
        let (tree, user_id, _dir) = harness().await;
        let a = tree.create(&user_id, "a", None).await.unwrap();
        let b = tree.create(&user_id, "b", Some(a.id.clone())).await.unwrap();

        tree.rename(&user_id, &a.id, "renamed").await.unwrap();

        let b_after = tree.metadata.folders.find_one_by_id(b.id.as_str()).unwrap();
        assert_eq!(b_after.path, "/renamed/b");
    }
}
