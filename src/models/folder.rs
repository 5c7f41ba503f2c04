use super::{FolderId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub user_id: UserId,
    pub name: String,
    pub parent_id: Option<FolderId>,
    pub path: String,
    pub depth: u32,
}

impl Folder {
    /// `depth = count('/' in path) - 1` for non-root paths, per spec.md §3.
    pub fn depth_for_path(path: &str) -> u32 {
        path.matches('/').count().saturating_sub(1) as u32
    }
}
