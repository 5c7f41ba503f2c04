use super::{FileId, FolderId, StorageTier, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Assembling,
    Completed,
    Failed,
    Expired,
}

impl UploadStatus {
    /// Whether `self` is a valid predecessor of `next` along the state
    /// machine in spec.md §4.5. Re-entering the same state is allowed
    /// (e.g. another chunk while already `Uploading`).
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        match (self, next) {
            (Pending, Pending | Uploading) => true,
            (Uploading, Uploading | Assembling) => true,
            (Assembling, Completed | Failed) => true,
            // any live state can be aborted or can expire
            (Pending | Uploading | Assembling, Failed | Expired) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Expired
        )
    }

    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub index: u32,
    pub size: u64,
    pub hash: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_id: super::SessionId,
    pub user_id: UserId,
    pub filename: String,
    pub mime_type: String,
    pub total_size: u64,
    pub expected_hash: Option<String>,
    pub folder_id: Option<FolderId>,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub completed_chunks: Vec<ChunkRecord>,
    pub status: UploadStatus,
    pub error: Option<String>,
    pub file_id: Option<FileId>,
    pub storage_tier: Option<StorageTier>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn total_chunks_for(total_size: u64, chunk_size: u64) -> u32 {
        ((total_size as f64) / (chunk_size as f64)).ceil() as u32
    }

    pub fn expected_chunk_size(&self, index: u32) -> u64 {
        if index + 1 < self.total_chunks {
            self.chunk_size
        } else {
            let remainder = self.total_size % self.chunk_size;
            if remainder == 0 {
                self.chunk_size
            } else {
                remainder
            }
        }
    }

    pub fn has_chunk(&self, index: u32) -> bool {
        self.completed_chunks.iter().any(|c| c.index == index)
    }

    pub fn is_complete(&self) -> bool {
        self.completed_chunks.len() == self.total_chunks as usize
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.has_chunk(*i))
            .collect()
    }

    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 1.0;
        }
        self.completed_chunks.len() as f64 / self.total_chunks as f64
    }
}
