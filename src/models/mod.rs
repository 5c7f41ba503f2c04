pub mod file;
pub mod folder;
pub mod quota;
pub mod upload_session;
pub mod user;

pub use file::{File, MigrationStatus, StorageTier};
pub use folder::Folder;
pub use quota::{DefaultQuotas, Quota, QuotaLimits, QuotaUsage};
pub use upload_session::{ChunkRecord, UploadSession, UploadStatus};
pub use user::{QuotaOverride, RefreshToken, Role, User};

/// Opaque identifiers. Newtypes rather than bare `String`/`Uuid` so that a
/// `UserId` can never be passed where a `FileId` is expected.
pub mod ids {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    macro_rules! id_type {
        ($name:ident) => {
            #[derive(
                Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            )]
            pub struct $name(pub String);

            impl $name {
                pub fn new(value: impl Into<String>) -> Self {
                    Self(value.into())
                }

                pub fn generate() -> Self {
                    Self(uuid::Uuid::new_v4().to_string())
                }

                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<String> for $name {
                fn from(value: String) -> Self {
                    Self(value)
                }
            }

            impl From<&str> for $name {
                fn from(value: &str) -> Self {
                    Self(value.to_string())
                }
            }
        };
    }

    id_type!(UserId);
    id_type!(FileId);
    id_type!(FolderId);
    id_type!(SessionId);
}

pub use ids::{FileId, FolderId, SessionId, UserId};
