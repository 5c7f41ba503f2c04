//! The authenticated-caller boundary. Engine components (`UploadEngine`,
//! `QuotaAccountant`, `AccessPolicy`, ...) never see a full `User` record
//! or a credential — only the role/quota-override slice they need to make
//! a decision. This breaks the cycle that a full `User` dependency would
//! create back toward the upload/quota machinery (spec.md §9), and keeps
//! credential verification strictly upstream of the core.

use crate::models::{QuotaOverride, Role, UserId};

/// The role-and-limits view of a user that the core depends on. Built by
/// the HTTP adapter from an already-authenticated session; the core never
/// constructs one itself.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: UserId,
    pub role: Role,
    pub quota_override: QuotaOverride,
}

/// Who is making a request, if anyone. `Anonymous` covers public-link
/// downloads, which spec.md §4.8 allows without a session.
#[derive(Debug, Clone)]
pub enum Principal {
    Anonymous,
    Authenticated(UserProfile),
}

impl Principal {
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Principal::Anonymous => None,
            Principal::Authenticated(profile) => Some(&profile.user_id),
        }
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        match self {
            Principal::Anonymous => None,
            Principal::Authenticated(profile) => Some(profile),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Principal::Authenticated(UserProfile { role: Role::Admin, .. })
        )
    }
}
