use super::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of refresh tokens retained per user; the oldest is
/// evicted once a new one would push the list past this cap.
pub const MAX_REFRESH_TOKENS: usize = 5;

/// Consecutive failed logins before an account is locked out.
pub const MAX_FAILED_LOGIN_ATTEMPTS: u32 = 5;

/// Lockout duration once `MAX_FAILED_LOGIN_ATTEMPTS` is reached.
pub const LOCKOUT_DURATION_SECS: i64 = 15 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Free,
    Premium,
    Admin,
}

impl Role {
    pub fn is_premium_or_admin(&self) -> bool {
        matches!(self, Role::Premium | Role::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaOverride {
    pub max_storage: Option<i64>,
    pub max_file_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub failed_login_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
    pub refresh_tokens: Vec<RefreshToken>,
    pub quota_override: QuotaOverride,
}

impl User {
    /// Normalizes an email the way the store requires it: lowercase, trimmed.
    pub fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| now < until)
    }

    /// Record a failed authentication attempt; locks the account once the
    /// threshold is crossed.
    pub fn record_failed_login(&mut self, now: DateTime<Utc>) {
        self.failed_login_attempts += 1;
        if self.failed_login_attempts >= MAX_FAILED_LOGIN_ATTEMPTS {
            self.lockout_until = Some(now + chrono::Duration::seconds(LOCKOUT_DURATION_SECS));
        }
    }

    /// Any successful authentication resets both the failure counter and
    /// the lockout.
    pub fn record_successful_login(&mut self, now: DateTime<Utc>) {
        self.failed_login_attempts = 0;
        self.lockout_until = None;
        self.last_login = Some(now);
    }

    /// Appends a refresh token, evicting the oldest if the list would
    /// exceed `MAX_REFRESH_TOKENS`. Best-effort under concurrent logins —
    /// no lock is taken by the caller of this method.
    pub fn add_refresh_token(&mut self, token: RefreshToken) {
        self.refresh_tokens.push(token);
        if self.refresh_tokens.len() > MAX_REFRESH_TOKENS {
            self.refresh_tokens.remove(0);
        }
    }
}

/// Password hashing helper. The core never issues or verifies login
/// sessions (see SPEC_FULL.md §B) but the data model requires the field
/// exist and be checkable, so these two pure functions are provided for
/// whatever external auth collaborator owns credential issuance.
pub mod password {
    use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng};
    use argon2::{Argon2, Params, Version};

    /// Cost parameters chosen to land comfortably above the bcrypt-class
    /// "cost >= 12" floor spec.md requires.
    fn hasher() -> Argon2<'static> {
        let params = Params::new(19_456, 2, 1, None).expect("valid argon2 params");
        Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params)
    }

    pub fn hash_password(plaintext: &str) -> Result<String, String> {
        let salt = SaltString::generate(&mut OsRng);
        hasher()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| e.to_string())
    }

    pub fn verify_password(plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        hasher()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_email() {
        assert_eq!(User::normalize_email("  Foo@Example.COM "), "foo@example.com");
    }

    #[test]
    fn locks_out_after_threshold() {
        let mut user = test_user();
        let now = Utc::now();
        for _ in 0..MAX_FAILED_LOGIN_ATTEMPTS {
            user.record_failed_login(now);
        }
        assert!(user.is_locked_out(now));
        assert!(!user.is_locked_out(now + chrono::Duration::minutes(16)));
    }

    #[test]
    fn successful_login_resets_counters() {
        let mut user = test_user();
        let now = Utc::now();
        user.record_failed_login(now);
        user.record_failed_login(now);
        user.record_successful_login(now);
        assert_eq!(user.failed_login_attempts, 0);
        assert!(user.lockout_until.is_none());
    }

    #[test]
    fn refresh_token_cap_evicts_oldest() {
        let mut user = test_user();
        let now = Utc::now();
        for i in 0..MAX_REFRESH_TOKENS + 2 {
            user.add_refresh_token(RefreshToken {
                token: format!("token-{i}"),
                created_at: now,
                expires_at: now + chrono::Duration::days(30),
            });
        }
        assert_eq!(user.refresh_tokens.len(), MAX_REFRESH_TOKENS);
        assert_eq!(user.refresh_tokens.first().unwrap().token, "token-2");
    }

    #[test]
    fn password_roundtrip() {
        let hash = password::hash_password("correct horse battery staple").unwrap();
        assert!(password::verify_password("correct horse battery staple", &hash));
        assert!(!password::verify_password("wrong", &hash));
    }

    fn test_user() -> User {
        User {
            id: UserId::generate(),
            email: "user@example.com".to_string(),
            password_hash: String::new(),
            role: Role::Free,
            is_active: true,
            last_login: None,
            failed_login_attempts: 0,
            lockout_until: None,
            refresh_tokens: Vec::new(),
            quota_override: QuotaOverride::default(),
        }
    }
}
