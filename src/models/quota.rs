use super::{QuotaOverride, Role, UserId};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// `-1` in any limit field means "unlimited" per spec.md §3.
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub max_storage: i64,
    pub max_file_size: i64,
    pub max_files: i64,
}

pub struct DefaultQuotas;

impl DefaultQuotas {
    pub fn for_role(role: Role) -> QuotaLimits {
        match role {
            Role::Free => QuotaLimits {
                max_storage: 50 * 1024 * 1024 * 1024,       // 50 GiB
                max_file_size: 10 * 1024 * 1024 * 1024,     // 10 GiB
                max_files: 1000,
            },
            Role::Premium | Role::Admin => QuotaLimits {
                max_storage: UNLIMITED,
                max_file_size: UNLIMITED,
                max_files: UNLIMITED,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BandwidthUsage {
    pub daily: u64,
    pub monthly: u64,
    pub last_reset: Option<DateTime<Utc>>,
}

impl BandwidthUsage {
    /// Resets the daily counter when the wall-clock day has changed, and
    /// the monthly counter when the wall-clock month has changed, relative
    /// to `last_reset`.
    pub fn roll_if_needed(&mut self, now: DateTime<Utc>) {
        let Some(last_reset) = self.last_reset else {
            self.last_reset = Some(now);
            return;
        };

        if last_reset.date_naive() != now.date_naive() {
            self.daily = 0;
        }
        if last_reset.year() != now.year() || last_reset.month() != now.month() {
            self.monthly = 0;
        }
        self.last_reset = Some(now);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub storage: u64,
    pub files: u64,
    pub bandwidth: BandwidthUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    pub user_id: UserId,
    pub limits: Option<QuotaLimits>,
    pub usage: QuotaUsage,
    pub is_over_quota: bool,
    pub over_quota_since: Option<DateTime<Utc>>,
}

impl Quota {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            limits: None,
            usage: QuotaUsage::default(),
            is_over_quota: false,
            over_quota_since: None,
        }
    }

    /// Resolves per-field effective limits against `role_defaults` (the
    /// role table, or a config-supplied stand-in for it — see
    /// `QuotaAccountant::role_defaults`): each of `maxStorage`/`maxFileSize`
    /// comes from `user_override` if set, else the matching default field,
    /// per spec.md §4.4. `QuotaOverride` carries no `maxFiles` field, so
    /// `maxFiles` is always the role default.
    pub fn effective_limits(&self, role_defaults: QuotaLimits, user_override: &QuotaOverride) -> QuotaLimits {
        QuotaLimits {
            max_storage: user_override.max_storage.unwrap_or(role_defaults.max_storage),
            max_file_size: user_override.max_file_size.unwrap_or(role_defaults.max_file_size),
            max_files: role_defaults.max_files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_role_has_finite_defaults() {
        let limits = DefaultQuotas::for_role(Role::Free);
        assert_eq!(limits.max_storage, 50 * 1024 * 1024 * 1024);
        assert_eq!(limits.max_files, 1000);
    }

    #[test]
    fn premium_is_unlimited() {
        let limits = DefaultQuotas::for_role(Role::Premium);
        assert_eq!(limits.max_storage, UNLIMITED);
    }

    #[test]
    fn bandwidth_resets_on_day_change() {
        let mut usage = BandwidthUsage {
            daily: 100,
            monthly: 500,
            last_reset: Some(Utc::now() - chrono::Duration::days(1)),
        };
        usage.roll_if_needed(Utc::now());
        assert_eq!(usage.daily, 0);
    }

    #[test]
    fn user_override_wins_per_field_over_role_defaults() {
        let quota = Quota::new(UserId::generate());
        let defaults = DefaultQuotas::for_role(Role::Free);
        let over_ride = QuotaOverride { max_storage: Some(100), max_file_size: None };

        let limits = quota.effective_limits(defaults, &over_ride);
        assert_eq!(limits.max_storage, 100);
        assert_eq!(limits.max_file_size, defaults.max_file_size);
        assert_eq!(limits.max_files, defaults.max_files);
    }
}
