//! Periodic mail sync scheduling.
//!
//! The [`MailSyncScheduler`] registers one unique periodic job per account
//! with a [`JobHost`]. The first run is aligned with the account's last
//! sync so that rescheduling (after a restart, or after the interval was
//! changed) does not shift the sync rhythm.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{Account, AccountId};

/// Prefix of the unique job key of an account's mail sync.
pub const MAIL_SYNC_KEY_PREFIX: &str = "MailSync";

/// Returns the unique job key for an account.
pub fn mail_sync_key(account_id: &AccountId) -> String {
    format!("{MAIL_SYNC_KEY_PREFIX}:{account_id}")
}

/// Conditions under which a job may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Constraints {
    pub requires_network: bool,
    pub requires_storage_not_low: bool,
}

impl Constraints {
    /// Network connected and storage not low.
    pub fn mail_sync() -> Self {
        Self {
            requires_network: true,
            requires_storage_not_low: true,
        }
    }

    pub fn are_met(&self, environment: &dyn SystemEnvironment) -> bool {
        (!self.requires_network || environment.is_network_available())
            && (!self.requires_storage_not_low || !environment.is_storage_low())
    }
}

/// Exponential retry backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
}

impl BackoffPolicy {
    pub const DEFAULT_INITIAL: Duration = Duration::from_secs(5 * 60);
    pub const MAX_DELAY: Duration = Duration::from_secs(5 * 60 * 60);

    pub fn exponential(initial: Duration) -> Self {
        Self { initial }
    }

    /// Delay before retry `attempt` (1-based): `initial * 2^(attempt - 1)`,
    /// capped at [`MAX_DELAY`](Self::MAX_DELAY).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(Self::MAX_DELAY)
            .min(Self::MAX_DELAY)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Self::DEFAULT_INITIAL)
    }
}

/// Registration of a unique periodic job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicJobRequest {
    /// Jobs with the same key replace each other.
    pub unique_key: String,
    pub period: Duration,
    pub initial_delay: Duration,
    pub constraints: Constraints,
    pub backoff: BackoffPolicy,
    /// The account to sync.
    pub account_id: AccountId,
}

/// Handle of a registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub unique_key: String,
    pub id: Uuid,
}

impl JobHandle {
    pub fn new(unique_key: impl Into<String>) -> Self {
        Self {
            unique_key: unique_key.into(),
            id: Uuid::new_v4(),
        }
    }
}

/// Facts about the device the scheduler consults.
#[cfg_attr(test, mockall::automock)]
pub trait SystemEnvironment: Send + Sync {
    fn is_network_available(&self) -> bool;

    fn is_storage_low(&self) -> bool;

    /// Whether the platform's global auto-sync switch is on.
    fn is_auto_sync_enabled(&self) -> bool;
}

/// Environment with fixed answers, for hosts that cannot observe the
/// device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticEnvironment {
    pub network_available: bool,
    pub storage_low: bool,
    pub auto_sync_enabled: bool,
}

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self {
            network_available: true,
            storage_low: false,
            auto_sync_enabled: true,
        }
    }
}

impl SystemEnvironment for StaticEnvironment {
    fn is_network_available(&self) -> bool {
        self.network_available
    }

    fn is_storage_low(&self) -> bool {
        self.storage_low
    }

    fn is_auto_sync_enabled(&self) -> bool {
        self.auto_sync_enabled
    }
}

/// User policy for background sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundSync {
    #[default]
    Always,
    Never,
    /// Follow the platform auto-sync switch.
    WhenAutoSyncEnabled,
}

impl BackgroundSync {
    pub fn allows_sync(&self, environment: &dyn SystemEnvironment) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::WhenAutoSyncEnabled => environment.is_auto_sync_enabled(),
        }
    }
}

/// Executes periodic jobs.
#[cfg_attr(test, mockall::automock)]
pub trait JobHost: Send + Sync {
    /// Registers a job, replacing any job with the same unique key.
    fn enqueue_unique_periodic(&self, request: PeriodicJobRequest) -> JobHandle;

    fn cancel_unique(&self, unique_key: &str);
}

/// Delay until the first run so that runs stay aligned with `last_sync`.
///
/// Never-synced accounts, accounts whose last sync lies in the future
/// (clock changes) and overdue accounts run immediately.
pub fn compute_initial_delay(
    last_sync: Option<DateTime<Utc>>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Duration {
    let Some(last) = last_sync else {
        return Duration::ZERO;
    };
    if last > now {
        return Duration::ZERO;
    }

    let Ok(interval) = chrono::Duration::from_std(interval) else {
        return Duration::ZERO;
    };
    let next = last + interval;
    if next <= now {
        return Duration::ZERO;
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Keeps one periodic mail sync job per account registered with a host.
pub struct MailSyncScheduler {
    host: Arc<dyn JobHost>,
    environment: Arc<dyn SystemEnvironment>,
    policy: BackgroundSync,
    backoff: BackoffPolicy,
    handles: Mutex<HashMap<AccountId, JobHandle>>,
}

impl MailSyncScheduler {
    pub fn new(
        host: Arc<dyn JobHost>,
        environment: Arc<dyn SystemEnvironment>,
        policy: BackgroundSync,
    ) -> Self {
        Self {
            host,
            environment,
            policy,
            backoff: BackoffPolicy::default(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<AccountId, JobHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules, reschedules or cancels the periodic sync of an account.
    pub fn schedule_mail_sync(&self, account: &Account) -> Option<JobHandle> {
        self.schedule_mail_sync_at(account, Utc::now())
    }

    /// Same as [`schedule_mail_sync`](Self::schedule_mail_sync) with an
    /// explicit current time.
    pub fn schedule_mail_sync_at(&self, account: &Account, now: DateTime<Utc>) -> Option<JobHandle> {
        if !self.policy.allows_sync(self.environment.as_ref()) {
            debug!(account = %account.id, "background sync disabled, not scheduling");
            if self.is_scheduled(&account.id) {
                self.cancel_mail_sync(&account.id);
            }
            return None;
        }

        if !account.is_periodic_sync_enabled() {
            self.cancel_mail_sync(&account.id);
            return None;
        }

        let period = Duration::from_secs(account.sync_interval_minutes as u64 * 60);
        let initial_delay = compute_initial_delay(account.last_sync, period, now);

        let request = PeriodicJobRequest {
            unique_key: mail_sync_key(&account.id),
            period,
            initial_delay,
            constraints: Constraints::mail_sync(),
            backoff: self.backoff,
            account_id: account.id.clone(),
        };

        let handle = self.host.enqueue_unique_periodic(request);
        info!(
            account = %account.id,
            interval_minutes = account.sync_interval_minutes,
            initial_delay_secs = initial_delay.as_secs(),
            "mail sync scheduled"
        );
        self.handles().insert(account.id.clone(), handle.clone());
        Some(handle)
    }

    /// Cancels the periodic sync of an account.
    pub fn cancel_mail_sync(&self, account_id: &AccountId) {
        self.host.cancel_unique(&mail_sync_key(account_id));
        if self.handles().remove(account_id).is_some() {
            info!(account = %account_id, "mail sync cancelled");
        }
    }

    /// Registers every account, e.g. at startup. Returns how many jobs
    /// were scheduled.
    pub fn schedule_all(&self, accounts: &[Account]) -> usize {
        accounts
            .iter()
            .filter_map(|account| self.schedule_mail_sync(account))
            .count()
    }

    pub fn is_scheduled(&self, account_id: &AccountId) -> bool {
        self.handles().contains_key(account_id)
    }

    pub fn handle(&self, account_id: &AccountId) -> Option<JobHandle> {
        self.handles().get(account_id).cloned()
    }
}
