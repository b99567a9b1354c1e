//! # Retry Scheduler
//!
//! Decides which failed records may run again and when, and owns the
//! housekeeping operations over `sync_records`.
//!
//! ## Retry Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   attempt ends failed/partial                                           │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   retry_count < max? ──no──► next_retry_at = NULL (frozen)              │
//! │        │ yes                        │                                   │
//! │        ▼                            │ reset_failed()                    │
//! │   next_retry_at = now + backoff(n)  │ retry_count = 0                   │
//! │        │                            ▼                                   │
//! │        ▼                     due immediately                            │
//! │   due (next_retry_at <= now) ◄──────┘                                   │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   begin_retry: pending, retry_count += 1 → re-run failed items          │
//! │                                                                         │
//! │   backoff(n) = initial × 2^n, capped, no jitter                         │
//! │   30s → 60s → 120s → 240s → 480s ... ≤ 1h                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::info;

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use titan_core::{SyncRecord, SyncStatus};
use titan_db::SyncRecordRepository;

/// Doublings after which the backoff is pinned at its cap.
const MAX_DOUBLINGS: i64 = 32;

// =============================================================================
// Retry Policy
// =============================================================================

/// Retry ceiling and backoff curve.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: i64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }

    fn exponential(&self) -> ExponentialBackoff {
        let initial = self.initial_backoff.max(Duration::from_millis(1));
        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_backoff.max(initial),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Delay before the retry that follows attempt number `retry_count`.
    pub fn backoff(&self, retry_count: i64) -> Duration {
        let mut curve = self.exponential();
        let mut delay = curve.initial_interval;
        for _ in 0..=retry_count.clamp(0, MAX_DOUBLINGS) {
            match curve.next_backoff() {
                Some(next) => delay = next,
                None => break,
            }
        }
        delay
    }

    /// Whether the record may run again.
    pub fn is_eligible(&self, record: &SyncRecord) -> bool {
        record.status.needs_retry() && record.retry_count < self.max_retries
    }

    /// When a record that just ended in `status` after `retry_count`
    /// retries should run again. `None` when it succeeded or is out of
    /// retries.
    pub fn next_retry_at(
        &self,
        status: SyncStatus,
        retry_count: i64,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if !status.needs_retry() || retry_count >= self.max_retries {
            return None;
        }
        chrono::Duration::from_std(self.backoff(retry_count))
            .ok()
            .map(|delay| now + delay)
    }

    /// Checks that a forced retry is allowed for `record`.
    pub fn check_force_retry(&self, record: &SyncRecord) -> SyncResult<()> {
        if !record.status.needs_retry() {
            return Err(SyncError::NotRetryable {
                id: record.id,
                reason: format!("status is {}", record.status),
            });
        }
        if record.retry_count >= self.max_retries {
            return Err(SyncError::NotRetryable {
                id: record.id,
                reason: format!(
                    "retry limit of {} reached, reset failed syncs first",
                    self.max_retries
                ),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Retry Scheduler
// =============================================================================

/// Retry bookkeeping on top of the record store.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    records: SyncRecordRepository,
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(records: SyncRecordRepository, policy: RetryPolicy) -> Self {
        RetryScheduler { records, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Loads a record that a forced retry may run.
    pub async fn load_for_force_retry(&self, id: i64) -> SyncResult<SyncRecord> {
        let record = self
            .records
            .find(id)
            .await?
            .ok_or(SyncError::RecordNotFound(id))?;
        self.policy.check_force_retry(&record)?;
        Ok(record)
    }

    /// Eligible records whose retry time has come, oldest first.
    pub async fn due(&self, now: DateTime<Utc>) -> SyncResult<Vec<SyncRecord>> {
        Ok(self.records.due_for_retry(now, self.policy.max_retries).await?)
    }

    /// In-flight records plus records still waiting for a retry.
    pub async fn pending(&self) -> SyncResult<Vec<SyncRecord>> {
        Ok(self
            .records
            .pending_and_awaiting_retry(self.policy.max_retries)
            .await?)
    }

    /// Zeroes the retry counter of every failed/partial record, optionally
    /// for one entity type. Statuses are untouched.
    pub async fn reset_failed(&self, entity_type: Option<&str>) -> SyncResult<u64> {
        let count = self.records.reset_failed(entity_type).await?;
        info!(count, entity_type = ?entity_type, "Reset failed sync records");
        Ok(count)
    }

    /// Purges terminal records completed more than `days_to_keep` days ago.
    pub async fn clean_old_records(&self, days_to_keep: u32) -> SyncResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days_to_keep));
        let count = self.records.purge_completed_before(cutoff).await?;
        info!(count, days_to_keep, "Purged old sync records");
        Ok(count)
    }

    /// Fails records left `pending` for longer than `stale_after`.
    pub async fn recover_interrupted(&self, stale_after: Duration) -> SyncResult<u64> {
        let stale = chrono::Duration::from_std(stale_after)
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        Ok(self.records.recover_interrupted(Utc::now() - stale).await?)
    }
}
