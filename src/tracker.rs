//! Collaborator-facing API over the shared usage store.
//!
//! Metering must never break the request that triggered it: `record_usage`
//! logs and reports `false` instead of returning errors, and the read
//! operations fall back to empty data. Maintenance operations (reset, sweep)
//! return their failures so an operator sees them.

use crate::config::{Config, StoreConfig};
use crate::error::{LedgerError, Result};
use crate::ledger::TokenCounts;
use crate::model::{day_key, UsageEvent, UserLedger};
use crate::pricing::PricingTable;
use crate::retention;
use crate::snapshot::{Budgets, DailyStats, MonthlyHistoryEntry, UsageSnapshot};
use crate::store::LockedStore;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::PathBuf;
use tracing::{error, info, warn};

pub struct UsageTracker {
    store: LockedStore,
    pricing: PricingTable,
    budgets: Budgets,
}

impl UsageTracker {
    pub fn new(store: LockedStore, pricing: PricingTable, budgets: Budgets) -> Self {
        Self {
            store,
            pricing,
            budgets,
        }
    }

    /// Tracker over `path` with built-in pricing and default budgets.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::from_config(&Config {
            store: StoreConfig {
                path: Some(path.into()),
                lock_timeout_ms: None,
            },
            ..Config::default()
        })
    }

    pub fn from_config(config: &Config) -> Self {
        let store = LockedStore::new(config.store.resolved_path())
            .with_lock_timeout(config.store.lock_timeout());
        Self::new(store, config.pricing_table(), config.budgets())
    }

    pub fn store(&self) -> &LockedStore {
        &self.store
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Price and record one model invocation. Returns whether it was stored.
    pub fn record_usage(
        &self,
        user: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
        session_id: Option<&str>,
    ) -> bool {
        self.record_usage_at(user, model, input_tokens, output_tokens, session_id, Utc::now())
    }

    pub fn record_usage_at(
        &self,
        user: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        match self.try_record(user, model, input_tokens, output_tokens, session_id, now) {
            Ok(event) => {
                info!(
                    user,
                    model,
                    input_tokens = event.input_tokens,
                    output_tokens = event.output_tokens,
                    cost = %format!("{:.6}", event.cost),
                    "tracked usage"
                );
                true
            }
            Err(LedgerError::InvalidInput(reason)) => {
                warn!(user, model, %reason, "rejected usage event");
                false
            }
            Err(e) => {
                error!(user, model, error = %e, "failed to track usage");
                false
            }
        }
    }

    fn try_record(
        &self,
        user: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UsageEvent> {
        // Validate before touching the lock
        let tokens = TokenCounts::from_signed(input_tokens, output_tokens)?;
        self.store
            .update(|store| store.record(&self.pricing, user, model, tokens, session_id, now))
    }

    /// Full ledger for `user`; empty if unknown or the store is unreadable.
    pub fn ledger(&self, user: &str) -> UserLedger {
        match self.store.read(|store| store.user(user).cloned()) {
            Ok(ledger) => ledger.unwrap_or_default(),
            Err(e) => {
                error!(user, error = %e, "failed to read usage");
                UserLedger::default()
            }
        }
    }

    /// Today's bucket, this month against budget, and the requested or most
    /// recent session.
    pub fn snapshot(&self, user: &str, session_id: Option<&str>) -> UsageSnapshot {
        self.snapshot_at(user, session_id, Utc::now())
    }

    pub fn snapshot_at(
        &self,
        user: &str,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> UsageSnapshot {
        self.ledger(user)
            .snapshot(now.date_naive(), session_id, self.budgets)
    }

    pub fn daily_history(&self, user: &str, days: u32) -> Vec<DailyStats> {
        self.daily_history_at(user, days, Utc::now())
    }

    pub fn daily_history_at(
        &self,
        user: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Vec<DailyStats> {
        self.ledger(user).daily_history(now.date_naive(), days)
    }

    pub fn monthly_history(&self, user: &str, months: u32) -> Vec<MonthlyHistoryEntry> {
        self.monthly_history_at(user, months, Utc::now())
    }

    pub fn monthly_history_at(
        &self,
        user: &str,
        months: u32,
        now: DateTime<Utc>,
    ) -> Vec<MonthlyHistoryEntry> {
        self.ledger(user).monthly_history(now.date_naive(), months)
    }

    /// Delete one date's daily bucket (today if `date` is `None`). Returns
    /// whether a bucket existed. Monthly totals are not adjusted.
    pub fn reset_daily(&self, user: &str, date: Option<NaiveDate>) -> Result<bool> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let key = day_key(date);
        let removed = self.store.update(|store| {
            Ok(store
                .users
                .get_mut(user)
                .and_then(|ledger| ledger.daily.remove(&key))
                .is_some())
        })?;
        if removed {
            info!(user, date = %key, "reset daily usage");
        }
        Ok(removed)
    }

    /// Remove `user`'s sessions idle for more than `keep_days`.
    pub fn sweep_sessions(&self, user: &str, keep_days: u32) -> Result<usize> {
        self.sweep_sessions_at(user, keep_days, Utc::now())
    }

    pub fn sweep_sessions_at(
        &self,
        user: &str,
        keep_days: u32,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let cutoff = retention::cutoff(now, keep_days);
        let removed = self.store.update(|store| {
            Ok(store
                .users
                .get_mut(user)
                .map_or(0, |ledger| ledger.sweep_sessions(cutoff)))
        })?;
        info!(user, removed, keep_days, "cleaned up old sessions");
        Ok(removed)
    }

    /// Sweep stale sessions for every user.
    pub fn sweep_all(&self, keep_days: u32) -> Result<usize> {
        self.sweep_all_at(keep_days, Utc::now())
    }

    pub fn sweep_all_at(&self, keep_days: u32, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = retention::cutoff(now, keep_days);
        let removed = self.store.update(|store| Ok(store.sweep_all(cutoff)))?;
        info!(removed, keep_days, "cleaned up old sessions for all users");
        Ok(removed)
    }
}
