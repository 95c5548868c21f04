//! Persisted ledger types.
//!
//! Field names are the on-disk JSON schema. Every field defaults when absent
//! so partially written or older files still load.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum number of events kept in a user's history.
pub const HISTORY_LIMIT: usize = 1000;

/// Root of the store file: user key -> ledger.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UsageStore {
    pub users: BTreeMap<String, UserLedger>,
}

impl UsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, user: &str) -> Option<&UserLedger> {
        self.users.get(user)
    }

    /// Ledger for `user`, created empty on first use.
    pub fn user_mut(&mut self, user: &str) -> &mut UserLedger {
        self.users.entry(user.to_string()).or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Everything recorded for one user.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct UserLedger {
    /// `YYYY-MM-DD` -> bucket
    #[serde(default)]
    pub daily: BTreeMap<String, DailyBucket>,
    /// `YYYY-MM` -> bucket
    #[serde(default)]
    pub monthly: BTreeMap<String, MonthlyBucket>,
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionBucket>,
    /// Oldest first, at most [`HISTORY_LIMIT`] entries
    #[serde(default)]
    pub history: Vec<UsageEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct DailyBucket {
    #[serde(default)]
    pub tokens_input: u64,
    #[serde(default)]
    pub tokens_output: u64,
    #[serde(default)]
    pub tokens_total: u64,
    #[serde(default)]
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct MonthlyBucket {
    #[serde(default)]
    pub tokens_total: u64,
    #[serde(default)]
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionBucket {
    #[serde(default)]
    pub tokens_input: u64,
    #[serde(default)]
    pub tokens_output: u64,
    #[serde(default)]
    pub tokens_total: u64,
    #[serde(default)]
    pub cost: f64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl SessionBucket {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            tokens_input: 0,
            tokens_output: 0,
            tokens_total: 0,
            cost: 0.0,
            started_at,
            last_updated: None,
        }
    }

    /// Time of the most recent activity, `started_at` if never updated.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_updated.unwrap_or(self.started_at)
    }
}

/// One priced usage record in the history log.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UsageEvent {
    pub model: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl UsageEvent {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Key of the daily bucket covering `date`.
pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Key of the monthly bucket covering `date`.
pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}
