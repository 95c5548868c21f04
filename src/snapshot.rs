//! Read-side projections over a user's ledger for reporting.
//!
//! All views return zero-valued statistics when there is no data, never
//! errors.

use crate::model::{day_key, month_key, SessionBucket, UserLedger};
use chrono::{Datelike, Days, Months, NaiveDate};
use serde::Serialize;

/// Longest daily history served, about ten years.
pub const MAX_HISTORY_DAYS: u32 = 3660;
/// Longest monthly history served.
pub const MAX_HISTORY_MONTHS: u32 = 120;

/// Today's usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailyStats {
    pub date: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub tokens_total: u64,
    pub cost: f64,
}

/// One month's usage measured against a budget.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonthlyStats {
    pub month: String,
    pub tokens_total: u64,
    pub cost: f64,
    pub budget: f64,
    pub remaining: f64,
    pub percent_used: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub session_id: Option<String>,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub tokens_total: u64,
    pub cost: f64,
}

/// Combined view served to the reporting surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub daily: DailyStats,
    pub monthly: MonthlyStats,
    pub session: SessionStats,
    pub budget_daily: f64,
    pub budget_monthly: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonthlyHistoryEntry {
    pub month: String,
    pub tokens_total: u64,
    pub cost: f64,
}

/// Budgets in USD used for remaining/percent figures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budgets {
    pub daily: f64,
    pub monthly: f64,
}

impl UserLedger {
    pub fn daily_stats(&self, date: NaiveDate) -> DailyStats {
        let key = day_key(date);
        let bucket = self.daily.get(&key).copied().unwrap_or_default();
        DailyStats {
            date: key,
            tokens_input: bucket.tokens_input,
            tokens_output: bucket.tokens_output,
            tokens_total: bucket.tokens_total,
            cost: bucket.cost,
        }
    }

    pub fn monthly_stats(&self, date: NaiveDate, budget: f64) -> MonthlyStats {
        let key = month_key(date);
        let bucket = self.monthly.get(&key).copied().unwrap_or_default();
        let percent_used = if budget > 0.0 {
            bucket.cost / budget * 100.0
        } else {
            0.0
        };
        MonthlyStats {
            month: key,
            tokens_total: bucket.tokens_total,
            cost: bucket.cost,
            budget,
            remaining: (budget - bucket.cost).max(0.0),
            percent_used,
        }
    }

    /// Session with the latest activity. Ties go to the larger session id.
    pub fn most_recent_session(&self) -> Option<(&str, &SessionBucket)> {
        self.sessions
            .iter()
            .max_by_key(|(_, s)| s.last_activity())
            .map(|(id, s)| (id.as_str(), s))
    }

    /// The requested session if present, else the most recent, else zeros.
    pub fn session_stats(&self, session_id: Option<&str>) -> SessionStats {
        let found = session_id
            .and_then(|id| self.sessions.get_key_value(id))
            .map(|(id, s)| (id.as_str(), s))
            .or_else(|| self.most_recent_session());

        match found {
            Some((id, s)) => SessionStats {
                session_id: Some(id.to_string()),
                tokens_input: s.tokens_input,
                tokens_output: s.tokens_output,
                tokens_total: s.tokens_total,
                cost: s.cost,
            },
            None => SessionStats::default(),
        }
    }

    pub fn snapshot(
        &self,
        today: NaiveDate,
        session_id: Option<&str>,
        budgets: Budgets,
    ) -> UsageSnapshot {
        UsageSnapshot {
            daily: self.daily_stats(today),
            monthly: self.monthly_stats(today, budgets.monthly),
            session: self.session_stats(session_id),
            budget_daily: budgets.daily,
            budget_monthly: budgets.monthly,
        }
    }

    /// The `days` calendar days ending at `today`, oldest first, with
    /// inactive days as zero buckets. At most [`MAX_HISTORY_DAYS`].
    pub fn daily_history(&self, today: NaiveDate, days: u32) -> Vec<DailyStats> {
        (0..days.min(MAX_HISTORY_DAYS))
            .rev()
            .filter_map(|offset| today.checked_sub_days(Days::new(u64::from(offset))))
            .map(|date| self.daily_stats(date))
            .collect()
    }

    /// The `months` calendar months ending at the month of `today`, oldest
    /// first. At most [`MAX_HISTORY_MONTHS`].
    pub fn monthly_history(&self, today: NaiveDate, months: u32) -> Vec<MonthlyHistoryEntry> {
        let first_of_month = today.with_day0(0).unwrap_or(today);
        (0..months.min(MAX_HISTORY_MONTHS))
            .rev()
            .filter_map(|offset| first_of_month.checked_sub_months(Months::new(offset)))
            .map(|date| {
                let key = month_key(date);
                let bucket = self.monthly.get(&key).copied().unwrap_or_default();
                MonthlyHistoryEntry {
                    month: key,
                    tokens_total: bucket.tokens_total,
                    cost: bucket.cost,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DailyBucket, MonthlyBucket};
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn session(started_h: u32, updated_h: Option<u32>, tokens: u64) -> SessionBucket {
        let hour = |h| Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap();
        let mut s = SessionBucket::new(hour(started_h));
        s.last_updated = updated_h.map(hour);
        s.tokens_total = tokens;
        s
    }

    #[test]
    fn test_empty_ledger_snapshot_is_zero() {
        let ledger = UserLedger::default();
        let budgets = Budgets {
            daily: 100.0,
            monthly: 3000.0,
        };
        let snap = ledger.snapshot(date(2024, 5, 1), None, budgets);
        assert_eq!(snap.daily.date, "2024-05-01");
        assert_eq!(snap.daily.tokens_total, 0);
        assert_eq!(snap.monthly.month, "2024-05");
        assert_eq!(snap.monthly.remaining, 3000.0);
        assert_eq!(snap.monthly.percent_used, 0.0);
        assert_eq!(snap.session, SessionStats::default());
        assert_eq!(snap.budget_daily, 100.0);
    }

    #[test]
    fn test_monthly_budget_figures() {
        let mut ledger = UserLedger::default();
        ledger.monthly.insert(
            "2024-05".into(),
            MonthlyBucket {
                tokens_total: 10,
                cost: 750.0,
            },
        );
        let stats = ledger.monthly_stats(date(2024, 5, 20), 3000.0);
        assert_eq!(stats.remaining, 2250.0);
        assert_eq!(stats.percent_used, 25.0);

        let over = ledger.monthly_stats(date(2024, 5, 20), 500.0);
        assert_eq!(over.remaining, 0.0);
        assert_eq!(over.percent_used, 150.0);

        let zero = ledger.monthly_stats(date(2024, 5, 20), 0.0);
        assert_eq!(zero.percent_used, 0.0);
    }

    #[test]
    fn test_most_recent_session_uses_last_activity() {
        let mut ledger = UserLedger::default();
        assert!(ledger.most_recent_session().is_none());

        ledger.sessions.insert("old".into(), session(1, Some(2), 1));
        // Started late but never updated: its start time counts
        ledger.sessions.insert("fresh".into(), session(5, None, 2));
        ledger.sessions.insert("mid".into(), session(0, Some(4), 3));

        let (id, _) = ledger.most_recent_session().unwrap();
        assert_eq!(id, "fresh");
    }

    #[test]
    fn test_session_stats_prefers_requested() {
        let mut ledger = UserLedger::default();
        ledger.sessions.insert("a".into(), session(1, Some(1), 10));
        ledger.sessions.insert("b".into(), session(2, Some(3), 20));

        assert_eq!(ledger.session_stats(Some("a")).tokens_total, 10);
        // Unknown id falls back to most recent
        assert_eq!(ledger.session_stats(Some("zzz")).tokens_total, 20);
        assert_eq!(ledger.session_stats(None).session_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_daily_history_fills_gaps() {
        let mut ledger = UserLedger::default();
        ledger.daily.insert(
            "2024-03-01".into(),
            DailyBucket {
                tokens_input: 1,
                tokens_output: 1,
                tokens_total: 2,
                cost: 0.1,
            },
        );
        let history = ledger.daily_history(date(2024, 3, 2), 4);
        let dates: Vec<_> = history.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, ["2024-02-28", "2024-02-29", "2024-03-01", "2024-03-02"]);
        assert_eq!(history[2].tokens_total, 2);
        assert_eq!(history[3].tokens_total, 0);
        assert!(ledger.daily_history(date(2024, 3, 2), 0).is_empty());
    }

    #[test]
    fn test_monthly_history_crosses_year() {
        let mut ledger = UserLedger::default();
        ledger.monthly.insert(
            "2023-12".into(),
            MonthlyBucket {
                tokens_total: 5,
                cost: 1.0,
            },
        );
        let history = ledger.monthly_history(date(2024, 3, 31), 5);
        let months: Vec<_> = history.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(months, ["2023-11", "2023-12", "2024-01", "2024-02", "2024-03"]);
        assert_eq!(history[1].tokens_total, 5);
        assert_eq!(history[4].cost, 0.0);
    }

    #[test]
    fn test_history_length_is_capped() {
        let ledger = UserLedger::default();
        let today = date(2024, 5, 15);

        let days = ledger.daily_history(today, u32::MAX);
        assert_eq!(days.len(), MAX_HISTORY_DAYS as usize);
        assert_eq!(days.last().unwrap().date, "2024-05-15");

        let months = ledger.monthly_history(today, u32::MAX);
        assert_eq!(months.len(), MAX_HISTORY_MONTHS as usize);
        assert_eq!(months.first().unwrap().month, "2014-06");
        assert_eq!(months.last().unwrap().month, "2024-05");
    }
}
