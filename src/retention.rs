//! Session retention.
//!
//! Only session buckets expire. Daily, monthly and history data are left
//! alone.

use crate::model::{UsageStore, UserLedger};
use chrono::{DateTime, Duration, Utc};

/// Instant before which sessions are stale when keeping `keep_days`.
///
/// A window reaching past the earliest representable instant keeps every
/// session.
pub fn cutoff(now: DateTime<Utc>, keep_days: u32) -> DateTime<Utc> {
    Duration::try_days(i64::from(keep_days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl UserLedger {
    /// Remove sessions whose last activity is before `cutoff`. Returns how
    /// many were removed.
    pub fn sweep_sessions(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.last_activity() >= cutoff);
        before - self.sessions.len()
    }
}

impl UsageStore {
    /// Sweep every user's sessions. Returns the total removed.
    pub fn sweep_all(&mut self, cutoff: DateTime<Utc>) -> usize {
        self.users
            .values_mut()
            .map(|ledger| ledger.sweep_sessions(cutoff))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TokenCounts;
    use crate::pricing::PricingTable;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn store_with_sessions() -> UsageStore {
        let pricing = PricingTable::with_defaults();
        let mut store = UsageStore::new();
        let tokens = TokenCounts::new(10, 10);
        for (user, session, age_days) in [
            ("a", "stale", 10),
            ("a", "recent", 2),
            ("b", "stale", 30),
        ] {
            store
                .record(
                    &pricing,
                    user,
                    "gpt-4",
                    tokens,
                    Some(session),
                    now() - Duration::days(age_days),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn test_cutoff() {
        assert_eq!(cutoff(now(), 7), now() - Duration::days(7));
        assert_eq!(cutoff(now(), 0), now());
    }

    #[test]
    fn test_huge_window_keeps_everything() {
        assert_eq!(cutoff(now(), u32::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(cutoff(now(), 100_000_000), DateTime::<Utc>::MIN_UTC);

        let mut store = store_with_sessions();
        assert_eq!(store.sweep_all(cutoff(now(), u32::MAX)), 0);
        assert_eq!(store.user("a").unwrap().sessions.len(), 2);
    }

    #[test]
    fn test_sweep_removes_only_stale_sessions() {
        let mut store = store_with_sessions();
        let ledger = store.user_mut("a");
        let history_before = ledger.history.len();
        let daily_before = ledger.daily.clone();

        assert_eq!(ledger.sweep_sessions(cutoff(now(), 7)), 1);
        assert!(!ledger.sessions.contains_key("stale"));
        assert!(ledger.sessions.contains_key("recent"));
        assert_eq!(ledger.history.len(), history_before);
        assert_eq!(ledger.daily, daily_before);
        assert_eq!(ledger.monthly.len(), 1);
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let mut store = store_with_sessions();
        let ledger = store.user_mut("a");
        assert_eq!(ledger.sweep_sessions(cutoff(now(), 7)), 1);
        assert_eq!(ledger.sweep_sessions(cutoff(now(), 7)), 0);
    }

    #[test]
    fn test_session_without_update_uses_start() {
        let mut ledger = UserLedger::default();
        ledger.sessions.insert(
            "never-updated".into(),
            crate::model::SessionBucket::new(now() - Duration::days(8)),
        );
        assert_eq!(ledger.sweep_sessions(cutoff(now(), 7)), 1);
    }

    #[test]
    fn test_sweep_all_users() {
        let mut store = store_with_sessions();
        assert_eq!(store.sweep_all(cutoff(now(), 7)), 2);
        assert!(store.user("b").unwrap().sessions.is_empty());
        assert_eq!(store.user("a").unwrap().sessions.len(), 1);
    }
}
