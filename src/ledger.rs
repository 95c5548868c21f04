//! Ledger aggregation: folds one priced usage event into a user's buckets.
//!
//! Aggregates are maintained incrementally and are the source of truth.
//! `history` is an audit trail only; nothing is ever recomputed from it.

use crate::cost;
use crate::error::{LedgerError, Result};
use crate::model::{
    day_key, month_key, SessionBucket, UsageEvent, UsageStore, UserLedger, HISTORY_LIMIT,
};
use crate::pricing::PricingTable;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Validated, non-negative token counts for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
}

impl TokenCounts {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    /// Accept counts from callers that may hand over negative numbers.
    pub fn from_signed(input: i64, output: i64) -> Result<Self> {
        match (u64::try_from(input), u64::try_from(output)) {
            (Ok(input), Ok(output)) => Ok(Self { input, output }),
            _ => Err(LedgerError::InvalidInput(format!(
                "token counts must be non-negative (input={}, output={})",
                input, output
            ))),
        }
    }
}

impl UserLedger {
    /// Add `event` to the daily, monthly and session buckets and the history.
    pub fn apply(&mut self, event: UsageEvent) {
        let date = event.timestamp.date_naive();
        let total = event.total_tokens();

        let day = self.daily.entry(day_key(date)).or_default();
        day.tokens_input = day.tokens_input.saturating_add(event.input_tokens);
        day.tokens_output = day.tokens_output.saturating_add(event.output_tokens);
        day.tokens_total = day.tokens_total.saturating_add(total);
        day.cost += event.cost;

        let month = self.monthly.entry(month_key(date)).or_default();
        month.tokens_total = month.tokens_total.saturating_add(total);
        month.cost += event.cost;

        if let Some(session_id) = &event.session_id {
            let session = self
                .sessions
                .entry(session_id.clone())
                .or_insert_with(|| SessionBucket::new(event.timestamp));
            session.tokens_input = session.tokens_input.saturating_add(event.input_tokens);
            session.tokens_output = session.tokens_output.saturating_add(event.output_tokens);
            session.tokens_total = session.tokens_total.saturating_add(total);
            session.cost += event.cost;
            session.last_updated = Some(event.timestamp);
        }

        self.history.push(event);
        self.trim_history(HISTORY_LIMIT);
    }

    /// Drop the oldest events so at most `limit` remain.
    pub fn trim_history(&mut self, limit: usize) {
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }
}

impl UsageStore {
    /// Price one invocation and fold it into `user`'s ledger.
    ///
    /// An empty `session_id` counts as no session. Returns the event that
    /// was appended to the history.
    pub fn record(
        &mut self,
        pricing: &PricingTable,
        user: &str,
        model: &str,
        tokens: TokenCounts,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UsageEvent> {
        if user.trim().is_empty() {
            return Err(LedgerError::InvalidInput("user key must not be empty".into()));
        }

        let quote = cost::quote(pricing, model, tokens.input, tokens.output);
        if !quote.is_known() {
            warn!(model, "unknown model, using default pricing");
        }
        // A non-finite cost serializes as null and would make the store unreadable
        if !quote.cost.is_finite() || quote.cost < 0.0 {
            return Err(LedgerError::InvalidInput(format!(
                "model {} priced at {}",
                model, quote.cost
            )));
        }

        let event = UsageEvent {
            model: model.to_string(),
            timestamp: now,
            input_tokens: tokens.input,
            output_tokens: tokens.output,
            cost: quote.cost,
            session_id: session_id.filter(|s| !s.is_empty()).map(str::to_string),
        };

        self.user_mut(user).apply(event.clone());
        Ok(event)
    }
}
