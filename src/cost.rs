//! Cost calculation for token economics.
//!
//! Pricing never fails: unknown models are charged at the table's default
//! price and reported as unmatched so the caller can log them.

use crate::pricing::PricingTable;

/// Cost for a single model invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub cost: f64,
    /// Pricing pattern that matched, `None` for the default price
    pub pattern: Option<String>,
}

impl Quote {
    pub fn is_known(&self) -> bool {
        self.pattern.is_some()
    }
}

/// Price an invocation and report which rule priced it.
pub fn quote(table: &PricingTable, model: &str, input_tokens: u64, output_tokens: u64) -> Quote {
    let matched = table.resolve(model);
    Quote {
        cost: matched.pricing.calculate(input_tokens, output_tokens),
        pattern: matched.pattern.map(str::to_string),
    }
}

/// Cost in USD of `input_tokens`/`output_tokens` on `model`.
pub fn price(table: &PricingTable, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    table.calculate(model, input_tokens, output_tokens)
}

/// Format a cost value for display
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("${:.4}", cost)
    } else if cost < 1.0 {
        format!("${:.3}", cost)
    } else {
        format!("${:.2}", cost)
    }
}

/// Format token count for display
pub fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}k", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}
