//! Model pricing table.
//!
//! Rules are kept in declaration order and matched as case-insensitive
//! substrings of the model identifier. Patterns overlap ("gpt-4" is contained
//! in "gpt-4-turbo"), so the first rule that matches wins.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Pricing for a single model (per 1M tokens in USD)
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ModelPricing {
    /// Cost per 1M input tokens
    pub input: f64,
    /// Cost per 1M output tokens
    pub output: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    /// Calculate cost for given token counts
    pub fn calculate(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output;
        input_cost + output_cost
    }
}

/// Price used when no rule matches a model.
pub const DEFAULT_PRICING: ModelPricing = ModelPricing::new(3.00, 15.00);

/// One pattern -> price entry. Also the shape of `[[pricing]]` in config.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PricingRule {
    pub pattern: String,
    pub input: f64,
    pub output: f64,
}

impl PricingRule {
    pub fn new(pattern: &str, input: f64, output: f64) -> Self {
        Self {
            pattern: pattern.to_lowercase(),
            input,
            output,
        }
    }

    pub fn pricing(&self) -> ModelPricing {
        ModelPricing::new(self.input, self.output)
    }

    /// Both prices are finite and non-negative.
    pub fn is_valid(&self) -> bool {
        let valid = |price: f64| price.is_finite() && price >= 0.0;
        valid(self.input) && valid(self.output)
    }

    fn matches(&self, model_lower: &str) -> bool {
        !self.pattern.is_empty() && model_lower.contains(&self.pattern)
    }
}

/// Result of resolving a model identifier against the table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceMatch<'a> {
    pub pricing: ModelPricing,
    /// The pattern that matched, or `None` when the default price applied
    pub pattern: Option<&'a str>,
}

impl PriceMatch<'_> {
    pub fn is_known(&self) -> bool {
        self.pattern.is_some()
    }
}

/// Ordered pricing table
#[derive(Debug, Clone)]
pub struct PricingTable {
    rules: Vec<PricingRule>,
    default_pricing: ModelPricing,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PricingTable {
    /// Create a pricing table with the built-in model prices
    pub fn with_defaults() -> Self {
        let rules = vec![
            // Anthropic models
            PricingRule::new("claude-sonnet-4-5", 3.00, 15.00),
            PricingRule::new("claude-sonnet-3-5", 3.00, 15.00),
            PricingRule::new("claude-opus-4", 15.00, 75.00),
            // OpenAI models. "gpt-4" shadows "gpt-4-turbo"; kept in this order
            // so existing ledgers keep pricing the same way.
            PricingRule::new("gpt-4", 30.00, 60.00),
            PricingRule::new("gpt-4-turbo", 10.00, 30.00),
            PricingRule::new("gpt-3.5-turbo", 0.50, 1.50),
        ];

        Self {
            rules,
            default_pricing: DEFAULT_PRICING,
        }
    }

    /// Create from an explicit rule list with the given fallback. Rules with
    /// a non-finite or negative price are dropped.
    pub fn from_rules(rules: Vec<PricingRule>, default_pricing: ModelPricing) -> Self {
        let rules = rules
            .into_iter()
            .filter(|r| {
                if !r.is_valid() {
                    warn!(
                        pattern = %r.pattern,
                        input = r.input,
                        output = r.output,
                        "ignoring pricing rule with invalid price"
                    );
                }
                r.is_valid()
            })
            .map(|r| PricingRule::new(&r.pattern, r.input, r.output))
            .collect();
        Self {
            rules,
            default_pricing,
        }
    }

    /// Create from user config. User rules are consulted before the built-ins.
    pub fn from_config(user_rules: &[PricingRule]) -> Self {
        let mut table = Self::from_rules(user_rules.to_vec(), DEFAULT_PRICING);
        table.rules.extend(Self::with_defaults().rules);
        table
    }

    pub fn rules(&self) -> &[PricingRule] {
        &self.rules
    }

    pub fn default_pricing(&self) -> ModelPricing {
        self.default_pricing
    }

    /// Resolve a model to its price. Falls back to the default when unknown.
    pub fn resolve(&self, model: &str) -> PriceMatch<'_> {
        let model_lower = model.to_lowercase();
        match self.rules.iter().find(|r| r.matches(&model_lower)) {
            Some(rule) => PriceMatch {
                pricing: rule.pricing(),
                pattern: Some(&rule.pattern),
            },
            None => PriceMatch {
                pricing: self.default_pricing,
                pattern: None,
            },
        }
    }

    /// Calculate cost for given model and token counts
    pub fn calculate(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.resolve(model)
            .pricing
            .calculate(input_tokens, output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_pricing_calculation() {
        let pricing = ModelPricing::new(2.50, 10.00);
        // (1000/1M) * 2.50 + (500/1M) * 10.00 = 0.0025 + 0.005 = 0.0075
        let cost = pricing.calculate(1000, 500);
        assert!((cost - 0.0075).abs() < 1e-12);
    }

    #[test]
    fn test_substring_match_is_case_insensitive() {
        let table = PricingTable::with_defaults();
        let m = table.resolve("Anthropic/Claude-Opus-4-20250514");
        assert_eq!(m.pattern, Some("claude-opus-4"));
        assert_eq!(m.pricing, ModelPricing::new(15.00, 75.00));
    }

    #[test]
    fn test_first_declared_pattern_wins() {
        let table = PricingTable::with_defaults();
        // Contains both "gpt-4" and "gpt-4-turbo"; "gpt-4" is declared first.
        let m = table.resolve("gpt-4-turbo-2024-04-09");
        assert_eq!(m.pattern, Some("gpt-4"));
        assert_eq!(m.pricing, ModelPricing::new(30.00, 60.00));

        let reversed = PricingTable::from_rules(
            vec![
                PricingRule::new("gpt-4-turbo", 10.00, 30.00),
                PricingRule::new("gpt-4", 30.00, 60.00),
            ],
            DEFAULT_PRICING,
        );
        assert_eq!(
            reversed.resolve("gpt-4-turbo-2024-04-09").pattern,
            Some("gpt-4-turbo")
        );
    }

    #[test]
    fn test_unknown_model_uses_default() {
        let table = PricingTable::with_defaults();
        let m = table.resolve("mistral-large");
        assert!(!m.is_known());
        assert_eq!(m.pricing, DEFAULT_PRICING);
    }

    #[test]
    fn test_user_rules_take_priority() {
        let table = PricingTable::from_config(&[PricingRule::new("GPT-4", 1.0, 2.0)]);
        let m = table.resolve("gpt-4");
        assert_eq!(m.pricing, ModelPricing::new(1.0, 2.0));
        // Built-ins are still present after the user rules
        assert_eq!(
            table.resolve("gpt-3.5-turbo").pricing,
            ModelPricing::new(0.50, 1.50)
        );
    }

    #[test]
    fn test_empty_pattern_never_matches() {
        let table =
            PricingTable::from_rules(vec![PricingRule::new("", 9.0, 9.0)], DEFAULT_PRICING);
        assert!(!table.resolve("anything").is_known());
    }

    #[test]
    fn test_invalid_prices_dropped() {
        let table = PricingTable::from_config(&[
            PricingRule::new("gpt-4", f64::INFINITY, 1.0),
            PricingRule::new("gpt-4", 1.0, f64::NAN),
            PricingRule::new("gpt-4", -2.0, 1.0),
        ]);
        assert_eq!(table.rules().len(), PricingTable::with_defaults().rules().len());
        assert_eq!(table.resolve("gpt-4").pricing, ModelPricing::new(30.00, 60.00));
    }
}
