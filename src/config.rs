use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pricing::{PricingRule, PricingTable};
use crate::snapshot::Budgets;

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Where the store lives and how long to wait for its lock
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Absent means wait for the lock indefinitely
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,
}

fn default_store_path() -> PathBuf {
    Path::new("data").join("user_usage.json")
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_store_path)
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}

/// Spending budgets in USD
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct BudgetConfig {
    #[serde(default = "default_daily_budget")]
    pub daily: f64,
    #[serde(default = "default_monthly_budget")]
    pub monthly: f64,
}

fn default_daily_budget() -> f64 {
    100.0
}
fn default_monthly_budget() -> f64 {
    3000.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily: default_daily_budget(),
            monthly: default_monthly_budget(),
        }
    }
}

impl From<BudgetConfig> for Budgets {
    fn from(b: BudgetConfig) -> Self {
        Budgets {
            daily: b.daily,
            monthly: b.monthly,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_session_keep_days")]
    pub session_keep_days: u32,
}

fn default_session_keep_days() -> u32 {
    7
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            session_keep_days: default_session_keep_days(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub budget: Option<BudgetConfig>,
    #[serde(default)]
    pub retention: Option<RetentionConfig>,
    /// Extra pricing rules, consulted in order before the built-in ones
    #[serde(default)]
    pub pricing: Vec<PricingRule>,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.tokmeter/config.local.toml) > project (.tokmeter/config.toml) > user (~/.tokmeter/config.toml)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".tokmeter").join("config.toml");
            if user_config.exists() {
                config.merge(Self::load_from(&user_config)?);
            }
        }

        let project_config = Path::new(".tokmeter").join("config.toml");
        if project_config.exists() {
            config.merge(Self::load_from(&project_config)?);
        }

        // Should be gitignored
        let local_config = Path::new(".tokmeter").join("config.local.toml");
        if local_config.exists() {
            config.merge(Self::load_from(&local_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority)
    /// Pricing rules from `other` go in front, so the later file wins ties.
    pub fn merge(&mut self, other: Config) {
        if other.store.path.is_some() {
            self.store.path = other.store.path;
        }
        if other.store.lock_timeout_ms.is_some() {
            self.store.lock_timeout_ms = other.store.lock_timeout_ms;
        }
        if other.budget.is_some() {
            self.budget = other.budget;
        }
        if other.retention.is_some() {
            self.retention = other.retention;
        }

        let mut pricing = other.pricing;
        pricing.append(&mut self.pricing);
        self.pricing = pricing;
    }

    pub fn budgets(&self) -> Budgets {
        self.budget.unwrap_or_default().into()
    }

    pub fn session_keep_days(&self) -> u32 {
        self.retention.unwrap_or_default().session_keep_days
    }

    pub fn pricing_table(&self) -> PricingTable {
        PricingTable::from_config(&self.pricing)
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.store.lock_timeout_ms == Some(0) {
            errors.push(ValidationError {
                field: "store.lock_timeout_ms".to_string(),
                message: "Must be greater than 0 (omit to wait indefinitely)".to_string(),
            });
        }

        let budgets = self.budgets();
        for (field, value) in [
            ("budget.daily", budgets.daily),
            ("budget.monthly", budgets.monthly),
        ] {
            if !value.is_finite() || value < 0.0 {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!("Must be a non-negative amount, got {}", value),
                });
            }
        }

        for (i, rule) in self.pricing.iter().enumerate() {
            if rule.pattern.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("pricing[{}].pattern", i),
                    message: "Pattern must not be empty".to_string(),
                });
            }
            if !rule.is_valid() {
                errors.push(ValidationError {
                    field: format!("pricing[{}]", i),
                    message: format!(
                        "Prices must be non-negative, got input={} output={}",
                        rule.input, rule.output
                    ),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
