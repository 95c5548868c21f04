//! Per-user token metering ledger.
//!
//! Usage events are priced, folded into daily, monthly and per-session
//! buckets, and persisted to one JSON file shared by every process that
//! meters usage. See [`tracker::UsageTracker`] for the entry point.

pub mod config;
pub mod cost;
pub mod error;
pub mod ledger;
pub mod model;
pub mod pricing;
pub mod retention;
pub mod snapshot;
pub mod store;
pub mod tracker;

pub use error::{LedgerError, Result};
pub use tracker::UsageTracker;
