mod cli;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokmeter::config;

#[derive(Parser)]
#[command(name = "tokmeter", about = "Per-user token usage and cost ledger")]
pub struct Args {
    #[arg(long, env = "TOKMETER_STORE", help = "Usage store file")]
    pub store: Option<PathBuf>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Print machine-readable JSON")]
    pub json: bool,

    #[arg(long, global = true, help = "Verbose output (info logs)")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Debug output (lock and store activity)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Price and record one model invocation
    Record {
        user: String,
        model: String,
        #[arg(allow_negative_numbers = true)]
        input_tokens: i64,
        #[arg(allow_negative_numbers = true)]
        output_tokens: i64,
        #[arg(long)]
        session: Option<String>,
    },
    /// Today, this month and the current session for a user
    Stats {
        user: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Per-day or per-month totals, oldest first
    History {
        user: String,
        #[command(subcommand)]
        period: HistoryPeriod,
    },
    /// Delete one day's bucket (today by default)
    ResetDaily {
        user: String,
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,
    },
    /// Remove sessions idle for longer than the retention window
    Sweep {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        user: Option<String>,
        #[arg(long, help = "Sweep every user")]
        all: bool,
        #[arg(long, value_name = "N")]
        keep_days: Option<u32>,
    },
    /// Dump a user's full ledger as JSON
    Show { user: String },
    /// List the effective pricing table or quote a model
    Pricing {
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = 1_000_000)]
        input: u64,
        #[arg(long, default_value_t = 1_000_000)]
        output: u64,
    },
}

#[derive(Subcommand)]
pub enum HistoryPeriod {
    Daily {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    Monthly {
        #[arg(long, default_value_t = 12)]
        months: u32,
    },
}

fn init_logging(args: &Args) {
    let default_filter = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args);

    // Explicit --config replaces the layered lookup
    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load()?
    };

    if let Some(store) = &args.store {
        cfg.store.path = Some(store.clone());
    }

    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error {}", e);
        }
        return Err(anyhow::anyhow!(
            "Invalid configuration ({} error(s))",
            errors.len()
        ));
    }

    if args.debug {
        eprintln!("[DEBUG] Store: {}", cfg.store.resolved_path().display());
        eprintln!("[DEBUG] Lock timeout: {:?}", cfg.store.lock_timeout());
        eprintln!("[DEBUG] Budgets: {:?}", cfg.budgets());
        eprintln!("[DEBUG] Extra pricing rules: {}", cfg.pricing.len());
    }

    let ctx = cli::Context::new(&cfg, args.json);
    cli::run(&ctx, args.command)
}
