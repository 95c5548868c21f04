use crate::{Command, HistoryPeriod};
use anyhow::{bail, Result};
use serde::Serialize;
use tokmeter::config::Config;
use tokmeter::cost::{format_cost, format_tokens, quote};
use tokmeter::UsageTracker;

pub struct Context {
    pub tracker: UsageTracker,
    pub session_keep_days: u32,
    pub json: bool,
}

impl Context {
    pub fn new(cfg: &Config, json: bool) -> Self {
        Self {
            tracker: UsageTracker::from_config(cfg),
            session_keep_days: cfg.session_keep_days(),
            json,
        }
    }
}

pub fn run(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Record {
            user,
            model,
            input_tokens,
            output_tokens,
            session,
        } => record(ctx, &user, &model, input_tokens, output_tokens, session.as_deref()),
        Command::Stats { user, session } => stats(ctx, &user, session.as_deref()),
        Command::History { user, period } => history(ctx, &user, period),
        Command::ResetDaily { user, date } => {
            let removed = ctx.tracker.reset_daily(&user, date)?;
            emit(ctx, &serde_json::json!({ "success": removed, "user_id": user }), || {
                if removed {
                    println!("Daily usage reset for {}", user);
                } else {
                    println!("No data found for the specified date");
                }
            })
        }
        Command::Sweep {
            user,
            all,
            keep_days,
        } => {
            let keep_days = keep_days.unwrap_or(ctx.session_keep_days);
            let removed = match (&user, all) {
                (_, true) => ctx.tracker.sweep_all(keep_days)?,
                (Some(user), false) => ctx.tracker.sweep_sessions(user, keep_days)?,
                (None, false) => bail!("Specify a user or --all"),
            };
            emit(
                ctx,
                &serde_json::json!({ "removed": removed, "keep_days": keep_days }),
                || println!("Removed {} session(s) idle > {} days", removed, keep_days),
            )
        }
        Command::Show { user } => {
            let ledger = ctx.tracker.ledger(&user);
            println!("{}", serde_json::to_string_pretty(&ledger)?);
            Ok(())
        }
        Command::Pricing {
            model,
            input,
            output,
        } => pricing(ctx, model.as_deref(), input, output),
    }
}

/// Print `value` as JSON in --json mode, otherwise run the text printer.
fn emit<T: Serialize>(ctx: &Context, value: &T, text: impl FnOnce()) -> Result<()> {
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text();
    }
    Ok(())
}

fn record(
    ctx: &Context,
    user: &str,
    model: &str,
    input_tokens: i64,
    output_tokens: i64,
    session: Option<&str>,
) -> Result<()> {
    if !ctx
        .tracker
        .record_usage(user, model, input_tokens, output_tokens, session)
    {
        bail!("Usage was not recorded (see log for details)");
    }
    emit(
        ctx,
        &serde_json::json!({ "success": true, "message": "Usage tracked successfully" }),
        || println!("Usage tracked successfully"),
    )
}

fn stats(ctx: &Context, user: &str, session: Option<&str>) -> Result<()> {
    let snap = ctx.tracker.snapshot(user, session);
    emit(ctx, &snap, || {
        println!(
            "Today ({}): {} tokens ({} in, {} out), {} of {} daily budget",
            snap.daily.date,
            format_tokens(snap.daily.tokens_total),
            format_tokens(snap.daily.tokens_input),
            format_tokens(snap.daily.tokens_output),
            format_cost(snap.daily.cost),
            format_cost(snap.budget_daily),
        );
        println!(
            "Month ({}): {} tokens, {} of {} ({:.1}% used, {} remaining)",
            snap.monthly.month,
            format_tokens(snap.monthly.tokens_total),
            format_cost(snap.monthly.cost),
            format_cost(snap.monthly.budget),
            snap.monthly.percent_used,
            format_cost(snap.monthly.remaining),
        );
        match &snap.session.session_id {
            Some(id) => println!(
                "Session {}: {} tokens, {}",
                id,
                format_tokens(snap.session.tokens_total),
                format_cost(snap.session.cost),
            ),
            None => println!("Session: none"),
        }
    })
}

fn history(ctx: &Context, user: &str, period: HistoryPeriod) -> Result<()> {
    match period {
        HistoryPeriod::Daily { days } => {
            let history = ctx.tracker.daily_history(user, days);
            let body = serde_json::json!({ "user_id": user, "days": days, "history": history });
            emit(ctx, &body, || {
                for day in &history {
                    println!(
                        "{}  {:>8}  {}",
                        day.date,
                        format_tokens(day.tokens_total),
                        format_cost(day.cost)
                    );
                }
            })
        }
        HistoryPeriod::Monthly { months } => {
            let history = ctx.tracker.monthly_history(user, months);
            let body = serde_json::json!({ "user_id": user, "months": months, "history": history });
            emit(ctx, &body, || {
                for month in &history {
                    println!(
                        "{}  {:>8}  {}",
                        month.month,
                        format_tokens(month.tokens_total),
                        format_cost(month.cost)
                    );
                }
            })
        }
    }
}

fn pricing(ctx: &Context, model: Option<&str>, input: u64, output: u64) -> Result<()> {
    let table = ctx.tracker.pricing();

    if let Some(model) = model {
        let q = quote(table, model, input, output);
        let body = serde_json::json!({
            "model": model,
            "pattern": q.pattern,
            "input_tokens": input,
            "output_tokens": output,
            "cost": q.cost,
        });
        return emit(ctx, &body, || {
            let rule = q.pattern.as_deref().unwrap_or("<default>");
            println!(
                "{} ({}): {} in, {} out -> {}",
                model,
                rule,
                format_tokens(input),
                format_tokens(output),
                format_cost(q.cost)
            );
        });
    }

    let default = table.default_pricing();
    let body = serde_json::json!({ "rules": table.rules(), "default": default });
    emit(ctx, &body, || {
        println!("Pricing per 1M tokens (first match wins):");
        for rule in table.rules() {
            println!(
                "  {:<24} in ${:<8.2} out ${:.2}",
                rule.pattern, rule.input, rule.output
            );
        }
        println!(
            "  {:<24} in ${:<8.2} out ${:.2}",
            "<default>", default.input, default.output
        );
    })
}
