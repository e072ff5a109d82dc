mod cli;
mod output;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use nanny_core::Config;
use nanny_monitor::{Alerting, DedupPolicy, KillOptions, MonitorUtility, SysinfoTable};
use nanny_notify::{DomainResolver, EmailNotifier, TemplateRenderer};
use nanny_store::PgStore;

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    nanny_core::config::load_dotenv();
    let args = CliArgs::parse();

    let config = match args.profile.as_deref() {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };

    if args.command == Command::Config {
        return output::print_json(&config.redacted_summary());
    }
    config.log_summary();

    let store = PgStore::connect(&config.postgres)
        .await
        .context("failed to connect to PostgreSQL")?;
    store.migrate().await.context("failed to apply migrations")?;

    let processes = Arc::new(SysinfoTable::new(config.monitor.node.clone()));
    let mut engine = MonitorUtility::new(Arc::new(store), processes)
        .with_dedup_policy(DedupPolicy::from_cooldown_secs(config.notify.cooldown_secs));
    if matches!(args.command, Command::Scan { .. } | Command::Kill { .. }) {
        engine = engine.with_alerting(alerting(&config)?);
    }

    run(&engine, &config, args.command, args.json).await
}

/// Mail delivery as configured; template overrides are validated up front.
fn alerting(config: &Config) -> Result<Alerting> {
    if config.notify.email_domain.is_none() {
        warn!("NANNY_EMAIL_DOMAIN is not set, users will not be emailed");
    }
    let notifier = EmailNotifier::from_config(
        &config.smtp.host,
        Some(config.smtp.port),
        config.smtp.tls,
        &config.smtp.from,
    )
    .context("invalid SMTP configuration")?;
    let renderer = TemplateRenderer::with_overrides(
        config.notify.subject_template.as_deref(),
        config.notify.body_template.as_deref(),
    )
    .context("invalid email template")?;
    let resolver = DomainResolver::new(config.notify.email_domain.clone());

    Ok(Alerting::new(Arc::new(notifier), Arc::new(resolver), renderer))
}

fn kill_options(
    config: &Config,
    quiet: bool,
    min_process_percent: Option<f64>,
    grace_secs: u64,
) -> KillOptions {
    KillOptions {
        quiet,
        min_process_percent: min_process_percent.unwrap_or(config.monitor.min_process_percent),
        protected_users: config.monitor.protected_users.clone(),
        grace: std::time::Duration::from_secs(grace_secs),
    }
}

async fn run(engine: &MonitorUtility, config: &Config, command: Command, json: bool) -> Result<()> {
    match command {
        Command::Scan {
            limit,
            min_process_percent,
            wait,
            quiet,
        } => {
            let limit = limit.unwrap_or(config.monitor.memory_limit);
            let grace = wait.unwrap_or(config.monitor.grace_secs);
            let options = kill_options(config, quiet, min_process_percent, grace);
            let scan = engine.scan(limit, &options).await.context("scan aborted")?;
            if json {
                output::print_json(&scan)?;
            } else {
                output::print_scan(&scan);
            }
            if !scan.is_clean() {
                let unrecorded = scan.reports.iter().filter(|r| r.record_failed()).count();
                bail!(
                    "{} user(s) could not be evaluated, {} violation(s) not recorded",
                    scan.failures.len(),
                    unrecorded
                );
            }
        }

        Command::Kill {
            user,
            node,
            limit,
            quiet,
        } => {
            let node = node.unwrap_or_else(|| engine.node());
            let limit = limit.unwrap_or(config.monitor.memory_limit);
            let options = kill_options(config, quiet, None, 0);
            let report = engine
                .kill(&user, &node, limit, &options)
                .await
                .with_context(|| format!("could not evaluate {user} on {node}"))?;
            if json {
                output::print_json(&report)?;
            } else {
                output::print_kill(&report);
            }
            if report.record_failed() {
                bail!("violation by {user} on {node} was not recorded");
            }
        }

        Command::History { user, limit } => {
            let records = engine.history(user.as_deref(), limit).await?;
            if json {
                output::print_json(&records)?;
            } else {
                output::print_history(&records);
            }
        }

        Command::Whitelist => {
            let entries = engine.whitelist().await?;
            if json {
                output::print_json(&entries)?;
            } else {
                output::print_whitelist(&entries);
            }
        }

        Command::Add {
            user,
            node,
            duration,
            global,
        } => {
            let duration = chrono::Duration::try_seconds(duration)
                .with_context(|| format!("duration of {duration}s is out of range"))?;
            let entry = engine
                .add(user.as_deref(), node.as_deref(), Some(duration), global)
                .await?;
            if json {
                output::print_json(&entry)?;
            } else {
                println!("Added {}", output::whitelist_line(&entry));
            }
        }

        Command::Remove { user, node, global } => {
            let removed = engine.remove(user.as_deref(), node.as_deref(), global).await?;
            if json {
                output::print_json(&serde_json::json!({ "removed": removed }))?;
            } else {
                info!(removed, "whitelist updated");
                println!("Removed {removed} whitelist entr{}", if removed == 1 { "y" } else { "ies" });
            }
        }

        Command::Config => output::print_json(&config.redacted_summary())?,
    }
    Ok(())
}
