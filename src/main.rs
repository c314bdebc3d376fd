//! # InboxWarm CLI
//!
//! Usage:
//!   inboxwarm init-config                      # Write ~/.inboxwarm/config.toml
//!   inboxwarm account add --email a@x.com      # Onboard a warmup account
//!   inboxwarm account add --email p@y.com --role pool
//!   inboxwarm run                              # Start every trigger loop
//!   inboxwarm pass dispatch                    # Run one pass and exit
//!   inboxwarm status                           # Today's progress per account

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use inboxwarm_channels::{ImapSmtpMailbox, StaticContent};
use inboxwarm_core::types::{Account, Credential, Role};
use inboxwarm_core::{WarmupConfig, WarmupError};
use inboxwarm_db::WarmupDb;
use inboxwarm_scheduler::{Pass, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "inboxwarm", version, about = "📬 InboxWarm: mailbox warmup engine")]
struct Cli {
    /// Config file (default: ~/.inboxwarm/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path, overrides the config
    #[arg(long)]
    db: Option<String>,

    /// RNG seed for reproducible schedules and decisions
    #[arg(long)]
    seed: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every trigger loop until Ctrl-C
    Run,
    /// Run a single pass once
    Pass {
        /// generate, dispatch, reschedule, engagement, replies, spam, score or cleanup
        name: String,
    },
    /// Manage accounts
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
    /// Generate the schedule for one account and date
    Generate {
        #[arg(long)]
        account: String,
        /// Account-local date (YYYY-MM-DD), today when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Advance the ramp for one account
    Advance {
        #[arg(long)]
        account: String,
    },
    /// List slots due for dispatch right now
    Due,
    /// List pending slots for one account
    Pending {
        #[arg(long)]
        account: String,
    },
    /// Compute and store the warmup score
    Score {
        #[arg(long)]
        account: String,
        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Today's progress for every warmup account
    Status,
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum AccountAction {
    /// Onboard a warmup or pool account
    Add {
        #[arg(long)]
        email: String,
        /// warmup or pool
        #[arg(long, default_value = "warmup")]
        role: String,
        #[arg(long)]
        display_name: Option<String>,
        /// IANA timezone, defaults to the config value
        #[arg(long)]
        timezone: Option<String>,
        #[arg(long)]
        target_volume: Option<u32>,
        /// Target open rate in [0, 1], defaults to the config value
        #[arg(long)]
        target_open_rate: Option<f64>,
        /// Target reply rate in [0, 1], defaults to the config value
        #[arg(long)]
        target_reply_rate: Option<f64>,
        /// Tolerated distance from the open-rate target before decisions are forced
        #[arg(long)]
        open_margin: Option<f64>,
        /// App password or JSON {"username", "password"}
        #[arg(long)]
        credential: Option<String>,
    },
    /// Deactivate an account and skip its pending slots
    Deactivate { account: String },
    /// List accounts
    List {
        /// Include inactive accounts
        #[arg(long)]
        all: bool,
    },
}

fn config_path(cli: &Cli) -> PathBuf {
    match &cli.config {
        Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
        None => WarmupConfig::default_path(),
    }
}

fn load_config(cli: &Cli) -> Result<WarmupConfig> {
    let path = config_path(cli);
    let mut config = if path.exists() {
        WarmupConfig::load_from(&path)?
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        WarmupConfig::default()
    };
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    Ok(config)
}

fn open_scheduler(config: WarmupConfig) -> Result<Arc<Scheduler>> {
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(
        WarmupDb::open(&db_path).with_context(|| format!("opening {}", db_path.display()))?,
    );
    let mailbox = Arc::new(ImapSmtpMailbox::new(config.mailbox.clone()));
    let content = Arc::new(StaticContent::default());
    Ok(Arc::new(Scheduler::new(db, mailbox, content, config)))
}

fn rate_arg(flag: &str, value: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&value) {
        bail!("--{flag} must be between 0 and 1, got {value}");
    }
    Ok(value)
}

/// Look an account up by email, then by id.
fn find_account(db: &WarmupDb, key: &str) -> Result<Account> {
    match db.get_account_by_email(key) {
        Ok(account) => Ok(account),
        Err(WarmupError::NotFound(_)) => db
            .get_account(key)
            .with_context(|| format!("no account '{key}'")),
        Err(e) => Err(e.into()),
    }
}

fn parse_pass(name: &str) -> Result<Pass> {
    match Pass::ALL.iter().find(|p| p.as_str() == name) {
        Some(pass) => Ok(*pass),
        None => {
            let names: Vec<&str> = Pass::ALL.iter().map(|p| p.as_str()).collect();
            bail!("unknown pass '{name}', expected one of: {}", names.join(", "))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "inboxwarm=debug,inboxwarm_scheduler=debug,inboxwarm_channels=debug,inboxwarm_core=debug"
    } else {
        "inboxwarm=info,inboxwarm_scheduler=info,inboxwarm_channels=info,inboxwarm_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    if let Command::InitConfig { force } = &cli.command {
        let path = config_path(&cli);
        if path.exists() && !force {
            println!("⚠️  {} already exists (use --force to overwrite)", path.display());
            return Ok(());
        }
        WarmupConfig::default().save_to(&path)?;
        println!("✅ Config written to {}", path.display());
        return Ok(());
    }

    let config = load_config(&cli)?;
    let scheduler = open_scheduler(config)?;
    let db = scheduler.db();

    match cli.command {
        Command::Run => {
            println!("📬 InboxWarm running, Ctrl-C to stop");
            let handles = scheduler.spawn_triggers();
            tokio::signal::ctrl_c().await?;
            tracing::info!("🛑 Shutting down {} trigger loops", handles.len());
            for handle in handles {
                handle.abort();
            }
        }
        Command::Pass { name } => {
            let pass = parse_pass(&name)?;
            let summary = scheduler.run_pass(pass).await?;
            println!("✅ [{pass}] {summary}");
        }
        Command::Account { action } => match action {
            AccountAction::Add {
                email,
                role,
                display_name,
                timezone,
                target_volume,
                target_open_rate,
                target_reply_rate,
                open_margin,
                credential,
            } => {
                let role: Role = role.parse()?;
                let defaults = &scheduler.config().defaults;
                let mut account = Account::new(
                    email,
                    role,
                    timezone.unwrap_or_else(|| defaults.timezone.clone()),
                );
                account.tz()?;
                account.display_name = display_name;
                account.target_volume = target_volume.unwrap_or(defaults.target_volume);
                account.target_open_rate =
                    rate_arg("target-open-rate", target_open_rate.unwrap_or(defaults.open_rate))?;
                account.target_reply_rate =
                    rate_arg("target-reply-rate", target_reply_rate.unwrap_or(defaults.reply_rate))?;
                account.open_margin = open_margin.map(|m| rate_arg("open-margin", m)).transpose()?;
                account.credential = credential.map(Credential::new);
                db.insert_account(&account)?;
                println!("✅ Added {} account {} ({})", account.role, account.email, account.id);
            }
            AccountAction::Deactivate { account } => {
                let account = find_account(db, &account)?;
                let skipped = scheduler.deactivate_account(&account.id)?;
                println!("🛑 {} deactivated, {} pending slots skipped", account.email, skipped);
            }
            AccountAction::List { all } => {
                for a in db.list_accounts(None, !all)? {
                    let state = if a.active { "active" } else { "inactive" };
                    println!(
                        "{:<36} {:<6} {:<8} day {:>2}  quota {:>3}  {}  {}",
                        a.email, a.role, state, a.ramp_day, a.daily_quota, a.timezone, a.id
                    );
                }
            }
        },
        Command::Generate { account, date } => {
            let account = find_account(db, &account)?;
            let date = date.unwrap_or_else(|| account.local_date(scheduler.now()));
            let outcome = scheduler.generate_schedule_for_date(&account.id, date)?;
            println!("📅 {} {}: {}", account.email, date, outcome);
        }
        Command::Advance { account } => {
            let account = find_account(db, &account)?;
            match scheduler.advance_ramp_day(&account.id)? {
                Some(a) => println!(
                    "📈 {} day {} → {}, quota {} → {} ({})",
                    account.email,
                    a.old_day,
                    a.new_day,
                    a.old_quota,
                    a.new_quota,
                    a.phase.label(a.new_day)
                ),
                None => println!("⏸️  {} already advanced today", account.email),
            }
        }
        Command::Due => {
            let slots = scheduler.due_slots(scheduler.now())?;
            if slots.is_empty() {
                println!("No slots due");
            }
            for s in slots {
                println!("{}  {}  {}  {}", s.scheduled_at.format("%Y-%m-%d %H:%M:%S"), s.account_id, s.period, s.id);
            }
        }
        Command::Pending { account } => {
            let account = find_account(db, &account)?;
            for s in scheduler.pending_slots(&account.id)? {
                println!(
                    "{}  {}  retries {}  {}",
                    s.scheduled_at.format("%Y-%m-%d %H:%M:%S"),
                    s.period,
                    s.retry_count,
                    s.id
                );
            }
        }
        Command::Score { account, json } => {
            let account = find_account(db, &account)?;
            let snapshot = scheduler.score_for_account(&account.id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("📊 {}: {:.1} ({}) {}", account.email, snapshot.total, snapshot.grade, snapshot.status);
                for r in &snapshot.recommendations {
                    println!("   • {r}");
                }
            }
        }
        Command::Status => {
            let status = scheduler.status_report()?;
            if status.is_empty() {
                println!("No active warmup accounts");
            }
            for line in status {
                println!("📋 {line}");
            }
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_flags_validated() {
        assert_eq!(rate_arg("target-open-rate", 0.75).unwrap(), 0.75);
        assert_eq!(rate_arg("open-margin", 0.0).unwrap(), 0.0);
        assert!(rate_arg("target-reply-rate", 1.5).is_err());
        assert!(rate_arg("open-margin", -0.1).is_err());
        assert!(rate_arg("target-open-rate", f64::NAN).is_err());
    }

    #[test]
    fn test_account_add_parses_rate_flags() {
        let cli = Cli::try_parse_from([
            "inboxwarm",
            "account",
            "add",
            "--email",
            "w@warm.test",
            "--target-open-rate",
            "0.6",
            "--open-margin",
            "0.05",
        ])
        .unwrap();
        match cli.command {
            Command::Account {
                action:
                    AccountAction::Add {
                        target_open_rate,
                        target_reply_rate,
                        open_margin,
                        ..
                    },
            } => {
                assert_eq!(target_open_rate, Some(0.6));
                assert_eq!(target_reply_rate, None);
                assert_eq!(open_margin, Some(0.05));
            }
            _ => panic!("expected account add"),
        }
    }
}
