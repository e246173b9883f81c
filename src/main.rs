//! AgentPulse - scheduled agent activity reports
//!
//! A short-lived job meant to be invoked every few minutes. Each run
//! decides whether to act, mails every agent their totals from today's
//! report export, and sends operators one "started" and one "ended"
//! notice per business day.
//!
//! Exit codes:
//!   0 - Finished (including skipped runs and lock contention)
//!   1 - Runtime error (config, lock marker, mail setup, etc.)

mod analysis;
mod cli;
mod clock;
mod config;
mod duration;
mod gatekeeper;
mod job;
mod lock;
mod models;
mod notify;
mod report;
mod source;
mod store;

use anyhow::{Context, Result};
use cli::Args;
use clock::{business_day, Clock, SystemClock};
use config::{Config, DEFAULT_CONFIG_FILE};
use gatekeeper::Gatekeeper;
use job::{Job, JobDeps, JobSettings, RunOutcome};
use lock::{FileLock, RunLock};
use notify::{HttpMailer, LogNotifier, MailerConfig, Notifier};
use source::{CsvRowParser, InboxConfig, InboxSource};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use store::FileStateStore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Where the active configuration came from.
enum ConfigOrigin {
    Explicit(PathBuf),
    DefaultFile,
    Builtin,
    /// The default file exists but could not be used.
    Fallback(String),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let (mut config, origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    if let Err(e) = config.validate() {
        eprintln!("Error: invalid configuration: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = init_logging(&args, &config) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    info!("AgentPulse v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    match origin {
        ConfigOrigin::Explicit(path) => info!("Loaded config from: {}", path.display()),
        ConfigOrigin::DefaultFile => info!("Loaded default config from {}", DEFAULT_CONFIG_FILE),
        ConfigOrigin::Builtin => debug!("No config file found, using defaults"),
        ConfigOrigin::Fallback(reason) => warn!("Failed to load config, using defaults: {}", reason),
    }

    let result = if args.status {
        handle_status(&config)
    } else if args.clear_lock {
        handle_clear_lock(&config)
    } else {
        run(&args, &config).await
    };

    if let Err(e) = result {
        error!("Run failed: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// Handle --init-config: generate a default agentpulse.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("Edit it to set the inbox, mail sender, and operator recipients.");
    Ok(())
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::Explicit(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigOrigin::DefaultFile)),
        Ok(None) => Ok((Config::default(), ConfigOrigin::Builtin)),
        Err(e) => Ok((Config::default(), ConfigOrigin::Fallback(format!("{:#}", e)))),
    }
}

/// Initialize logging to stderr and, when configured, to a daily log file.
fn init_logging(args: &Args, config: &Config) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(args.log_level()).into())
        .with_env_var("AGENTPULSE_LOG")
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let file_layer = match &config.logging.dir {
        Some(dir) => {
            let day = business_day(SystemClock.now(), config.timezone()?);
            let path = Path::new(dir).join(format!("{}.log", day.format("%Y-%m-%d")));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir))?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to set tracing subscriber")
}

/// Handle --status: print persisted state and lock status.
fn handle_status(config: &Config) -> Result<()> {
    let store = FileStateStore::new(&config.state.dir);
    let lock = FileLock::new(config.state.lock_path());
    let gate = Gatekeeper::load(Arc::new(store.clone()), Arc::new(SystemClock), config.schedule()?);
    let state = gate.state();

    println!("State directory: {}", store.dir().display());
    println!("Business day:    {} (hour {})", gate.today(), gate.hour());
    println!("Day phase:       {}", gate.phase());
    println!("Sheets today:    {}", state.sheets_today);
    println!(
        "Last run:        {}",
        state
            .last_run_at
            .map(|t| t.with_timezone(&gate.schedule().tz).to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "Last file:       {}",
        state.last_processed_file.as_deref().unwrap_or("none")
    );

    if lock.is_held() {
        match lock.owner_pid() {
            Some(pid) => println!("Lock:            held by PID {} ({})", pid, lock.path().display()),
            None => println!("Lock:            held ({})", lock.path().display()),
        }
    } else {
        println!("Lock:            free");
    }
    Ok(())
}

/// Handle --clear-lock: remove a lock marker left by a killed run.
fn handle_clear_lock(config: &Config) -> Result<()> {
    let lock = FileLock::new(config.state.lock_path());
    if !lock.is_held() {
        println!("No lock marker at {}", lock.path().display());
        return Ok(());
    }

    if let Some(pid) = lock.owner_pid() {
        warn!("Removing lock marker owned by PID {}", pid);
    }
    lock.release()?;
    println!("Removed lock marker {}", lock.path().display());
    Ok(())
}

fn build_notifier(args: &Args, config: &Config) -> Result<Box<dyn Notifier>> {
    if args.dry_run {
        info!("Dry run: mail will be logged, not sent");
        return Ok(Box::new(LogNotifier));
    }

    let api_key = args
        .mail_api_key
        .clone()
        .context("Mail API key missing; set AGENTPULSE_MAIL_API_KEY or use --dry-run")?;
    let mailer = HttpMailer::new(MailerConfig {
        api_url: config.mail.api_url.clone(),
        api_key,
        from: config.mail.from.clone(),
        timeout_seconds: config.mail.timeout_seconds,
    })
    .context("Failed to build mail client")?;
    Ok(Box::new(mailer))
}

/// One scheduled invocation.
async fn run(args: &Args, config: &Config) -> Result<()> {
    let deps = JobDeps {
        lock: Box::new(FileLock::new(config.state.lock_path())),
        store: Arc::new(FileStateStore::new(&config.state.dir)),
        clock: Arc::new(SystemClock),
        source: Box::new(InboxSource::new(InboxConfig::from(&config.source))),
        parser: Box::new(CsvRowParser::new(config.source.columns.clone())),
        notifier: build_notifier(args, config)?,
    };
    let settings = JobSettings {
        operators: config.mail.operators.clone(),
        signature: config.mail.signature.clone(),
        output: args.output.clone(),
    };

    let job = Job::new(deps, config.schedule()?, settings);
    let report = job.run_once().await?;

    match &report.outcome {
        RunOutcome::LockContended => debug!("Done: lock held elsewhere"),
        RunOutcome::Skipped(reason) => debug!("Done: skipped ({})", reason),
        RunOutcome::NoFile => info!("Done: no report to ingest"),
        RunOutcome::Duplicate { file_id } => info!("Done: {} already ingested", file_id),
        RunOutcome::ParseFailed { file_id } => {
            warn!("Done: {} could not be read; will retry", file_id)
        }
        RunOutcome::Ingested {
            file_id,
            agents,
            delivered,
            failed,
        } => info!(
            "Done: {} -> {} agents, {} mailed, {} failed",
            file_id, agents, delivered, failed
        ),
    }
    if report.started_day {
        info!("Day start notice handled");
    }
    if report.ended_day {
        info!("Day end notice handled");
    }
    Ok(())
}
