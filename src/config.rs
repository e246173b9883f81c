//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `agentpulse.toml` files.

use crate::gatekeeper::Schedule;
use crate::source::csv_rows::Columns;
use anyhow::{bail, Context, Result};
use chrono::format::{Item, StrftimeItems};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "agentpulse.toml";

/// Largest accepted gap between runs: one day.
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Operating window and pacing.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Where report files come from.
    #[serde(default)]
    pub source: SourceConfig,

    /// Persistent state and lock.
    #[serde(default)]
    pub state: StateConfig,

    /// Mail delivery.
    #[serde(default)]
    pub mail: MailConfig,

    /// Log files.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Schedule settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// IANA zone that defines the business day and hours.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// First admitted hour.
    #[serde(default = "default_open_hour")]
    pub open_hour: u32,

    /// Closing hour; runs stop and the day may end from here on.
    #[serde(default = "default_close_hour")]
    pub close_hour: u32,

    /// Minimum minutes between admitted runs.
    #[serde(default = "default_min_gap")]
    pub min_gap_minutes: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            open_hour: default_open_hour(),
            close_hour: default_close_hour(),
            min_gap_minutes: default_min_gap(),
        }
    }
}

fn default_timezone() -> String {
    "America/Los_Angeles".to_string()
}

fn default_open_hour() -> u32 {
    6
}

fn default_close_hour() -> u32 {
    18
}

fn default_min_gap() -> i64 {
    10
}

/// Report inbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Directory the exports are dropped into.
    #[serde(default = "default_inbox")]
    pub inbox: String,

    /// File extensions to consider.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// strftime pattern of the date inside report file names.
    #[serde(default = "default_date_pattern")]
    pub date_pattern: String,

    /// Use the newest file when none carries today's date.
    #[serde(default = "default_true")]
    pub fallback_to_latest: bool,

    /// Report column headers.
    #[serde(default)]
    pub columns: Columns,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            inbox: default_inbox(),
            extensions: default_extensions(),
            date_pattern: default_date_pattern(),
            fallback_to_latest: true,
            columns: Columns::default(),
        }
    }
}

fn default_inbox() -> String {
    "inbox".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["csv".to_string()]
}

fn default_date_pattern() -> String {
    "%Y_%m-%d".to_string()
}

fn default_true() -> bool {
    true
}

/// State directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding one file per state key.
    #[serde(default = "default_state_dir")]
    pub dir: String,

    /// Lock marker file name inside the state directory.
    #[serde(default = "default_lock_file")]
    pub lock_file: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            lock_file: default_lock_file(),
        }
    }
}

fn default_state_dir() -> String {
    "state".to_string()
}

fn default_lock_file() -> String {
    "agentpulse.lock".to_string()
}

impl StateConfig {
    pub fn lock_path(&self) -> PathBuf {
        Path::new(&self.dir).join(&self.lock_file)
    }
}

/// Mail API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Endpoint accepting JSON send requests.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Sender address.
    #[serde(default = "default_from")]
    pub from: String,

    /// Recipients of the daily start/end notices.
    #[serde(default)]
    pub operators: Vec<String>,

    #[serde(default = "default_mail_timeout")]
    pub timeout_seconds: u64,

    /// Sign-off line in agent mails.
    #[serde(default = "default_signature")]
    pub signature: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            from: default_from(),
            operators: Vec::new(),
            timeout_seconds: default_mail_timeout(),
            signature: default_signature(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.resend.com/emails".to_string()
}

fn default_from() -> String {
    "reports@localhost".to_string()
}

fn default_mail_timeout() -> u64 {
    30
}

fn default_signature() -> String {
    "Operations".to_string()
}

/// Log file settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// When set, each business day also logs to `<dir>/<YYYY-MM-DD>.log`.
    #[serde(default)]
    pub dir: Option<String>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given on the command line override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref dir) = args.state_dir {
            self.state.dir = dir.display().to_string();
        }
        if let Some(ref inbox) = args.inbox {
            self.source.inbox = inbox.display().to_string();
        }
    }

    /// Check values the type system cannot.
    pub fn validate(&self) -> Result<()> {
        let schedule = &self.schedule;
        if schedule.open_hour > 23 || schedule.close_hour > 23 {
            bail!(
                "Schedule hours out of range: open_hour={}, close_hour={}",
                schedule.open_hour,
                schedule.close_hour
            );
        }
        if schedule.open_hour >= schedule.close_hour {
            bail!(
                "open_hour ({}) must be before close_hour ({})",
                schedule.open_hour,
                schedule.close_hour
            );
        }
        if !(0..=MAX_GAP_MINUTES).contains(&schedule.min_gap_minutes) {
            bail!(
                "min_gap_minutes must be between 0 and {}, got {}",
                MAX_GAP_MINUTES,
                schedule.min_gap_minutes
            );
        }
        self.timezone()?;

        if self.source.extensions.is_empty() {
            bail!("At least one source extension is required");
        }
        if self.source.date_pattern.trim().is_empty()
            || StrftimeItems::new(&self.source.date_pattern).any(|item| item == Item::Error)
        {
            bail!("Invalid date pattern: {:?}", self.source.date_pattern);
        }

        if self.state.lock_file.trim().is_empty() {
            bail!("Lock file name must not be empty");
        }

        if self.mail.timeout_seconds == 0 {
            bail!("Mail timeout must be at least 1 second");
        }
        if let Some(bad) = self.mail.operators.iter().find(|r| !r.contains('@')) {
            bail!("Operator recipient is not an address: {}", bad);
        }

        Ok(())
    }

    /// The configured reference time zone.
    pub fn timezone(&self) -> Result<Tz> {
        self.schedule
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Unknown timezone '{}': {}", self.schedule.timezone, e))
    }

    pub fn schedule(&self) -> Result<Schedule> {
        Ok(Schedule {
            tz: self.timezone()?,
            open_hour: self.schedule.open_hour,
            close_hour: self.schedule.close_hour,
            min_gap: chrono::Duration::try_minutes(self.schedule.min_gap_minutes).with_context(
                || format!("min_gap_minutes out of range: {}", self.schedule.min_gap_minutes),
            )?,
        })
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
