//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// AgentPulse - scheduled agent activity reports
///
/// Meant to be invoked every few minutes by cron or a systemd timer. Each
/// invocation decides on its own whether to do anything: it runs only inside
/// business hours, at most once per minimum gap, and mails each agent once
/// per new report file.
///
/// Examples:
///   agentpulse
///   agentpulse --config /etc/agentpulse.toml
///   agentpulse --dry-run --inbox ./exports
///   agentpulse --status
///   agentpulse --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for agentpulse.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for persistent run state and the lock marker
    #[arg(long, value_name = "DIR", env = "AGENTPULSE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Directory report exports are dropped into
    #[arg(long, value_name = "DIR", env = "AGENTPULSE_INBOX")]
    pub inbox: Option<PathBuf>,

    /// Mail API key
    #[arg(long, value_name = "KEY", env = "AGENTPULSE_MAIL_API_KEY", hide_env_values = true)]
    pub mail_api_key: Option<String>,

    /// Write the aggregated batch as JSON to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Log mail instead of sending it
    ///
    /// Everything else, including state updates, happens as usual.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the persisted run state and lock status, then exit
    #[arg(long, conflicts_with_all = ["clear_lock", "init_config"])]
    pub status: bool,

    /// Remove a lock marker left behind by a killed run, then exit
    #[arg(long, conflicts_with = "init_config")]
    pub clear_lock: bool,

    /// Generate a default agentpulse.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether this invocation is an operator command rather than a run.
    pub fn is_maintenance(&self) -> bool {
        self.status || self.clear_lock || self.init_config
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.is_maintenance() && (self.dry_run || self.output.is_some()) {
            return Err(
                "--dry-run and --output only apply to a normal run".to_string(),
            );
        }

        if let Some(ref key) = self.mail_api_key {
            if key.trim().is_empty() {
                return Err("Mail API key must not be empty".to_string());
            }
        }

        if let Some(ref output) = self.output {
            if output.is_dir() {
                return Err(format!("Output path is a directory: {}", output.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
