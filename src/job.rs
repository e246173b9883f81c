//! One invocation of the report job.
//!
//! Order of operations: take the run lock, settle the end of day, apply the
//! window and gap checks, send the start-of-day notice, then fetch, parse,
//! aggregate, and mail. The lock guard lives for the whole invocation and is
//! released on every exit path.

use crate::analysis::{aggregate, busiest_agents, AggregateError};
use crate::clock::Clock;
use crate::gatekeeper::{Admission, Gatekeeper, Schedule, SkipReason};
use crate::lock::{LockError, RunLock};
use crate::models::{AggregatedAgent, BatchSummary};
use crate::notify::Notifier;
use crate::report::{self, BatchReport, Email};
use crate::source::{FileSource, RowParser};
use crate::store::StateStore;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Failures that end an invocation as an error.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another invocation holds the lock.
    LockContended,
    /// Window or gap check failed.
    Skipped(SkipReason),
    /// The source had no file or could not be reached.
    NoFile,
    /// The file was already ingested.
    Duplicate { file_id: String },
    /// The file could not be read or held no usable rows.
    ParseFailed { file_id: String },
    /// Rows were aggregated and agent mails attempted.
    Ingested {
        file_id: String,
        agents: usize,
        delivered: usize,
        failed: usize,
    },
}

/// Summary of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// The "started" notice was handled in this invocation.
    pub started_day: bool,
    /// The "ended" notice was handled in this invocation.
    pub ended_day: bool,
}

impl RunReport {
    fn new(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            started_day: false,
            ended_day: false,
        }
    }
}

/// Collaborators of the job.
pub struct JobDeps {
    pub lock: Box<dyn RunLock>,
    pub store: Arc<dyn StateStore>,
    pub clock: Arc<dyn Clock>,
    pub source: Box<dyn FileSource>,
    pub parser: Box<dyn RowParser>,
    pub notifier: Box<dyn Notifier>,
}

/// Job settings that are not part of the schedule.
#[derive(Debug, Clone, Default)]
pub struct JobSettings {
    /// Recipients of the start/end notices.
    pub operators: Vec<String>,
    /// Sign-off in agent mails.
    pub signature: String,
    /// Where to write the JSON batch report, if anywhere.
    pub output: Option<PathBuf>,
}

/// Delivery counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub delivered: usize,
    pub failed: usize,
}

pub struct Job {
    deps: JobDeps,
    schedule: Schedule,
    settings: JobSettings,
}

impl Job {
    pub fn new(deps: JobDeps, schedule: Schedule, settings: JobSettings) -> Self {
        Self {
            deps,
            schedule,
            settings,
        }
    }

    /// Run one invocation.
    pub async fn run_once(&self) -> Result<RunReport, JobError> {
        let Some(_guard) = self.deps.lock.try_acquire()? else {
            debug!("Another run holds the lock; exiting");
            return Ok(RunReport::new(RunOutcome::LockContended));
        };

        let mut gate = Gatekeeper::load(
            Arc::clone(&self.deps.store),
            Arc::clone(&self.deps.clock),
            self.schedule.clone(),
        );

        let ended_day = self.settle_day_end(&mut gate).await;

        if let Admission::Skip(reason) = gate.admit() {
            info!("Skipping run: {}", reason);
            let mut report = RunReport::new(RunOutcome::Skipped(reason));
            report.ended_day = ended_day;
            return Ok(report);
        }

        let started_day = self.settle_day_start(&mut gate).await;
        let outcome = self.ingest(&mut gate).await;

        if gate.is_degraded() {
            warn!("Run finished with unsaved state; next run may repeat work");
        }

        Ok(RunReport {
            outcome,
            started_day,
            ended_day,
        })
    }

    async fn settle_day_end(&self, gate: &mut Gatekeeper) -> bool {
        let Some(end) = gate.day_end_due() else {
            return false;
        };

        info!("Ending day {} after {} sheets", end.day, end.sheets);
        let email = report::ended_email(end.day, end.sheets, &self.local_timestamp(gate));
        self.notify_operators(&email).await;
        gate.mark_day_ended(end.day);
        true
    }

    async fn settle_day_start(&self, gate: &mut Gatekeeper) -> bool {
        let Some(day) = gate.day_start_due() else {
            return false;
        };

        info!("First run of {}", day);
        let email = report::started_email(day, &self.local_timestamp(gate));
        self.notify_operators(&email).await;
        gate.mark_day_started(day);
        true
    }

    async fn ingest(&self, gate: &mut Gatekeeper) -> RunOutcome {
        let today = gate.today();

        let file = match self.deps.source.fetch_today(today) {
            Ok(Some(file)) => file,
            Ok(None) => {
                info!("No report available for {}; will retry", today);
                return RunOutcome::NoFile;
            }
            Err(e) => {
                error!("Fetching report failed: {}", e);
                return RunOutcome::NoFile;
            }
        };
        info!("Report file: {} ({} bytes)", file.name, file.size);

        if gate.is_duplicate(&file.id) {
            info!("No new file since last ingest; skipping mail");
            return RunOutcome::Duplicate { file_id: file.id };
        }

        let rows = match self.deps.parser.parse_rows(&file) {
            Ok(rows) => rows,
            Err(e) => {
                error!("Reading report failed: {}", e);
                return RunOutcome::ParseFailed { file_id: file.id };
            }
        };

        let agents = match aggregate(&rows) {
            Ok(agents) if !agents.is_empty() => agents,
            Ok(_) => {
                error!("No agents with a key in {}", file.name);
                return RunOutcome::ParseFailed { file_id: file.id };
            }
            Err(AggregateError::EmptyBatch) => {
                error!("No data rows found in {}", file.name);
                return RunOutcome::ParseFailed { file_id: file.id };
            }
        };
        info!("Total unique agents: {}", agents.len());
        for agent in busiest_agents(&agents, 3) {
            debug!(
                "Busiest: {} with {} calls",
                agent.display_name(),
                agent.total_calls
            );
        }

        let delivery = self.deliver(&agents, today).await;
        info!(
            "Mail summary: delivered={}, failed={}",
            delivery.delivered, delivery.failed
        );

        gate.record_ingest(&file.id, delivery.delivered);
        self.write_output(&file.id, today, gate, &agents);

        RunOutcome::Ingested {
            file_id: file.id,
            agents: agents.len(),
            delivered: delivery.delivered,
            failed: delivery.failed,
        }
    }

    /// Mail every agent. One failed recipient never blocks the rest.
    async fn deliver(&self, agents: &[AggregatedAgent], day: NaiveDate) -> DeliverySummary {
        let mut summary = DeliverySummary::default();

        for agent in agents {
            let email = report::agent_email(agent, day, &self.settings.signature);
            let to = [agent.agent_key.clone()];
            match self
                .deps
                .notifier
                .notify(&to, &email.subject, &email.html)
                .await
            {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!("Mail to {} failed: {}", agent.agent_key, e);
                }
            }
        }

        summary
    }

    /// Failures are logged; the day flag is marked either way.
    async fn notify_operators(&self, email: &Email) {
        if self.settings.operators.is_empty() {
            debug!("No operators configured; not sending '{}'", email.subject);
            return;
        }
        if let Err(e) = self
            .deps
            .notifier
            .notify(&self.settings.operators, &email.subject, &email.html)
            .await
        {
            error!("Operator notice '{}' failed: {}", email.subject, e);
        }
    }

    fn local_timestamp(&self, gate: &Gatekeeper) -> String {
        gate.now()
            .with_timezone(&gate.schedule().tz)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string()
    }

    fn write_output(
        &self,
        file_id: &str,
        day: NaiveDate,
        gate: &Gatekeeper,
        agents: &[AggregatedAgent],
    ) {
        let Some(path) = &self.settings.output else {
            return;
        };
        let batch = BatchReport {
            file_id: file_id.to_string(),
            business_day: day,
            generated_at: gate.now(),
            summary: BatchSummary::from_agents(agents),
            agents: agents.to_vec(),
        };
        match report::write_json_report(&batch, path) {
            Ok(()) => info!("Batch report written to {}", path.display()),
            Err(e) => warn!("Failed to write batch report {}: {}", path.display(), e),
        }
    }
}
