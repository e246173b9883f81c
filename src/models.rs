//! Data models for the report job.
//!
//! This module contains the row, aggregate, and persisted run-state
//! structures shared across the pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One input row from the daily report.
///
/// Durations are kept as the raw cell text and parsed during aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Natural identifier of the agent (usually an email address).
    pub agent_key: String,
    /// Calls handled in this row.
    pub call_count: u64,
    /// Total handle time text.
    pub handle: String,
    /// Total talk time text.
    pub talk: String,
    /// Total after-call-work time text.
    pub after_call_work: String,
    /// Agent group label.
    pub group: String,
    pub first_name: String,
    pub last_name: String,
}

impl RawRecord {
    /// Creates a row with only a key and call count set.
    #[cfg(test)]
    pub fn new(agent_key: &str, call_count: u64) -> Self {
        Self {
            agent_key: agent_key.to_string(),
            call_count,
            ..Self::default()
        }
    }
}

/// Per-agent totals for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedAgent {
    pub agent_key: String,
    pub first_name: String,
    pub last_name: String,
    pub group: String,
    pub total_calls: u64,
    pub total_handle_secs: u64,
    pub total_talk_secs: u64,
    pub total_acw_secs: u64,
    /// Average handle time per call, `HH:MM:SS`.
    pub avg_handle: String,
    /// Average talk time per call, `HH:MM:SS`.
    pub avg_talk: String,
    /// Average after-call-work time per call, `HH:MM:SS`.
    pub avg_acw: String,
}

impl AggregatedAgent {
    /// Returns the name used to greet the agent.
    ///
    /// Falls back to the agent key when no name was supplied.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.agent_key.clone()
        } else {
            full.to_string()
        }
    }
}

/// Batch-level counters used for logging and operator mail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of unique agents.
    pub agents: usize,
    /// Sum of calls over all agents.
    pub total_calls: u64,
    /// Agents with zero calls.
    pub idle_agents: usize,
}

impl BatchSummary {
    /// Creates a summary from aggregated agents.
    pub fn from_agents(agents: &[AggregatedAgent]) -> Self {
        let mut summary = Self {
            agents: agents.len(),
            ..Self::default()
        };

        for agent in agents {
            summary.total_calls = summary.total_calls.saturating_add(agent.total_calls);
            if agent.total_calls == 0 {
                summary.idle_agents += 1;
            }
        }

        summary
    }
}

/// Persisted job state. Each field is stored under its own key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Identity of the last file that was ingested.
    pub last_processed_file: Option<String>,
    /// When the last admitted run started.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Business day the "started" notice was sent for.
    pub day_started: Option<NaiveDate>,
    /// Business day the "ended" notice was sent for.
    pub day_ended: Option<NaiveDate>,
    /// Sheets ingested with at least one delivered mail today.
    pub sheets_today: u32,
}

/// Lifecycle phase of a business day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayPhase {
    NotStarted,
    Started,
    Ended,
}

impl fmt::Display for DayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayPhase::NotStarted => write!(f, "not started"),
            DayPhase::Started => write!(f, "started"),
            DayPhase::Ended => write!(f, "ended"),
        }
    }
}

impl RunState {
    /// Phase of `today` as implied by the day flags.
    pub fn phase(&self, today: NaiveDate) -> DayPhase {
        if self.day_ended == Some(today) {
            DayPhase::Ended
        } else if self.day_started == Some(today) {
            DayPhase::Started
        } else {
            DayPhase::NotStarted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(key: &str, first: &str, last: &str, calls: u64) -> AggregatedAgent {
        AggregatedAgent {
            agent_key: key.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            group: String::new(),
            total_calls: calls,
            total_handle_secs: 0,
            total_talk_secs: 0,
            total_acw_secs: 0,
            avg_handle: "00:00:00".to_string(),
            avg_talk: "00:00:00".to_string(),
            avg_acw: "00:00:00".to_string(),
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(agent("a@x.io", "Ann", "Lee", 1).display_name(), "Ann Lee");
        assert_eq!(agent("a@x.io", "Ann", "", 1).display_name(), "Ann");
        assert_eq!(agent("a@x.io", "", "", 1).display_name(), "a@x.io");
    }

    #[test]
    fn test_batch_summary() {
        let agents = vec![
            agent("a", "", "", 3),
            agent("b", "", "", 0),
            agent("c", "", "", 4),
        ];
        let summary = BatchSummary::from_agents(&agents);
        assert_eq!(summary.agents, 3);
        assert_eq!(summary.total_calls, 7);
        assert_eq!(summary.idle_agents, 1);
    }

    #[test]
    fn test_batch_summary_saturates_call_total() {
        let agents = vec![agent("a", "", "", u64::MAX), agent("b", "", "", 1)];
        let summary = BatchSummary::from_agents(&agents);
        assert_eq!(summary.total_calls, u64::MAX);
    }

    #[test]
    fn test_day_phase() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 4).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();

        let mut state = RunState::default();
        assert_eq!(state.phase(today), DayPhase::NotStarted);

        state.day_started = Some(yesterday);
        state.day_ended = Some(yesterday);
        assert_eq!(state.phase(today), DayPhase::NotStarted);

        state.day_started = Some(today);
        assert_eq!(state.phase(today), DayPhase::Started);

        state.day_ended = Some(today);
        assert_eq!(state.phase(today), DayPhase::Ended);
    }
}
