//! Agent aggregation and batch statistics.
//!
//! Rows for the same agent are folded into one entry in a single pass.
//! Entries keep the order in which each agent first appeared.

use crate::duration::{format_average, parse_duration};
use crate::models::{AggregatedAgent, RawRecord};
use indexmap::IndexMap;
use thiserror::Error;

/// Errors raised while aggregating a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("no rows to aggregate")]
    EmptyBatch,
}

/// Running totals for one agent.
#[derive(Debug, Default)]
struct Accumulator {
    first_name: String,
    last_name: String,
    group: String,
    calls: u64,
    handle: u64,
    talk: u64,
    acw: u64,
}

impl Accumulator {
    fn absorb(&mut self, row: &RawRecord) {
        backfill(&mut self.first_name, &row.first_name);
        backfill(&mut self.last_name, &row.last_name);
        backfill(&mut self.group, &row.group);

        self.calls = self.calls.saturating_add(row.call_count);
        self.handle = self.handle.saturating_add(parse_duration(&row.handle));
        self.talk = self.talk.saturating_add(parse_duration(&row.talk));
        self.acw = self.acw.saturating_add(parse_duration(&row.after_call_work));
    }

    fn finish(self, agent_key: String) -> AggregatedAgent {
        AggregatedAgent {
            agent_key,
            first_name: self.first_name,
            last_name: self.last_name,
            group: self.group,
            total_calls: self.calls,
            total_handle_secs: self.handle,
            total_talk_secs: self.talk,
            total_acw_secs: self.acw,
            avg_handle: format_average(self.handle, self.calls),
            avg_talk: format_average(self.talk, self.calls),
            avg_acw: format_average(self.acw, self.calls),
        }
    }
}

/// Fill `slot` from `candidate` only while `slot` is still empty.
fn backfill(slot: &mut String, candidate: &str) {
    let candidate = candidate.trim();
    if slot.is_empty() && !candidate.is_empty() {
        *slot = candidate.to_string();
    }
}

/// Aggregate raw rows into one entry per agent key.
///
/// Rows with a blank key are dropped. Fails with [`AggregateError::EmptyBatch`]
/// when `rows` is empty.
pub fn aggregate(rows: &[RawRecord]) -> Result<Vec<AggregatedAgent>, AggregateError> {
    if rows.is_empty() {
        return Err(AggregateError::EmptyBatch);
    }

    let mut agents: IndexMap<String, Accumulator> = IndexMap::new();

    for row in rows {
        let key = row.agent_key.trim();
        if key.is_empty() {
            continue;
        }
        agents.entry(key.to_string()).or_default().absorb(row);
    }

    Ok(agents
        .into_iter()
        .map(|(key, acc)| acc.finish(key))
        .collect())
}

/// Agents sorted by total calls, busiest first.
pub fn busiest_agents(agents: &[AggregatedAgent], n: usize) -> Vec<&AggregatedAgent> {
    let mut sorted: Vec<&AggregatedAgent> = agents.iter().collect();
    sorted.sort_by_key(|a| std::cmp::Reverse(a.total_calls));
    sorted.truncate(n);
    sorted
}
