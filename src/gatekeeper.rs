//! Run admission and the daily start/end lifecycle.
//!
//! Each business day moves through `NOT_STARTED -> STARTED -> ENDED`. The
//! phase is derived from the persisted day flags, so a new day resets the
//! machine simply because the flags no longer equal today.
//!
//! Every field of [`RunState`] is written through the [`StateStore`] as soon
//! as it changes. When a write fails the in-memory value is kept for the rest
//! of the invocation and the failure is logged.

use crate::clock::{business_day, local_hour, Clock};
use crate::models::{DayPhase, RunState};
use crate::store::StateStore;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const KEY_LAST_PROCESSED_FILE: &str = "last_processed_file";
pub const KEY_LAST_RUN_AT: &str = "last_run_at";
pub const KEY_DAY_STARTED: &str = "day_started";
pub const KEY_DAY_ENDED: &str = "day_ended";
pub const KEY_SHEETS_TODAY: &str = "sheets_today";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Operating window and pacing.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    /// Reference time zone for days and hours.
    pub tz: Tz,
    /// First hour runs are admitted (inclusive).
    pub open_hour: u32,
    /// Hour the window closes (exclusive); the day may end from here on.
    pub close_hour: u32,
    /// Minimum time between admitted runs.
    pub min_gap: Duration,
}

/// Why an invocation was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    OutsideWindow { hour: u32 },
    GapNotElapsed { elapsed: Duration },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OutsideWindow { hour } => {
                write!(f, "outside business hours (hour {})", hour)
            }
            SkipReason::GapNotElapsed { elapsed } => write!(
                f,
                "only {:.1} min since last run",
                elapsed.num_seconds() as f64 / 60.0
            ),
        }
    }
}

/// Result of the admission checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    Skip(SkipReason),
}

/// Pending "job ended" notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayEnd {
    pub day: NaiveDate,
    pub sheets: u32,
}

/// Decides whether a run proceeds and owns all [`RunState`] mutations.
pub struct Gatekeeper {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    schedule: Schedule,
    state: RunState,
    degraded: bool,
}

impl Gatekeeper {
    /// Load persisted state. Unreadable values fall back to empty defaults.
    pub fn load(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, schedule: Schedule) -> Self {
        let today = business_day(clock.now(), schedule.tz);
        let state = load_state(store.as_ref(), today);
        debug!("Loaded run state: {:?}", state);
        Self {
            store,
            clock,
            schedule,
            state,
            degraded: false,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Whether any state write failed during this invocation.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current business day in the reference zone.
    pub fn today(&self) -> NaiveDate {
        business_day(self.now(), self.schedule.tz)
    }

    pub fn hour(&self) -> u32 {
        local_hour(self.now(), self.schedule.tz)
    }

    pub fn phase(&self) -> DayPhase {
        self.state.phase(self.today())
    }

    /// A started day that reached the closing hour and has not ended yet.
    ///
    /// Evaluated independently of the window, which is already closed by then.
    pub fn day_end_due(&self) -> Option<DayEnd> {
        let today = self.today();
        let due = self.hour() >= self.schedule.close_hour
            && self.state.day_started == Some(today)
            && self.state.day_ended != Some(today);
        due.then(|| DayEnd {
            day: today,
            sheets: self.state.sheets_today,
        })
    }

    /// Record that the "ended" notice went out for `day`.
    pub fn mark_day_ended(&mut self, day: NaiveDate) {
        self.state.day_ended = Some(day);
        self.state.sheets_today = 0;
        self.persist(KEY_DAY_ENDED, &day.format(DATE_FORMAT).to_string());
        self.persist(KEY_SHEETS_TODAY, "0");
        info!("Day {} marked ended", day);
    }

    /// Window and gap checks. On admission the run time is stored before
    /// anything slow happens.
    pub fn admit(&mut self) -> Admission {
        let hour = self.hour();
        if hour < self.schedule.open_hour || hour >= self.schedule.close_hour {
            return Admission::Skip(SkipReason::OutsideWindow { hour });
        }

        let now = self.now();
        if let Some(last) = self.state.last_run_at {
            let elapsed = now - last;
            if elapsed < Duration::zero() {
                warn!("Last run {} is in the future; ignoring gap", last);
            } else if elapsed < self.schedule.min_gap {
                return Admission::Skip(SkipReason::GapNotElapsed { elapsed });
            }
        }

        self.state.last_run_at = Some(now);
        self.persist(KEY_LAST_RUN_AT, &now.to_rfc3339());
        Admission::Proceed
    }

    /// Whether today's "started" notice is still owed.
    pub fn day_start_due(&self) -> Option<NaiveDate> {
        let today = self.today();
        (self.state.day_started != Some(today)).then_some(today)
    }

    /// Record that the "started" notice went out for `day`.
    pub fn mark_day_started(&mut self, day: NaiveDate) {
        self.state.day_started = Some(day);
        self.state.sheets_today = 0;
        self.persist(KEY_DAY_STARTED, &day.format(DATE_FORMAT).to_string());
        self.persist(KEY_SHEETS_TODAY, "0");
        info!("Day {} marked started", day);
    }

    /// The file was already ingested.
    pub fn is_duplicate(&self, file_id: &str) -> bool {
        self.state.last_processed_file.as_deref() == Some(file_id)
    }

    /// Record a successful ingest. The sheet only counts when at least one
    /// agent mail was delivered.
    pub fn record_ingest(&mut self, file_id: &str, delivered: usize) {
        self.state.last_processed_file = Some(file_id.to_string());
        self.persist(KEY_LAST_PROCESSED_FILE, file_id);

        if delivered > 0 {
            self.state.sheets_today = self.state.sheets_today.saturating_add(1);
            let count = self.state.sheets_today.to_string();
            self.persist(KEY_SHEETS_TODAY, &count);
        }
    }

    fn persist(&mut self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            warn!("State write failed, continuing in memory: {}", e);
            self.degraded = true;
        }
    }
}

/// Read every [`RunState`] field independently.
pub fn load_state(store: &dyn StateStore, today: NaiveDate) -> RunState {
    RunState {
        last_processed_file: store
            .get(KEY_LAST_PROCESSED_FILE)
            .filter(|v| !v.is_empty()),
        last_run_at: read(store, KEY_LAST_RUN_AT, |s| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc))
        }),
        day_started: read_day(store, KEY_DAY_STARTED, today),
        day_ended: read_day(store, KEY_DAY_ENDED, today),
        sheets_today: read(store, KEY_SHEETS_TODAY, |s| s.parse().ok()).unwrap_or(0),
    }
}

fn read_day(store: &dyn StateStore, key: &str, today: NaiveDate) -> Option<NaiveDate> {
    let day = read(store, key, |s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())?;
    if day > today {
        warn!("Ignoring {} = {} which is after today ({})", key, day, today);
        return None;
    }
    Some(day)
}

/// Parse a stored value. Corrupt values are cleared so the warning is not
/// repeated on every run.
fn read<T>(store: &dyn StateStore, key: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    let raw = store.get(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!("Ignoring corrupt state {} = {:?}", key, raw);
        if let Err(e) = store.clear(key) {
            warn!("{}", e);
        }
    }
    parsed
}
