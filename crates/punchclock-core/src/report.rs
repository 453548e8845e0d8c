//! Period aggregation: per-day punch slots, day status and worked-hour statistics.

use crate::punch::{Attendance, AttendanceId, PunchType};
use crate::zone::Zone;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Label used for an empty time slot.
pub const EMPTY_SLOT: &str = "-";

const SLOT_FORMAT: &str = "%H:%M";

/// Lunch break assumed when a day lacks a lunch-in/lunch-out pair.
const DEFAULT_LUNCH_MINUTES: i64 = 60;

/// Status of a single calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    /// No entry punch.
    Absent,
    /// Entry punched, exit not yet.
    Pending,
    /// Entry after the late cutoff.
    Late,
    Approved,
}

/// One calendar day of punches in the deployment timezone.
///
/// A single `lunch` punch fills both `lunch_in` and `lunch_out` with the
/// same time; the punch model has no separate lunch-return punch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayEntry {
    /// Id of the latest punch of the day.
    pub id: AttendanceId,
    pub date: NaiveDate,
    #[serde(with = "slot")]
    pub entry: Option<NaiveTime>,
    #[serde(with = "slot")]
    pub lunch_in: Option<NaiveTime>,
    #[serde(with = "slot")]
    pub lunch_out: Option<NaiveTime>,
    #[serde(with = "slot")]
    pub exit: Option<NaiveTime>,
    pub status: DayStatus,
    /// Free-text note, filled from a justification filed for the day.
    #[serde(default)]
    pub note: String,
}

impl DayEntry {
    /// An entry with every slot empty.
    pub fn empty(id: AttendanceId, date: NaiveDate) -> Self {
        Self {
            id,
            date,
            entry: None,
            lunch_in: None,
            lunch_out: None,
            exit: None,
            status: DayStatus::Absent,
            note: String::new(),
        }
    }

    /// Whether any punch landed on this day.
    pub fn has_punch(&self) -> bool {
        self.entry.is_some() || self.exit.is_some() || self.lunch_in.is_some()
    }
}

/// Render a slot as `HH:MM`, or `-` when empty.
pub fn slot_label(time: Option<NaiveTime>) -> String {
    match time {
        Some(t) => t.format(SLOT_FORMAT).to_string(),
        None => EMPTY_SLOT.to_string(),
    }
}

mod slot {
    use super::{slot_label, EMPTY_SLOT, SLOT_FORMAT};
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&slot_label(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw == EMPTY_SLOT {
            return Ok(None);
        }
        NaiveTime::parse_from_str(&raw, SLOT_FORMAT)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

/// Aggregated figures over a user's attendance history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Worked hours, rounded to one decimal.
    pub total_hours: f64,
    pub total_absences: u32,
    pub total_late: u32,
    /// Justifications filed by the user; supplied by the caller.
    pub total_justifications: usize,
}

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Reporting window, always ending today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Today,
    /// Since Monday of the current week.
    Week,
    /// Since the first of the current month.
    #[default]
    Month,
    /// Since January 1st.
    Year,
    All,
}

impl Period {
    /// Resolve to a date range; `None` for [`Period::All`].
    pub fn range(&self, today: NaiveDate) -> Option<DateRange> {
        let start = match self {
            Period::Today => today,
            Period::Week => {
                today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
            }
            Period::Month => today.with_day(1)?,
            Period::Year => NaiveDate::from_ymd_opt(today.year(), 1, 1)?,
            Period::All => return None,
        };
        Some(DateRange { start, end: today })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown period {0:?} (expected today, week, month, year or all)")]
pub struct UnknownPeriod(pub String);

impl FromStr for Period {
    type Err = UnknownPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(Period::Today),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            "all" => Ok(Period::All),
            other => Err(UnknownPeriod(other.to_string())),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Period::Today => "today",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
            Period::All => "all",
        })
    }
}

/// Everything shown for one user over a reporting window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserReport {
    pub username: String,
    pub period: Period,
    /// Punches inside the window.
    pub total_attendances: usize,
    /// Newest day first.
    pub days: Vec<DayEntry>,
    /// Computed over the whole history, not only the window.
    pub stats: Stats,
}

/// Groups punches into days and derives statuses and statistics.
#[derive(Debug, Clone)]
pub struct Aggregator {
    zone: Zone,
    late_cutoff: NaiveTime,
}

impl Aggregator {
    pub fn new(zone: impl Into<Zone>, late_cutoff: NaiveTime) -> Self {
        Self {
            zone: zone.into(),
            late_cutoff,
        }
    }

    /// Local wall-clock time of a punch, truncated to the minute.
    fn local_time(&self, instant: DateTime<Utc>) -> (NaiveDate, NaiveTime) {
        let local = self.zone.to_local(instant);
        let time = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0).unwrap_or_default();
        (local.date(), time)
    }

    /// Group punches by local calendar date, newest day first.
    ///
    /// Records may arrive in any order. When a day holds more than one
    /// punch of a type, the earliest one fills the slot.
    pub fn group_by_date(&self, records: &[Attendance]) -> Vec<DayEntry> {
        let mut sorted: Vec<&Attendance> = records.iter().collect();
        sorted.sort_by_key(|a| (a.timestamp, a.id));

        let mut days: BTreeMap<NaiveDate, DayEntry> = BTreeMap::new();
        for record in sorted {
            let (date, time) = self.local_time(record.timestamp);
            let day = days
                .entry(date)
                .or_insert_with(|| DayEntry::empty(record.id, date));
            day.id = record.id;
            match record.punch_type {
                PunchType::Entry => {
                    day.entry.get_or_insert(time);
                }
                PunchType::Lunch => {
                    day.lunch_in.get_or_insert(time);
                    day.lunch_out.get_or_insert(time);
                }
                PunchType::Exit => {
                    day.exit.get_or_insert(time);
                }
            }
        }

        days.into_values()
            .rev()
            .map(|mut day| {
                day.status = self.day_status(&day);
                day
            })
            .collect()
    }

    pub fn day_status(&self, day: &DayEntry) -> DayStatus {
        let Some(entry) = day.entry else {
            return DayStatus::Absent;
        };
        if day.exit.is_none() {
            return DayStatus::Pending;
        }
        if entry > self.late_cutoff {
            return DayStatus::Late;
        }
        DayStatus::Approved
    }

    /// Compute worked hours, absences and lateness from the first punched
    /// day through `today`.
    ///
    /// The absence total is `expected business days - days with presence`,
    /// which replaces the per-day tally of `Absent` entries.
    pub fn compute_stats(
        &self,
        days: &[DayEntry],
        justification_count: usize,
        today: NaiveDate,
    ) -> Stats {
        let Some(first_day) = days.iter().filter(|d| d.has_punch()).map(|d| d.date).min() else {
            return Stats {
                total_justifications: justification_count,
                ..Stats::default()
            };
        };

        let expected = business_days_between(first_day, today);

        let mut worked = Duration::zero();
        let mut tallied_absences = 0u32;
        let mut late = 0u32;
        let mut present = 0u32;

        for day in days {
            if day.date < first_day || is_weekend(day.date) {
                continue;
            }
            let status = self.day_status(day);
            match status {
                DayStatus::Absent => tallied_absences += 1,
                DayStatus::Late => late += 1,
                DayStatus::Pending | DayStatus::Approved => {}
            }
            if matches!(status, DayStatus::Approved | DayStatus::Late) {
                present += 1;
                if let Some(duration) = worked_duration(day) {
                    if duration > Duration::zero() {
                        worked += duration;
                    } else {
                        tracing::debug!(date = %day.date, "non-positive worked duration ignored");
                    }
                }
            }
        }

        let total_absences = expected.saturating_sub(present);
        tracing::debug!(
            %first_day,
            expected,
            present,
            tallied_absences,
            total_absences,
            "computed attendance stats"
        );

        let hours = worked.num_seconds() as f64 / 3600.0;
        Stats {
            total_hours: (hours * 10.0).round() / 10.0,
            total_absences,
            total_late: late,
            total_justifications: justification_count,
        }
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Number of Monday–Friday dates in `[from, to]`.
pub fn business_days_between(from: NaiveDate, to: NaiveDate) -> u32 {
    from.iter_days()
        .take_while(|d| *d <= to)
        .filter(|d| !is_weekend(*d))
        .count() as u32
}

/// Span from `start` to `end` on a 24h clock, wrapping past midnight.
fn clock_span(start: NaiveTime, end: NaiveTime) -> Duration {
    let span = end - start;
    if end < start {
        span + Duration::days(1)
    } else {
        span
    }
}

/// Exit minus entry minus lunch, or `None` without both entry and exit.
fn worked_duration(day: &DayEntry) -> Option<Duration> {
    let (entry, exit) = (day.entry?, day.exit?);
    let lunch = match (day.lunch_in, day.lunch_out) {
        (Some(lunch_in), Some(lunch_out)) => clock_span(lunch_in, lunch_out),
        _ => Duration::minutes(DEFAULT_LUNCH_MINUTES),
    };
    Some(clock_span(entry, exit) - lunch)
}
