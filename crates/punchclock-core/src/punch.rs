//! Punch types, attendance records and the per-user punch sequencer.

use crate::types::UserId;
use crate::zone::Zone;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Database identifier of an attendance record.
pub type AttendanceId = i64;

/// Kind of punch. Declaration order is the required daily sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunchType {
    Entry,
    Lunch,
    Exit,
}

impl PunchType {
    pub const ALL: [PunchType; 3] = [PunchType::Entry, PunchType::Lunch, PunchType::Exit];

    pub fn as_str(&self) -> &'static str {
        match self {
            PunchType::Entry => "entry",
            PunchType::Lunch => "lunch",
            PunchType::Exit => "exit",
        }
    }

    /// The punch that must have been recorded before this one, if any.
    pub fn previous(&self) -> Option<PunchType> {
        match self {
            PunchType::Entry => None,
            PunchType::Lunch => Some(PunchType::Entry),
            PunchType::Exit => Some(PunchType::Lunch),
        }
    }
}

impl fmt::Display for PunchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown punch type {0:?} (expected entry, lunch or exit)")]
pub struct UnknownPunchType(pub String);

impl FromStr for PunchType {
    type Err = UnknownPunchType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PunchType::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPunchType(s.to_string()))
    }
}

/// A stored punch. Timestamps are assigned by the server and never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendance {
    pub id: AttendanceId,
    pub user_id: UserId,
    pub punch_type: PunchType,
    pub timestamp: DateTime<Utc>,
    pub photo_ref: String,
    pub synced: bool,
}

/// A punch about to be written. `local_date` is the calendar day the
/// uniqueness rule applies to.
#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub user_id: UserId,
    pub punch_type: PunchType,
    pub timestamp: DateTime<Utc>,
    pub local_date: NaiveDate,
    pub photo_ref: String,
}

/// Outcome of a ledger write.
#[derive(Debug)]
pub enum RecordOutcome {
    Recorded(Attendance),
    /// Another punch of the same type already exists for that user and day.
    Duplicate,
}

/// Attendance history the sequencer reads from and appends to.
pub trait PunchLedger {
    type Error: std::error::Error + 'static;

    /// Whether the user has ever recorded this punch type, on any day.
    fn has_ever_punched(&self, user_id: UserId, punch: PunchType) -> Result<bool, Self::Error>;

    /// Whether the user recorded this punch type on the given local date.
    fn has_punched_on(
        &self,
        user_id: UserId,
        punch: PunchType,
        date: NaiveDate,
    ) -> Result<bool, Self::Error>;

    /// Append a punch, refusing a second one of the same type on the same
    /// local date. Implementations must make the refusal atomic with the write.
    fn record(&mut self, punch: NewAttendance) -> Result<RecordOutcome, Self::Error>;
}

#[derive(Error, Debug)]
pub enum PunchError<E>
where
    E: std::error::Error + 'static,
{
    #[error("cannot punch {punch}: {missing} has never been recorded")]
    OutOfSequence { punch: PunchType, missing: PunchType },
    #[error("{punch} already recorded on {date}")]
    DuplicatePunch { punch: PunchType, date: NaiveDate },
    #[error("attendance ledger: {0}")]
    Ledger(#[source] E),
}

/// Enforces punch ordering and the once-per-day rule.
///
/// The ordering check looks at the user's whole history while the
/// duplicate check looks only at the current local date. A user who
/// punched `entry` last week may punch `lunch` today without a fresh
/// `entry`; earlier gaps are never repaired.
#[derive(Debug, Clone)]
pub struct Sequencer {
    zone: Zone,
}

impl Sequencer {
    pub fn new(zone: impl Into<Zone>) -> Self {
        Self { zone: zone.into() }
    }

    /// Calendar date of `instant` in the deployment timezone.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.zone.to_local(instant).date()
    }

    pub fn validate_and_record<L: PunchLedger>(
        &self,
        ledger: &mut L,
        user_id: UserId,
        punch: PunchType,
        now: DateTime<Utc>,
        photo_ref: impl Into<String>,
    ) -> Result<Attendance, PunchError<L::Error>> {
        if let Some(missing) = punch.previous() {
            let seen = ledger
                .has_ever_punched(user_id, missing)
                .map_err(PunchError::Ledger)?;
            if !seen {
                tracing::info!(user_id, %punch, %missing, "punch rejected: out of sequence");
                return Err(PunchError::OutOfSequence { punch, missing });
            }
        }

        let date = self.local_date(now);
        if ledger
            .has_punched_on(user_id, punch, date)
            .map_err(PunchError::Ledger)?
        {
            tracing::info!(user_id, %punch, %date, "punch rejected: already recorded today");
            return Err(PunchError::DuplicatePunch { punch, date });
        }

        let outcome = ledger
            .record(NewAttendance {
                user_id,
                punch_type: punch,
                timestamp: now,
                local_date: date,
                photo_ref: photo_ref.into(),
            })
            .map_err(PunchError::Ledger)?;

        match outcome {
            RecordOutcome::Recorded(attendance) => {
                tracing::info!(user_id, %punch, id = attendance.id, "punch recorded");
                Ok(attendance)
            }
            // Lost a race against a concurrent punch between the check and the write.
            RecordOutcome::Duplicate => {
                tracing::warn!(user_id, %punch, %date, "punch rejected by ledger uniqueness");
                Err(PunchError::DuplicatePunch { punch, date })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use std::convert::Infallible;

    #[derive(Default)]
    struct MemoryLedger {
        rows: Vec<(Attendance, NaiveDate)>,
        /// Skip the pre-check to simulate a concurrent writer.
        hide_existing: bool,
    }

    impl PunchLedger for MemoryLedger {
        type Error = Infallible;

        fn has_ever_punched(&self, user_id: UserId, punch: PunchType) -> Result<bool, Infallible> {
            Ok(self
                .rows
                .iter()
                .any(|(a, _)| a.user_id == user_id && a.punch_type == punch))
        }

        fn has_punched_on(
            &self,
            user_id: UserId,
            punch: PunchType,
            date: NaiveDate,
        ) -> Result<bool, Infallible> {
            if self.hide_existing {
                return Ok(false);
            }
            Ok(self
                .rows
                .iter()
                .any(|(a, d)| a.user_id == user_id && a.punch_type == punch && *d == date))
        }

        fn record(&mut self, punch: NewAttendance) -> Result<RecordOutcome, Infallible> {
            let clash = self.rows.iter().any(|(a, d)| {
                a.user_id == punch.user_id && a.punch_type == punch.punch_type && *d == punch.local_date
            });
            if clash {
                return Ok(RecordOutcome::Duplicate);
            }
            let attendance = Attendance {
                id: self.rows.len() as AttendanceId + 1,
                user_id: punch.user_id,
                punch_type: punch.punch_type,
                timestamp: punch.timestamp,
                photo_ref: punch.photo_ref,
                synced: false,
            };
            self.rows.push((attendance.clone(), punch.local_date));
            Ok(RecordOutcome::Recorded(attendance))
        }
    }

    fn utc() -> Sequencer {
        Sequencer::new(FixedOffset::east_opt(0).unwrap())
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_punch_type_order() {
        assert!(PunchType::Entry < PunchType::Lunch);
        assert!(PunchType::Lunch < PunchType::Exit);
        assert_eq!(PunchType::Entry.previous(), None);
        assert_eq!(PunchType::Exit.previous(), Some(PunchType::Lunch));
    }

    #[test]
    fn test_punch_type_parse() {
        assert_eq!("lunch".parse::<PunchType>(), Ok(PunchType::Lunch));
        assert!("almoco".parse::<PunchType>().is_err());
        assert!("Entry".parse::<PunchType>().is_err());
        for punch in PunchType::ALL {
            assert_eq!(punch.to_string().parse::<PunchType>(), Ok(punch));
        }
    }

    #[test]
    fn test_lunch_without_entry_is_out_of_sequence() {
        let mut ledger = MemoryLedger::default();
        let err = utc()
            .validate_and_record(&mut ledger, 1, PunchType::Lunch, at(7, 12, 0), "p")
            .unwrap_err();
        assert!(matches!(
            err,
            PunchError::OutOfSequence {
                punch: PunchType::Lunch,
                missing: PunchType::Entry
            }
        ));
        assert!(ledger.rows.is_empty());
    }

    #[test]
    fn test_entry_then_lunch_succeeds() {
        let mut ledger = MemoryLedger::default();
        let seq = utc();
        let entry = seq
            .validate_and_record(&mut ledger, 1, PunchType::Entry, at(7, 8, 0), "photos/a")
            .unwrap();
        assert_eq!(entry.punch_type, PunchType::Entry);
        assert_eq!(entry.photo_ref, "photos/a");
        assert!(!entry.synced);

        let lunch = seq
            .validate_and_record(&mut ledger, 1, PunchType::Lunch, at(7, 12, 0), "photos/b")
            .unwrap();
        assert_eq!(lunch.timestamp, at(7, 12, 0));
    }

    #[test]
    fn test_exit_requires_lunch() {
        let mut ledger = MemoryLedger::default();
        let seq = utc();
        seq.validate_and_record(&mut ledger, 1, PunchType::Entry, at(7, 8, 0), "")
            .unwrap();
        let err = seq
            .validate_and_record(&mut ledger, 1, PunchType::Exit, at(7, 17, 0), "")
            .unwrap_err();
        assert!(matches!(
            err,
            PunchError::OutOfSequence {
                missing: PunchType::Lunch,
                ..
            }
        ));
    }

    #[test]
    fn test_sequence_is_checked_against_lifetime_history() {
        let mut ledger = MemoryLedger::default();
        let seq = utc();
        seq.validate_and_record(&mut ledger, 1, PunchType::Entry, at(7, 8, 0), "")
            .unwrap();
        // No entry on the 8th, but the entry from the 7th satisfies the order.
        seq.validate_and_record(&mut ledger, 1, PunchType::Lunch, at(8, 12, 0), "")
            .unwrap();
    }

    #[test]
    fn test_sequence_is_per_user() {
        let mut ledger = MemoryLedger::default();
        let seq = utc();
        seq.validate_and_record(&mut ledger, 1, PunchType::Entry, at(7, 8, 0), "")
            .unwrap();
        let err = seq
            .validate_and_record(&mut ledger, 2, PunchType::Lunch, at(7, 12, 0), "")
            .unwrap_err();
        assert!(matches!(err, PunchError::OutOfSequence { .. }));
    }

    #[test]
    fn test_duplicate_same_day_rejected() {
        let mut ledger = MemoryLedger::default();
        let seq = utc();
        seq.validate_and_record(&mut ledger, 1, PunchType::Entry, at(7, 8, 0), "")
            .unwrap();
        let err = seq
            .validate_and_record(&mut ledger, 1, PunchType::Entry, at(7, 9, 0), "")
            .unwrap_err();
        match err {
            PunchError::DuplicatePunch { punch, date } => {
                assert_eq!(punch, PunchType::Entry);
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 7, 7).unwrap());
            }
            other => panic!("expected DuplicatePunch, got {other:?}"),
        }
        assert_eq!(ledger.rows.len(), 1);
    }

    #[test]
    fn test_same_type_on_different_days_succeeds() {
        let mut ledger = MemoryLedger::default();
        let seq = utc();
        seq.validate_and_record(&mut ledger, 1, PunchType::Entry, at(7, 8, 0), "")
            .unwrap();
        seq.validate_and_record(&mut ledger, 1, PunchType::Entry, at(8, 8, 0), "")
            .unwrap();
        assert_eq!(ledger.rows.len(), 2);
    }

    #[test]
    fn test_local_date_follows_dst() {
        let seq = Sequencer::new(chrono_tz::America::New_York);
        // 04:30Z is 23:30 the day before in January (UTC-5) but 00:30 in July (UTC-4).
        assert_eq!(
            seq.local_date(Utc.with_ymd_and_hms(2026, 1, 13, 4, 30, 0).unwrap()),
            NaiveDate::from_ymd_opt(2026, 1, 12).unwrap()
        );
        assert_eq!(
            seq.local_date(Utc.with_ymd_and_hms(2026, 7, 13, 4, 30, 0).unwrap()),
            NaiveDate::from_ymd_opt(2026, 7, 13).unwrap()
        );
    }

    #[test]
    fn test_duplicate_uses_local_calendar_date() {
        let mut ledger = MemoryLedger::default();
        // UTC-3: 01:00Z on the 8th is still the 7th locally.
        let seq = Sequencer::new(FixedOffset::west_opt(3 * 3600).unwrap());
        seq.validate_and_record(&mut ledger, 1, PunchType::Entry, at(7, 11, 0), "")
            .unwrap();
        let err = seq
            .validate_and_record(&mut ledger, 1, PunchType::Entry, at(8, 1, 0), "")
            .unwrap_err();
        assert!(matches!(err, PunchError::DuplicatePunch { .. }));

        // 04:00Z on the 8th is 01:00 local on the 8th.
        seq.validate_and_record(&mut ledger, 1, PunchType::Entry, at(8, 4, 0), "")
            .unwrap();
    }

    #[test]
    fn test_ledger_uniqueness_reports_duplicate() {
        let mut ledger = MemoryLedger::default();
        let seq = utc();
        seq.validate_and_record(&mut ledger, 1, PunchType::Entry, at(7, 8, 0), "")
            .unwrap();
        ledger.hide_existing = true;
        let err = seq
            .validate_and_record(&mut ledger, 1, PunchType::Entry, at(7, 8, 1), "")
            .unwrap_err();
        assert!(matches!(err, PunchError::DuplicatePunch { .. }));
        assert_eq!(ledger.rows.len(), 1);
    }
}
