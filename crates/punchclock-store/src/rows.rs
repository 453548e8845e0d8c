//! Conversions between SQLite rows and core types.
//!
//! Timestamps are stored as Unix milliseconds, dates as `YYYY-MM-DD`,
//! enums by their lowercase names and embeddings as JSON arrays.

use chrono::{DateTime, NaiveDate, Utc};
use punchclock_core::justification::{ApprovalStatus, Justification, JustificationApproval};
use punchclock_core::{Attendance, Embedding, PunchType, Role, User};
use rusqlite::types::Type;
use rusqlite::Row;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{0}")]
struct BadColumn(String);

fn bad_column(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(BadColumn(message)))
}

pub fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| bad_column(idx, format!("timestamp out of range: {ms}")))
}

fn date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| bad_column(idx, format!("bad date {raw:?}: {e}")))
}

pub fn encode_embedding(embedding: &Embedding) -> serde_json::Result<String> {
    serde_json::to_string(embedding)
}

/// Columns: id, username, role, embedding.
pub fn user(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(2)?;
    let embedding: Option<String> = row.get(3)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        role: Role::from_name(&role).ok_or_else(|| bad_column(2, format!("unknown role {role:?}")))?,
        embedding: embedding
            .map(|raw| serde_json::from_str::<Embedding>(&raw))
            .transpose()
            .map_err(|e| bad_column(3, format!("bad embedding: {e}")))?,
    })
}

/// Columns: id, user_id, punch_type, timestamp_ms, photo_ref, synced.
pub fn attendance(row: &Row<'_>) -> rusqlite::Result<Attendance> {
    let punch: String = row.get(2)?;
    Ok(Attendance {
        id: row.get(0)?,
        user_id: row.get(1)?,
        punch_type: punch
            .parse::<PunchType>()
            .map_err(|e| bad_column(2, e.to_string()))?,
        timestamp: timestamp(row, 3)?,
        photo_ref: row.get(4)?,
        synced: row.get(5)?,
    })
}

/// Columns: id, user_id, reason, date, created_at.
pub fn justification(row: &Row<'_>) -> rusqlite::Result<Justification> {
    Ok(Justification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        reason: row.get(2)?,
        date: date(row, 3)?,
        created_at: timestamp(row, 4)?,
    })
}

fn status(row: &Row<'_>, idx: usize) -> rusqlite::Result<ApprovalStatus> {
    let raw: String = row.get(idx)?;
    ApprovalStatus::from_name(&raw)
        .ok_or_else(|| bad_column(idx, format!("unknown approval status {raw:?}")))
}

/// Columns starting at `offset`: justification_id, status, reviewer, reviewed_at.
/// Yields `None` when the columns come from an unmatched LEFT JOIN.
pub fn approval_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Option<JustificationApproval>> {
    let id: Option<i64> = row.get(offset)?;
    let Some(justification_id) = id else {
        return Ok(None);
    };
    Ok(Some(JustificationApproval {
        justification_id,
        status: status(row, offset + 1)?,
        reviewer: row.get(offset + 2)?,
        reviewed_at: timestamp(row, offset + 3)?,
    }))
}
