use crate::rows;
use chrono::{DateTime, NaiveDate, Utc};
use punchclock_core::justification::{
    Justification, JustificationApproval, JustificationId, JustificationView,
};
use punchclock_core::punch::{AttendanceId, NewAttendance, RecordOutcome};
use punchclock_core::{Attendance, Candidate, Embedding, PunchLedger, PunchType, Role, User, UserId};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

const USER_COLUMNS: &str = "id, username, role, embedding";
const ATTENDANCE_COLUMNS: &str = "id, user_id, punch_type, timestamp_ms, photo_ref, synced";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot encode embedding: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("username {0:?} is already taken")]
    UsernameTaken(String),
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// SQLite-backed store for users, punches and justifications.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Ok(Self { conn })
    }

    /// Create an in-memory store for testing.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    // --- users ---

    pub fn create_user(
        &self,
        username: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let inserted = self.conn.execute(
            "INSERT INTO users (username, role, created_at) VALUES (?1, ?2, ?3)",
            params![username, role.as_str(), rows::millis(now)],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::UsernameTaken(username.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        Ok(User {
            id: self.conn.last_insert_rowid(),
            username: username.to_string(),
            role,
            embedding: None,
        })
    }

    pub fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                rows::user,
            )
            .optional()?;
        Ok(user)
    }

    /// Fetch a user or fail with [`StoreError::NotFound`].
    pub fn require_user(&self, id: UserId) -> Result<User, StoreError> {
        self.user(id)?.ok_or(StoreError::NotFound { entity: "user", id })
    }

    /// All users in id order.
    pub fn users(&self) -> Result<Vec<User>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC"))?;
        let users = stmt.query_map([], rows::user)?.collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Users with at least one punch, in id order.
    pub fn users_with_attendance(&self) -> Result<Vec<User>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users u
             WHERE EXISTS (SELECT 1 FROM attendance a WHERE a.user_id = u.id)
             ORDER BY id ASC"
        ))?;
        let users = stmt.query_map([], rows::user)?.collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Every user as a match candidate, in id order (the matcher's tie-break order).
    pub fn candidates(&self) -> Result<Vec<Candidate>, StoreError> {
        Ok(self.users()?.iter().map(Candidate::from).collect())
    }

    /// Store or replace the user's enrolled embedding.
    pub fn set_embedding(&self, user_id: UserId, embedding: &Embedding) -> Result<(), StoreError> {
        let encoded = rows::encode_embedding(embedding)?;
        let changed = self.conn.execute(
            "UPDATE users SET embedding = ?1 WHERE id = ?2",
            params![encoded, user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "user",
                id: user_id,
            });
        }
        Ok(())
    }

    /// Delete a user together with their punches and justifications.
    pub fn delete_user(&self, user_id: UserId) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        Ok(changed > 0)
    }

    // --- attendance ---

    fn query_attendance(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Attendance>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance {filter}"))?;
        let records = stmt
            .query_map(params, rows::attendance)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// A user's punches, newest first.
    pub fn attendance_for_user(&self, user_id: UserId) -> Result<Vec<Attendance>, StoreError> {
        self.query_attendance(
            "WHERE user_id = ?1 ORDER BY timestamp_ms DESC, id DESC",
            params![user_id],
        )
    }

    /// The user's `limit` most recent punches, newest first.
    pub fn recent_attendance(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Attendance>, StoreError> {
        self.query_attendance(
            "WHERE user_id = ?1 ORDER BY timestamp_ms DESC, id DESC LIMIT ?2",
            params![user_id, limit as i64],
        )
    }

    /// Every punch, newest first.
    pub fn all_attendance(&self) -> Result<Vec<Attendance>, StoreError> {
        self.query_attendance("ORDER BY timestamp_ms DESC, id DESC", [])
    }

    /// Punches not yet marked as synced, oldest first.
    pub fn unsynced_attendance(&self) -> Result<Vec<Attendance>, StoreError> {
        self.query_attendance("WHERE synced = 0 ORDER BY timestamp_ms ASC, id ASC", [])
    }

    /// Mark punches as synced. Returns how many rows changed.
    pub fn mark_synced(&mut self, ids: &[AttendanceId]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE attendance SET synced = 1 WHERE id = ?1 AND synced = 0")?;
            for id in ids {
                changed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    // --- justifications ---

    pub fn insert_justification(
        &self,
        user_id: Option<UserId>,
        reason: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Justification, StoreError> {
        self.conn.execute(
            "INSERT INTO justifications (user_id, reason, date, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, reason, date.to_string(), rows::millis(now)],
        )?;
        Ok(Justification {
            id: self.conn.last_insert_rowid(),
            user_id,
            reason: reason.to_string(),
            date,
            created_at: now,
        })
    }

    pub fn justification(&self, id: JustificationId) -> Result<Option<Justification>, StoreError> {
        let justification = self
            .conn
            .query_row(
                "SELECT id, user_id, reason, date, created_at FROM justifications WHERE id = ?1",
                params![id],
                rows::justification,
            )
            .optional()?;
        Ok(justification)
    }

    /// Justifications joined with their review, newest first. `user` limits
    /// the listing to one user's entries.
    pub fn justifications(
        &self,
        user: Option<UserId>,
    ) -> Result<Vec<JustificationView>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT j.id, j.user_id, j.reason, j.date, j.created_at,
                    u.username,
                    a.justification_id, a.status, a.reviewer, a.reviewed_at
             FROM justifications j
             LEFT JOIN users u ON u.id = j.user_id
             LEFT JOIN justification_approvals a ON a.justification_id = j.id
             WHERE ?1 IS NULL OR j.user_id = ?1
             ORDER BY j.created_at DESC, j.id DESC",
        )?;
        let views = stmt
            .query_map(params![user], |row| {
                Ok(JustificationView::new(
                    rows::justification(row)?,
                    row.get(5)?,
                    rows::approval_at(row, 6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(views)
    }

    pub fn justification_count(&self, user_id: UserId) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM justifications WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Reason of the most recent justification per date for a user.
    pub fn justification_notes(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(NaiveDate, String)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, reason, date, created_at FROM justifications
             WHERE user_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let notes = stmt
            .query_map(params![user_id], rows::justification)?
            .map(|j| j.map(|j| (j.date, j.reason)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Delete a justification; its review goes with it.
    pub fn delete_justification(&self, id: JustificationId) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM justifications WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Insert or overwrite the single review of a justification.
    pub fn upsert_approval(&self, approval: &JustificationApproval) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO justification_approvals (justification_id, status, reviewer, reviewed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (justification_id) DO UPDATE SET
                status = excluded.status,
                reviewer = excluded.reviewer,
                reviewed_at = excluded.reviewed_at",
            params![
                approval.justification_id,
                approval.status.as_str(),
                approval.reviewer,
                rows::millis(approval.reviewed_at),
            ],
        )?;
        Ok(())
    }

    pub fn approval(
        &self,
        justification_id: JustificationId,
    ) -> Result<Option<JustificationApproval>, StoreError> {
        let approval = self
            .conn
            .query_row(
                "SELECT justification_id, status, reviewer, reviewed_at
                 FROM justification_approvals WHERE justification_id = ?1",
                params![justification_id],
                |row| rows::approval_at(row, 0),
            )
            .optional()?;
        Ok(approval.flatten())
    }
}

impl PunchLedger for Store {
    type Error = StoreError;

    fn has_ever_punched(&self, user_id: UserId, punch: PunchType) -> Result<bool, StoreError> {
        let found = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM attendance WHERE user_id = ?1 AND punch_type = ?2)",
            params![user_id, punch.as_str()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn has_punched_on(
        &self,
        user_id: UserId,
        punch: PunchType,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let found = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM attendance
                            WHERE user_id = ?1 AND punch_type = ?2 AND local_date = ?3)",
            params![user_id, punch.as_str(), date.to_string()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn record(&mut self, punch: NewAttendance) -> Result<RecordOutcome, StoreError> {
        let inserted = self.conn.execute(
            "INSERT INTO attendance (user_id, punch_type, timestamp_ms, local_date, photo_ref, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                punch.user_id,
                punch.punch_type.as_str(),
                rows::millis(punch.timestamp),
                punch.local_date.to_string(),
                punch.photo_ref,
            ],
        );
        match inserted {
            Ok(_) => Ok(RecordOutcome::Recorded(Attendance {
                id: self.conn.last_insert_rowid(),
                user_id: punch.user_id,
                punch_type: punch.punch_type,
                timestamp: punch.timestamp,
                photo_ref: punch.photo_ref,
                synced: false,
            })),
            Err(e) if is_unique_violation(&e) => Ok(RecordOutcome::Duplicate),
            Err(e) => Err(e.into()),
        }
    }
}
