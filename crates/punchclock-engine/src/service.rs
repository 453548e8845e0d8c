use crate::config::Config;
use chrono::{DateTime, NaiveDate, Utc};
use punchclock_core::justification::{
    self, ApprovalStatus, Justification, JustificationApproval, JustificationId,
    JustificationView, ReasonTooShort,
};
use punchclock_core::punch::AttendanceId;
use punchclock_core::report::{Aggregator, UserReport};
use punchclock_core::{
    Attendance, Embedding, EmbeddingExtractor, EuclideanMatcher, ExtractError, MatchError,
    Matcher, Period, PunchError, PunchType, Role, Sequencer, User, UserId,
};
use punchclock_store::{Store, StoreError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("no face detected in the image")]
    FaceNotFound,
    #[error("face does not match any enrolled user (best distance {distance})")]
    NoMatch { distance: f32 },
    #[error(transparent)]
    Punch(#[from] PunchError<StoreError>),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("embedding extraction failed: {0}")]
    Extract(ExtractError),
    #[error("embedding has {actual} values, expected {expected}")]
    EmbeddingDimension { expected: usize, actual: usize },
    #[error(transparent)]
    InvalidReason(#[from] ReasonTooShort),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => ServiceError::NotFound { entity, id },
            other => ServiceError::Store(other),
        }
    }
}

/// Returned to the caller after an accepted punch.
#[derive(Debug, Clone, Serialize)]
pub struct PunchReceipt {
    pub username: String,
    pub attendance: Attendance,
    pub date: NaiveDate,
    /// The user's latest punches, newest first, including this one.
    pub recent: Vec<Attendance>,
}

/// Content address for a captured photo.
pub fn photo_ref_for(image: &[u8]) -> String {
    format!("photos/{:x}", Sha256::digest(image))
}

/// Recognition, punch sequencing, reporting and justification workflow
/// over a single store.
pub struct AttendanceService {
    store: Store,
    matcher: EuclideanMatcher,
    sequencer: Sequencer,
    aggregator: Aggregator,
    match_threshold: f32,
    embedding_dim: usize,
    recent_records: usize,
}

impl AttendanceService {
    pub fn new(store: Store, config: &Config) -> Self {
        Self {
            store,
            matcher: EuclideanMatcher,
            sequencer: Sequencer::new(config.zone),
            aggregator: Aggregator::new(config.zone, config.late_cutoff),
            match_threshold: config.match_threshold,
            embedding_dim: config.embedding_dim,
            recent_records: config.recent_records,
        }
    }

    fn require_user(&self, id: UserId) -> Result<User, ServiceError> {
        Ok(self.store.require_user(id)?)
    }

    fn require_admin(&self, id: UserId) -> Result<User, ServiceError> {
        let user = self.require_user(id)?;
        if !user.is_admin() {
            return Err(ServiceError::Forbidden("admin only"));
        }
        Ok(user)
    }

    fn local_today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.sequencer.local_date(now)
    }

    // --- users ---

    pub fn create_user(
        &self,
        username: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<User, ServiceError> {
        let user = self.store.create_user(username, role, now)?;
        tracing::info!(user_id = user.id, username, role = role.as_str(), "user created");
        Ok(user)
    }

    /// Store the user's face embedding, replacing any earlier enrollment.
    pub fn enroll(&self, user_id: UserId, embedding: Embedding) -> Result<User, ServiceError> {
        if embedding.len() != self.embedding_dim {
            return Err(ServiceError::EmbeddingDimension {
                expected: self.embedding_dim,
                actual: embedding.len(),
            });
        }
        let mut user = self.require_user(user_id)?;
        self.store.set_embedding(user_id, &embedding)?;
        user.embedding = Some(embedding);
        tracing::info!(user_id, "face enrolled");
        Ok(user)
    }

    pub fn users(&self) -> Result<Vec<User>, ServiceError> {
        Ok(self.store.users()?)
    }

    pub fn users_with_attendance(&self) -> Result<Vec<User>, ServiceError> {
        Ok(self.store.users_with_attendance()?)
    }

    /// Delete a user and everything they own. Admin only; nobody deletes themselves.
    pub fn delete_user(&self, actor: UserId, user_id: UserId) -> Result<(), ServiceError> {
        self.require_admin(actor)?;
        if actor == user_id {
            return Err(ServiceError::Forbidden("cannot delete yourself"));
        }
        if !self.store.delete_user(user_id)? {
            return Err(ServiceError::NotFound {
                entity: "user",
                id: user_id,
            });
        }
        tracing::info!(actor, user_id, "user deleted");
        Ok(())
    }

    // --- punches ---

    /// Match `probe` against every enrolled user and record the punch for
    /// the accepted match. A rejected match is logged as a justification
    /// attributed to the nearest user, if any.
    pub fn mark_attendance(
        &mut self,
        probe: &Embedding,
        punch: PunchType,
        now: DateTime<Utc>,
        photo_ref: &str,
    ) -> Result<PunchReceipt, ServiceError> {
        let candidates = self.store.candidates()?;
        let result = self
            .matcher
            .compare(probe, &candidates, self.match_threshold)?;
        tracing::info!(
            distance = result.distance,
            best_user = ?result.best_user,
            candidates = candidates.len(),
            "face match evaluated"
        );

        let Some(user_id) = result.accepted_user() else {
            tracing::error!(distance = result.distance, "recognition failed");
            self.log_failure(
                result.best_user,
                &justification::no_match_reason(result.distance),
                now,
            );
            return Err(ServiceError::NoMatch {
                distance: result.distance,
            });
        };

        let attendance =
            self.sequencer
                .validate_and_record(&mut self.store, user_id, punch, now, photo_ref)?;
        let user = self.require_user(user_id)?;
        let recent = self.store.recent_attendance(user_id, self.recent_records)?;

        Ok(PunchReceipt {
            username: user.username,
            date: self.local_today(attendance.timestamp),
            attendance,
            recent,
        })
    }

    /// Run the extractor on a captured image, then [`mark_attendance`](Self::mark_attendance).
    /// An image without a face is logged as an unattributed justification.
    pub fn mark_attendance_from_image(
        &mut self,
        extractor: &mut dyn EmbeddingExtractor,
        image: &[u8],
        punch: PunchType,
        now: DateTime<Utc>,
    ) -> Result<PunchReceipt, ServiceError> {
        let probe = match extractor.extract(image) {
            Ok(probe) => probe,
            Err(ExtractError::FaceNotFound) => {
                tracing::warn!(bytes = image.len(), "no face in captured image");
                self.log_failure(None, &justification::face_not_found_reason(), now);
                return Err(ServiceError::FaceNotFound);
            }
            Err(e) => return Err(ServiceError::Extract(e)),
        };
        self.mark_attendance(&probe, punch, now, &photo_ref_for(image))
    }

    /// Punches visible to `actor`: everything for admins, their own otherwise.
    pub fn list_attendance(&self, actor: UserId) -> Result<Vec<Attendance>, ServiceError> {
        let user = self.require_user(actor)?;
        if user.is_admin() {
            Ok(self.store.all_attendance()?)
        } else {
            Ok(self.store.attendance_for_user(actor)?)
        }
    }

    pub fn unsynced_attendance(&self) -> Result<Vec<Attendance>, ServiceError> {
        Ok(self.store.unsynced_attendance()?)
    }

    pub fn mark_synced(&mut self, ids: &[AttendanceId]) -> Result<usize, ServiceError> {
        let changed = self.store.mark_synced(ids)?;
        tracing::info!(requested = ids.len(), changed, "punches marked as synced");
        Ok(changed)
    }

    // --- reports ---

    /// Day entries for `period` plus statistics over the user's whole history.
    pub fn user_report(
        &self,
        user_id: UserId,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<UserReport, ServiceError> {
        let user = self.require_user(user_id)?;
        let today = self.local_today(now);
        let history = self.store.attendance_for_user(user_id)?;

        let range = period.range(today);
        let in_period: Vec<Attendance> = history
            .iter()
            .filter(|a| {
                range.map_or(true, |r| r.contains(self.sequencer.local_date(a.timestamp)))
            })
            .cloned()
            .collect();

        let notes: HashMap<NaiveDate, String> =
            self.store.justification_notes(user_id)?.into_iter().collect();
        let mut days = self.aggregator.group_by_date(&in_period);
        for day in &mut days {
            if let Some(note) = notes.get(&day.date) {
                day.note = note.clone();
            }
        }

        let all_days = self.aggregator.group_by_date(&history);
        let stats = self.aggregator.compute_stats(
            &all_days,
            self.store.justification_count(user_id)?,
            today,
        );

        Ok(UserReport {
            username: user.username,
            period,
            total_attendances: in_period.len(),
            days,
            stats,
        })
    }

    // --- justifications ---

    /// Record a recognition failure. Never fails: this is an audit side
    /// trail, so a write error is logged and swallowed.
    pub fn log_failure(
        &self,
        user_id: Option<UserId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<Justification> {
        match self
            .store
            .insert_justification(user_id, reason, self.local_today(now), now)
        {
            Ok(j) => {
                tracing::info!(id = j.id, user_id = ?user_id, "recognition failure logged");
                Some(j)
            }
            Err(e) => {
                tracing::error!(error = %e, user_id = ?user_id, "failed to log recognition failure");
                None
            }
        }
    }

    /// File a justification on behalf of `actor`.
    pub fn create_justification(
        &self,
        actor: UserId,
        reason: &str,
        date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<Justification, ServiceError> {
        self.require_user(actor)?;
        let reason = justification::validate_reason(reason)?;
        let date = date.unwrap_or_else(|| self.local_today(now));
        let j = self
            .store
            .insert_justification(Some(actor), &reason, date, now)?;
        tracing::info!(id = j.id, actor, %date, "justification filed");
        Ok(j)
    }

    /// Justifications visible to `actor`, newest first.
    pub fn list_justifications(
        &self,
        actor: UserId,
    ) -> Result<Vec<JustificationView>, ServiceError> {
        let user = self.require_user(actor)?;
        let filter = if user.is_admin() { None } else { Some(actor) };
        Ok(self.store.justifications(filter)?)
    }

    /// Delete a justification. Owners may delete their own, admins any.
    pub fn delete_justification(
        &self,
        actor: UserId,
        id: JustificationId,
    ) -> Result<(), ServiceError> {
        let user = self.require_user(actor)?;
        let j = self.store.justification(id)?.ok_or(ServiceError::NotFound {
            entity: "justification",
            id,
        })?;
        if !user.is_admin() && j.user_id != Some(actor) {
            return Err(ServiceError::Forbidden("not your justification"));
        }
        self.store.delete_justification(id)?;
        tracing::info!(id, actor, "justification deleted");
        Ok(())
    }

    /// Approve or reject a justification. The latest review replaces any earlier one.
    pub fn review_justification(
        &self,
        id: JustificationId,
        approved: bool,
        reviewer: UserId,
        now: DateTime<Utc>,
    ) -> Result<JustificationApproval, ServiceError> {
        self.require_admin(reviewer)?;
        if self.store.justification(id)?.is_none() {
            return Err(ServiceError::NotFound {
                entity: "justification",
                id,
            });
        }
        if let Some(previous) = self.store.approval(id)? {
            tracing::info!(id, previous = previous.status.as_str(), "replacing earlier review");
        }
        let approval = JustificationApproval {
            justification_id: id,
            status: ApprovalStatus::from_decision(approved),
            reviewer,
            reviewed_at: now,
        };
        self.store.upsert_approval(&approval)?;
        tracing::info!(id, reviewer, status = approval.status.as_str(), "justification reviewed");
        Ok(approval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use punchclock_core::extractor::JsonEmbeddingExtractor;
    use punchclock_core::{DayStatus, Zone};

    fn config() -> Config {
        Config {
            db_path: ":memory:".into(),
            match_threshold: 0.5,
            embedding_dim: 2,
            late_cutoff: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            zone: Zone::default(),
            recent_records: 3,
        }
    }

    fn service() -> AttendanceService {
        AttendanceService::new(Store::in_memory().unwrap(), &config())
    }

    // 2025-07-07 is a Monday.
    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, day, hour, minute, 0).unwrap()
    }

    fn enrolled(svc: &AttendanceService, name: &str, values: [f32; 2]) -> User {
        let user = svc.create_user(name, Role::Employee, at(1, 0, 0)).unwrap();
        svc.enroll(user.id, Embedding::new(values.to_vec())).unwrap()
    }

    fn admin(svc: &AttendanceService) -> User {
        svc.create_user("admin", Role::Admin, at(1, 0, 0)).unwrap()
    }

    #[test]
    fn test_enroll_checks_dimension() {
        let svc = service();
        let user = svc.create_user("ana", Role::Employee, at(1, 0, 0)).unwrap();
        let err = svc
            .enroll(user.id, Embedding::new(vec![0.1, 0.2, 0.3]))
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::EmbeddingDimension {
                expected: 2,
                actual: 3
            }
        ));
        let err = svc.enroll(99, Embedding::new(vec![0.1, 0.2])).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { entity: "user", .. }));
    }

    #[test]
    fn test_mark_attendance_matches_nearest_user() {
        let mut svc = service();
        enrolled(&svc, "ana", [0.0, 0.0]);
        let bia = enrolled(&svc, "bia", [1.0, 1.0]);

        let receipt = svc
            .mark_attendance(
                &Embedding::new(vec![0.9, 1.1]),
                PunchType::Entry,
                at(7, 6, 50),
                "photos/x",
            )
            .unwrap();
        assert_eq!(receipt.username, "bia");
        assert_eq!(receipt.attendance.user_id, bia.id);
        assert_eq!(receipt.attendance.photo_ref, "photos/x");
        assert!(!receipt.attendance.synced);
        assert_eq!(receipt.date, NaiveDate::from_ymd_opt(2025, 7, 7).unwrap());
        assert_eq!(receipt.recent, vec![receipt.attendance.clone()]);
    }

    #[test]
    fn test_no_match_logs_justification_for_nearest_user() {
        let mut svc = service();
        let ana = enrolled(&svc, "ana", [0.0, 0.0]);

        let err = svc
            .mark_attendance(
                &Embedding::new(vec![0.0, 0.5]),
                PunchType::Entry,
                at(7, 8, 0),
                "photos/x",
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoMatch { distance } if distance == 0.5));

        let admin = admin(&svc);
        let logged = svc.list_justifications(admin.id).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].justification.user_id, Some(ana.id));
        assert!(logged[0].justification.reason.contains("0.5"));
        assert!(svc.list_attendance(admin.id).unwrap().is_empty());
    }

    #[test]
    fn test_no_enrolled_users_logs_unattributed_failure() {
        let mut svc = service();
        let err = svc
            .mark_attendance(
                &Embedding::new(vec![0.0, 0.0]),
                PunchType::Entry,
                at(7, 8, 0),
                "",
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoMatch { distance } if distance.is_infinite()));

        let admin = admin(&svc);
        let logged = svc.list_justifications(admin.id).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].justification.user_id, None);
    }

    #[test]
    fn test_dimension_mismatch_is_fatal_and_unlogged() {
        let mut svc = service();
        enrolled(&svc, "ana", [0.0, 0.0]);
        let err = svc
            .mark_attendance(
                &Embedding::new(vec![0.0, 0.0, 0.0]),
                PunchType::Entry,
                at(7, 8, 0),
                "",
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Match(MatchError::DimensionMismatch { .. })));
        let admin = admin(&svc);
        assert!(svc.list_justifications(admin.id).unwrap().is_empty());
    }

    #[test]
    fn test_sequence_errors_are_not_logged() {
        let mut svc = service();
        enrolled(&svc, "ana", [0.0, 0.0]);
        let probe = Embedding::new(vec![0.0, 0.1]);

        let err = svc
            .mark_attendance(&probe, PunchType::Lunch, at(7, 12, 0), "")
            .unwrap_err();
        assert!(matches!(err, ServiceError::Punch(PunchError::OutOfSequence { .. })));

        svc.mark_attendance(&probe, PunchType::Entry, at(7, 8, 0), "")
            .unwrap();
        let err = svc
            .mark_attendance(&probe, PunchType::Entry, at(7, 9, 0), "")
            .unwrap_err();
        assert!(matches!(err, ServiceError::Punch(PunchError::DuplicatePunch { .. })));

        let admin = admin(&svc);
        assert!(svc.list_justifications(admin.id).unwrap().is_empty());
    }

    #[test]
    fn test_receipt_lists_recent_punches() {
        let mut svc = service();
        enrolled(&svc, "ana", [0.0, 0.0]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        svc.mark_attendance(&probe, PunchType::Entry, at(7, 6, 0), "")
            .unwrap();
        svc.mark_attendance(&probe, PunchType::Lunch, at(7, 12, 0), "")
            .unwrap();
        svc.mark_attendance(&probe, PunchType::Exit, at(7, 15, 0), "")
            .unwrap();
        let receipt = svc
            .mark_attendance(&probe, PunchType::Entry, at(8, 6, 0), "")
            .unwrap();
        let kinds: Vec<PunchType> = receipt.recent.iter().map(|a| a.punch_type).collect();
        assert_eq!(kinds, vec![PunchType::Entry, PunchType::Exit, PunchType::Lunch]);
    }

    #[test]
    fn test_from_image_face_not_found_logs_failure() {
        let mut svc = service();
        let err = svc
            .mark_attendance_from_image(&mut JsonEmbeddingExtractor, b"[]", PunchType::Entry, at(7, 8, 0))
            .unwrap_err();
        assert!(matches!(err, ServiceError::FaceNotFound));

        let err = svc
            .mark_attendance_from_image(&mut JsonEmbeddingExtractor, b"nope", PunchType::Entry, at(7, 8, 0))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Extract(_)));

        let admin = admin(&svc);
        let logged = svc.list_justifications(admin.id).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].justification.user_id, None);
    }

    #[test]
    fn test_from_image_uses_content_addressed_photo() {
        let mut svc = service();
        enrolled(&svc, "ana", [0.25, 0.5]);
        let image = b"[0.25, 0.5]";
        let receipt = svc
            .mark_attendance_from_image(&mut JsonEmbeddingExtractor, image, PunchType::Entry, at(7, 8, 0))
            .unwrap();
        assert_eq!(receipt.attendance.photo_ref, photo_ref_for(image));
        assert!(receipt.attendance.photo_ref.starts_with("photos/"));
        assert_eq!(receipt.attendance.photo_ref.len(), "photos/".len() + 64);
    }

    #[test]
    fn test_user_report() {
        let mut svc = service();
        let ana = enrolled(&svc, "ana", [0.0, 0.0]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        // Entry on Monday, lunch and exit on Tuesday.
        svc.mark_attendance(&probe, PunchType::Entry, at(7, 8, 0), "")
            .unwrap();
        svc.mark_attendance(&probe, PunchType::Lunch, at(8, 12, 0), "")
            .unwrap();
        svc.mark_attendance(&probe, PunchType::Exit, at(8, 17, 0), "")
            .unwrap();
        svc.create_justification(ana.id, "bus strike", Some(NaiveDate::from_ymd_opt(2025, 7, 8).unwrap()), at(8, 18, 0))
            .unwrap();

        // Friday of the same week.
        let report = svc.user_report(ana.id, Period::Today, at(11, 12, 0)).unwrap();
        assert_eq!(report.username, "ana");
        assert!(report.days.is_empty());
        assert_eq!(report.total_attendances, 0);

        let report = svc.user_report(ana.id, Period::Week, at(11, 12, 0)).unwrap();
        assert_eq!(report.total_attendances, 3);
        assert_eq!(report.days.len(), 2);
        assert_eq!(report.days[0].date, NaiveDate::from_ymd_opt(2025, 7, 8).unwrap());
        assert_eq!(report.days[0].note, "bus strike");
        assert_eq!(report.days[1].status, DayStatus::Pending);
        assert_eq!(report.days[1].note, "");

        // Stats cover all history: 5 business days expected, and neither
        // day counts as present (the 7th is pending, the 8th has no entry).
        assert_eq!(report.stats.total_absences, 5);
        assert_eq!(report.stats.total_justifications, 1);
        assert_eq!(report.stats.total_hours, 0.0);
    }

    #[test]
    fn test_user_report_hours() {
        let mut svc = service();
        let ana = enrolled(&svc, "ana", [0.0, 0.0]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        svc.mark_attendance(&probe, PunchType::Entry, at(7, 8, 0), "")
            .unwrap();
        svc.mark_attendance(&probe, PunchType::Lunch, at(7, 12, 0), "")
            .unwrap();
        svc.mark_attendance(&probe, PunchType::Exit, at(7, 17, 0), "")
            .unwrap();

        let report = svc.user_report(ana.id, Period::All, at(7, 18, 0)).unwrap();
        assert_eq!(report.days.len(), 1);
        assert_eq!(report.days[0].status, DayStatus::Late);
        // The single lunch punch yields a zero-length break.
        assert_eq!(report.stats.total_hours, 9.0);
        assert_eq!(report.stats.total_late, 1);
        assert_eq!(report.stats.total_absences, 0);
    }

    #[test]
    fn test_justification_permissions() {
        let svc = service();
        let ana = enrolled(&svc, "ana", [0.0, 0.0]);
        let bia = enrolled(&svc, "bia", [1.0, 1.0]);
        let boss = admin(&svc);

        let err = svc
            .create_justification(ana.id, " hi ", None, at(7, 8, 0))
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidReason(_)));

        let j = svc
            .create_justification(ana.id, "  dentist appointment ", None, at(7, 8, 0))
            .unwrap();
        assert_eq!(j.reason, "dentist appointment");
        assert_eq!(j.date, NaiveDate::from_ymd_opt(2025, 7, 7).unwrap());

        assert_eq!(svc.list_justifications(ana.id).unwrap().len(), 1);
        assert!(svc.list_justifications(bia.id).unwrap().is_empty());
        assert_eq!(svc.list_justifications(boss.id).unwrap().len(), 1);

        let err = svc.delete_justification(bia.id, j.id).unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        svc.delete_justification(ana.id, j.id).unwrap();
        let err = svc.delete_justification(boss.id, j.id).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[test]
    fn test_review_upserts_last_decision() {
        let svc = service();
        let ana = enrolled(&svc, "ana", [0.0, 0.0]);
        let boss = admin(&svc);
        let j = svc
            .create_justification(ana.id, "dentist appointment", None, at(7, 8, 0))
            .unwrap();

        let err = svc
            .review_justification(j.id, true, ana.id, at(7, 9, 0))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let first = svc.review_justification(j.id, true, boss.id, at(7, 9, 0)).unwrap();
        assert_eq!(first.status, ApprovalStatus::Approved);
        let second = svc
            .review_justification(j.id, false, boss.id, at(7, 10, 0))
            .unwrap();
        assert_eq!(second.status, ApprovalStatus::Rejected);

        let views = svc.list_justifications(ana.id).unwrap();
        assert_eq!(views[0].status, ApprovalStatus::Rejected);
        assert_eq!(views[0].reviewed_at, Some(at(7, 10, 0)));

        let err = svc
            .review_justification(999, true, boss.id, at(7, 9, 0))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { entity: "justification", .. }));
    }

    #[test]
    fn test_log_failure_is_best_effort() {
        let svc = service();
        // Unknown user violates the foreign key; the failure is swallowed.
        assert!(svc.log_failure(Some(42), "recognition failed", at(7, 8, 0)).is_none());
        assert!(svc.log_failure(None, "recognition failed", at(7, 8, 0)).is_some());
    }

    #[test]
    fn test_delete_user_rules() {
        let mut svc = service();
        let ana = enrolled(&svc, "ana", [0.0, 0.0]);
        let boss = admin(&svc);
        svc.mark_attendance(&Embedding::new(vec![0.0, 0.0]), PunchType::Entry, at(7, 8, 0), "")
            .unwrap();

        assert!(matches!(
            svc.delete_user(ana.id, boss.id).unwrap_err(),
            ServiceError::Forbidden(_)
        ));
        assert!(matches!(
            svc.delete_user(boss.id, boss.id).unwrap_err(),
            ServiceError::Forbidden(_)
        ));
        svc.delete_user(boss.id, ana.id).unwrap();
        assert!(svc.list_attendance(boss.id).unwrap().is_empty());
        assert!(svc.users_with_attendance().unwrap().is_empty());
    }

    #[test]
    fn test_sync_round() {
        let mut svc = service();
        enrolled(&svc, "ana", [0.0, 0.0]);
        let receipt = svc
            .mark_attendance(&Embedding::new(vec![0.0, 0.0]), PunchType::Entry, at(7, 8, 0), "")
            .unwrap();
        assert_eq!(svc.unsynced_attendance().unwrap().len(), 1);
        assert_eq!(svc.mark_synced(&[receipt.attendance.id]).unwrap(), 1);
        assert!(svc.unsynced_attendance().unwrap().is_empty());
    }
}
