use crate::config::Config;
use crate::service::{AttendanceService, PunchReceipt, ServiceError};
use chrono::{NaiveDate, Utc};
use punchclock_core::justification::{JustificationId, JustificationView};
use punchclock_core::punch::AttendanceId;
use punchclock_core::report::UserReport;
use punchclock_core::{
    Attendance, Embedding, EmbeddingExtractor, Justification, JustificationApproval, Period,
    PunchType, Role, User, UserId,
};
use punchclock_store::{Store, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("cannot open attendance store: {0}")]
    Store(#[from] StoreError),
    #[error("cannot spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    CreateUser {
        username: String,
        role: Role,
        reply: Reply<User>,
    },
    Enroll {
        user_id: UserId,
        embedding: Embedding,
        reply: Reply<User>,
    },
    DeleteUser {
        actor: UserId,
        user_id: UserId,
        reply: Reply<()>,
    },
    Users {
        with_attendance: bool,
        reply: Reply<Vec<User>>,
    },
    Punch {
        punch: PunchType,
        image: Vec<u8>,
        reply: Reply<PunchReceipt>,
    },
    ListAttendance {
        actor: UserId,
        reply: Reply<Vec<Attendance>>,
    },
    Unsynced {
        reply: Reply<Vec<Attendance>>,
    },
    MarkSynced {
        ids: Vec<AttendanceId>,
        reply: Reply<usize>,
    },
    Report {
        user_id: UserId,
        period: Period,
        reply: Reply<UserReport>,
    },
    Justify {
        actor: UserId,
        reason: String,
        date: Option<NaiveDate>,
        reply: Reply<Justification>,
    },
    ListJustifications {
        actor: UserId,
        reply: Reply<Vec<JustificationView>>,
    },
    DeleteJustification {
        actor: UserId,
        id: JustificationId,
        reply: Reply<()>,
    },
    Review {
        id: JustificationId,
        approved: bool,
        reviewer: UserId,
        reply: Reply<JustificationApproval>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    pub async fn create_user(&self, username: &str, role: Role) -> Result<User, EngineError> {
        let username = username.to_string();
        self.request(|reply| EngineRequest::CreateUser {
            username,
            role,
            reply,
        })
        .await
    }

    pub async fn enroll(&self, user_id: UserId, embedding: Embedding) -> Result<User, EngineError> {
        self.request(|reply| EngineRequest::Enroll {
            user_id,
            embedding,
            reply,
        })
        .await
    }

    pub async fn delete_user(&self, actor: UserId, user_id: UserId) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::DeleteUser {
            actor,
            user_id,
            reply,
        })
        .await
    }

    /// All users, or only those with at least one punch.
    pub async fn users(&self, with_attendance: bool) -> Result<Vec<User>, EngineError> {
        self.request(|reply| EngineRequest::Users {
            with_attendance,
            reply,
        })
        .await
    }

    /// Recognize the face in `image` and record `punch` for it, stamped
    /// with the engine's clock.
    pub async fn punch(&self, punch: PunchType, image: Vec<u8>) -> Result<PunchReceipt, EngineError> {
        self.request(|reply| EngineRequest::Punch {
            punch,
            image,
            reply,
        })
        .await
    }

    pub async fn list_attendance(&self, actor: UserId) -> Result<Vec<Attendance>, EngineError> {
        self.request(|reply| EngineRequest::ListAttendance { actor, reply })
            .await
    }

    pub async fn unsynced(&self) -> Result<Vec<Attendance>, EngineError> {
        self.request(|reply| EngineRequest::Unsynced { reply }).await
    }

    pub async fn mark_synced(&self, ids: Vec<AttendanceId>) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::MarkSynced { ids, reply })
            .await
    }

    pub async fn report(&self, user_id: UserId, period: Period) -> Result<UserReport, EngineError> {
        self.request(|reply| EngineRequest::Report {
            user_id,
            period,
            reply,
        })
        .await
    }

    pub async fn justify(
        &self,
        actor: UserId,
        reason: &str,
        date: Option<NaiveDate>,
    ) -> Result<Justification, EngineError> {
        let reason = reason.to_string();
        self.request(|reply| EngineRequest::Justify {
            actor,
            reason,
            date,
            reply,
        })
        .await
    }

    pub async fn list_justifications(
        &self,
        actor: UserId,
    ) -> Result<Vec<JustificationView>, EngineError> {
        self.request(|reply| EngineRequest::ListJustifications { actor, reply })
            .await
    }

    pub async fn delete_justification(
        &self,
        actor: UserId,
        id: JustificationId,
    ) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::DeleteJustification { actor, id, reply })
            .await
    }

    pub async fn review(
        &self,
        id: JustificationId,
        approved: bool,
        reviewer: UserId,
    ) -> Result<JustificationApproval, EngineError> {
        self.request(|reply| EngineRequest::Review {
            id,
            approved,
            reviewer,
            reply,
        })
        .await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the database synchronously so a bad path fails at startup, then
/// serves requests one at a time. The thread exits once every handle is
/// dropped.
pub fn spawn_engine(
    config: &Config,
    mut extractor: Box<dyn EmbeddingExtractor + Send>,
) -> Result<EngineHandle, EngineError> {
    let store = Store::open(&config.db_path)?;
    let mut service = AttendanceService::new(store, config);
    tracing::info!(
        threshold = config.match_threshold,
        embedding_dim = config.embedding_dim,
        zone = %config.zone,
        "attendance service ready"
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("punchclock-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                dispatch(&mut service, extractor.as_mut(), req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn dispatch(
    service: &mut AttendanceService,
    extractor: &mut dyn EmbeddingExtractor,
    req: EngineRequest,
) {
    let now = Utc::now();
    // A dropped receiver means the caller gave up; nothing to report.
    match req {
        EngineRequest::CreateUser {
            username,
            role,
            reply,
        } => {
            let _ = reply.send(service.create_user(&username, role, now));
        }
        EngineRequest::Enroll {
            user_id,
            embedding,
            reply,
        } => {
            let _ = reply.send(service.enroll(user_id, embedding));
        }
        EngineRequest::DeleteUser {
            actor,
            user_id,
            reply,
        } => {
            let _ = reply.send(service.delete_user(actor, user_id));
        }
        EngineRequest::Users {
            with_attendance,
            reply,
        } => {
            let result = if with_attendance {
                service.users_with_attendance()
            } else {
                service.users()
            };
            let _ = reply.send(result);
        }
        EngineRequest::Punch {
            punch,
            image,
            reply,
        } => {
            let result = service.mark_attendance_from_image(extractor, &image, punch, now);
            if let Err(e) = &result {
                tracing::warn!(%punch, error = %e, "punch refused");
            }
            let _ = reply.send(result);
        }
        EngineRequest::ListAttendance { actor, reply } => {
            let _ = reply.send(service.list_attendance(actor));
        }
        EngineRequest::Unsynced { reply } => {
            let _ = reply.send(service.unsynced_attendance());
        }
        EngineRequest::MarkSynced { ids, reply } => {
            let _ = reply.send(service.mark_synced(&ids));
        }
        EngineRequest::Report {
            user_id,
            period,
            reply,
        } => {
            let _ = reply.send(service.user_report(user_id, period, now));
        }
        EngineRequest::Justify {
            actor,
            reason,
            date,
            reply,
        } => {
            let _ = reply.send(service.create_justification(actor, &reason, date, now));
        }
        EngineRequest::ListJustifications { actor, reply } => {
            let _ = reply.send(service.list_justifications(actor));
        }
        EngineRequest::DeleteJustification { actor, id, reply } => {
            let _ = reply.send(service.delete_justification(actor, id));
        }
        EngineRequest::Review {
            id,
            approved,
            reviewer,
            reply,
        } => {
            let _ = reply.send(service.review_justification(id, approved, reviewer, now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use punchclock_core::extractor::JsonEmbeddingExtractor;
    use punchclock_core::{ApprovalStatus, PunchError, Zone};

    fn config() -> Config {
        Config {
            db_path: ":memory:".into(),
            match_threshold: 0.5,
            embedding_dim: 3,
            late_cutoff: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            zone: Zone::default(),
            recent_records: 3,
        }
    }

    fn engine() -> EngineHandle {
        spawn_engine(&config(), Box::new(JsonEmbeddingExtractor)).unwrap()
    }

    #[tokio::test]
    async fn test_enroll_then_punch() {
        let handle = engine();
        let ana = handle.create_user("ana", Role::Employee).await.unwrap();
        handle
            .enroll(ana.id, Embedding::new(vec![0.1, 0.2, 0.3]))
            .await
            .unwrap();

        let receipt = handle
            .punch(PunchType::Entry, b"[0.1, 0.2, 0.35]".to_vec())
            .await
            .unwrap();
        assert_eq!(receipt.username, "ana");
        assert_eq!(receipt.attendance.punch_type, PunchType::Entry);
        assert!(receipt.attendance.photo_ref.starts_with("photos/"));

        let err = handle
            .punch(PunchType::Entry, b"[0.1, 0.2, 0.3]".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Service(ServiceError::Punch(PunchError::DuplicatePunch { .. }))
        ));

        assert_eq!(handle.unsynced().await.unwrap().len(), 1);
        assert_eq!(handle.users(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_face_is_logged() {
        let handle = engine();
        let ana = handle.create_user("ana", Role::Employee).await.unwrap();
        let admin = handle.create_user("root", Role::Admin).await.unwrap();
        handle
            .enroll(ana.id, Embedding::new(vec![0.0, 0.0, 0.0]))
            .await
            .unwrap();

        let err = handle
            .punch(PunchType::Entry, b"[1.0, 1.0, 1.0]".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Service(ServiceError::NoMatch { .. })));

        let logged = handle.list_justifications(admin.id).await.unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].username.as_deref(), Some("ana"));

        let approval = handle.review(logged[0].justification.id, true, admin.id).await.unwrap();
        assert_eq!(approval.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_handles_share_one_engine() {
        let handle = engine();
        let other = handle.clone();
        let user = other.create_user("ana", Role::Employee).await.unwrap();
        let report = handle.report(user.id, Period::Month).await.unwrap();
        assert_eq!(report.username, "ana");
        assert!(report.days.is_empty());
    }

    #[test]
    fn test_spawn_fails_on_unopenable_store() {
        let mut config = config();
        config.db_path = "/proc/punchclock/attendance.db".into();
        let err = spawn_engine(&config, Box::new(JsonEmbeddingExtractor)).err();
        assert!(matches!(err, Some(EngineError::Store(_))));
    }
}
