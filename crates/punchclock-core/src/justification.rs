//! Justifications: audit entries for failed recognitions and user-filed
//! explanations, plus their admin review.

use crate::types::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Database identifier of a justification.
pub type JustificationId = i64;

/// Shortest reason accepted for a manually filed justification.
pub const MIN_REASON_CHARS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Justification {
    pub id: JustificationId,
    /// `None` when the failure could not be attributed to anyone.
    pub user_id: Option<UserId>,
    pub reason: String,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Review state of a justification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn from_decision(approved: bool) -> Self {
        if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

/// The single review decision attached to a justification. Reviewing again
/// overwrites it; no history is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JustificationApproval {
    pub justification_id: JustificationId,
    pub status: ApprovalStatus,
    pub reviewer: UserId,
    pub reviewed_at: DateTime<Utc>,
}

/// A justification joined with its review, as listed to users and admins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JustificationView {
    #[serde(flatten)]
    pub justification: Justification,
    pub username: Option<String>,
    pub status: ApprovalStatus,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl JustificationView {
    pub fn new(
        justification: Justification,
        username: Option<String>,
        approval: Option<JustificationApproval>,
    ) -> Self {
        let (status, reviewed_by, reviewed_at) = match approval {
            Some(a) => (a.status, Some(a.reviewer), Some(a.reviewed_at)),
            None => (ApprovalStatus::Pending, None, None),
        };
        Self {
            justification,
            username,
            status,
            reviewed_by,
            reviewed_at,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("reason must have at least {MIN_REASON_CHARS} characters")]
pub struct ReasonTooShort;

/// Trim a user-supplied reason and check its length.
pub fn validate_reason(reason: &str) -> Result<String, ReasonTooShort> {
    let trimmed = reason.trim();
    if trimmed.chars().count() < MIN_REASON_CHARS {
        return Err(ReasonTooShort);
    }
    Ok(trimmed.to_string())
}

/// Reason recorded when a probe face does not match anyone closely enough.
pub fn no_match_reason(distance: f32) -> String {
    format!("recognition failed: best distance {distance}")
}

/// Reason recorded when no face could be found in the captured image.
pub fn face_not_found_reason() -> String {
    "recognition failed: no face detected".to_string()
}
