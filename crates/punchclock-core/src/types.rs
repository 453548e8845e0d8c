use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Database identifier of an enrolled user.
pub type UserId = i64;

/// Default acceptance threshold: a match needs a Euclidean distance strictly below this.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: probe has {probe} values, candidate {user_id} has {candidate}")]
    DimensionMismatch {
        user_id: UserId,
        probe: usize,
        candidate: usize,
    },
}

/// Access level of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Employee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Employee => "employee",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "admin" => Some(Role::Admin),
            "employee" => Some(Role::Employee),
            _ => None,
        }
    }
}

/// Face embedding vector (128-dimensional for the default recognizer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings of equal length.
    ///
    /// Returns `None` when the lengths differ; zipping unequal vectors would
    /// silently ignore the tail of the longer one.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let sum = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>();
        Some(sum.sqrt())
    }
}

/// An enrolled user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    /// Enrolled face, absent until the user has been enrolled.
    pub embedding: Option<Embedding>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// One entry of the gallery scanned by a [`Matcher`].
#[derive(Debug, Clone)]
pub struct Candidate {
    pub user_id: UserId,
    pub embedding: Option<Embedding>,
}

impl From<&User> for Candidate {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            embedding: user.embedding.clone(),
        }
    }
}

/// Result of matching a probe embedding against the candidate set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Whether the best distance fell below the threshold.
    pub matched: bool,
    /// Distance to the nearest candidate, `+inf` when nothing was compared.
    pub distance: f32,
    /// Nearest candidate, reported even when the match was rejected.
    pub best_user: Option<UserId>,
}

impl MatchResult {
    /// The user the punch belongs to, only when the match was accepted.
    pub fn accepted_user(&self) -> Option<UserId> {
        if self.matched {
            self.best_user
        } else {
            None
        }
    }
}

/// Whether `distance` is close enough to accept. The boundary is exclusive.
pub fn is_accepted(distance: f32, threshold: f32) -> bool {
    distance < threshold
}

/// Strategy for comparing a probe embedding against enrolled candidates.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        candidates: &[Candidate],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Linear scan over every candidate with an enrolled embedding. Ties keep
/// the first candidate encountered, so callers control tie-breaks through
/// the order of the slice (the store returns users in id order).
pub struct EuclideanMatcher;

impl EuclideanMatcher {
    /// Find the nearest candidate and its distance without applying a threshold.
    pub fn nearest(
        &self,
        probe: &Embedding,
        candidates: &[Candidate],
    ) -> Result<(Option<UserId>, f32), MatchError> {
        let mut best_distance = f32::INFINITY;
        let mut best_user: Option<UserId> = None;

        for candidate in candidates {
            let Some(embedding) = &candidate.embedding else {
                continue;
            };
            let distance =
                probe
                    .euclidean_distance(embedding)
                    .ok_or(MatchError::DimensionMismatch {
                        user_id: candidate.user_id,
                        probe: probe.len(),
                        candidate: embedding.len(),
                    })?;
            tracing::debug!(user_id = candidate.user_id, distance, "compared candidate");
            // Strict comparison: first-encountered wins on ties.
            if distance < best_distance {
                best_distance = distance;
                best_user = Some(candidate.user_id);
            }
        }

        Ok((best_user, best_distance))
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        candidates: &[Candidate],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        let (best_user, distance) = self.nearest(probe, candidates)?;
        Ok(MatchResult {
            matched: best_user.is_some() && is_accepted(distance, threshold),
            distance,
            best_user,
        })
    }
}
