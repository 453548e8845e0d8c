//! punchclock-core: Face-authenticated attendance engine.
//!
//! Matches probe face embeddings against enrolled users, enforces the
//! entry → lunch → exit punch sequence, and aggregates stored punches
//! into per-day entries and period statistics. Performs no I/O: storage
//! plugs in through [`PunchLedger`], embedding extraction through
//! [`EmbeddingExtractor`].

pub mod extractor;
pub mod justification;
pub mod punch;
pub mod report;
pub mod types;
pub mod zone;

pub use extractor::{EmbeddingExtractor, ExtractError};
pub use justification::{ApprovalStatus, Justification, JustificationApproval, JustificationView};
pub use punch::{Attendance, PunchError, PunchLedger, PunchType, Sequencer};
pub use report::{Aggregator, DayEntry, DayStatus, Period, Stats, UserReport};
pub use types::{
    Candidate, Embedding, EuclideanMatcher, MatchError, MatchResult, Matcher, Role, User, UserId,
};
pub use zone::Zone;
