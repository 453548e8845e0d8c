//! punchclock-store: SQLite persistence.
//!
//! One database file holds users with their enrolled embeddings, punches,
//! justifications and their reviews. Deleting a user cascades to all of
//! their history.

pub mod rows;
pub mod store;

pub use store::{Store, StoreError};
