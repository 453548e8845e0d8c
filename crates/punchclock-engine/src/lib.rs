//! punchclock-engine: Attendance service and its engine thread.
//!
//! [`AttendanceService`] runs the recognition → sequencing → persistence
//! flow against a [`punchclock_store::Store`]. [`spawn_engine`] moves the
//! service onto a dedicated thread and hands out a cloneable async handle,
//! so every request is processed one at a time.

pub mod config;
pub mod engine;
pub mod service;

pub use config::{Config, ConfigError};
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use service::{AttendanceService, PunchReceipt, ServiceError};
