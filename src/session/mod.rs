//! Control protocol session: lifecycle state machine and operator activity log

pub mod log;
pub mod machine;

pub use log::{ActivityLog, LogEntry, LogKind};
pub use machine::{Session, SessionEvent, SessionOptions, SessionState, StatusSnapshot};
