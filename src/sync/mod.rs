//! Sync engine: fetch snapshots, select one per session, converge transcripts.

pub mod converge;
pub mod fetch;
pub mod logs;
pub mod runner;
pub mod scheduler;
pub mod selector;

#[cfg(test)]
pub(crate) mod fake;

pub use converge::{ConvergeOutcome, SkipReason, converge};
pub use logs::LogSyncReport;
pub use runner::{RunReport, SyncRunner};
pub use scheduler::{Schedule, run_until_shutdown, spawn_sync_loop};
pub use selector::{RawContextSnapshot, SessionContextSelector};
