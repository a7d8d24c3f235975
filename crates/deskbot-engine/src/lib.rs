//! # DeskBot Engine
//!
//! The lifecycle machinery: reminder scheduling and delivery, stale-message
//! archiving, linked-message updates, and button-press dedup, all wired
//! together by [`dispatch::BotContext`].

pub mod alerts;
pub mod archiver;
pub mod dedup;
pub mod dispatch;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

pub use alerts::{AlertScheduler, AlertWorker};
pub use archiver::ArchiveWorker;
pub use dedup::{DedupGuard, DedupKey};
pub use dispatch::BotContext;
pub use update::{MessageUpdateEngine, UpdateOutcome};
