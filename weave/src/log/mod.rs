//! The Event Log: per-run append-only ordered sequence.
//!
//! One `EventLog` handle is owned exclusively by its Run Actor; watchers only read through `scan`/`subscribe`.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::LogError;
use crate::event::Event;

pub use memory::MemoryEventLog;
pub use sqlite::SqliteEventLog;

/// A live tail subscription: an mpsc receiver plus an explicit unsubscribe
/// handle. Dropping the receiver is equivalent to calling `unsubscribe`.
pub struct Subscription {
    pub receiver: tokio::sync::mpsc::Receiver<Event>,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Atomic; fails if the run is terminal. Assigns and returns the next `seq`.
    async fn append(&self, run_id: &str, kind: crate::event::EventKind, options: std::collections::BTreeMap<String, serde_json::Value>) -> Result<Event, LogError>;

    /// Full historical scan in order, starting from `from_seq` (inclusive).
    async fn scan(&self, run_id: &str, from_seq: u64) -> Result<Vec<Event>, LogError>;

    /// Begins from the next appended event. Calling this directly after an
    /// independent `scan` is not gap-free on its own — use
    /// [`EventLog::scan_and_subscribe`] when both are needed together.
    async fn subscribe(&self, run_id: &str) -> Result<Subscription, LogError>;

    /// Atomic `scan` then `subscribe`: both happen under the same lock
    /// `append` takes, so a caller sees the full history with no event
    /// appended concurrently lost from either the returned vector or the
    /// live tail, and none duplicated across the two.
    async fn scan_and_subscribe(&self, run_id: &str, from_seq: u64) -> Result<(Vec<Event>, Subscription), LogError>;

    /// Marks a run terminal so further `append` calls are rejected. Called
    /// by the generator/actor when a root-terminal event is appended.
    async fn mark_terminal(&self, run_id: &str);

    async fn is_terminal(&self, run_id: &str) -> bool;
}
