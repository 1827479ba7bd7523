//! In-memory event log backend, used by tests and the `demos` crate.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::{EventLog, Subscription};
use crate::error::LogError;
use crate::event::{Event, EventKind};

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

struct RunLog {
    events: Vec<Event>,
    next_seq: u64,
    terminal: bool,
    subscribers: Vec<mpsc::Sender<Event>>,
}

impl RunLog {
    fn new() -> Self {
        Self { events: Vec::new(), next_seq: 1, terminal: false, subscribers: Vec::new() }
    }
}

/// Single `Arc<Mutex<...>>`-guarded map, matching `loom-workspace::Store`'s
/// shape but without the blocking-IO concern an in-memory backend doesn't
/// have (no `block_in_place` needed: every operation here is non-blocking).
#[derive(Default)]
pub struct MemoryEventLog {
    runs: Mutex<HashMap<String, RunLog>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self { runs: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, run_id: &str, kind: EventKind, options: BTreeMap<String, serde_json::Value>) -> Result<Event, LogError> {
        let mut guard = self.runs.lock().unwrap();
        let run = guard.entry(run_id.to_string()).or_insert_with(RunLog::new);
        if run.terminal {
            return Err(LogError::Terminal(run_id.to_string()));
        }
        let seq = run.next_seq;
        run.next_seq += 1;
        let root_terminal = kind.is_root_terminal();
        let event = Event::new(run_id, seq, kind, options);
        run.events.push(event.clone());
        if root_terminal {
            run.terminal = true;
        }
        run.subscribers.retain(|tx| {
            // Bounded channel, drop-on-backpressure: a full/closed subscriber
            // is dropped rather than blocking the append path.
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => false,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        Ok(event)
    }

    async fn scan(&self, run_id: &str, from_seq: u64) -> Result<Vec<Event>, LogError> {
        let guard = self.runs.lock().unwrap();
        let run = guard.get(run_id).ok_or_else(|| LogError::NotFound(run_id.to_string()))?;
        Ok(run.events.iter().filter(|e| e.seq >= from_seq).cloned().collect())
    }

    async fn subscribe(&self, run_id: &str) -> Result<Subscription, LogError> {
        let mut guard = self.runs.lock().unwrap();
        let run = guard.entry(run_id.to_string()).or_insert_with(RunLog::new);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        run.subscribers.push(tx);
        Ok(Subscription { receiver: rx })
    }

    async fn scan_and_subscribe(&self, run_id: &str, from_seq: u64) -> Result<(Vec<Event>, Subscription), LogError> {
        let mut guard = self.runs.lock().unwrap();
        let run = guard.get_mut(run_id).ok_or_else(|| LogError::NotFound(run_id.to_string()))?;
        let historical = run.events.iter().filter(|e| e.seq >= from_seq).cloned().collect();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        run.subscribers.push(tx);
        Ok((historical, Subscription { receiver: rx }))
    }

    async fn mark_terminal(&self, run_id: &str) {
        let mut guard = self.runs.lock().unwrap();
        if let Some(run) = guard.get_mut(run_id) {
            run.terminal = true;
        }
    }

    async fn is_terminal(&self, run_id: &str) -> bool {
        let guard = self.runs.lock().unwrap();
        guard.get(run_id).map(|r| r.terminal).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: appending after a COMPLETE event is rejected as terminal.
    #[tokio::test]
    async fn append_after_terminal_rejected() {
        let log = MemoryEventLog::new();
        log.append("r1", EventKind::Start { options: serde_json::Value::Null, title: "T".into(), parent_step_id: None }, BTreeMap::new()).await.unwrap();
        log.append("r1", EventKind::Complete { state: serde_json::Value::Null }, BTreeMap::new()).await.unwrap();
        let res = log.append("r1", EventKind::Resumed, BTreeMap::new()).await;
        assert!(matches!(res, Err(LogError::Terminal(_))));
    }

    /// **Scenario**: seq numbers are strictly monotonic per run.
    #[tokio::test]
    async fn seq_is_monotonic() {
        let log = MemoryEventLog::new();
        let e1 = log.append("r1", EventKind::Start { options: serde_json::Value::Null, title: "T".into(), parent_step_id: None }, BTreeMap::new()).await.unwrap();
        let e2 = log.append("r1", EventKind::Resumed, BTreeMap::new()).await.unwrap();
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
    }

    /// **Scenario**: scanning an unknown run is a NotFound error, not an empty vec.
    #[tokio::test]
    async fn scan_unknown_run_not_found() {
        let log = MemoryEventLog::new();
        let res = log.scan("ghost", 0).await;
        assert!(matches!(res, Err(LogError::NotFound(_))));
    }
}
