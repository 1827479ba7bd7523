//! Durable sqlite-backed event log.
//!
//! Grounded in `loom-workspace::Store` (the `Arc<Mutex<rusqlite::Connection>>`
//! + `tokio::task::block_in_place` shape for running blocking rusqlite calls
//! off the async runtime) and `loom::memory::sqlite_saver::SqliteSaver`'s
//! schema style (a single DDL executed at construction, composite primary
//! key keeping a run's events ordered). The connection and the live fan-out
//! table share one lock so `scan_and_subscribe` can flush history and attach
//! a subscriber as a single atomic step, matching `append`'s own critical
//! section.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{EventLog, Subscription};
use crate::error::LogError;
use crate::event::{Event, EventKind};

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// Live fan-out is process-local and does not survive a restart; after a
/// crash, watchers reattach via `scan_and_subscribe` and see the persisted
/// history plus new live events, gap-free and duplicate-free.
struct SqliteInner {
    conn: Connection,
    subscribers: HashMap<String, Vec<mpsc::Sender<Event>>>,
}

pub struct SqliteEventLog {
    inner: Arc<Mutex<SqliteInner>>,
}

impl SqliteEventLog {
    pub fn open(db_path: &str) -> Result<Self, LogError> {
        let conn = Connection::open(db_path).map_err(|e| LogError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                type TEXT NOT NULL,
                payload TEXT NOT NULL,
                options TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            );
            CREATE TABLE IF NOT EXISTS run_terminal (
                run_id TEXT PRIMARY KEY,
                terminal INTEGER NOT NULL
            );",
        )
        .map_err(|e| LogError::Storage(e.to_string()))?;
        Ok(Self { inner: Arc::new(Mutex::new(SqliteInner { conn, subscribers: HashMap::new() })) })
    }

    pub fn in_memory() -> Result<Self, LogError> {
        Self::open(":memory:")
    }
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn append(&self, run_id: &str, kind: EventKind, options: std::collections::BTreeMap<String, serde_json::Value>) -> Result<Event, LogError> {
        let inner = Arc::clone(&self.inner);
        let run_id_owned = run_id.to_string();
        let root_terminal = kind.is_root_terminal();
        let tag = kind.tag().to_string();
        let payload = serde_json::to_string(&kind).map_err(|e| LogError::Serialization(e.to_string()))?;
        let options_json = serde_json::to_string(&options).map_err(|e| LogError::Serialization(e.to_string()))?;

        tokio::task::block_in_place(move || -> Result<Event, LogError> {
            let mut guard = inner.lock().unwrap();
            let already_terminal: bool = guard
                .conn
                .query_row("SELECT terminal FROM run_terminal WHERE run_id = ?1", params![run_id_owned], |row| row.get::<_, i64>(0))
                .map(|v| v != 0)
                .unwrap_or(false);
            if already_terminal {
                return Err(LogError::Terminal(run_id_owned.clone()));
            }
            let next_seq: i64 = guard
                .conn
                .query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM events WHERE run_id = ?1", params![run_id_owned], |row| row.get(0))
                .map_err(|e| LogError::Storage(e.to_string()))?;
            guard
                .conn
                .execute(
                    "INSERT INTO events (run_id, seq, type, payload, options) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![run_id_owned, next_seq, tag, payload, options_json],
                )
                .map_err(|e| LogError::Storage(e.to_string()))?;
            if root_terminal {
                guard
                    .conn
                    .execute(
                        "INSERT INTO run_terminal (run_id, terminal) VALUES (?1, 1)
                         ON CONFLICT(run_id) DO UPDATE SET terminal = 1",
                        params![run_id_owned],
                    )
                    .map_err(|e| LogError::Storage(e.to_string()))?;
            }
            let event = Event::new(run_id_owned.clone(), next_seq as u64, kind, options);
            if let Some(subs) = guard.subscribers.get_mut(&run_id_owned) {
                subs.retain(|tx| !matches!(tx.try_send(event.clone()), Err(mpsc::error::TrySendError::Full(_)) | Err(mpsc::error::TrySendError::Closed(_))));
            }
            Ok(event)
        })
    }

    async fn scan(&self, run_id: &str, from_seq: u64) -> Result<Vec<Event>, LogError> {
        let inner = Arc::clone(&self.inner);
        let run_id_owned = run_id.to_string();
        tokio::task::block_in_place(move || {
            let guard = inner.lock().unwrap();
            scan_locked(&guard.conn, &run_id_owned, from_seq)
        })
    }

    async fn subscribe(&self, run_id: &str) -> Result<Subscription, LogError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let mut guard = self.inner.lock().unwrap();
        guard.subscribers.entry(run_id.to_string()).or_default().push(tx);
        Ok(Subscription { receiver: rx })
    }

    async fn scan_and_subscribe(&self, run_id: &str, from_seq: u64) -> Result<(Vec<Event>, Subscription), LogError> {
        let inner = Arc::clone(&self.inner);
        let run_id_owned = run_id.to_string();
        tokio::task::block_in_place(move || {
            let mut guard = inner.lock().unwrap();
            let historical = scan_locked(&guard.conn, &run_id_owned, from_seq)?;
            let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
            guard.subscribers.entry(run_id_owned).or_default().push(tx);
            Ok((historical, Subscription { receiver: rx }))
        })
    }

    async fn mark_terminal(&self, run_id: &str) {
        let inner = Arc::clone(&self.inner);
        let run_id_owned = run_id.to_string();
        tokio::task::block_in_place(move || {
            let guard = inner.lock().unwrap();
            let _ = guard.conn.execute(
                "INSERT INTO run_terminal (run_id, terminal) VALUES (?1, 1)
                 ON CONFLICT(run_id) DO UPDATE SET terminal = 1",
                params![run_id_owned],
            );
        });
    }

    async fn is_terminal(&self, run_id: &str) -> bool {
        let inner = Arc::clone(&self.inner);
        let run_id_owned = run_id.to_string();
        tokio::task::block_in_place(move || {
            let guard = inner.lock().unwrap();
            guard
                .conn
                .query_row("SELECT terminal FROM run_terminal WHERE run_id = ?1", params![run_id_owned], |row| row.get::<_, i64>(0))
                .map(|v| v != 0)
                .unwrap_or(false)
        })
    }
}

/// Shared by `scan` and `scan_and_subscribe`, both of which already hold
/// `inner`'s lock.
fn scan_locked(conn: &Connection, run_id: &str, from_seq: u64) -> Result<Vec<Event>, LogError> {
    let mut count_stmt = conn.prepare("SELECT COUNT(*) FROM events WHERE run_id = ?1").map_err(|e| LogError::Storage(e.to_string()))?;
    let count: i64 = count_stmt.query_row(params![run_id], |row| row.get(0)).map_err(|e| LogError::Storage(e.to_string()))?;
    if count == 0 {
        return Err(LogError::NotFound(run_id.to_string()));
    }
    let mut stmt = conn
        .prepare("SELECT seq, type, payload, options FROM events WHERE run_id = ?1 AND seq >= ?2 ORDER BY seq ASC")
        .map_err(|e| LogError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(params![run_id, from_seq as i64], |row| {
            let seq: i64 = row.get(0)?;
            let payload: String = row.get(2)?;
            let options: String = row.get(3)?;
            Ok((seq, payload, options))
        })
        .map_err(|e| LogError::Storage(e.to_string()))?;
    let mut events = Vec::new();
    for row in rows {
        let (seq, payload, options) = row.map_err(|e| LogError::Storage(e.to_string()))?;
        let kind: EventKind = serde_json::from_str(&payload).map_err(|e| LogError::Serialization(e.to_string()))?;
        let options: std::collections::BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&options).map_err(|e| LogError::Serialization(e.to_string()))?;
        events.push(Event::new(run_id.to_string(), seq as u64, kind, options));
    }
    Ok(events)
}
