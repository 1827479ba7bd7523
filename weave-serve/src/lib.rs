//! HTTP+SSE dispatcher for the weave runtime: maps the
//! wire contract's REST+SSE surface onto [`weave::RunActor`] operations.
//!
//! Grounded in `serve::app`'s router/extractor style (axum), swapping its
//! single WebSocket upgrade handler for REST handlers plus one SSE handler
//! per `GET /watch` route (`axum::response::sse::Sse`).

mod app;
mod error;
mod handlers;
mod sse;
mod state;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

pub use state::AppState;
use weave::{BrainRegistry, LlmClient, MemoryEventLog, SqliteEventLog};

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Where the dispatcher's shared [`weave::EventLog`] persists to: either an
/// in-process `MemoryEventLog`, or a `SqliteEventLog` backed by a file on
/// disk.
pub enum StorageBackend {
    Memory,
    Sqlite(String),
}

/// Builds the dispatcher's [`AppState`] from a brain registry, an LLM
/// client, and a storage backend choice.
pub fn build_state(registry: BrainRegistry, llm: Arc<dyn LlmClient>, backend: StorageBackend) -> Result<Arc<AppState>, Box<dyn std::error::Error + Send + Sync>> {
    let log: Arc<dyn weave::EventLog> = match backend {
        StorageBackend::Memory => Arc::new(MemoryEventLog::new()),
        StorageBackend::Sqlite(path) => Arc::new(SqliteEventLog::open(&path)?),
    };
    Ok(AppState::new(registry, llm, log))
}

/// Serves the dispatcher on an already-bound listener; used directly by
/// tests (bind to `127.0.0.1:0` to get an ephemeral port).
pub async fn serve_on_listener(listener: TcpListener, state: Arc<AppState>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("weave dispatcher listening on http://{addr}");
    let app = app::router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Serves the dispatcher on `addr` (default `127.0.0.1:8080`).
pub async fn serve(addr: Option<&str>, state: Arc<AppState>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_ADDR);
    let listener = TcpListener::bind(addr).await?;
    serve_on_listener(listener, state).await
}
