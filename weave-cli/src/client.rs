//! Thin HTTP+SSE client for the weave dispatcher. Grounded in
//! `cli::backend::remote::RemoteBackend` (a client that speaks the server's
//! wire protocol end to end), swapping its WebSocket
//! request/response pairs for plain REST calls plus one SSE stream per
//! `/watch` route. Responses are handed back as [`serde_json::Value`] rather
//! than crate-specific DTOs — a thin client has no business modeling the
//! dispatcher's internal response types, only forwarding them.

use std::collections::BTreeMap;

use futures_util::StreamExt;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to dispatcher failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("dispatcher returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed SSE frame: {0}")]
    Sse(String),
}

/// One parsed frame of a `/watch` SSE stream.
pub type Envelope = Value;

pub struct DispatcherClient {
    http: reqwest::Client,
    base_url: String,
}

impl DispatcherClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn checked(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(ClientError::Status { status, body })
    }

    /// `POST /brains/runs`.
    pub async fn start_run(&self, identifier: &str, options: BTreeMap<String, Value>) -> Result<Value, ClientError> {
        let resp = self
            .http
            .post(self.url("/brains/runs"))
            .json(&serde_json::json!({"identifier": identifier, "options": options}))
            .send()
            .await?;
        Ok(Self::checked(resp).await?.json().await?)
    }

    /// `GET /brains/runs/:runId`.
    pub async fn get_run(&self, run_id: &str) -> Result<Value, ClientError> {
        let resp = self.http.get(self.url(&format!("/brains/runs/{run_id}"))).send().await?;
        Ok(Self::checked(resp).await?.json().await?)
    }

    /// `DELETE /brains/runs/:runId`: idempotent kill.
    pub async fn kill_run(&self, run_id: &str) -> Result<(), ClientError> {
        let resp = self.http.delete(self.url(&format!("/brains/runs/{run_id}"))).send().await?;
        Self::checked(resp).await?;
        Ok(())
    }

    /// `POST /brains/runs/rerun`.
    pub async fn rerun(&self, identifier: &str, run_id: Option<&str>, starts_at: Option<u64>, stops_after: Option<u64>) -> Result<Value, ClientError> {
        let body = serde_json::json!({
            "identifier": identifier,
            "runId": run_id,
            "startsAt": starts_at,
            "stopsAfter": stops_after,
        });
        let resp = self.http.post(self.url("/brains/runs/rerun")).json(&body).send().await?;
        Ok(Self::checked(resp).await?.json().await?)
    }

    /// `GET /brains` (optionally filtered by `?q=`).
    pub async fn list_brains(&self, query: Option<&str>) -> Result<Value, ClientError> {
        let mut req = self.http.get(self.url("/brains"));
        if let Some(q) = query {
            req = req.query(&[("q", q)]);
        }
        Ok(Self::checked(req.send().await?).await?.json().await?)
    }

    /// `GET /brains/:identifier`.
    pub async fn get_brain(&self, identifier: &str) -> Result<Value, ClientError> {
        let resp = self.http.get(self.url(&format!("/brains/{identifier}"))).send().await?;
        Ok(Self::checked(resp).await?.json().await?)
    }

    /// `GET /brains/:identifier/active-runs`.
    pub async fn active_runs(&self, identifier: &str) -> Result<Value, ClientError> {
        let resp = self.http.get(self.url(&format!("/brains/{identifier}/active-runs"))).send().await?;
        Ok(Self::checked(resp).await?.json().await?)
    }

    /// `GET /brains/:identifier/history`.
    pub async fn history(&self, identifier: &str, limit: Option<usize>) -> Result<Value, ClientError> {
        let mut req = self.http.get(self.url(&format!("/brains/{identifier}/history")));
        if let Some(limit) = limit {
            req = req.query(&[("limit", limit)]);
        }
        Ok(Self::checked(req.send().await?).await?.json().await?)
    }

    /// Streams one decoded SSE `data:` frame at a time from `path`, calling
    /// `on_event` for each. The dispatcher never closes a live `/watch`
    /// stream on its own, so `on_event` returns whether to keep reading;
    /// returning `false` drops the connection and returns immediately
    /// (typically once a caller has seen a root-terminal event).
    pub async fn watch(&self, path: &str, mut on_event: impl FnMut(Envelope) -> bool) -> Result<(), ClientError> {
        let resp = Self::checked(self.http.get(self.url(path)).send().await?).await?;
        let mut stream = resp.bytes_stream();
        let mut buf = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buf.find("\n\n") {
                let frame: String = buf.drain(..pos + 2).collect();
                for line in frame.lines() {
                    if let Some(data) = line.strip_prefix("data:") {
                        let value: Value = serde_json::from_str(data.trim()).map_err(|e| ClientError::Sse(e.to_string()))?;
                        if !on_event(value) {
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// A `/watch` event reached one of the three root-terminal tags — the
/// client-side mirror of `EventKind::is_root_terminal`, since the thin
/// client deliberately doesn't depend on `weave` for its wire types.
pub fn is_root_terminal(envelope: &Value) -> bool {
    matches!(envelope.get("type").and_then(Value::as_str), Some("COMPLETE") | Some("ERROR") | Some("CANCELLED"))
}
