//! Transport envelope around a projected [`weave::Event`]: adds `run_id`,
//! `seq`, and a server-assigned `emitted_at` timestamp for SSE/storage
//! serialization, without becoming part of the event the state machine
//! projects over.
//!
//! Grounded in `stream-event`'s `Envelope`/`EnvelopeState` (session_id,
//! node_id, event_id) pattern, generalized from a per-message counter state
//! machine to a stateless wrapper — the envelope fields here (`run_id`,
//! `seq`) already live on [`weave::Event`] itself, so there is no separate
//! sequence to track; only `emitted_at` is genuinely added at the wire
//! boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// One event as it appears over the wire: the projected event plus the
/// timestamp the dispatcher assigned it when forwarding to SSE or storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: Event,
    pub emitted_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(event: Event, emitted_at: DateTime<Utc>) -> Self {
        Self { event, emitted_at }
    }

    /// Serializes to the JSON object an SSE `data:` line carries.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use weave::EventKind;

    /// **Scenario**: an envelope serializes with the event's fields flattened
    /// alongside `emitted_at`, and `run_id`/`seq` are not duplicated.
    #[test]
    fn envelope_flattens_event_fields() {
        let event = Event::new("run-1", 1, EventKind::Resumed, BTreeMap::new());
        let envelope = Envelope::new(event, Utc::now());
        let value = envelope.to_json().unwrap();
        assert_eq!(value["run_id"], "run-1");
        assert_eq!(value["seq"], 1);
        assert_eq!(value["type"], "RESUMED");
        assert!(value.get("emitted_at").is_some());
    }
}
