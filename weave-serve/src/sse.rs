//! SSE framing: each event is wrapped in
//! the transport [`weave_event::Envelope`] and written as one `data:` line
//! carrying its full JSON.

use axum::response::sse::Event as SseEvent;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use weave_event::Envelope;

/// Converts a raw [`weave::Event`] receiver into an SSE-ready stream,
/// stamping each event with a server-assigned `emitted_at` on the way out.
pub fn envelope_stream(rx: mpsc::Receiver<weave::Event>) -> impl Stream<Item = Result<SseEvent, std::convert::Infallible>> {
    ReceiverStream::new(rx).map(|event| {
        let envelope = Envelope::new(event, chrono::Utc::now());
        let json = envelope.to_json().unwrap_or(serde_json::Value::Null);
        Ok(SseEvent::default().data(json.to_string()))
    })
}
