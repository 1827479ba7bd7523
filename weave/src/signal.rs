//! The out-of-band mailbox entry type.
//!
//! Grounded in `loom::stream`'s channel-based emitter pattern, generalized
//! from a stream-of-events sender to a multi-producer/single-consumer
//! control-plane mailbox.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::event::WebhookRegistration;

/// Multi-producer, single-consumer mailbox side the executor drains at each
/// suspension point. Producers are
/// `RunActor::kill/pause/send_user_message/resume`.
pub struct SignalMailbox {
    receiver: mpsc::UnboundedReceiver<Signal>,
}

impl SignalMailbox {
    pub fn new(receiver: mpsc::UnboundedReceiver<Signal>) -> Self {
        Self { receiver }
    }

    /// Drains every signal currently queued without blocking, preserving
    /// arrival order.
    pub fn drain(&mut self) -> Vec<Signal> {
        let mut out = Vec::new();
        while let Ok(signal) = self.receiver.try_recv() {
            out.push(signal);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub enum Signal {
    Kill,
    Pause,
    UserMessage { content: String },
    WebhookResponse { slug: String, identifier: String, token: String, response: Value },
}

impl Signal {
    /// Whether this signal matches an outstanding registration by
    /// `(slug, identifier, token)`.
    pub fn matches_registration(&self, reg: &WebhookRegistration) -> bool {
        match self {
            Signal::WebhookResponse { slug, identifier, token, .. } => {
                slug == &reg.slug && identifier == &reg.identifier && token == &reg.token
            }
            _ => false,
        }
    }
}
