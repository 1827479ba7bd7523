//! Wire shape of one run event: the transport envelope around
//! [`weave::Event`].
//!
//! Kept as its own crate, same as `stream-event` in the broader workspace,
//! so `weave-serve` and `weave-cli` share one envelope definition without
//! either depending on the other.

pub mod envelope;
pub mod event;

pub use envelope::Envelope;
pub use event::{Event, EventKind};
