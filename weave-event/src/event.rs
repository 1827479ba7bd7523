//! Re-export of the projected event type, kept in its own crate so the
//! wire envelope ([`crate::envelope`]) can be shared by both `weave` (the
//! runtime) and `weave-serve`/`weave-cli` (the transport) without either
//! depending on the other's internals.

pub use weave::{Event, EventKind};
