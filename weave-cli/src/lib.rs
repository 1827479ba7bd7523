//! Library half of the `weave` CLI binary: the dispatcher HTTP+SSE client.
//! Kept separate from `main.rs` so the client itself is unit-testable
//! without going through `clap` parsing.

pub mod client;
pub mod log_format;
pub mod logging;
pub mod serve;

pub use client::{ClientError, DispatcherClient};
