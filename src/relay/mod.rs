//! Companion relay.
//!
//! The primary keeps the companion's list of lost posts up to date through a
//! paired-device session with two channels: a coalescing application context
//! carrying the whole post list and best-effort direct messages for single
//! posts. The companion asks for a refresh whenever the primary comes back.

mod broadcaster;
mod http;
pub mod memory;
mod receiver;
mod transport;

pub use broadcaster::*;
pub use http::*;
pub use memory::{EventStream, MemoryTransport};
pub use receiver::*;
pub use transport::*;
