//! Best-effort change notifications between peers of the same origin.
//!
//! A [`SyncHub`] is an origin: a set of named channels. Each peer (a browser
//! tab, an SSE connection, a service) opens its own [`SyncBridge`] on a
//! channel. A bridge's broadcasts reach every other bridge on the channel but
//! never itself. Nothing is persisted and nothing is retried.

mod bridge;
mod hub;
mod message;

pub use bridge::{Subscription, SyncBridge};
pub use hub::{DEFAULT_CAPACITY, DEFAULT_CHANNEL, SyncHub};
pub use message::{SyncKind, SyncMessage};
