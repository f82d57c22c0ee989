//! [`SyncHub`]: the registry of named channels for one origin.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError, Weak},
};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::SyncBridge;

pub const DEFAULT_CHANNEL: &str = "medblock-sync";

/// Per-channel buffer size, shared by every receiver on the channel. Slower receivers skip ahead.
pub const DEFAULT_CAPACITY: usize = 64;

/// A message in flight between bridges, tagged with the sending bridge.
/// The payload is JSON text, so every receiver decodes its own copy.
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
  pub origin:  Uuid,
  pub payload: Arc<str>,
}

/// One named channel. Lives exactly as long as some bridge holds it.
pub(crate) struct Channel {
  pub name: String,
  pub tx:   broadcast::Sender<Envelope>,
}

struct HubInner {
  capacity: usize,
  channels: Mutex<HashMap<String, Weak<Channel>>>,
}

/// An origin: bridges opened on the same hub and channel name see each
/// other's broadcasts.
///
/// Cloning is cheap; clones share the same channels.
#[derive(Clone)]
pub struct SyncHub {
  inner: Arc<HubInner>,
}

impl Default for SyncHub {
  fn default() -> Self { Self::new() }
}

impl SyncHub {
  pub fn new() -> Self { Self::with_capacity(DEFAULT_CAPACITY) }

  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      inner: Arc::new(HubInner {
        capacity: capacity.max(1),
        channels: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// Open a new bridge on channel `name`.
  ///
  /// Must be called within a Tokio runtime: the bridge spawns its receive
  /// task immediately.
  pub fn open(&self, name: &str) -> SyncBridge {
    SyncBridge::attach(self.channel(name))
  }

  /// Whether any bridge currently holds channel `name`.
  pub fn is_open(&self, name: &str) -> bool {
    self
      .inner
      .channels
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(name)
      .is_some_and(|ch| ch.strong_count() > 0)
  }

  /// The live channel called `name`, or a fresh one if every previous holder
  /// has closed. A fresh channel carries nothing from its predecessor.
  fn channel(&self, name: &str) -> Arc<Channel> {
    let mut channels = self
      .inner
      .channels
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    channels.retain(|_, ch| ch.strong_count() > 0);

    if let Some(channel) = channels.get(name).and_then(Weak::upgrade) {
      return channel;
    }
    let (tx, _) = broadcast::channel(self.inner.capacity);
    let channel = Arc::new(Channel { name: name.to_owned(), tx });
    channels.insert(name.to_owned(), Arc::downgrade(&channel));
    channel
  }
}
