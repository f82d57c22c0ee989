//! [`SyncBridge`]: one peer's connection to a named channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio::sync::{
  broadcast::{self, error::RecvError},
  watch,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
  SyncMessage,
  hub::{Channel, Envelope},
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

/// A peer on a sync channel.
///
/// Messages sent with [`broadcast`](Self::broadcast) go to every other bridge
/// on the channel. A background task keeps the most recent inbound message as
/// [`latest`](Self::latest); each [`Subscription`] reads the channel itself.
///
/// Dropping the bridge closes it.
pub struct SyncBridge {
  id:       Uuid,
  name:     String,
  /// `None` once closed.
  channel:  Mutex<Option<Arc<Channel>>>,
  latest:   Arc<Mutex<Option<SyncMessage>>>,
  shutdown: watch::Sender<bool>,
}

impl SyncBridge {
  pub(crate) fn attach(channel: Arc<Channel>) -> Self {
    let id = Uuid::new_v4();
    let (shutdown, _) = watch::channel(false);
    let latest = Arc::new(Mutex::new(None));

    tokio::spawn(track_latest(Tracker {
      id,
      name: channel.name.clone(),
      inbound: channel.tx.subscribe(),
      latest: latest.clone(),
      shutdown: shutdown.subscribe(),
    }));
    debug!(channel = %channel.name, bridge = %id, "sync bridge opened");

    Self {
      id,
      name: channel.name.clone(),
      channel: Mutex::new(Some(channel)),
      latest,
      shutdown,
    }
  }

  pub fn id(&self) -> Uuid { self.id }

  pub fn is_closed(&self) -> bool { lock(&self.channel).is_none() }

  /// Post `message` to every other bridge on the channel. Never blocks and
  /// never fails: with no listeners, or after [`close`](Self::close), the
  /// message is silently dropped.
  pub fn broadcast(&self, message: &SyncMessage) {
    let Some(channel) = lock(&self.channel).clone() else {
      debug!(channel = %self.name, "broadcast on closed sync bridge ignored");
      return;
    };
    let payload = match message.encode() {
      Ok(payload) => payload,
      Err(e) => {
        warn!(channel = %self.name, error = %e, "sync message not encodable; dropped");
        return;
      }
    };
    let receivers = channel
      .tx
      .send(Envelope { origin: self.id, payload: payload.into() })
      .unwrap_or(0);
    debug!(
      channel = %self.name,
      kind = ?message.kind,
      table = %message.table,
      receivers,
      "sync message broadcast"
    );
  }

  /// A new stream of messages from other bridges, starting with the first
  /// message broadcast after this call. Use [`latest`](Self::latest) for the
  /// last one before it.
  pub fn subscribe(&self) -> Subscription {
    Subscription {
      origin:   self.id,
      rx:       lock(&self.channel).as_ref().map(|ch| ch.tx.subscribe()),
      shutdown: self.shutdown.subscribe(),
    }
  }

  /// The most recent message received from another bridge.
  pub fn latest(&self) -> Option<SyncMessage> { lock(&self.latest).clone() }

  /// Leave the channel. Idempotent. Subscriptions end, and if this was the
  /// last bridge on the channel the channel itself is released.
  pub fn close(&self) {
    if lock(&self.channel).take().is_none() {
      return;
    }
    self.shutdown.send_replace(true);
    debug!(channel = %self.name, bridge = %self.id, "sync bridge closed");
  }
}

impl Drop for SyncBridge {
  fn drop(&mut self) { self.close(); }
}

impl std::fmt::Debug for SyncBridge {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SyncBridge")
      .field("id", &self.id)
      .field("channel", &self.name)
      .field("closed", &self.is_closed())
      .finish()
  }
}

// ─── Latest-message task ─────────────────────────────────────────────────────

struct Tracker {
  id:       Uuid,
  name:     String,
  inbound:  broadcast::Receiver<Envelope>,
  latest:   Arc<Mutex<Option<SyncMessage>>>,
  shutdown: watch::Receiver<bool>,
}

async fn track_latest(mut t: Tracker) {
  loop {
    let envelope = tokio::select! {
      biased;
      _ = t.shutdown.changed() => break,
      received = t.inbound.recv() => match received {
        Ok(envelope) => envelope,
        Err(RecvError::Lagged(skipped)) => {
          warn!(channel = %t.name, skipped, "sync bridge fell behind; messages lost");
          continue;
        }
        Err(RecvError::Closed) => break,
      },
    };

    if envelope.origin == t.id {
      continue;
    }
    match SyncMessage::decode(&envelope.payload) {
      Ok(message) => *lock(&t.latest) = Some(message),
      Err(e) => warn!(channel = %t.name, error = %e, "malformed sync message dropped"),
    }
  }
  debug!(channel = %t.name, bridge = %t.id, "sync receive task stopped");
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// A local listener on a [`SyncBridge`].
pub struct Subscription {
  /// The owning bridge; its own broadcasts are skipped.
  origin:   Uuid,
  /// `None` when subscribed on an already-closed bridge.
  rx:       Option<broadcast::Receiver<Envelope>>,
  shutdown: watch::Receiver<bool>,
}

impl Subscription {
  /// The next message, or `None` once the bridge is closed.
  pub async fn recv(&mut self) -> Option<SyncMessage> {
    let rx = self.rx.as_mut()?;
    loop {
      if *self.shutdown.borrow() {
        return None;
      }
      let envelope = tokio::select! {
        biased;
        // The only value ever sent is `true`.
        _ = self.shutdown.changed() => return None,
        received = rx.recv() => match received {
          Ok(envelope) => envelope,
          Err(RecvError::Lagged(skipped)) => {
            warn!(skipped, "sync subscriber fell behind; messages lost");
            continue;
          }
          Err(RecvError::Closed) => return None,
        },
      };

      if envelope.origin == self.origin {
        continue;
      }
      match SyncMessage::decode(&envelope.payload) {
        Ok(message) => return Some(message),
        // Already reported by the bridge's own task.
        Err(e) => debug!(error = %e, "subscriber skipped malformed sync message"),
      }
    }
  }

  pub fn into_stream(self) -> impl Stream<Item = SyncMessage> + Send + 'static {
    futures::stream::unfold(self, |mut sub| async move {
      let message = sub.recv().await?;
      Some((message, sub))
    })
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use futures::StreamExt;
  use serde_json::json;
  use tokio::time::timeout;

  use super::*;
  use crate::{SyncHub, SyncKind};

  const WAIT: Duration = Duration::from_secs(2);
  const QUIET: Duration = Duration::from_millis(100);

  fn insert(id: i64) -> SyncMessage {
    SyncMessage::new(
      SyncKind::Insert,
      "patients",
      json!({ "id": id, "firstName": "Test", "lastName": "Patient" }),
    )
  }

  async fn next(sub: &mut Subscription) -> Option<SyncMessage> {
    timeout(WAIT, sub.recv()).await.expect("timed out waiting for message")
  }

  async fn silent(sub: &mut Subscription) -> bool { timeout(QUIET, sub.recv()).await.is_err() }

  /// `latest` is kept by the bridge's own task, which may trail a subscriber.
  async fn latest_matches(bridge: &SyncBridge, want: impl Fn(&SyncMessage) -> bool) -> bool {
    timeout(WAIT, async {
      while !bridge.latest().as_ref().is_some_and(&want) {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .is_ok()
  }

  #[tokio::test]
  async fn other_bridges_receive_but_sender_does_not() {
    let hub = SyncHub::new();
    let a = hub.open("c");
    let b = hub.open("c");
    let mut sub_a = a.subscribe();
    let mut sub_b = b.subscribe();

    let msg = insert(1);
    a.broadcast(&msg);

    assert_eq!(next(&mut sub_b).await, Some(msg.clone()));
    assert!(latest_matches(&b, |m| *m == msg).await);
    assert!(silent(&mut sub_a).await);
    assert_eq!(a.latest(), None);
  }

  #[tokio::test]
  async fn every_other_bridge_gets_a_copy() {
    let hub = SyncHub::new();
    let a = hub.open("c");
    let b = hub.open("c");
    let c = hub.open("c");
    let (mut sub_b, mut sub_c) = (b.subscribe(), c.subscribe());

    a.broadcast(&insert(7));
    assert_eq!(next(&mut sub_b).await.unwrap().data["id"], 7);
    assert_eq!(next(&mut sub_c).await.unwrap().data["id"], 7);
  }

  #[tokio::test]
  async fn one_senders_messages_arrive_in_order() {
    let hub = SyncHub::new();
    let a = hub.open("c");
    let b = hub.open("c");
    let mut sub = b.subscribe();

    for id in 0..20 {
      a.broadcast(&insert(id));
    }
    for id in 0..20 {
      assert_eq!(next(&mut sub).await.unwrap().data["id"], id);
    }
  }

  #[tokio::test]
  async fn channels_are_isolated_by_name() {
    let hub = SyncHub::new();
    let a = hub.open("one");
    let b = hub.open("two");
    let mut sub = b.subscribe();

    a.broadcast(&insert(1));
    assert!(silent(&mut sub).await);
  }

  #[tokio::test]
  async fn closed_bridge_stops_receiving() {
    let hub = SyncHub::new();
    let a = hub.open("c");
    let b = hub.open("c");
    let mut sub = b.subscribe();

    b.close();
    b.close();
    assert!(b.is_closed());
    a.broadcast(&insert(1));
    assert_eq!(next(&mut sub).await, None);
    assert_eq!(b.latest(), None);
    assert_eq!(next(&mut b.subscribe()).await, None);
  }

  #[tokio::test]
  async fn closed_bridge_broadcast_is_a_no_op() {
    let hub = SyncHub::new();
    let a = hub.open("c");
    let b = hub.open("c");
    let mut sub = b.subscribe();

    a.close();
    a.broadcast(&insert(1));
    assert!(silent(&mut sub).await);
  }

  #[tokio::test]
  async fn malformed_messages_are_dropped() {
    let hub = SyncHub::new();
    let a = hub.open("c");
    let b = hub.open("c");
    let mut sub = b.subscribe();

    let channel = lock(&a.channel).clone().unwrap();
    for junk in ["not json", r#"{"type":"UPSERT"}"#, "{}"] {
      channel
        .tx
        .send(Envelope { origin: Uuid::new_v4(), payload: junk.into() })
        .unwrap();
    }
    let msg = insert(2);
    a.broadcast(&msg);

    assert_eq!(next(&mut sub).await, Some(msg.clone()));
    assert!(latest_matches(&b, |m| *m == msg).await);
  }

  #[tokio::test]
  async fn late_subscribers_see_only_new_messages() {
    let hub = SyncHub::new();
    let a = hub.open("c");
    let b = hub.open("c");
    let mut early = b.subscribe();

    a.broadcast(&insert(1));
    assert_eq!(next(&mut early).await.unwrap().data["id"], 1);

    let mut late = b.subscribe();
    a.broadcast(&insert(2));
    assert_eq!(next(&mut late).await.unwrap().data["id"], 2);
    assert!(latest_matches(&b, |m| m.data["id"] == 2).await);
  }

  #[tokio::test]
  async fn subscription_starts_at_call_time() {
    let hub = SyncHub::new();
    let a = hub.open("c");
    let b = hub.open("c");

    // Nothing has read message 1 yet when `late` subscribes.
    a.broadcast(&insert(1));
    let mut late = b.subscribe();
    a.broadcast(&insert(2));

    assert_eq!(next(&mut late).await.unwrap().data["id"], 2);
    assert!(silent(&mut late).await);
  }

  #[tokio::test]
  async fn channel_is_released_when_every_bridge_closes() {
    let hub = SyncHub::new();
    let a = hub.open("c");
    let b = hub.open("c");
    assert!(hub.is_open("c"));

    a.close();
    assert!(hub.is_open("c"));
    drop(b);
    assert!(!hub.is_open("c"));

    let c = hub.open("c");
    let d = hub.open("c");
    let mut sub = d.subscribe();
    c.broadcast(&insert(3));
    assert_eq!(next(&mut sub).await.unwrap().data["id"], 3);
  }

  #[tokio::test]
  async fn subscription_as_stream() {
    let hub = SyncHub::new();
    let a = hub.open("c");
    let b = hub.open("c");
    let stream = b.subscribe().into_stream();

    a.broadcast(&insert(1));
    a.broadcast(&SyncMessage::new(SyncKind::Delete, "patients", json!({ "id": 1 })));

    let got: Vec<SyncMessage> = timeout(WAIT, stream.take(2).collect()).await.unwrap();
    assert_eq!(got[0].kind, SyncKind::Insert);
    assert_eq!(got[1].kind, SyncKind::Delete);
  }
}
