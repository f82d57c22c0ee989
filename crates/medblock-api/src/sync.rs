//! `GET /sync`: sync messages as server-sent events.
//!
//! Each connection opens its own bridge on the configured channel, so it
//! receives every other peer's messages (including this server's writes) and
//! the bridge closes when the client goes away. Events are named by message
//! type and carry the message as JSON.

use std::convert::Infallible;

use axum::{
  extract::State,
  response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, stream};
use medblock_core::store::PatientStore;
use tracing::{debug, warn};

use crate::AppState;

pub async fn handler<S: PatientStore>(
  State(state): State<AppState<S>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
  let bridge = state.hub.open(&state.channel);
  let subscription = bridge.subscribe();
  debug!(bridge = %bridge.id(), "sync client connected");

  // The bridge travels with the stream and closes when it is dropped.
  let events = stream::unfold((bridge, subscription), |(bridge, mut sub)| async move {
    loop {
      let message = sub.recv().await?;
      match Event::default().event(message.kind.as_str()).json_data(&message) {
        Ok(event) => return Some((Ok(event), (bridge, sub))),
        Err(e) => warn!(error = %e, "sync message not encodable as an event"),
      }
    }
  });

  Sse::new(events).keep_alive(KeepAlive::default())
}
