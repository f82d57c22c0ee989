//! JSON REST API and live change feed for MedBlock.
//!
//! Exposes an axum [`Router`] backed by any [`PatientStore`]. Writes go
//! through a [`PatientService`], which broadcasts them on a sync channel;
//! `GET /sync` relays that channel to HTTP clients as server-sent events.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/health` | Store lifecycle state |
//! | `GET` `POST` | `/patients` | List (`?search=&sort=&order=`, newest first by default) / create (201) |
//! | `GET` `PUT` `DELETE` | `/patients/{id}` | 404 if not found |
//! | `GET`  | `/patients/{id}/audit` | Audit entries for one patient |
//! | `GET`  | `/audit` | Full audit trail |
//! | `POST` | `/query` | Body: `{"sql": "...", "params": [...]}` |
//! | `GET`  | `/sync` | `text/event-stream` of sync messages |

pub mod audit;
pub mod error;
pub mod patients;
pub mod query;
pub mod service;
pub mod sync;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Json, Router,
  extract::State,
  routing::{get, post},
};
use medblock_core::{
  engine::EngineLoader,
  store::{PatientStore, SessionState},
};
use medblock_store_sqlite::Session;
use medblock_sync::SyncHub;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use service::PatientService;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `MEDBLOCK_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  pub host:             String,
  pub port:             u16,
  /// A file path, or `:memory:`.
  pub store_path:       PathBuf,
  pub seed_sample_data: bool,
  pub channel_name:     String,
  pub sync_capacity:    usize,
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub service: Arc<PatientService<S>>,
  pub hub:     SyncHub,
  pub channel: Arc<str>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      service: self.service.clone(),
      hub:     self.hub.clone(),
      channel: self.channel.clone(),
    }
  }
}

impl<S: PatientStore> AppState<S> {
  /// Wire `store` to a new bridge on `channel` of `hub`.
  pub fn new(store: Arc<S>, hub: SyncHub, channel: &str) -> Self {
    let bridge = hub.open(channel);
    Self {
      service: Arc::new(PatientService::new(store, bridge)),
      hub,
      channel: channel.into(),
    }
  }
}

// ─── Startup ──────────────────────────────────────────────────────────────────

/// Initialize `session` before the first request arrives. Returns whether it
/// became ready. A failure is logged rather than returned: the server keeps
/// serving, `/health` reports the cause and the next request retries.
pub async fn warm_up<L: EngineLoader>(session: &Session<L>) -> bool {
  match session.initialize().await {
    Ok(()) => {
      tracing::info!("patient store ready");
      true
    }
    Err(e) => {
      tracing::error!(error = %e, "patient store failed to initialize; retrying on next request");
      false
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the API router for `state`.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: PatientStore + 'static,
{
  Router::new()
    .route("/health", get(health::<S>))
    // Patients
    .route("/patients", get(patients::list::<S>).post(patients::create::<S>))
    .route(
      "/patients/{id}",
      get(patients::get_one::<S>)
        .put(patients::update::<S>)
        .delete(patients::delete::<S>),
    )
    .route("/patients/{id}/audit", get(audit::for_patient::<S>))
    // Audit and raw SQL
    .route("/audit", get(audit::list::<S>))
    .route("/query", post(query::handler::<S>))
    // Live changes
    .route("/sync", get(sync::handler::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Health ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Health {
  pub status: &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:  Option<String>,
}

/// `GET /health`
async fn health<S: PatientStore>(State(state): State<AppState<S>>) -> Json<Health> {
  let current = state.service.store().state();
  let error = match &current {
    SessionState::Failed(e) => Some(e.to_string()),
    _ => None,
  };
  Json(Health { status: current.as_str(), error })
}
