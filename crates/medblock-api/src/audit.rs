//! Handlers for the audit trail, newest entry first.

use axum::{
  Json,
  extract::{Path, State},
};
use medblock_core::{audit::AuditEntry, store::PatientStore};

use crate::{AppState, error::ApiError};

/// `GET /audit`
pub async fn list<S: PatientStore>(
  State(state): State<AppState<S>>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
  Ok(Json(state.service.audit_trail(None).await?))
}

/// `GET /patients/{id}/audit`: also works for deleted patients.
pub async fn for_patient<S: PatientStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<i64>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
  Ok(Json(state.service.audit_trail(Some(id)).await?))
}
