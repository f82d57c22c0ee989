//! `POST /query`: run caller-supplied SQL.
//!
//! Body: `{"sql": "SELECT ...", "params": [1, "a", null]}`. Responds with
//! `{"fields": [...], "rows": [...], "rowsAffected": n}`. Engine errors come
//! back as 400 with the engine's message.

use axum::{Json, extract::State};
use medblock_core::{
  engine::{QueryResult, Value},
  store::PatientStore,
};
use serde::Deserialize;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct QueryBody {
  pub sql:    String,
  #[serde(default)]
  pub params: Vec<Value>,
}

pub async fn handler<S: PatientStore>(
  State(state): State<AppState<S>>,
  Json(body): Json<QueryBody>,
) -> Result<Json<QueryResult>, ApiError> {
  if body.sql.trim().is_empty() {
    return Err(ApiError::BadRequest("sql must not be empty".into()));
  }
  let result = state
    .service
    .query(body.sql, body.params)
    .await
    .map_err(ApiError::from_query)?;
  Ok(Json(result))
}
