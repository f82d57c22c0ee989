//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use medblock_core::{Error, ValidationError};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
///
/// Every variant renders as `{"error": "..."}`, plus `field` for input
/// problems and `retryable` when the store is still coming up.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error(transparent)]
  Validation(ValidationError),

  #[error("conflict: {message}")]
  Conflict { field: &'static str, message: String },

  #[error("store unavailable: {0}")]
  Unavailable(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl From<Error> for ApiError {
  fn from(e: Error) -> Self {
    match e {
      Error::Validation(v) => Self::Validation(v),
      Error::DuplicateEmail(_) => Self::Conflict { field: "email", message: e.to_string() },
      Error::RecordNotFound(_) => Self::NotFound(e.to_string()),
      Error::Initialization(_) | Error::NotInitialized { .. } => Self::Unavailable(e.to_string()),
      other => {
        // Engine detail stays in the log.
        tracing::error!(error = %other, "store operation failed");
        Self::Internal("the operation could not be completed".into())
      }
    }
  }
}

impl ApiError {
  /// Like the [`From`] conversion, but surfaces engine messages as a 400.
  /// For endpoints where the caller wrote the SQL.
  pub fn from_query(e: Error) -> Self {
    match e {
      Error::QueryExecution(engine) => Self::BadRequest(engine.message),
      other => other.into(),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let message = self.to_string();
    let (status, body) = match &self {
      ApiError::NotFound(_) => (StatusCode::NOT_FOUND, json!({ "error": message })),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, json!({ "error": m })),
      ApiError::Validation(v) => (
        StatusCode::UNPROCESSABLE_ENTITY,
        json!({ "error": message, "field": v.field() }),
      ),
      ApiError::Conflict { field, .. } => {
        (StatusCode::CONFLICT, json!({ "error": message, "field": field }))
      }
      ApiError::Unavailable(_) => (
        StatusCode::SERVICE_UNAVAILABLE,
        json!({ "error": message, "retryable": true }),
      ),
      ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": m })),
    };
    (status, Json(body)).into_response()
  }
}

#[cfg(test)]
mod tests {
  use medblock_core::{
    InitError, InitStage,
    engine::{EngineError, EngineErrorKind},
  };

  use super::*;

  fn status(e: Error) -> StatusCode { ApiError::from(e).into_response().status() }

  #[test]
  fn store_errors_map_to_statuses() {
    assert_eq!(
      status(ValidationError::InvalidEmail("nope".into()).into()),
      StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(status(Error::DuplicateEmail("a@b.co".into())), StatusCode::CONFLICT);
    assert_eq!(status(Error::RecordNotFound(4)), StatusCode::NOT_FOUND);
    assert_eq!(
      status(InitError::new(InitStage::Load, "boom").into()),
      StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
      status(Error::NotInitialized { source: None }),
      StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
      status(EngineError::new(EngineErrorKind::Syntax, "near \"SELEC\"").into()),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }

  #[test]
  fn engine_detail_is_hidden_except_for_raw_queries() {
    let engine = || Error::from(EngineError::other("no such table: secrets"));

    let hidden = ApiError::from(engine());
    assert!(!hidden.to_string().contains("secrets"));

    let shown = ApiError::from_query(engine());
    assert!(matches!(&shown, ApiError::BadRequest(m) if m.contains("secrets")));
    assert_eq!(shown.into_response().status(), StatusCode::BAD_REQUEST);
  }
}
