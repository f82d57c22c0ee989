//! Handlers for `/patients` endpoints.

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use medblock_core::{
  patient::{NewPatient, Patient},
  store::{PatientQuery, PatientStore, SortField, SortOrder},
};
use serde::Deserialize;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
  /// Case-insensitive substring of first name, last name, email or phone.
  pub search: Option<String>,
  /// A patient field in its JSON spelling, e.g. `lastName`.
  pub sort:   Option<SortField>,
  /// `asc` or `desc`. Ascending when only `sort` is given; with neither, the
  /// list is newest first.
  pub order:  Option<SortOrder>,
}

impl From<ListParams> for PatientQuery {
  fn from(params: ListParams) -> Self {
    let order = match (params.sort, params.order) {
      (_, Some(order)) => order,
      (Some(_), None) => SortOrder::Asc,
      (None, None) => SortOrder::Desc,
    };
    Self {
      search: params.search,
      sort: params.sort.unwrap_or_default(),
      order,
    }
  }
}

/// `GET /patients[?search=...][&sort=...][&order=asc|desc]`
pub async fn list<S: PatientStore>(
  State(state): State<AppState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Patient>>, ApiError> {
  Ok(Json(state.service.list(&params.into()).await?))
}

/// `POST /patients`: 201 with the stored record.
pub async fn create<S: PatientStore>(
  State(state): State<AppState<S>>,
  Json(body): Json<NewPatient>,
) -> Result<impl IntoResponse, ApiError> {
  let patient = state.service.create(body).await?;
  Ok((StatusCode::CREATED, Json(patient)))
}

/// `GET /patients/{id}`
pub async fn get_one<S: PatientStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<i64>,
) -> Result<Json<Patient>, ApiError> {
  Ok(Json(state.service.get(id).await?))
}

/// `PUT /patients/{id}`: replaces every detail; `id` and `createdAt` stay.
pub async fn update<S: PatientStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<i64>,
  Json(body): Json<NewPatient>,
) -> Result<Json<Patient>, ApiError> {
  Ok(Json(state.service.update(id, body).await?))
}

/// `DELETE /patients/{id}`: returns the record as it was.
pub async fn delete<S: PatientStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<i64>,
) -> Result<Json<Patient>, ApiError> {
  Ok(Json(state.service.delete(id).await?))
}
