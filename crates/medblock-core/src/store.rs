//! The `PatientStore` trait.
//!
//! Implemented by the persistence session (`medblock-store-sqlite`). Higher
//! layers (`medblock-api`) depend on this abstraction, not on a concrete
//! backend.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
  InitError, Result,
  audit::AuditEntry,
  engine::{QueryResult, Value},
  patient::{NewPatient, Patient},
};

/// Observable lifecycle state of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
  Uninitialized,
  Initializing,
  Ready,
  Failed(InitError),
}

impl SessionState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Uninitialized => "uninitialized",
      Self::Initializing => "initializing",
      Self::Ready => "ready",
      Self::Failed(_) => "failed",
    }
  }
}

// ─── Listing ─────────────────────────────────────────────────────────────────

/// A patient field that [`PatientQuery`] can order by. Names match the JSON
/// field names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
  Id,
  FirstName,
  LastName,
  DateOfBirth,
  Gender,
  Email,
  Phone,
  Address,
  EmergencyContact,
  MedicalHistory,
  BloodType,
  LastVisit,
  #[default]
  CreatedAt,
  UpdatedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  Asc,
  #[default]
  Desc,
}

/// Parameters for [`PatientStore::list_patients`]. The default lists every
/// patient, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientQuery {
  /// Case-insensitive substring of first name, last name, email or phone.
  pub search: Option<String>,
  pub sort:   SortField,
  pub order:  SortOrder,
}

impl PatientQuery {
  /// The search term, trimmed and lowercased; `None` if blank.
  pub fn search_term(&self) -> Option<String> {
    self
      .search
      .as_deref()
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(str::to_lowercase)
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Typed CRUD over patients plus the raw query surface.
///
/// Every method waits for the store to be ready before touching the engine.
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait PatientStore: Send + Sync {
  /// Where the store is in its lifecycle. Never blocks and never starts
  /// initialization.
  fn state(&self) -> SessionState;

  /// Number of patients.
  fn count(&self) -> impl Future<Output = Result<i64>> + Send + '_;

  /// Run a parameterised statement and return rows plus field metadata.
  fn query(
    &self,
    sql: String,
    params: Vec<Value>,
  ) -> impl Future<Output = Result<QueryResult>> + Send + '_;

  /// Patients matching `query`, in its order. Ties break on `id` in the same
  /// direction.
  fn list_patients<'a>(
    &'a self,
    query: &'a PatientQuery,
  ) -> impl Future<Output = Result<Vec<Patient>>> + Send + 'a;

  /// Fails with [`crate::Error::RecordNotFound`] if `id` does not exist.
  fn get_patient(&self, id: i64) -> impl Future<Output = Result<Patient>> + Send + '_;

  /// Validate and insert a patient, appending a `CREATE` audit entry.
  ///
  /// Fails with [`crate::Error::DuplicateEmail`] if another patient already
  /// has the same non-empty email.
  fn create_patient(
    &self,
    input: NewPatient,
  ) -> impl Future<Output = Result<Patient>> + Send + '_;

  /// Replace every detail of an existing patient, keeping `id` and
  /// `created_at`, and append an `UPDATE` audit entry.
  fn update_patient(
    &self,
    id: i64,
    input: NewPatient,
  ) -> impl Future<Output = Result<Patient>> + Send + '_;

  /// Delete a patient, appending a `DELETE` audit entry. Returns the record as
  /// it was before deletion.
  fn delete_patient(&self, id: i64) -> impl Future<Output = Result<Patient>> + Send + '_;

  /// Audit entries, newest first, optionally restricted to one record.
  fn audit_trail(
    &self,
    record_id: Option<i64>,
  ) -> impl Future<Output = Result<Vec<AuditEntry>>> + Send + '_;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_query_is_newest_first() {
    let q = PatientQuery::default();
    assert_eq!((q.sort, q.order), (SortField::CreatedAt, SortOrder::Desc));
    assert_eq!(q.search_term(), None);
  }

  #[test]
  fn blank_search_matches_everything() {
    let q = PatientQuery { search: Some("   ".into()), ..Default::default() };
    assert_eq!(q.search_term(), None);
    let q = PatientQuery { search: Some(" SMith ".into()), ..Default::default() };
    assert_eq!(q.search_term().as_deref(), Some("smith"));
  }

  #[test]
  fn sort_names_match_json_fields() {
    let field: SortField = serde_json::from_str(r#""dateOfBirth""#).unwrap();
    assert_eq!(field, SortField::DateOfBirth);
    let order: SortOrder = serde_json::from_str(r#""asc""#).unwrap();
    assert_eq!(order, SortOrder::Asc);
  }
}
