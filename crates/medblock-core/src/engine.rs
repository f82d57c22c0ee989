//! The seam between the session and an embedded SQL engine.
//!
//! The engine is treated as an opaque query service: it takes parameterised
//! statements and answers with rows plus field metadata. Backends (e.g.
//! `medblock-store-sqlite`) implement [`EngineLoader`] and [`Engine`]; the
//! session drives them without knowing which engine is underneath.

use std::{fmt, future::Future, path::PathBuf, sync::Arc};

use serde::{
  Deserialize, Serialize, Serializer,
  ser::SerializeMap,
};
use thiserror::Error;

use crate::InitError;

// ─── Values ──────────────────────────────────────────────────────────────────

/// A single SQL value, either bound as a parameter or read from a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
  /// Serialised as an array of byte values.
  Blob(Vec<u8>),
}

impl Value {
  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Self::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self { Self::Integer(v) }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self { Self::Real(v) }
}

impl From<String> for Value {
  fn from(v: String) -> Self { Self::Text(v) }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self { Self::Text(v.to_owned()) }
}

impl From<Vec<u8>> for Value {
  fn from(v: Vec<u8>) -> Self { Self::Blob(v) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self { v.map_or(Self::Null, Into::into) }
}

// ─── Storage location ────────────────────────────────────────────────────────

/// Where the engine keeps its data. A session binds exactly one engine to a
/// location; opening a second session on the same file is not supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
  Memory,
  File(PathBuf),
}

impl StorageLocation {
  /// `":memory:"` selects an in-memory store, anything else is a file path.
  pub fn parse(s: &str) -> Self {
    if s == ":memory:" {
      Self::Memory
    } else {
      Self::File(PathBuf::from(s))
    }
  }
}

impl fmt::Display for StorageLocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Memory => f.write_str(":memory:"),
      Self::File(p) => write!(f, "{}", p.display()),
    }
  }
}

// ─── Statements and results ──────────────────────────────────────────────────

/// A parameterised statement. Parameters bind positionally to `?1..?n`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
  pub sql:    String,
  pub params: Vec<Value>,
}

impl Statement {
  pub fn new(sql: impl Into<String>) -> Self {
    Self { sql: sql.into(), params: Vec::new() }
  }

  pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
    Self { sql: sql.into(), params }
  }
}

/// Column metadata for a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
  pub name: String,
}

/// One result row. Column names are shared between all rows of a result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
  columns: Arc<[String]>,
  values:  Vec<Value>,
}

impl Row {
  pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
    Self { columns, values }
  }

  /// The value of the named column, or `None` if the column is absent.
  pub fn get(&self, column: &str) -> Option<&Value> {
    self
      .columns
      .iter()
      .position(|c| c == column)
      .and_then(|i| self.values.get(i))
  }
}

// Rows serialise as JSON objects keyed by column name, in column order.
impl Serialize for Row {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.values.len()))?;
    for (column, value) in self.columns.iter().zip(&self.values) {
      map.serialize_entry(column, value)?;
    }
    map.end()
  }
}

/// Rows plus field metadata returned by [`Engine::query`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
  pub fields:        Vec<Field>,
  pub rows:          Vec<Row>,
  /// Rows inserted, updated or deleted by the statement.
  pub rows_affected: u64,
}

impl QueryResult {
  pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>, rows_affected: u64) -> Self {
    let fields = columns.iter().map(|name| Field { name: name.clone() }).collect();
    let columns: Arc<[String]> = columns.into();
    let rows = rows
      .into_iter()
      .map(|values| Row::new(columns.clone(), values))
      .collect();
    Self { fields, rows, rows_affected }
  }

  pub fn first(&self) -> Option<&Row> { self.rows.first() }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Broad classification of an engine failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineErrorKind {
  /// A UNIQUE constraint rejected the statement. `column` is the
  /// `table.column` the engine reported, when it reported one.
  UniqueViolation { column: Option<String> },
  /// Any other constraint (NOT NULL, CHECK, foreign key).
  Constraint,
  Syntax,
  /// The engine's worker went away.
  Closed,
  Other,
}

/// A failure reported by the engine. `message` is the engine's own text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
  pub kind:    EngineErrorKind,
  pub message: String,
}

impl EngineError {
  pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
    Self { kind, message: message.into() }
  }

  pub fn other(message: impl Into<String>) -> Self {
    Self::new(EngineErrorKind::Other, message)
  }

  /// Whether this is a UNIQUE violation on `table.column`.
  pub fn is_unique_violation_on(&self, table_column: &str) -> bool {
    matches!(
      &self.kind,
      EngineErrorKind::UniqueViolation { column: Some(c) } if c == table_column
    )
  }
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// A ready-to-use engine handle.
///
/// The engine serialises statements internally; callers may issue
/// overlapping calls and must tolerate completion in response order.
pub trait Engine: Send + Sync + 'static {
  /// Resolve once the engine answers queries.
  fn ready(&self) -> impl Future<Output = Result<(), EngineError>> + Send + '_;

  /// Run one statement and collect all of its rows.
  fn query(
    &self,
    statement: Statement,
  ) -> impl Future<Output = Result<QueryResult, EngineError>> + Send + '_;

  /// Run `statements` atomically: either every statement commits or none do.
  fn transaction(
    &self,
    statements: Vec<Statement>,
  ) -> impl Future<Output = Result<Vec<QueryResult>, EngineError>> + Send + '_;
}

/// Prepares engine assets and instantiates an [`Engine`] bound to a storage
/// location.
pub trait EngineLoader: Send + Sync + 'static {
  type Engine: Engine;

  fn load<'a>(
    &'a self,
    location: &'a StorageLocation,
  ) -> impl Future<Output = Result<Self::Engine, InitError>> + Send + 'a;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn row_lookup_by_column_name() {
    let result = QueryResult::new(
      vec!["id".into(), "first_name".into()],
      vec![vec![Value::Integer(7), Value::from("Ada")]],
      0,
    );
    let row = result.first().unwrap();
    assert_eq!(row.get("id").and_then(Value::as_i64), Some(7));
    assert_eq!(row.get("first_name").and_then(Value::as_str), Some("Ada"));
    assert!(row.get("missing").is_none());
    assert_eq!(result.fields[1].name, "first_name");
  }

  #[test]
  fn row_serialises_as_object() {
    let result = QueryResult::new(
      vec!["id".into(), "email".into()],
      vec![vec![Value::Integer(1), Value::Null]],
      1,
    );
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["rows"][0], serde_json::json!({ "id": 1, "email": null }));
    assert_eq!(json["rowsAffected"], 1);
  }

  #[test]
  fn untagged_values_from_json() {
    let params: Vec<Value> =
      serde_json::from_str(r#"[null, 3, 1.5, "x"]"#).unwrap();
    assert_eq!(
      params,
      vec![Value::Null, Value::Integer(3), Value::Real(1.5), Value::from("x")]
    );
  }

  #[test]
  fn blobs_serialise_as_byte_arrays() {
    let blob = Value::from(vec![0u8, 127, 255]);
    assert_eq!(serde_json::to_value(&blob).unwrap(), serde_json::json!([0, 127, 255]));
    let back: Value = serde_json::from_str("[0, 127, 255]").unwrap();
    assert_eq!(back, blob);
  }

  #[test]
  fn storage_location_parse() {
    assert_eq!(StorageLocation::parse(":memory:"), StorageLocation::Memory);
    assert_eq!(
      StorageLocation::parse("data/medblock.db"),
      StorageLocation::File(PathBuf::from("data/medblock.db"))
    );
  }

  #[test]
  fn unique_violation_matches_column() {
    let e = EngineError::new(
      EngineErrorKind::UniqueViolation { column: Some("patients.email".into()) },
      "UNIQUE constraint failed: patients.email",
    );
    assert!(e.is_unique_violation_on("patients.email"));
    assert!(!e.is_unique_violation_on("patients.phone"));
  }
}
