//! The SQLite [`Engine`] over [`tokio_rusqlite`].

use std::future::Future;

use medblock_core::{
  InitError, InitStage,
  engine::{
    Engine, EngineError, EngineErrorKind, EngineLoader, QueryResult, Statement,
    StorageLocation, Value,
  },
};
use rusqlite::{
  ErrorCode, ffi,
  types::{Value as SqlValue, ValueRef},
};
use tracing::debug;

// ─── Loader ──────────────────────────────────────────────────────────────────

/// Opens a bundled SQLite database. Creates the parent directory of a file
/// location if needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteLoader;

impl EngineLoader for SqliteLoader {
  type Engine = SqliteEngine;

  fn load<'a>(
    &'a self,
    location: &'a StorageLocation,
  ) -> impl Future<Output = Result<SqliteEngine, InitError>> + Send + 'a {
    async move {
      let load_err = |e: String| InitError::new(InitStage::Load, e);

      let conn = match location {
        StorageLocation::Memory => tokio_rusqlite::Connection::open_in_memory()
          .await
          .map_err(|e| load_err(e.to_string()))?,
        StorageLocation::File(path) => {
          if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
              .await
              .map_err(|e| load_err(format!("cannot create {}: {e}", parent.display())))?;
          }
          let conn = tokio_rusqlite::Connection::open(path.clone())
            .await
            .map_err(|e| load_err(e.to_string()))?;
          conn
            .call(|conn| {
              conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
              })?;
              Ok(())
            })
            .await
            .map_err(|e| load_err(e.to_string()))?;
          conn
        }
      };

      conn
        .call(|conn| {
          conn.pragma_update(None, "foreign_keys", "ON")?;
          Ok(())
        })
        .await
        .map_err(|e| load_err(e.to_string()))?;

      debug!(%location, "sqlite connection opened");
      Ok(SqliteEngine { conn })
    }
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// A SQLite connection running on its own thread.
///
/// Cloning is cheap: the inner connection is reference-counted. Statements
/// from all clones are serialised on the connection thread.
#[derive(Clone)]
pub struct SqliteEngine {
  conn: tokio_rusqlite::Connection,
}

impl Engine for SqliteEngine {
  async fn ready(&self) -> Result<(), EngineError> {
    self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
      .await
      .map_err(engine_error)?;
    Ok(())
  }

  async fn query(&self, statement: Statement) -> Result<QueryResult, EngineError> {
    self
      .conn
      .call(move |conn| Ok(run(conn, &statement)?))
      .await
      .map_err(engine_error)
  }

  async fn transaction(&self, statements: Vec<Statement>) -> Result<Vec<QueryResult>, EngineError> {
    self
      .conn
      .call(move |conn| {
        // Dropping `tx` on an early return rolls it back.
        let tx = conn.transaction()?;
        let mut results = Vec::with_capacity(statements.len());
        for statement in &statements {
          results.push(run(&tx, statement)?);
        }
        tx.commit()?;
        Ok(results)
      })
      .await
      .map_err(engine_error)
  }
}

/// Prepare, bind and step `statement` to completion, collecting every row.
fn run(conn: &rusqlite::Connection, statement: &Statement) -> rusqlite::Result<QueryResult> {
  let mut stmt = conn.prepare(&statement.sql)?;
  let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();
  let width = columns.len();

  let writes = !stmt.readonly();
  let before = if writes { total_changes(conn)? } else { 0 };

  let params = rusqlite::params_from_iter(statement.params.iter().map(to_sql));
  let mut rows = stmt.query(params)?;
  let mut values = Vec::new();
  while let Some(row) = rows.next()? {
    let mut record = Vec::with_capacity(width);
    for i in 0..width {
      record.push(from_sql(row.get_ref(i)?));
    }
    values.push(record);
  }
  drop(rows);

  // `changes()` keeps its last value across DDL, so only trust it when the
  // connection-wide counter moved.
  let rows_affected = if writes && total_changes(conn)? != before {
    conn.changes() as u64
  } else {
    0
  };
  Ok(QueryResult::new(columns, values, rows_affected))
}

fn total_changes(conn: &rusqlite::Connection) -> rusqlite::Result<i64> {
  conn.query_row("SELECT total_changes()", [], |row| row.get(0))
}

fn to_sql(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Integer(i) => SqlValue::Integer(*i),
    Value::Real(f) => SqlValue::Real(*f),
    Value::Text(s) => SqlValue::Text(s.clone()),
    Value::Blob(b) => SqlValue::Blob(b.clone()),
  }
}

fn from_sql(value: ValueRef<'_>) -> Value {
  match value {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(i) => Value::Integer(i),
    ValueRef::Real(f) => Value::Real(f),
    ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    ValueRef::Blob(b) => Value::Blob(b.to_vec()),
  }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

fn engine_error(e: tokio_rusqlite::Error) -> EngineError {
  match e {
    tokio_rusqlite::Error::Rusqlite(e) => sqlite_error(e),
    tokio_rusqlite::Error::ConnectionClosed => {
      EngineError::new(EngineErrorKind::Closed, "database connection closed")
    }
    other => EngineError::other(other.to_string()),
  }
}

fn sqlite_error(e: rusqlite::Error) -> EngineError {
  let message = e.to_string();
  let kind = match &e {
    rusqlite::Error::SqliteFailure(failure, detail)
      if failure.code == ErrorCode::ConstraintViolation =>
    {
      if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
        || failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
      {
        // "UNIQUE constraint failed: patients.email"
        let column = detail
          .as_deref()
          .and_then(|d| d.split_once(": "))
          .and_then(|(_, cols)| cols.split(',').next())
          .map(|c| c.trim().to_owned());
        EngineErrorKind::UniqueViolation { column }
      } else {
        EngineErrorKind::Constraint
      }
    }
    _ if message.contains("syntax error") => EngineErrorKind::Syntax,
    _ => EngineErrorKind::Other,
  };
  EngineError::new(kind, message)
}
