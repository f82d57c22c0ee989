//! [`PatientService`] is a [`PatientStore`] that tells other peers about its
//! writes.

use std::sync::Arc;

use futures::{Stream, StreamExt as _, future};
use medblock_core::{
  Result,
  audit::AuditEntry,
  engine::{QueryResult, Value},
  patient::{NewPatient, Patient},
  store::{PatientQuery, PatientStore},
};
use medblock_sync::{SyncBridge, SyncKind, SyncMessage};
use serde_json::json;
use tracing::warn;

pub const PATIENTS_TABLE: &str = "patients";

/// Table name carried by `QUERY` messages; raw SQL may touch any table.
pub const SQL_TABLE: &str = "sql";

/// Wraps a store and a sync bridge. Every successful write is broadcast to
/// the other bridges on the channel after it commits; failures broadcast
/// nothing.
pub struct PatientService<S> {
  store:  Arc<S>,
  bridge: SyncBridge,
}

impl<S: PatientStore> PatientService<S> {
  pub fn new(store: Arc<S>, bridge: SyncBridge) -> Self { Self { store, bridge } }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn bridge(&self) -> &SyncBridge { &self.bridge }

  pub async fn list(&self, query: &PatientQuery) -> Result<Vec<Patient>> {
    self.store.list_patients(query).await
  }

  pub async fn get(&self, id: i64) -> Result<Patient> { self.store.get_patient(id).await }

  pub async fn create(&self, input: NewPatient) -> Result<Patient> {
    let patient = self.store.create_patient(input).await?;
    self.notify(SyncKind::Insert, &patient);
    Ok(patient)
  }

  pub async fn update(&self, id: i64, input: NewPatient) -> Result<Patient> {
    let patient = self.store.update_patient(id, input).await?;
    self.notify(SyncKind::Update, &patient);
    Ok(patient)
  }

  pub async fn delete(&self, id: i64) -> Result<Patient> {
    let patient = self.store.delete_patient(id).await?;
    self.notify(SyncKind::Delete, &patient);
    Ok(patient)
  }

  pub async fn audit_trail(&self, record_id: Option<i64>) -> Result<Vec<AuditEntry>> {
    self.store.audit_trail(record_id).await
  }

  /// Run raw SQL and broadcast `QUERY` with the statement text.
  pub async fn query(&self, sql: String, params: Vec<Value>) -> Result<QueryResult> {
    let result = self.store.query(sql.clone(), params).await?;
    self.bridge.broadcast(&SyncMessage::new(
      SyncKind::Query,
      SQL_TABLE,
      json!({ "sql": sql, "rowsAffected": result.rows_affected }),
    ));
    Ok(result)
  }

  /// Messages from other peers that may have changed patient data: every
  /// patient write, plus every raw query.
  pub fn patients_changed(&self) -> impl Stream<Item = SyncMessage> + Send + 'static {
    self.bridge.subscribe().into_stream().filter(|m| {
      future::ready(m.table == PATIENTS_TABLE || m.kind == SyncKind::Query)
    })
  }

  fn notify(&self, kind: SyncKind, patient: &Patient) {
    match serde_json::to_value(patient) {
      Ok(data) => self.bridge.broadcast(&SyncMessage::new(kind, PATIENTS_TABLE, data)),
      Err(e) => warn!(id = patient.id, error = %e, "patient not serialisable; change not broadcast"),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use medblock_core::patient::Gender;
  use medblock_store_sqlite::{Session, SessionConfig, SqliteLoader};
  use medblock_sync::SyncHub;
  use tokio::time::timeout;

  use super::*;

  const WAIT: Duration = Duration::from_secs(2);

  fn service(hub: &SyncHub) -> PatientService<Session<SqliteLoader>> {
    PatientService::new(
      Arc::new(Session::new(SqliteLoader, SessionConfig::in_memory())),
      hub.open("test"),
    )
  }

  fn input(email: &str) -> NewPatient {
    let dob = chrono::NaiveDate::from_ymd_opt(1980, 1, 1).unwrap();
    let mut p = NewPatient::new("Test", "Patient", dob, Gender::Other);
    p.email = Some(email.into());
    p
  }

  #[tokio::test]
  async fn writes_are_broadcast_to_peers() {
    let hub = SyncHub::new();
    let svc = service(&hub);
    let peer = hub.open("test");
    let mut sub = peer.subscribe();

    let created = svc.create(input("t@example.com")).await.unwrap();
    let msg = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(msg.kind, SyncKind::Insert);
    assert_eq!(msg.table, PATIENTS_TABLE);
    assert_eq!(msg.data["id"], created.id);
    assert_eq!(msg.data["email"], "t@example.com");

    svc.update(created.id, input("u@example.com")).await.unwrap();
    let msg = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(msg.kind, SyncKind::Update);
    assert_eq!(msg.data["email"], "u@example.com");

    svc.delete(created.id).await.unwrap();
    let msg = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(msg.kind, SyncKind::Delete);
    assert_eq!(msg.data["id"], created.id);
  }

  #[tokio::test]
  async fn failed_writes_are_not_broadcast() {
    let hub = SyncHub::new();
    let svc = service(&hub);
    let peer = hub.open("test");
    let mut sub = peer.subscribe();

    svc.create(input("dup@example.com")).await.unwrap();
    assert_eq!(timeout(WAIT, sub.recv()).await.unwrap().unwrap().kind, SyncKind::Insert);
    assert!(svc.create(input("dup@example.com")).await.is_err());
    assert!(svc.delete(999).await.is_err());

    assert!(timeout(Duration::from_millis(100), sub.recv()).await.is_err());
  }

  #[tokio::test]
  async fn raw_queries_broadcast_their_sql() {
    let hub = SyncHub::new();
    let svc = service(&hub);
    let peer = hub.open("test");
    let mut sub = peer.subscribe();

    svc.query("SELECT 1 AS one".into(), vec![]).await.unwrap();
    let msg = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(msg.kind, SyncKind::Query);
    assert_eq!(msg.data["sql"], "SELECT 1 AS one");
  }

  #[tokio::test]
  async fn patients_changed_sees_peer_writes_only() {
    let hub = SyncHub::new();
    let a = service(&hub);
    let b = service(&hub);
    let changes = b.patients_changed();
    futures::pin_mut!(changes);

    // b's own write is not echoed back to it.
    b.create(input("b@example.com")).await.unwrap();
    a.bridge().broadcast(&SyncMessage::new(SyncKind::Insert, "other", json!({})));
    a.create(input("a@example.com")).await.unwrap();

    let msg = timeout(WAIT, changes.next()).await.unwrap().unwrap();
    assert_eq!(msg.data["email"], "a@example.com");
  }
}
