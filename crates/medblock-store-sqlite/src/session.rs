//! [`Session`], the persistence session manager.
//!
//! A session owns the one engine handle for its storage location. It moves
//! through `Uninitialized → Initializing → Ready`, or `Initializing → Failed`
//! and back to `Initializing` on retry. At most one initialization attempt is
//! in flight: the first caller starts it and every concurrent caller awaits
//! the same shared future.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt as _, Shared};
use medblock_core::{
  Error, InitError, InitStage, Result,
  audit::{AuditAction, AuditEntry},
  engine::{Engine, EngineError, EngineLoader, QueryResult, Statement, StorageLocation, Value},
  patient::{NewPatient, Patient},
  store::{PatientQuery, PatientStore, SessionState},
};
use tracing::{info, warn};

use crate::{
  encode::{self, encode_dt},
  schema,
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
  pub location:         StorageLocation,
  /// Insert sample patients when the store is empty after schema creation.
  pub seed_sample_data: bool,
  /// Let the first query start initialization instead of failing with
  /// [`Error::NotInitialized`].
  pub lazy_init:        bool,
}

impl SessionConfig {
  pub fn new(location: StorageLocation) -> Self {
    Self { location, seed_sample_data: false, lazy_init: true }
  }

  /// An unseeded in-memory store.
  pub fn in_memory() -> Self { Self::new(StorageLocation::Memory) }

  pub fn with_seed(mut self, seed: bool) -> Self {
    self.seed_sample_data = seed;
    self
  }

  pub fn with_lazy_init(mut self, lazy: bool) -> Self {
    self.lazy_init = lazy;
    self
  }
}

// ─── State ───────────────────────────────────────────────────────────────────

type InitAttempt = Shared<BoxFuture<'static, Result<(), InitError>>>;

enum Phase {
  Uninitialized,
  Initializing(InitAttempt),
  Ready,
  Failed(InitError),
}

/// What a caller should do about initialization.
enum Join {
  Ready,
  Wait(InitAttempt),
  Idle(Option<InitError>),
}

struct Inner<L: EngineLoader> {
  loader: L,
  config: SessionConfig,
  /// Set exactly once, before the phase becomes `Ready`.
  engine: OnceLock<L::Engine>,
  phase:  Mutex<Phase>,
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// The single handle to a patient store.
///
/// Construct one per storage location and share it by cloning. Clones share
/// the same engine and initialization state.
pub struct Session<L: EngineLoader> {
  inner: Arc<Inner<L>>,
}

impl<L: EngineLoader> Clone for Session<L> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<L: EngineLoader> Session<L> {
  /// Create an uninitialized session. No I/O happens until [`initialize`] or
  /// the first query.
  ///
  /// [`initialize`]: Session::initialize
  pub fn new(loader: L, config: SessionConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        loader,
        config,
        engine: OnceLock::new(),
        phase: Mutex::new(Phase::Uninitialized),
      }),
    }
  }

  /// Load the engine, create the schema and seed it. Idempotent: returns
  /// immediately once ready, joins an attempt already in flight, and starts a
  /// fresh attempt after a failure.
  pub async fn initialize(&self) -> Result<()> {
    match self.join(true) {
      Join::Ready => Ok(()),
      Join::Wait(attempt) => Ok(attempt.await?),
      Join::Idle(_) => Err(Error::NotInitialized { source: None }),
    }
  }

  fn join(&self, start_if_idle: bool) -> Join {
    let mut phase = self.inner.lock_phase();
    match &*phase {
      Phase::Ready => Join::Ready,
      Phase::Initializing(attempt) => Join::Wait(attempt.clone()),
      Phase::Failed(e) if !start_if_idle => Join::Idle(Some(e.clone())),
      Phase::Uninitialized if !start_if_idle => Join::Idle(None),
      Phase::Uninitialized | Phase::Failed(_) => {
        let inner = self.inner.clone();
        let attempt = async move { inner.setup().await }.boxed().shared();
        *phase = Phase::Initializing(attempt.clone());
        Join::Wait(attempt)
      }
    }
  }

  /// The ready engine, waiting for (or, with `lazy_init`, starting)
  /// initialization as needed.
  async fn engine(&self) -> Result<&L::Engine> {
    match self.join(self.inner.config.lazy_init) {
      Join::Ready => {}
      Join::Wait(attempt) => attempt
        .await
        .map_err(|e| Error::NotInitialized { source: Some(e) })?,
      Join::Idle(cause) => return Err(Error::NotInitialized { source: cause }),
    }
    self
      .inner
      .engine
      .get()
      .ok_or(Error::NotInitialized { source: None })
  }

  async fn run(&self, statement: Statement) -> Result<QueryResult> {
    let engine = self.engine().await?;
    engine.query(statement).await.map_err(query_failed)
  }

  async fn run_transaction(
    &self,
    statements: Vec<Statement>,
    email: Option<&str>,
  ) -> Result<Vec<QueryResult>> {
    let engine = self.engine().await?;
    engine.transaction(statements).await.map_err(|e| {
      if e.is_unique_violation_on("patients.email") {
        Error::DuplicateEmail(email.unwrap_or_default().to_owned())
      } else {
        query_failed(e)
      }
    })
  }
}

fn query_failed(e: EngineError) -> Error {
  warn!(error = %e, "query failed");
  Error::QueryExecution(e)
}

/// Validate a payload against today's date after normalising it.
fn prepare(input: NewPatient) -> Result<NewPatient> {
  let input = input.normalized();
  input.validate(Utc::now().date_naive())?;
  Ok(input)
}

/// The single patient row returned by statement `index` of a transaction.
fn returned_patient(results: &[QueryResult], index: usize) -> Result<Option<Patient>> {
  results
    .get(index)
    .and_then(QueryResult::first)
    .map(encode::patient_from_row)
    .transpose()
}

// ─── Initialization ──────────────────────────────────────────────────────────

impl<L: EngineLoader> Inner<L> {
  fn lock_phase(&self) -> MutexGuard<'_, Phase> {
    self.phase.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Body of the shared initialization future. Runs once per attempt and
  /// records the outcome before any waiter observes it.
  async fn setup(&self) -> Result<(), InitError> {
    let outcome = self.run_stages().await;
    match outcome {
      Ok(engine) => {
        // Only a successful attempt sets the engine, and there is only ever
        // one successful attempt.
        let _ = self.engine.set(engine);
        *self.lock_phase() = Phase::Ready;
        info!(location = %self.config.location, "database ready");
        Ok(())
      }
      Err(e) => {
        warn!(location = %self.config.location, error = %e, "database initialization failed");
        *self.lock_phase() = Phase::Failed(e.clone());
        Err(e)
      }
    }
  }

  async fn run_stages(&self) -> Result<L::Engine, InitError> {
    info!(location = %self.config.location, "initializing database");
    let engine = self.loader.load(&self.config.location).await?;

    engine
      .ready()
      .await
      .map_err(|e| InitError::new(InitStage::Ready, e.message))?;

    engine
      .transaction(schema::statements())
      .await
      .map_err(|e| InitError::new(InitStage::Schema, e.message))?;

    if self.config.seed_sample_data {
      seed_if_empty(&engine).await?;
    }
    Ok(engine)
  }
}

async fn seed_if_empty<E: Engine>(engine: &E) -> Result<(), InitError> {
  let seed_err = |e: EngineError| InitError::new(InitStage::Seed, e.message);

  let result = engine
    .query(Statement::new(schema::COUNT_PATIENTS))
    .await
    .map_err(seed_err)?;
  let count = result
    .first()
    .and_then(|row| row.get("count"))
    .and_then(Value::as_i64)
    .unwrap_or_default();

  if count == 0 {
    engine
      .query(schema::seed(&encode_dt(Utc::now())))
      .await
      .map_err(seed_err)?;
    info!(rows = schema::SEED_COUNT, "seeded sample patients");
  }
  Ok(())
}

// ─── PatientStore impl ───────────────────────────────────────────────────────

impl<L: EngineLoader> PatientStore for Session<L> {
  fn state(&self) -> SessionState {
    match &*self.inner.lock_phase() {
      Phase::Uninitialized => SessionState::Uninitialized,
      Phase::Initializing(_) => SessionState::Initializing,
      Phase::Ready => SessionState::Ready,
      Phase::Failed(e) => SessionState::Failed(e.clone()),
    }
  }

  async fn count(&self) -> Result<i64> {
    let result = self.run(Statement::new(schema::COUNT_PATIENTS)).await?;
    result
      .first()
      .and_then(|row| row.get("count"))
      .and_then(Value::as_i64)
      .ok_or_else(|| Error::Decode("count query returned no rows".into()))
  }

  async fn query(&self, sql: String, params: Vec<Value>) -> Result<QueryResult> {
    self.run(Statement::with_params(sql, params)).await
  }

  async fn list_patients<'a>(&'a self, query: &'a PatientQuery) -> Result<Vec<Patient>> {
    let result = self.run(encode::list_patients(query)).await?;
    result.rows.iter().map(encode::patient_from_row).collect()
  }

  async fn get_patient(&self, id: i64) -> Result<Patient> {
    let result = self
      .run(Statement::with_params(
        "SELECT * FROM patients WHERE id = ?1",
        vec![Value::from(id)],
      ))
      .await?;
    result
      .first()
      .map(encode::patient_from_row)
      .transpose()?
      .ok_or(Error::RecordNotFound(id))
  }

  async fn create_patient(&self, input: NewPatient) -> Result<Patient> {
    let input = prepare(input)?;
    let now = Utc::now();

    let results = self
      .run_transaction(
        vec![
          encode::insert_patient(&input, now),
          encode::audit_last_insert(&input, now)?,
        ],
        input.email.as_deref(),
      )
      .await?;

    let patient = returned_patient(&results, 0)?
      .ok_or_else(|| Error::Decode("insert returned no row".into()))?;
    info!(id = patient.id, "patient created");
    Ok(patient)
  }

  async fn update_patient(&self, id: i64, input: NewPatient) -> Result<Patient> {
    let input = prepare(input)?;
    let now = Utc::now();

    let results = self
      .run_transaction(
        vec![
          encode::update_patient(id, &input, now),
          encode::audit_existing(AuditAction::Update, id, Some(&input), now)?,
        ],
        input.email.as_deref(),
      )
      .await?;

    let patient = returned_patient(&results, 0)?.ok_or(Error::RecordNotFound(id))?;
    info!(id, "patient updated");
    Ok(patient)
  }

  async fn delete_patient(&self, id: i64) -> Result<Patient> {
    let now = Utc::now();

    // The audit entry is written first: it selects the row the delete removes.
    let results = self
      .run_transaction(
        vec![
          encode::audit_existing(AuditAction::Delete, id, None, now)?,
          Statement::with_params(
            "DELETE FROM patients WHERE id = ?1 RETURNING *",
            vec![Value::from(id)],
          ),
        ],
        None,
      )
      .await?;

    let patient = returned_patient(&results, 1)?.ok_or(Error::RecordNotFound(id))?;
    info!(id, "patient deleted");
    Ok(patient)
  }

  async fn audit_trail(&self, record_id: Option<i64>) -> Result<Vec<AuditEntry>> {
    let result = self
      .run(Statement::with_params(
        "SELECT * FROM audit_log
         WHERE ?1 IS NULL OR record_id = ?1
         ORDER BY id DESC",
        vec![Value::from(record_id)],
      ))
      .await?;
    result.rows.iter().map(encode::audit_from_row).collect()
  }
}
