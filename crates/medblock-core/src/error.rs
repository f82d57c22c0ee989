//! Error types for `medblock-core`.

use std::fmt;

use thiserror::Error;

use crate::{engine::EngineError, validate::ValidationError};

/// The setup step during which initialization failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
  /// Preparing engine assets and instantiating it against the storage
  /// location.
  Load,
  /// Waiting for the freshly opened engine to answer a readiness check.
  Ready,
  /// Creating tables and indexes.
  Schema,
  /// Inserting sample rows into an empty store.
  Seed,
}

impl fmt::Display for InitStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Load => "load",
      Self::Ready => "readiness check",
      Self::Schema => "schema creation",
      Self::Seed => "seeding",
    })
  }
}

/// A failed initialization attempt. Cloneable so every caller awaiting the
/// same attempt receives the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("initialization failed during {stage}: {message}")]
pub struct InitError {
  pub stage:   InitStage,
  pub message: String,
}

impl InitError {
  pub fn new(stage: InitStage, message: impl Into<String>) -> Self {
    Self { stage, message: message.into() }
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Initialization(#[from] InitError),

  /// An operation ran before the session was ready and no initialization
  /// could complete on its behalf.
  #[error("database is not initialized")]
  NotInitialized { source: Option<InitError> },

  #[error("a patient with email {0:?} already exists")]
  DuplicateEmail(String),

  #[error("patient not found: {0}")]
  RecordNotFound(i64),

  #[error("query failed: {0}")]
  QueryExecution(#[from] EngineError),

  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("row decode error: {0}")]
  Decode(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether retrying initialization may clear this error.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Initialization(_) | Self::NotInitialized { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
