//! Audit trail entries.
//!
//! Entries are appended alongside every patient mutation and never updated or
//! deleted. They exist for traceability, not for recovery.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
  Create,
  Update,
  Delete,
}

impl AuditAction {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Create => "CREATE",
      Self::Update => "UPDATE",
      Self::Delete => "DELETE",
    }
  }
}

impl fmt::Display for AuditAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for AuditAction {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "CREATE" => Ok(Self::Create),
      "UPDATE" => Ok(Self::Update),
      "DELETE" => Ok(Self::Delete),
      other => Err(format!("unknown audit action: {other:?}")),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
  pub id:         i64,
  pub action:     AuditAction,
  pub table_name: String,
  pub record_id:  i64,
  /// Snapshot of the payload written by the audited mutation.
  pub changes:    Option<serde_json::Value>,
  pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn action_text_roundtrip() {
    for action in [AuditAction::Create, AuditAction::Update, AuditAction::Delete] {
      assert_eq!(action.as_str().parse::<AuditAction>(), Ok(action));
      assert_eq!(serde_json::to_value(action).unwrap(), action.as_str());
    }
    assert!("INSERT".parse::<AuditAction>().is_err());
  }
}
