//! The sync wire message.

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncKind {
  Insert,
  Update,
  Delete,
  Query,
}

impl SyncKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Insert => "INSERT",
      Self::Update => "UPDATE",
      Self::Delete => "DELETE",
      Self::Query => "QUERY",
    }
  }
}

/// A change notification. Serialised as
/// `{"type": "INSERT", "table": "patients", "data": ..., "timestamp": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
  #[serde(rename = "type")]
  pub kind:      SyncKind,
  pub table:     String,
  /// The changed record, or a description of the query.
  pub data:      serde_json::Value,
  /// Milliseconds since the Unix epoch.
  pub timestamp: i64,
}

impl SyncMessage {
  /// A message stamped with the current time.
  pub fn new(kind: SyncKind, table: impl Into<String>, data: serde_json::Value) -> Self {
    Self {
      kind,
      table: table.into(),
      data,
      timestamp: Utc::now().timestamp_millis(),
    }
  }

  pub fn encode(&self) -> serde_json::Result<String> { serde_json::to_string(self) }

  pub fn decode(text: &str) -> serde_json::Result<Self> { serde_json::from_str(text) }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn wire_shape() {
    let msg = SyncMessage {
      kind:      SyncKind::Insert,
      table:     "patients".into(),
      data:      json!({ "id": 1, "firstName": "Test" }),
      timestamp: 1_700_000_000_000,
    };
    assert_eq!(
      serde_json::to_value(&msg).unwrap(),
      json!({
        "type": "INSERT",
        "table": "patients",
        "data": { "id": 1, "firstName": "Test" },
        "timestamp": 1_700_000_000_000i64,
      })
    );
  }

  #[test]
  fn every_kind_decodes() {
    for (text, kind) in [
      ("INSERT", SyncKind::Insert),
      ("UPDATE", SyncKind::Update),
      ("DELETE", SyncKind::Delete),
      ("QUERY", SyncKind::Query),
    ] {
      let raw = format!(r#"{{"type":"{text}","table":"patients","data":null,"timestamp":1}}"#);
      assert_eq!(SyncMessage::decode(&raw).unwrap().kind, kind);
      assert_eq!(kind.as_str(), text);
    }
  }

  #[test]
  fn malformed_is_rejected() {
    assert!(SyncMessage::decode("not json").is_err());
    assert!(SyncMessage::decode(r#"{"type":"UPSERT","table":"t","data":1,"timestamp":1}"#).is_err());
    assert!(SyncMessage::decode(r#"{"type":"INSERT"}"#).is_err());
  }
}
