//! Patient records.
//!
//! [`NewPatient`] is the write shape accepted from callers; [`Patient`] is the
//! read shape returned by the store, carrying the store-assigned id and
//! timestamps alongside the same details.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
  Male,
  Female,
  Other,
}

impl Gender {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Male => "Male",
      Self::Female => "Female",
      Self::Other => "Other",
    }
  }
}

impl fmt::Display for Gender {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Gender {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "Male" => Ok(Self::Male),
      "Female" => Ok(Self::Female),
      "Other" => Ok(Self::Other),
      other => Err(format!("unknown gender: {other:?}")),
    }
  }
}

// ─── NewPatient ──────────────────────────────────────────────────────────────

/// Input to [`crate::store::PatientStore::create_patient`] and
/// [`crate::store::PatientStore::update_patient`]. The id and timestamps are
/// always set by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
  pub first_name:        String,
  pub last_name:         String,
  pub date_of_birth:     NaiveDate,
  pub gender:            Gender,
  /// Unique across all patients when present.
  #[serde(default)]
  pub email:             Option<String>,
  #[serde(default)]
  pub phone:             Option<String>,
  #[serde(default)]
  pub address:           Option<String>,
  #[serde(default)]
  pub emergency_contact: Option<String>,
  #[serde(default)]
  pub medical_history:   Option<String>,
  #[serde(default)]
  pub blood_type:        Option<String>,
  #[serde(default)]
  pub last_visit:        Option<NaiveDate>,
}

impl NewPatient {
  /// Convenience constructor with every optional field unset.
  pub fn new(
    first_name: impl Into<String>,
    last_name: impl Into<String>,
    date_of_birth: NaiveDate,
    gender: Gender,
  ) -> Self {
    Self {
      first_name: first_name.into(),
      last_name: last_name.into(),
      date_of_birth,
      gender,
      email: None,
      phone: None,
      address: None,
      emergency_contact: None,
      medical_history: None,
      blood_type: None,
      last_visit: None,
    }
  }

  /// Trim every text field, drop blank optional fields and lower-case the
  /// email so uniqueness is case-insensitive.
  pub fn normalized(self) -> Self {
    Self {
      first_name: self.first_name.trim().to_owned(),
      last_name: self.last_name.trim().to_owned(),
      email: non_blank(self.email).map(|e| e.to_lowercase()),
      phone: non_blank(self.phone),
      address: non_blank(self.address),
      emergency_contact: non_blank(self.emergency_contact),
      medical_history: non_blank(self.medical_history),
      blood_type: non_blank(self.blood_type).map(|b| b.to_uppercase()),
      ..self
    }
  }
}

fn non_blank(value: Option<String>) -> Option<String> {
  value
    .map(|v| v.trim().to_owned())
    .filter(|v| !v.is_empty())
}

// ─── Patient ─────────────────────────────────────────────────────────────────

/// A persisted patient record. `id` never changes once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
  pub id:         i64,
  #[serde(flatten)]
  pub details:    NewPatient,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn date(y: i32, m: u32, d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(y, m, d).unwrap() }

  #[test]
  fn normalized_drops_blank_optionals() {
    let mut p = NewPatient::new("  Ada ", "Lovelace", date(1990, 12, 10), Gender::Female);
    p.email = Some("  ".into());
    p.phone = Some(" 555-0100 ".into());
    p.blood_type = Some("ab+".into());

    let n = p.normalized();
    assert_eq!(n.first_name, "Ada");
    assert_eq!(n.email, None);
    assert_eq!(n.phone.as_deref(), Some("555-0100"));
    assert_eq!(n.blood_type.as_deref(), Some("AB+"));
  }

  #[test]
  fn normalized_lowercases_email() {
    let mut p = NewPatient::new("Ada", "Lovelace", date(1990, 12, 10), Gender::Female);
    p.email = Some("Ada@Example.COM".into());
    assert_eq!(p.normalized().email.as_deref(), Some("ada@example.com"));
  }

  #[test]
  fn patient_json_is_flat_camel_case() {
    let now = Utc::now();
    let patient = Patient {
      id:         4,
      details:    NewPatient::new("Ada", "Lovelace", date(1990, 12, 10), Gender::Female),
      created_at: now,
      updated_at: now,
    };
    let json = serde_json::to_value(&patient).unwrap();
    assert_eq!(json["id"], 4);
    assert_eq!(json["firstName"], "Ada");
    assert_eq!(json["dateOfBirth"], "1990-12-10");
    assert_eq!(json["gender"], "Female");
    assert!(json.get("details").is_none());

    let back: Patient = serde_json::from_value(json).unwrap();
    assert_eq!(back, patient);
  }

  #[test]
  fn missing_optionals_deserialize_as_none() {
    let json = serde_json::json!({
      "firstName": "Ada",
      "lastName": "Lovelace",
      "dateOfBirth": "1990-12-10",
      "gender": "Other",
    });
    let p: NewPatient = serde_json::from_value(json).unwrap();
    assert_eq!(p.email, None);
    assert_eq!(p.last_visit, None);
  }
}
