//! Mapping between domain types and the column values stored in SQLite.
//!
//! This is the only place that knows column names: statements for insert,
//! update and select are all built from the lists below, so the Rust shape and
//! the schema cannot drift apart.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microsecond
//! precision, `Z` suffix) so lexical order matches chronological order. Dates
//! are ISO 8601 `YYYY-MM-DD`.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use medblock_core::{
  Error, Result,
  audit::{AuditAction, AuditEntry},
  engine::{Row, Statement, Value},
  patient::{Gender, NewPatient, Patient},
  store::{PatientQuery, SortField, SortOrder},
};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::Decode(format!("date {s:?}: {e}")))
}

// ─── Row access ──────────────────────────────────────────────────────────────

fn column<'r>(row: &'r Row, name: &str) -> Result<&'r Value> {
  row
    .get(name)
    .ok_or_else(|| Error::Decode(format!("missing column {name:?}")))
}

fn int(row: &Row, name: &str) -> Result<i64> {
  column(row, name)?
    .as_i64()
    .ok_or_else(|| Error::Decode(format!("column {name:?} is not an integer")))
}

fn opt_text(row: &Row, name: &str) -> Result<Option<String>> {
  match column(row, name)? {
    Value::Null => Ok(None),
    Value::Text(s) => Ok(Some(s.clone())),
    other => Err(Error::Decode(format!("column {name:?} is not text: {other:?}"))),
  }
}

fn text(row: &Row, name: &str) -> Result<String> {
  opt_text(row, name)?.ok_or_else(|| Error::Decode(format!("column {name:?} is NULL")))
}

// ─── Patients ────────────────────────────────────────────────────────────────

/// Writable patient columns, in the order [`patient_values`] produces them.
const PATIENT_COLUMNS: &[&str] = &[
  "first_name",
  "last_name",
  "date_of_birth",
  "gender",
  "email",
  "phone",
  "address",
  "emergency_contact",
  "medical_history",
  "blood_type",
  "last_visit",
];

fn patient_values(p: &NewPatient) -> Vec<Value> {
  vec![
    Value::from(p.first_name.as_str()),
    Value::from(p.last_name.as_str()),
    Value::from(encode_date(p.date_of_birth)),
    Value::from(p.gender.as_str()),
    Value::from(p.email.clone()),
    Value::from(p.phone.clone()),
    Value::from(p.address.clone()),
    Value::from(p.emergency_contact.clone()),
    Value::from(p.medical_history.clone()),
    Value::from(p.blood_type.clone()),
    Value::from(p.last_visit.map(encode_date)),
  ]
}

fn sort_column(field: SortField) -> &'static str {
  match field {
    SortField::Id => "id",
    SortField::FirstName => "first_name",
    SortField::LastName => "last_name",
    SortField::DateOfBirth => "date_of_birth",
    SortField::Gender => "gender",
    SortField::Email => "email",
    SortField::Phone => "phone",
    SortField::Address => "address",
    SortField::EmergencyContact => "emergency_contact",
    SortField::MedicalHistory => "medical_history",
    SortField::BloodType => "blood_type",
    SortField::LastVisit => "last_visit",
    SortField::CreatedAt => "created_at",
    SortField::UpdatedAt => "updated_at",
  }
}

/// `SELECT` of the patients matching `query`, in its order. Missing values
/// sort last either way.
pub fn list_patients(query: &PatientQuery) -> Statement {
  let column = sort_column(query.sort);
  let dir = match query.order {
    SortOrder::Asc => "ASC",
    SortOrder::Desc => "DESC",
  };
  let sql = format!(
    "SELECT * FROM patients
     WHERE ?1 IS NULL
        OR instr(lower(first_name), ?1) > 0
        OR instr(lower(last_name), ?1) > 0
        OR instr(lower(email), ?1) > 0
        OR instr(lower(phone), ?1) > 0
     ORDER BY {column} COLLATE NOCASE {dir} NULLS LAST, id {dir}"
  );
  Statement::with_params(sql, vec![Value::from(query.search_term())])
}

/// `INSERT ... RETURNING *` for a new patient stamped with `now`.
pub fn insert_patient(p: &NewPatient, now: DateTime<Utc>) -> Statement {
  let n = PATIENT_COLUMNS.len();
  let placeholders: Vec<String> = (1..=n + 2).map(|i| format!("?{i}")).collect();
  let sql = format!(
    "INSERT INTO patients ({}, created_at, updated_at) VALUES ({}) RETURNING *",
    PATIENT_COLUMNS.join(", "),
    placeholders.join(", "),
  );
  let stamp = encode_dt(now);
  let mut params = patient_values(p);
  params.push(Value::from(stamp.clone()));
  params.push(Value::from(stamp));
  Statement::with_params(sql, params)
}

/// `UPDATE ... RETURNING *` replacing every writable column of `id`.
/// `created_at` is never touched.
pub fn update_patient(id: i64, p: &NewPatient, now: DateTime<Utc>) -> Statement {
  let n = PATIENT_COLUMNS.len();
  let assignments: Vec<String> = PATIENT_COLUMNS
    .iter()
    .enumerate()
    .map(|(i, c)| format!("{c} = ?{}", i + 1))
    .collect();
  let sql = format!(
    "UPDATE patients SET {}, updated_at = ?{} WHERE id = ?{} RETURNING *",
    assignments.join(", "),
    n + 1,
    n + 2,
  );
  let mut params = patient_values(p);
  params.push(Value::from(encode_dt(now)));
  params.push(Value::from(id));
  Statement::with_params(sql, params)
}

pub fn patient_from_row(row: &Row) -> Result<Patient> {
  let gender: Gender = text(row, "gender")?.parse().map_err(Error::Decode)?;
  let details = NewPatient {
    first_name: text(row, "first_name")?,
    last_name: text(row, "last_name")?,
    date_of_birth: decode_date(&text(row, "date_of_birth")?)?,
    gender,
    email: opt_text(row, "email")?,
    phone: opt_text(row, "phone")?,
    address: opt_text(row, "address")?,
    emergency_contact: opt_text(row, "emergency_contact")?,
    medical_history: opt_text(row, "medical_history")?,
    blood_type: opt_text(row, "blood_type")?,
    last_visit: opt_text(row, "last_visit")?.as_deref().map(decode_date).transpose()?,
  };
  Ok(Patient {
    id: int(row, "id")?,
    details,
    created_at: decode_dt(&text(row, "created_at")?)?,
    updated_at: decode_dt(&text(row, "updated_at")?)?,
  })
}

// ─── Audit log ───────────────────────────────────────────────────────────────

/// Append an entry for the patient created by the immediately preceding
/// insert in the same transaction.
pub fn audit_last_insert(changes: &NewPatient, now: DateTime<Utc>) -> Result<Statement> {
  Ok(Statement::with_params(
    "INSERT INTO audit_log (action, table_name, record_id, changes, created_at)
     VALUES ('CREATE', 'patients', last_insert_rowid(), ?1, ?2)",
    vec![
      Value::from(serde_json::to_string(changes)?),
      Value::from(encode_dt(now)),
    ],
  ))
}

/// Append an entry for `id`, but only if that patient currently exists, so a
/// mutation of a missing record leaves no trace.
pub fn audit_existing(
  action: AuditAction,
  id: i64,
  changes: Option<&NewPatient>,
  now: DateTime<Utc>,
) -> Result<Statement> {
  let changes = changes.map(serde_json::to_string).transpose()?;
  Ok(Statement::with_params(
    "INSERT INTO audit_log (action, table_name, record_id, changes, created_at)
     SELECT ?1, 'patients', id, ?2, ?3 FROM patients WHERE id = ?4",
    vec![
      Value::from(action.as_str()),
      Value::from(changes),
      Value::from(encode_dt(now)),
      Value::from(id),
    ],
  ))
}

pub fn audit_from_row(row: &Row) -> Result<AuditEntry> {
  let action: AuditAction = text(row, "action")?.parse().map_err(Error::Decode)?;
  let changes = opt_text(row, "changes")?
    .map(|s| serde_json::from_str(&s))
    .transpose()?;
  Ok(AuditEntry {
    id: int(row, "id")?,
    action,
    table_name: text(row, "table_name")?,
    record_id: int(row, "record_id")?,
    changes,
    created_at: decode_dt(&text(row, "created_at")?)?,
  })
}

#[cfg(test)]
mod tests {
  use medblock_core::engine::QueryResult;

  use super::*;

  #[test]
  fn timestamps_are_fixed_width() {
    let a = encode_dt(DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().into());
    let b = encode_dt(DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z").unwrap().into());
    assert_eq!(a, "2024-01-01T00:00:00.000000Z");
    assert_eq!(a.len(), b.len());
    assert!(a < b);
    assert_eq!(decode_dt(&b).unwrap().timestamp_subsec_millis(), 500);
  }

  #[test]
  fn insert_and_update_bind_every_column() {
    let p = NewPatient::new(
      "Ada",
      "Lovelace",
      NaiveDate::from_ymd_opt(1990, 12, 10).unwrap(),
      Gender::Female,
    );
    let now = Utc::now();

    let insert = insert_patient(&p, now);
    assert_eq!(insert.params.len(), PATIENT_COLUMNS.len() + 2);
    assert!(insert.sql.contains("?13"));

    let update = update_patient(9, &p, now);
    assert_eq!(update.params.last(), Some(&Value::Integer(9)));
    assert!(update.sql.contains("WHERE id = ?13"));
    assert!(!update.sql.contains("created_at"));
  }

  #[test]
  fn patient_row_decodes() {
    let result = QueryResult::new(
      [
        "id", "first_name", "last_name", "date_of_birth", "gender", "email", "phone",
        "address", "emergency_contact", "medical_history", "blood_type", "last_visit",
        "created_at", "updated_at",
      ]
      .map(String::from)
      .to_vec(),
      vec![vec![
        Value::Integer(3),
        Value::from("Jane"),
        Value::from("Smith"),
        Value::from("1985-08-22"),
        Value::from("Female"),
        Value::from("jane.smith@email.com"),
        Value::Null,
        Value::Null,
        Value::Null,
        Value::from("Asthma"),
        Value::Null,
        Value::from("2024-04-01"),
        Value::from("2024-04-01T10:00:00.000000Z"),
        Value::from("2024-04-02T10:00:00.000000Z"),
      ]],
      0,
    );
    let p = patient_from_row(result.first().unwrap()).unwrap();
    assert_eq!(p.id, 3);
    assert_eq!(p.details.gender, Gender::Female);
    assert_eq!(p.details.phone, None);
    assert_eq!(p.details.last_visit, NaiveDate::from_ymd_opt(2024, 4, 1));
    assert!(p.updated_at > p.created_at);
  }

  #[test]
  fn bad_gender_is_a_decode_error() {
    let result = QueryResult::new(
      vec!["gender".into()],
      vec![vec![Value::from("Unknown")]],
      0,
    );
    assert!(matches!(
      patient_from_row(result.first().unwrap()),
      Err(Error::Decode(_))
    ));
  }
}
