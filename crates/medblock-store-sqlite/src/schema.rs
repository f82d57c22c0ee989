//! SQL schema and sample data for the MedBlock SQLite store.
//!
//! Executed once per successful session initialization. Every statement is
//! idempotent thanks to `IF NOT EXISTS`.

use medblock_core::engine::{Statement, Value};

pub const CREATE_PATIENTS: &str = "
CREATE TABLE IF NOT EXISTS patients (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,  -- never reused
    first_name        TEXT NOT NULL CHECK (length(trim(first_name)) > 0),
    last_name         TEXT NOT NULL CHECK (length(trim(last_name)) > 0),
    date_of_birth     TEXT NOT NULL,   -- ISO 8601 date
    gender            TEXT NOT NULL,   -- 'Male' | 'Female' | 'Other'
    email             TEXT UNIQUE,     -- lower-cased; NULL when absent
    phone             TEXT,
    address           TEXT,
    emergency_contact TEXT,
    medical_history   TEXT,
    blood_type        TEXT,
    last_visit        TEXT,            -- ISO 8601 date or NULL
    created_at        TEXT NOT NULL,   -- RFC 3339 UTC, fixed width
    updated_at        TEXT NOT NULL
)";

// Append-only. No UPDATE or DELETE is ever issued against this table, and
// entries outlive the patients they describe.
pub const CREATE_AUDIT_LOG: &str = "
CREATE TABLE IF NOT EXISTS audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    action      TEXT NOT NULL CHECK (action IN ('CREATE', 'UPDATE', 'DELETE')),
    table_name  TEXT NOT NULL,
    record_id   INTEGER NOT NULL,
    changes     TEXT,                  -- JSON snapshot of the written payload
    created_at  TEXT NOT NULL
)";

const CREATE_INDEXES: &[&str] = &[
  "CREATE INDEX IF NOT EXISTS patients_created_idx ON patients(created_at)",
  "CREATE INDEX IF NOT EXISTS audit_record_idx ON audit_log(record_id)",
];

/// Schema DDL, run in a single transaction.
pub fn statements() -> Vec<Statement> {
  [CREATE_PATIENTS, CREATE_AUDIT_LOG]
    .into_iter()
    .chain(CREATE_INDEXES.iter().copied())
    .map(Statement::new)
    .collect()
}

pub const COUNT_PATIENTS: &str = "SELECT COUNT(*) AS count FROM patients";

const SEED_PATIENTS: &str = "
INSERT INTO patients (
    first_name, last_name, date_of_birth, gender, email, phone, address,
    medical_history, last_visit, created_at, updated_at
) VALUES
    ('John', 'Doe', '1980-05-15', 'Male', 'john.doe@email.com', '555-0123',
     '123 Main St, City', 'Hypertension, Type 2 Diabetes', '2024-03-15', ?1, ?1),
    ('Jane', 'Smith', '1985-08-22', 'Female', 'jane.smith@email.com', '555-0124',
     '456 Oak Ave, Town', 'Asthma', '2024-04-01', ?1, ?1),
    ('Michael', 'Johnson', '1975-11-30', 'Male', 'michael.j@email.com', '555-0125',
     '789 Pine Rd, Village', 'Arthritis', '2024-03-28', ?1, ?1)";

/// Sample rows inserted into an empty store; `now` stamps both timestamps.
pub fn seed(now: &str) -> Statement {
  Statement::with_params(SEED_PATIENTS, vec![Value::from(now)])
}

pub const SEED_COUNT: i64 = 3;
