//! Persistence session for MedBlock, with a SQLite engine.
//!
//! [`Session`] owns the single engine handle for a storage location: it runs
//! initialization at most once at a time, creates and seeds the schema, and
//! serves typed patient CRUD through [`medblock_core::store::PatientStore`].
//! [`SqliteLoader`] wraps [`tokio_rusqlite`] so all database access runs on a
//! dedicated thread without blocking the async runtime.

mod encode;
mod schema;
mod session;
mod sqlite;

pub use medblock_core::store::SessionState;
pub use session::{Session, SessionConfig};
pub use sqlite::{SqliteEngine, SqliteLoader};
