//! Persistence layer: libSQL-backed storage for the catalog and reservations.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{LibraryStore, ReserveOutcome};
