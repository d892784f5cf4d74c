//! Record store: SQLite-backed index of entries and notification attempts.
//!
//! - `query`: composable predicates and sort orders, compiled to SQL.
//! - `model`: row shapes and their conversion into domain records.
//! - `repo`: pool setup, migrations and the [`EntryStore`] implementation.
//!
//! Callers import from `publ_index::db`; the repository API is re-exported.

pub mod model;
pub mod query;
pub mod repo;

pub use query::{Cmp, Direction, Field, Predicate, Query, Value};
pub use repo::*;
