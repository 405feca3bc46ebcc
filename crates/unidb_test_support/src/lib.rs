//! In-memory fake executors for the adapter and façade test suites.
//!
//! Each fake records every call it receives and replays scripted outcomes,
//! so tests can assert on the exact statements, filters, and scripts the
//! adapters emit without a live server.

mod fake_document;
mod fake_search;
mod fake_sql;
mod fixtures;

pub use fake_document::{FakeDocumentExecutor, RecordedDocumentCall};
pub use fake_search::{FakeSearchExecutor, RecordedSearchCall};
pub use fake_sql::{FakeSqlExecutor, RecordedStatement};
pub use fixtures::{doc, docs, users_schema};
