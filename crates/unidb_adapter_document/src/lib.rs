//! Document-store adapter: the caller's filter and update documents are
//! already the store's native algebra, so this adapter passes them through a
//! [`unidb_core::DocumentExecutor`] untranslated.

mod adapter;

pub use adapter::{DocumentAdapter, DocumentScope};
