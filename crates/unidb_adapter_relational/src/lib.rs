//! Relational adapter: implements the uniform operation contract over a
//! [`unidb_core::SqlExecutor`] by compiling the document algebra through the
//! translator and builder, with single-row emulation, upsert, and
//! two-query lookup.

mod adapter;

pub use adapter::{RelationalAdapter, RelationalScope};
