//! SQLite backend for strata.
//!
//! Implements [`strata_core::store::Store`] using `rusqlite` (bundled SQLite)
//! wrapped in `tokio-rusqlite` for non-blocking access from async code.
//! Schemas, sequences and materialised views are emulated with catalog
//! tables; see [`schema`].

pub mod error;
mod encode;
mod load;
pub mod schema;
mod store;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use store::SqliteStore;
