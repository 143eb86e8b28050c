//! Concrete storage adapters, gated behind feature flags. The core
//! module tree never depends on these directly - everything upstream
//! talks to the `collaborators::MemoryStore`/`FtsIndex` traits.

#[cfg(feature = "sqlite-store")]
pub mod sqlite;

#[cfg(feature = "sqlite-store")]
pub use sqlite::SqliteStore;
