//! bloombits-storage — key-value backends for the bloombits index.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement [`bloombits_core::KeyValueStore`] and apply a
//! [`bloombits_core::WriteBatch`] atomically.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
