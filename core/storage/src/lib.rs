//! Key-value persistence for attrsync.
//!
//! The sync core never talks to a concrete database. It reads and writes
//! JSON values by key through the [`KeyValueStore`] trait, and absence of a
//! key is always a valid answer.
//!
//! # Backends
//! - [`MemoryStore`]: process-local, used by tests and ephemeral sessions
//! - [`FileStore`]: a single JSON document on disk

pub mod keys;
pub mod local;
pub mod memory;
pub mod store;

pub use local::FileStore;
pub use memory::MemoryStore;
pub use store::{KeyValueStore, KeyValueStoreExt};
