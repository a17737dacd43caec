//! In-memory object storage for Rustack Transfer.
//!
//! [`InMemoryObjectStorage`] implements
//! [`ObjectStorage`](rustack_transfer_model::ObjectStorage) entirely in
//! process. It backs the transfer engine's tests and works as a local
//! stand-in for a real object store.

pub mod checksums;
pub mod storage;

pub use storage::{InMemoryObjectStorage, MemoryStorageConfig};
