//! Encrypted key/value persistence over two storage scopes.
//!
//! The [`SecureStore`] wraps every value in a versioned metadata envelope,
//! encrypts it with the pre-provisioned key, and persists the opaque blob
//! under a fixed key prefix. Two scopes are supported: durable storage that
//! survives restarts and a session scope that lives only as long as the
//! process.

mod backend;
mod error;
mod secure_store;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};
pub use error::StoreError;
pub use secure_store::{SecureStore, SecureStoreConfig, StorageEntry, StorageScope};
