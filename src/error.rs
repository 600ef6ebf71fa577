//! Error Types
//!
//! One crate-level error enum covering logical conflicts, I/O and
//! serialization faults, and backend availability.

use std::io;
use thiserror::Error;

/// Result alias used across the crate
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by stores and the store manager
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is already present in the store
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// The key is not present in the store
    #[error("key does not exist: {0}")]
    DoesNotExist(String),

    /// The backend does not support the requested operation
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// A value could not be encoded or decoded
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// An I/O fault on the normal operation path
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The manager could not instantiate or reach a backend
    #[error("store not available: {0}")]
    NotAvailable(String),
}

impl StoreError {
    /// True for the "key is absent" logical conflict.
    ///
    /// Eviction passes racing an explicit removal use this to treat
    /// "already gone" as a normal outcome.
    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, Self::DoesNotExist(_))
    }

    /// True for the "key is present" logical conflict
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}
