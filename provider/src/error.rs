//! Provider-level error types.
//!
//! This enum is the surface the driver sees: storage and allocator errors
//! convert into it, and the reservation-specific failures carry
//! human-readable reasons naming the object involved.

use gcs_client::StoreError;
use referential_tools::{CidrError, PoolError};
use thiserror::Error;

/// Errors surfaced by resource operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Object store or lock protocol error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Id pool allocator error
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Subnet calculator error
    #[error(transparent)]
    Cidr(#[from] CidrError),

    /// Invalid provider configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Pool creation found the pool file already present
    #[error("cannot create id_pool '{0}': it already exist, consider to import it")]
    PoolAlreadyExists(String),

    /// A pool the operation depends on is gone
    #[error("cannot find pool '{0}' on the referential_bucket")]
    PoolNotFound(String),

    /// The owner key already holds a reservation
    #[error("a reservation already exist for id '{owner_key}' on '{target}', check your config or consider to import")]
    AlreadyReserved { target: String, owner_key: String },

    /// The pool's free set is empty
    #[error("there is no more id available in pool '{0}'")]
    NoIdAvailable(String),

    /// An id_request the operation depends on is gone
    #[error("cannot find id_request '{owner_key}' in pool '{pool}' on the referential_bucket")]
    RequestNotFound { pool: String, owner_key: String },

    /// Import identifier does not match the expected format
    #[error("unexpected import identifier '{id}': expected {expected}")]
    InvalidImportId { id: String, expected: String },
}
