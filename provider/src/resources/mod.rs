//! Resource operations
//!
//! Handles: id_pool, id_request, network_request. Every mutating operation
//! follows the same shape: acquire the advisory lock on the target object,
//! read state (through the cache where allowed), mutate in memory, write
//! back conditional on the observed generation, release the lock.

pub mod id_pool;
pub mod id_request;
#[cfg(test)]
mod id_request_test;
pub mod network_request;
#[cfg(test)]
mod network_request_test;
