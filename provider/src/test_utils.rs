//! Test utilities for unit testing resource operations.

use std::sync::Arc;

use gcs_client::MockObjectStore;

use crate::{GcsReferentialProvider, ProviderConfig};

pub const TEST_BUCKET: &str = "test-bucket";

/// Provider over a shared mock store. The tiny backoff multiplier keeps
/// contention tests fast while leaving a comfortable lock timeout.
pub fn test_provider(store: &MockObjectStore) -> GcsReferentialProvider {
    let config = ProviderConfig::new(TEST_BUCKET)
        .unwrap()
        .with_timeout_in_minutes(1)
        .with_backoff_multiplier(0.01);
    GcsReferentialProvider::with_store(config, Arc::new(store.clone()))
}

/// Provider whose lock acquisition gives up immediately when the lock is
/// already held (for orphaned-lock scenarios).
pub fn impatient_provider(store: &MockObjectStore) -> GcsReferentialProvider {
    let config = ProviderConfig::new(TEST_BUCKET)
        .unwrap()
        .with_timeout_in_minutes(0)
        .with_backoff_multiplier(0.01);
    GcsReferentialProvider::with_store(config, Arc::new(store.clone()))
}
