//! gcsreferential provider engine
//!
//! Manages three kinds of declarative reservations whose authoritative
//! state lives in one shared GCS bucket: named id pools, individual id
//! reservations drawn from those pools, and non-overlapping subnet
//! reservations carved from a base CIDR. Correctness across concurrent
//! operators rests on three layers, composed here:
//!
//! - an advisory lock per state file, built on create-if-absent writes;
//! - generation-conditional (compare-and-swap) writes for every commit;
//! - a per-process, generation-validated cache of deserialized pools.
//!
//! The driver (the surrounding declarative framework) calls one operation
//! per resource action and owns nothing but the returned state.

pub mod cache;
pub mod config;
pub mod error;
pub mod resources;
#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use gcs_client::{GcsClient, GcsConnector, ObjectStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub use cache::{CachedPool, PoolCache, PoolState};
pub use config::{ProviderConfig, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_TIMEOUT_IN_MINUTES};
pub use error::ProviderError;
pub use resources::id_pool::{IdPoolSpec, IdPoolState};
pub use resources::id_request::{IdRequestSpec, IdRequestState};
pub use resources::network_request::{NetworkConfig, NetworkRequestSpec, NetworkRequestState};

/// The provider handle: configuration, store access and the pool cache.
///
/// One instance per process, created when the driver configures the
/// provider and shared by every operation; the cache lives and dies with
/// it.
pub struct GcsReferentialProvider {
    config: ProviderConfig,
    store: Arc<dyn ObjectStore>,
    cache: PoolCache,
}

impl GcsReferentialProvider {
    /// Build a provider backed by the real GCS client.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let store: Arc<dyn ObjectStore> = Arc::new(GcsClient::new()?);
        Ok(Self::with_store(config, store))
    }

    /// Build a provider over any [`ObjectStore`] implementation.
    pub fn with_store(config: ProviderConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config,
            store,
            cache: PoolCache::new(),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub(crate) fn pool_connector(&self, pool_name: &str) -> GcsConnector {
        GcsConnector::for_id_pool(
            Arc::clone(&self.store),
            self.config.referential_bucket(),
            pool_name,
        )
    }

    pub(crate) fn network_connector(&self, base_cidr: &str) -> GcsConnector {
        GcsConnector::for_base_cidr(
            Arc::clone(&self.store),
            self.config.referential_bucket(),
            base_cidr,
        )
    }

    /// Acquire the advisory lock on `connector`'s object with the
    /// configured timeout and backoff.
    pub(crate) async fn acquire_lock(
        &self,
        connector: &GcsConnector,
        existing_lock: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Uuid, ProviderError> {
        let lock_id = connector
            .wait_for_lock(
                self.config.lock_timeout(),
                self.config.backoff_multiplier(),
                existing_lock,
                cancel,
            )
            .await?;
        Ok(lock_id)
    }

    /// Release the lock. A failed release is logged as a warning and never
    /// fails the operation; the orphaned lock needs manual cleanup.
    pub(crate) async fn release_lock(&self, connector: &GcsConnector, lock_id: Uuid) {
        match connector.unlock(lock_id).await {
            Ok(()) => debug!("Unlocked {} ({})", connector.lock_path(), lock_id),
            Err(err) => warn!(
                "Failed to unlock {}, manual intervention may be required to remove the lock file: {}",
                connector.lock_path(),
                err
            ),
        }
    }
}
