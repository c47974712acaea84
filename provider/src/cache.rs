//! Generation-validated pool cache.
//!
//! Per-process cache of deserialized id pools, keyed by pool name. A lookup
//! always asks the store for the object's current generation first, so a
//! cached entry is only ever returned when it matches remote state. The
//! cache is trustworthy for mutation only while the caller holds the
//! distributed lock on the pool: the lock guarantees no other writer can
//! advance the generation underneath us.
//!
//! Lock ordering: the map mutex is taken before any entry's state mutex,
//! and entry mutexes are never held while calling back into the cache.

use std::collections::HashMap;
use std::sync::Arc;

use gcs_client::{GcsConnector, StoreError, GENERATION_ABSENT};
use referential_tools::IdPool;
use tokio::sync::Mutex;
use tracing::debug;

/// A cached pool together with the generation it was read at.
#[derive(Debug)]
pub struct PoolState {
    pub pool: IdPool,
    pub generation: i64,
}

/// One cache entry; its mutex serializes in-process mutations of the pool.
#[derive(Debug)]
pub struct CachedPool {
    pub state: Mutex<PoolState>,
}

/// Process-wide cache of id pools.
#[derive(Default)]
pub struct PoolCache {
    pools: Mutex<HashMap<String, Arc<CachedPool>>>,
}

impl PoolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return an up-to-date entry for `pool_name`, reading through
    /// `connector` when the cache misses or is stale.
    ///
    /// Always refreshes `connector.generation` from the observed remote
    /// state first, so a later conditional write through the same connector
    /// carries the right precondition. A missing remote object evicts any
    /// stale entry and surfaces as [`StoreError::NotFound`].
    pub async fn get(
        &self,
        pool_name: &str,
        connector: &mut GcsConnector,
    ) -> Result<Arc<CachedPool>, StoreError> {
        let mut pools = self.pools.lock().await;

        let remote_generation = match connector.get_attrs().await {
            Ok(attrs) => attrs.generation,
            Err(err) if err.is_not_found() => GENERATION_ABSENT,
            Err(err) => return Err(err),
        };
        // Always track what was just observed, even on a miss: a create path
        // relies on the does-not-exist precondition this produces.
        connector.generation = remote_generation;

        if remote_generation == GENERATION_ABSENT {
            pools.remove(pool_name);
            return Err(StoreError::NotFound(connector.object_path().to_string()));
        }

        if let Some(entry) = pools.get(pool_name) {
            let state = entry.state.lock().await;
            if state.generation == remote_generation {
                debug!(
                    "Cache hit for pool {} (generation {})",
                    pool_name, remote_generation
                );
                drop(state);
                return Ok(Arc::clone(entry));
            }
        }

        debug!("Cache miss for pool {}", pool_name);
        let mut pool: IdPool = match connector.read().await {
            Ok(pool) => pool,
            Err(err) => {
                if err.is_not_found() {
                    pools.remove(pool_name);
                }
                return Err(err);
            }
        };
        // The free set is derived state; rebuild it from the members map.
        pool.reconcile();

        let entry = Arc::new(CachedPool {
            state: Mutex::new(PoolState {
                pool,
                generation: connector.generation,
            }),
        });
        pools.insert(pool_name.to_string(), Arc::clone(&entry));
        debug!(
            "Cached new pool version for {} (generation {})",
            pool_name, connector.generation
        );
        Ok(entry)
    }

    /// Drop the entry for `pool_name`, forcing the next lookup to re-read.
    pub async fn invalidate(&self, pool_name: &str) {
        self.pools.lock().await.remove(pool_name);
    }
}
