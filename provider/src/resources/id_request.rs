//! id_request resource
//!
//! An id_request reserves one id from a named pool under a stable owner
//! key. The reservation lives inside the pool file; every mutation locks
//! the pool, goes through the cached pool entry, and commits with a
//! generation-conditional write.

use referential_tools::Id;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::GcsReferentialProvider;

/// Desired reservation, as planned by the driver.
#[derive(Debug, Clone)]
pub struct IdRequestSpec {
    /// Owner key under which the id is reserved.
    pub id: String,
    /// Name of the pool to draw from.
    pub pool: String,
}

/// Observed reservation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRequestState {
    pub id: String,
    pub pool: String,
    pub requested_id: Id,
}

impl GcsReferentialProvider {
    /// Reserve a free id from the pool under the spec's owner key.
    pub async fn create_id_request(
        &self,
        spec: &IdRequestSpec,
        cancel: &CancellationToken,
    ) -> Result<IdRequestState, ProviderError> {
        let mut connector = self.pool_connector(&spec.pool);
        let lock_id = self.acquire_lock(&connector, None, cancel).await?;
        let result = self.create_id_request_locked(&mut connector, spec).await;
        self.release_lock(&connector, lock_id).await;
        result
    }

    async fn create_id_request_locked(
        &self,
        connector: &mut gcs_client::GcsConnector,
        spec: &IdRequestSpec,
    ) -> Result<IdRequestState, ProviderError> {
        let entry = match self.cache.get(&spec.pool, connector).await {
            Ok(entry) => entry,
            Err(err) if err.is_not_found() => {
                return Err(ProviderError::PoolNotFound(spec.pool.clone()))
            }
            Err(err) => return Err(err.into()),
        };
        let mut state = entry.state.lock().await;

        if state.pool.get(&spec.id).is_some() {
            return Err(ProviderError::AlreadyReserved {
                target: spec.pool.clone(),
                owner_key: spec.id.clone(),
            });
        }

        let saved = state.pool.clone();
        let Some(requested_id) = state.pool.allocate(&spec.id) else {
            return Err(ProviderError::NoIdAvailable(spec.pool.clone()));
        };
        if let Err(err) = connector.write(&state.pool).await {
            // Discard the in-memory allocation; nothing was committed.
            state.pool = saved;
            return Err(err.into());
        }
        state.generation = connector.generation;
        debug!(
            "Reserved id {} in pool {} for {}",
            requested_id, spec.pool, spec.id
        );

        Ok(IdRequestState {
            id: spec.id.clone(),
            pool: spec.pool.clone(),
            requested_id,
        })
    }

    /// Read a reservation. `Ok(None)` when the pool or the member is gone.
    pub async fn read_id_request(
        &self,
        pool: &str,
        owner_key: &str,
    ) -> Result<Option<IdRequestState>, ProviderError> {
        let mut connector = self.pool_connector(pool);
        let entry = match self.cache.get(pool, &mut connector).await {
            Ok(entry) => entry,
            Err(err) if err.is_not_found() => {
                warn!(
                    "Pool {} not found, removing id_request {} from state",
                    pool, owner_key
                );
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let state = entry.state.lock().await;
        match state.pool.get(owner_key) {
            Some(requested_id) => Ok(Some(IdRequestState {
                id: owner_key.to_string(),
                pool: pool.to_string(),
                requested_id,
            })),
            None => {
                warn!(
                    "id_request {} not found in pool {}, removing from state",
                    owner_key, pool
                );
                Ok(None)
            }
        }
    }

    /// Move a reservation to a new owner key, preserving its id.
    pub async fn update_id_request(
        &self,
        old_key: &str,
        spec: &IdRequestSpec,
        cancel: &CancellationToken,
    ) -> Result<IdRequestState, ProviderError> {
        let mut connector = self.pool_connector(&spec.pool);
        let lock_id = self.acquire_lock(&connector, None, cancel).await?;
        let result = self
            .update_id_request_locked(&mut connector, old_key, spec)
            .await;
        self.release_lock(&connector, lock_id).await;
        result
    }

    async fn update_id_request_locked(
        &self,
        connector: &mut gcs_client::GcsConnector,
        old_key: &str,
        spec: &IdRequestSpec,
    ) -> Result<IdRequestState, ProviderError> {
        let entry = match self.cache.get(&spec.pool, connector).await {
            Ok(entry) => entry,
            Err(err) if err.is_not_found() => {
                return Err(ProviderError::PoolNotFound(spec.pool.clone()))
            }
            Err(err) => return Err(err.into()),
        };
        let mut state = entry.state.lock().await;

        let Some(requested_id) = state.pool.get(old_key) else {
            return Err(ProviderError::RequestNotFound {
                pool: spec.pool.clone(),
                owner_key: old_key.to_string(),
            });
        };

        if old_key != spec.id {
            if state.pool.get(&spec.id).is_some() {
                return Err(ProviderError::AlreadyReserved {
                    target: spec.pool.clone(),
                    owner_key: spec.id.clone(),
                });
            }
            // A rename moves the member key only; the id stays reserved and
            // the free set is untouched.
            let saved = state.pool.clone();
            state.pool.rename(old_key, &spec.id);
            if let Err(err) = connector.write(&state.pool).await {
                state.pool = saved;
                return Err(err.into());
            }
            state.generation = connector.generation;
        }

        Ok(IdRequestState {
            id: spec.id.clone(),
            pool: spec.pool.clone(),
            requested_id,
        })
    }

    /// Release a reservation. A missing pool or member counts as already
    /// deleted.
    pub async fn delete_id_request(
        &self,
        pool: &str,
        owner_key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let mut connector = self.pool_connector(pool);
        let lock_id = self.acquire_lock(&connector, None, cancel).await?;
        let result = self
            .delete_id_request_locked(&mut connector, pool, owner_key)
            .await;
        self.release_lock(&connector, lock_id).await;
        result
    }

    async fn delete_id_request_locked(
        &self,
        connector: &mut gcs_client::GcsConnector,
        pool: &str,
        owner_key: &str,
    ) -> Result<(), ProviderError> {
        let entry = match self.cache.get(pool, connector).await {
            Ok(entry) => entry,
            Err(err) if err.is_not_found() => {
                debug!(
                    "Pool {} already gone, nothing to release for {}",
                    pool, owner_key
                );
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let mut state = entry.state.lock().await;

        let Some(value) = state.pool.get(owner_key) else {
            debug!("id_request {} already released from pool {}", owner_key, pool);
            return Ok(());
        };

        let saved = state.pool.clone();
        state.pool.release(value);
        if let Err(err) = connector.write(&state.pool).await {
            state.pool = saved;
            return Err(err.into());
        }
        state.generation = connector.generation;
        Ok(())
    }

    /// Import identifier for an id_request: `pool_name/request_id`.
    pub fn import_id_request(&self, id: &str) -> Result<(String, String), ProviderError> {
        let parts: Vec<&str> = id.split('/').collect();
        match parts.as_slice() {
            [pool, owner_key] if !pool.is_empty() && !owner_key.is_empty() => {
                Ok((pool.to_string(), owner_key.to_string()))
            }
            _ => Err(ProviderError::InvalidImportId {
                id: id.to_string(),
                expected: "pool_name/request_id".to_string(),
            }),
        }
    }
}
