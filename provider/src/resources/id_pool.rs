//! id_pool resource
//!
//! A pool is one object at `gcsreferential/id_pool/<name>` holding the
//! range and the reservations made against it. The pool name is the
//! resource identity; renames move the file.

use std::collections::BTreeMap;

use referential_tools::{Id, IdPool, PoolError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ProviderError;
use crate::GcsReferentialProvider;

/// First id of a pool when the driver leaves it unset.
pub const DEFAULT_START_FROM: Id = 1;
/// Last id of a pool when the driver leaves it unset.
pub const DEFAULT_END_TO: Id = Id::MAX;

/// Desired pool configuration, as planned by the driver.
#[derive(Debug, Clone)]
pub struct IdPoolSpec {
    /// Unique pool name within the provider.
    pub name: String,
    pub start_from: Option<Id>,
    pub end_to: Option<Id>,
}

impl IdPoolSpec {
    fn start_from(&self) -> Id {
        self.start_from.unwrap_or(DEFAULT_START_FROM)
    }

    fn end_to(&self) -> Id {
        self.end_to.unwrap_or(DEFAULT_END_TO)
    }
}

/// Observed pool state returned to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPoolState {
    pub name: String,
    pub start_from: Id,
    pub end_to: Id,
    /// Owner key to reserved id; read-only from the driver's viewpoint.
    pub reservations: BTreeMap<String, Id>,
}

impl IdPoolState {
    pub(crate) fn from_pool(name: &str, pool: &IdPool) -> Self {
        Self {
            name: name.to_string(),
            start_from: pool.start_from,
            end_to: pool.end_to,
            reservations: pool.members.clone(),
        }
    }
}

impl GcsReferentialProvider {
    /// Create a new pool. Fails when a pool of that name already exists.
    pub async fn create_id_pool(
        &self,
        spec: &IdPoolSpec,
        cancel: &CancellationToken,
    ) -> Result<IdPoolState, ProviderError> {
        let mut connector = self.pool_connector(&spec.name);
        let lock_id = self.acquire_lock(&connector, None, cancel).await?;
        let result = self.create_id_pool_locked(&mut connector, spec).await;
        self.release_lock(&connector, lock_id).await;
        result
    }

    async fn create_id_pool_locked(
        &self,
        connector: &mut gcs_client::GcsConnector,
        spec: &IdPoolSpec,
    ) -> Result<IdPoolState, ProviderError> {
        // Existence check through the cache; a hit means the name is taken.
        match self.cache.get(&spec.name, connector).await {
            Ok(_) => return Err(ProviderError::PoolAlreadyExists(spec.name.clone())),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        let pool = IdPool::new(spec.start_from(), spec.end_to());
        if !pool.is_valid() {
            return Err(PoolError::InvalidRange {
                start_from: spec.start_from(),
                end_to: spec.end_to(),
            }
            .into());
        }

        // The existence check left the generation absent, so this write
        // carries the does-not-exist condition.
        connector.write(&pool).await?;

        // Warm the cache while the lock is still held.
        if let Err(err) = self.cache.get(&spec.name, connector).await {
            warn!(
                "Failed to warm cache for pool {} after creation: {}",
                spec.name, err
            );
        }

        Ok(IdPoolState::from_pool(&spec.name, &pool))
    }

    /// Read a pool's current state. `Ok(None)` means the pool file is gone
    /// and the driver should drop the resource from its state.
    pub async fn read_id_pool(&self, name: &str) -> Result<Option<IdPoolState>, ProviderError> {
        let mut connector = self.pool_connector(name);
        match self.cache.get(name, &mut connector).await {
            Ok(entry) => {
                let state = entry.state.lock().await;
                Ok(Some(IdPoolState::from_pool(name, &state.pool)))
            }
            Err(err) if err.is_not_found() => {
                warn!("Pool {} not found, removing from state", name);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Change a pool's range and/or rename it.
    ///
    /// The whole operation runs under one lock on the *old* name. Every
    /// current reservation must fit the new range. A rename writes the new
    /// path with a does-not-exist condition, then deletes the old file; a
    /// failed old-file delete is only a warning, since the new file is
    /// authoritative from the moment it is written.
    pub async fn update_id_pool(
        &self,
        current_name: &str,
        spec: &IdPoolSpec,
        cancel: &CancellationToken,
    ) -> Result<IdPoolState, ProviderError> {
        let mut connector = self.pool_connector(current_name);
        let lock_id = self.acquire_lock(&connector, None, cancel).await?;
        let result = self
            .update_id_pool_locked(&mut connector, current_name, spec)
            .await;
        self.release_lock(&connector, lock_id).await;
        result
    }

    async fn update_id_pool_locked(
        &self,
        connector: &mut gcs_client::GcsConnector,
        current_name: &str,
        spec: &IdPoolSpec,
    ) -> Result<IdPoolState, ProviderError> {
        let name_changed = spec.name != current_name;

        // Read directly, bypassing the cache: a writer may have committed
        // between the last cached read and this lock acquisition, and the
        // generation captured here is the CAS token for the write below.
        let mut pool: IdPool = match connector.read().await {
            Ok(pool) => pool,
            Err(err) if err.is_not_found() => {
                return Err(ProviderError::PoolNotFound(current_name.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        pool.reconcile();

        pool.resize(spec.start_from(), spec.end_to())?;

        if name_changed {
            // Fresh connector, generation absent: the new path must not
            // already exist.
            let mut write_connector = self.pool_connector(&spec.name);
            match write_connector.write(&pool).await {
                Ok(()) => {}
                Err(err) if err.is_conflict() => {
                    return Err(ProviderError::PoolAlreadyExists(spec.name.clone()))
                }
                Err(err) => return Err(err.into()),
            }
            self.cache.invalidate(current_name).await;
            self.cache.invalidate(&spec.name).await;
            if let Err(err) = connector.delete().await {
                warn!(
                    "Renamed pool to '{}' but failed to delete the old file at '{}', manual cleanup may be required: {}",
                    spec.name,
                    connector.object_path(),
                    err
                );
            }
        } else {
            connector.write(&pool).await?;
            self.cache.invalidate(current_name).await;
        }

        Ok(IdPoolState::from_pool(&spec.name, &pool))
    }

    /// Delete a pool. A missing pool file counts as already deleted.
    pub async fn delete_id_pool(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let connector = self.pool_connector(name);
        let lock_id = self.acquire_lock(&connector, None, cancel).await?;
        let result = match connector.delete().await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        };
        self.cache.invalidate(name).await;
        self.release_lock(&connector, lock_id).await;
        result
    }

    /// Import identifier for a pool: the pool name itself.
    pub fn import_id_pool(&self, id: &str) -> Result<String, ProviderError> {
        if id.is_empty() {
            return Err(ProviderError::InvalidImportId {
                id: id.to_string(),
                expected: "a pool name".to_string(),
            });
        }
        Ok(id.to_string())
    }
}
