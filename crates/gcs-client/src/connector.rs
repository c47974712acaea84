//! Stateful gateway to one object
//!
//! A [`GcsConnector`] binds a store, a bucket and one object path, and
//! remembers the object's last observed generation. Writes are always
//! conditional on that generation: `-1` (never observed) becomes a
//! does-not-exist condition, anything else a generation-match condition.
//! That turns every read-modify-write through a connector into a
//! compare-and-swap against the store.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;
use crate::store_trait::{ObjectAttrs, ObjectStore, WritePrecondition, GENERATION_ABSENT};

/// Root prefix shared by every object this provider manages.
pub const PROVIDER_PREFIX: &str = "gcsreferential";

/// Handle to one object `(bucket, path)` with a remembered generation.
pub struct GcsConnector {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    object_path: String,
    /// Last observed generation; [`GENERATION_ABSENT`] before any
    /// observation or when the object was seen not to exist.
    pub generation: i64,
}

impl GcsConnector {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        object_path: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            object_path: object_path.into(),
            generation: GENERATION_ABSENT,
        }
    }

    /// Connector for a named id pool: `gcsreferential/id_pool/<name>`.
    pub fn for_id_pool(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        pool_name: &str,
    ) -> Self {
        Self::new(store, bucket, format!("{PROVIDER_PREFIX}/id_pool/{pool_name}"))
    }

    /// Connector for a base CIDR's reservation file:
    /// `gcsreferential/cidr-reservation/baseCidr-<sanitized>.json`, where
    /// every `.` and `/` of the base CIDR becomes `-`.
    pub fn for_base_cidr(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        base_cidr: &str,
    ) -> Self {
        let sanitized = base_cidr.replace(['.', '/'], "-");
        Self::new(
            store,
            bucket,
            format!("{PROVIDER_PREFIX}/cidr-reservation/baseCidr-{sanitized}.json"),
        )
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    /// Companion lock object path: `<object_path>.lock`.
    pub fn lock_path(&self) -> String {
        format!("{}.lock", self.object_path)
    }

    pub(crate) fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    /// Read and deserialize the object, updating the remembered generation.
    ///
    /// On failure the remembered generation is left untouched.
    pub async fn read<T: DeserializeOwned>(&mut self) -> Result<T, StoreError> {
        let body = match self.store.get(&self.bucket, &self.object_path).await {
            Ok(body) => body,
            Err(err) if err.is_not_found() => {
                debug!("Bucket object does not exist: {}", self.object_path);
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        self.generation = body.attrs.generation;
        let value = serde_json::from_slice(&body.bytes)?;
        Ok(value)
    }

    /// Fetch current attributes without the body, updating the remembered
    /// generation on success. NotFound is returned distinctly.
    pub async fn get_attrs(&mut self) -> Result<ObjectAttrs, StoreError> {
        let attrs = self.store.get_attrs(&self.bucket, &self.object_path).await?;
        self.generation = attrs.generation;
        Ok(attrs)
    }

    /// Serialize and write the object, conditional on the remembered
    /// generation; on success the remembered generation advances to the
    /// stored result's.
    pub async fn write<T: Serialize>(&mut self, value: &T) -> Result<(), StoreError> {
        let body = serde_json::to_vec(value)?;
        let precondition = if self.generation == GENERATION_ABSENT {
            WritePrecondition::DoesNotExist
        } else {
            WritePrecondition::GenerationMatch(self.generation)
        };
        let attrs = self
            .store
            .put(&self.bucket, &self.object_path, body, precondition)
            .await?;
        self.generation = attrs.generation;
        Ok(())
    }

    /// Delete the object unconditionally. NotFound propagates; callers that
    /// treat "already gone" as success check [`StoreError::is_not_found`].
    pub async fn delete(&self) -> Result<(), StoreError> {
        self.store.delete(&self.bucket, &self.object_path).await
    }
}
