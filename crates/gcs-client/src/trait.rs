//! ObjectStore trait for mocking
//!
//! This trait abstracts the raw object store so the provider and its tests
//! can run against an in-memory implementation. The concrete [`GcsClient`]
//! implements it against the GCS JSON API.
//!
//! [`GcsClient`]: crate::client::GcsClient

use crate::error::StoreError;

/// Generation sentinel meaning "the object was not observed to exist".
pub const GENERATION_ABSENT: i64 = -1;

/// Metadata returned by the store for an existing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectAttrs {
    /// Monotone version token assigned by the store on every write.
    pub generation: i64,
}

/// An object's body together with the attributes observed alongside it.
#[derive(Debug, Clone)]
pub struct ObjectBody {
    pub bytes: Vec<u8>,
    pub attrs: ObjectAttrs,
}

/// Condition attached to a write, evaluated atomically by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePrecondition {
    /// The object must not exist yet.
    DoesNotExist,
    /// The object's current generation must equal the given value.
    GenerationMatch(i64),
}

/// Raw operations against a bucket of objects.
///
/// All async methods must be `Send` to work with Tokio's work-stealing
/// runtime. A failed precondition surfaces as [`StoreError::Conflict`]; a
/// missing object as [`StoreError::NotFound`].
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's body and current attributes.
    async fn get(&self, bucket: &str, path: &str) -> Result<ObjectBody, StoreError>;

    /// Fetch an object's attributes without the body.
    async fn get_attrs(&self, bucket: &str, path: &str) -> Result<ObjectAttrs, StoreError>;

    /// Write an object under the given precondition and return the
    /// attributes of the stored result.
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        body: Vec<u8>,
        precondition: WritePrecondition,
    ) -> Result<ObjectAttrs, StoreError>;

    /// Delete an object unconditionally.
    async fn delete(&self, bucket: &str, path: &str) -> Result<(), StoreError>;
}
