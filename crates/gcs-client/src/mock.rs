//! Mock ObjectStore for unit testing
//!
//! In-memory implementation of [`ObjectStore`] with real generation and
//! precondition semantics: every successful write bumps a monotone
//! generation counter, and preconditions are evaluated atomically under one
//! lock, so tests exercise the same compare-and-swap behavior the real
//! store provides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::StoreError;
use crate::store_trait::{ObjectAttrs, ObjectBody, ObjectStore, WritePrecondition};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    generation: i64,
}

#[derive(Debug, Default)]
struct MockState {
    objects: HashMap<(String, String), StoredObject>,
    next_generation: i64,
    fail_deletes: u32,
}

/// Mock object store for testing
///
/// Clones share the same underlying state, so several "processes" in a test
/// can observe one bucket.
#[derive(Clone, Default)]
pub struct MockObjectStore {
    state: Arc<Mutex<MockState>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing preconditions (test setup).
    pub fn insert_object(&self, bucket: &str, path: &str, bytes: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.objects.insert(
            (bucket.to_string(), path.to_string()),
            StoredObject { bytes, generation },
        );
    }

    /// Current body of an object, if present (test assertions).
    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .map(|stored| stored.bytes.clone())
    }

    /// Remove an object directly (e.g. simulating manual lock cleanup).
    pub fn remove_object(&self, bucket: &str, path: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        state
            .objects
            .remove(&(bucket.to_string(), path.to_string()))
            .is_some()
    }

    /// Make the next `count` delete calls fail with a transport-style error.
    pub fn fail_next_deletes(&self, count: u32) {
        self.state.lock().unwrap().fail_deletes = count;
    }
}

#[async_trait::async_trait]
impl ObjectStore for MockObjectStore {
    async fn get(&self, bucket: &str, path: &str) -> Result<ObjectBody, StoreError> {
        let state = self.state.lock().unwrap();
        let stored = state
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        Ok(ObjectBody {
            bytes: stored.bytes.clone(),
            attrs: ObjectAttrs {
                generation: stored.generation,
            },
        })
    }

    async fn get_attrs(&self, bucket: &str, path: &str) -> Result<ObjectAttrs, StoreError> {
        let state = self.state.lock().unwrap();
        let stored = state
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        Ok(ObjectAttrs {
            generation: stored.generation,
        })
    }

    async fn put(
        &self,
        bucket: &str,
        path: &str,
        body: Vec<u8>,
        precondition: WritePrecondition,
    ) -> Result<ObjectAttrs, StoreError> {
        let mut state = self.state.lock().unwrap();
        let key = (bucket.to_string(), path.to_string());
        let current = state.objects.get(&key).map(|stored| stored.generation);
        match precondition {
            WritePrecondition::DoesNotExist => {
                if current.is_some() {
                    return Err(StoreError::Conflict {
                        path: path.to_string(),
                        generation: 0,
                    });
                }
            }
            WritePrecondition::GenerationMatch(expected) => {
                if current != Some(expected) {
                    return Err(StoreError::Conflict {
                        path: path.to_string(),
                        generation: expected,
                    });
                }
            }
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        state.objects.insert(key, StoredObject { bytes: body, generation });
        Ok(ObjectAttrs { generation })
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes > 0 {
            state.fail_deletes -= 1;
            return Err(StoreError::Api(format!(
                "injected delete failure for {bucket}/{path}"
            )));
        }
        state
            .objects
            .remove(&(bucket.to_string(), path.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}
