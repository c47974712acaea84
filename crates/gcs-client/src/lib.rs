//! GCS object gateway
//!
//! A small client layer for coordinating state files in a shared GCS
//! bucket: typed reads and generation-conditional writes against single
//! objects, plus an advisory lock protocol built on create-if-absent
//! writes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use gcs_client::{GcsClient, GcsConnector};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), gcs_client::StoreError> {
//! let store = Arc::new(GcsClient::new()?);
//! let mut connector = GcsConnector::for_id_pool(store, "my-bucket", "my-pool");
//!
//! // Mutations happen under the advisory lock, and every write is a
//! // compare-and-swap on the generation observed by the last read.
//! let cancel = CancellationToken::new();
//! let lock_id = connector
//!     .wait_for_lock(Duration::from_secs(300), 0.5, None, &cancel)
//!     .await?;
//! let mut value: serde_json::Value = connector.read().await?;
//! value["touched"] = serde_json::json!(true);
//! connector.write(&value).await?;
//! connector.unlock(lock_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connector;
pub mod error;
pub mod lock;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
#[path = "trait.rs"]
pub mod store_trait;

pub use client::GcsClient;
pub use connector::{GcsConnector, PROVIDER_PREFIX};
pub use error::StoreError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockObjectStore;
pub use store_trait::{ObjectAttrs, ObjectBody, ObjectStore, WritePrecondition, GENERATION_ABSENT};
