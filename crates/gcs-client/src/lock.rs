//! Advisory lock protocol
//!
//! A lock is a companion object at `<object_path>.lock` whose body is the
//! holder's UUID. Mutual exclusion follows from the store's atomic
//! create-if-absent writes; liveness is best effort, bounded by the
//! caller's timeout. A crashed holder leaves the lock behind until someone
//! removes it manually.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::connector::GcsConnector;
use crate::error::StoreError;
use crate::store_trait::WritePrecondition;

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const UNLOCK_DELETE_RETRIES: u32 = 5;
const UNLOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

impl GcsConnector {
    /// Try once to take the lock: create-if-absent with a fresh UUID body.
    ///
    /// A [`StoreError::Conflict`] means another holder won the race.
    pub async fn lock(&self) -> Result<Uuid, StoreError> {
        let lock_path = self.lock_path();
        let lock_id = Uuid::new_v4();
        self.store()
            .put(
                self.bucket(),
                &lock_path,
                lock_id.to_string().into_bytes(),
                WritePrecondition::DoesNotExist,
            )
            .await?;
        debug!("Lock acquired on {} ({})", lock_path, lock_id);
        Ok(lock_id)
    }

    /// Read the current holder's id. NotFound means the lock is free.
    pub async fn current_lock_id(&self) -> Result<Uuid, StoreError> {
        let lock_path = self.lock_path();
        let body = self.store().get(self.bucket(), &lock_path).await?;
        let text = String::from_utf8(body.bytes).map_err(|err| StoreError::InvalidLock {
            path: lock_path.clone(),
            reason: err.to_string(),
        })?;
        Uuid::parse_str(text.trim()).map_err(|err| StoreError::InvalidLock {
            path: lock_path,
            reason: err.to_string(),
        })
    }

    /// Release the lock if and only if we still hold it.
    ///
    /// A mismatched holder id returns [`StoreError::StaleLock`] and leaves
    /// the lock alone. The delete is retried a bounded number of times on
    /// transient store errors; a lock that vanished mid-release counts as
    /// released.
    pub async fn unlock(&self, lock_id: Uuid) -> Result<(), StoreError> {
        let lock_path = self.lock_path();
        let current = self.current_lock_id().await?;
        if current != lock_id {
            debug!(
                "Lock id does not correspond on {}: held by {}, asked to release {}",
                lock_path, current, lock_id
            );
            return Err(StoreError::StaleLock(lock_path));
        }
        let mut attempt = 0;
        loop {
            match self.store().delete(self.bucket(), &lock_path).await {
                Ok(()) => {
                    debug!("Lock released on {} ({})", lock_path, lock_id);
                    return Ok(());
                }
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => {
                    attempt += 1;
                    if attempt >= UNLOCK_DELETE_RETRIES {
                        return Err(err);
                    }
                    debug!(
                        "Retrying lock delete on {} (attempt {}): {}",
                        lock_path, attempt, err
                    );
                    tokio::time::sleep(UNLOCK_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Wait for the lock to be free and take it.
    ///
    /// If `existing_lock` matches the current holder the call is reentrant:
    /// the same id is returned without any write. Iteration `n` of the wait
    /// sleeps `min(n * 1s, 10s)` scaled by `backoff_multiplier`, with
    /// uniform jitter of up to a quarter of the base either way, never past
    /// the remaining time. `cancel` aborts a sleep immediately.
    pub async fn wait_for_lock(
        &self,
        timeout: Duration,
        backoff_multiplier: f32,
        existing_lock: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Uuid, StoreError> {
        let lock_path = self.lock_path();
        let start = Instant::now();
        // A non-positive multiplier would busy-spin against the store.
        let multiplier = if backoff_multiplier > 0.0 {
            backoff_multiplier
        } else {
            1.0
        };
        let mut iteration: u32 = 0;
        loop {
            if start.elapsed() > timeout {
                info!("Cannot wait more for lock {}", lock_path);
                return Err(StoreError::LockTimeout(lock_path));
            }
            match self.current_lock_id().await {
                Ok(current) => {
                    if existing_lock == Some(current) {
                        debug!("Already holding lock {} ({})", lock_path, current);
                        return Ok(current);
                    }
                    debug!("Lock {} held by another process ({})", lock_path, current);
                }
                Err(err) if err.is_not_found() => {
                    // No holder observed; race for it.
                    match self.lock().await {
                        Ok(lock_id) => return Ok(lock_id),
                        Err(err) => {
                            debug!("Failed to create lock {}, waiting: {}", lock_path, err);
                        }
                    }
                }
                Err(err) => {
                    debug!("Failed to read lock {}, waiting: {}", lock_path, err);
                }
            }

            iteration += 1;
            let base = Duration::from_secs(u64::from(iteration))
                .min(MAX_BACKOFF)
                .max(MIN_BACKOFF)
                .mul_f32(multiplier);
            let base_ms = base.as_millis() as u64;
            let sleep_ms = {
                let mut rng = rand::thread_rng();
                let jitter = rng.gen_range(0..(base_ms / 2).max(1));
                base_ms - base_ms / 4 + jitter
            };
            let remaining = timeout.saturating_sub(start.elapsed());
            let sleep_time = Duration::from_millis(sleep_ms).min(remaining);
            if sleep_time.is_zero() {
                return Err(StoreError::LockTimeout(lock_path));
            }
            debug!(
                "Waiting {:?} before new lock try on {} (iteration {})",
                sleep_time, lock_path, iteration
            );
            tokio::select! {
                _ = tokio::time::sleep(sleep_time) => {}
                _ = cancel.cancelled() => {
                    return Err(StoreError::Cancelled(lock_path));
                }
            }
        }
    }
}
