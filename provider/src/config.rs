//! Provider configuration

use std::time::Duration;

use crate::error::ProviderError;

/// Default lock-acquisition timeout, in minutes.
pub const DEFAULT_TIMEOUT_IN_MINUTES: u32 = 5;

/// Default scaling factor applied to lock backoff sleeps.
pub const DEFAULT_BACKOFF_MULTIPLIER: f32 = 0.5;

/// Configuration knobs exposed to the driver.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    referential_bucket: String,
    timeout_in_minutes: u32,
    backoff_multiplier: f32,
}

impl ProviderConfig {
    /// Build a configuration for the given referential bucket.
    ///
    /// The bucket is the only required knob; an empty name is rejected.
    pub fn new(referential_bucket: impl Into<String>) -> Result<Self, ProviderError> {
        let referential_bucket = referential_bucket.into();
        if referential_bucket.is_empty() {
            return Err(ProviderError::InvalidConfig(
                "referential_bucket is not set".to_string(),
            ));
        }
        Ok(Self {
            referential_bucket,
            timeout_in_minutes: DEFAULT_TIMEOUT_IN_MINUTES,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        })
    }

    /// Override the lock-acquisition timeout.
    pub fn with_timeout_in_minutes(mut self, minutes: u32) -> Self {
        self.timeout_in_minutes = minutes;
        self
    }

    /// Override the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn referential_bucket(&self) -> &str {
        &self.referential_bucket
    }

    /// The lock-acquisition timeout as a [`Duration`].
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_in_minutes) * 60)
    }

    pub fn backoff_multiplier(&self) -> f32 {
        self.backoff_multiplier
    }
}
