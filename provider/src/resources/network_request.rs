//! network_request resource
//!
//! A network_request carves one subnet of a fixed prefix length out of a
//! base CIDR. All reservations against a base CIDR live in one object at
//! `gcsreferential/cidr-reservation/baseCidr-<sanitized>.json`; packing is
//! lowest-address-first, so freed subnets are reused before fresh space.

use std::collections::BTreeMap;

use referential_tools::CidrCalculator;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::GcsReferentialProvider;

/// Wire format of a base CIDR's reservation file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Owner key to reserved CIDR.
    #[serde(default)]
    pub subnets: BTreeMap<String, String>,
}

/// Desired subnet reservation, as planned by the driver.
#[derive(Debug, Clone)]
pub struct NetworkRequestSpec {
    /// Owner key under which the subnet is reserved.
    pub id: String,
    /// Supernet to carve from, e.g. `10.0.0.0/8`.
    pub base_cidr: String,
    /// Prefix length of the requested subnet, e.g. `24` for a /24.
    pub prefix_length: u8,
}

/// Observed reservation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequestState {
    pub id: String,
    pub base_cidr: String,
    pub prefix_length: u8,
    /// The reserved subnet as a full CIDR, e.g. `10.12.13.0/24`.
    pub netmask: String,
}

impl GcsReferentialProvider {
    /// Reserve the lowest free subnet of the requested prefix length.
    pub async fn create_network_request(
        &self,
        spec: &NetworkRequestSpec,
        cancel: &CancellationToken,
    ) -> Result<NetworkRequestState, ProviderError> {
        let mut connector = self.network_connector(&spec.base_cidr);
        let lock_id = self.acquire_lock(&connector, None, cancel).await?;
        let result = self
            .create_network_request_locked(&mut connector, spec)
            .await;
        self.release_lock(&connector, lock_id).await;
        result
    }

    async fn create_network_request_locked(
        &self,
        connector: &mut gcs_client::GcsConnector,
        spec: &NetworkRequestSpec,
    ) -> Result<NetworkRequestState, ProviderError> {
        // An absent file means no reservations yet; the connector keeps the
        // absent generation so the write below creates the file atomically.
        let mut config: NetworkConfig = match connector.read().await {
            Ok(config) => config,
            Err(err) if err.is_not_found() => NetworkConfig::default(),
            Err(err) => return Err(err.into()),
        };

        if config.subnets.contains_key(&spec.id) {
            return Err(ProviderError::AlreadyReserved {
                target: spec.base_cidr.clone(),
                owner_key: spec.id.clone(),
            });
        }

        let netmask = {
            let calculator =
                CidrCalculator::new(&config.subnets, spec.prefix_length, &spec.base_cidr)?;
            calculator.get_next_netmask()?
        };
        config.subnets.insert(spec.id.clone(), netmask.clone());
        connector.write(&config).await?;
        debug!(
            "Reserved subnet {} in {} for {}",
            netmask, spec.base_cidr, spec.id
        );

        Ok(NetworkRequestState {
            id: spec.id.clone(),
            base_cidr: spec.base_cidr.clone(),
            prefix_length: spec.prefix_length,
            netmask,
        })
    }

    /// Read a reservation. `Ok(None)` when the file or the entry is gone.
    pub async fn read_network_request(
        &self,
        base_cidr: &str,
        owner_key: &str,
    ) -> Result<Option<NetworkRequestState>, ProviderError> {
        let mut connector = self.network_connector(base_cidr);
        let config: NetworkConfig = match connector.read().await {
            Ok(config) => config,
            Err(err) if err.is_not_found() => {
                warn!(
                    "Network config for {} not found, removing {} from state",
                    base_cidr, owner_key
                );
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        match config.subnets.get(owner_key) {
            Some(netmask) => {
                let prefix_length = netmask
                    .rsplit('/')
                    .next()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or_default();
                Ok(Some(NetworkRequestState {
                    id: owner_key.to_string(),
                    base_cidr: base_cidr.to_string(),
                    prefix_length,
                    netmask: netmask.clone(),
                }))
            }
            None => {
                warn!(
                    "Network request {} not found in {}, removing from state",
                    owner_key, base_cidr
                );
                Ok(None)
            }
        }
    }

    /// An update has nothing to change remotely: the base CIDR and prefix
    /// length both force replacement at the driver level, and the owner key
    /// is the identity. The current state is echoed back.
    pub fn update_network_request(&self, current: &NetworkRequestState) -> NetworkRequestState {
        current.clone()
    }

    /// Release a reservation. A missing file or entry counts as already
    /// deleted.
    pub async fn delete_network_request(
        &self,
        base_cidr: &str,
        owner_key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let mut connector = self.network_connector(base_cidr);
        let lock_id = self.acquire_lock(&connector, None, cancel).await?;
        let result = self
            .delete_network_request_locked(&mut connector, base_cidr, owner_key)
            .await;
        self.release_lock(&connector, lock_id).await;
        result
    }

    async fn delete_network_request_locked(
        &self,
        connector: &mut gcs_client::GcsConnector,
        base_cidr: &str,
        owner_key: &str,
    ) -> Result<(), ProviderError> {
        let mut config: NetworkConfig = match connector.read().await {
            Ok(config) => config,
            Err(err) if err.is_not_found() => {
                debug!(
                    "Network config for {} already gone, nothing to release for {}",
                    base_cidr, owner_key
                );
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        if config.subnets.remove(owner_key).is_none() {
            debug!(
                "Network request {} already released from {}",
                owner_key, base_cidr
            );
            return Ok(());
        }
        connector.write(&config).await?;
        Ok(())
    }

    /// Import identifier for a network_request: the owner key.
    pub fn import_network_request(&self, id: &str) -> Result<String, ProviderError> {
        if id.is_empty() {
            return Err(ProviderError::InvalidImportId {
                id: id.to_string(),
                expected: "a network_request id".to_string(),
            });
        }
        Ok(id.to_string())
    }
}
