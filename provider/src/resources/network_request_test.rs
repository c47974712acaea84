//! Unit tests for the network_request resource

use gcs_client::MockObjectStore;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::resources::network_request::{NetworkConfig, NetworkRequestSpec};
use crate::test_utils::{test_provider, TEST_BUCKET};

const BASE: &str = "10.20.0.0/16";
const BASE_FILE: &str = "gcsreferential/cidr-reservation/baseCidr-10-20-0-0-16.json";

fn request(owner_key: &str, prefix_length: u8) -> NetworkRequestSpec {
    NetworkRequestSpec {
        id: owner_key.to_string(),
        base_cidr: BASE.to_string(),
        prefix_length,
    }
}

fn persisted_config(store: &MockObjectStore) -> NetworkConfig {
    let bytes = store.object(TEST_BUCKET, BASE_FILE).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn sequential_creates_pack_from_the_lowest_address() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    for (owner, expected) in [
        ("r1", "10.20.0.0/24"),
        ("r2", "10.20.1.0/24"),
        ("r3", "10.20.2.0/24"),
    ] {
        let state = provider
            .create_network_request(&request(owner, 24), &cancel)
            .await
            .unwrap();
        assert_eq!(state.netmask, expected, "{owner}");
    }

    // Freeing the middle slot makes it the next candidate again.
    provider
        .delete_network_request(BASE, "r2", &cancel)
        .await
        .unwrap();
    let state = provider
        .create_network_request(&request("r4", 24), &cancel)
        .await
        .unwrap();
    assert_eq!(state.netmask, "10.20.1.0/24");

    let config = persisted_config(&store);
    assert_eq!(config.subnets.len(), 3);
    assert_eq!(config.subnets.get("r4"), Some(&"10.20.1.0/24".to_string()));
    assert!(config.subnets.get("r2").is_none());
}

#[tokio::test]
async fn reservation_file_lands_at_the_sanitized_path() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    provider
        .create_network_request(&request("r1", 24), &cancel)
        .await
        .unwrap();
    assert!(store.object(TEST_BUCKET, BASE_FILE).is_some());
    // The lock was released.
    assert!(store
        .object(TEST_BUCKET, &format!("{BASE_FILE}.lock"))
        .is_none());
}

#[tokio::test]
async fn duplicate_owner_key_is_rejected_without_a_write() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    provider
        .create_network_request(&request("r1", 24), &cancel)
        .await
        .unwrap();
    let before = store.object(TEST_BUCKET, BASE_FILE).unwrap();

    let err = provider
        .create_network_request(&request("r1", 24), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::AlreadyReserved { .. }));
    assert_eq!(store.object(TEST_BUCKET, BASE_FILE).unwrap(), before);
}

#[tokio::test]
async fn prefix_not_longer_than_base_is_invalid() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    let err = provider
        .create_network_request(&request("r1", 16), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Cidr(_)));
    // Nothing was created.
    assert!(store.object(TEST_BUCKET, BASE_FILE).is_none());
}

#[tokio::test]
async fn exhausted_base_cidr_reports_no_space() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();
    let small = |owner: &str| NetworkRequestSpec {
        id: owner.to_string(),
        base_cidr: "192.168.0.0/30".to_string(),
        prefix_length: 31,
    };

    provider.create_network_request(&small("a"), &cancel).await.unwrap();
    provider.create_network_request(&small("b"), &cancel).await.unwrap();
    let err = provider
        .create_network_request(&small("c"), &cancel)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no more space"), "{err}");
}

#[tokio::test]
async fn read_finds_the_reservation_and_tolerates_absence() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    // No file yet.
    assert!(provider
        .read_network_request(BASE, "r1")
        .await
        .unwrap()
        .is_none());

    provider
        .create_network_request(&request("r1", 24), &cancel)
        .await
        .unwrap();
    let state = provider
        .read_network_request(BASE, "r1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.netmask, "10.20.0.0/24");
    assert_eq!(state.prefix_length, 24);

    assert!(provider
        .read_network_request(BASE, "ghost")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn update_echoes_the_current_state() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    let state = provider
        .create_network_request(&request("r1", 24), &cancel)
        .await
        .unwrap();
    let echoed = provider.update_network_request(&state);
    assert_eq!(echoed, state);
}

#[tokio::test]
async fn delete_of_absent_file_or_entry_is_success() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    // No file at all.
    provider
        .delete_network_request(BASE, "r1", &cancel)
        .await
        .unwrap();

    provider
        .create_network_request(&request("r1", 24), &cancel)
        .await
        .unwrap();
    let before = store.object(TEST_BUCKET, BASE_FILE).unwrap();

    // Entry already gone: success without a write.
    provider
        .delete_network_request(BASE, "ghost", &cancel)
        .await
        .unwrap();
    assert_eq!(store.object(TEST_BUCKET, BASE_FILE).unwrap(), before);
}

#[tokio::test]
async fn concurrent_creates_reserve_disjoint_subnets() {
    let store = MockObjectStore::new();
    let mut handles = Vec::new();
    for owner in ["left", "right"] {
        let task_store = store.clone();
        handles.push(tokio::spawn(async move {
            let provider = test_provider(&task_store);
            let cancel = CancellationToken::new();
            provider
                .create_network_request(&request(owner, 24), &cancel)
                .await
                .unwrap()
        }));
    }
    let mut netmasks = Vec::new();
    for handle in handles {
        netmasks.push(handle.await.unwrap().netmask);
    }
    netmasks.sort();
    netmasks.dedup();
    assert_eq!(netmasks.len(), 2, "both reservations must be disjoint");

    let config = persisted_config(&store);
    assert_eq!(config.subnets.len(), 2);
}

#[tokio::test]
async fn import_takes_the_owner_key() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    assert_eq!(provider.import_network_request("r1").unwrap(), "r1");
    assert!(matches!(
        provider.import_network_request(""),
        Err(ProviderError::InvalidImportId { .. })
    ));
}
