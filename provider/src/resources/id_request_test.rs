//! Unit tests for the id_request resource

use gcs_client::MockObjectStore;
use referential_tools::IdPool;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::resources::id_pool::IdPoolSpec;
use crate::resources::id_request::IdRequestSpec;
use crate::test_utils::{test_provider, TEST_BUCKET};

fn pool_spec(name: &str, start_from: i64, end_to: i64) -> IdPoolSpec {
    IdPoolSpec {
        name: name.to_string(),
        start_from: Some(start_from),
        end_to: Some(end_to),
    }
}

fn request(pool: &str, owner_key: &str) -> IdRequestSpec {
    IdRequestSpec {
        id: owner_key.to_string(),
        pool: pool.to_string(),
    }
}

fn persisted_pool(store: &MockObjectStore, name: &str) -> IdPool {
    let bytes = store
        .object(TEST_BUCKET, &format!("gcsreferential/id_pool/{name}"))
        .unwrap();
    let mut pool: IdPool = serde_json::from_slice(&bytes).unwrap();
    pool.reconcile();
    pool
}

#[tokio::test]
async fn create_reserves_and_persists_an_id() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    provider
        .create_id_pool(&pool_spec("p", 10, 20), &cancel)
        .await
        .unwrap();
    let state = provider
        .create_id_request(&request("p", "vm-1"), &cancel)
        .await
        .unwrap();
    assert_eq!(state.requested_id, 10);

    let pool = persisted_pool(&store, "p");
    assert_eq!(pool.get("vm-1"), Some(10));
}

#[tokio::test]
async fn create_on_missing_pool_names_the_pool() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    let err = provider
        .create_id_request(&request("ghost", "vm-1"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::PoolNotFound(_)));
    assert!(err.to_string().contains("ghost"));
}

#[tokio::test]
async fn duplicate_owner_key_is_already_reserved() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    provider
        .create_id_pool(&pool_spec("p", 1, 10), &cancel)
        .await
        .unwrap();
    provider
        .create_id_request(&request("p", "vm-1"), &cancel)
        .await
        .unwrap();
    let err = provider
        .create_id_request(&request("p", "vm-1"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::AlreadyReserved { .. }));

    // The original reservation is intact.
    assert_eq!(persisted_pool(&store, "p").get("vm-1"), Some(1));
}

#[tokio::test]
async fn exhausted_pool_reports_no_more_id_available() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    // Eleven ids: 2 through 12.
    provider
        .create_id_pool(&pool_spec("p", 2, 12), &cancel)
        .await
        .unwrap();
    for owner in (1..=10).map(|n| format!("req-{n}")).chain(["test".to_string()]) {
        provider
            .create_id_request(&request("p", &owner), &cancel)
            .await
            .unwrap();
    }

    let err = provider
        .create_id_request(&request("p", "req-11"), &cancel)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no more id available"), "{err}");

    // The failed request left no trace.
    let pool = persisted_pool(&store, "p");
    assert_eq!(pool.members.len(), 11);
    assert!(pool.get("req-11").is_none());
}

#[tokio::test]
async fn concurrent_allocations_never_hand_out_the_same_id() {
    let store = MockObjectStore::new();
    {
        let provider = test_provider(&store);
        let cancel = CancellationToken::new();
        provider
            .create_id_pool(&pool_spec("p", 5, 7), &cancel)
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for owner in ["left", "right"] {
        let task_store = store.clone();
        handles.push(tokio::spawn(async move {
            // A separate provider per task: two independent processes
            // observing the same bucket.
            let provider = test_provider(&task_store);
            let cancel = CancellationToken::new();
            provider
                .create_id_request(&request("p", owner), &cancel)
                .await
                .unwrap()
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().requested_id);
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 2, "both allocations must return distinct ids");
    assert!(ids.iter().all(|id| (5..=7).contains(id)));

    let pool = persisted_pool(&store, "p");
    assert_eq!(pool.get("left").is_some(), true);
    assert_eq!(pool.get("right").is_some(), true);
    assert_eq!(pool.members.len(), 2);
}

#[tokio::test]
async fn read_finds_the_reservation_and_tolerates_absence() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    provider
        .create_id_pool(&pool_spec("p", 1, 10), &cancel)
        .await
        .unwrap();
    provider
        .create_id_request(&request("p", "vm-1"), &cancel)
        .await
        .unwrap();

    let state = provider.read_id_request("p", "vm-1").await.unwrap().unwrap();
    assert_eq!(state.requested_id, 1);

    assert!(provider.read_id_request("p", "ghost").await.unwrap().is_none());
    assert!(provider
        .read_id_request("missing-pool", "vm-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn update_renames_the_owner_key_and_preserves_the_id() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    provider
        .create_id_pool(&pool_spec("p", 1, 10), &cancel)
        .await
        .unwrap();
    let created = provider
        .create_id_request(&request("p", "old-name"), &cancel)
        .await
        .unwrap();

    let updated = provider
        .update_id_request("old-name", &request("p", "new-name"), &cancel)
        .await
        .unwrap();
    assert_eq!(updated.requested_id, created.requested_id);

    let pool = persisted_pool(&store, "p");
    assert_eq!(pool.get("new-name"), Some(created.requested_id));
    assert!(pool.get("old-name").is_none());
    // The id must not have leaked back into the free set.
    assert!(!pool.is_free(created.requested_id));
}

#[tokio::test]
async fn update_refuses_missing_source_and_occupied_target() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    provider
        .create_id_pool(&pool_spec("p", 1, 10), &cancel)
        .await
        .unwrap();
    provider
        .create_id_request(&request("p", "a"), &cancel)
        .await
        .unwrap();
    provider
        .create_id_request(&request("p", "b"), &cancel)
        .await
        .unwrap();

    let err = provider
        .update_id_request("ghost", &request("p", "c"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::RequestNotFound { .. }));

    let err = provider
        .update_id_request("a", &request("p", "b"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::AlreadyReserved { .. }));

    // An update to the same key changes nothing and succeeds.
    let unchanged = provider
        .update_id_request("a", &request("p", "a"), &cancel)
        .await
        .unwrap();
    assert_eq!(persisted_pool(&store, "p").get("a"), Some(unchanged.requested_id));
}

#[tokio::test]
async fn delete_releases_the_id_for_reuse() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    provider
        .create_id_pool(&pool_spec("p", 1, 2), &cancel)
        .await
        .unwrap();
    let first = provider
        .create_id_request(&request("p", "a"), &cancel)
        .await
        .unwrap();
    provider
        .create_id_request(&request("p", "b"), &cancel)
        .await
        .unwrap();

    provider.delete_id_request("p", "a", &cancel).await.unwrap();
    let pool = persisted_pool(&store, "p");
    assert!(pool.get("a").is_none());
    assert!(pool.is_free(first.requested_id));

    // The freed id is the only one left, so the next request gets it.
    let reused = provider
        .create_id_request(&request("p", "c"), &cancel)
        .await
        .unwrap();
    assert_eq!(reused.requested_id, first.requested_id);
}

#[tokio::test]
async fn delete_of_absent_request_or_pool_is_success() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);
    let cancel = CancellationToken::new();

    // Missing pool: nothing to do.
    provider
        .delete_id_request("missing-pool", "a", &cancel)
        .await
        .unwrap();

    provider
        .create_id_pool(&pool_spec("p", 1, 10), &cancel)
        .await
        .unwrap();
    let before = store
        .object(TEST_BUCKET, "gcsreferential/id_pool/p")
        .unwrap();

    // Missing member: success, and no write happened.
    provider.delete_id_request("p", "ghost", &cancel).await.unwrap();
    assert_eq!(
        store.object(TEST_BUCKET, "gcsreferential/id_pool/p").unwrap(),
        before
    );
}

#[tokio::test]
async fn import_parses_pool_and_owner_key() {
    let store = MockObjectStore::new();
    let provider = test_provider(&store);

    let (pool, owner_key) = provider.import_id_request("p/vm-1").unwrap();
    assert_eq!(pool, "p");
    assert_eq!(owner_key, "vm-1");

    for bad in ["", "p", "p/", "/vm-1", "p/vm-1/extra"] {
        assert!(
            matches!(
                provider.import_id_request(bad),
                Err(ProviderError::InvalidImportId { .. })
            ),
            "{bad:?} should be rejected"
        );
    }
}
