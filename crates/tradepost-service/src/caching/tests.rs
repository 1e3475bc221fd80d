use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::Instant;

use tradepost_test::MockRpcClient;

use crate::config::CacheConfigs;

use super::*;

const LATENCY: Duration = Duration::from_millis(10);

fn coordinator(mock: MockRpcClient) -> (Arc<MockRpcClient>, QueryCoordinator) {
    tradepost_test::setup();
    let rpc = Arc::new(mock.with_latency(LATENCY));
    let store = CacheStore::new(CacheConfigs::default());
    let queries = QueryCoordinator::new(store, rpc.clone());
    (rpc, queries)
}

fn seeded() -> (Arc<MockRpcClient>, QueryCoordinator) {
    coordinator(MockRpcClient::with_products(
        (1..=3).map(tradepost_test::product).collect(),
    ))
}

/// Two overlapping reads of the same key issue exactly one backend call.
#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_are_coalesced() {
    let (rpc, queries) = seeded();

    let (first, second) = tokio::join!(queries.products("product"), queries.products("product"));

    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 1);
    assert_eq!(first.data.as_ref().unwrap().len(), 3);
    assert_eq!(second.data.as_ref().unwrap().len(), 3);
    assert!(first.is_success());
}

/// A fresh entry is served without any backend call.
#[tokio::test(start_paused = true)]
async fn test_fresh_entries_do_not_refetch() {
    let (rpc, queries) = seeded();

    queries.products("").await;
    queries.products("").await;
    let snapshot = queries.products("").await;

    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 1);
    assert!(snapshot.is_success());
}

/// Distinct keywords are distinct keys, but whitespace is not significant.
#[tokio::test(start_paused = true)]
async fn test_keyword_normalization() {
    let (rpc, queries) = seeded();

    queries.products("product 2").await;
    queries.products("  product 2  ").await;
    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 1);

    queries.products("product 3").await;
    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 2);
}

/// Once the TTL elapses, a read serves the stale data immediately and
/// revalidates in the background.
#[tokio::test(start_paused = true)]
async fn test_stale_while_revalidate() {
    let (rpc, queries) = seeded();

    let first = queries.products("").await;
    assert!(first.is_success());

    tokio::time::advance(Duration::from_secs(31)).await;

    let stale = queries.products("").await;
    assert!(stale.is_loading());
    assert_eq!(stale.data.as_ref().unwrap().len(), 3);

    // let the background revalidation land
    tokio::time::sleep(2 * LATENCY).await;
    let refreshed = queries.products("").await;
    assert!(refreshed.is_success());
    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 2);
}

/// A cold detail read synchronously surfaces the element of a listing
/// already in hand, before the detail call resolves.
#[tokio::test(start_paused = true)]
async fn test_detail_seeded_from_listing() {
    let (rpc, queries) = seeded();

    queries.products("").await;

    let snapshot = queries.resolve(CacheKey::product_detail(2)).await;
    // the spawned confirmation fetch has not run a single poll yet
    assert_eq!(rpc.calls.get_product.load(Ordering::SeqCst), 0);
    match snapshot.data {
        Some(CachedData::Product(product)) => assert_eq!(product.id, 2),
        other => panic!("expected seeded product, got {other:?}"),
    }

    // the seed is provisional: the real fetch still confirms it
    tokio::time::sleep(2 * LATENCY).await;
    assert_eq!(rpc.calls.get_product.load(Ordering::SeqCst), 1);
    let confirmed = queries.product(2).await;
    assert!(confirmed.is_success());
    assert_eq!(rpc.calls.get_product.load(Ordering::SeqCst), 1);
}

/// Without a matching listing, a cold detail read awaits the backend.
#[tokio::test(start_paused = true)]
async fn test_detail_without_listing_awaits_fetch() {
    let (rpc, queries) = seeded();

    let snapshot = queries.product(3).await;
    assert!(snapshot.is_success());
    assert_eq!(rpc.calls.get_product.load(Ordering::SeqCst), 1);
}

/// The seed comes from the most recently fetched listing containing the id.
#[tokio::test(start_paused = true)]
async fn test_seeding_prefers_newest_listing() {
    let (rpc, queries) = seeded();

    queries.products("").await;
    tokio::time::advance(Duration::from_secs(1)).await;

    // another client renames product 2 before the keyword listing is
    // fetched, so the two cached listings disagree
    let mut products = rpc.products();
    products[1].name = "renamed product 2".into();
    rpc.set_products(products);
    queries.products("renamed").await;

    let snapshot = queries.resolve(CacheKey::product_detail(2)).await;
    match snapshot.data {
        Some(CachedData::Product(product)) => assert_eq!(product.name, "renamed product 2"),
        other => panic!("expected seeded product, got {other:?}"),
    }
}

/// Failed fetches settle as errors and do not retry on re-read.
#[tokio::test(start_paused = true)]
async fn test_errors_are_terminal_until_invalidated() {
    let (rpc, queries) = seeded();
    rpc.fail(
        "search_products",
        tradepost_api::ApiError::Transport("connection refused".into()),
    );

    let snapshot = queries.products("").await;
    assert!(snapshot.is_error());
    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 1);

    // re-rendering views re-read, which must not turn into a retry loop
    let again = queries.products("").await;
    assert!(again.is_error());
    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 1);

    // an explicit refetch is the retry affordance
    rpc.recover("search_products");
    let retried = queries.refetch(CacheKey::product_list("")).await;
    assert!(retried.is_success());
    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 2);
}

/// Invalidation marks entries stale without dropping their data.
#[tokio::test(start_paused = true)]
async fn test_invalidation_keeps_data() {
    let (_rpc, queries) = seeded();
    let store = queries.store().clone();

    queries.products("").await;
    let invalidated = store.invalidate(CacheFamily::Products);
    assert_eq!(invalidated, vec![CacheKey::product_list("")]);

    let entry = store.get(&CacheKey::product_list("")).unwrap();
    assert_eq!(entry.status(), CacheStatus::Success);
    assert!(entry.data().is_some());
    assert!(!entry.is_fresh(Instant::now()));
}

/// A fetch overlapping an invalidation cannot resurrect pre-mutation data
/// as fresh.
#[tokio::test(start_paused = true)]
async fn test_overlapping_fetch_never_fresh() {
    let (_rpc, queries) = seeded();
    let store = queries.store().clone();

    let fetch = tokio::spawn({
        let queries = queries.clone();
        async move { queries.products("").await }
    });
    tokio::task::yield_now().await;
    assert_eq!(
        store.get(&CacheKey::product_list("")).unwrap().status(),
        CacheStatus::Loading
    );

    store.invalidate(CacheFamily::Products);
    let snapshot = fetch.await.unwrap();
    assert!(snapshot.is_success());

    let entry = store.get(&CacheKey::product_list("")).unwrap();
    assert!(entry.data().is_some());
    assert!(!entry.is_fresh(Instant::now()));
}

/// Dropping a subscription does not abort the in-flight fetch; the result
/// still lands in the store.
#[tokio::test(start_paused = true)]
async fn test_unmount_does_not_cancel_fetch() {
    let (rpc, queries) = seeded();

    let subscription = queries.subscribe(CacheKey::product_list(""));
    let fetch = tokio::spawn({
        let queries = queries.clone();
        async move { queries.products("").await }
    });
    tokio::task::yield_now().await;

    // the subscriber unmounts while the fetch is in flight
    drop(subscription);
    let snapshot = fetch.await.unwrap();
    assert!(snapshot.is_success());
    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 1);

    // a later remount benefits from the cached result
    let remount = queries.products("").await;
    assert!(remount.is_success());
    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 1);
}

/// Subscribers are woken by store writes and can re-read their key.
#[tokio::test(start_paused = true)]
async fn test_subscription_sees_writes() {
    let (_rpc, queries) = seeded();

    let mut subscription = queries.subscribe(CacheKey::product_list(""));
    assert_eq!(subscription.snapshot().status, CacheStatus::Idle);

    let resolved = queries.products("").await;
    assert!(resolved.is_success());

    let observed = subscription.changed().await;
    assert_eq!(observed.status, CacheStatus::Success);
}
