//! End-to-end flows over the assembled services, with the backend mocked
//! out in-process.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tradepost_api::{ApiError, LoginRequest, ProductDraft, UpdateUserRequest, parse_price};
use tradepost_service::caching::{CacheKey, CacheStatus, QueryCoordinator};
use tradepost_service::config::Config;
use tradepost_service::mutations::MutationCoordinator;
use tradepost_service::services::create_service;
use tradepost_service::session::{SessionGate, SessionState};
use tradepost_test::MockRpcClient;

const LATENCY: Duration = Duration::from_millis(10);

fn services() -> (
    Arc<MockRpcClient>,
    QueryCoordinator,
    MutationCoordinator,
    SessionGate,
) {
    tradepost_test::setup();
    let rpc = Arc::new(
        MockRpcClient::with_products((1..=3).map(tradepost_test::product).collect())
            .with_latency(LATENCY),
    );
    let (queries, mutations, session) = create_service(&Config::default(), rpc.clone());
    (rpc, queries, mutations, session)
}

fn login_request() -> LoginRequest {
    LoginRequest {
        username: "demo".into(),
        password: "demo-password".into(),
    }
}

/// Login invalidates the session entry; the gate re-probes into
/// `Authenticated`.
#[tokio::test(start_paused = true)]
async fn test_login_reprobes_session() {
    let (rpc, _queries, mutations, session) = services();

    assert_eq!(session.resolve().await, SessionState::Anonymous);

    mutations.login(&login_request()).await.unwrap();
    let state = session.resolve().await;
    assert_eq!(state.user().map(|user| user.username.as_str()), Some("demo"));
    assert_eq!(rpc.calls.get_me.load(Ordering::SeqCst), 2);
}

/// Bad credentials surface the backend message; the cache is untouched.
#[tokio::test(start_paused = true)]
async fn test_login_failure_leaves_cache_alone() {
    let (rpc, queries, mutations, session) = services();

    assert_eq!(session.resolve().await, SessionState::Anonymous);

    let error = mutations
        .login(&LoginRequest {
            username: "demo".into(),
            password: "wrong".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(error, ApiError::Service { code: 400, .. }));

    // no invalidation happened: the gate still serves the cached probe
    assert_eq!(session.resolve().await, SessionState::Anonymous);
    assert_eq!(rpc.calls.get_me.load(Ordering::SeqCst), 1);
    assert_eq!(
        queries.peek(&CacheKey::Session).status,
        CacheStatus::Success
    );
}

/// Validation failures never reach the backend.
#[tokio::test(start_paused = true)]
async fn test_validation_never_calls_backend() {
    let (rpc, _queries, mutations, _session) = services();

    let error = mutations
        .login(&LoginRequest {
            username: "".into(),
            password: "demo-password".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(error, ApiError::Validation(_)));

    let error = mutations
        .create_product(&ProductDraft {
            name: "bike".into(),
            description: String::new(),
            price: 0,
        })
        .await
        .unwrap_err();
    assert!(matches!(error, ApiError::Validation(_)));

    assert_eq!(rpc.calls.login.load(Ordering::SeqCst), 0);
    assert_eq!(rpc.calls.create_product.load(Ordering::SeqCst), 0);
}

/// After a successful create, no product key serves pre-mutation data as
/// fresh; mounted listings converge on the new data.
#[tokio::test(start_paused = true)]
async fn test_create_product_invalidates_listings() {
    let (rpc, queries, mutations, _session) = services();
    mutations.login(&login_request()).await.unwrap();

    let _mounted = queries.subscribe(CacheKey::product_list(""));
    let listing = queries.products("").await;
    assert_eq!(listing.data.unwrap().len(), 3);
    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 1);

    let draft = ProductDraft {
        name: "city bike".into(),
        description: "barely used".into(),
        price: parse_price("199.99").unwrap(),
    };
    let created = mutations.create_product(&draft).await.unwrap();
    assert_eq!(created.price, 19999);

    // the mounted listing was refetched without another explicit read
    tokio::time::sleep(2 * LATENCY).await;
    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 2);

    let listing = queries.products("").await;
    assert!(listing.is_success());
    let products = listing.data.unwrap();
    assert_eq!(products.len(), 4);
    assert_eq!(products[0].name, "city bike");

    // the created entity was written through to its own detail key
    let detail = queries.product(created.id).await;
    assert_eq!(detail.data.unwrap().id, created.id);
}

/// The created entity is not force-inserted into cached listings; they
/// refetch instead.
#[tokio::test(start_paused = true)]
async fn test_create_does_not_write_into_listings() {
    let (rpc, queries, mutations, _session) = services();
    mutations.login(&login_request()).await.unwrap();

    queries.products("").await;
    let draft = ProductDraft {
        name: "city bike".into(),
        description: String::new(),
        price: 1000,
    };
    mutations.create_product(&draft).await.unwrap();

    // an unmounted listing is served stale (marked, not rewritten) until
    // read again
    let snapshot = queries.peek(&CacheKey::product_list(""));
    assert_eq!(snapshot.data.map(|data| data.into_products().unwrap().len()), Some(3));

    let refetched = queries.products("").await;
    assert!(refetched.is_loading());
    tokio::time::sleep(2 * LATENCY).await;
    assert_eq!(rpc.calls.search_products.load(Ordering::SeqCst), 2);
}

/// A second mutation of the same kind is rejected synchronously while the
/// first is pending, and performs no backend call.
#[tokio::test(start_paused = true)]
async fn test_concurrent_mutation_is_busy() {
    let (rpc, _queries, mutations, _session) = services();
    mutations.login(&login_request()).await.unwrap();

    let draft = ProductDraft {
        name: "kettle".into(),
        description: String::new(),
        price: 500,
    };

    let first = tokio::spawn({
        let mutations = mutations.clone();
        let draft = draft.clone();
        async move { mutations.create_product(&draft).await }
    });
    tokio::task::yield_now().await;

    let error = mutations.create_product(&draft).await.unwrap_err();
    assert_eq!(error, ApiError::Busy("create_product"));
    assert_eq!(rpc.calls.create_product.load(Ordering::SeqCst), 1);

    // a different kind is not affected, and the slot frees up afterwards
    first.await.unwrap().unwrap();
    mutations.create_product(&draft).await.unwrap();
    assert_eq!(rpc.calls.create_product.load(Ordering::SeqCst), 2);
}

/// Logout clears the entire cache: previously cached keys return `Idle`.
#[tokio::test(start_paused = true)]
async fn test_logout_clears_cache() {
    let (rpc, queries, mutations, session) = services();
    mutations.login(&login_request()).await.unwrap();
    assert!(session.resolve().await.user().is_some());

    queries.products("").await;
    queries.product(2).await;
    // let the seeded detail entry settle
    tokio::time::sleep(2 * LATENCY).await;
    assert!(queries.peek(&CacheKey::product_detail(2)).is_success());

    mutations.logout().await.unwrap();

    assert_eq!(
        queries.peek(&CacheKey::product_detail(2)).status,
        CacheStatus::Idle
    );
    assert_eq!(
        queries.peek(&CacheKey::product_list("")).status,
        CacheStatus::Idle
    );

    assert_eq!(session.resolve().await, SessionState::Anonymous);
    assert_eq!(rpc.calls.logout.load(Ordering::SeqCst), 1);
}

/// Profile updates write the returned user through and re-probe.
#[tokio::test(start_paused = true)]
async fn test_update_profile_writes_through() {
    let (rpc, _queries, mutations, session) = services();
    mutations.login(&login_request()).await.unwrap();
    session.resolve().await;

    let updated = mutations
        .update_profile(&UpdateUserRequest {
            username: "demo".into(),
            email: "new@example.com".into(),
            phone: "555-0199".into(),
            address: "2 Example Street".into(),
        })
        .await
        .unwrap();
    assert_eq!(updated.email, "new@example.com");

    let state = session.resolve().await;
    assert_eq!(
        state.user().map(|user| user.email.as_str()),
        Some("new@example.com")
    );
    // the initial probe, plus the re-probe forced by the update
    assert_eq!(rpc.calls.get_me.load(Ordering::SeqCst), 2);
}

/// The admin roster is cached like any other family.
#[tokio::test(start_paused = true)]
async fn test_admin_roster() {
    let (rpc, queries, mutations, session) = services();
    mutations
        .login(&LoginRequest {
            username: "root".into(),
            password: "root-password".into(),
        })
        .await
        .unwrap();
    assert!(session.resolve().await.is_admin());

    let roster = queries.admin_users().await;
    assert_eq!(roster.data.unwrap().len(), 2);

    queries.admin_users().await;
    assert_eq!(rpc.calls.get_all_users.load(Ordering::SeqCst), 1);
}
