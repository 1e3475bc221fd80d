use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use tradepost_api::{ApiError, PartialUser, Product, RpcClient, User};

use crate::utils::defer::defer;

use super::{
    CacheContents, CacheFamily, CacheKey, CacheStatus, CacheStore, CachedData, QuerySnapshot,
};

/// The channel over which a fetch result is shared with every coalesced
/// waiter.
type FetchChannel = Shared<oneshot::Receiver<CacheContents>>;
type InFlightMap = Arc<Mutex<BTreeMap<CacheKey, FetchChannel>>>;

/// Orchestrates read-through fetches against the [`CacheStore`].
///
/// Concurrent reads of the same key are deduplicated in-memory: a burst of
/// overlapping subscriptions issues at most one backend call, and every
/// waiter receives the shared result. Reads of entries with last-known data
/// serve that data immediately while revalidation proceeds in the background
/// (stale-while-revalidate); only cold reads await the backend.
///
/// Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct QueryCoordinator {
    store: CacheStore,
    rpc: Arc<dyn RpcClient>,

    /// Used for deduplicating fetches.
    in_flight: InFlightMap,

    /// Reference counts of currently mounted subscribers per key.
    subscribers: Arc<Mutex<BTreeMap<CacheKey, usize>>>,
}

impl fmt::Debug for QueryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCoordinator")
            .field("in-flight fetches", &self.in_flight.lock().len())
            .field("subscribed keys", &self.subscribers.lock().len())
            .finish()
    }
}

impl QueryCoordinator {
    pub fn new(store: CacheStore, rpc: Arc<dyn RpcClient>) -> Self {
        QueryCoordinator {
            store,
            rpc,
            in_flight: Arc::new(Mutex::new(BTreeMap::new())),
            subscribers: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// The store this coordinator reads through.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Read-through for a product listing; the empty keyword is the full
    /// listing.
    pub async fn products(&self, keyword: &str) -> QuerySnapshot<Vec<Product>> {
        self.resolve(CacheKey::product_list(keyword))
            .await
            .map_data(CachedData::into_products)
    }

    /// Read-through for a single product detail.
    pub async fn product(&self, id: u32) -> QuerySnapshot<Product> {
        self.resolve(CacheKey::product_detail(id))
            .await
            .map_data(CachedData::into_product)
    }

    /// Read-through for the admin user roster.
    pub async fn admin_users(&self) -> QuerySnapshot<Vec<PartialUser>> {
        self.resolve(CacheKey::AdminUsers)
            .await
            .map_data(CachedData::into_users)
    }

    /// Read-through for the reserved session entry.
    ///
    /// Only the session gate drives this key.
    pub(crate) async fn session(&self) -> QuerySnapshot<Option<User>> {
        self.resolve(CacheKey::Session)
            .await
            .map_data(CachedData::into_session)
    }

    /// Resolves a key read-through: serves fresh entries without a call,
    /// joins an in-flight fetch, or issues a (deduplicated) fetch otherwise.
    pub async fn resolve(&self, key: CacheKey) -> QuerySnapshot<CachedData> {
        let family = key.family();
        metric!(counter("cache.access") += 1, "cache" => family.as_ref());
        let now = Instant::now();

        if let Some(entry) = self.store.get(&key) {
            if entry.is_fresh(now) {
                metric!(counter("cache.hit") += 1, "cache" => family.as_ref());
                return entry.snapshot();
            }
            if entry.status() == CacheStatus::Loading {
                // join the running fetch instead of issuing a duplicate call
                if entry.data().is_some() && !Self::awaits_revalidation(&key) {
                    return entry.snapshot();
                }
                return self.await_fetch(&key).await;
            }
            if !entry.needs_fetch(now) {
                // a settled error is terminal until invalidated or retried;
                // re-rendering must not turn into a retry loop
                return entry.snapshot();
            }
        }

        let has_data = self
            .store
            .get(&key)
            .is_some_and(|entry| entry.data().is_some());

        if !has_data {
            if let CacheKey::ProductDetail { id } = &key {
                if let Some(product) = self.find_in_listings(*id) {
                    // Seed the cold detail entry from a listing already in
                    // hand, avoiding a loading flash for data the UI has
                    // seen. The seed is provisional: the detail call still
                    // runs to confirm it.
                    metric!(counter("cache.seeded") += 1);
                    tracing::trace!(product = id, "Seeded detail entry from listing");
                    self.store
                        .with_entry(&key, |entry| entry.seed(CachedData::Product(product)));
                    let _in_flight = self.spawn_fetch(&key);
                    return self.peek(&key);
                }
            }
        }

        if has_data && !Self::awaits_revalidation(&key) {
            // stale-while-revalidate: show last-known data immediately
            let _in_flight = self.spawn_fetch(&key);
            return self.peek(&key);
        }

        self.await_fetch(&key).await
    }

    /// The current snapshot for a key, without issuing any fetch.
    pub fn peek(&self, key: &CacheKey) -> QuerySnapshot<CachedData> {
        match self.store.get(key) {
            Some(entry) => entry.snapshot(),
            None => QuerySnapshot {
                status: CacheStatus::Idle,
                data: None,
                error: None,
            },
        }
    }

    /// Forces a (deduplicated) refetch of the key and awaits the settled
    /// snapshot.
    ///
    /// This is the retry affordance behind failed entries.
    pub async fn refetch(&self, key: CacheKey) -> QuerySnapshot<CachedData> {
        self.await_fetch(&key).await
    }

    /// Registers a mounted subscriber for the key.
    ///
    /// Dropping the returned [`Subscription`] unsubscribes; it never aborts
    /// an in-flight fetch, whose result still lands in the store for other
    /// subscribers or a later remount.
    pub fn subscribe(&self, key: CacheKey) -> Subscription {
        *self.subscribers.lock().entry(key.clone()).or_insert(0) += 1;
        Subscription {
            changed: self.store.subscribe_changes(),
            key,
            coordinator: self.clone(),
        }
    }

    /// Spawns refetches for every given key that currently has a mounted
    /// subscriber.
    ///
    /// Called by the mutation coordinator right after invalidating a family,
    /// so mounted views converge on post-mutation data without re-polling.
    pub(crate) fn revalidate_mounted(&self, keys: &[CacheKey]) {
        let subscribers = self.subscribers.lock();
        for key in keys {
            if subscribers.get(key).copied().unwrap_or(0) > 0 {
                let _in_flight = self.spawn_fetch(key);
            }
        }
    }

    /// Whether reads of this key must await revalidation instead of serving
    /// stale data.
    ///
    /// A protected view must never render on a stale session.
    fn awaits_revalidation(key: &CacheKey) -> bool {
        matches!(key, CacheKey::Session)
    }

    async fn await_fetch(&self, key: &CacheKey) -> QuerySnapshot<CachedData> {
        let channel = self.spawn_fetch(key);
        match channel.await {
            Ok(_) => self.peek(key),
            // the sender is dropped without sending only if the fetch task
            // itself died
            Err(_canceled) => QuerySnapshot {
                status: CacheStatus::Error,
                data: None,
                error: Some(ApiError::Transport("fetch task dropped".into())),
            },
        }
    }

    /// Spawns the fetch for a key as a separate task.
    ///
    /// This does the deduplication, by keeping track of running fetches per
    /// [`CacheKey`].
    ///
    /// NOTE: This function itself is *not* `async`: it eagerly spawns the
    /// fetch on the runtime, even if the caller never awaits the channel.
    fn spawn_fetch(&self, key: &CacheKey) -> FetchChannel {
        let mut in_flight = self.in_flight.lock();
        if let Some(channel) = in_flight.get(key) {
            // a concurrent read joins the running fetch
            metric!(counter("cache.fetch.coalesced") += 1, "cache" => key.family().as_ref());
            return channel.clone();
        }

        metric!(counter("cache.fetch") += 1, "cache" => key.family().as_ref());
        let started_epoch = self.store.with_entry(key, |entry| {
            entry.begin_loading();
            entry.epoch()
        });

        let remove_token = {
            let in_flight = Arc::clone(&self.in_flight);
            let key = key.clone();
            defer(move || {
                in_flight.lock().remove(&key);
            })
        };

        let (sender, receiver) = oneshot::channel();
        let channel = receiver.shared();
        in_flight.insert(key.clone(), channel.clone());
        drop(in_flight);

        let this = self.clone();
        let key = key.clone();
        let started = Instant::now();
        let task = async move {
            let contents = this.fetch_contents(&key).await;
            let now = Instant::now();
            metric!(
                timer("cache.fetch.duration") = now - started,
                "cache" => key.family().as_ref(),
            );
            this.store
                .with_entry(&key, |entry| entry.complete(contents.clone(), now, started_epoch));
            // Drop the token first to evict from the in-flight map. This
            // ensures that callers either get a channel that will receive
            // data, or they create a new channel.
            drop(remove_token);
            sender.send(contents).ok();
        };
        tokio::spawn(task);

        channel
    }

    /// Performs the backend call a key stands for.
    async fn fetch_contents(&self, key: &CacheKey) -> CacheContents {
        match key {
            CacheKey::ProductList { keyword } => {
                let keyword = (!keyword.is_empty()).then_some(keyword.as_str());
                self.rpc
                    .search_products(keyword)
                    .await
                    .map(CachedData::Products)
            }
            CacheKey::ProductDetail { id } => {
                self.rpc.get_product(*id).await.map(CachedData::Product)
            }
            CacheKey::Session => match self.rpc.get_me().await {
                Ok(user) => Ok(CachedData::Session(user)),
                // an expected "not logged in" outcome must not surface as a
                // hard error
                Err(err) if err.is_unauthorized() => {
                    tracing::debug!(error = %err, "Session probe unauthorized, treating as anonymous");
                    Ok(CachedData::Session(None))
                }
                Err(err) => Err(err),
            },
            CacheKey::AdminUsers => self.rpc.get_all_users().await.map(CachedData::Users),
        }
    }

    /// Searches the most recently fetched listing that contains the product.
    fn find_in_listings(&self, id: u32) -> Option<Product> {
        let mut best: Option<(Option<Instant>, Product)> = None;
        self.store
            .for_each_in_family(CacheFamily::Products, |key, entry| {
                if !matches!(key, CacheKey::ProductList { .. }) {
                    return;
                }
                let Some(CachedData::Products(products)) = entry.data() else {
                    return;
                };
                let Some(product) = products.iter().find(|product| product.id == id) else {
                    return;
                };
                let newer = match &best {
                    None => true,
                    Some((best_at, _)) => entry.fetched_at() > *best_at,
                };
                if newer {
                    best = Some((entry.fetched_at(), product.clone()));
                }
            });
        best.map(|(_, product)| product)
    }
}

/// A mounted subscriber of one cache key.
///
/// Mounting is subscribing; unmounting is dropping. Dropping only stops this
/// subscriber's notifications; it does not abort any in-flight fetch.
#[derive(Debug)]
pub struct Subscription {
    changed: watch::Receiver<u64>,
    key: CacheKey,
    coordinator: QueryCoordinator,
}

impl Subscription {
    /// The key this subscription is mounted on.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The current snapshot for the subscribed key.
    pub fn snapshot(&self) -> QuerySnapshot<CachedData> {
        self.coordinator.peek(&self.key)
    }

    /// Waits until a store write may have changed this key, then returns the
    /// current snapshot.
    ///
    /// Wakeups are conservative: a write to an unrelated key can wake the
    /// subscriber, which then simply re-reads an unchanged snapshot.
    pub async fn changed(&mut self) -> QuerySnapshot<CachedData> {
        self.changed.changed().await.ok();
        self.snapshot()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subscribers = self.coordinator.subscribers.lock();
        if let Some(count) = subscribers.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                subscribers.remove(&self.key);
            }
        }
    }
}
