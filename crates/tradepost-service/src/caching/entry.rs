use std::time::Duration;

use tokio::time::Instant;

use tradepost_api::{ApiError, PartialUser, Product, User};

/// The lifecycle phase of a cache entry.
///
/// Exactly one phase holds at any instant for a given key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// The entry was created but no fetch was ever issued.
    Idle,
    /// A fetch is in flight. Last-known data, if any, remains readable.
    Loading,
    /// The last fetch settled with data.
    Success,
    /// The last fetch settled with an error.
    Error,
}

/// A value the store can hold.
///
/// The key space is a closed set of resource families, so the payload is a
/// closed enum rather than a type-erased box; views extract the typed
/// payload through the accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedData {
    /// Payload of a [`ProductList`](super::CacheKey::ProductList) key.
    Products(Vec<Product>),
    /// Payload of a [`ProductDetail`](super::CacheKey::ProductDetail) key.
    Product(Product),
    /// Payload of the session key; `None` is "no authenticated user",
    /// which is a legitimate success, not an error.
    Session(Option<User>),
    /// Payload of the admin roster key.
    Users(Vec<PartialUser>),
}

impl CachedData {
    /// Extracts a product listing.
    pub fn into_products(self) -> Option<Vec<Product>> {
        match self {
            CachedData::Products(products) => Some(products),
            _ => None,
        }
    }

    /// Extracts a single product.
    pub fn into_product(self) -> Option<Product> {
        match self {
            CachedData::Product(product) => Some(product),
            _ => None,
        }
    }

    /// Extracts the session payload.
    pub fn into_session(self) -> Option<Option<User>> {
        match self {
            CachedData::Session(user) => Some(user),
            _ => None,
        }
    }

    /// Extracts the admin roster.
    pub fn into_users(self) -> Option<Vec<PartialUser>> {
        match self {
            CachedData::Users(users) => Some(users),
            _ => None,
        }
    }
}

/// The settled outcome of one fetch, as written back through the store.
pub type CacheContents = Result<CachedData, ApiError>;

/// A single entry of the cache.
///
/// Entries are created lazily on first read and are never physically removed
/// while the session lives; invalidation only marks them as needing
/// revalidation so that a re-render always has last-known data to show while
/// the refetch proceeds.
///
/// All transitions go through the methods below, which maintain the
/// invariants: `Success` implies data present and error absent, `Error`
/// implies an error present.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    status: CacheStatus,
    data: Option<CachedData>,
    error: Option<ApiError>,
    fetched_at: Option<Instant>,
    stale_after: Option<Duration>,
    needs_revalidation: bool,
    epoch: u64,
}

impl CacheEntry {
    /// Creates a fresh idle entry for a family with the given expiry.
    pub(crate) fn idle(stale_after: Option<Duration>) -> Self {
        CacheEntry {
            status: CacheStatus::Idle,
            data: None,
            error: None,
            fetched_at: None,
            stale_after,
            needs_revalidation: false,
            epoch: 0,
        }
    }

    pub fn status(&self) -> CacheStatus {
        self.status
    }

    pub fn data(&self) -> Option<&CachedData> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }

    /// When the data was last settled by a completed fetch.
    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    /// The invalidation epoch; bumped whenever the entry is marked stale.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the data can be served without revalidation.
    pub fn is_fresh(&self, now: Instant) -> bool {
        if self.status != CacheStatus::Success || self.needs_revalidation {
            return false;
        }
        match (self.fetched_at, self.stale_after) {
            // provisional data (e.g. seeded from a listing) was never
            // confirmed by its own fetch
            (None, _) => false,
            (Some(_), None) => true,
            (Some(fetched_at), Some(ttl)) => now.duration_since(fetched_at) < ttl,
        }
    }

    /// Whether a read of this entry must (re-)issue the fetch.
    pub(crate) fn needs_fetch(&self, now: Instant) -> bool {
        match self.status {
            CacheStatus::Idle => true,
            CacheStatus::Loading => false,
            CacheStatus::Success => !self.is_fresh(now),
            // failed entries hold their error until an invalidation or an
            // explicit refetch; re-reading must not retry in a loop
            CacheStatus::Error => self.needs_revalidation,
        }
    }

    /// Transitions into `Loading`, keeping last-known data readable.
    pub(crate) fn begin_loading(&mut self) {
        self.status = CacheStatus::Loading;
        self.error = None;
    }

    /// Seeds provisional `Success` data that still awaits confirmation by a
    /// real fetch.
    pub(crate) fn seed(&mut self, data: CachedData) {
        self.status = CacheStatus::Success;
        self.data = Some(data);
        self.error = None;
        self.fetched_at = None;
    }

    /// Settles the entry with the outcome of a fetch that started at
    /// `started_epoch`.
    ///
    /// If the entry was invalidated while the fetch was in flight, the
    /// result is still written (late data beats no data) but cannot count as
    /// fresh: a read after a successful mutation must never observe
    /// pre-mutation data as fresh.
    pub(crate) fn complete(&mut self, contents: CacheContents, now: Instant, started_epoch: u64) {
        let invalidated_mid_flight = self.epoch != started_epoch;
        match contents {
            Ok(data) => {
                self.status = CacheStatus::Success;
                self.data = Some(data);
                self.error = None;
                self.fetched_at = Some(now);
            }
            Err(error) => {
                self.status = CacheStatus::Error;
                self.error = Some(error);
            }
        }
        self.needs_revalidation = invalidated_mid_flight;
    }

    /// Marks the entry as needing revalidation without clearing its data.
    pub(crate) fn mark_stale(&mut self) {
        self.needs_revalidation = true;
        self.epoch += 1;
    }

    /// The `{status, data, error}` tuple a subscriber sees.
    pub fn snapshot(&self) -> QuerySnapshot<CachedData> {
        QuerySnapshot {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
        }
    }
}

/// What a subscriber reads for one key: the `{data, isLoading, isError,
/// error}` tuple consumed by views.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
    /// Lifecycle phase at the time of the read.
    pub status: CacheStatus,
    /// Last-known data, if any. Present during `Loading` when a previous
    /// fetch or a seed left data behind (stale-while-revalidate).
    pub data: Option<T>,
    /// The error of the last failed fetch, if any.
    pub error: Option<ApiError>,
}

impl<T> QuerySnapshot<T> {
    /// Whether a fetch is currently in flight for this key.
    pub fn is_loading(&self) -> bool {
        self.status == CacheStatus::Loading
    }

    /// Whether the last fetch failed.
    pub fn is_error(&self) -> bool {
        self.status == CacheStatus::Error
    }

    /// Whether the last fetch settled with data.
    pub fn is_success(&self) -> bool {
        self.status == CacheStatus::Success
    }

    /// Converts the payload type, dropping data that does not match.
    pub(crate) fn map_data<U>(self, extract: impl FnOnce(T) -> Option<U>) -> QuerySnapshot<U> {
        QuerySnapshot {
            status: self.status,
            data: self.data.and_then(extract),
            error: self.error,
        }
    }
}
