//! # Client-side caching infrastructure
//!
//! Caching is front and center in this client. Every piece of backend state
//! the UI renders flows through the layers in this module, and every page
//! reuses them unmodified. This module contains the cache store, the cache
//! key type, the read-through query coordinator, and an explanation of how
//! all this fits together.
//!
//! ## Layers
//!
//! - [`CacheStore`] is a process-wide mapping from [`CacheKey`] to
//!   [`CacheEntry`], the single source of truth for "what the UI has seen".
//!   It is mutated exclusively by the [`QueryCoordinator`] and the mutation
//!   coordinator, never by views.
//! - [`QueryCoordinator`] orchestrates read-through fetches: a read of a
//!   fresh entry is served without a call, a read of a stale entry serves
//!   last-known data while revalidation runs in the background, and a cold
//!   read awaits the backend. Concurrent reads of the same key are coalesced
//!   into a single call.
//!
//! A read goes through the following steps:
//! - If the entry is fresh, it is served as-is.
//! - If a fetch for the key is already in flight, the read joins it instead
//!   of issuing a duplicate call.
//! - On a cold detail read, the coordinator first tries to seed the entry
//!   from the most recently fetched listing that contains the product, so
//!   the UI never flashes "loading" for data it has already seen. The seed
//!   is provisional and the real fetch still runs.
//! - Otherwise a fetch is spawned; readers with last-known data return
//!   immediately, readers without any data await the result.
//!
//! ## Invalidation
//!
//! Mutations never update listings in place; ordering and filtering are the
//! backend's concern. Instead, a successful mutation marks every entry of
//! the affected [`CacheFamily`] as needing revalidation. Entries keep their
//! data while stale, so views have something to show until the refetch
//! lands. The store is only ever emptied on logout, which guarantees no
//! residual data from a prior identity is observable afterwards.
//!
//! An entry records the invalidation epoch a fetch started in; a fetch that
//! overlaps an invalidation still writes its (late) result, but the result
//! cannot count as fresh, so a read after a successful mutation never
//! observes pre-mutation data as fresh.
//!
//! ## Metrics
//!
//! The layer emits counters tagged with the `cache` family:
//!
//! - `cache.access`: all read-through resolves.
//! - `cache.hit`: resolves served without any backend call.
//! - `cache.fetch`: backend calls actually issued.
//! - `cache.fetch.coalesced`: reads that joined an already running fetch.
//! - `cache.seeded`: detail entries seeded from a listing.
//! - `cache.invalidate`: entries marked stale by mutations.

mod cache_key;
mod entry;
mod query;
mod store;
#[cfg(test)]
mod tests;

pub use cache_key::{CacheFamily, CacheKey};
pub use entry::{CacheContents, CacheEntry, CacheStatus, CachedData, QuerySnapshot};
pub use query::{QueryCoordinator, Subscription};
pub use store::CacheStore;
