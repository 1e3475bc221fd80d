use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::CacheConfigs;

use super::{CacheContents, CacheEntry, CacheFamily, CacheKey};

/// The single source of truth for "what the UI has seen".
///
/// A process-wide mapping from [`CacheKey`] to [`CacheEntry`]. Entries are
/// created lazily on first access, mutated exclusively by the query and
/// mutation coordinators (never by views), and are never physically removed
/// during a session: invalidation marks entries as needing revalidation so a
/// re-render always has last-known data to show. [`clear`](Self::clear) is
/// the one exception, used on logout to guarantee no residual data from a
/// prior identity is observable to the next session.
///
/// Cloning is cheap and shares the underlying map.
#[derive(Debug, Clone)]
pub struct CacheStore {
    entries: Arc<Mutex<BTreeMap<CacheKey, CacheEntry>>>,
    configs: CacheConfigs,
    changed: Arc<watch::Sender<u64>>,
}

impl CacheStore {
    /// Creates an empty store with the given per-family expiry.
    pub fn new(configs: CacheConfigs) -> Self {
        let (changed, _) = watch::channel(0);
        CacheStore {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            configs,
            changed: Arc::new(changed),
        }
    }

    fn stale_after(&self, family: CacheFamily) -> Option<std::time::Duration> {
        match family {
            CacheFamily::Products => self.configs.products.stale_after,
            CacheFamily::Session => self.configs.session.stale_after,
            CacheFamily::Users => self.configs.users.stale_after,
        }
    }

    /// Returns a copy of the entry, if one was ever created for the key.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    /// Writes a settled outcome for the key, replacing whatever was there.
    ///
    /// Used by mutations to write through entities the backend returned
    /// (e.g. a freshly created product into its own detail key).
    pub fn put(&self, key: CacheKey, contents: CacheContents) {
        let now = Instant::now();
        self.with_entry(&key, |entry| {
            let epoch = entry.epoch();
            entry.complete(contents, now, epoch);
        });
    }

    /// Marks every entry of the family as needing revalidation, without
    /// clearing data, and returns the affected keys.
    ///
    /// In-flight fetches for the affected keys are not aborted, but their
    /// results can no longer count as fresh (see [`CacheEntry::complete`]).
    pub fn invalidate(&self, family: CacheFamily) -> Vec<CacheKey> {
        let mut entries = self.entries.lock();
        let mut invalidated = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if key.family() == family {
                entry.mark_stale();
                invalidated.push(key.clone());
            }
        }
        drop(entries);

        tracing::trace!(family = %family, count = invalidated.len(), "Invalidated cache family");
        metric!(
            counter("cache.invalidate") += invalidated.len() as i64,
            "cache" => family.as_ref(),
        );
        self.notify();
        invalidated
    }

    /// Removes all entries. Only used on logout.
    pub fn clear(&self) {
        self.entries.lock().clear();
        tracing::debug!("Cleared cache store");
        self.notify();
    }

    /// A receiver that is notified after every store write.
    ///
    /// Subscribers re-read their key after each change; the payload is just
    /// a generation counter.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    /// Runs `f` on the entry under the store lock, creating an idle entry
    /// with the family's expiry if the key was never seen, and notifies
    /// subscribers afterwards.
    ///
    /// This is the get-or-create plus put of the store contract fused into
    /// one atomic step; all entry transitions go through here.
    pub(crate) fn with_entry<R>(&self, key: &CacheKey, f: impl FnOnce(&mut CacheEntry) -> R) -> R {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::idle(self.stale_after(key.family())));
        let result = f(entry);
        drop(entries);

        self.notify();
        result
    }

    /// Runs `f` over all entries of a family, read-only.
    pub(crate) fn for_each_in_family(
        &self,
        family: CacheFamily,
        mut f: impl FnMut(&CacheKey, &CacheEntry),
    ) {
        let entries = self.entries.lock();
        for (key, entry) in entries.iter() {
            if key.family() == family {
                f(key, entry);
            }
        }
    }

    fn notify(&self) {
        self.changed.send_modify(|generation| *generation += 1);
    }
}
