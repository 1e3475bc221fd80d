//! Write operations and the invalidation protocol.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use tradepost_api::{
    ApiError, LoginRequest, Product, ProductDraft, RegisterRequest, RpcClient, UpdateUserRequest,
    User,
};

use crate::caching::{CacheFamily, CacheKey, CacheStore, CachedData, QueryCoordinator};

/// The logical write operations.
///
/// At most one mutation of each kind may be in flight; a second call is
/// rejected synchronously with [`ApiError::Busy`] rather than queued or
/// coalesced. The UI is expected to disable the triggering control while
/// pending, but the coordinator enforces the rule regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MutationKind {
    Login,
    Logout,
    Register,
    UpdateProfile,
    CreateProduct,
    UpdateProduct,
    DeleteProduct,
}

impl MutationKind {
    fn name(&self) -> &'static str {
        match self {
            MutationKind::Login => "login",
            MutationKind::Logout => "logout",
            MutationKind::Register => "register",
            MutationKind::UpdateProfile => "update_profile",
            MutationKind::CreateProduct => "create_product",
            MutationKind::UpdateProduct => "update_product",
            MutationKind::DeleteProduct => "delete_product",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Orchestrates write operations against the backend and keeps the cache
/// consistent afterwards.
///
/// On success, an operation (a) writes entities the backend returned through
/// to their own keys and (b) marks its declared [`CacheFamily`] as needing
/// revalidation, triggering refetches for currently mounted subscribers. On
/// failure the store is left untouched: either the call and its invalidation
/// both happen, or neither does.
#[derive(Clone)]
pub struct MutationCoordinator {
    store: CacheStore,
    queries: QueryCoordinator,
    rpc: Arc<dyn RpcClient>,

    /// Kinds currently in flight, for the at-most-one rule.
    running: Arc<Mutex<BTreeSet<MutationKind>>>,
}

impl fmt::Debug for MutationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("running", &*self.running.lock())
            .finish()
    }
}

impl MutationCoordinator {
    pub fn new(queries: QueryCoordinator, rpc: Arc<dyn RpcClient>) -> Self {
        MutationCoordinator {
            store: queries.store().clone(),
            queries,
            rpc,
            running: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Authenticates the given credentials.
    ///
    /// The session entry is invalidated and re-probed; login itself returns
    /// no user.
    pub async fn login(&self, request: &LoginRequest) -> Result<(), ApiError> {
        request.validate()?;
        let _guard = self.begin(MutationKind::Login)?;
        self.run(MutationKind::Login, self.rpc.login(request)).await?;
        self.invalidate_session();
        Ok(())
    }

    /// Terminates the current session.
    ///
    /// After the backend call succeeds the session family is invalidated and
    /// the whole store is cleared, so no data fetched under the prior
    /// identity is observable to the next one.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let _guard = self.begin(MutationKind::Logout)?;
        self.run(MutationKind::Logout, self.rpc.logout()).await?;
        self.store.invalidate(CacheFamily::Session);
        self.store.clear();
        self.queries.revalidate_mounted(&[CacheKey::Session]);
        Ok(())
    }

    /// Creates a new account. The session entry is re-probed afterwards.
    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        request.validate()?;
        let _guard = self.begin(MutationKind::Register)?;
        self.run(MutationKind::Register, self.rpc.register(request))
            .await?;
        self.invalidate_session();
        Ok(())
    }

    /// Updates the current user's profile.
    ///
    /// The returned user is written through to the session entry, which is
    /// still invalidated so the gate re-probes the authoritative state.
    pub async fn update_profile(&self, request: &UpdateUserRequest) -> Result<User, ApiError> {
        request.validate()?;
        let _guard = self.begin(MutationKind::UpdateProfile)?;
        let user = self
            .run(MutationKind::UpdateProfile, self.rpc.update_user(request))
            .await?;
        self.store
            .put(CacheKey::Session, Ok(CachedData::Session(Some(user.clone()))));
        self.invalidate_session();
        Ok(user)
    }

    /// Creates a product listing.
    ///
    /// The created entity is written through to its own detail key only; it
    /// is never forced into list caches, since list ordering and filtering
    /// are the backend's concern.
    pub async fn create_product(&self, draft: &ProductDraft) -> Result<Product, ApiError> {
        draft.validate()?;
        let _guard = self.begin(MutationKind::CreateProduct)?;
        let product = self
            .run(MutationKind::CreateProduct, self.rpc.create_product(draft))
            .await?;
        self.apply_product_write(Some(&product));
        Ok(product)
    }

    /// Updates a product listing.
    pub async fn update_product(
        &self,
        product_id: u32,
        draft: &ProductDraft,
    ) -> Result<Product, ApiError> {
        draft.validate()?;
        let _guard = self.begin(MutationKind::UpdateProduct)?;
        let product = self
            .run(
                MutationKind::UpdateProduct,
                self.rpc.update_product(product_id, draft),
            )
            .await?;
        self.apply_product_write(Some(&product));
        Ok(product)
    }

    /// Deletes a product listing.
    pub async fn delete_product(&self, product_id: u32) -> Result<(), ApiError> {
        let _guard = self.begin(MutationKind::DeleteProduct)?;
        self.run(
            MutationKind::DeleteProduct,
            self.rpc.delete_product(product_id),
        )
        .await?;
        self.apply_product_write(None);
        Ok(())
    }

    /// Claims the in-flight slot for `kind`, or rejects synchronously.
    fn begin(&self, kind: MutationKind) -> Result<MutationGuard, ApiError> {
        let mut running = self.running.lock();
        if !running.insert(kind) {
            metric!(counter("mutation.busy") += 1, "operation" => kind.name());
            tracing::debug!(operation = %kind, "Rejecting concurrent mutation");
            return Err(ApiError::Busy(kind.name()));
        }
        Ok(MutationGuard {
            kind,
            running: Arc::clone(&self.running),
        })
    }

    /// Awaits the backend call and records its outcome.
    async fn run<T>(
        &self,
        kind: MutationKind,
        call: impl Future<Output = Result<T, ApiError>>,
    ) -> Result<T, ApiError> {
        let result = call.await;
        metric!(
            counter("mutation.run") += 1,
            "operation" => kind.name(),
            "status" => if result.is_ok() { "ok" } else { "err" },
        );
        if let Err(error) = &result {
            tracing::debug!(operation = %kind, error = %error, "Mutation failed");
        }
        result
    }

    /// Post-success bookkeeping shared by all product mutations.
    fn apply_product_write(&self, returned: Option<&Product>) {
        if let Some(product) = returned {
            self.store.put(
                CacheKey::product_detail(product.id),
                Ok(CachedData::Product(product.clone())),
            );
        }
        let invalidated = self.store.invalidate(CacheFamily::Products);
        self.queries.revalidate_mounted(&invalidated);
    }

    fn invalidate_session(&self) {
        let invalidated = self.store.invalidate(CacheFamily::Session);
        self.queries.revalidate_mounted(&invalidated);
    }
}

/// Releases a mutation's in-flight slot on drop, also on error paths.
struct MutationGuard {
    kind: MutationKind,
    running: Arc<Mutex<BTreeSet<MutationKind>>>,
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        self.running.lock().remove(&self.kind);
    }
}
