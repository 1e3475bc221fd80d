use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::{
    LoginRequest, PartialUser, Product, ProductDraft, RegisterRequest, UpdateUserRequest, User,
};

/// The backend boundary: one method per named remote call.
///
/// All durable state lives behind this trait; the synchronization layer never
/// touches storage directly. Implementations attach session proof (a cookie
/// or token) opaquely, so nothing above this boundary ever sees or stores
/// credentials beyond the login payload itself.
#[async_trait]
pub trait RpcClient: std::fmt::Debug + Send + Sync {
    /// Authenticates the given credentials.
    ///
    /// Returns no payload; the session must be re-probed via
    /// [`get_me`](Self::get_me) afterwards.
    async fn login(&self, request: &LoginRequest) -> Result<(), ApiError>;

    /// Terminates the current session.
    async fn logout(&self) -> Result<(), ApiError>;

    /// Creates a new account.
    async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError>;

    /// Probes the current session.
    ///
    /// `Ok(None)` means "no authenticated user" and is a legitimate outcome,
    /// distinct from the probe itself failing.
    async fn get_me(&self) -> Result<Option<User>, ApiError>;

    /// Updates the current user's profile and returns the updated user.
    async fn update_user(&self, request: &UpdateUserRequest) -> Result<User, ApiError>;

    /// Lists all users. Admin only.
    async fn get_all_users(&self) -> Result<Vec<PartialUser>, ApiError>;

    /// Searches products; `None` returns the full listing.
    async fn search_products(&self, keyword: Option<&str>) -> Result<Vec<Product>, ApiError>;

    /// Fetches a single product by id.
    async fn get_product(&self, product_id: u32) -> Result<Product, ApiError>;

    /// Creates a product listing and returns the created entity.
    async fn create_product(&self, draft: &ProductDraft) -> Result<Product, ApiError>;

    /// Updates a product listing and returns the updated entity.
    async fn update_product(&self, product_id: u32, draft: &ProductDraft)
    -> Result<Product, ApiError>;

    /// Deletes a product listing.
    async fn delete_product(&self, product_id: u32) -> Result<(), ApiError>;
}
