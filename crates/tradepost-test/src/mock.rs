//! A scripted in-process [`RpcClient`] for exercising the caching layer
//! without any networking.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use tradepost_api::{
    ApiError, LoginRequest, PartialUser, Product, ProductDraft, RegisterRequest, RpcClient,
    UpdateUserRequest, User,
};

/// How the mock reports "nobody is logged in" from `get_me`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnonymousStyle {
    /// A successful response with a null payload.
    Null,
    /// An application error whose message classifies as unauthorized, the
    /// way a token middleware rejects the call.
    Unauthorized,
}

#[derive(Debug, Default)]
struct MockState {
    products: Vec<Product>,
    roster: Vec<PartialUser>,
    me: Option<User>,
    next_product_id: u32,
    failures: BTreeMap<&'static str, ApiError>,
}

/// Per-call invocation counters.
///
/// Deduplication tests assert on these: a burst of concurrent reads of the
/// same key must bump its counter exactly once.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub login: AtomicUsize,
    pub logout: AtomicUsize,
    pub register: AtomicUsize,
    pub get_me: AtomicUsize,
    pub update_user: AtomicUsize,
    pub get_all_users: AtomicUsize,
    pub search_products: AtomicUsize,
    pub get_product: AtomicUsize,
    pub create_product: AtomicUsize,
    pub update_product: AtomicUsize,
    pub delete_product: AtomicUsize,
}

/// An [`RpcClient`] over an in-memory product table.
///
/// Every call first sleeps for the configured latency (under a paused tokio
/// clock this still yields, which is what gives dedup tests their
/// overlapping window), then consumes a scripted failure if one is set for
/// the call, and finally answers from the table.
#[derive(Debug)]
pub struct MockRpcClient {
    state: Mutex<MockState>,
    /// Invocation counts per call.
    pub calls: CallCounts,
    latency: Duration,
    anonymous_style: AnonymousStyle,
}

impl Default for MockRpcClient {
    fn default() -> Self {
        MockRpcClient {
            state: Mutex::default(),
            calls: CallCounts::default(),
            latency: Duration::from_millis(10),
            anonymous_style: AnonymousStyle::Unauthorized,
        }
    }
}

impl MockRpcClient {
    /// A mock preloaded with the given products.
    pub fn with_products(products: Vec<Product>) -> Self {
        let mock = Self::default();
        {
            let mut state = mock.state.lock().unwrap();
            state.next_product_id = products.iter().map(|p| p.id).max().unwrap_or(0) + 1;
            state.products = products;
            state.roster = crate::roster();
        }
        mock
    }

    /// Overrides the artificial latency applied to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Overrides how `get_me` reports an anonymous caller.
    pub fn with_anonymous_style(mut self, style: AnonymousStyle) -> Self {
        self.anonymous_style = style;
        self
    }

    /// Sets the authenticated user without going through `login`.
    pub fn set_me(&self, me: Option<User>) {
        self.state.lock().unwrap().me = me;
    }

    /// Scripts the next outcomes of `call` to be `error`, until cleared.
    pub fn fail(&self, call: &'static str, error: ApiError) {
        self.state.lock().unwrap().failures.insert(call, error);
    }

    /// Removes a scripted failure.
    pub fn recover(&self, call: &'static str) {
        self.state.lock().unwrap().failures.remove(call);
    }

    /// The products currently in the table, newest first.
    pub fn products(&self) -> Vec<Product> {
        self.state.lock().unwrap().products.clone()
    }

    /// Replaces the product table out-of-band, simulating writes by other
    /// clients.
    pub fn set_products(&self, products: Vec<Product>) {
        self.state.lock().unwrap().products = products;
    }

    async fn enter(&self, call: &'static str, counter: &AtomicUsize) -> Result<(), ApiError> {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        match self.state.lock().unwrap().failures.get(call) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RpcClient for MockRpcClient {
    async fn login(&self, request: &LoginRequest) -> Result<(), ApiError> {
        self.enter("login", &self.calls.login).await?;
        if request.username == "demo" && request.password == "demo-password" {
            self.state.lock().unwrap().me = Some(crate::user());
            Ok(())
        } else if request.username == "root" && request.password == "root-password" {
            self.state.lock().unwrap().me = Some(crate::admin());
            Ok(())
        } else {
            Err(ApiError::Service {
                code: 400,
                message: "invalid username or password".into(),
            })
        }
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.enter("logout", &self.calls.logout).await?;
        self.state.lock().unwrap().me = None;
        Ok(())
    }

    async fn register(&self, _request: &RegisterRequest) -> Result<(), ApiError> {
        self.enter("register", &self.calls.register).await
    }

    async fn get_me(&self) -> Result<Option<User>, ApiError> {
        self.enter("get_me", &self.calls.get_me).await?;
        let me = self.state.lock().unwrap().me.clone();
        match (me, self.anonymous_style) {
            (Some(user), _) => Ok(Some(user)),
            (None, AnonymousStyle::Null) => Ok(None),
            (None, AnonymousStyle::Unauthorized) => Err(ApiError::Service {
                code: 401,
                message: "token is missing, please login first".into(),
            }),
        }
    }

    async fn update_user(&self, request: &UpdateUserRequest) -> Result<User, ApiError> {
        self.enter("update_user", &self.calls.update_user).await?;
        let mut state = self.state.lock().unwrap();
        let Some(me) = state.me.as_mut() else {
            return Err(ApiError::Service {
                code: 401,
                message: "please login first".into(),
            });
        };
        me.username = request.username.clone();
        me.email = request.email.clone();
        me.phone = request.phone.clone();
        me.address = request.address.clone();
        Ok(me.clone())
    }

    async fn get_all_users(&self) -> Result<Vec<PartialUser>, ApiError> {
        self.enter("get_all_users", &self.calls.get_all_users).await?;
        Ok(self.state.lock().unwrap().roster.clone())
    }

    async fn search_products(&self, keyword: Option<&str>) -> Result<Vec<Product>, ApiError> {
        self.enter("search_products", &self.calls.search_products)
            .await?;
        let state = self.state.lock().unwrap();
        let mut products: Vec<_> = match keyword {
            None => state.products.clone(),
            Some(keyword) => state
                .products
                .iter()
                .filter(|p| p.name.contains(keyword) || p.description.contains(keyword))
                .cloned()
                .collect(),
        };
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(products)
    }

    async fn get_product(&self, product_id: u32) -> Result<Product, ApiError> {
        self.enter("get_product", &self.calls.get_product).await?;
        self.state
            .lock()
            .unwrap()
            .products
            .iter()
            .find(|p| p.id == product_id)
            .cloned()
            .ok_or(ApiError::Service {
                code: 404,
                message: format!("product {product_id} does not exist"),
            })
    }

    async fn create_product(&self, draft: &ProductDraft) -> Result<Product, ApiError> {
        self.enter("create_product", &self.calls.create_product)
            .await?;
        let mut state = self.state.lock().unwrap();
        let id = state.next_product_id;
        state.next_product_id += 1;
        let product = Product {
            id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            price: draft.price,
            seller: state.me.as_ref().map(|me| tradepost_api::Seller {
                id: me.id,
                username: me.username.clone(),
                email: me.email.clone(),
                phone: Some(me.phone.clone()),
                address: Some(me.address.clone()),
            }),
            created_at: chrono::Utc::now(),
        };
        state.products.insert(0, product.clone());
        Ok(product)
    }

    async fn update_product(
        &self,
        product_id: u32,
        draft: &ProductDraft,
    ) -> Result<Product, ApiError> {
        self.enter("update_product", &self.calls.update_product)
            .await?;
        let mut state = self.state.lock().unwrap();
        let product = state
            .products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or(ApiError::Service {
                code: 404,
                message: format!("product {product_id} does not exist"),
            })?;
        product.name = draft.name.clone();
        product.description = draft.description.clone();
        product.price = draft.price;
        Ok(product.clone())
    }

    async fn delete_product(&self, product_id: u32) -> Result<(), ApiError> {
        self.enter("delete_product", &self.calls.delete_product)
            .await?;
        self.state
            .lock()
            .unwrap()
            .products
            .retain(|p| p.id != product_id);
        Ok(())
    }
}
