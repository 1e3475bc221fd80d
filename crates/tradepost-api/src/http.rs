//! Support for talking to the backend over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::ApiError;
use crate::rpc::RpcClient;
use crate::types::{
    ApiResponse, LoginRequest, PartialUser, Product, ProductDraft, RegisterRequest,
    UpdateUserRequest, User,
};

/// Timeouts applied to every backend call.
///
/// Retry back-off and cancellation live below this boundary; the
/// synchronization layer only ever distinguishes pending, succeeded and
/// failed.
#[derive(Debug, Clone, Copy)]
pub struct HttpTimeouts {
    /// The timeout for establishing a connection.
    pub connect: Duration,
    /// The overall timeout for a single call.
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(1),
            request: Duration::from_secs(30),
        }
    }
}

/// [`RpcClient`] implementation backed by the backend's JSON HTTP surface.
///
/// Session proof is a cookie managed entirely by the underlying cookie store;
/// it is attached to every request and never inspected here.
#[derive(Debug)]
pub struct HttpRpcClient {
    client: Client,
    base_url: Url,
}

impl HttpRpcClient {
    /// Creates a client for the backend at `base_url`.
    pub fn new(base_url: Url, timeouts: HttpTimeouts) -> Result<Self, ApiError> {
        let client = Client::builder()
            .cookie_store(true)
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()?;
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Transport(format!("invalid request url {path:?}: {e}")))
    }

    /// Sends a request and decodes the response envelope.
    ///
    /// The backend wraps application errors in a regular envelope; anything
    /// that does not decode as one is either a middleware rejection (kept as
    /// a service error so the status code stays visible to the unauthorized
    /// classification) or a transport problem.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<ApiResponse<T>, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str(&body) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(ApiError::Service {
                code: status.as_u16() as i32,
                message: if body.trim().is_empty() {
                    status.to_string()
                } else {
                    body
                },
            }),
            Err(e) => Err(ApiError::Transport(format!(
                "failed to parse server response: {e}"
            ))),
        }
    }

    async fn post_unit<B>(&self, path: &str, body: &B) -> Result<(), ApiError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let request = self.client.post(self.url(path)?).json(body);
        let envelope: ApiResponse<serde_json::Value> = self.send(request).await?;
        envelope.into_data().map(|_| ())
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn login(&self, request: &LoginRequest) -> Result<(), ApiError> {
        tracing::debug!(username = %request.username, "Logging in");
        self.post_unit("api/login", request).await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.post_unit("api/logout", &serde_json::json!({})).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        tracing::debug!(username = %request.username, "Registering account");
        self.post_unit("api/register", request).await
    }

    async fn get_me(&self) -> Result<Option<User>, ApiError> {
        let request = self.client.get(self.url("api/user/me")?);
        let envelope: ApiResponse<User> = self.send(request).await?;
        envelope.into_data()
    }

    async fn update_user(&self, request: &UpdateUserRequest) -> Result<User, ApiError> {
        let request = self.client.put(self.url("api/user/me")?).json(request);
        let envelope: ApiResponse<User> = self.send(request).await?;
        envelope.into_required_data()
    }

    async fn get_all_users(&self) -> Result<Vec<PartialUser>, ApiError> {
        let request = self.client.get(self.url("api/admin/user")?);
        let envelope: ApiResponse<Vec<PartialUser>> = self.send(request).await?;
        envelope.into_required_data()
    }

    async fn search_products(&self, keyword: Option<&str>) -> Result<Vec<Product>, ApiError> {
        let mut request = self.client.get(self.url("api/product")?);
        if let Some(keyword) = keyword {
            request = request.query(&[("q", keyword)]);
        }
        let envelope: ApiResponse<Vec<Product>> = self.send(request).await?;
        // an empty listing comes back as a null payload
        Ok(envelope.into_data()?.unwrap_or_default())
    }

    async fn get_product(&self, product_id: u32) -> Result<Product, ApiError> {
        let request = self.client.get(self.url(&format!("api/product/{product_id}"))?);
        let envelope: ApiResponse<Product> = self.send(request).await?;
        envelope.into_required_data()
    }

    async fn create_product(&self, draft: &ProductDraft) -> Result<Product, ApiError> {
        let request = self.client.post(self.url("api/product")?).json(draft);
        let envelope: ApiResponse<Product> = self.send(request).await?;
        envelope.into_required_data()
    }

    async fn update_product(
        &self,
        product_id: u32,
        draft: &ProductDraft,
    ) -> Result<Product, ApiError> {
        let request = self
            .client
            .put(self.url(&format!("api/product/{product_id}"))?)
            .json(draft);
        let envelope: ApiResponse<Product> = self.send(request).await?;
        envelope.into_required_data()
    }

    async fn delete_product(&self, product_id: u32) -> Result<(), ApiError> {
        let request = self
            .client
            .delete(self.url(&format!("api/product/{product_id}"))?);
        let envelope: ApiResponse<serde_json::Value> = self.send(request).await?;
        envelope.into_data().map(|_| ())
    }
}
