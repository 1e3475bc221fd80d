//! An in-process HTTP backend speaking the production JSON envelope.
//!
//! Products are served from an in-memory table; the session is a cookie the
//! login handler sets and the user endpoints require, like the production
//! token middleware.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use tradepost_api::{Product, User};

const SESSION_COOKIE: &str = "sid=tradepost-test-session";

#[derive(Debug)]
struct Db {
    products: Vec<Product>,
    next_id: u32,
    me: Option<User>,
}

type SharedState = Arc<Mutex<Db>>;

/// A running test backend.
///
/// The server task is aborted when this is dropped.
#[derive(Debug)]
pub struct TestBackend {
    /// Base URL to hand to an `HttpRpcClient`.
    pub url: Url,
    /// The bound address.
    pub addr: SocketAddr,
    state: SharedState,
    handle: tokio::task::JoinHandle<()>,
}

impl TestBackend {
    /// The products currently in the table.
    pub fn products(&self) -> Vec<Product> {
        self.state.lock().unwrap().products.clone()
    }
}

impl Drop for TestBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawns a test backend on an ephemeral port, preloaded with three
/// products and the `demo` / `root` accounts.
pub async fn test_backend() -> TestBackend {
    let state: SharedState = Arc::new(Mutex::new(Db {
        products: (1..=3).map(crate::product).collect(),
        next_id: 4,
        me: None,
    }));

    let app = Router::new()
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/register", post(register))
        .route("/api/user/me", get(get_me).put(update_user))
        .route("/api/admin/user", get(get_all_users))
        .route("/api/product", get(search_products).post(create_product))
        .route(
            "/api/product/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let url = Url::parse(&format!("http://{addr}/")).unwrap();
    TestBackend {
        url,
        addr,
        state,
        handle,
    }
}

fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "code": 200, "message": "ok", "data": data }))
}

fn err(code: i32, message: &str) -> Json<Value> {
    Json(json!({ "success": false, "code": code, "message": message, "data": null }))
}

fn session_user(headers: &HeaderMap, db: &Db) -> Option<User> {
    let cookie = headers.get(header::COOKIE)?.to_str().ok()?;
    if !cookie.contains(SESSION_COOKIE) {
        return None;
    }
    db.me.clone()
}

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

async fn login(State(state): State<SharedState>, Json(body): Json<Credentials>) -> Response {
    let me = match (body.username.as_str(), body.password.as_str()) {
        ("demo", "demo-password") => crate::user(),
        ("root", "root-password") => crate::admin(),
        _ => return err(400, "invalid username or password").into_response(),
    };
    state.lock().unwrap().me = Some(me);
    (
        [(header::SET_COOKIE, format!("{SESSION_COOKIE}; Path=/"))],
        ok(Value::Null),
    )
        .into_response()
}

async fn logout(State(state): State<SharedState>) -> Json<Value> {
    state.lock().unwrap().me = None;
    ok(Value::Null)
}

async fn register(Json(_body): Json<Value>) -> Json<Value> {
    ok(Value::Null)
}

async fn get_me(State(state): State<SharedState>, headers: HeaderMap) -> Json<Value> {
    let db = state.lock().unwrap();
    match session_user(&headers, &db) {
        Some(user) => ok(user),
        None => err(401, "token is missing, please login first"),
    }
}

#[derive(Debug, Deserialize)]
struct UserUpdate {
    username: String,
    email: String,
    phone: String,
    address: String,
}

async fn update_user(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<UserUpdate>,
) -> Json<Value> {
    let mut db = state.lock().unwrap();
    if session_user(&headers, &db).is_none() {
        return err(401, "token is missing, please login first");
    }
    let me = db.me.as_mut().expect("session user checked above");
    me.username = body.username;
    me.email = body.email;
    me.phone = body.phone;
    me.address = body.address;
    ok(me.clone())
}

async fn get_all_users(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let db = state.lock().unwrap();
    match session_user(&headers, &db) {
        // a middleware rejection, deliberately not wrapped in the envelope
        Some(user) if !user.is_admin => {
            (StatusCode::FORBIDDEN, "forbidden: admin only").into_response()
        }
        Some(_) => ok(crate::roster()).into_response(),
        None => err(401, "token is missing, please login first").into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

async fn search_products(
    State(state): State<SharedState>,
    Query(query): Query<SearchQuery>,
) -> Json<Value> {
    let db = state.lock().unwrap();
    let mut products: Vec<_> = match query.q.as_deref() {
        None | Some("") => db.products.clone(),
        Some(keyword) => db
            .products
            .iter()
            .filter(|p| p.name.contains(keyword) || p.description.contains(keyword))
            .cloned()
            .collect(),
    };
    products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    ok(products)
}

async fn get_product(State(state): State<SharedState>, Path(id): Path<u32>) -> Json<Value> {
    let db = state.lock().unwrap();
    match db.products.iter().find(|p| p.id == id) {
        Some(product) => ok(product),
        None => err(404, &format!("product {id} does not exist")),
    }
}

#[derive(Debug, Deserialize)]
struct Draft {
    name: String,
    description: String,
    price: i64,
}

async fn create_product(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(draft): Json<Draft>,
) -> Json<Value> {
    let mut db = state.lock().unwrap();
    let Some(me) = session_user(&headers, &db) else {
        return err(401, "token is missing, please login first");
    };
    let id = db.next_id;
    db.next_id += 1;
    let product = Product {
        id,
        name: draft.name,
        description: draft.description,
        price: draft.price,
        seller: Some(tradepost_api::Seller {
            id: me.id,
            username: me.username,
            email: me.email,
            phone: Some(me.phone),
            address: Some(me.address),
        }),
        created_at: chrono::Utc::now(),
    };
    db.products.insert(0, product.clone());
    ok(product)
}

async fn update_product(
    State(state): State<SharedState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
    Json(draft): Json<Draft>,
) -> Json<Value> {
    let mut db = state.lock().unwrap();
    if session_user(&headers, &db).is_none() {
        return err(401, "token is missing, please login first");
    }
    match db.products.iter_mut().find(|p| p.id == id) {
        Some(product) => {
            product.name = draft.name;
            product.description = draft.description;
            product.price = draft.price;
            ok(product.clone())
        }
        None => err(404, &format!("product {id} does not exist")),
    }
}

async fn delete_product(
    State(state): State<SharedState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> Json<Value> {
    let mut db = state.lock().unwrap();
    if session_user(&headers, &db).is_none() {
        return err(401, "token is missing, please login first");
    }
    db.products.retain(|p| p.id != id);
    ok(Value::Null)
}
