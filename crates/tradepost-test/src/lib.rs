//! Helpers for testing the synchronization layer and the HTTP client.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all
//!    console output is captured by the test runner.
//!
//!  - When using [`test_backend`], make sure that the returned handle is
//!    held for the entire lifetime of the test. When dropped, the server
//!    task is aborted and connections to it will fail. To avoid this, assign
//!    it to a variable: `let backend = test_backend().await;`. Alternatively,
//!    use [`MockRpcClient`] to test without HTTP connections.

mod backend;
mod mock;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use backend::{TestBackend, test_backend};
pub use mock::{AnonymousStyle, CallCounts, MockRpcClient};

use chrono::{DateTime, Duration};
use tradepost_api::{PartialUser, Product, Seller, User};

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the tradepost
///    crates and mutes all other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new(
            "tradepost_service=trace,tradepost_api=debug",
        ))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A deterministic product fixture.
///
/// Ids double as prices (`id * 100` minor units) and creation times
/// (`UNIX_EPOCH + id` seconds), so listings have a stable newest-first
/// order.
pub fn product(id: u32) -> Product {
    Product {
        id,
        name: format!("product {id}"),
        description: format!("description of product {id}"),
        price: i64::from(id) * 100,
        seller: Some(seller()),
        created_at: DateTime::UNIX_EPOCH + Duration::seconds(i64::from(id)),
    }
}

/// The default seller attached to [`product`] fixtures.
pub fn seller() -> Seller {
    Seller {
        id: 1,
        username: "demo".into(),
        email: "demo@example.com".into(),
        phone: Some("555-0100".into()),
        address: None,
    }
}

/// The default authenticated user fixture.
pub fn user() -> User {
    User {
        id: 1,
        username: "demo".into(),
        email: "demo@example.com".into(),
        phone: "555-0100".into(),
        address: "1 Example Street".into(),
        is_admin: false,
    }
}

/// An administrator fixture.
pub fn admin() -> User {
    User {
        id: 2,
        username: "root".into(),
        email: "root@example.com".into(),
        phone: String::new(),
        address: String::new(),
        is_admin: true,
    }
}

/// The roster rows the admin endpoints return.
pub fn roster() -> Vec<PartialUser> {
    vec![
        PartialUser {
            id: 1,
            username: "demo".into(),
            email: "demo@example.com".into(),
            is_admin: false,
        },
        PartialUser {
            id: 2,
            username: "root".into(),
            email: "root@example.com".into(),
            is_admin: true,
        },
    ]
}
