//! Creation of the client-side synchronization services.
//!
//! The coordinators share one [`CacheStore`] and one [`RpcClient`]; every
//! page composes with the same instances for the lifetime of the process.

use std::sync::Arc;

use anyhow::Result;

use tradepost_api::{HttpRpcClient, RpcClient};

use crate::caching::{CacheStore, QueryCoordinator};
use crate::config::Config;
use crate::mutations::MutationCoordinator;
use crate::session::SessionGate;

/// Creates the coordinators and the session gate over a shared store.
pub fn create_service(
    config: &Config,
    rpc: Arc<dyn RpcClient>,
) -> (QueryCoordinator, MutationCoordinator, SessionGate) {
    let store = CacheStore::new(config.caches);
    let queries = QueryCoordinator::new(store, Arc::clone(&rpc));
    let mutations = MutationCoordinator::new(queries.clone(), rpc);
    let session = SessionGate::new(queries.clone());
    (queries, mutations, session)
}

/// Creates the services over the HTTP backend named in the config.
pub fn create_http_service(
    config: &Config,
) -> Result<(QueryCoordinator, MutationCoordinator, SessionGate)> {
    let rpc = HttpRpcClient::new(config.base_url.clone(), config.http_timeouts())?;
    Ok(create_service(config, Arc::new(rpc)))
}

/// Initializes logging and statsd reporting from the configuration.
///
/// # Safety
/// Calls [`init_logging`](crate::logging::init_logging), which modifies the
/// process environment; only safe in a single-threaded context, i.e. before
/// the runtime starts.
pub unsafe fn init_observability(config: &Config) {
    unsafe { crate::logging::init_logging(config) };
    if let Some(statsd) = config.metrics.statsd.as_deref() {
        crate::metrics::configure_statsd(
            &config.metrics.prefix,
            statsd,
            config.metrics.custom_tags.clone(),
        );
    }
}
