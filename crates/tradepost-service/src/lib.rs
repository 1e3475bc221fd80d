#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod logging;
pub mod mutations;
pub mod services;
pub mod session;
pub mod utils;
