//! Wire-level surface of the tradepost backend.
//!
//! Includes the JSON response envelope, the domain entities carried by it,
//! request payloads with their client-side validation, and the [`RpcClient`]
//! boundary together with its reqwest-backed implementation.

#![warn(missing_docs)]

mod error;
mod http;
mod rpc;
mod types;

pub use error::*;
pub use http::*;
pub use rpc::*;
pub use types::*;
