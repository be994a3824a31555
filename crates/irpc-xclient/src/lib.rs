//! High-level, discovery-and-failover-aware RPC client (§4.7).
//!
//! Built on [`irpc_client::Client`], [`irpc_discovery::ServiceDiscovery`],
//! and [`irpc_selector::Selector`]: the xClient owns a connection cache
//! keyed by endpoint, watches discovery for membership changes, and
//! retries/fails over/forks/broadcasts per [`FailMode`].

mod breaker;
mod cache;
mod client;
mod fail_mode;
mod options;

pub use breaker::{BreakerFactory, CircuitBreaker, ConsecutiveFailureBreaker};
pub use client::XClient;
pub use fail_mode::FailMode;
pub use options::XClientOptions;

pub use irpc_proto::{RpcError, RpcResult, ServiceError};
