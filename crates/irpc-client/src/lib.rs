//! The low-level irpc client: one connection, full-duplex, multiplexed by
//! sequence number (§4.4).

mod call;
mod client;
mod connect;
mod options;

pub use call::Call;
pub use client::Client;
pub use connect::{DynReader, DynWriter};
pub use options::ClientOptions;

pub use irpc_proto::{RpcError, RpcResult};
