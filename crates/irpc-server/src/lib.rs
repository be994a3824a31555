//! The connection-accepting RPC server half of `irpc` (§4.5).

mod handler;
mod options;
mod server;

pub use options::{AuthFunc, CorsOptions, ServerOptions};
pub use server::{DynReader, DynWriter, Server};

pub use irpc_proto::{Codec, CompressorRegistry, Plugin, Plugins, RpcError, RpcResult, ServiceError};
