//! Wire protocol, message pools, and the plugin container for `irpc`.
//!
//! This crate has no network I/O of its own beyond framing a [`Message`]
//! onto an `AsyncRead`/`AsyncWrite` pair; the client and server crates own
//! the connections.

pub mod codec;
pub mod compress;
pub mod error;
pub mod header;
pub mod message;
pub mod plugin;
pub mod pool;
pub mod types;

pub use codec::Codec;
pub use compress::{Compressor, CompressorRegistry};
pub use error::{RpcError, RpcResult, ServiceError, error_code};
pub use header::{Header, HEADER_LEN, MAGIC, VERSION};
pub use message::{Message, meta_key, metadata_eq_unordered};
pub use plugin::{Plugin, PluginError, Plugins};
pub use pool::{BufferPool, MessagePool};
pub use types::{CompressType, MessageStatusType, MessageType, SerializeType};

/// Parses an endpoint key `network@address` (absent `@` implies `tcp`).
pub fn split_endpoint(key: &str) -> (&str, &str) {
    match key.split_once('@') {
        Some((network, address)) => (network, address),
        None => ("tcp", key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_endpoint_defaults_to_tcp() {
        assert_eq!(split_endpoint("127.0.0.1:8972"), ("tcp", "127.0.0.1:8972"));
        assert_eq!(split_endpoint("unix@/tmp/a.sock"), ("unix", "/tmp/a.sock"));
    }
}
