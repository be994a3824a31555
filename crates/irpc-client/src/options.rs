//! Low-level client knobs (§6 "Options (client)", the connection-level
//! subset — `Group`/`Retries`/`BackupLatency`/`GenBreaker` belong to the
//! xClient layer built on top of this crate).

use std::time::Duration;

use irpc_proto::{CompressType, SerializeType};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    /// `TCPKeepAlivePeriod`, default 1 minute per §6.
    pub tcp_keepalive: Option<Duration>,
    pub heartbeat: bool,
    pub heartbeat_interval: Duration,
    /// Default 30s per §4.4.
    pub max_wait_for_heartbeat: Duration,
    pub bidirectional_block: bool,
    pub serialize_type: SerializeType,
    pub compress_type: CompressType,
    /// `0`/`None` means unbounded, matching the wire's `MessageTooLong`
    /// check being opt-in.
    pub max_message_len: Option<u32>,
    /// `RPCPath`: the path sent as the HTTP `CONNECT` request target when
    /// dialing over the `http` network (§6).
    pub rpc_path: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            tcp_keepalive: Some(Duration::from_secs(60)),
            heartbeat: false,
            heartbeat_interval: Duration::from_secs(15),
            max_wait_for_heartbeat: Duration::from_secs(30),
            bidirectional_block: false,
            serialize_type: SerializeType::MsgPack,
            compress_type: CompressType::None,
            max_message_len: None,
            rpc_path: "/_irpc_".to_string(),
        }
    }
}
