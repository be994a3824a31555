//! Server-side knobs (§6 "Options (server)").

use std::sync::Arc;
use std::time::Duration;

/// Checked against `Metadata[AuthKey]` on every non-heartbeat request when
/// set (§4.5 step 3). Returns `true` to admit the request.
pub type AuthFunc = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// CORS policy applied to the HTTP and JSON-RPC gateways (§6 "Options
/// (server)"), mirroring `github.com/rs/cors`'s `Options` shape.
#[derive(Debug, Clone)]
pub struct CorsOptions {
    /// `*` allows any origin. Empty means no origin is allowed (and the
    /// gateway is effectively unreachable from a browser).
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// `Access-Control-Max-Age`, seconds. `0` omits the header.
    pub max_age_secs: u64,
}

impl Default for CorsOptions {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl CorsOptions {
    /// Matches the original's `AllowAllCORSOptions()`: wide open, the
    /// option a caller reaches for to unblock a browser client during
    /// development.
    pub fn allow_all() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string(), "PUT".to_string()],
            allowed_headers: vec!["*".to_string()],
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: 0,
        }
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == "*" || o == origin)
    }
}

#[derive(Clone)]
pub struct ServerOptions {
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// `TCPKeepAlivePeriod`, default 3 minutes per §6.
    pub tcp_keepalive: Option<Duration>,
    /// Routes per-handler responses through a bounded channel and a
    /// dedicated writer task instead of locking the connection's writer
    /// directly from each handler task.
    pub async_write: bool,
    pub disable_http_gateway: bool,
    pub disable_json_rpc: bool,
    pub auth_func: Option<AuthFunc>,
    /// How often [`crate::Server::shutdown`] polls the in-flight counter.
    pub shutdown_poll_interval: Duration,
    pub max_message_len: Option<u32>,
    /// Wraps the HTTP and JSON-RPC gateways in CORS handling when set,
    /// same as the source's `corsOptions` (`server/gateway.go`,
    /// `server/server_jsonrpc2.go`).
    pub cors_options: Option<CorsOptions>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            read_timeout: None,
            write_timeout: None,
            tcp_keepalive: Some(Duration::from_secs(180)),
            async_write: false,
            disable_http_gateway: false,
            disable_json_rpc: false,
            auth_func: None,
            shutdown_poll_interval: Duration::from_secs(1),
            max_message_len: None,
            cors_options: None,
        }
    }
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("tcp_keepalive", &self.tcp_keepalive)
            .field("async_write", &self.async_write)
            .field("disable_http_gateway", &self.disable_http_gateway)
            .field("disable_json_rpc", &self.disable_json_rpc)
            .field("auth_func", &self.auth_func.as_ref().map(|_| "<fn>"))
            .field("shutdown_poll_interval", &self.shutdown_poll_interval)
            .field("max_message_len", &self.max_message_len)
            .field("cors_options", &self.cors_options)
            .finish()
    }
}
