use thiserror::Error;

/// Well-known error codes carried in a response's `Metadata[ServiceError]`
/// (loosely based on JSON-RPC 2.0, matching the codes a gateway translates
/// to and from).
pub mod error_code {
    /// The target method/function is not registered.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// The request could not be decoded into the method's argument type.
    pub const INVALID_PARAMS: i32 = -32602;
    /// The handler returned an error or panicked.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// No server available for the call (xClient).
    pub const NO_SERVER: i32 = -32000;
    /// The circuit breaker for the endpoint is open.
    pub const BREAKER_OPEN: i32 = -32001;
    /// The client or xClient has been shut down.
    pub const SHUTDOWN: i32 = -32002;
}

/// Protocol/codec/transport errors. Distinguishes the error *kinds* from
/// §7: protocol errors are fatal for the connection, codec errors are
/// per-call, transport errors cascade to every pending call.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message too long: {len} bytes exceeds limit of {max}")]
    MessageTooLong { len: u32, max: u32 },

    #[error("metadata truncated mid key/value record")]
    MetaKvMissing,

    #[error("bad magic byte: expected {expected:#x}, got {got:#x}")]
    BadMagic { expected: u8, got: u8 },

    #[error("unsupported compressor: {0}")]
    UnsupportedCompressor(u8),

    #[error("unsupported serializer: {0}")]
    UnsupportedSerializer(u8),

    #[error("msgpack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("client is shutting down")]
    Shutdown,

    #[error("call timed out")]
    Timeout,

    #[error("call cancelled")]
    Cancelled,

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),
}

pub type RpcResult<T> = Result<T, RpcError>;

/// A server-reported error, carried back to the caller verbatim. Per §8
/// ("ServiceError non-retryable"), xClient must treat this as *covered*
/// and never evict the connection or retry because of it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct ServiceError {
    pub code: i32,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: impl std::fmt::Display) -> Self {
        Self::new(
            error_code::METHOD_NOT_FOUND,
            format!("unknown method: {method}"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(error_code::INTERNAL_ERROR, message)
    }
}
