//! The in-flight call handle returned by [`crate::Client::go`] (§4.4).

use tokio::sync::oneshot;

use irpc_proto::{Message, RpcError, RpcResult};

pub(crate) struct PendingEntry {
    pub(crate) tx: oneshot::Sender<RpcResult<Message>>,
}

/// A single outstanding call. `Go` returns this immediately; `Call` is
/// `go` followed by `done().await`.
pub struct Call {
    pub service_path: String,
    pub service_method: String,
    pub raw: bool,
    seq: u64,
    rx: oneshot::Receiver<RpcResult<Message>>,
}

impl Call {
    pub(crate) fn new(
        service_path: String,
        service_method: String,
        raw: bool,
        seq: u64,
        rx: oneshot::Receiver<RpcResult<Message>>,
    ) -> Self {
        Self {
            service_path,
            service_method,
            raw,
            seq,
            rx,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Waits for the response. Resolves with the error the read loop
    /// stored in `Metadata[ServiceError]` on an Error-status response, or
    /// the transport error that cascaded to every pending call on a read
    /// failure.
    pub async fn done(self) -> RpcResult<Message> {
        self.rx
            .await
            .unwrap_or(Err(RpcError::ConnectionClosed))
    }
}
