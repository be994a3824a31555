//! The low-level, full-duplex `Client` (§4.4).
//!
//! One physical connection, multiplexed by sequence number: any number of
//! callers may have a `Call` outstanding at once, and responses may come
//! back in any order — this generalizes the teacher's `RpcClient`, which
//! only ever has one in-flight request at a time (`Mutex<W>` serializes
//! whole request/response round trips), to the spec's pending-map model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};

use irpc_proto::{
    BufferPool, Codec, CompressorRegistry, Message, MessagePool, MessageStatusType, Plugins,
    RpcError, RpcResult,
};

use crate::call::{Call, PendingEntry};
use crate::connect::{self, DynReader, DynWriter};
use crate::options::ClientOptions;

struct Inner {
    writer: Mutex<DynWriter>,
    pending: Mutex<HashMap<u64, PendingEntry>>,
    seq: AtomicU64,
    closing: AtomicBool,
    shutdown: AtomicBool,
    remote_addr: String,
    options: ClientOptions,
    compressors: CompressorRegistry,
    plugins: Plugins,
    message_pool: MessagePool,
    buffer_pool: BufferPool,
    server_message_tx: Mutex<Option<mpsc::Sender<Message>>>,
}

/// A connected, full-duplex RPC client. Cheap to clone — every clone
/// shares the same connection, pending map, and background tasks.
#[derive(Clone)]
pub struct Client(Arc<Inner>);

impl Client {
    /// Dials `network@address` and starts the read loop (and heartbeat
    /// loop, if enabled). Mirrors the teacher's `connect_tcp_with_timeout`
    /// generalized to the §4.4 factory table.
    pub async fn connect(
        network: &str,
        address: &str,
        options: ClientOptions,
        compressors: CompressorRegistry,
        plugins: Plugins,
    ) -> RpcResult<Self> {
        let dial_result = connect::dial(network, address, &options).await;
        let (reader, writer, remote_addr) = match dial_result {
            Ok(t) => t,
            Err(e) => {
                plugins
                    .connection_create_failed(&format!("{network}@{address}"), &e.to_string())
                    .await;
                return Err(e);
            }
        };
        Ok(Self::from_io(reader, writer, remote_addr, options, compressors, plugins).await)
    }

    /// Wraps an already-connected reader/writer pair (the in-memory
    /// transport named in §6, and the seam every other transport bottoms
    /// out through).
    pub async fn from_io(
        reader: DynReader,
        writer: DynWriter,
        remote_addr: String,
        options: ClientOptions,
        compressors: CompressorRegistry,
        plugins: Plugins,
    ) -> Self {
        let inner = Arc::new(Inner {
            writer: Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(1),
            closing: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            remote_addr,
            options,
            compressors,
            plugins,
            message_pool: MessagePool::new(),
            buffer_pool: BufferPool::new(),
            server_message_tx: Mutex::new(None),
        });
        inner.plugins.connection_created(&inner.remote_addr).await;

        tokio::spawn(run_read_loop(inner.clone(), reader));
        if inner.options.heartbeat {
            tokio::spawn(run_heartbeat_loop(inner.clone()));
        }

        Client(inner)
    }

    pub fn remote_addr(&self) -> &str {
        &self.0.remote_addr
    }

    pub fn is_closing(&self) -> bool {
        self.0.closing.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.shutdown.load(Ordering::SeqCst)
    }

    /// Subscribes to server-initiated (oneway, non-heartbeat) requests.
    pub async fn register_server_message_chan(&self) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(if self.0.options.bidirectional_block { 1 } else { 64 });
        *self.0.server_message_tx.lock().await = Some(tx);
        rx
    }

    pub async fn unregister_server_message_chan(&self) {
        *self.0.server_message_tx.lock().await = None;
    }

    /// Allocates a sequence number, inserts into the pending map, and
    /// writes the request — atomically with respect to other callers, per
    /// §5's ordering guarantee.
    pub async fn go(
        &self,
        service_path: impl Into<String>,
        service_method: impl Into<String>,
        args: &impl Serialize,
        oneway: bool,
    ) -> RpcResult<Call> {
        if self.0.closing.load(Ordering::SeqCst) {
            return Err(RpcError::Shutdown);
        }
        let service_path = service_path.into();
        let service_method = service_method.into();
        self.0
            .plugins
            .pre_call(&service_path, &service_method)
            .await
            .map_err(|e| RpcError::Io(std::io::Error::other(e.to_string())))?;

        let codec = Codec::from_serialize_type(self.0.options.serialize_type)?;
        let payload = codec.encode(args)?;

        let mut msg = Message::new_request(&service_path, &service_method);
        msg.header.set_oneway(oneway);
        msg.header.set_compress_type(self.0.options.compress_type);
        let _ = msg.header.set_serialize_type(self.0.options.serialize_type);
        msg.payload = payload.into();

        let (tx, rx) = oneshot::channel();
        let seq = {
            let mut pending = self.0.pending.lock().await;
            let seq = self.0.seq.fetch_add(1, Ordering::SeqCst);
            msg.header.seq = seq;
            if !oneway {
                pending.insert(seq, PendingEntry { tx });
            }
            seq
        };

        {
            let mut writer = self.0.writer.lock().await;
            if let Err(e) = msg
                .write_to_pooled(&mut *writer, &self.0.compressors, &self.0.buffer_pool)
                .await
            {
                self.0.pending.lock().await.remove(&seq);
                return Err(e);
            }
        }

        if oneway {
            // No response is expected; resolve immediately so `Call::done`
            // returns without blocking.
            let _ = tx.send(Ok(Message::default()));
        }

        Ok(Call::new(service_path, service_method, false, seq, rx))
    }

    /// Synchronous wrapper: `go` then wait, optionally bounded by
    /// `timeout`. On timeout the call is removed from the pending map
    /// (§4.4's `ctx.Done` semantics).
    pub async fn call<Args, Reply>(
        &self,
        service_path: impl Into<String>,
        service_method: impl Into<String>,
        args: &Args,
    ) -> RpcResult<Reply>
    where
        Args: Serialize,
        Reply: DeserializeOwned,
    {
        self.call_with_timeout(service_path, service_method, args, None)
            .await
    }

    pub async fn call_with_timeout<Args, Reply>(
        &self,
        service_path: impl Into<String>,
        service_method: impl Into<String>,
        args: &Args,
        timeout: Option<Duration>,
    ) -> RpcResult<Reply>
    where
        Args: Serialize,
        Reply: DeserializeOwned,
    {
        let service_path = service_path.into();
        let service_method = service_method.into();
        let call = self.go(service_path.clone(), service_method.clone(), args, false).await?;
        let seq = call.seq();

        let response = match timeout {
            Some(d) => match tokio::time::timeout(d, call.done()).await {
                Ok(r) => r,
                Err(_) => {
                    self.0.pending.lock().await.remove(&seq);
                    self.0
                        .plugins
                        .post_call(&service_path, &service_method, Some("timeout"))
                        .await;
                    return Err(RpcError::Timeout);
                }
            },
            None => call.done().await,
        };

        let result = match &response {
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };
        self.0
            .plugins
            .post_call(&service_path, &service_method, result.as_deref())
            .await;

        let msg = response?;
        let codec = Codec::from_serialize_type(msg.header.serialize_type()?)?;
        let decoded = codec.decode(&msg.payload);
        self.0.message_pool.free(msg);
        decoded
    }

    /// Bypasses the codec for an already-encoded [`Message`]; returns the
    /// raw response (headers, metadata, and payload untouched).
    pub async fn send_raw(&self, mut msg: Message) -> RpcResult<Message> {
        if self.0.closing.load(Ordering::SeqCst) {
            return Err(RpcError::Shutdown);
        }
        let (tx, rx) = oneshot::channel();
        let oneway = msg.header.is_oneway();
        let seq = {
            let mut pending = self.0.pending.lock().await;
            let seq = self.0.seq.fetch_add(1, Ordering::SeqCst);
            msg.header.seq = seq;
            if !oneway {
                pending.insert(seq, PendingEntry { tx });
            }
            seq
        };

        {
            let mut writer = self.0.writer.lock().await;
            if let Err(e) = msg
                .write_to_pooled(&mut *writer, &self.0.compressors, &self.0.buffer_pool)
                .await
            {
                self.0.pending.lock().await.remove(&seq);
                return Err(e);
            }
        }

        if oneway {
            return Ok(Message::default());
        }
        rx.await.unwrap_or(Err(RpcError::ConnectionClosed))
    }

    /// Marks the client closing, drains every pending call with
    /// [`RpcError::Shutdown`], and shuts down the write half. Idempotent:
    /// a second call observes `closing` already set and only re-runs the
    /// (already empty) drain, per §9's stated idempotence requirement.
    pub async fn close(&self) {
        self.0.closing.store(true, Ordering::SeqCst);
        let mut pending = self.0.pending.lock().await;
        for (_, entry) in pending.drain() {
            let _ = entry.tx.send(Err(RpcError::Shutdown));
        }
        drop(pending);
        use tokio::io::AsyncWriteExt;
        let mut writer = self.0.writer.lock().await;
        let _ = writer.shutdown().await;
        self.0.plugins.connection_closed(&self.0.remote_addr).await;
    }
}

/// Reads frames until the connection closes or an unrecoverable protocol
/// error occurs, dispatching each to the matching pending call (or, for
/// server-initiated oneway requests, the server-message channel) per the
/// read-loop algorithm in §4.4.
async fn run_read_loop(inner: Arc<Inner>, mut reader: DynReader) {
    loop {
        let mut msg = inner.message_pool.get();
        let read = msg
            .read_from_pooled(&mut reader, &inner.compressors, inner.options.max_message_len, &inner.buffer_pool)
            .await;
        if let Err(err) = read {
            fail_all_pending(&inner, &err).await;
            inner.shutdown.store(true, Ordering::SeqCst);
            if let Some(tx) = inner.server_message_tx.lock().await.take() {
                let mut synthetic = Message::default();
                synthetic.set_error(err.to_string());
                let _ = tx.try_send(synthetic);
            }
            inner.plugins.connection_closed(&inner.remote_addr).await;
            return;
        }

        if msg.header.message_type() == irpc_proto::MessageType::Request
            && !msg.header.is_heartbeat()
            && msg.header.is_oneway()
        {
            let tx = inner.server_message_tx.lock().await.clone();
            if let Some(tx) = tx {
                if inner.options.bidirectional_block {
                    if tx.send(msg).await.is_err() {
                        *inner.server_message_tx.lock().await = None;
                    }
                } else {
                    match tx.try_send(msg) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            *inner.server_message_tx.lock().await = None;
                        }
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!("server message channel full, dropping message");
                        }
                    }
                }
            }
            continue;
        }

        let entry = inner.pending.lock().await.remove(&msg.header.seq);
        let Some(entry) = entry else { continue };

        let result = if msg.header.status_type() == MessageStatusType::Error {
            let message = msg
                .get_meta(irpc_proto::meta_key::SERVICE_ERROR)
                .unwrap_or("unknown service error")
                .to_string();
            Err(RpcError::Service(irpc_proto::ServiceError::internal(message)))
        } else {
            Ok(msg)
        };
        let _ = entry.tx.send(result);
    }
}

async fn fail_all_pending(inner: &Arc<Inner>, err: &RpcError) {
    let mut pending = inner.pending.lock().await;
    for (_, entry) in pending.drain() {
        let _ = entry.tx.send(Err(clone_rpc_error(err)));
    }
}

/// `RpcError` doesn't implement `Clone` (its `thiserror::Error` sources
/// don't either); render the terminal error as text once and hand every
/// pending call the same shutdown-flavored error.
fn clone_rpc_error(err: &RpcError) -> RpcError {
    match err {
        RpcError::ConnectionClosed => RpcError::ConnectionClosed,
        other => RpcError::Service(irpc_proto::ServiceError::internal(other.to_string())),
    }
}

/// Sends a heartbeat call (empty service path/method, `Heartbeat` bit set)
/// every `HeartbeatInterval`, bounded by `MaxWaitForHeartbeat`; closes the
/// connection on timeout or transport error (§4.4, §8 seed scenario 2).
async fn run_heartbeat_loop(inner: Arc<Inner>) {
    let client = Client(inner.clone());
    let mut ticker = tokio::time::interval(inner.options.heartbeat_interval);
    loop {
        ticker.tick().await;
        if inner.shutdown.load(Ordering::SeqCst) || inner.closing.load(Ordering::SeqCst) {
            return;
        }

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let payload = nanos.to_be_bytes();

        let mut msg = Message::new_request("", "");
        msg.header.set_heartbeat(true);
        msg.payload = payload.to_vec().into();

        let outcome = tokio::time::timeout(inner.options.max_wait_for_heartbeat, async {
            let (tx, rx) = oneshot::channel();
            let seq = {
                let mut pending = inner.pending.lock().await;
                let seq = inner.seq.fetch_add(1, Ordering::SeqCst);
                msg.header.seq = seq;
                pending.insert(seq, PendingEntry { tx });
                seq
            };
            {
                let mut writer = inner.writer.lock().await;
                if let Err(e) = msg
                    .write_to_pooled(&mut *writer, &inner.compressors, &inner.buffer_pool)
                    .await
                {
                    inner.pending.lock().await.remove(&seq);
                    return Err(e);
                }
            }
            rx.await.unwrap_or(Err(RpcError::ConnectionClosed))
        })
        .await;

        match outcome {
            Ok(Ok(reply)) => {
                if reply.payload.as_ref() != payload {
                    tracing::warn!("heartbeat reply payload mismatch, ignoring");
                }
                inner.plugins.heartbeat(&reply).await;
            }
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(remote = %inner.remote_addr, "heartbeat failed, closing connection");
                client.close().await;
                return;
            }
        }
    }
}
