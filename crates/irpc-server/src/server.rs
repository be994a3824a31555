//! The connection-accepting server (§4.5).
//!
//! Generalizes the teacher's `run_tcp_listener`/`serve_connection` (which
//! serve one connection fully before accepting the next) to concurrent
//! connections: the accept loop spawns a task per connection, and each
//! connection spawns a task per request, mirroring §5's "one accept
//! thread, one read-loop per connection, one handler thread per request".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::{mpsc, watch, Mutex, Notify, RwLock};

use irpc_proto::{
    meta_key, BufferPool, CompressType, CompressorRegistry, Message, MessagePool, Plugins,
    RpcError, RpcResult, ServiceError,
};

use crate::handler::{Handler, TypedHandler};
use crate::options::ServerOptions;

pub type DynReader = Box<dyn tokio::io::AsyncRead + Unpin + Send>;
pub type DynWriter = Box<dyn tokio::io::AsyncWrite + Unpin + Send>;
type MethodTable = HashMap<String, Arc<dyn Handler>>;

struct Inner {
    registry: RwLock<HashMap<String, MethodTable>>,
    options: ServerOptions,
    compressors: CompressorRegistry,
    plugins: Plugins,
    message_pool: MessagePool,
    buffer_pool: BufferPool,
    in_flight: AtomicUsize,
    in_shutdown: AtomicBool,
    shutdown_notify: Notify,
    shutdown_tx: watch::Sender<bool>,
    next_conn_id: AtomicU64,
    next_seq: AtomicU64,
    connections: Mutex<HashMap<u64, Arc<Mutex<DynWriter>>>>,
}

/// Decrements the in-flight counter and wakes `shutdown` on drop, whether
/// the handler task finished normally or panicked.
struct InFlightGuard(Arc<Inner>);

impl InFlightGuard {
    fn new(inner: Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.shutdown_notify.notify_waiters();
    }
}

#[derive(Clone)]
pub struct Server(Arc<Inner>);

impl Server {
    pub fn new(options: ServerOptions, compressors: CompressorRegistry, plugins: Plugins) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Server(Arc::new(Inner {
            registry: RwLock::new(HashMap::new()),
            options,
            compressors,
            plugins,
            message_pool: MessagePool::new(),
            buffer_pool: BufferPool::new(),
            in_flight: AtomicUsize::new(0),
            in_shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            shutdown_tx,
            next_conn_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
        }))
    }

    /// Registers a typed method adapter. Replaces the source's reflective
    /// `Register`/`RegisterFunction` (§9 Design Notes): `Args`/`Reply` are
    /// fixed at the call site, so there is no runtime signature check and
    /// no shared reflective pool — each registration owns its own
    /// decode/invoke/encode closure (SPEC_FULL.md §4.5a).
    pub async fn register_method<Args, Reply, F, Fut>(
        &self,
        service_path: impl Into<String>,
        method: impl Into<String>,
        f: F,
    ) where
        Args: DeserializeOwned + Send + 'static,
        Reply: Serialize + Send + 'static,
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Reply, ServiceError>> + Send + 'static,
    {
        let service_path = service_path.into();
        {
            let mut registry = self.0.registry.write().await;
            registry
                .entry(service_path.clone())
                .or_default()
                .insert(method.into(), Arc::new(TypedHandler::new(f)) as Arc<dyn Handler>);
        }
        self.0.plugins.register(&service_path).await;
    }

    pub async fn unregister_service(&self, service_path: &str) {
        self.0.registry.write().await.remove(service_path);
        self.0.plugins.unregister(service_path).await;
    }

    /// Invokes a registered handler directly, bypassing wire framing —
    /// the seam the HTTP and JSON-RPC gateways dispatch through.
    pub async fn invoke(
        &self,
        service_path: &str,
        service_method: &str,
        codec: irpc_proto::Codec,
        payload: &[u8],
    ) -> Result<Vec<u8>, ServiceError> {
        let _guard = InFlightGuard::new(self.0.clone());
        let handler = {
            let registry = self.0.registry.read().await;
            registry
                .get(service_path)
                .and_then(|methods| methods.get(service_method))
                .cloned()
        };
        match handler {
            Some(handler) => handler.invoke(codec, payload).await,
            None => Err(ServiceError::method_not_found(format!(
                "{service_path}.{service_method}"
            ))),
        }
    }

    /// Same seam as [`Server::invoke`], but threads request/response
    /// metadata and the plugin container through — what the HTTP
    /// gateway's `X-IRPC-Meta` round trip and §4.8's "plugins on the
    /// `Server` itself" need that the bare payload-in/payload-out `invoke`
    /// cannot carry.
    pub async fn invoke_with_meta(
        &self,
        service_path: &str,
        service_method: &str,
        codec: irpc_proto::Codec,
        payload: &[u8],
        request_meta: &[(String, String)],
    ) -> Result<(Vec<u8>, Vec<(String, String)>), ServiceError> {
        let _guard = InFlightGuard::new(self.0.clone());

        let mut request = Message::new_request(service_path, service_method);
        request.metadata = request_meta.to_vec();

        if let Err(e) = self.0.plugins.pre_call(service_path, service_method).await {
            self.0
                .plugins
                .post_call(service_path, service_method, Some(&e.to_string()))
                .await;
            return Err(ServiceError::internal(e.to_string()));
        }

        let handler = {
            let registry = self.0.registry.read().await;
            registry
                .get(service_path)
                .and_then(|methods| methods.get(service_method))
                .cloned()
        };

        let result: Result<Vec<u8>, ServiceError> = match handler {
            Some(handler) => handler.invoke(codec, payload).await,
            None => Err(ServiceError::method_not_found(format!(
                "{service_path}.{service_method}"
            ))),
        };
        let err_text = result.as_ref().err().map(|e| e.to_string());

        let mut response = request.new_response();
        match &result {
            Ok(reply) => response.payload = reply.clone().into(),
            Err(e) => response.set_error(e.to_string()),
        }

        if let Err(e) = self.0.plugins.pre_write_response(&request, &mut response).await {
            response.set_error(e.to_string());
        }

        self.0.plugins.post_write_response(&request, &response).await;
        self.0
            .plugins
            .post_call(service_path, service_method, err_text.as_deref())
            .await;

        match result {
            Ok(reply) => Ok((reply, response.metadata)),
            Err(e) => Err(e),
        }
    }

    /// Hands an already-accepted connection to the server's native
    /// per-connection loop — the seam a cmux-style front door (an
    /// irpc-gateway listener peeking the first bytes of each connection)
    /// uses to route raw-protocol traffic here while routing HTTP/JSON-RPC
    /// traffic elsewhere.
    pub fn serve_connection(&self, reader: DynReader, writer: DynWriter, remote: String) {
        let shutdown_rx = self.0.shutdown_tx.subscribe();
        self.spawn_connection(reader, writer, remote, shutdown_rx);
    }

    /// Snapshot of the server's configured options — the seam the HTTP
    /// gateway reads `disable_http_gateway`/`disable_json_rpc` from.
    pub fn options(&self) -> ServerOptions {
        self.0.options.clone()
    }

    /// Runs the configured `AuthFunc` against a bearer token, the same
    /// check the native connection loop applies to `Metadata[AuthKey]`.
    /// Admits the request when no `AuthFunc` is configured.
    pub fn check_auth(&self, token: &str) -> bool {
        match &self.0.options.auth_func {
            Some(f) => f(token),
            None => true,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.0.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_in_shutdown(&self) -> bool {
        self.0.in_shutdown.load(Ordering::SeqCst)
    }

    /// Runs the accept loop until `shutdown`/`close` is called. Per §5,
    /// accept errors back off 5ms→1s doubling rather than spinning.
    pub async fn serve(&self, network: &str, address: &str) -> RpcResult<()> {
        match network {
            "tcp" => self.serve_tcp(address).await,
            "unix" => self.serve_unix(address).await,
            other => Err(RpcError::UnsupportedTransport(other.to_string())),
        }
    }

    async fn serve_tcp(&self, address: &str) -> RpcResult<()> {
        let listener = TcpListener::bind(address).await?;
        tracing::info!(%address, "irpc server listening (tcp)");
        let mut shutdown_rx = self.0.shutdown_tx.subscribe();
        let mut backoff = Duration::from_millis(5);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::info!("listener closing");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        backoff = Duration::from_millis(5);
                        let _ = stream.set_nodelay(true);
                        // tcp_keepalive is recorded in options but not applied to the
                        // socket: setting a keepalive *period* needs socket2, which
                        // isn't in this stack (see irpc-client::connect for the same
                        // constraint on the dial side).
                        let (read_half, write_half) = stream.into_split();
                        self.spawn_connection(Box::new(read_half), Box::new(write_half), peer.to_string(), shutdown_rx.clone());
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept error, backing off");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(1));
                    }
                }
            }
        }
    }

    #[cfg(unix)]
    async fn serve_unix(&self, path: &str) -> RpcResult<()> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        tracing::info!(%path, "irpc server listening (unix)");
        let mut shutdown_rx = self.0.shutdown_tx.subscribe();
        let mut backoff = Duration::from_millis(5);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        backoff = Duration::from_millis(5);
                        let (read_half, write_half) = stream.into_split();
                        self.spawn_connection(Box::new(read_half), Box::new(write_half), format!("unix@{path}"), shutdown_rx.clone());
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept error, backing off");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(1));
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn serve_unix(&self, _path: &str) -> RpcResult<()> {
        Err(RpcError::UnsupportedTransport(
            "unix domain sockets are not available on this platform".into(),
        ))
    }

    fn spawn_connection(
        &self,
        reader: DynReader,
        writer: DynWriter,
        remote: String,
        shutdown_rx: watch::Receiver<bool>,
    ) {
        let inner = self.0.clone();
        tokio::spawn(async move {
            handle_connection(inner, reader, writer, remote, shutdown_rx).await;
        });
    }

    /// Sends a server-initiated oneway message to one connection
    /// (§4.5 `SendMessage`). The sequence number comes from a dedicated
    /// server-side counter, distinct from any client's request sequence.
    pub async fn send_message(
        &self,
        conn_id: u64,
        service_path: impl Into<String>,
        service_method: impl Into<String>,
        payload: Vec<u8>,
    ) -> RpcResult<()> {
        let writer = {
            let connections = self.0.connections.lock().await;
            connections.get(&conn_id).cloned()
        };
        let Some(writer) = writer else {
            return Err(RpcError::ConnectionClosed);
        };
        let mut msg = Message::new_request(service_path, service_method);
        msg.header.set_oneway(true);
        msg.header.seq = self.0.next_seq.fetch_add(1, Ordering::SeqCst);
        msg.payload = payload.into();
        let mut w = writer.lock().await;
        msg.write_to_pooled(&mut *w, &self.0.compressors, &self.0.buffer_pool).await
    }

    /// Graceful shutdown (§4.5, §8): unregisters every service, stops the
    /// accept loop and tells every connection's read loop to quiesce, then
    /// polls the in-flight counter every `shutdown_poll_interval` until it
    /// reaches zero or `timeout` elapses.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> RpcResult<()> {
        if self.0.in_shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let service_paths: Vec<String> = self.0.registry.read().await.keys().cloned().collect();
        for sp in &service_paths {
            self.0.plugins.unregister(sp).await;
        }
        self.0.registry.write().await.clear();

        let _ = self.0.shutdown_tx.send(true);

        let start = tokio::time::Instant::now();
        loop {
            if self.0.in_flight.load(Ordering::SeqCst) == 0 {
                return Ok(());
            }
            if let Some(d) = timeout {
                if start.elapsed() >= d {
                    return Err(RpcError::Timeout);
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.0.options.shutdown_poll_interval) => {}
                _ = self.0.shutdown_notify.notified() => {}
            }
        }
    }

    /// Immediate shutdown, no drain.
    pub fn close(&self) {
        self.0.in_shutdown.store(true, Ordering::SeqCst);
        let _ = self.0.shutdown_tx.send(true);
    }

    /// Spawns a replacement process inheriting stdio/env, then gracefully
    /// shuts this one down.
    pub async fn restart(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        let exe = std::env::current_exe()?;
        let args: Vec<String> = std::env::args().skip(1).collect();
        std::process::Command::new(exe).args(args).spawn()?;
        let _ = self.shutdown(timeout).await;
        Ok(())
    }
}

async fn handle_connection(
    inner: Arc<Inner>,
    mut reader: DynReader,
    writer: DynWriter,
    remote: String,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    inner.plugins.connection_created(&remote).await;
    let writer = Arc::new(Mutex::new(writer));
    let conn_id = inner.next_conn_id.fetch_add(1, Ordering::SeqCst);
    inner.connections.lock().await.insert(conn_id, writer.clone());

    let write_chan: Option<mpsc::Sender<Vec<u8>>> = if inner.options.async_write {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
        let writer = writer.clone();
        tokio::spawn(async move {
            while let Some(buf) = rx.recv().await {
                let mut w = writer.lock().await;
                if w.write_all(&buf).await.is_err() {
                    break;
                }
                let _ = w.flush().await;
            }
        });
        Some(tx)
    } else {
        None
    };

    loop {
        let mut msg = inner.message_pool.get();
        let read_fut = read_one(&mut reader, &inner, &mut msg);
        let ok = tokio::select! {
            _ = shutdown_rx.changed() => {
                tracing::debug!(%remote, "connection quiescing for shutdown");
                false
            }
            result = read_fut => match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(%remote, error = %e, "connection closed");
                    false
                }
            },
        };
        if !ok {
            break;
        }

        if let Some(auth) = &inner.options.auth_func {
            if !msg.header.is_heartbeat() {
                let token = msg.get_meta(meta_key::AUTH_KEY).unwrap_or("");
                if !auth(token) {
                    let mut response = inner.message_pool.get();
                    response.fill_response_from(&msg);
                    response.set_error("authentication failed");
                    write_response(&inner, &writer, &write_chan, &response).await;
                    inner.message_pool.free(response);
                    inner.message_pool.free(msg);
                    break;
                }
            }
        }

        if msg.header.is_heartbeat() {
            inner.plugins.heartbeat(&msg).await;
            let mut response = inner.message_pool.get();
            response.fill_response_from(&msg);
            response.header.set_heartbeat(true);
            response.payload = msg.payload.clone();
            write_response(&inner, &writer, &write_chan, &response).await;
            inner.message_pool.free(response);
            inner.message_pool.free(msg);
            continue;
        }

        let inner = inner.clone();
        let writer = writer.clone();
        let write_chan = write_chan.clone();
        tokio::spawn(async move {
            handle_request(inner, msg, writer, write_chan).await;
        });
    }

    inner.connections.lock().await.remove(&conn_id);
    inner.plugins.connection_closed(&remote).await;
}

async fn read_one(reader: &mut DynReader, inner: &Inner, msg: &mut Message) -> RpcResult<()> {
    let fut = msg.read_from_pooled(
        reader,
        &inner.compressors,
        inner.options.max_message_len,
        &inner.buffer_pool,
    );
    match inner.options.read_timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
            Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "read timeout",
            )))
        }),
        None => fut.await,
    }
}

/// Dispatches a single request: §4.5 step 4/5 (per-request timeout,
/// explicit registry lookup, invoke, response encoding).
async fn handle_request(
    inner: Arc<Inner>,
    msg: Message,
    writer: Arc<Mutex<DynWriter>>,
    write_chan: Option<mpsc::Sender<Vec<u8>>>,
) {
    let _guard = InFlightGuard::new(inner.clone());
    let oneway = msg.header.is_oneway();

    if let Err(e) = inner.plugins.pre_call(&msg.service_path, &msg.service_method).await {
        if !oneway {
            let mut response = inner.message_pool.get();
            response.fill_response_from(&msg);
            response.set_error(e.to_string());
            write_response(&inner, &writer, &write_chan, &response).await;
            inner.message_pool.free(response);
        }
        inner
            .plugins
            .post_call(&msg.service_path, &msg.service_method, Some(&e.to_string()))
            .await;
        inner.message_pool.free(msg);
        return;
    }

    let codec = match irpc_proto::Codec::from_serialize_type(
        msg.header.serialize_type().unwrap_or_default(),
    ) {
        Ok(c) => c,
        Err(e) => {
            if !oneway {
                let mut response = inner.message_pool.get();
                response.fill_response_from(&msg);
                response.set_error(e.to_string());
                write_response(&inner, &writer, &write_chan, &response).await;
                inner.message_pool.free(response);
            }
            inner.message_pool.free(msg);
            return;
        }
    };

    let handler = {
        let registry = inner.registry.read().await;
        registry
            .get(&msg.service_path)
            .and_then(|methods| methods.get(&msg.service_method))
            .cloned()
    };

    let result: Result<Vec<u8>, ServiceError> = match handler {
        Some(handler) => {
            let server_timeout = msg
                .get_meta(meta_key::SERVER_TIMEOUT)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis);
            let invoke = handler.invoke(codec, &msg.payload);
            match server_timeout {
                Some(d) => match tokio::time::timeout(d, invoke).await {
                    Ok(r) => r,
                    Err(_) => Err(ServiceError::internal("handler timed out")),
                },
                None => invoke.await,
            }
        }
        None => Err(ServiceError::method_not_found(format!(
            "{}.{}",
            msg.service_path, msg.service_method
        ))),
    };

    let err_text = result.as_ref().err().map(|e| e.to_string());

    let mut response = inner.message_pool.get();
    response.fill_response_from(&msg);
    for (k, v) in &msg.metadata {
        if k != meta_key::AUTH_KEY && k != meta_key::SERVER_TIMEOUT {
            response.metadata.push((k.clone(), v.clone()));
        }
    }
    match result {
        Ok(payload) => {
            response.payload = payload.into();
            if response.payload.len() > 1024 {
                let request_compression = msg.header.compress_type().unwrap_or(CompressType::None);
                if request_compression != CompressType::None {
                    response.header.set_compress_type(request_compression);
                }
            }
        }
        Err(e) => response.set_error(e.to_string()),
    }

    if let Err(e) = inner.plugins.pre_write_response(&msg, &mut response).await {
        response.set_error(e.to_string());
    }

    if !oneway {
        write_response(&inner, &writer, &write_chan, &response).await;
    }
    inner.plugins.post_write_response(&msg, &response).await;
    inner
        .plugins
        .post_call(&msg.service_path, &msg.service_method, err_text.as_deref())
        .await;

    inner.message_pool.free(response);
    inner.message_pool.free(msg);
}

async fn write_response(
    inner: &Arc<Inner>,
    writer: &Arc<Mutex<DynWriter>>,
    write_chan: &Option<mpsc::Sender<Vec<u8>>>,
    response: &Message,
) {
    if let Some(tx) = write_chan {
        match response.encode(&inner.compressors) {
            Ok(buf) => {
                let _ = tx.send(buf).await;
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode response"),
        }
    } else {
        let mut w = writer.lock().await;
        if let Err(e) = response
            .write_to_pooled(&mut *w, &inner.compressors, &inner.buffer_pool)
            .await
        {
            tracing::warn!(error = %e, "failed to write response");
        }
    }
}
