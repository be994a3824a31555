//! `XClient` (§4.7): discovery-and-selector-driven, failover-aware RPC
//! client built on top of the low-level [`irpc_client::Client`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use irpc_discovery::ServiceDiscovery;
use irpc_proto::{error_code, CompressorRegistry, Plugins, RpcError, RpcResult, ServiceError};
use irpc_selector::{SelectContext, Selector, ServerMap};

use crate::cache::ClientCache;
use crate::fail_mode::FailMode;
use crate::options::XClientOptions;

struct Inner {
    service_path: String,
    discovery: Arc<dyn ServiceDiscovery>,
    selector: Arc<dyn Selector>,
    options: XClientOptions,
    cache: ClientCache,
    plugins: Plugins,
    shutdown: AtomicBool,
    watch_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// A discovery-and-failover-aware client for one service path. Cheap to
/// clone — clones share the connection cache and selector state.
#[derive(Clone)]
pub struct XClient(Arc<Inner>);

impl XClient {
    pub async fn new(
        service_path: impl Into<String>,
        discovery: Arc<dyn ServiceDiscovery>,
        selector: Arc<dyn Selector>,
        options: XClientOptions,
    ) -> Self {
        Self::new_with_plugins(service_path, discovery, selector, options, Plugins::new()).await
    }

    /// Same as [`XClient::new`], but with a caller-supplied plugin
    /// container (§4.3 structural field) instead of an empty one —
    /// dialed connections and endpoint selection both run through it.
    pub async fn new_with_plugins(
        service_path: impl Into<String>,
        discovery: Arc<dyn ServiceDiscovery>,
        selector: Arc<dyn Selector>,
        options: XClientOptions,
        plugins: Plugins,
    ) -> Self {
        let service_path = service_path.into();
        discovery.set_filter(options.group.clone()).await;

        let cache = ClientCache::new(
            options.client_options.clone(),
            CompressorRegistry::new(),
            plugins.clone(),
            options.gen_breaker.clone(),
        );

        let initial = to_server_map(discovery.get_services().await);
        selector.update_server(&initial).await;

        let inner = Arc::new(Inner {
            service_path,
            discovery: discovery.clone(),
            selector: selector.clone(),
            options,
            cache,
            plugins,
            shutdown: AtomicBool::new(false),
            watch_task: Mutex::new(None),
        });

        let watch_handle = tokio::spawn(run_watch_loop(inner.clone(), discovery));
        *inner.watch_task.lock().await = Some(watch_handle);

        XClient(inner)
    }

    pub fn service_path(&self) -> &str {
        &self.0.service_path
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.shutdown.load(Ordering::SeqCst)
    }

    /// Dispatches per `FailMode`, per §4.7/§8.
    pub async fn call<Args, Reply>(&self, service_method: &str, args: &Args) -> RpcResult<Reply>
    where
        Args: Serialize + Sync,
        Reply: DeserializeOwned,
    {
        self.call_with_timeout(service_method, args, None).await
    }

    pub async fn call_with_timeout<Args, Reply>(
        &self,
        service_method: &str,
        args: &Args,
        timeout: Option<Duration>,
    ) -> RpcResult<Reply>
    where
        Args: Serialize + Sync,
        Reply: DeserializeOwned,
    {
        if self.is_shutdown() {
            return Err(RpcError::Shutdown);
        }
        match self.0.options.fail_mode {
            FailMode::Failfast => self.call_failfast(service_method, args, timeout).await,
            FailMode::Failtry => self.call_failtry(service_method, args, timeout).await,
            FailMode::Failover => self.call_failover(service_method, args, timeout).await,
            FailMode::Failbackup => self.call_failbackup(service_method, args, timeout).await,
        }
    }

    /// Selects an endpoint and runs it through the plugin container's
    /// `post_select` hook (§4.3: "Selector plugins wrap the chosen
    /// function and may veto or rewrite the result").
    async fn select_endpoint(&self, service_method: &str, hash_key: &[u8]) -> RpcResult<String> {
        let ctx = SelectContext::new(&self.0.service_path, service_method, hash_key);
        let chosen = self.0.selector.select(&ctx).await;
        let chosen = self
            .0
            .plugins
            .post_select(chosen)
            .await
            .map_err(|e| RpcError::Service(ServiceError::internal(e.to_string())))?;
        chosen.ok_or_else(|| RpcError::Service(ServiceError::new(error_code::NO_SERVER, "no server available")))
    }

    async fn call_once<Args, Reply>(
        &self,
        endpoint: &str,
        service_method: &str,
        args: &Args,
        timeout: Option<Duration>,
    ) -> RpcResult<Reply>
    where
        Args: Serialize,
        Reply: DeserializeOwned,
    {
        let client = self.0.cache.get(endpoint).await?;
        let result = client
            .call_with_timeout(&self.0.service_path, service_method, args, timeout)
            .await;
        match &result {
            Ok(_) => self.0.cache.note_result(endpoint, true).await,
            Err(err) if is_uncovered(err) => {
                self.0.cache.note_result(endpoint, false).await;
                self.0.cache.evict(endpoint).await;
            }
            Err(_) => {}
        }
        result
    }

    async fn call_failfast<Args, Reply>(
        &self,
        service_method: &str,
        args: &Args,
        timeout: Option<Duration>,
    ) -> RpcResult<Reply>
    where
        Args: Serialize,
        Reply: DeserializeOwned,
    {
        let endpoint = self.select_endpoint(service_method, &[]).await?;
        self.call_once(&endpoint, service_method, args, timeout).await
    }

    async fn call_failtry<Args, Reply>(
        &self,
        service_method: &str,
        args: &Args,
        timeout: Option<Duration>,
    ) -> RpcResult<Reply>
    where
        Args: Serialize,
        Reply: DeserializeOwned,
    {
        let endpoint = self.select_endpoint(service_method, &[]).await?;
        let mut last_err = None;
        for attempt in 0..=self.0.options.retries {
            match self.call_once(&endpoint, service_method, args, timeout).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    let retryable = is_uncovered(&err) && attempt < self.0.options.retries;
                    last_err = Some(err);
                    if !retryable {
                        break;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(RpcError::Service(ServiceError::new(
            error_code::NO_SERVER,
            "no server available",
        ))))
    }

    async fn call_failover<Args, Reply>(
        &self,
        service_method: &str,
        args: &Args,
        timeout: Option<Duration>,
    ) -> RpcResult<Reply>
    where
        Args: Serialize,
        Reply: DeserializeOwned,
    {
        let mut last_err = None;
        for attempt in 0..=self.0.options.retries {
            let endpoint = match self.select_endpoint(service_method, &[]).await {
                Ok(e) => e,
                Err(err) => {
                    last_err = Some(err);
                    continue;
                }
            };
            match self.call_once(&endpoint, service_method, args, timeout).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    let retryable = is_uncovered(&err) && attempt < self.0.options.retries;
                    last_err = Some(err);
                    if !retryable {
                        break;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(RpcError::Service(ServiceError::new(
            error_code::NO_SERVER,
            "no server available",
        ))))
    }

    async fn call_failbackup<Args, Reply>(
        &self,
        service_method: &str,
        args: &Args,
        timeout: Option<Duration>,
    ) -> RpcResult<Reply>
    where
        Args: Serialize,
        Reply: DeserializeOwned,
    {
        let primary = self.select_endpoint(service_method, &[]).await?;
        let primary_fut = self.call_once::<Args, Reply>(&primary, service_method, args, timeout);
        tokio::pin!(primary_fut);

        // Wait up to BackupLatency for the primary alone. A reply here —
        // success or error — is returned only if it's a success; an early
        // error still falls through to race a backup, since "first
        // successful reply wins" per §4.7.
        let early = tokio::time::timeout(self.0.options.backup_latency, &mut primary_fut).await;
        let primary_early_err = match early {
            Ok(Ok(reply)) => return Ok(reply),
            Ok(Err(err)) => Some(err),
            Err(_) => None,
        };

        let backup = self.select_endpoint(service_method, &[]).await;
        let backup_fut = async {
            match backup {
                Ok(endpoint) if endpoint != primary => {
                    self.call_once::<Args, Reply>(&endpoint, service_method, args, timeout).await
                }
                _ => Err(RpcError::Service(ServiceError::new(
                    error_code::NO_SERVER,
                    "no distinct backup endpoint available",
                ))),
            }
        };

        if let Some(primary_err) = primary_early_err {
            // The primary already failed; the backup is now the only
            // remaining hope.
            return backup_fut.await.map_err(|_| primary_err);
        }

        tokio::pin!(backup_fut);
        tokio::select! {
            result = &mut primary_fut => {
                match result {
                    Ok(reply) => Ok(reply),
                    Err(primary_err) => backup_fut.await.map_err(|_| primary_err),
                }
            }
            result = &mut backup_fut => {
                match result {
                    Ok(reply) => Ok(reply),
                    Err(_) => primary_fut.await,
                }
            }
        }
    }

    /// Fans a call out to every currently-known endpoint in parallel,
    /// returning the first success; collects every error if all fail.
    /// Hard-capped at one minute regardless of per-call timeout.
    pub async fn fork<Args, Reply>(&self, service_method: &str, args: Args) -> RpcResult<Reply>
    where
        Args: Serialize + Clone + Send + Sync + 'static,
        Reply: DeserializeOwned + Send + 'static,
    {
        let endpoints = to_server_map(self.0.discovery.get_services().await)
            .into_keys()
            .collect::<Vec<_>>();
        if endpoints.is_empty() {
            return Err(RpcError::Service(ServiceError::new(error_code::NO_SERVER, "no server available")));
        }

        let (tx, mut rx) = mpsc::channel(endpoints.len().max(1));
        for endpoint in endpoints {
            let this = self.clone();
            let service_method = service_method.to_string();
            let args = args.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = this.call_once::<Args, Reply>(&endpoint, &service_method, &args, None).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut errors = Vec::new();
        let deadline = tokio::time::sleep(Duration::from_secs(60));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                recv = rx.recv() => {
                    match recv {
                        Some(Ok(reply)) => return Ok(reply),
                        Some(Err(err)) => errors.push(err.to_string()),
                        None => break,
                    }
                }
                _ = &mut deadline => break,
            }
        }
        Err(RpcError::Service(ServiceError::new(
            error_code::NO_SERVER,
            format!("fork: all endpoints failed: {}", errors.join("; ")),
        )))
    }

    /// Fans a call out to every currently-known endpoint in parallel;
    /// succeeds only if every endpoint succeeds.
    pub async fn broadcast<Args, Reply>(&self, service_method: &str, args: Args) -> RpcResult<Vec<Reply>>
    where
        Args: Serialize + Clone + Send + Sync + 'static,
        Reply: DeserializeOwned + Send + 'static,
    {
        let endpoints = to_server_map(self.0.discovery.get_services().await)
            .into_keys()
            .collect::<Vec<_>>();
        if endpoints.is_empty() {
            return Err(RpcError::Service(ServiceError::new(error_code::NO_SERVER, "no server available")));
        }

        let mut handles = Vec::new();
        for endpoint in endpoints {
            let this = self.clone();
            let service_method = service_method.to_string();
            let args = args.clone();
            handles.push(tokio::spawn(async move {
                this.call_once::<Args, Reply>(&endpoint, &service_method, &args, None).await
            }));
        }

        let mut replies = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(reply)) => replies.push(reply),
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(RpcError::Service(ServiceError::internal("broadcast task panicked")))
                }
            }
        }
        Ok(replies)
    }

    /// Marks the xClient shut down, stops the discovery-watch task, and
    /// closes every cached connection.
    pub async fn close(&self) {
        self.0.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.0.watch_task.lock().await.take() {
            handle.abort();
        }
        self.0.cache.close_all().await;
        self.0.discovery.close().await;
    }
}

fn to_server_map(services: Vec<(String, String)>) -> ServerMap {
    services.into_iter().collect::<HashMap<_, _>>()
}

/// §4.7: any error that isn't server-reported (`ServiceError`) and isn't a
/// deadline/cancellation. Only these trigger eviction and retry.
fn is_uncovered(err: &RpcError) -> bool {
    !matches!(err, RpcError::Service(_) | RpcError::Timeout | RpcError::Cancelled)
}

async fn run_watch_loop(inner: Arc<Inner>, discovery: Arc<dyn ServiceDiscovery>) {
    let mut updates = discovery.watch_service().await;
    while let Some(services) = updates.recv().await {
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        inner.selector.update_server(&to_server_map(services)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irpc_discovery::StaticDiscovery;
    use irpc_selector::RoundRobin;

    fn fastfail_options() -> XClientOptions {
        XClientOptions {
            retries: 0,
            fail_mode: FailMode::Failtry,
            client_options: irpc_client::ClientOptions {
                connect_timeout: Duration::from_millis(50),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn no_known_servers_returns_no_server_error() {
        let discovery = StaticDiscovery::new(Vec::new());
        let selector = Arc::new(RoundRobin::new());
        let xclient = XClient::new("Arith", discovery, selector, fastfail_options()).await;

        let err = xclient
            .call::<_, serde_json::Value>("Mul", &serde_json::json!({"A": 1, "B": 2}))
            .await
            .unwrap_err();
        match err {
            RpcError::Service(e) => assert_eq!(e.code, error_code::NO_SERVER),
            other => panic!("expected NO_SERVER, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn uncovered_error_is_classified_correctly() {
        assert!(is_uncovered(&RpcError::ConnectionClosed));
        assert!(is_uncovered(&RpcError::Io(std::io::Error::other("boom"))));
        assert!(!is_uncovered(&RpcError::Timeout));
        assert!(!is_uncovered(&RpcError::Cancelled));
        assert!(!is_uncovered(&RpcError::Service(ServiceError::internal("nope"))));
    }
}
