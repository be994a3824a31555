//! The connection cache `getCachedClient` step (§4.7): one dialed
//! [`Client`] per endpoint key, shared across callers, with a breaker
//! guarding each endpoint and a singleflight dial so concurrent callers
//! racing for the same new endpoint only dial once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};

use irpc_proto::{error_code, CompressorRegistry, Plugins, RpcError, RpcResult, ServiceError};

use crate::breaker::{BreakerFactory, CircuitBreaker};

type DialCell = Arc<OnceCell<RpcResult<irpc_client::Client>>>;

struct Entry {
    client: DialCell,
    breaker: Arc<dyn CircuitBreaker>,
}

pub(crate) struct ClientCache {
    entries: Mutex<HashMap<String, Entry>>,
    client_options: irpc_client::ClientOptions,
    compressors: CompressorRegistry,
    plugins: Plugins,
    gen_breaker: Option<BreakerFactory>,
}

impl ClientCache {
    pub(crate) fn new(
        client_options: irpc_client::ClientOptions,
        compressors: CompressorRegistry,
        plugins: Plugins,
        gen_breaker: Option<BreakerFactory>,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            client_options,
            compressors,
            plugins,
            gen_breaker,
        }
    }

    /// Implements §4.7's four-step algorithm:
    /// 1. caller already checked shutdown;
    /// 2. if the endpoint's breaker is open, fail without dialing;
    /// 3. on a cache hit, hand back the shared client;
    /// 4. on a miss, dial exactly once per endpoint — concurrent misses
    ///    converge on the same `OnceCell` rather than each starting their
    ///    own dial — tripping the breaker on failure or installing the
    ///    client on success. A client that has gone `is_shutdown()` is
    ///    treated as a miss and redialed.
    pub(crate) async fn get(&self, endpoint: &str) -> RpcResult<irpc_client::Client> {
        loop {
            let existing = {
                let entries = self.entries.lock().await;
                match entries.get(endpoint) {
                    Some(entry) => {
                        if !entry.breaker.ready() {
                            return Err(RpcError::Service(ServiceError::new(
                                error_code::BREAKER_OPEN,
                                format!("breaker open for {endpoint}"),
                            )));
                        }
                        Some((entry.client.clone(), entry.breaker.clone()))
                    }
                    None => None,
                }
            };

            if let Some((once, breaker)) = existing {
                if let Some(result) = once.get() {
                    match result {
                        Ok(client) if !client.is_shutdown() => return Ok(client.clone()),
                        _ => {
                            self.drop_if_current(endpoint, &once).await;
                            continue;
                        }
                    }
                }
                // A dial for this endpoint is already in flight; join it
                // instead of starting a second one.
                return self.finish_dial(endpoint, once, breaker).await;
            }

            let breaker = match &self.gen_breaker {
                Some(factory) => factory(),
                None => crate::breaker::ConsecutiveFailureBreaker::new(5, Duration::from_secs(30)),
            };
            let once: DialCell = Arc::new(OnceCell::new());
            {
                let mut entries = self.entries.lock().await;
                if entries.contains_key(endpoint) {
                    // Someone else installed an entry between our read and
                    // this write; retry from the top to join theirs.
                    continue;
                }
                entries.insert(
                    endpoint.to_string(),
                    Entry {
                        client: once.clone(),
                        breaker: breaker.clone(),
                    },
                );
            }
            return self.finish_dial(endpoint, once, breaker).await;
        }
    }

    async fn finish_dial(
        &self,
        endpoint: &str,
        once: DialCell,
        breaker: Arc<dyn CircuitBreaker>,
    ) -> RpcResult<irpc_client::Client> {
        let result = once
            .get_or_init(|| async {
                let (network, address) = irpc_proto::split_endpoint(endpoint);
                irpc_client::Client::connect(
                    network,
                    address,
                    self.client_options.clone(),
                    self.compressors.clone(),
                    self.plugins.clone(),
                )
                .await
            })
            .await;

        match result {
            Ok(client) => {
                breaker.success();
                Ok(client.clone())
            }
            Err(err) => {
                breaker.fail();
                self.drop_if_current(endpoint, &once).await;
                Err(clone_dial_error(err))
            }
        }
    }

    /// Removes the cached entry only if it's still the one we're holding
    /// — a concurrent successful redial may already have replaced it.
    async fn drop_if_current(&self, endpoint: &str, once: &DialCell) {
        let mut entries = self.entries.lock().await;
        if let Some(current) = entries.get(endpoint) {
            if Arc::ptr_eq(&current.client, once) {
                entries.remove(endpoint);
            }
        }
    }

    /// Drops a cached entry so the next `get` redials, used when a call
    /// against it produced an uncovered error.
    pub(crate) async fn evict(&self, endpoint: &str) {
        self.entries.lock().await.remove(endpoint);
    }

    pub(crate) async fn note_result(&self, endpoint: &str, success: bool) {
        let entries = self.entries.lock().await;
        if let Some(entry) = entries.get(endpoint) {
            if success {
                entry.breaker.success();
            } else {
                entry.breaker.fail();
            }
        }
    }

    pub(crate) async fn close_all(&self) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            if let Some(Ok(client)) = entry.client.get() {
                client.close().await;
            }
        }
    }
}

fn clone_dial_error(err: &RpcError) -> RpcError {
    match err {
        RpcError::Io(e) => RpcError::Io(std::io::Error::new(e.kind(), e.to_string())),
        other => RpcError::Service(ServiceError::internal(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_misses_against_the_same_endpoint_all_resolve_and_the_cache_ends_empty() {
        // A real dial-count assertion would need an instrumented
        // transport; what's verifiable at this layer is that every
        // concurrent caller racing a miss gets a consistent answer and
        // that the `Entry`/`OnceCell` machinery never deadlocks or leaves
        // the map in an inconsistent state — `get` always converges on
        // exactly one `Entry` per key at a time (see `get`'s loop: a
        // second caller that loses the insert race falls through to
        // "join the existing OnceCell" rather than starting its own).
        let cache = Arc::new(ClientCache::new(
            irpc_client::ClientOptions {
                connect_timeout: Duration::from_millis(50),
                ..Default::default()
            },
            CompressorRegistry::new(),
            Plugins::new(),
            None,
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get("tcp@127.0.0.1:1").await }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_err());
        }
        assert_eq!(cache.entries.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn breaker_open_short_circuits_without_dialing() {
        let breaker = crate::breaker::ConsecutiveFailureBreaker::new(1, Duration::from_secs(60));
        breaker.fail();
        assert!(!breaker.ready());
    }
}
