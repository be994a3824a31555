//! `MultiServerDiscovery` (§6): a mutable multi-endpoint registry. Unlike
//! [`crate::StaticDiscovery`], `update` can be called at any time (e.g. from
//! an admin endpoint or a polling loop talking to an external registry),
//! and every live `watch_service` subscriber receives the new, filtered
//! list.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::discovery::{apply_filter, DiscoveryFilter, Service, ServiceDiscovery};

struct Inner {
    services: RwLock<Vec<Service>>,
    filter: RwLock<Option<DiscoveryFilter>>,
    watchers: RwLock<Vec<mpsc::Sender<Vec<Service>>>>,
}

impl Inner {
    async fn filtered(&self) -> Vec<Service> {
        let services = self.services.read().await;
        apply_filter(&services, &*self.filter.read().await)
    }

    async fn broadcast(&self) {
        let filtered = self.filtered().await;
        let mut watchers = self.watchers.write().await;
        watchers.retain(|tx| !tx.is_closed());
        for tx in watchers.iter() {
            let _ = tx.try_send(filtered.clone());
        }
    }
}

/// Cheap to clone: every clone shares the same endpoint set, filter, and
/// watcher list via `Arc<Inner>`.
#[derive(Clone)]
pub struct MultiServerDiscovery(Arc<Inner>);

impl MultiServerDiscovery {
    pub fn new(services: Vec<Service>) -> Arc<Self> {
        Arc::new(Self(Arc::new(Inner {
            services: RwLock::new(services),
            filter: RwLock::new(None),
            watchers: RwLock::new(Vec::new()),
        })))
    }

    /// Replaces the endpoint set and pushes the new filtered list to every
    /// live watcher. Dead watchers (receiver dropped) are pruned on the
    /// next call.
    pub async fn update(&self, services: Vec<Service>) {
        *self.0.services.write().await = services;
        self.0.broadcast().await;
    }
}

#[async_trait]
impl ServiceDiscovery for MultiServerDiscovery {
    async fn get_services(&self) -> Vec<Service> {
        self.0.filtered().await
    }

    async fn watch_service(&self) -> mpsc::Receiver<Vec<Service>> {
        let (tx, rx) = mpsc::channel(8);
        let _ = tx.send(self.0.filtered().await).await;
        self.0.watchers.write().await.push(tx);
        rx
    }

    /// Scopes to endpoints whose metadata names this service path
    /// (`service=<path>`); endpoints with no `service` key are shared
    /// across every path. The scoped view shares `self`'s `Inner`, so an
    /// `update` on the original is immediately visible through it.
    fn clone_for(&self, service_path: &str) -> Arc<dyn ServiceDiscovery> {
        Arc::new(ScopedDiscovery {
            inner: Arc::new(MultiServerDiscovery(self.0.clone())),
            prefix: format!("service={service_path}"),
        })
    }

    async fn set_filter(&self, filter: Option<DiscoveryFilter>) {
        *self.0.filter.write().await = filter;
        self.0.broadcast().await;
    }

    async fn close(&self) {
        self.0.watchers.write().await.clear();
    }
}

struct ScopedDiscovery {
    inner: Arc<dyn ServiceDiscovery>,
    prefix: String,
}

#[async_trait]
impl ServiceDiscovery for ScopedDiscovery {
    async fn get_services(&self) -> Vec<Service> {
        self.inner
            .get_services()
            .await
            .into_iter()
            .filter(|(_, meta)| !meta.contains("service=") || meta.contains(&self.prefix))
            .collect()
    }

    async fn watch_service(&self) -> mpsc::Receiver<Vec<Service>> {
        self.inner.watch_service().await
    }

    fn clone_for(&self, service_path: &str) -> Arc<dyn ServiceDiscovery> {
        self.inner.clone_for(service_path)
    }

    async fn set_filter(&self, filter: Option<DiscoveryFilter>) {
        self.inner.set_filter(filter).await;
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
