//! `StaticDiscovery` (§6): a fixed peer list set at construction. The
//! simplest discovery source — useful for tests and for deployments that
//! configure endpoints directly rather than through a registry.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::discovery::{apply_filter, DiscoveryFilter, Service, ServiceDiscovery};

pub struct StaticDiscovery {
    services: Vec<Service>,
    filter: RwLock<Option<DiscoveryFilter>>,
}

impl StaticDiscovery {
    pub fn new(services: Vec<Service>) -> Arc<Self> {
        Arc::new(Self {
            services,
            filter: RwLock::new(None),
        })
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn get_services(&self) -> Vec<Service> {
        apply_filter(&self.services, &*self.filter.read().await)
    }

    async fn watch_service(&self) -> mpsc::Receiver<Vec<Service>> {
        // The set never changes after construction, so the one update is
        // the initial snapshot; the sender is dropped immediately after,
        // leaving the channel open-but-quiet rather than closed, matching
        // "watch a source with no further updates" rather than EOF.
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(self.get_services().await).await;
        rx
    }

    fn clone_for(&self, _service_path: &str) -> Arc<dyn ServiceDiscovery> {
        StaticDiscovery::new(self.services.clone())
    }

    async fn set_filter(&self, filter: Option<DiscoveryFilter>) {
        *self.filter.write().await = filter;
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_the_fixed_list() {
        let discovery = StaticDiscovery::new(vec![
            ("tcp@127.0.0.1:1".to_string(), String::new()),
            ("tcp@127.0.0.1:2".to_string(), String::new()),
        ]);
        assert_eq!(discovery.get_services().await.len(), 2);
    }

    #[tokio::test]
    async fn filter_narrows_the_list() {
        let discovery = StaticDiscovery::new(vec![
            ("tcp@127.0.0.1:1".to_string(), "dc=us".to_string()),
            ("tcp@127.0.0.1:2".to_string(), "dc=eu".to_string()),
        ]);
        discovery
            .set_filter(Some(Arc::new(|_, meta| meta.contains("dc=us"))))
            .await;
        let services = discovery.get_services().await;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].0, "tcp@127.0.0.1:1");
    }

    #[tokio::test]
    async fn watch_emits_the_initial_snapshot() {
        let discovery = StaticDiscovery::new(vec![("tcp@127.0.0.1:1".to_string(), String::new())]);
        let mut rx = discovery.watch_service().await;
        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);
    }
}
