//! The `ServiceDiscovery` interface (§6): `GetServices`/`WatchService`/
//! `Clone`/`SetFilter`/`Close`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// One discovered endpoint: its key (`network@address`) and raw metadata
/// query string, the same shape a `Selector` consumes.
pub type Service = (String, String);

/// Accepts or rejects a `(key, metadata)` pair.
pub type DiscoveryFilter = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn get_services(&self) -> Vec<Service>;

    /// Subscribes to updates; each send on the channel carries the full,
    /// already-filtered list as of that change (not a diff).
    async fn watch_service(&self) -> mpsc::Receiver<Vec<Service>>;

    /// Returns a discovery scoped to `service_path`, sharing the
    /// underlying source. `MultiServerDiscovery` filters by service path;
    /// `StaticDiscovery` is already scoped to one and returns itself.
    fn clone_for(&self, service_path: &str) -> Arc<dyn ServiceDiscovery>;

    async fn set_filter(&self, filter: Option<DiscoveryFilter>);

    async fn close(&self);
}

pub(crate) fn apply_filter(services: &[Service], filter: &Option<DiscoveryFilter>) -> Vec<Service> {
    match filter {
        None => services.to_vec(),
        Some(f) => services
            .iter()
            .filter(|(k, m)| f(k, m))
            .cloned()
            .collect(),
    }
}
