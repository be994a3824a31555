//! Typed extension hooks woven through client and server (§4.8).
//!
//! A single trait with no-op default methods stands in for the source's
//! "typed list of interfaces, dispatch only to matching ones" design: a
//! plugin overrides only the hooks it cares about. Order is registration
//! order. `Pre*` hooks returning `Err` short-circuit the operation; `Post*`
//! hooks never fail the operation — any error they raise is logged via
//! `tracing` and dropped, per the "consistent per hook" rule in §4.8.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Error, Clone)]
#[error("plugin rejected operation: {0}")]
pub struct PluginError(pub String);

impl PluginError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    async fn connection_created(&self, _remote: &str) {}
    async fn connection_create_failed(&self, _endpoint: &str, _err: &str) {}
    async fn connection_closed(&self, _remote: &str) {}

    async fn pre_read_request(&self, _msg: &mut Message) -> Result<(), PluginError> {
        Ok(())
    }
    async fn post_read_request(&self, _msg: &Message) {}

    async fn pre_write_response(
        &self,
        _request: &Message,
        _response: &mut Message,
    ) -> Result<(), PluginError> {
        Ok(())
    }
    async fn post_write_response(&self, _request: &Message, _response: &Message) {}

    async fn pre_call(&self, _service_path: &str, _service_method: &str) -> Result<(), PluginError> {
        Ok(())
    }
    async fn post_call(&self, _service_path: &str, _service_method: &str, _err: Option<&str>) {}

    async fn heartbeat(&self, _msg: &Message) {}

    async fn register(&self, _service_name: &str) {}
    async fn unregister(&self, _service_name: &str) {}

    /// Selector wrapping hook: may veto (`Ok(None)`) or rewrite the chosen
    /// endpoint key.
    async fn post_select(&self, _chosen: Option<String>) -> Result<Option<String>, PluginError> {
        Ok(_chosen)
    }
}

/// The ordered plugin list, installed before serving (§5's shared-resource
/// policy: append-only during steady state).
#[derive(Clone, Default)]
pub struct Plugins {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl Plugins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub async fn connection_created(&self, remote: &str) {
        for p in &self.plugins {
            p.connection_created(remote).await;
        }
    }

    pub async fn connection_create_failed(&self, endpoint: &str, err: &str) {
        for p in &self.plugins {
            p.connection_create_failed(endpoint, err).await;
        }
    }

    pub async fn connection_closed(&self, remote: &str) {
        for p in &self.plugins {
            p.connection_closed(remote).await;
        }
    }

    pub async fn pre_read_request(&self, msg: &mut Message) -> Result<(), PluginError> {
        for p in &self.plugins {
            p.pre_read_request(msg).await?;
        }
        Ok(())
    }

    pub async fn post_read_request(&self, msg: &Message) {
        for p in &self.plugins {
            p.post_read_request(msg).await;
        }
    }

    pub async fn pre_write_response(
        &self,
        request: &Message,
        response: &mut Message,
    ) -> Result<(), PluginError> {
        for p in &self.plugins {
            p.pre_write_response(request, response).await?;
        }
        Ok(())
    }

    pub async fn post_write_response(&self, request: &Message, response: &Message) {
        for p in &self.plugins {
            p.post_write_response(request, response).await;
        }
    }

    pub async fn pre_call(&self, service_path: &str, service_method: &str) -> Result<(), PluginError> {
        for p in &self.plugins {
            p.pre_call(service_path, service_method).await?;
        }
        Ok(())
    }

    pub async fn post_call(&self, service_path: &str, service_method: &str, err: Option<&str>) {
        for p in &self.plugins {
            p.post_call(service_path, service_method, err).await;
        }
    }

    pub async fn heartbeat(&self, msg: &Message) {
        for p in &self.plugins {
            p.heartbeat(msg).await;
        }
    }

    pub async fn register(&self, service_name: &str) {
        for p in &self.plugins {
            p.register(service_name).await;
        }
    }

    pub async fn unregister(&self, service_name: &str) {
        for p in &self.plugins {
            p.unregister(service_name).await;
        }
    }

    pub async fn post_select(&self, mut chosen: Option<String>) -> Result<Option<String>, PluginError> {
        for p in &self.plugins {
            chosen = p.post_select(chosen).await?;
        }
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Plugin for Counter {
        async fn connection_created(&self, _remote: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Vetoer;

    #[async_trait]
    impl Plugin for Vetoer {
        async fn pre_call(&self, _sp: &str, _sm: &str) -> Result<(), PluginError> {
            Err(PluginError::new("nope"))
        }
    }

    #[tokio::test]
    async fn dispatches_only_to_overridden_hooks() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut plugins = Plugins::new();
        plugins.add(Arc::new(Counter(count.clone())));
        plugins.connection_created("127.0.0.1:1").await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pre_hook_error_short_circuits() {
        let mut plugins = Plugins::new();
        plugins.add(Arc::new(Vetoer));
        let err = plugins.pre_call("Arith", "Mul").await.unwrap_err();
        assert_eq!(err.0, "nope");
    }
}
