//! Uniform random selection (§4.6).

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::selector::{SelectContext, Selector, ServerMap};

#[derive(Default)]
pub struct Random {
    endpoints: RwLock<Vec<String>>,
}

impl Random {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Selector for Random {
    async fn select(&self, _ctx: &SelectContext<'_>) -> Option<String> {
        let endpoints = self.endpoints.read().await;
        if endpoints.is_empty() {
            return None;
        }
        let idx = rand::random_range(0..endpoints.len());
        Some(endpoints[idx].clone())
    }

    async fn update_server(&self, servers: &ServerMap) {
        let mut endpoints: Vec<String> = servers.keys().cloned().collect();
        endpoints.sort();
        *self.endpoints.write().await = endpoints;
    }
}
