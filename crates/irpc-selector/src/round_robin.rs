//! Monotonic round robin (§4.6). The source increments a plain counter
//! under the xClient's own lock and calls it out as "not atomic" for that
//! reason; here the counter is owned by the selector itself, so it uses a
//! `Mutex` rather than relying on an external caller to serialize access.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::selector::{SelectContext, Selector, ServerMap};

pub struct RoundRobin {
    endpoints: Mutex<(Vec<String>, usize)>,
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self {
            endpoints: Mutex::new((Vec::new(), 0)),
        }
    }
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Selector for RoundRobin {
    async fn select(&self, _ctx: &SelectContext<'_>) -> Option<String> {
        let mut state = self.endpoints.lock().await;
        let (endpoints, next) = &mut *state;
        if endpoints.is_empty() {
            return None;
        }
        let idx = *next % endpoints.len();
        *next = next.wrapping_add(1);
        Some(endpoints[idx].clone())
    }

    async fn update_server(&self, servers: &ServerMap) {
        let mut new_endpoints: Vec<String> = servers.keys().cloned().collect();
        new_endpoints.sort();
        let mut state = self.endpoints.lock().await;
        state.0 = new_endpoints;
    }
}
