//! `WeightedRoundRobin` (§4.6): weight parsed from each endpoint's
//! `weight=N` metadata.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::selector::{parse_weight, SelectContext, Selector, ServerMap};
use crate::weight::SmoothWeighted;

pub struct WeightedRoundRobin {
    engine: Mutex<SmoothWeighted>,
}

impl Default for WeightedRoundRobin {
    fn default() -> Self {
        Self {
            engine: Mutex::new(SmoothWeighted::new()),
        }
    }
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports a call outcome so `EffectiveWeight` can decay/recover
    /// (§4.6). Not part of the bare `Selector` trait; the xClient calls
    /// this after every completed call when it's holding a weighted
    /// selector.
    pub async fn note_result(&self, endpoint: &str, success: bool) {
        self.engine.lock().await.note_result(endpoint, success);
    }
}

#[async_trait]
impl Selector for WeightedRoundRobin {
    async fn select(&self, _ctx: &SelectContext<'_>) -> Option<String> {
        self.engine.lock().await.pick()
    }

    async fn update_server(&self, servers: &ServerMap) {
        let weights: HashMap<String, i64> = servers
            .iter()
            .map(|(key, meta)| (key.clone(), parse_weight(meta)))
            .collect();
        self.engine.lock().await.set_weights(weights);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heavier_endpoint_is_picked_more_often() {
        let selector = WeightedRoundRobin::new();
        let mut servers = HashMap::new();
        servers.insert("heavy".to_string(), "weight=9".to_string());
        servers.insert("light".to_string(), "weight=1".to_string());
        selector.update_server(&servers).await;

        let ctx = SelectContext::new("Arith", "Mul", b"");
        let mut heavy_count = 0;
        for _ in 0..30 {
            if selector.select(&ctx).await.as_deref() == Some("heavy") {
                heavy_count += 1;
            }
        }
        assert!(heavy_count >= 24, "expected ~27/30, got {heavy_count}");
    }
}
