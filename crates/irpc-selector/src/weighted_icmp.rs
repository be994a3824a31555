//! `WeightedICMP` (§4.6): weight derived from each endpoint's measured
//! round-trip time (`rtt=N`, milliseconds, in metadata) via
//! [`calculate_weight`], then picked with the same smooth weighted engine
//! as [`crate::WeightedRoundRobin`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::selector::{parse_rtt_ms, SelectContext, Selector, ServerMap};
use crate::weight::{calculate_weight, SmoothWeighted};

pub struct WeightedIcmp {
    engine: Mutex<SmoothWeighted>,
}

impl Default for WeightedIcmp {
    fn default() -> Self {
        Self {
            engine: Mutex::new(SmoothWeighted::new()),
        }
    }
}

impl WeightedIcmp {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn note_result(&self, endpoint: &str, success: bool) {
        self.engine.lock().await.note_result(endpoint, success);
    }
}

#[async_trait]
impl Selector for WeightedIcmp {
    async fn select(&self, _ctx: &SelectContext<'_>) -> Option<String> {
        self.engine.lock().await.pick()
    }

    async fn update_server(&self, servers: &ServerMap) {
        let weights: HashMap<String, i64> = servers
            .iter()
            .map(|(key, meta)| (key.clone(), calculate_weight(parse_rtt_ms(meta))))
            .collect();
        self.engine.lock().await.set_weights(weights);
    }
}
