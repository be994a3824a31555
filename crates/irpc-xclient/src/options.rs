//! xClient-level knobs (§6 "Options (client)", the subset not already
//! covered by [`irpc_client::ClientOptions`]).

use std::time::Duration;

use irpc_discovery::DiscoveryFilter;

use crate::breaker::BreakerFactory;
use crate::fail_mode::FailMode;

#[derive(Clone)]
pub struct XClientOptions {
    pub fail_mode: FailMode,
    /// Total attempts for `Failtry`/`Failover` is `retries + 1`.
    pub retries: u32,
    pub backup_latency: Duration,
    pub gen_breaker: Option<BreakerFactory>,
    /// `Group`: restricts discovery results before selection.
    pub group: Option<DiscoveryFilter>,
    pub client_options: irpc_client::ClientOptions,
}

impl Default for XClientOptions {
    fn default() -> Self {
        Self {
            fail_mode: FailMode::Failtry,
            retries: 3,
            backup_latency: Duration::from_millis(10),
            gen_breaker: None,
            group: None,
            client_options: irpc_client::ClientOptions::default(),
        }
    }
}
