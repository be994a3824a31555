//! The `Selector` interface (§4.6): chooses one endpoint key out of the set
//! most recently installed via `update_server`.

use std::collections::HashMap;

use async_trait::async_trait;

/// Per-endpoint metadata, as a parsed query string (e.g. `weight=10&dc=us`).
/// The selectors that care about a particular key (`weight`, `rtt`) parse it
/// out; unrecognized keys are ignored.
pub type ServerMap = HashMap<String, String>;

pub struct SelectContext<'a> {
    pub service_path: &'a str,
    pub service_method: &'a str,
    /// The bytes a `ConsistentHash` selector hashes to derive its key.
    /// Building this from the call's first argument (primitive/string) or
    /// a digest of the full argument set is the caller's job (xClient) —
    /// the selector just hashes whatever it's given.
    pub hash_key: &'a [u8],
}

impl<'a> SelectContext<'a> {
    pub fn new(service_path: &'a str, service_method: &'a str, hash_key: &'a [u8]) -> Self {
        Self {
            service_path,
            service_method,
            hash_key,
        }
    }
}

/// Parses `weight=N` out of a metadata query string; defaults to 1 (§4.6).
pub fn parse_weight(meta: &str) -> i64 {
    parse_query_value(meta, "weight")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|w| *w > 0)
        .unwrap_or(1)
}

/// Parses `rtt=N` (milliseconds) out of a metadata query string.
pub fn parse_rtt_ms(meta: &str) -> i64 {
    parse_query_value(meta, "rtt")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(i64::MAX)
}

fn parse_query_value<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then_some(v)
    })
}

#[async_trait]
pub trait Selector: Send + Sync {
    async fn select(&self, ctx: &SelectContext<'_>) -> Option<String>;
    async fn update_server(&self, servers: &ServerMap);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_weight_from_query_string() {
        assert_eq!(parse_weight("weight=10&dc=us"), 10);
        assert_eq!(parse_weight("dc=us"), 1);
        assert_eq!(parse_weight("weight=0"), 1);
    }

    #[test]
    fn parses_rtt_from_query_string() {
        assert_eq!(parse_rtt_ms("rtt=42"), 42);
        assert_eq!(parse_rtt_ms("weight=10"), i64::MAX);
    }
}
