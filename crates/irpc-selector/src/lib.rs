//! Endpoint selection strategies for irpc's high-level client (§4.6).
//!
//! Plugin veto/rewrite of a selector's result (`post_select`) is the
//! caller's job — [`irpc_proto::Plugins::post_select`] already covers it —
//! so these selectors only implement the bare `Select`/`UpdateServer`
//! contract.

mod consistent_hash;
mod random;
mod round_robin;
mod select_by_user;
mod selector;
mod weight;
mod weighted_icmp;
mod weighted_round_robin;

pub use consistent_hash::ConsistentHash;
pub use random::Random;
pub use round_robin::RoundRobin;
pub use select_by_user::{SelectByUser, UserSelectFn};
pub use selector::{parse_rtt_ms, parse_weight, SelectContext, Selector, ServerMap};
pub use weight::calculate_weight;
pub use weighted_icmp::WeightedIcmp;
pub use weighted_round_robin::WeightedRoundRobin;
