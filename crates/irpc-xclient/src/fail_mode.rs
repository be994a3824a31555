//! Fail modes (§4.7).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// One attempt; any uncovered error evicts the connection, no retry.
    Failfast,
    /// Retry the same endpoint up to `Retries` times; evict on uncovered
    /// error, re-obtaining the client from the cache each attempt.
    Failtry,
    /// Retry up to `Retries` times, re-selecting a (possibly different)
    /// endpoint each iteration.
    Failover,
    /// Send to the primary; if no reply within `BackupLatency`, also send
    /// to a second endpoint; the first success wins.
    Failbackup,
}
