//! Size-bucketed buffer reuse and message reuse (§4.2).
//!
//! A message returned to the pool must not be referenced after
//! [`MessagePool::free`] is called — the same invariant the teacher's
//! per-connection state enforces by construction (values are moved, never
//! aliased, across the pool boundary).

use std::sync::Mutex;

use crate::message::Message;

/// Rounds a requested length up to the next power-of-two bucket, capping
/// small requests at 64 bytes so the pool doesn't thrash on tiny frames.
fn bucket_for(len: usize) -> usize {
    let mut bucket = 64usize;
    while bucket < len {
        bucket = bucket.saturating_mul(2);
    }
    bucket
}

/// A byte-slice pool keyed by capacity class. `get` returns a slice of at
/// least the requested length; `put` returns it for reuse.
pub struct BufferPool {
    buckets: Mutex<Vec<(usize, Vec<Vec<u8>>)>>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self {
            buckets: Mutex::new(Vec::new()),
        }
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, len: usize) -> Vec<u8> {
        let bucket = bucket_for(len);
        let mut buckets = self.buckets.lock().unwrap();
        if let Some((_, bufs)) = buckets.iter_mut().find(|(b, _)| *b == bucket) {
            if let Some(mut buf) = bufs.pop() {
                buf.clear();
                buf.resize(len, 0);
                return buf;
            }
        }
        vec![0u8; len]
    }

    pub fn put(&self, mut buf: Vec<u8>) {
        let bucket = bucket_for(buf.capacity());
        buf.clear();
        let mut buckets = self.buckets.lock().unwrap();
        match buckets.iter_mut().find(|(b, _)| *b == bucket) {
            Some((_, bufs)) => bufs.push(buf),
            None => buckets.push((bucket, vec![buf])),
        }
    }
}

/// Yields zeroed [`Message`]s (header reset, strings cleared, metadata
/// cleared). `free` resets and returns the message for reuse.
pub struct MessagePool {
    free: Mutex<Vec<Message>>,
}

impl Default for MessagePool {
    fn default() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }
}

impl MessagePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Message {
        self.free.lock().unwrap().pop().unwrap_or_default()
    }

    pub fn free(&self, mut msg: Message) {
        msg.reset();
        self.free.lock().unwrap().push(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_pool_returns_at_least_requested_len() {
        let pool = BufferPool::new();
        let buf = pool.get(100);
        assert!(buf.len() >= 100);
        pool.put(buf);
        let buf2 = pool.get(50);
        assert!(buf2.len() >= 50);
    }

    #[test]
    fn message_pool_reset_between_uses() {
        let pool = MessagePool::new();
        let mut msg = pool.get();
        msg.service_path = "Arith".into();
        msg.metadata.push(("k".into(), "v".into()));
        pool.free(msg);

        let reused = pool.get();
        assert!(reused.service_path.is_empty());
        assert!(reused.metadata.is_empty());
    }
}
