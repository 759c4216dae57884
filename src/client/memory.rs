//! In-memory KV transport.
//!
//! Keeps entries in an ordered map so prefix listings are a range scan, and
//! mirrors Consul's semantics: listing and recursive delete match by plain
//! string prefix, deletes of missing paths succeed.

use crate::client::{KvClient, KvResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-process KV transport.
///
/// Also exposes synchronous accessors ([`raw_get`](Self::raw_get),
/// [`raw_put`](Self::raw_put), [`paths`](Self::paths)) for inspecting or
/// tampering with stored bytes directly.
///
/// # Example
///
/// ```
/// use kvstash::client::{KvClient, MemoryClient};
/// use bytes::Bytes;
///
/// # tokio_test::block_on(async {
/// let client = MemoryClient::new();
/// client.put("sso/v2/session/abc", Bytes::from("{}")).await.unwrap();
///
/// let keys = client.list_keys("sso/v2/").await.unwrap();
/// assert_eq!(keys, vec!["sso/v2/session/abc".to_string()]);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryClient {
    data: RwLock<BTreeMap<String, Bytes>>,

    /// Statistics: total GET operations
    get_count: AtomicU64,

    /// Statistics: total PUT operations
    put_count: AtomicU64,

    /// Statistics: total DELETE operations
    delete_count: AtomicU64,

    /// Statistics: total LIST operations
    list_count: AtomicU64,
}

/// Operation counters for a [`MemoryClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStats {
    pub entries: usize,
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
    pub lists: u64,
}

impl MemoryClient {
    /// Creates an empty client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Every stored path, in order.
    pub fn paths(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Reads stored bytes without touching the counters.
    pub fn raw_get(&self, path: &str) -> Option<Bytes> {
        self.data.read().get(path).cloned()
    }

    /// Writes bytes without touching the counters.
    pub fn raw_put(&self, path: &str, value: impl Into<Bytes>) {
        self.data.write().insert(path.to_string(), value.into());
    }

    /// Removes one entry without touching the counters.
    pub fn raw_remove(&self, path: &str) -> Option<Bytes> {
        self.data.write().remove(path)
    }

    /// Returns operation statistics.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            entries: self.len(),
            gets: self.get_count.load(Ordering::Relaxed),
            puts: self.put_count.load(Ordering::Relaxed),
            deletes: self.delete_count.load(Ordering::Relaxed),
            lists: self.list_count.load(Ordering::Relaxed),
        }
    }

    fn keys_with_prefix(data: &BTreeMap<String, Bytes>, prefix: &str) -> Vec<String> {
        data.range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl KvClient for MemoryClient {
    async fn get(&self, path: &str) -> KvResult<Option<Bytes>> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        Ok(self.data.read().get(path).cloned())
    }

    async fn list_keys(&self, prefix: &str) -> KvResult<Vec<String>> {
        self.list_count.fetch_add(1, Ordering::Relaxed);
        Ok(Self::keys_with_prefix(&self.data.read(), prefix))
    }

    async fn put(&self, path: &str, value: Bytes) -> KvResult<()> {
        self.put_count.fetch_add(1, Ordering::Relaxed);
        self.data.write().insert(path.to_string(), value);
        Ok(())
    }

    async fn delete(&self, path: &str, recurse: bool) -> KvResult<()> {
        self.delete_count.fetch_add(1, Ordering::Relaxed);
        let mut data = self.data.write();

        if recurse {
            for key in Self::keys_with_prefix(&data, path) {
                data.remove(&key);
            }
        } else {
            data.remove(path);
        }

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
