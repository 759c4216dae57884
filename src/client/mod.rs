//! KV Transport
//!
//! The store talks to its backend through the [`KvClient`] trait: a flat,
//! string-keyed map with prefix listing and recursive delete. Two
//! implementations ship with the crate:
//!
//! - [`ConsulClient`]: the Consul KV HTTP API
//! - [`MemoryClient`]: an in-process map for tests, benches and embedding
//!
//! Timeouts and cancellation belong to the transport. Errors come back
//! exactly as the transport produced them.

pub mod consul;
pub mod memory;

pub use consul::ConsulClient;
pub use memory::{MemoryClient, MemoryStats};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors reported by a KV transport.
#[derive(Debug, Error)]
pub enum KvError {
    /// The transport could not be built or the backend is not reachable
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The request failed before a response arrived (connect, timeout, body)
    #[error("request for {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with an unexpected status
    #[error("backend returned {status} for {path}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    /// A key listing was not a list of strings
    #[error("listing for {prefix} is not a list of keys: {reason}")]
    IndexCorrupt { prefix: String, reason: String },

    /// The path cannot be expressed in the backend's addressing scheme
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for transport operations.
pub type KvResult<T> = Result<T, KvError>;

/// A flat, string-keyed KV transport.
///
/// Paths are opaque strings; `/` has no meaning to the transport beyond the
/// prefix semantics of [`list_keys`](Self::list_keys) and recursive
/// [`delete`](Self::delete).
#[async_trait]
pub trait KvClient: Send + Sync + 'static {
    /// Fetches the exact bytes stored at `path`.
    ///
    /// Returns `Ok(None)` if nothing is stored there.
    async fn get(&self, path: &str) -> KvResult<Option<Bytes>>;

    /// Lists the full path of every entry whose path starts with `prefix`.
    ///
    /// A prefix with no entries yields an empty list, not an error.
    async fn list_keys(&self, prefix: &str) -> KvResult<Vec<String>>;

    /// Stores `value` at `path`, replacing anything already there.
    async fn put(&self, path: &str, value: Bytes) -> KvResult<()>;

    /// Deletes `path`, or with `recurse` every entry whose path starts with
    /// `path`. Deleting a missing path is not an error.
    async fn delete(&self, path: &str, recurse: bool) -> KvResult<()>;

    /// Verifies the backend is reachable.
    ///
    /// The default implementation returns `Ok(())`, suitable for in-process
    /// backends.
    async fn health_check(&self) -> KvResult<()> {
        Ok(())
    }

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}
