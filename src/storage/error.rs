//! Store error types.

use crate::client::KvError;
use crate::envelope::EnvelopeError;
use crate::value::CodecError;
use thiserror::Error;

/// Errors returned by [`ChunkStore`](crate::storage::ChunkStore) and the
/// sweeper.
///
/// A miss (not found, expired, missing chunk) is never an error; reads
/// return `Ok(None)` for those.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The transport could not be built or the backend failed its health check
    #[error("KV backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The serialized value exceeds what the store accepts
    #[error("payload of {size} bytes exceeds the {limit} byte limit for {path}")]
    PayloadTooLarge {
        path: String,
        size: usize,
        limit: usize,
    },

    /// A key listing came back in a shape that is not a list of keys
    #[error("key index for {prefix} is corrupt: {reason}")]
    IndexCorrupt { prefix: String, reason: String },

    /// Reassembled chunks do not match the recorded content hash
    #[error("integrity check failed for {path}: {reason}")]
    IntegrityMismatch { path: String, reason: String },

    /// Stored bytes are not a valid envelope
    #[error("malformed envelope at {path}: {source}")]
    MalformedEnvelope {
        path: String,
        #[source]
        source: EnvelopeError,
    },

    /// The value codec failed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Any other transport failure
    #[error(transparent)]
    Transport(KvError),

    /// The backend has no query engine
    #[error("queries are not supported by the KV store")]
    UnsupportedQuery,
}

impl From<KvError> for StoreError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::IndexCorrupt { prefix, reason } => StoreError::IndexCorrupt { prefix, reason },
            other => StoreError::Transport(other),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
