//! Storage Module
//!
//! This module maps logical `(type, key)` values onto a flat, size-limited
//! KV backend. It includes the chunking store handle and the expiry sweeper
//! that keeps the namespace clean.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ChunkStore                           │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────────────┐ │
//! │  │ ValueCodec   │ │ ChunkPolicy  │ │ PathNamespacer       │ │
//! │  │ value → text │ │ inline/chunk │ │ <prefix>/v2/<type>/… │ │
//! │  └──────────────┘ └──────────────┘ └──────────────────────┘ │
//! └──────────────────────────────┬──────────────────────────────┘
//!                ▲               │ envelopes
//!                │               ▼
//!   ┌────────────┴────────┐  ┌──────────────────────┐
//!   │   ExpirySweeper     │  │  KvClient            │
//!   │ (cleanup / task)    │  │  Consul | Memory     │
//!   └─────────────────────┘  └──────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Chunking**: values over the threshold are split into a chunk set
//!   named by the MD5 of the serialized value
//! - **Integrity**: chunk sets are verified on read; a failed set is
//!   unlinked so the next read is a clean miss
//! - **Garbage collection**: a superseded chunk set is dropped once the new
//!   one is committed
//! - **Lazy expiry**: expired entries read as misses
//! - **Active expiry**: the sweeper deletes them, optionally reclaiming
//!   orphaned chunk sets
//!
//! ## Example
//!
//! ```
//! use kvstash::client::MemoryClient;
//! use kvstash::envelope::expires_in;
//! use kvstash::storage::{ChunkPolicy, ChunkStore, ExpirySweeper};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(ChunkStore::new(
//!     Arc::new(MemoryClient::new()),
//!     "sso",
//!     ChunkPolicy::default(),
//! ));
//!
//! // Basic operations
//! store.set("session", "abc", "token123", expires_in(Duration::from_secs(3600))).await.unwrap();
//! let value: Option<String> = store.get("session", "abc").await.unwrap();
//! assert_eq!(value.as_deref(), Some("token123"));
//!
//! // Periodic maintenance
//! let report = ExpirySweeper::new(Arc::clone(&store)).cleanup().await.unwrap();
//! assert_eq!(report.removed, 0);
//! # });
//! ```

pub mod chunk;
pub mod error;
pub mod expiry;
pub mod store;

// Re-export commonly used types
pub use chunk::{ChunkPolicy, Placement, DEFAULT_CHUNK_THRESHOLD, HARD_CAP_FACTOR};
pub use error::{StoreError, StoreResult};
pub use expiry::{
    start_expiry_sweeper, ExpirySweeper, SweepOptions, SweepReport, SweepSchedule, SweeperHandle,
};
pub use store::ChunkStore;
