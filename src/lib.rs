//! # kvstash - Chunking, Expiring Values on a Flat KV Store
//!
//! kvstash stores arbitrarily large, optionally expiring values in a
//! distributed key-value store whose entries have a hard size ceiling
//! (Consul KV by default). Values are addressed by a `(type, key)` pair,
//! framed in a small JSON envelope, and split into verified chunk sets when
//! they outgrow a single entry.
//!
//! ## Features
//!
//! - **Chunking**: values over the threshold are base64-encoded and split
//!   across entries named by their MD5 content hash
//! - **Integrity**: reassembled values are verified; a corrupt set is
//!   unlinked and reported
//! - **Expiry**: absolute expiry per value, lazy on read, active through the
//!   sweeper
//! - **Pluggable**: any [`KvClient`] transport, any [`ValueCodec`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               kvstash                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────────────────────────────────────┐    │
//! │  │ ValueCodec  │───>│                 ChunkStore                  │    │
//! │  │ (JSON)      │    │  set / get / get_all / delete / delete_all  │    │
//! │  └─────────────┘    └──────┬──────────────┬───────────────┬───────┘    │
//! │                            │              │               │            │
//! │                            ▼              ▼               ▼            │
//! │                   ┌──────────────┐ ┌─────────────┐ ┌──────────────┐    │
//! │                   │PathNamespacer│ │  Envelope   │ │ ChunkPolicy  │    │
//! │                   │ <prefix>/v2/ │ │  JSON + MD5 │ │ split/rejoin │    │
//! │                   └──────────────┘ └─────────────┘ └──────────────┘    │
//! │                                          │                             │
//! │                                          ▼                             │
//! │  ┌─────────────────────┐        ┌─────────────────────────────┐        │
//! │  │   ExpirySweeper     │───────>│  KvClient                   │        │
//! │  │ (cleanup / task)    │        │  ConsulClient | MemoryClient│        │
//! │  └─────────────────────┘        └─────────────────────────────┘        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use kvstash::{ChunkStore, ExpirySweeper, StoreConfig, SweepSchedule, start_expiry_sweeper};
//! use kvstash::envelope::expires_in;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Connect to the local Consul agent
//!     let store = Arc::new(ChunkStore::connect(&StoreConfig::default()).await?);
//!
//!     // Keep expired entries from piling up
//!     let _sweeper = start_expiry_sweeper(
//!         ExpirySweeper::new(Arc::clone(&store)),
//!         SweepSchedule::default(),
//!     );
//!
//!     store
//!         .set("session", "abc", &"token123", expires_in(Duration::from_secs(3600)))
//!         .await?;
//!     let value: Option<String> = store.get("session", "abc").await?;
//!     println!("{value:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`path`]: physical path construction and parsing
//! - [`envelope`]: the framing record and its content hash
//! - [`value`]: application value codecs
//! - [`client`]: KV transports (Consul, in-memory)
//! - [`storage`]: the chunk store and the expiry sweeper
//! - [`config`]: TOML configuration
//!
//! ## Design Highlights
//!
//! ### Misses Are Not Errors
//!
//! A missing, expired or incomplete value reads as `Ok(None)`. Errors are
//! reserved for things an operator should look at: transport failures,
//! corrupt records, integrity mismatches.
//!
//! ### Write Ordering
//!
//! Fragments are written before the envelope that references them, and the
//! superseded chunk set is dropped only after the new envelope is committed.
//! A crash mid-write leaves an unreferenced chunk set behind, never a
//! dangling reference; the sweeper can reclaim those with
//! [`SweepOptions::reclaim_orphans`].
//!
//! ### Lazy + Active Expiry
//!
//! Values with an expiry are expired in two ways:
//! 1. **Lazy**: reads treat an expired value as a miss
//! 2. **Active**: the sweeper scans the namespace and deletes expired values
//!
//! This keeps the backend from filling up with values nobody reads again.

pub mod client;
pub mod config;
pub mod envelope;
pub mod path;
pub mod storage;
pub mod value;

// Re-export commonly used types for convenience
pub use client::{ConsulClient, KvClient, KvError, MemoryClient};
pub use config::{ConfigError, StoreConfig};
pub use storage::{
    start_expiry_sweeper, ChunkPolicy, ChunkStore, ExpirySweeper, StoreError, StoreResult,
    SweepOptions, SweepReport, SweepSchedule, SweeperHandle,
};
pub use value::{CodecError, JsonCodec, ValueCodec};

/// The default Consul agent address
pub const DEFAULT_KV_URL: &str = "http://localhost:8500";

/// The default namespace root
pub const DEFAULT_KV_PREFIX: &str = "sso";

/// Version of kvstash
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
