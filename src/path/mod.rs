//! Physical Path Layout
//!
//! Every logical `(type, key)` pair maps onto a hierarchical string path in
//! the backing store. Primary entries and chunk fragments share one tree:
//!
//! ```text
//! <prefix>/v2/<type>/<key>                        primary envelope
//! <prefix>/v2/<type>/<key>-data/<hash>/<index>    chunk fragment
//! ```
//!
//! The `v2` segment is a schema tag. A future incompatible layout gets a new
//! tag and can live next to the old one.

pub mod namespace;

pub use namespace::{
    merge_path, split_type_key, ChunkRef, PathNamespacer, NESTED_SUFFIX, SCHEMA_VERSION,
};
