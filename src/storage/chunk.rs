//! Chunking policy and fragment encoding.
//!
//! A serialized value larger than the inline threshold is base64-encoded and
//! the encoded text is cut into `threshold`-byte slices. Each slice becomes
//! one fragment envelope, so no physical entry grows past the threshold plus
//! the envelope framing.
//!
//! ```text
//!   serialized (N bytes) ──base64──► encoded (≈4N/3 bytes)
//!                                      │
//!                 ┌────────────┬───────┴─────┬──────────┐
//!                 ▼            ▼             ▼          ▼
//!             slice 0      slice 1   ...  slice k-1   (≤ threshold each)
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Default number of bytes per physical entry (400 KiB).
pub const DEFAULT_CHUNK_THRESHOLD: usize = 400 * 1024;

/// Largest accepted value, as a multiple of the threshold.
pub const HARD_CAP_FACTOR: usize = 10;

/// Where a serialized value of a given size goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Stored in the top-level envelope.
    Inline,
    /// Split into a chunk set.
    Chunked,
    /// Refused; `limit` is the ceiling that was exceeded.
    Reject { limit: usize },
}

/// Size limits applied on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    threshold: usize,
    multikey: bool,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_THRESHOLD, true)
    }
}

impl ChunkPolicy {
    /// Creates a policy. A zero threshold is treated as one byte.
    pub fn new(threshold: usize, multikey: bool) -> Self {
        Self {
            threshold: threshold.max(1),
            multikey,
        }
    }

    /// Bytes per physical entry.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether oversized values may be chunked.
    pub fn multikey(&self) -> bool {
        self.multikey
    }

    /// Absolute size ceiling, chunked or not.
    pub fn hard_cap(&self) -> usize {
        self.threshold.saturating_mul(HARD_CAP_FACTOR)
    }

    /// Decides the placement of a serialized value of `size` bytes.
    pub fn placement(&self, size: usize) -> Placement {
        if size > self.hard_cap() {
            Placement::Reject {
                limit: self.hard_cap(),
            }
        } else if size <= self.threshold {
            Placement::Inline
        } else if self.multikey {
            Placement::Chunked
        } else {
            Placement::Reject {
                limit: self.threshold,
            }
        }
    }

    /// Most fragments a value within the hard cap can need. Chunk markers
    /// claiming more are corrupt.
    pub fn max_chunks(&self) -> usize {
        chunk_count(self.hard_cap(), self.threshold)
    }

    /// Encodes `data` and cuts the encoded text into fragments.
    pub fn split(&self, data: &[u8]) -> Vec<String> {
        split_encoded(data, self.threshold)
    }
}

/// Base64-encodes `data` and cuts the text into `size`-byte slices.
///
/// Always yields at least one fragment for non-empty input.
pub fn split_encoded(data: &[u8], size: usize) -> Vec<String> {
    let encoded = STANDARD.encode(data);
    let size = size.max(1);

    // Base64 output is ASCII, so every byte offset is a char boundary.
    encoded
        .as_bytes()
        .chunks(size)
        .map(|slice| String::from_utf8_lossy(slice).into_owned())
        .collect()
}

/// Number of fragments [`split_encoded`] produces for `len` input bytes.
pub fn chunk_count(len: usize, size: usize) -> usize {
    let encoded_len = len.div_ceil(3).saturating_mul(4);
    encoded_len.div_ceil(size.max(1))
}

/// Joins fragments in order and decodes the base64 text.
pub fn reassemble<S: AsRef<str>>(fragments: &[S]) -> Result<Vec<u8>, base64::DecodeError> {
    let total = fragments.iter().map(|f| f.as_ref().len()).sum();
    let mut encoded = String::with_capacity(total);
    for fragment in fragments {
        encoded.push_str(fragment.as_ref());
    }
    STANDARD.decode(encoded)
}
