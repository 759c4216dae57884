//! Value Envelope
//!
//! Frames every stored payload with the metadata the store needs: creation
//! time, absolute expiry, chunking flags and the content hash of chunked
//! payloads.
//!
//! ## Modules
//!
//! - `types`: the in-memory [`Envelope`] model
//! - `codec`: JSON wire encoding and tolerant decoding
//! - `hash`: [`ContentHash`], the MD5 digest naming chunk sets
//!
//! ## Example
//!
//! ```
//! use kvstash::envelope::{decode, encode, Envelope, EnvelopeBody};
//!
//! let envelope = Envelope::inline("abc", "\"hello\"", 0, false);
//! let bytes = encode(&envelope).unwrap();
//!
//! let decoded = decode(&bytes).unwrap();
//! assert_eq!(decoded.body, envelope.body);
//! assert!(matches!(decoded.body, EnvelopeBody::Inline { .. }));
//! ```

pub mod codec;
pub mod hash;
pub mod types;

pub use codec::{decode, encode, EnvelopeError};
pub use hash::ContentHash;
pub use types::{
    expires_in, unix_now, Envelope, EnvelopeBody, EnvelopeFormat, EnvelopeMeta, ENVELOPE_FORMAT,
};
