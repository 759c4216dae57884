//! Envelope Data Types
//!
//! An envelope is the record stored at every physical path. It frames the
//! payload with metadata the store needs without touching the payload:
//!
//! ```text
//! {
//!   "v": 2,
//!   "created_at_str": "2024-05-01T10:00:00+00:00",
//!   "keyname": "abc",
//!   "expires": 1714557600,          0 = never
//!   "hash": "5d41...",              chunked only
//!   "old_hash": "7c21...",          chunked only, when superseding
//!   "multi": true,
//!   "serial": false,
//!   "payload": 4                    text, or the chunk count when multi
//! }
//! ```
//!
//! In memory the chunking flags are folded into [`EnvelopeBody`], so code
//! matching on an envelope never has to reconcile `multi` with the shape of
//! `payload` itself.

use crate::envelope::hash::ContentHash;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Wire format revision written by this crate.
pub const ENVELOPE_FORMAT: u8 = 2;

/// On-wire format revision of a decoded envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeFormat {
    /// Records without a `v` tag, written before chunk metadata was tagged.
    /// Flags may be `0`/`1` integers and `expires` may be `null`.
    Legacy,
    /// Records tagged `"v": 2`.
    V2,
}

/// Metadata common to every envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeMeta {
    /// Wire revision the record was decoded from.
    pub format: EnvelopeFormat,
    /// Write time, if the record carried a parseable one.
    pub created_at: Option<DateTime<Utc>>,
    /// The logical key (or chunk index) the record was written for.
    pub keyname: String,
    /// Absolute unix seconds, 0 for never.
    pub expires: u64,
    /// Hash of the chunk set this write superseded.
    pub old_hash: Option<ContentHash>,
}

/// What an envelope carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeBody {
    /// Payload stored in the envelope itself.
    Inline {
        /// `true` when `payload` is already wire text and must not go
        /// through the value codec.
        serial: bool,
        payload: String,
    },
    /// Payload split into `count` fragments under `<key>-data/<hash>/`.
    Chunked {
        count: usize,
        hash: ContentHash,
        /// Same meaning as the inline flag, applied to the reassembled text.
        serial: bool,
    },
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub meta: EnvelopeMeta,
    pub body: EnvelopeBody,
}

impl Envelope {
    /// Creates an inline envelope stamped with the current time.
    pub fn inline(keyname: &str, payload: impl Into<String>, expires: u64, serial: bool) -> Self {
        Self {
            meta: EnvelopeMeta::new(keyname, expires, None),
            body: EnvelopeBody::Inline {
                serial,
                payload: payload.into(),
            },
        }
    }

    /// Creates the top-level envelope of a chunk set.
    pub fn chunked(
        keyname: &str,
        count: usize,
        expires: u64,
        hash: ContentHash,
        old_hash: Option<ContentHash>,
        serial: bool,
    ) -> Self {
        Self {
            meta: EnvelopeMeta::new(keyname, expires, old_hash),
            body: EnvelopeBody::Chunked {
                count,
                hash,
                serial,
            },
        }
    }

    /// Overrides the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.meta.created_at = Some(created_at);
        self
    }

    /// Read-side expiry check: a positive expiry at or before `now` is
    /// expired.
    #[inline]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.meta.expires > 0 && self.meta.expires <= now
    }

    /// Sweep-side expiry check: a positive expiry strictly before `now`.
    #[inline]
    pub fn is_past(&self, now: u64) -> bool {
        self.meta.expires > 0 && self.meta.expires < now
    }

    /// Hash of the chunk set this envelope references, if chunked.
    pub fn chunk_hash(&self) -> Option<&ContentHash> {
        match &self.body {
            EnvelopeBody::Chunked { hash, .. } => Some(hash),
            EnvelopeBody::Inline { .. } => None,
        }
    }

    /// Returns true if the record was written at least `age` before `now`.
    ///
    /// Records without a parseable timestamp are never considered old.
    pub fn is_older_than(&self, age: Duration, now: DateTime<Utc>) -> bool {
        match (self.meta.created_at, chrono::Duration::from_std(age)) {
            (Some(created_at), Ok(age)) => now - created_at >= age,
            _ => false,
        }
    }
}

impl EnvelopeMeta {
    fn new(keyname: &str, expires: u64, old_hash: Option<ContentHash>) -> Self {
        Self {
            format: EnvelopeFormat::V2,
            created_at: Some(Utc::now()),
            keyname: keyname.to_string(),
            expires,
            old_hash,
        }
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Absolute expiry `ttl` from now.
pub fn expires_in(ttl: Duration) -> u64 {
    unix_now().saturating_add(ttl.as_secs())
}
