//! Envelope wire codec.
//!
//! Envelopes are JSON objects so an operator can read them straight out of
//! the backend UI. Decoding accepts both revisions of the record:
//!
//! - format 2 (`"v": 2`): strict booleans, integer expiry.
//! - legacy (no `v`): `multi`/`serial` may be `0`/`1`, `expires` may be
//!   `null`, and inline records may still carry a `hash`.
//!
//! Every accepted record maps onto exactly one [`EnvelopeBody`] variant.

use crate::envelope::hash::ContentHash;
use crate::envelope::types::{
    Envelope, EnvelopeBody, EnvelopeFormat, EnvelopeMeta, ENVELOPE_FORMAT,
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while encoding or decoding an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The bytes are not a JSON envelope record
    #[error("invalid envelope record: {0}")]
    Json(#[from] serde_json::Error),

    /// The record was written by a newer revision
    #[error("unsupported envelope format {0}")]
    UnsupportedFormat(u8),

    /// `multi` is set but `payload` is not a chunk count
    #[error("chunked envelope has invalid chunk count: {0}")]
    InvalidChunkCount(String),

    /// `multi` is set but the hash is missing or not a digest
    #[error("chunked envelope has invalid hash: {0:?}")]
    InvalidHash(String),
}

/// Loosely typed scalar, for fields older writers emitted as ints or strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WirePayload {
    Count(u64),
    Text(String),
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    v: Option<u8>,
    #[serde(default)]
    created_at_str: String,
    #[serde(default, deserialize_with = "de_keyname")]
    keyname: String,
    #[serde(default, deserialize_with = "de_expires")]
    expires: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    old_hash: String,
    #[serde(default, deserialize_with = "de_flag")]
    multi: bool,
    #[serde(default, deserialize_with = "de_flag")]
    serial: bool,
    payload: WirePayload,
}

fn de_expires<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Option::<Loose>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Loose::Int(n)) => Ok(n.max(0) as u64),
        Some(Loose::Float(f)) if f.is_finite() => Ok(f.max(0.0) as u64),
        Some(Loose::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(|n| n.max(0) as u64)
            .map_err(de::Error::custom),
        Some(_) => Err(de::Error::custom("expires must be an integer")),
    }
}

fn de_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Option::<Loose>::deserialize(deserializer)? {
        None => Ok(false),
        Some(Loose::Bool(b)) => Ok(b),
        Some(Loose::Int(n)) => Ok(n == 1),
        Some(Loose::Float(f)) => Ok(f == 1.0),
        Some(Loose::Text(s)) => Ok(s.trim() == "1"),
    }
}

fn de_keyname<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Option::<Loose>::deserialize(deserializer)? {
        None => Ok(String::new()),
        Some(Loose::Text(s)) => Ok(s),
        Some(Loose::Int(n)) => Ok(n.to_string()),
        Some(Loose::Float(f)) => Ok(f.to_string()),
        Some(Loose::Bool(b)) => Ok(b.to_string()),
    }
}

/// Encodes an envelope into its JSON wire form.
pub fn encode(envelope: &Envelope) -> Result<Bytes, EnvelopeError> {
    let meta = &envelope.meta;
    let (multi, serial, hash, payload) = match &envelope.body {
        EnvelopeBody::Inline { serial, payload } => {
            (false, *serial, String::new(), WirePayload::Text(payload.clone()))
        }
        EnvelopeBody::Chunked {
            count,
            hash,
            serial,
        } => (
            true,
            *serial,
            hash.to_string(),
            WirePayload::Count(*count as u64),
        ),
    };

    let wire = WireEnvelope {
        v: Some(ENVELOPE_FORMAT),
        created_at_str: meta
            .created_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, false))
            .unwrap_or_default(),
        keyname: meta.keyname.clone(),
        expires: meta.expires,
        hash,
        old_hash: meta
            .old_hash
            .as_ref()
            .map(ContentHash::to_string)
            .unwrap_or_default(),
        multi,
        serial,
        payload,
    };

    Ok(Bytes::from(serde_json::to_vec(&wire)?))
}

/// Decodes an envelope from its JSON wire form.
///
/// Expiry is not checked here; callers decide what an expired record means.
pub fn decode(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
    let wire: WireEnvelope = serde_json::from_slice(bytes)?;

    let format = match wire.v {
        None => EnvelopeFormat::Legacy,
        Some(ENVELOPE_FORMAT) => EnvelopeFormat::V2,
        Some(other) => return Err(EnvelopeError::UnsupportedFormat(other)),
    };

    let body = if wire.multi {
        let count = match &wire.payload {
            WirePayload::Count(n) => usize::try_from(*n)
                .map_err(|_| EnvelopeError::InvalidChunkCount(n.to_string()))?,
            WirePayload::Text(s) => s
                .trim()
                .parse::<usize>()
                .map_err(|_| EnvelopeError::InvalidChunkCount(s.clone()))?,
        };
        let hash =
            ContentHash::parse(&wire.hash).ok_or_else(|| EnvelopeError::InvalidHash(wire.hash))?;

        // Legacy writers always flagged the chunk marker as serial even though
        // the reassembled text still needed the value codec.
        let serial = match format {
            EnvelopeFormat::Legacy => false,
            EnvelopeFormat::V2 => wire.serial,
        };

        EnvelopeBody::Chunked {
            count,
            hash,
            serial,
        }
    } else {
        let payload = match wire.payload {
            WirePayload::Text(s) => s,
            WirePayload::Count(n) => n.to_string(),
        };
        EnvelopeBody::Inline {
            serial: wire.serial,
            payload,
        }
    };

    let created_at = DateTime::parse_from_rfc3339(&wire.created_at_str)
        .ok()
        .map(|t| t.with_timezone(&Utc));

    Ok(Envelope {
        meta: EnvelopeMeta {
            format,
            created_at,
            keyname: wire.keyname,
            expires: wire.expires,
            old_hash: ContentHash::parse(&wire.old_hash),
        },
        body,
    })
}
