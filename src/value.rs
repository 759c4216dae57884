//! Application value codecs.
//!
//! The store never interprets application values. A [`ValueCodec`] turns a
//! value into wire text before it is framed and chunked, and back again on
//! read. [`JsonCodec`] is the default; hosts with their own format plug in a
//! different codec through [`ChunkStore::with_codec`](crate::ChunkStore::with_codec).

use serde::de::value::StrDeserializer;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by a value codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(String),

    #[error("failed to decode value: {0}")]
    Decode(String),
}

/// A reversible value <-> text codec.
///
/// `decode(encode(v))` must yield a value equal to `v`.
pub trait ValueCodec: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Serializes `value` to wire text.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, CodecError>;

    /// Deserializes wire text produced by [`encode`](Self::encode).
    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, CodecError>;
}

/// JSON value codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, CodecError> {
        serde_json::from_str(text).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Hands pre-serialized text to `T` as a plain string, bypassing any codec.
///
/// Works for `String` and anything else that deserializes from a string.
pub fn decode_raw<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    let deserializer = StrDeserializer::<serde::de::value::Error>::new(text);
    T::deserialize(deserializer).map_err(|e| CodecError::Decode(e.to_string()))
}
