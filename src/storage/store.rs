//! The Chunk Store
//!
//! [`ChunkStore`] maps logical `(type, key)` pairs onto the flat backend.
//! Small values live inline in one envelope; large values are split into a
//! chunk set named after their content hash and verified on the way back.
//!
//! ## Write path
//!
//! ```text
//! set(type, key, value)
//!    │ codec
//!    ▼
//! text ── size ≤ threshold ──► PUT <type>/<key>            (inline)
//!    │
//!    └── size > threshold ──► PUT <type>/<key>-data/<hash>/0..n
//!                             PUT <type>/<key>             (marker: n, hash)
//!                             DELETE <type>/<key>-data/<old_hash>/
//! ```
//!
//! The marker is written only after every fragment, and the superseded chunk
//! set is dropped only after the marker. A reader racing a writer can see a
//! marker whose fragments do not verify yet; it gets an integrity error and
//! should retry.

use crate::client::{ConsulClient, KvClient};
use crate::config::StoreConfig;
use crate::envelope::{self, unix_now, ContentHash, Envelope, EnvelopeBody};
use crate::path::{ChunkRef, PathNamespacer};
use crate::storage::chunk::{self, ChunkPolicy, Placement};
use crate::storage::error::{StoreError, StoreResult};
use crate::value::{self, JsonCodec, ValueCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Store handle over a [`KvClient`].
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
///
/// # Example
///
/// ```
/// use kvstash::client::MemoryClient;
/// use kvstash::storage::{ChunkPolicy, ChunkStore};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let store = ChunkStore::new(Arc::new(MemoryClient::new()), "sso", ChunkPolicy::default());
///
/// store.set("session", "abc", &vec![1, 2, 3], 0).await.unwrap();
/// let value: Option<Vec<u32>> = store.get("session", "abc").await.unwrap();
/// assert_eq!(value, Some(vec![1, 2, 3]));
/// # });
/// ```
pub struct ChunkStore<C: ValueCodec = JsonCodec> {
    client: Arc<dyn KvClient>,
    paths: PathNamespacer,
    policy: ChunkPolicy,
    codec: C,
}

impl ChunkStore<JsonCodec> {
    /// Creates a store rooted at `<prefix>/v2` using the JSON value codec.
    pub fn new(client: Arc<dyn KvClient>, prefix: &str, policy: ChunkPolicy) -> Self {
        Self {
            client,
            paths: PathNamespacer::new(prefix),
            policy,
            codec: JsonCodec,
        }
    }

    /// Creates a store over `client` using the prefix and limits in `config`.
    pub fn from_config(client: Arc<dyn KvClient>, config: &StoreConfig) -> Self {
        Self::new(client, &config.kv_prefix, config.chunk_policy())
    }

    /// Connects to the Consul agent named in `config` and verifies it has a
    /// leader.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let client = ConsulClient::new(&config.kv_url, config.request_timeout())
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;

        client
            .health_check()
            .await
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;

        info!(
            url = %config.kv_url,
            prefix = %config.kv_prefix,
            multikey = config.multikey,
            threshold = config.chunk_threshold,
            "Connected to KV backend"
        );

        Ok(Self::from_config(Arc::new(client), config))
    }
}

impl<C: ValueCodec> ChunkStore<C> {
    /// Replaces the value codec.
    pub fn with_codec<D: ValueCodec>(self, codec: D) -> ChunkStore<D> {
        ChunkStore {
            client: self.client,
            paths: self.paths,
            policy: self.policy,
            codec,
        }
    }

    /// The underlying transport.
    pub fn client(&self) -> &Arc<dyn KvClient> {
        &self.client
    }

    /// The path builder for this namespace.
    pub fn paths(&self) -> &PathNamespacer {
        &self.paths
    }

    /// The size limits applied on write.
    pub fn policy(&self) -> &ChunkPolicy {
        &self.policy
    }

    /// The value codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Stores `value` under `(ty, key)`.
    ///
    /// `expires` is absolute unix seconds, `0` for never. A value too large
    /// to store fails with [`StoreError::PayloadTooLarge`] after removing
    /// whatever was stored at the key before.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        ty: &str,
        key: &str,
        value: &T,
        expires: u64,
    ) -> StoreResult<()> {
        let text = self.codec.encode(value)?;
        self.store_text(ty, key, &text, expires, false).await
    }

    /// Stores pre-serialized `text` under `(ty, key)`, bypassing the codec.
    ///
    /// Read it back with [`get_raw`](Self::get_raw), or with
    /// [`get`](Self::get) into any type that deserializes from a string.
    pub async fn set_raw(&self, ty: &str, key: &str, text: &str, expires: u64) -> StoreResult<()> {
        self.store_text(ty, key, text, expires, true).await
    }

    async fn store_text(
        &self,
        ty: &str,
        key: &str,
        text: &str,
        expires: u64,
        serial: bool,
    ) -> StoreResult<()> {
        let path = self.paths.request_path(ty, Some(key));
        let size = text.len();

        match self.policy.placement(size) {
            Placement::Reject { limit } => {
                error!(
                    path = %path,
                    size,
                    limit,
                    multikey = self.policy.multikey(),
                    "Payload too large, dropping existing entry"
                );
                self.delete(ty, key).await?;
                Err(StoreError::PayloadTooLarge { path, size, limit })
            }

            Placement::Inline => {
                let envelope = Envelope::inline(key, text, expires, serial);
                self.client.put(&path, encode(&path, &envelope)?).await?;
                debug!(path = %path, size, expires, "Stored inline value");
                Ok(())
            }

            Placement::Chunked => {
                self.store_chunked(ty, key, &path, text, expires, serial)
                    .await
            }
        }
    }

    async fn store_chunked(
        &self,
        ty: &str,
        key: &str,
        path: &str,
        text: &str,
        expires: u64,
        serial: bool,
    ) -> StoreResult<()> {
        let hash = ContentHash::compute(text.as_bytes());
        let old_hash = self.current_chunk_hash(path).await;

        let fragments = self.policy.split(text.as_bytes());
        let count = fragments.len();

        for (index, fragment) in fragments.into_iter().enumerate() {
            let chunk_path = self.paths.chunk_path(ty, key, hash.as_str(), index);
            let envelope = Envelope::inline(&index.to_string(), fragment, expires, true);
            self.client
                .put(&chunk_path, encode(&chunk_path, &envelope)?)
                .await?;
        }

        let marker = Envelope::chunked(key, count, expires, hash.clone(), old_hash.clone(), serial);
        self.client.put(path, encode(path, &marker)?).await?;

        debug!(
            path = %path,
            size = text.len(),
            chunks = count,
            hash = %hash,
            "Stored chunked value"
        );

        if let Some(old) = old_hash.filter(|old| *old != hash) {
            let old_dir = self.paths.chunk_set_dir(ty, key, old.as_str());
            self.client.delete(&old_dir, true).await?;
            debug!(path = %old_dir, hash = %old, "Dropped superseded chunk set");
        }

        Ok(())
    }

    /// Best-effort lookup of the chunk set currently referenced at `path`.
    async fn current_chunk_hash(&self, path: &str) -> Option<ContentHash> {
        match self.load_envelope(path).await {
            Ok(Some(envelope)) => envelope.chunk_hash().cloned(),
            Ok(None) => None,
            Err(e) => {
                debug!(path = %path, error = %e, "Ignoring unreadable previous entry");
                None
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Fetches the value stored under `(ty, key)`.
    ///
    /// Returns `Ok(None)` when the entry is missing, expired, chunked while
    /// chunking is disabled, or missing a fragment.
    pub async fn get<T: DeserializeOwned>(&self, ty: &str, key: &str) -> StoreResult<Option<T>> {
        let Some((text, serial)) = self.fetch_text(ty, key).await? else {
            return Ok(None);
        };

        let value = if serial {
            value::decode_raw(&text)?
        } else {
            self.codec.decode(&text)?
        };
        Ok(Some(value))
    }

    /// Fetches the stored text under `(ty, key)` without running the codec.
    pub async fn get_raw(&self, ty: &str, key: &str) -> StoreResult<Option<String>> {
        Ok(self.fetch_text(ty, key).await?.map(|(text, _)| text))
    }

    /// Fetches every value stored under `ty`, keyed by the key suffix.
    ///
    /// Chunk fragments are not listed. Entries that read as a miss map to
    /// `None`.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        ty: &str,
    ) -> StoreResult<BTreeMap<String, Option<T>>> {
        let mut values = BTreeMap::new();
        for key in self.list_type(ty).await? {
            let value = self.get(ty, &key).await?;
            values.insert(key, value);
        }
        Ok(values)
    }

    /// Keys stored under `ty`, chunk fragments excluded.
    pub async fn list_type(&self, ty: &str) -> StoreResult<Vec<String>> {
        let dir = self.paths.dir_path(ty, None);
        let physical = self.client.list_keys(&dir).await?;

        Ok(physical
            .iter()
            .filter_map(|p| PathNamespacer::strip_listing_prefix(&dir, p))
            .filter(|suffix| ChunkRef::parse(suffix).is_none())
            .map(str::to_string)
            .collect())
    }

    /// Reads and decodes the envelope at a physical path.
    pub(crate) async fn load_envelope(&self, path: &str) -> StoreResult<Option<Envelope>> {
        let Some(bytes) = self.client.get(path).await? else {
            return Ok(None);
        };

        envelope::decode(&bytes)
            .map(Some)
            .map_err(|source| StoreError::MalformedEnvelope {
                path: path.to_string(),
                source,
            })
    }

    /// Resolves `(ty, key)` to its stored text and serial flag.
    async fn fetch_text(&self, ty: &str, key: &str) -> StoreResult<Option<(String, bool)>> {
        let path = self.paths.request_path(ty, Some(key));

        let Some(envelope) = self.load_envelope(&path).await? else {
            debug!(path = %path, "Entry not found");
            return Ok(None);
        };

        let now = unix_now();
        if envelope.is_expired_at(now) {
            debug!(path = %path, expires = envelope.meta.expires, "Entry expired");
            return Ok(None);
        }

        match envelope.body {
            EnvelopeBody::Inline { serial, payload } => {
                debug!(path = %path, size = payload.len(), "Fetched inline value");
                Ok(Some((payload, serial)))
            }
            EnvelopeBody::Chunked { .. } if !self.policy.multikey() => {
                debug!(path = %path, "Chunked entry read with chunking disabled");
                Ok(None)
            }
            EnvelopeBody::Chunked {
                count,
                hash,
                serial,
            } => Ok(self
                .read_chunks(ty, key, &path, count, &hash, now)
                .await?
                .map(|text| (text, serial))),
        }
    }

    async fn read_chunks(
        &self,
        ty: &str,
        key: &str,
        path: &str,
        count: usize,
        hash: &ContentHash,
        now: u64,
    ) -> StoreResult<Option<String>> {
        let max = self.policy.max_chunks();
        if count > max {
            return Err(self
                .heal(path, format!("chunk count {count} exceeds the limit of {max}"))
                .await);
        }

        let mut fragments = Vec::with_capacity(count);

        for index in 0..count {
            let chunk_path = self.paths.chunk_path(ty, key, hash.as_str(), index);

            let Some(bytes) = self.client.get(&chunk_path).await? else {
                warn!(path = %path, chunk = %chunk_path, "Chunk missing");
                return Ok(None);
            };

            let fragment = match envelope::decode(&bytes) {
                Ok(fragment) => fragment,
                Err(e) => {
                    return Err(self
                        .heal(path, format!("chunk {index} is not an envelope: {e}"))
                        .await)
                }
            };

            if fragment.is_expired_at(now) {
                warn!(path = %path, chunk = %chunk_path, "Chunk expired");
                return Ok(None);
            }

            match fragment.body {
                EnvelopeBody::Inline { payload, .. } => fragments.push(payload),
                EnvelopeBody::Chunked { .. } => {
                    return Err(self
                        .heal(path, format!("chunk {index} is itself a chunk marker"))
                        .await)
                }
            }
        }

        let data = match chunk::reassemble(&fragments) {
            Ok(data) => data,
            Err(e) => return Err(self.heal(path, format!("chunk data is not base64: {e}")).await),
        };

        let actual = ContentHash::compute(&data);
        if actual != *hash {
            return Err(self
                .heal(path, format!("expected hash {hash}, got {actual}"))
                .await);
        }

        match String::from_utf8(data) {
            Ok(text) => {
                debug!(path = %path, chunks = count, hash = %hash, "Fetched chunked value");
                Ok(Some(text))
            }
            Err(e) => Err(self.heal(path, format!("chunk data is not UTF-8: {e}")).await),
        }
    }

    /// Drops the top-level entry of a chunk set that failed verification.
    ///
    /// The fragments stay behind for the sweeper; the next read is a miss.
    async fn heal(&self, path: &str, reason: String) -> StoreError {
        error!(path = %path, reason = %reason, "Chunk set failed verification, removing entry");

        if let Err(e) = self.client.delete(path, false).await {
            warn!(path = %path, error = %e, "Failed to remove corrupt entry");
        }

        StoreError::IntegrityMismatch {
            path: path.to_string(),
            reason,
        }
    }

    // ========================================================================
    // Deletes
    // ========================================================================

    /// Removes `(ty, key)` and every chunk set stored for it.
    pub async fn delete(&self, ty: &str, key: &str) -> StoreResult<()> {
        let nested = self.paths.nested_dir(ty, key);
        let path = self.paths.request_path(ty, Some(key));

        self.client.delete(&nested, true).await?;
        self.client.delete(&path, false).await?;

        debug!(path = %path, "Deleted entry");
        Ok(())
    }

    /// Removes every entry stored under `ty`.
    ///
    /// Returns the number of logical entries removed.
    pub async fn delete_all(&self, ty: &str) -> StoreResult<usize> {
        let keys = self.list_type(ty).await?;
        for key in &keys {
            self.delete(ty, key).await?;
        }

        // Anything left is a stray fragment or folder marker.
        let dir = self.paths.dir_path(ty, None);
        self.client.delete(&dir, true).await?;
        self.client
            .delete(&self.paths.request_path(ty, None), false)
            .await?;

        debug!(path = %dir, removed = keys.len(), "Deleted type");
        Ok(keys.len())
    }

    /// Queries are not supported by a flat KV store.
    pub fn query_builder(&self) -> StoreResult<Infallible> {
        Err(StoreError::UnsupportedQuery)
    }
}

fn encode(path: &str, envelope: &Envelope) -> StoreResult<bytes::Bytes> {
    envelope::encode(envelope).map_err(|source| StoreError::MalformedEnvelope {
        path: path.to_string(),
        source,
    })
}

impl<C: ValueCodec> std::fmt::Debug for ChunkStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("backend", &self.client.backend_name())
            .field("root", &self.paths.root())
            .field("policy", &self.policy)
            .field("codec", &self.codec.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{KvError, KvResult, MemoryClient};
    use crate::envelope::expires_in;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde::Deserialize;
    use std::time::Duration;

    const THRESHOLD: usize = 64;

    fn setup() -> (Arc<MemoryClient>, ChunkStore) {
        setup_with(ChunkPolicy::new(THRESHOLD, true))
    }

    fn setup_with(policy: ChunkPolicy) -> (Arc<MemoryClient>, ChunkStore) {
        let client = Arc::new(MemoryClient::new());
        let store = ChunkStore::new(client.clone(), "sso", policy);
        (client, store)
    }

    fn large_text(len: usize, seed: u8) -> String {
        (0..len)
            .map(|i| (b'a' + ((i as u8).wrapping_add(seed) % 26)) as char)
            .collect()
    }

    fn fragment_paths(client: &MemoryClient, dir: &str) -> Vec<String> {
        client
            .paths()
            .into_iter()
            .filter(|p| p.starts_with(dir))
            .collect()
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        roles: Vec<String>,
    }

    #[tokio::test]
    async fn test_small_value_round_trip() {
        let (client, store) = setup();
        let session = Session {
            user: "alice".to_string(),
            roles: vec!["admin".to_string()],
        };

        store.set("session", "abc", &session, 0).await.unwrap();

        let value: Option<Session> = store.get("session", "abc").await.unwrap();
        assert_eq!(value, Some(session));
        assert_eq!(client.paths(), vec!["sso/v2/session/abc".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_key_is_a_miss() {
        let (_, store) = setup();
        let value: Option<String> = store.get("session", "nope").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_chunked_round_trip() {
        let (client, store) = setup();
        let text = large_text(3 * THRESHOLD, 0);

        store.set("session", "big", &text, 0).await.unwrap();

        let serialized = serde_json::to_string(&text).unwrap();
        let hash = ContentHash::compute(serialized.as_bytes());
        let dir = format!("sso/v2/session/big-data/{hash}/");
        assert_eq!(
            fragment_paths(&client, &dir).len(),
            chunk::chunk_count(serialized.len(), THRESHOLD)
        );

        let value: Option<String> = store.get("session", "big").await.unwrap();
        assert_eq!(value, Some(text));
    }

    #[tokio::test]
    async fn test_fragments_stay_under_threshold() {
        let (client, store) = setup();
        store
            .set("session", "big", &large_text(5 * THRESHOLD, 3), 0)
            .await
            .unwrap();

        for path in fragment_paths(&client, "sso/v2/session/big-data/") {
            let envelope = envelope::decode(&client.raw_get(&path).unwrap()).unwrap();
            match envelope.body {
                EnvelopeBody::Inline { serial, payload } => {
                    assert!(serial);
                    assert!(payload.len() <= THRESHOLD);
                }
                other => panic!("fragment {path} is not inline: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_hard_cap_rejection_removes_existing() {
        let (client, store) = setup();
        store.set("session", "abc", "small", 0).await.unwrap();

        let huge = large_text(THRESHOLD * 10 + 1, 0);
        let result = store.set("session", "abc", &huge, 0).await;
        assert!(matches!(
            result,
            Err(StoreError::PayloadTooLarge { limit: 640, .. })
        ));

        let value: Option<String> = store.get("session", "abc").await.unwrap();
        assert_eq!(value, None);
        assert!(client.is_empty());
    }

    #[tokio::test]
    async fn test_multikey_disabled_rejects_large_writes() {
        let (_, store) = setup_with(ChunkPolicy::new(THRESHOLD, false));

        let result = store
            .set("session", "abc", &large_text(THRESHOLD + 1, 0), 0)
            .await;
        assert!(matches!(
            result,
            Err(StoreError::PayloadTooLarge { limit: THRESHOLD, .. })
        ));
    }

    #[tokio::test]
    async fn test_multikey_disabled_read_is_a_miss() {
        let (client, writer) = setup();
        writer
            .set("session", "big", &large_text(2 * THRESHOLD, 0), 0)
            .await
            .unwrap();

        let reader = ChunkStore::new(client.clone(), "sso", ChunkPolicy::new(THRESHOLD, false));
        let value: Option<String> = reader.get("session", "big").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_corrupt_chunk_self_heals() {
        let (client, store) = setup();
        store
            .set("session", "big", &large_text(3 * THRESHOLD, 0), 0)
            .await
            .unwrap();

        // Swap one fragment's payload for different valid base64
        let victim = fragment_paths(&client, "sso/v2/session/big-data/")
            .into_iter()
            .next()
            .unwrap();
        let forged = Envelope::inline("0", "QUJDRA==", 0, true);
        client.raw_put(&victim, envelope::encode(&forged).unwrap());

        let result: StoreResult<Option<String>> = store.get("session", "big").await;
        assert!(matches!(result, Err(StoreError::IntegrityMismatch { .. })));

        assert_eq!(client.raw_get("sso/v2/session/big"), None);
        let value: Option<String> = store.get("session", "big").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_garbled_chunk_self_heals() {
        let (client, store) = setup();
        store
            .set("session", "big", &large_text(3 * THRESHOLD, 0), 0)
            .await
            .unwrap();

        let victim = fragment_paths(&client, "sso/v2/session/big-data/")
            .pop()
            .unwrap();
        client.raw_put(&victim, "not an envelope");

        let result: StoreResult<Option<String>> = store.get("session", "big").await;
        assert!(matches!(result, Err(StoreError::IntegrityMismatch { .. })));
        assert_eq!(client.raw_get("sso/v2/session/big"), None);
    }

    #[tokio::test]
    async fn test_oversized_chunk_count_self_heals() {
        let (client, store) = setup();
        let hash = ContentHash::compute(b"whatever");
        client.raw_put(
            "sso/v2/session/big",
            format!(r#"{{"v":2,"keyname":"big","expires":0,"hash":"{hash}","multi":true,"serial":false,"payload":4611686018427387904}}"#),
        );

        let result: StoreResult<Option<String>> = store.get("session", "big").await;
        match result {
            Err(StoreError::IntegrityMismatch { reason, .. }) => {
                assert!(reason.contains("exceeds the limit"), "{reason}");
            }
            other => panic!("expected integrity mismatch, got {other:?}"),
        }
        assert_eq!(client.raw_get("sso/v2/session/big"), None);
    }

    /// Fails every read of exactly `poison`; everything else passes through.
    struct FailingReads {
        inner: MemoryClient,
        poison: String,
    }

    #[async_trait]
    impl KvClient for FailingReads {
        async fn get(&self, path: &str) -> KvResult<Option<Bytes>> {
            if path == self.poison {
                return Err(KvError::Unavailable("injected failure".to_string()));
            }
            self.inner.get(path).await
        }

        async fn list_keys(&self, prefix: &str) -> KvResult<Vec<String>> {
            self.inner.list_keys(prefix).await
        }

        async fn put(&self, path: &str, value: Bytes) -> KvResult<()> {
            self.inner.put(path, value).await
        }

        async fn delete(&self, path: &str, recurse: bool) -> KvResult<()> {
            self.inner.delete(path, recurse).await
        }

        fn backend_name(&self) -> &'static str {
            "failing-reads"
        }
    }

    fn failing_reads(poison: &str) -> (Arc<FailingReads>, ChunkStore) {
        let client = Arc::new(FailingReads {
            inner: MemoryClient::new(),
            poison: poison.to_string(),
        });
        let store = ChunkStore::new(client.clone(), "sso", ChunkPolicy::new(THRESHOLD, true));
        (client, store)
    }

    #[tokio::test]
    async fn test_unreadable_previous_entry_does_not_block_chunked_set() {
        let (client, store) = failing_reads("sso/v2/session/big");
        let first = large_text(3 * THRESHOLD, 0);
        let second = large_text(3 * THRESHOLD, 7);
        let first_hash = ContentHash::compute(serde_json::to_string(&first).unwrap().as_bytes());

        store.set("session", "big", &first, 0).await.unwrap();
        store.set("session", "big", &second, 0).await.unwrap();

        let marker =
            envelope::decode(&client.inner.raw_get("sso/v2/session/big").unwrap()).unwrap();
        assert!(matches!(marker.body, EnvelopeBody::Chunked { .. }));
        assert_eq!(marker.meta.old_hash, None);

        // The previous set could not be identified, so it is left alone.
        let old_dir = format!("sso/v2/session/big-data/{first_hash}/");
        assert!(!fragment_paths(&client.inner, &old_dir).is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_on_get_propagates() {
        let (client, store) = failing_reads("sso/v2/session/abc");
        client.inner.raw_put(
            "sso/v2/session/abc",
            envelope::encode(&Envelope::inline("abc", "\"x\"", 0, false)).unwrap(),
        );

        let result: StoreResult<Option<String>> = store.get("session", "abc").await;
        assert!(matches!(
            result,
            Err(StoreError::Transport(KvError::Unavailable(_)))
        ));
        // The failed read must not have been mistaken for corruption.
        assert!(client.inner.raw_get("sso/v2/session/abc").is_some());
    }

    #[tokio::test]
    async fn test_transport_error_on_chunk_read_propagates() {
        let (client, writer) = setup();
        let text = large_text(3 * THRESHOLD, 0);
        writer.set("session", "big", &text, 0).await.unwrap();

        let first_chunk = fragment_paths(&client, "sso/v2/session/big-data/")
            .into_iter()
            .next()
            .unwrap();
        let (flaky, store) = failing_reads(&first_chunk);
        for path in client.paths() {
            flaky.inner.raw_put(&path, client.raw_get(&path).unwrap());
        }

        let result: StoreResult<Option<String>> = store.get("session", "big").await;
        assert!(matches!(result, Err(StoreError::Transport(_))));
        assert!(flaky.inner.raw_get("sso/v2/session/big").is_some());
    }

    #[tokio::test]
    async fn test_missing_chunk_is_a_miss() {
        let (client, store) = setup();
        store
            .set("session", "big", &large_text(3 * THRESHOLD, 0), 0)
            .await
            .unwrap();

        let victim = fragment_paths(&client, "sso/v2/session/big-data/")
            .pop()
            .unwrap();
        client.raw_remove(&victim);

        let value: Option<String> = store.get("session", "big").await.unwrap();
        assert_eq!(value, None);
        // A gap is not corruption; the marker stays.
        assert!(client.raw_get("sso/v2/session/big").is_some());
    }

    #[tokio::test]
    async fn test_expired_value_is_a_miss() {
        let (client, store) = setup();
        store
            .set("session", "old", "value", unix_now() - 1)
            .await
            .unwrap();

        let value: Option<String> = store.get("session", "old").await.unwrap();
        assert_eq!(value, None);
        // Reads never delete
        assert!(client.raw_get("sso/v2/session/old").is_some());
    }

    #[tokio::test]
    async fn test_future_expiry_is_readable() {
        let (_, store) = setup();
        let expires = expires_in(Duration::from_secs(3600));
        store.set("session", "abc", "value", expires).await.unwrap();

        let value: Option<String> = store.get("session", "abc").await.unwrap();
        assert_eq!(value.as_deref(), Some("value"));
    }

    #[tokio::test]
    async fn test_overwrite_drops_old_chunk_set() {
        let (client, store) = setup();

        let first = large_text(3 * THRESHOLD, 0);
        let second = large_text(3 * THRESHOLD, 7);
        let first_hash = ContentHash::compute(serde_json::to_string(&first).unwrap().as_bytes());
        let second_hash =
            ContentHash::compute(serde_json::to_string(&second).unwrap().as_bytes());

        store.set("session", "big", &first, 0).await.unwrap();
        store.set("session", "big", &second, 0).await.unwrap();

        let old_dir = format!("sso/v2/session/big-data/{first_hash}/");
        let new_dir = format!("sso/v2/session/big-data/{second_hash}/");
        assert!(fragment_paths(&client, &old_dir).is_empty());
        assert!(!fragment_paths(&client, &new_dir).is_empty());

        let marker = envelope::decode(&client.raw_get("sso/v2/session/big").unwrap()).unwrap();
        assert_eq!(marker.meta.old_hash, Some(first_hash));

        let value: Option<String> = store.get("session", "big").await.unwrap();
        assert_eq!(value, Some(second));
    }

    #[tokio::test]
    async fn test_overwrite_with_same_content_keeps_chunk_set() {
        let (client, store) = setup();
        let text = large_text(3 * THRESHOLD, 0);

        store.set("session", "big", &text, 0).await.unwrap();
        let before = fragment_paths(&client, "sso/v2/session/big-data/");

        store.set("session", "big", &text, 0).await.unwrap();
        assert_eq!(fragment_paths(&client, "sso/v2/session/big-data/"), before);

        let value: Option<String> = store.get("session", "big").await.unwrap();
        assert_eq!(value, Some(text));
    }

    #[tokio::test]
    async fn test_raw_values_skip_the_codec() {
        let (client, store) = setup();

        store.set_raw("token", "t1", "{not json", 0).await.unwrap();
        assert_eq!(
            store.get_raw("token", "t1").await.unwrap().as_deref(),
            Some("{not json")
        );
        let value: Option<String> = store.get("token", "t1").await.unwrap();
        assert_eq!(value.as_deref(), Some("{not json"));

        let envelope = envelope::decode(&client.raw_get("sso/v2/token/t1").unwrap()).unwrap();
        assert!(matches!(envelope.body, EnvelopeBody::Inline { serial: true, .. }));
    }

    #[tokio::test]
    async fn test_chunked_raw_value() {
        let (_, store) = setup();
        let text = large_text(4 * THRESHOLD, 1);

        store.set_raw("token", "t1", &text, 0).await.unwrap();
        let value: Option<String> = store.get("token", "t1").await.unwrap();
        assert_eq!(value, Some(text));
    }

    #[tokio::test]
    async fn test_get_all_excludes_fragments_and_siblings() {
        let (_, store) = setup();

        store.set("session", "a", "one", 0).await.unwrap();
        store
            .set("session", "b", &large_text(2 * THRESHOLD, 0), 0)
            .await
            .unwrap();
        store.set("session", "c", "gone", unix_now() - 1).await.unwrap();
        store.set("sessions", "x", "sibling", 0).await.unwrap();

        let all: BTreeMap<String, Option<String>> = store.get_all("session").await.unwrap();
        assert_eq!(
            all.keys().cloned().collect::<Vec<_>>(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert_eq!(all["a"].as_deref(), Some("one"));
        assert_eq!(all["b"], Some(large_text(2 * THRESHOLD, 0)));
        assert_eq!(all["c"], None);
    }

    #[tokio::test]
    async fn test_get_all_on_empty_type() {
        let (_, store) = setup();
        let all: BTreeMap<String, Option<String>> = store.get_all("session").await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_chunks() {
        let (client, store) = setup();
        store
            .set("session", "big", &large_text(3 * THRESHOLD, 0), 0)
            .await
            .unwrap();
        store.set("session", "small", "x", 0).await.unwrap();

        store.delete("session", "big").await.unwrap();
        assert_eq!(client.paths(), vec!["sso/v2/session/small".to_string()]);

        // Deleting again is fine
        store.delete("session", "big").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_all_leaves_siblings() {
        let (client, store) = setup();
        store.set("session", "a", "one", 0).await.unwrap();
        store
            .set("session", "b", &large_text(2 * THRESHOLD, 0), 0)
            .await
            .unwrap();
        store.set("sessions", "x", "sibling", 0).await.unwrap();
        client.raw_put("sso/v2/session/zz-data/ff/0", "stray");

        let removed = store.delete_all("session").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(client.paths(), vec!["sso/v2/sessions/x".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_top_level_entry() {
        let (client, store) = setup();
        client.raw_put("sso/v2/session/bad", "garbage");

        let result: StoreResult<Option<String>> = store.get("session", "bad").await;
        assert!(matches!(result, Err(StoreError::MalformedEnvelope { .. })));
    }

    #[tokio::test]
    async fn test_legacy_inline_record() {
        let (client, store) = setup();
        client.raw_put(
            "sso/v2/session/legacy",
            r#"{"created_at_str":"2019-04-01T12:00:00+00:00","keyname":"legacy","expires":null,"hash":"5d41402abc4b2a76b9719d911017c592","multi":0,"serial":0,"payload":"[1,2]"}"#,
        );

        let value: Option<Vec<u8>> = store.get("session", "legacy").await.unwrap();
        assert_eq!(value, Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_query_builder_is_unsupported() {
        let (_, store) = setup();
        assert!(matches!(
            store.query_builder(),
            Err(StoreError::UnsupportedQuery)
        ));
    }

    #[tokio::test]
    async fn test_custom_codec() {
        struct UpperCodec;

        impl ValueCodec for UpperCodec {
            fn name(&self) -> &'static str {
                "upper"
            }

            fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, value::CodecError> {
                JsonCodec.encode(value).map(|s| s.to_uppercase())
            }

            fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, value::CodecError> {
                JsonCodec.decode(&text.to_lowercase())
            }
        }

        let (client, store) = setup();
        let store = store.with_codec(UpperCodec);

        store.set("session", "abc", "hello", 0).await.unwrap();
        let stored = envelope::decode(&client.raw_get("sso/v2/session/abc").unwrap()).unwrap();
        assert!(matches!(
            stored.body,
            EnvelopeBody::Inline { ref payload, .. } if payload == "\"HELLO\""
        ));

        let value: Option<String> = store.get("session", "abc").await.unwrap();
        assert_eq!(value.as_deref(), Some("hello"));
    }
}
