//! Consul KV transport.
//!
//! Speaks the plain KV endpoints of the Consul HTTP API:
//!
//! ```text
//! GET    /v1/kv/<path>?raw        exact stored bytes, 404 when missing
//! GET    /v1/kv/<prefix>?keys     JSON list of full paths, 404 when empty
//! PUT    /v1/kv/<path>            body is the value, answers true/false
//! DELETE /v1/kv/<path>[?recurse]  answers true
//! GET    /v1/status/leader        "host:port", or "" without a leader
//! ```

use crate::client::{KvClient, KvError, KvResult};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Response, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Consul KV HTTP client.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ConsulClient {
    /// Creates a client for the agent at `base_url`.
    ///
    /// Nothing is sent until the first request; use
    /// [`health_check`](KvClient::health_check) to verify the agent.
    pub fn new(base_url: &str, timeout: Duration) -> KvResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| KvError::Unavailable(format!("invalid KV url {base_url:?}: {e}")))?;

        if base_url.cannot_be_a_base() {
            return Err(KvError::Unavailable(format!(
                "KV url {base_url} cannot carry a path"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KvError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, base_url })
    }

    /// The agent URL requests are sent to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds `<base>/v1/<api>/<path>` with every path segment escaped.
    ///
    /// A trailing `/` on `path` is kept, so directory listings stay
    /// directory listings.
    fn endpoint(&self, api: &str, path: &str, query: Option<&str>) -> KvResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| KvError::InvalidPath(path.to_string()))?;
            segments.pop_if_empty().push("v1").push(api);
            if !path.is_empty() {
                segments.extend(path.split('/'));
            }
        }
        url.set_query(query);
        Ok(url)
    }

    async fn send(&self, path: &str, request: reqwest::RequestBuilder) -> KvResult<Response> {
        request.send().await.map_err(|source| KvError::Request {
            path: path.to_string(),
            source,
        })
    }

    async fn read_body(path: &str, response: Response) -> KvResult<Bytes> {
        response.bytes().await.map_err(|source| KvError::Request {
            path: path.to_string(),
            source,
        })
    }

    /// Turns any non-success response into [`KvError::Status`].
    async fn ensure_success(path: &str, response: Response) -> KvResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(KvError::Status {
            path: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    /// Consul answers writes with a bare `true` or `false`.
    fn acknowledged(path: &str, body: &[u8]) -> KvResult<()> {
        match serde_json::from_slice::<bool>(body) {
            Ok(true) => Ok(()),
            _ => Err(KvError::Status {
                path: path.to_string(),
                status: StatusCode::OK.as_u16(),
                body: String::from_utf8_lossy(body).into_owned(),
            }),
        }
    }
}

#[async_trait]
impl KvClient for ConsulClient {
    async fn get(&self, path: &str) -> KvResult<Option<Bytes>> {
        let url = self.endpoint("kv", path, Some("raw"))?;
        debug!(%url, "GET");

        let response = self.send(path, self.http.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = Self::ensure_success(path, response).await?;
        Ok(Some(Self::read_body(path, response).await?))
    }

    async fn list_keys(&self, prefix: &str) -> KvResult<Vec<String>> {
        let url = self.endpoint("kv", prefix, Some("keys"))?;
        debug!(%url, "LIST");

        let response = self.send(prefix, self.http.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let response = Self::ensure_success(prefix, response).await?;
        let body = Self::read_body(prefix, response).await?;

        serde_json::from_slice::<Vec<String>>(&body).map_err(|e| KvError::IndexCorrupt {
            prefix: prefix.to_string(),
            reason: e.to_string(),
        })
    }

    async fn put(&self, path: &str, value: Bytes) -> KvResult<()> {
        let url = self.endpoint("kv", path, None)?;
        debug!(%url, size = value.len(), "PUT");

        let response = self.send(path, self.http.put(url).body(value)).await?;
        let response = Self::ensure_success(path, response).await?;
        let body = Self::read_body(path, response).await?;
        Self::acknowledged(path, &body)
    }

    async fn delete(&self, path: &str, recurse: bool) -> KvResult<()> {
        let query = if recurse { Some("recurse") } else { None };
        let url = self.endpoint("kv", path, query)?;
        debug!(%url, recurse, "DELETE");

        let response = self.send(path, self.http.delete(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        Self::ensure_success(path, response).await?;
        Ok(())
    }

    async fn health_check(&self) -> KvResult<()> {
        let url = self.endpoint("status", "leader", None)?;

        let response = self
            .send("status/leader", self.http.get(url))
            .await
            .map_err(|e| KvError::Unavailable(e.to_string()))?;
        let response = Self::ensure_success("status/leader", response).await?;
        let body = Self::read_body("status/leader", response).await?;

        match serde_json::from_slice::<String>(&body) {
            Ok(leader) if !leader.is_empty() => {
                debug!(%leader, "Consul leader found");
                Ok(())
            }
            _ => Err(KvError::Unavailable(format!(
                "no cluster leader at {}",
                self.base_url
            ))),
        }
    }

    fn backend_name(&self) -> &'static str {
        "consul"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> ConsulClient {
        ConsulClient::new(url, DEFAULT_REQUEST_TIMEOUT).unwrap()
    }

    #[test]
    fn test_endpoint_paths() {
        let consul = client("http://localhost:8500");

        let url = consul.endpoint("kv", "sso/v2/session/abc", Some("raw")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8500/v1/kv/sso/v2/session/abc?raw");

        let url = consul.endpoint("kv", "sso/v2/session/", Some("keys")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8500/v1/kv/sso/v2/session/?keys");

        let url = consul.endpoint("status", "leader", None).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8500/v1/status/leader");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let consul = client("http://proxy.internal/consul/");
        let url = consul.endpoint("kv", "a/b", None).unwrap();
        assert_eq!(url.as_str(), "http://proxy.internal/consul/v1/kv/a/b");
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let consul = client("http://localhost:8500");
        let url = consul.endpoint("kv", "sso/v2/session/a b?c", None).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8500/v1/kv/sso/v2/session/a%20b%3Fc"
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            ConsulClient::new("not a url", DEFAULT_REQUEST_TIMEOUT),
            Err(KvError::Unavailable(_))
        ));
        assert!(matches!(
            ConsulClient::new("mailto:ops@example.org", DEFAULT_REQUEST_TIMEOUT),
            Err(KvError::Unavailable(_))
        ));
    }

    #[test]
    fn test_acknowledged() {
        assert!(ConsulClient::acknowledged("p", b"true").is_ok());
        assert!(matches!(
            ConsulClient::acknowledged("p", b"false"),
            Err(KvError::Status { status: 200, .. })
        ));
    }
}
