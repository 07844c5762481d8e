//! Downloads from the content-addressed storage gateway.

use std::time::Duration;

use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use url::Url;

use afriverse_shared::{AfriverseError, ErrorClass, GatewayConfig, Result};

use crate::{build_client, classify, join_url};

/// Bytes fetched for one content reference.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    /// Hex SHA-256 of `bytes`.
    pub content_hash: String,
    /// `Content-Type` reported by the gateway, if any.
    pub mime_type: Option<String>,
}

/// Client for `GET {gateway}/{reference}`.
#[derive(Clone)]
pub struct StorageGateway {
    client: Client,
    base_url: String,
}

impl StorageGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Url::parse(&config.base_url).map_err(|e| {
            AfriverseError::config(format!("invalid gateway url {:?}: {e}", config.base_url))
        })?;
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            base_url: config.base_url.clone(),
        })
    }

    /// Download the content behind `reference`.
    #[instrument(skip_all, fields(reference = %reference))]
    pub async fn fetch(&self, reference: &str) -> Result<FetchedContent> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(AfriverseError::fetch(
                ErrorClass::Application,
                "empty content reference",
            ));
        }

        let url = join_url(&self.base_url, reference);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AfriverseError::fetch(classify(&e), format!("{url}: {e}")))?;

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| {
                AfriverseError::fetch(classify(&e), format!("{url}: failed to read body: {e}"))
            })?
            .to_vec();

        let content_hash = compute_hash(&bytes);
        debug!(len = bytes.len(), %content_hash, "content fetched");

        Ok(FetchedContent {
            bytes,
            content_hash,
            mime_type,
        })
    }
}

/// Compute SHA-256 hash of content.
fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway_for(server: &MockServer) -> StorageGateway {
        let config = GatewayConfig {
            base_url: format!("{}/ipfs", server.uri()),
            timeout_secs: 5,
        };
        StorageGateway::new(&config).expect("gateway")
    }

    #[tokio::test]
    async fn fetch_returns_bytes_and_hash() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ipfs/bafyclip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"RIFF....WAVE".to_vec())
                    .insert_header("content-type", "audio/wav"),
            )
            .mount(&server)
            .await;

        let fetched = gateway_for(&server).fetch("bafyclip").await.expect("fetch");
        assert_eq!(fetched.bytes, b"RIFF....WAVE");
        assert_eq!(fetched.content_hash.len(), 64);
        assert_eq!(fetched.mime_type.as_deref(), Some("audio/wav"));
    }

    #[tokio::test]
    async fn missing_content_is_an_application_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = gateway_for(&server).fetch("bafymissing").await.unwrap_err();
        assert!(matches!(
            err,
            AfriverseError::Fetch {
                class: ErrorClass::Application,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_retryable() {
        let config = GatewayConfig {
            base_url: "http://127.0.0.1:9/ipfs".into(),
            timeout_secs: 2,
        };
        let gateway = StorageGateway::new(&config).expect("gateway");
        let err = gateway.fetch("bafy").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(
            compute_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
