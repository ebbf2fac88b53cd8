//! HTTP [`PublishTarget`] client.
//!
//! Speaks a small JSON-over-HTTP transactional protocol to one publish
//! target base URL:
//!
//! | Call | Request | Body |
//! |------|---------|------|
//! | begin | `POST /begin` | (none) |
//! | manifest | `POST /manifest?transactionId=` | manifest JSON |
//! | file | `POST /publish?transactionId=&uri=&zip=&sha256=` | raw file bytes, streamed |
//! | commit | `POST /commit?transactionId=` | (none) |
//! | rollback | `POST /rollback?transactionId=` | (none) |
//!
//! Every response is a [`TargetResponse`]:
//!
//! ```json
//! { "error": false, "message": "ok", "transaction": { "id": "…", "errors": [] } }
//! ```
//!
//! A non-2xx status or `"error": true` fails the call, except for commit,
//! where the error flag and per-file errors are returned as a
//! [`CommitResult`] for the coordinator to judge. Calls are never retried:
//! a failed publish attempt is rolled back and started afresh.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::traits::PublishTarget;
use publish_harness_core::manifest::Manifest;
use publish_harness_core::models::{CommitResult, FileError};

#[derive(Debug, Default, Deserialize)]
pub struct TargetResponse {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub transaction: Option<TransactionBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionBody {
    pub id: String,
    #[serde(default)]
    pub errors: Vec<FileError>,
}

pub struct HttpPublishTarget {
    url: String,
    client: reqwest::Client,
}

impl HttpPublishTarget {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder, operation: &str) -> Result<TargetResponse> {
        let response = request
            .send()
            .await
            .with_context(|| format!("{} {}: connection failed", self.url, operation))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("{} {}: HTTP {}: {}", self.url, operation, status, body_text);
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(TargetResponse::default());
        }
        serde_json::from_slice(&body)
            .with_context(|| format!("{} {}: invalid response body", self.url, operation))
    }

    fn require_ok(&self, response: TargetResponse, operation: &str) -> Result<TargetResponse> {
        if response.error {
            bail!(
                "{} {}: {}",
                self.url,
                operation,
                response.message.unwrap_or_else(|| "target reported an error".to_string())
            );
        }
        Ok(response)
    }
}

const HASH_CHUNK: usize = 64 * 1024;

/// Hex-encoded SHA-256 and size of a file, read in chunks.
pub async fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    let mut size = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

#[async_trait]
impl PublishTarget for HttpPublishTarget {
    fn host(&self) -> &str {
        &self.url
    }

    async fn begin(&self) -> Result<String> {
        let response = self
            .send(self.client.post(self.endpoint("begin")), "begin")
            .await?;
        let response = self.require_ok(response, "begin")?;
        response
            .transaction
            .map(|t| t.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("{} begin: response carried no transaction id", self.url))
    }

    async fn send_manifest(&self, transaction_id: &str, manifest: &Manifest) -> Result<()> {
        let request = self
            .client
            .post(self.endpoint("manifest"))
            .query(&[("transactionId", transaction_id)])
            .json(manifest);
        let response = self.send(request, "manifest").await?;
        self.require_ok(response, "manifest")?;
        Ok(())
    }

    async fn publish_file(
        &self,
        transaction_id: &str,
        uri: &str,
        zipped: bool,
        path: &Path,
    ) -> Result<()> {
        let (sha, size) = sha256_file(path).await?;
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        debug!(host = %self.url, uri, zipped, size, "Sending file");

        let request = self
            .client
            .post(self.endpoint("publish"))
            .query(&[
                ("transactionId", transaction_id),
                ("uri", uri),
                ("zip", if zipped { "true" } else { "false" }),
                ("sha256", sha.as_str()),
            ])
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", size)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));
        let response = self.send(request, "publish").await?;
        self.require_ok(response, "publish")?;
        Ok(())
    }

    async fn commit(&self, transaction_id: &str) -> Result<CommitResult> {
        let request = self
            .client
            .post(self.endpoint("commit"))
            .query(&[("transactionId", transaction_id)]);
        let response = self.send(request, "commit").await?;
        Ok(CommitResult {
            error: response.error,
            message: response.message,
            file_errors: response
                .transaction
                .map(|t| t.errors)
                .unwrap_or_default(),
        })
    }

    async fn rollback(&self, transaction_id: &str) -> Result<()> {
        let request = self
            .client
            .post(self.endpoint("rollback"))
            .query(&[("transactionId", transaction_id)]);
        let response = self.send(request, "rollback").await?;
        self.require_ok(response, "rollback")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commit_response_with_file_errors() {
        let json = r#"{
            "error": false,
            "message": "committed with errors",
            "transaction": { "id": "tx-1", "errors": [ { "uri": "/a", "message": "bad hash" } ] }
        }"#;
        let response: TargetResponse = serde_json::from_str(json).unwrap();
        let tx = response.transaction.unwrap();
        assert_eq!(tx.id, "tx-1");
        assert_eq!(tx.errors.len(), 1);
    }

    #[test]
    fn empty_object_is_default_response() {
        let response: TargetResponse = serde_json::from_str("{}").unwrap();
        assert!(!response.error);
        assert!(response.transaction.is_none());
    }

    #[tokio::test]
    async fn sha256_of_known_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("abc.txt");
        std::fs::write(&path, "abc").unwrap();

        let (sha, size) = sha256_file(&path).await.unwrap();
        assert_eq!(sha, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(size, 3);
    }

    #[tokio::test]
    async fn sha256_spans_chunks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("big.bin");
        let bytes: Vec<u8> = (0..HASH_CHUNK * 2 + 17).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &bytes).unwrap();

        let (sha, size) = sha256_file(&path).await.unwrap();
        assert_eq!(sha, hex::encode(Sha256::digest(&bytes)));
        assert_eq!(size, bytes.len() as u64);
    }

    #[test]
    fn trailing_slash_trimmed_from_host() {
        let target = HttpPublishTarget::new("http://target:8084/", 5).unwrap();
        assert_eq!(target.host(), "http://target:8084");
        assert_eq!(target.endpoint("begin"), "http://target:8084/begin");
    }
}
