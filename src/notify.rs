//! Built-in [`Notifier`] and [`Indexer`] implementations.
//!
//! - **[`LogNotifier`]**: writes publish lifecycle events to the log.
//! - **[`WebhookNotifier`]**: POSTs a JSON payload to a configured URL, and
//!   also logs. Delivery failures are returned to the caller, which logs and
//!   ignores them.
//! - **[`LogIndexer`]**: records reindex requests in the log; used when no
//!   search service is wired in.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::traits::{Indexer, Notifier, PublishStage};

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        collection_id: &str,
        stage: PublishStage,
        detail: Option<&str>,
    ) -> Result<()> {
        match stage {
            PublishStage::Failed => warn!(
                collection = collection_id,
                stage = stage.as_str(),
                detail = detail.unwrap_or(""),
                "Publish notification"
            ),
            _ => info!(
                collection = collection_id,
                stage = stage.as_str(),
                detail = detail.unwrap_or(""),
                "Publish notification"
            ),
        }
        Ok(())
    }
}

pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        collection_id: &str,
        stage: PublishStage,
        detail: Option<&str>,
    ) -> Result<()> {
        LogNotifier.notify(collection_id, stage, detail).await?;

        let body = serde_json::json!({
            "collection": collection_id,
            "stage": stage.as_str(),
            "detail": detail,
        });

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Webhook error {}: {}", status, body_text);
        }
        Ok(())
    }
}

pub struct LogIndexer;

#[async_trait]
impl Indexer for LogIndexer {
    async fn reindex(&self, uri: &str) -> Result<()> {
        info!(uri, "Reindex requested");
        Ok(())
    }

    async fn remove_index(&self, content_type: &str, uri: &str) -> Result<()> {
        info!(uri, content_type, "Index removal requested");
        Ok(())
    }
}
