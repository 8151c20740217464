use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::ledger::models::DueRule;

/// Delivers a due rule to its webhook
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, rule: &DueRule) -> AppResult<()>;
}

/// Single-attempt JSON POST to the rule's webhook URL
pub struct HttpWebhookSender {
    client: Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build webhook client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, rule: &DueRule) -> AppResult<()> {
        let response = self.client.post(&rule.webhook_url).json(rule).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ExternalProvider(format!(
                "webhook for rule {} answered {}",
                rule.transaction_idx, status
            )));
        }

        debug!("Webhook delivered for rule {}", rule.transaction_idx);
        Ok(())
    }
}
