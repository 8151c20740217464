use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::ledger::models::{ProviderAccounts, ProviderCredentials};

/// Read access to the accounting provider
#[async_trait]
pub trait AccountProvider: Send + Sync {
    /// Fetch the five account buckets of one provider section
    async fn fetch_accounts(
        &self,
        section_id: &str,
        credentials: &ProviderCredentials,
    ) -> AppResult<ProviderAccounts>;
}

/// Response envelope of the provider's resource API
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    results: Option<ProviderAccounts>,
}

/// HTTP client for the Whooing resource API
pub struct WhooingClient {
    client: Client,
    base_url: String,
}

impl WhooingClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build provider client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn accounts_url(&self) -> String {
        format!("{}/accounts.json", self.base_url)
    }
}

#[async_trait]
impl AccountProvider for WhooingClient {
    async fn fetch_accounts(
        &self,
        section_id: &str,
        credentials: &ProviderCredentials,
    ) -> AppResult<ProviderAccounts> {
        let url = self.accounts_url();
        debug!("Fetching accounts for section {} from {}", section_id, url);

        let response = self
            .client
            .get(&url)
            .query(&[("section_id", section_id)])
            .bearer_auth(&credentials.access_token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!("Provider rejected credentials of user {}", credentials.user_idx);
        }
        if !status.is_success() {
            return Err(AppError::ExternalProvider(format!(
                "accounts request for section {} returned {}",
                section_id, status
            )));
        }

        parse_accounts(section_id, &body)
    }
}

/// Decode an accounts response body, treating any non-200 envelope as a provider failure
pub fn parse_accounts(section_id: &str, body: &str) -> AppResult<ProviderAccounts> {
    let envelope: Envelope = serde_json::from_str(body).map_err(|e| {
        AppError::ExternalProvider(format!(
            "unparseable accounts payload for section {}: {}",
            section_id, e
        ))
    })?;

    if envelope.code != 200 {
        return Err(AppError::ExternalProvider(format!(
            "provider answered code {} for section {}: {}",
            envelope.code,
            section_id,
            envelope.message.unwrap_or_default()
        )));
    }

    envelope.results.ok_or_else(|| {
        AppError::ExternalProvider(format!("accounts payload for section {} has no results", section_id))
    })
}
