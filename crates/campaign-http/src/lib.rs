// HTTP Campaign Provider
//
// Implements ExternalCampaignAdapter for campaign services exposing
// `POST {base}/campaigns/{campaign_id}/contacts` with bearer authentication.

use async_trait::async_trait;
use outreach_engine::{CampaignContact, CampaignError, ExternalCampaignAdapter, ProviderContactId};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

const DEFAULT_PROVIDER_NAME: &str = "http";

/// Connection settings for an HTTP campaign provider
#[derive(Clone)]
pub struct HttpCampaignConfig {
    /// Name workflows use in their provider binding
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
}

impl HttpCampaignConfig {
    /// Read `CAMPAIGN_PROVIDER_NAME`, `CAMPAIGN_API_URL` and `CAMPAIGN_API_KEY`.
    ///
    /// Returns `None` unless both the URL and the key are set.
    pub fn from_env() -> Option<Self> {
        let base_url = non_empty_var("CAMPAIGN_API_URL")?;
        let api_key = non_empty_var("CAMPAIGN_API_KEY")?;
        let provider = non_empty_var("CAMPAIGN_PROVIDER_NAME")
            .unwrap_or_else(|| DEFAULT_PROVIDER_NAME.to_string());
        Some(Self {
            provider,
            base_url,
            api_key,
        })
    }
}

impl std::fmt::Debug for HttpCampaignConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCampaignConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
struct AddContactResponse {
    id: String,
}

/// Campaign adapter speaking JSON over HTTP
pub struct HttpCampaignAdapter {
    client: Client,
    provider: String,
    base_url: String,
    api_key: String,
}

impl HttpCampaignAdapter {
    pub fn new(config: HttpCampaignConfig) -> Result<Self, CampaignError> {
        if config.api_key.trim().is_empty() {
            return Err(CampaignError::Configuration(
                "campaign API key must not be empty".to_string(),
            ));
        }
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(CampaignError::Configuration(format!(
                "campaign API URL must be http(s): {}",
                config.base_url
            )));
        }
        Ok(Self {
            client: Client::new(),
            provider: config.provider,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    /// Adapter from environment, if one is configured
    pub fn from_env() -> Result<Option<Self>, CampaignError> {
        HttpCampaignConfig::from_env().map(Self::new).transpose()
    }

    /// Point the adapter at another endpoint (used by tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn contacts_url(&self, campaign_id: &str) -> String {
        format!("{}/campaigns/{}/contacts", self.base_url, campaign_id)
    }
}

impl std::fmt::Debug for HttpCampaignAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCampaignAdapter")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl ExternalCampaignAdapter for HttpCampaignAdapter {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn add_contact(
        &self,
        campaign_id: &str,
        contact: &CampaignContact,
    ) -> Result<ProviderContactId, CampaignError> {
        let response = self
            .client
            .post(self.contacts_url(campaign_id))
            .bearer_auth(&self.api_key)
            .json(contact)
            .send()
            .await
            .map_err(|e| CampaignError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            tracing::debug!(
                provider = %self.provider,
                campaign_id,
                "Contact already in campaign"
            );
            return Err(CampaignError::AlreadyExists);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CampaignError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AddContactResponse = response
            .json()
            .await
            .map_err(|e| CampaignError::Transport(format!("invalid response body: {e}")))?;

        tracing::debug!(
            provider = %self.provider,
            campaign_id,
            contact_id = %parsed.id,
            "Added contact to campaign"
        );
        Ok(ProviderContactId(parsed.id))
    }
}
