// External campaign adapters
//
// One ExternalCampaignAdapter per sending provider. Only the assignment
// coordinator calls adapters, and only after the local assignment has been
// committed; a failed call is reported, never rolled back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Contract
// ============================================================================

/// Contact details pushed to a provider campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignContact {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

/// Provider-side identifier of a contact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(transparent)]
pub struct ProviderContactId(pub String);

impl std::fmt::Display for ProviderContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from a provider call
#[derive(Debug, Clone, thiserror::Error)]
pub enum CampaignError {
    /// The contact is already in the campaign; callers treat this as success
    #[error("contact already exists in campaign")]
    AlreadyExists,

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// One implementation per external sending provider
#[async_trait]
pub trait ExternalCampaignAdapter: Send + Sync + 'static {
    /// Registry name, matched against a workflow's provider binding
    fn provider(&self) -> &str;

    /// Add a contact to a provider campaign.
    ///
    /// Repeating the call for the same (campaign, email) pair may return
    /// [`CampaignError::AlreadyExists`].
    async fn add_contact(
        &self,
        campaign_id: &str,
        contact: &CampaignContact,
    ) -> Result<ProviderContactId, CampaignError>;
}

// ============================================================================
// Registry
// ============================================================================

/// Adapters keyed by provider name
#[derive(Clone, Default)]
pub struct CampaignAdapters {
    adapters: HashMap<String, Arc<dyn ExternalCampaignAdapter>>,
}

impl CampaignAdapters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ExternalCampaignAdapter>) {
        self.adapters.insert(adapter.provider().to_string(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ExternalCampaignAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn ExternalCampaignAdapter>> {
        self.adapters.get(provider).cloned()
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for CampaignAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignAdapters")
            .field("providers", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Sync reporting
// ============================================================================

/// A provider sync that did not go through; attached to a successful assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExternalSyncFailure {
    pub entity_id: Uuid,
    pub provider: String,
    pub reason: String,
}

/// What happened on the provider side of an assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncReport {
    /// No provider binding involved
    NotRequired,
    /// Contact is in the provider campaign (newly added or already present)
    Synced {
        provider: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        contact_id: Option<ProviderContactId>,
    },
    Failed(ExternalSyncFailure),
}

impl SyncReport {
    pub fn failure(&self) -> Option<&ExternalSyncFailure> {
        match self {
            SyncReport::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

// ============================================================================
// In-memory adapter
// ============================================================================

/// Adapter that keeps contacts in memory
///
/// Used for local development and tests. `fail_next` makes the following
/// calls fail with the given error.
pub struct InMemoryCampaignAdapter {
    name: String,
    contacts: RwLock<HashMap<(String, String), ProviderContactId>>,
    failure: RwLock<Option<CampaignError>>,
    delay: RwLock<Duration>,
}

impl InMemoryCampaignAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contacts: RwLock::new(HashMap::new()),
            failure: RwLock::new(None),
            delay: RwLock::new(Duration::ZERO),
        }
    }

    /// Fail every call with `error` until cleared
    pub fn fail_with(&self, error: Option<CampaignError>) {
        *self.failure.write() = error;
    }

    /// Delay every call, to exercise caller timeouts
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = delay;
    }

    pub fn contact_count(&self, campaign_id: &str) -> usize {
        self.contacts
            .read()
            .keys()
            .filter(|(campaign, _)| campaign == campaign_id)
            .count()
    }
}

#[async_trait]
impl ExternalCampaignAdapter for InMemoryCampaignAdapter {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn add_contact(
        &self,
        campaign_id: &str,
        contact: &CampaignContact,
    ) -> Result<ProviderContactId, CampaignError> {
        let delay = *self.delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failure.read().clone() {
            return Err(err);
        }

        let key = (campaign_id.to_string(), contact.email.to_lowercase());
        let mut contacts = self.contacts.write();
        if contacts.contains_key(&key) {
            return Err(CampaignError::AlreadyExists);
        }
        let id = ProviderContactId(format!("{}-{}", self.name, Uuid::now_v7()));
        contacts.insert(key, id.clone());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(email: &str) -> CampaignContact {
        CampaignContact {
            email: email.to_string(),
            first_name: Some("Ada".to_string()),
            last_name: None,
            company: None,
        }
    }

    #[tokio::test]
    async fn test_in_memory_adapter_reports_duplicates() {
        let adapter = InMemoryCampaignAdapter::new("test");
        adapter.add_contact("c1", &contact("a@example.com")).await.unwrap();
        let again = adapter.add_contact("c1", &contact("A@example.com")).await;
        assert!(matches!(again, Err(CampaignError::AlreadyExists)));
        assert_eq!(adapter.contact_count("c1"), 1);
    }

    #[test]
    fn test_registry_lookup() {
        let adapters = CampaignAdapters::new().with(Arc::new(InMemoryCampaignAdapter::new("mail")));
        assert!(adapters.get("mail").is_some());
        assert!(adapters.get("other").is_none());
    }

    #[test]
    fn test_contact_serializes_camel_case() {
        let json = serde_json::to_value(contact("a@example.com")).unwrap();
        assert_eq!(json["firstName"], "Ada");
        assert!(json.get("lastName").is_none());
    }
}
