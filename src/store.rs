//! Persistence collaborators, specified only at their boundary.
//!
//! This core needs create/read/update (never delete) on finance
//! applications and the webhook ledger, plus status access on proposals and
//! the per-tenant settings blob. `MemoryStore` backs the `serve` binary and
//! the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::application::{FinanceApplication, ProposalStatus};
use crate::error::{FinanceError, Result};

/// Append-only idempotency ledger row for one webhook delivery.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookEventRecord {
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn create(&self, application: FinanceApplication) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<FinanceApplication>>;
    async fn find_by_external_id(
        &self,
        lender_id: &str,
        external_id: &str,
    ) -> Result<Option<FinanceApplication>>;
    async fn update(&self, application: &FinanceApplication) -> Result<()>;
}

#[async_trait]
pub trait WebhookLedger: Send + Sync {
    /// Inserts the record unless a row with the same `(provider, event_id)`
    /// already exists. Returns whether this call created the row — the
    /// first writer wins and owns processing; racers observe `false` and
    /// skip. Rows are never deleted.
    async fn insert_if_absent(&self, record: WebhookEventRecord) -> Result<bool>;

    async fn find(&self, provider: &str, event_id: &str) -> Result<Option<WebhookEventRecord>>;

    /// Records the processing outcome on an existing row. Called exactly
    /// once per row, success or failure alike.
    async fn record_outcome(
        &self,
        provider: &str,
        event_id: &str,
        error: Option<String>,
    ) -> Result<()>;
}

#[async_trait]
pub trait ProposalStore: Send + Sync {
    async fn proposal_status(&self, proposal_id: Uuid) -> Result<Option<ProposalStatus>>;
    async fn set_proposal_status(&self, proposal_id: Uuid, status: ProposalStatus) -> Result<()>;
}

/// Per-tenant settings relevant to lender routing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CompanySettings {
    pub org_alias: Option<String>,
}

#[async_trait]
pub trait CompanyStore: Send + Sync {
    async fn org_alias(&self, company_id: &str) -> Result<Option<String>>;
}

/// In-memory implementation of every collaborator.
#[derive(Default)]
pub struct MemoryStore {
    applications: RwLock<HashMap<Uuid, FinanceApplication>>,
    ledger: RwLock<HashMap<(String, String), WebhookEventRecord>>,
    proposals: RwLock<HashMap<Uuid, ProposalStatus>>,
    companies: RwLock<HashMap<String, CompanySettings>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn seed_proposal(&self, proposal_id: Uuid, status: ProposalStatus) {
        self.proposals.write().await.insert(proposal_id, status);
    }

    pub async fn seed_company(&self, company_id: &str, settings: CompanySettings) {
        self.companies
            .write()
            .await
            .insert(company_id.to_string(), settings);
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn create(&self, application: FinanceApplication) -> Result<()> {
        self.applications
            .write()
            .await
            .insert(application.id, application);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<FinanceApplication>> {
        Ok(self.applications.read().await.get(&id).cloned())
    }

    async fn find_by_external_id(
        &self,
        lender_id: &str,
        external_id: &str,
    ) -> Result<Option<FinanceApplication>> {
        Ok(self
            .applications
            .read()
            .await
            .values()
            .find(|a| a.lender_id == lender_id && a.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn update(&self, application: &FinanceApplication) -> Result<()> {
        let mut applications = self.applications.write().await;
        if !applications.contains_key(&application.id) {
            return Err(FinanceError::NotFound(format!(
                "finance application {}",
                application.id
            )));
        }
        applications.insert(application.id, application.clone());
        Ok(())
    }
}

#[async_trait]
impl WebhookLedger for MemoryStore {
    async fn insert_if_absent(&self, record: WebhookEventRecord) -> Result<bool> {
        let mut ledger = self.ledger.write().await;
        let key = (record.provider.clone(), record.event_id.clone());
        if ledger.contains_key(&key) {
            return Ok(false);
        }
        ledger.insert(key, record);
        Ok(true)
    }

    async fn find(&self, provider: &str, event_id: &str) -> Result<Option<WebhookEventRecord>> {
        Ok(self
            .ledger
            .read()
            .await
            .get(&(provider.to_string(), event_id.to_string()))
            .cloned())
    }

    async fn record_outcome(
        &self,
        provider: &str,
        event_id: &str,
        error: Option<String>,
    ) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        let key = (provider.to_string(), event_id.to_string());
        match ledger.get_mut(&key) {
            Some(record) => {
                record.processed_at = Some(Utc::now());
                record.last_error = error;
                Ok(())
            }
            None => Err(FinanceError::NotFound(format!("webhook event {event_id}"))),
        }
    }
}

#[async_trait]
impl ProposalStore for MemoryStore {
    async fn proposal_status(&self, proposal_id: Uuid) -> Result<Option<ProposalStatus>> {
        Ok(self.proposals.read().await.get(&proposal_id).copied())
    }

    async fn set_proposal_status(&self, proposal_id: Uuid, status: ProposalStatus) -> Result<()> {
        self.proposals.write().await.insert(proposal_id, status);
        Ok(())
    }
}

#[async_trait]
impl CompanyStore for MemoryStore {
    async fn org_alias(&self, company_id: &str) -> Result<Option<String>> {
        Ok(self
            .companies
            .read()
            .await
            .get(company_id)
            .and_then(|s| s.org_alias.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ApplicationStatus;

    fn record(event_id: &str) -> WebhookEventRecord {
        WebhookEventRecord {
            provider: "helios".to_string(),
            event_id: event_id.to_string(),
            event_type: "application.approved".to_string(),
            payload: serde_json::json!({}),
            received_at: Utc::now(),
            processed_at: None,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_ledger_first_writer_wins() {
        let store = MemoryStore::new();
        assert!(store.insert_if_absent(record("evt-1")).await.unwrap());
        assert!(!store.insert_if_absent(record("evt-1")).await.unwrap());
        assert!(store.insert_if_absent(record("evt-2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_ledger_outcome_is_recorded() {
        let store = MemoryStore::new();
        store.insert_if_absent(record("evt-1")).await.unwrap();
        store
            .record_outcome("helios", "evt-1", Some("no matching application".to_string()))
            .await
            .unwrap();

        let row = store.find("helios", "evt-1").await.unwrap().unwrap();
        assert!(row.processed_at.is_some());
        assert_eq!(row.last_error.as_deref(), Some("no matching application"));
    }

    #[tokio::test]
    async fn test_application_lookup_by_external_id() {
        let store = MemoryStore::new();
        let mut app = FinanceApplication::new(Uuid::new_v4(), "helios");
        app.set_external_id("acct-42").unwrap();
        store.create(app.clone()).await.unwrap();

        let found = store
            .find_by_external_id("helios", "acct-42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, app.id);
        assert!(
            store
                .find_by_external_id("helios", "acct-43")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_update_requires_existing_row() {
        let store = MemoryStore::new();
        let mut app = FinanceApplication::new(Uuid::new_v4(), "helios");
        assert!(store.update(&app).await.is_err());

        store.create(app.clone()).await.unwrap();
        app.transition(ApplicationStatus::Submitted).unwrap();
        store.update(&app).await.unwrap();
        assert_eq!(
            store.get(app.id).await.unwrap().unwrap().status,
            ApplicationStatus::Submitted
        );
    }
}
