pub mod application;
pub mod cache;
pub mod config;
pub mod error;
pub mod lender;
pub mod log;
pub mod pricing;
pub mod providers;
pub mod reference;
pub mod routes;
pub mod store;
pub mod webhook;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::error::FinanceError;
use crate::lender::ProviderRegistry;
use crate::providers::helios::HeliosClient;
use crate::providers::mock::MockProvider;
use crate::reference::ReferenceDataService;
use crate::routes::ApiState;
use crate::store::{CompanySettings, MemoryStore};
use crate::webhook::WebhookState;

/// Builds the lender registry for this deployment. In test mode the same
/// lender id resolves to the deterministic mock, so call sites never branch
/// on the mode themselves.
pub fn build_registry(config: &AppConfig) -> std::result::Result<ProviderRegistry, FinanceError> {
    let mut registry = ProviderRegistry::new();
    if config.test_mode {
        info!("test mode: lender calls are served by the deterministic mock");
        registry.register(&config.lender.lender_id, || Arc::new(MockProvider::new()));
    } else {
        let client = Arc::new(HeliosClient::new(
            &config.lender.base_url,
            &config.lender.email,
            &config.lender.password,
        )?);
        registry.register(&config.lender.lender_id, move || client.clone());
    }
    Ok(registry)
}

pub async fn run_serve(config: AppConfig) -> Result<()> {
    let registry = build_registry(&config)?;
    let provider = registry.create(&config.lender.lender_id)?;

    let store = MemoryStore::new();
    for (company_id, company) in &config.companies {
        store
            .seed_company(
                company_id,
                CompanySettings {
                    org_alias: company.org_alias.clone(),
                },
            )
            .await;
    }

    let reference = Arc::new(ReferenceDataService::new(provider.clone()));

    let api_state = ApiState {
        provider,
        reference,
        companies: store.clone(),
    };
    let webhook_state = WebhookState {
        applications: store.clone(),
        ledger: store.clone(),
        proposals: store.clone(),
        secret: config.webhook.secret.clone(),
    };

    let app = routes::router(api_state).merge(webhook::router(webhook_state));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, lender = %config.lender.lender_id, "finbridge ready");

    axum::serve(listener, app).await?;
    Ok(())
}
