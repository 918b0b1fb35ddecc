//! Read-side HTTP surface for proposal tooling: live pricing, approved
//! vendors and disclosures. Webhook ingestion lives in [`crate::webhook`].

use axum::Json;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{FinanceError, Result};
use crate::lender::{Disclosure, FinancingProvider, Vendor};
use crate::pricing::PricingEstimate;
use crate::reference::ReferenceDataService;
use crate::store::CompanyStore;

#[derive(Clone)]
pub struct ApiState {
    pub provider: Arc<dyn FinancingProvider>,
    pub reference: Arc<ReferenceDataService>,
    pub companies: Arc<dyn CompanyStore>,
}

pub fn router(state: ApiState) -> axum::Router {
    axum::Router::new()
        .route("/api/v1/pricing/estimate", post(pricing_estimate))
        .route("/api/v1/vendors", get(approved_vendors))
        .route("/api/v1/disclosures", get(disclosures))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub(crate) struct PricingRequest {
    pub(crate) state_code: String,
    pub(crate) financed_amount: f64,
    #[serde(default)]
    pub(crate) system_design: Option<serde_json::Value>,
    #[serde(default)]
    pub(crate) company_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PricingResponse {
    pub(crate) products: Vec<PricingEstimate>,
}

async fn pricing_estimate(
    State(state): State<ApiState>,
    Json(request): Json<PricingRequest>,
) -> Result<Json<PricingResponse>> {
    // Dealer attribution comes from tenant settings, not from the caller.
    let org_alias = match &request.company_id {
        Some(company_id) => state.companies.org_alias(company_id).await?,
        None => None,
    };

    let products = state
        .provider
        .get_estimated_pricing(
            &request.state_code,
            request.financed_amount,
            request.system_design.as_ref(),
            org_alias.as_deref(),
        )
        .await?;
    Ok(Json(PricingResponse { products }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct VendorQuery {
    pub(crate) equipment_type: String,
    #[serde(default)]
    pub(crate) force: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct VendorResponse {
    pub(crate) vendors: Vec<Vendor>,
    pub(crate) from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) age_seconds: Option<u64>,
}

async fn approved_vendors(
    State(state): State<ApiState>,
    Query(query): Query<VendorQuery>,
) -> Result<Json<VendorResponse>> {
    if query.equipment_type.is_empty() {
        return Err(FinanceError::validation("equipment_type", "must not be empty"));
    }
    let lookup = state
        .reference
        .approved_vendors(&query.equipment_type, query.force)
        .await?;
    Ok(Json(VendorResponse {
        vendors: lookup.data,
        from_cache: lookup.from_cache,
        age_seconds: lookup.age_seconds,
    }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct DisclosureQuery {
    #[serde(default, rename = "type")]
    pub(crate) disclosure_type: Option<String>,
    #[serde(default = "default_language")]
    pub(crate) language: String,
    #[serde(default)]
    pub(crate) force: bool,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Serialize)]
pub(crate) struct DisclosureResponse {
    pub(crate) disclosures: Vec<Disclosure>,
    pub(crate) from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) age_seconds: Option<u64>,
}

async fn disclosures(
    State(state): State<ApiState>,
    Query(query): Query<DisclosureQuery>,
) -> Result<Json<DisclosureResponse>> {
    let lookup = state
        .reference
        .disclosures(query.disclosure_type.as_deref(), &query.language, query.force)
        .await?;
    Ok(Json(DisclosureResponse {
        disclosures: lookup.data,
        from_cache: lookup.from_cache,
        age_seconds: lookup.age_seconds,
    }))
}
